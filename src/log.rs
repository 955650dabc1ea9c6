//! Warning Policy and Log Callback
//!
//! The solver never writes to a log sink from hot paths directly. The single
//! registration point is a callback `(level, category, message)` owned by the
//! solver context; when none is registered, messages forward to `tracing`.
//!
//! Rate limiting is deterministic: cooldowns count solver steps, not wall
//! clock, so a simulation replays with identical warning output. The policy
//! holds the shared cooldown length and the current step counter; each
//! constraint owns its own last-emitted timer and passes it in.

use std::sync::Arc;

/// Severity of a warning-callback message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarnLevel {
    /// Diagnostic detail (recovery succeeded, cache behavior).
    Debug,
    /// Degraded but functional (equation dropped, conditioning high).
    Warning,
    /// Constraint disabled for the step (recovery failed).
    Error,
}

/// Category of a warning-callback message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WarnCategory {
    /// Condition estimate exceeded the threshold.
    Conditioning,
    /// Inversion failed with a pivot below epsilon.
    RankDeficient,
    /// Equation-drop recovery activity.
    Recovery,
    /// Workspace/allocation pressure.
    Resource,
}

impl WarnCategory {
    fn as_str(self) -> &'static str {
        match self {
            WarnCategory::Conditioning => "conditioning",
            WarnCategory::RankDeficient => "rank-deficient",
            WarnCategory::Recovery => "recovery",
            WarnCategory::Resource => "resource",
        }
    }
}

/// Registered warning callback.
pub type WarnCallback = Arc<dyn Fn(WarnLevel, WarnCategory, &str) + Send + Sync>;

/// Step-counted, rate-limited warning dispatch.
#[derive(Clone)]
pub struct WarningPolicy {
    callback: Option<WarnCallback>,
    /// Steps that must elapse between emissions sharing one cooldown timer.
    pub cooldown_steps: u64,
    current_step: u64,
}

impl WarningPolicy {
    /// Default cooldown between repeated warnings from one source.
    pub const DEFAULT_COOLDOWN_STEPS: u64 = 60;

    /// Policy with the default cooldown and the `tracing` sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            callback: None,
            cooldown_steps: Self::DEFAULT_COOLDOWN_STEPS,
            current_step: 0,
        }
    }

    /// Register a callback, replacing the `tracing` default.
    pub fn set_callback(&mut self, callback: WarnCallback) {
        self.callback = Some(callback);
    }

    /// Remove any registered callback, restoring the `tracing` default.
    pub fn clear_callback(&mut self) {
        self.callback = None;
    }

    /// Advance the step counter; called once per solver step.
    pub fn advance_step(&mut self) {
        self.current_step += 1;
    }

    /// Current step counter value.
    #[inline]
    #[must_use]
    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    /// Emit a message through `timer`'s cooldown.
    ///
    /// `timer` is the caller-owned last-emission step (one per constraint, so
    /// a single noisy constraint cannot silence others). Returns whether the
    /// message was actually emitted.
    pub fn emit(
        &self,
        timer: &mut Option<u64>,
        level: WarnLevel,
        category: WarnCategory,
        message: &str,
    ) -> bool {
        if let Some(last) = *timer {
            if self.current_step.saturating_sub(last) < self.cooldown_steps {
                return false;
            }
        }
        *timer = Some(self.current_step);

        if let Some(callback) = &self.callback {
            callback(level, category, message);
        } else {
            match level {
                WarnLevel::Debug => {
                    tracing::debug!(category = category.as_str(), "{message}");
                }
                WarnLevel::Warning => {
                    tracing::warn!(category = category.as_str(), "{message}");
                }
                WarnLevel::Error => {
                    tracing::error!(category = category.as_str(), "{message}");
                }
            }
        }
        true
    }
}

impl Default for WarningPolicy {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for WarningPolicy {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WarningPolicy")
            .field("has_callback", &self.callback.is_some())
            .field("cooldown_steps", &self.cooldown_steps)
            .field("current_step", &self.current_step)
            .finish()
    }
}
