//! Solver Step Statistics
//!
//! Deterministic per-step counters. No wall-clock timing lives in the core:
//! counters replay bit-for-bit with the simulation, which keeps them usable
//! inside determinism tests and cross-machine comparisons. Wall-clock
//! profiling belongs to the benchmarking harness outside this crate.

/// Counters for one solver step.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StepStats {
    /// Islands produced by the partition.
    pub islands: u32,
    /// Constraints prepared and solved.
    pub constraints_solved: u32,
    /// Contact points solved across all manifolds.
    pub contact_points: u32,
    /// Coupled equations dropped by conditioning recovery.
    pub equations_dropped: u32,
    /// Velocity iterations executed, summed over islands.
    pub velocity_iterations: u32,
    /// Position iterations executed, summed over islands.
    pub position_iterations: u32,
}

impl StepStats {
    /// Fold another island's counters into this one.
    pub fn merge(&mut self, other: &StepStats) {
        self.islands += other.islands;
        self.constraints_solved += other.constraints_solved;
        self.contact_points += other.contact_points;
        self.equations_dropped += other.equations_dropped;
        self.velocity_iterations += other.velocity_iterations;
        self.position_iterations += other.position_iterations;
    }
}
