//! Coupled Multi-Equation Constraint
//!
//! One constraint carrying up to [`MAX_COUPLED_EQUATIONS`] scalar equations,
//! each a linear combination of the shared distance error and angle error:
//!
//! ```text
//! C_i = ratio_distance_i * C_distance + ratio_angle_i * C_angle - target_offset_i
//! ```
//!
//! Every step the active equations assemble a symmetric effective-mass
//! matrix, invert it through the KKT backend, and solve all equations as one
//! block. Two independent condition estimates (a Gershgorin-style row bound
//! and a cyclic-Jacobi spectral estimate) watch the system; when either
//! crosses the threshold — or inversion fails outright — the equation with
//! the smallest-magnitude system diagonal is deactivated for the step and
//! the block is re-solved, until conditioning recovers, the per-step drop
//! budget runs out, or a single equation remains. A recovery dead end
//! deactivates the whole constraint for the step instead of letting a
//! non-finite impulse reach the bodies.

use crate::body::{Body, BodyHandle};
use crate::constraint::{
    baumgarte_bias, two_bodies_mut, ConstraintOps, PrepareContext, SolverParams,
};
use crate::error::PhysicsError;
use crate::linalg::{
    gershgorin_condition_bound, jacobi_eigen_range, SmallMat, MAX_DIM,
};
use crate::log::{WarnCategory, WarnLevel};
use crate::math::Vec2;

/// Fixed upper bound on equations per coupled constraint.
pub const MAX_COUPLED_EQUATIONS: usize = MAX_DIM;

/// Condition estimate above which recovery kicks in.
pub const CONDITION_THRESHOLD: f64 = 1e6;

/// Pivot epsilon handed to the KKT backend.
const PIVOT_EPSILON: f64 = 1e-10;

/// Warning flag bits reported in [`CoupledDiagnostics::flags`].
pub mod warning_flags {
    /// A condition estimate exceeded the threshold.
    pub const ILL_CONDITIONED: u32 = 1 << 0;
    /// Inversion failed with a pivot below epsilon.
    pub const RANK_DEFICIENT: u32 = 1 << 1;
    /// At least one equation was dropped this step.
    pub const EQUATION_DROPPED: u32 = 1 << 2;
    /// Recovery failed; the whole constraint is inactive this step.
    pub const ALL_DROPPED: u32 = 1 << 3;
    /// The Gershgorin bound was the estimate that tripped.
    pub const GERSHGORIN_HIGH: u32 = 1 << 4;
    /// The spectral estimate was the estimate that tripped.
    pub const SPECTRAL_HIGH: u32 = 1 << 5;
}

/// One scalar equation of a coupled constraint.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoupledEquation {
    /// Weight on the shared distance error.
    pub ratio_distance: f64,
    /// Weight on the shared angle error.
    pub ratio_angle: f64,
    /// Offset subtracted from the combined error.
    pub target_offset: f64,
    /// Softness/CFM term added to this equation's diagonal.
    pub softness: f64,
    /// Optional spring stiffness acting on this equation's deflection.
    pub spring_stiffness: f64,
    /// Optional spring damping acting on this equation's velocity.
    pub spring_damping: f64,
    /// User-level activity flag; inactive equations contribute no rows.
    pub active: bool,
    /// Accumulated impulse, persisted for warm starting.
    pub impulse: f64,
}

impl Default for CoupledEquation {
    fn default() -> Self {
        Self {
            ratio_distance: 0.0,
            ratio_angle: 0.0,
            target_offset: 0.0,
            softness: 0.0,
            spring_stiffness: 0.0,
            spring_damping: 0.0,
            active: true,
            impulse: 0.0,
        }
    }
}

impl CoupledEquation {
    /// Equation weighting only the distance error.
    #[must_use]
    pub fn distance(ratio: f64) -> Self {
        Self {
            ratio_distance: ratio,
            ..Self::default()
        }
    }

    /// Equation weighting only the angle error.
    #[must_use]
    pub fn angle(ratio: f64) -> Self {
        Self {
            ratio_angle: ratio,
            ..Self::default()
        }
    }

    /// Gear-style equation mixing both errors.
    #[must_use]
    pub fn mixed(ratio_distance: f64, ratio_angle: f64) -> Self {
        Self {
            ratio_distance,
            ratio_angle,
            ..Self::default()
        }
    }

    /// Set the target offset.
    #[must_use]
    pub fn with_target_offset(mut self, offset: f64) -> Self {
        self.target_offset = offset;
        self
    }

    /// Set the softness term.
    #[must_use]
    pub fn with_softness(mut self, softness: f64) -> Self {
        self.softness = softness;
        self
    }

    /// Attach a spring to this equation.
    #[must_use]
    pub fn with_spring(mut self, stiffness: f64, damping: f64) -> Self {
        self.spring_stiffness = stiffness;
        self.spring_damping = damping;
        self
    }
}

/// Per-step conditioning diagnostics, readable through
/// [`CoupledConstraint::diagnostics`].
#[derive(Clone, Copy, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CoupledDiagnostics {
    /// Equations that survived this step's prepare.
    pub active_equations: usize,
    /// Rank of the accepted system (equals `active_equations` on success).
    pub rank: usize,
    /// Smallest pivot magnitude seen by the accepted factorization.
    pub min_pivot: f64,
    /// Largest pivot magnitude seen by the accepted factorization.
    pub max_pivot: f64,
    /// Gershgorin-style condition bound of the accepted system matrix.
    pub condition_bound: f64,
    /// Spectral condition estimate of the undamped base matrix.
    pub spectral_estimate: f64,
    /// Smallest absolute eigenvalue estimate of the base matrix.
    pub eigen_min: f64,
    /// Largest absolute eigenvalue estimate of the base matrix.
    pub eigen_max: f64,
    /// Bitmask of [`warning_flags`].
    pub flags: u32,
    /// Equations dropped by recovery this step.
    pub dropped_this_step: u32,
}

/// Coupled multi-equation constraint between two bodies.
#[derive(Clone, Debug)]
pub struct CoupledConstraint {
    /// First body.
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Anchor in body A's local space.
    pub local_anchor_a: Vec2,
    /// Anchor in body B's local space.
    pub local_anchor_b: Vec2,
    /// Rest separation defining the distance error.
    pub rest_distance: f64,
    /// Rest relative angle defining the angle error.
    pub rest_angle: f64,
    /// Whether conditioning recovery may drop equations.
    pub auto_recover: bool,
    /// Maximum equations recovery may drop per step.
    pub drop_budget: usize,

    equations: [CoupledEquation; MAX_COUPLED_EQUATIONS],
    equation_count: usize,

    // Step-local state, rebuilt by prepare().
    normal: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    rn_a: f64,
    rn_b: f64,
    live: [bool; MAX_COUPLED_EQUATIONS],
    rows: [usize; MAX_COUPLED_EQUATIONS],
    row_count: usize,
    inv_matrix: SmallMat,
    bias: [f64; MAX_COUPLED_EQUATIONS],
    gamma: [f64; MAX_COUPLED_EQUATIONS],
    error: [f64; MAX_COUPLED_EQUATIONS],
    solvable: bool,
    diagnostics: CoupledDiagnostics,
    warn_timer: Option<u64>,
}

impl CoupledConstraint {
    /// Create an empty coupled constraint; add equations with
    /// [`add_equation`](Self::add_equation).
    #[must_use]
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        rest_distance: f64,
        rest_angle: f64,
    ) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            rest_distance,
            rest_angle,
            auto_recover: true,
            drop_budget: MAX_COUPLED_EQUATIONS - 1,
            equations: [CoupledEquation::default(); MAX_COUPLED_EQUATIONS],
            equation_count: 0,
            normal: Vec2::UNIT_X,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            rn_a: 0.0,
            rn_b: 0.0,
            live: [false; MAX_COUPLED_EQUATIONS],
            rows: [0; MAX_COUPLED_EQUATIONS],
            row_count: 0,
            inv_matrix: SmallMat::zero(0),
            bias: [0.0; MAX_COUPLED_EQUATIONS],
            gamma: [0.0; MAX_COUPLED_EQUATIONS],
            error: [0.0; MAX_COUPLED_EQUATIONS],
            solvable: false,
            diagnostics: CoupledDiagnostics::default(),
            warn_timer: None,
        }
    }

    /// Append an equation. Fails once the fixed capacity is reached.
    pub fn add_equation(&mut self, equation: CoupledEquation) -> Result<usize, PhysicsError> {
        if self.equation_count >= MAX_COUPLED_EQUATIONS {
            return Err(PhysicsError::InvalidEquationIndex {
                index: self.equation_count,
                max: MAX_COUPLED_EQUATIONS,
            });
        }
        let index = self.equation_count;
        self.equations[index] = equation;
        self.equation_count += 1;
        Ok(index)
    }

    /// Read an equation.
    pub fn equation(&self, index: usize) -> Result<&CoupledEquation, PhysicsError> {
        if index >= self.equation_count {
            return Err(PhysicsError::InvalidEquationIndex {
                index,
                max: self.equation_count,
            });
        }
        Ok(&self.equations[index])
    }

    /// Enable or disable an equation. Disabling zeroes its impulse so a later
    /// re-enable starts cold.
    pub fn set_equation_active(&mut self, index: usize, active: bool) -> Result<(), PhysicsError> {
        if index >= self.equation_count {
            return Err(PhysicsError::InvalidEquationIndex {
                index,
                max: self.equation_count,
            });
        }
        self.equations[index].active = active;
        if !active {
            self.equations[index].impulse = 0.0;
        }
        Ok(())
    }

    /// Number of configured equations.
    #[inline]
    #[must_use]
    pub fn equation_count(&self) -> usize {
        self.equation_count
    }

    /// Conditioning diagnostics from the most recent prepare.
    #[inline]
    #[must_use]
    pub fn diagnostics(&self) -> &CoupledDiagnostics {
        &self.diagnostics
    }

    /// Assemble the undamped base matrix over the live rows.
    fn base_matrix(&self, mass_linear: f64, mass_angle: f64) -> SmallMat {
        let mut base = SmallMat::zero(self.row_count);
        for r in 0..self.row_count {
            let ei = &self.equations[self.rows[r]];
            for c in 0..self.row_count {
                let ej = &self.equations[self.rows[c]];
                base.m[r][c] = ei.ratio_distance * ej.ratio_distance * mass_linear
                    + ei.ratio_angle * ej.ratio_angle * mass_angle;
            }
        }
        base
    }

    /// System matrix: base plus the per-equation softness diagonal.
    fn system_matrix(&self, base: &SmallMat) -> SmallMat {
        let mut system = *base;
        for r in 0..self.row_count {
            system.m[r][r] += self.gamma[self.rows[r]];
        }
        system
    }

    /// Drop the live equation with the smallest-magnitude system diagonal.
    ///
    /// Documented recovery heuristic: smallest `|diag|` wins, ties to the
    /// lowest equation index. The dropped equation's impulse is zeroed and
    /// its row leaves the system.
    fn drop_weakest(&mut self, system: &SmallMat) -> Option<usize> {
        if self.row_count <= 1 {
            return None;
        }
        let mut weakest_row = 0;
        let mut weakest_diag = f64::INFINITY;
        for r in 0..self.row_count {
            let diag = system.m[r][r].abs();
            if diag < weakest_diag {
                weakest_diag = diag;
                weakest_row = r;
            }
        }
        let eq_index = self.rows[weakest_row];
        self.live[eq_index] = false;
        self.equations[eq_index].impulse = 0.0;
        self.rebuild_rows();
        Some(eq_index)
    }

    fn rebuild_rows(&mut self) {
        self.row_count = 0;
        for i in 0..self.equation_count {
            if self.live[i] {
                self.rows[self.row_count] = i;
                self.row_count += 1;
            }
        }
    }

    fn deactivate_all_for_step(&mut self) {
        for i in 0..self.equation_count {
            if self.live[i] {
                self.equations[i].impulse = 0.0;
            }
            self.live[i] = false;
        }
        self.row_count = 0;
        self.solvable = false;
    }
}

impl ConstraintOps for CoupledConstraint {
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>) {
        self.diagnostics = CoupledDiagnostics::default();
        self.solvable = false;

        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.row_count = 0;
            return;
        };

        // Shared errors, computed once.
        let world_a = a.world_point(self.local_anchor_a);
        let world_b = b.world_point(self.local_anchor_b);
        self.r_a = world_a - a.position;
        self.r_b = world_b - b.position;
        let delta = world_b - world_a;
        let distance = delta.length();
        self.normal = if distance > 0.0 {
            delta / distance
        } else {
            Vec2::UNIT_X
        };
        let c_distance = distance - self.rest_distance;
        let c_angle = b.angle - a.angle - self.rest_angle;

        self.rn_a = self.r_a.cross_scalar(self.normal);
        self.rn_b = self.r_b.cross_scalar(self.normal);
        let mass_linear = a.inv_mass
            + b.inv_mass
            + a.inv_inertia * self.rn_a * self.rn_a
            + b.inv_inertia * self.rn_b * self.rn_b;
        let mass_angle = a.inv_inertia + b.inv_inertia;

        // Step-local activity starts from the user-level flags; recovery may
        // clear entries below.
        for i in 0..self.equation_count {
            self.live[i] = self.equations[i].active;
            self.gamma[i] = if ctx.dt > 0.0 {
                self.equations[i].softness / ctx.dt
            } else {
                0.0
            };
            let eq = &self.equations[i];
            self.error[i] = eq.ratio_distance * c_distance + eq.ratio_angle * c_angle
                - eq.target_offset;
            if !self.live[i] {
                self.equations[i].impulse = 0.0;
            }
        }
        self.rebuild_rows();
        if self.row_count == 0 {
            return;
        }

        // Factor-and-recover loop.
        loop {
            let base = self.base_matrix(mass_linear, mass_angle);
            let system = self.system_matrix(&base);

            match ctx.kkt.invert(&system, PIVOT_EPSILON) {
                Ok((inverse, pivots)) => {
                    let bound = gershgorin_condition_bound(&system);
                    let (eigen_min, eigen_max) = jacobi_eigen_range(&base);
                    let spectral = eigen_max.max(1e-30) / eigen_min.max(1e-30);

                    self.diagnostics.condition_bound = bound;
                    self.diagnostics.spectral_estimate = spectral;
                    self.diagnostics.eigen_min = eigen_min;
                    self.diagnostics.eigen_max = eigen_max;
                    self.diagnostics.min_pivot = pivots.min_pivot;
                    self.diagnostics.max_pivot = pivots.max_pivot;

                    let gershgorin_high = bound > CONDITION_THRESHOLD;
                    let spectral_high = spectral > CONDITION_THRESHOLD;
                    if gershgorin_high || spectral_high {
                        self.diagnostics.flags |= warning_flags::ILL_CONDITIONED;
                        if gershgorin_high {
                            self.diagnostics.flags |= warning_flags::GERSHGORIN_HIGH;
                        }
                        if spectral_high {
                            self.diagnostics.flags |= warning_flags::SPECTRAL_HIGH;
                        }

                        let may_drop = self.auto_recover
                            && (self.diagnostics.dropped_this_step as usize) < self.drop_budget
                            && self.row_count > 1;
                        if may_drop {
                            if let Some(dropped) = self.drop_weakest(&system) {
                                self.diagnostics.dropped_this_step += 1;
                                self.diagnostics.flags |= warning_flags::EQUATION_DROPPED;
                                ctx.warnings.emit(
                                    &mut self.warn_timer,
                                    WarnLevel::Warning,
                                    WarnCategory::Conditioning,
                                    &format!(
                                        "coupled constraint ill-conditioned (bound {bound:.3e}, \
                                         spectral {spectral:.3e}); dropped equation {dropped}"
                                    ),
                                );
                                continue;
                            }
                        }
                        // Accepted as-is: still solvable, but flagged.
                        ctx.warnings.emit(
                            &mut self.warn_timer,
                            WarnLevel::Warning,
                            WarnCategory::Conditioning,
                            &format!(
                                "coupled constraint ill-conditioned (bound {bound:.3e}, \
                                 spectral {spectral:.3e}); no recovery available"
                            ),
                        );
                    }

                    self.inv_matrix = inverse;
                    self.diagnostics.rank = self.row_count;
                    self.solvable = true;
                    break;
                }
                Err(PhysicsError::SingularMatrix { pivot, .. }) => {
                    self.diagnostics.flags |= warning_flags::RANK_DEFICIENT;

                    let may_drop = self.auto_recover
                        && (self.diagnostics.dropped_this_step as usize) < self.drop_budget
                        && self.row_count > 1;
                    if may_drop {
                        if let Some(dropped) = self.drop_weakest(&system) {
                            self.diagnostics.dropped_this_step += 1;
                            self.diagnostics.flags |= warning_flags::EQUATION_DROPPED;
                            ctx.warnings.emit(
                                &mut self.warn_timer,
                                WarnLevel::Warning,
                                WarnCategory::RankDeficient,
                                &format!(
                                    "coupled system rank deficient (pivot {pivot:.3e}); \
                                     dropped equation {dropped}"
                                ),
                            );
                            continue;
                        }
                    }

                    // Recovery dead end: the constraint sits out this step
                    // rather than emitting non-finite impulses.
                    self.deactivate_all_for_step();
                    self.diagnostics.flags |= warning_flags::ALL_DROPPED;
                    self.diagnostics.rank = 0;
                    ctx.warnings.emit(
                        &mut self.warn_timer,
                        WarnLevel::Error,
                        WarnCategory::RankDeficient,
                        "coupled constraint unrecoverable; disabled for this step",
                    );
                    break;
                }
                Err(_) => {
                    self.deactivate_all_for_step();
                    self.diagnostics.flags |= warning_flags::ALL_DROPPED;
                    break;
                }
            }
        }

        self.diagnostics.active_equations = self.row_count;

        // Bias per surviving row; slop is chosen per equation by which error
        // dominates its row.
        for r in 0..self.row_count {
            let i = self.rows[r];
            let eq = &self.equations[i];
            let slop = if eq.ratio_distance.abs() > 0.0 {
                ctx.params.linear_slop
            } else {
                ctx.params.angular_slop
            };
            self.bias[i] = baumgarte_bias(self.error[i], slop, ctx.params.baumgarte, ctx.dt);
        }
    }

    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        if !self.solvable {
            return;
        }
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        let mut lin = 0.0;
        let mut ang = 0.0;
        for r in 0..self.row_count {
            let eq = &mut self.equations[self.rows[r]];
            eq.impulse *= params.warm_start_factor;
            lin += eq.impulse * eq.ratio_distance;
            ang += eq.impulse * eq.ratio_angle;
        }

        let p = self.normal * lin;
        a.velocity -= p * a.inv_mass;
        a.angular_velocity -= a.inv_inertia * (self.rn_a * lin + ang);
        b.velocity += p * b.inv_mass;
        b.angular_velocity += b.inv_inertia * (self.rn_b * lin + ang);
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], dt: f64) {
        if !self.solvable || self.row_count == 0 {
            return;
        }
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        let v_a = a.velocity + Vec2::cross_from_scalar(a.angular_velocity, self.r_a);
        let v_b = b.velocity + Vec2::cross_from_scalar(b.angular_velocity, self.r_b);
        let cdot_distance = (v_b - v_a).dot(self.normal);
        let cdot_angle = b.angular_velocity - a.angular_velocity;

        // Right-hand side over the live rows.
        let mut rhs = [0.0; MAX_DIM];
        let mut cdot = [0.0; MAX_COUPLED_EQUATIONS];
        for r in 0..self.row_count {
            let i = self.rows[r];
            let eq = &self.equations[i];
            cdot[i] = eq.ratio_distance * cdot_distance + eq.ratio_angle * cdot_angle;
            rhs[r] = -(cdot[i] + self.bias[i] + self.gamma[i] * eq.impulse);
        }

        let lambda = self.inv_matrix.mul_vec(&rhs);
        for r in 0..self.row_count {
            if !lambda[r].is_finite() {
                return;
            }
        }

        // Accumulate and collapse into one linear impulse along the shared
        // normal plus one torque.
        let mut lin = 0.0;
        let mut ang = 0.0;
        for r in 0..self.row_count {
            let i = self.rows[r];
            let eq = &mut self.equations[i];
            eq.impulse += lambda[r];
            lin += lambda[r] * eq.ratio_distance;
            ang += lambda[r] * eq.ratio_angle;
        }

        // Optional per-equation springs, independent of the matrix solve.
        for r in 0..self.row_count {
            let i = self.rows[r];
            let eq = &self.equations[i];
            if eq.spring_stiffness > 0.0 || eq.spring_damping > 0.0 {
                let spring =
                    (-eq.spring_stiffness * self.error[i] - eq.spring_damping * cdot[i]) * dt;
                lin += spring * eq.ratio_distance;
                ang += spring * eq.ratio_angle;
            }
        }

        let p = self.normal * lin;
        a.velocity -= p * a.inv_mass;
        a.angular_velocity -= a.inv_inertia * (self.rn_a * lin + ang);
        b.velocity += p * b.inv_mass;
        b.angular_velocity += b.inv_inertia * (self.rn_b * lin + ang);
    }

    fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams) {
        if !self.solvable || self.row_count == 0 {
            return;
        }
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        // Fresh errors from current positions.
        let world_a = a.world_point(self.local_anchor_a);
        let world_b = b.world_point(self.local_anchor_b);
        let delta = world_b - world_a;
        let distance = delta.length();
        let normal = if distance > 0.0 {
            delta / distance
        } else {
            self.normal
        };
        let c_distance = distance - self.rest_distance;
        let c_angle = b.angle - a.angle - self.rest_angle;

        let r_a = world_a - a.position;
        let r_b = world_b - b.position;
        let rn_a = r_a.cross_scalar(normal);
        let rn_b = r_b.cross_scalar(normal);

        let mut rhs = [0.0; MAX_DIM];
        let mut any_error = false;
        let max = params.max_correction;
        for r in 0..self.row_count {
            let eq = &self.equations[self.rows[r]];
            let c = eq.ratio_distance * c_distance + eq.ratio_angle * c_angle
                - eq.target_offset;
            let slop = if eq.ratio_distance.abs() > 0.0 {
                params.linear_slop
            } else {
                params.angular_slop
            };
            if c.abs() > slop {
                any_error = true;
            }
            rhs[r] = -c.clamp(-max, max);
        }
        if !any_error {
            return;
        }

        let lambda = self.inv_matrix.mul_vec(&rhs);
        let mut lin = 0.0;
        let mut ang = 0.0;
        for r in 0..self.row_count {
            if !lambda[r].is_finite() {
                return;
            }
            let eq = &self.equations[self.rows[r]];
            lin += lambda[r] * eq.ratio_distance;
            ang += lambda[r] * eq.ratio_angle;
        }

        let p = normal * lin;
        a.position -= p * a.inv_mass;
        a.angle -= a.inv_inertia * (rn_a * lin + ang);
        b.position += p * b.inv_mass;
        b.angle += b.inv_inertia * (rn_b * lin + ang);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Shape2d;
    use crate::kkt::KktBackend;
    use crate::log::WarningPolicy;
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Bodies whose angular inverse masses sum to 0.5, the reference setup
    /// for a well-scaled single-equation system.
    fn gear_pair() -> Vec<Body> {
        let mut a = Body::new_dynamic(Vec2::ZERO, 1.0, Shape2d::Circle { radius: 1.0 });
        let mut b = Body::new_dynamic(Vec2::new(3.0, 0.0), 1.0, Shape2d::Circle { radius: 1.0 });
        a.set_mass_properties(1.0, 4.0);
        b.set_mass_properties(1.0, 4.0);
        vec![a, b]
    }

    fn prepare(
        constraint: &mut CoupledConstraint,
        bodies: &mut [Body],
        kkt: &mut KktBackend,
        warnings: &WarningPolicy,
    ) {
        let params = SolverParams::default();
        let mut ctx = PrepareContext {
            dt: 1.0 / 60.0,
            params: &params,
            kkt,
            warnings,
        };
        constraint.prepare(bodies, &mut ctx);
    }

    fn pure_gear(bodies_rest_distance: f64) -> CoupledConstraint {
        let mut c = CoupledConstraint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::ZERO,
            Vec2::ZERO,
            bodies_rest_distance,
            0.0,
        );
        c.add_equation(CoupledEquation::angle(1.0)).unwrap();
        c
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut c = pure_gear(3.0);
        for _ in 0..MAX_COUPLED_EQUATIONS - 1 {
            c.add_equation(CoupledEquation::angle(1.0)).unwrap();
        }
        assert!(matches!(
            c.add_equation(CoupledEquation::angle(1.0)),
            Err(PhysicsError::InvalidEquationIndex { .. })
        ));
    }

    #[test]
    fn test_reference_gear_conditioning() {
        // inv_inertia 0.25 each -> system matrix [[0.5]]: both pivots 0.5,
        // condition bound exactly 1.
        let mut bodies = gear_pair();
        let mut c = pure_gear(3.0);
        let mut kkt = KktBackend::new();
        let warnings = WarningPolicy::new();
        prepare(&mut c, &mut bodies, &mut kkt, &warnings);

        let d = c.diagnostics();
        assert_eq!(d.rank, 1);
        assert_relative_eq!(d.min_pivot, 0.5, epsilon = 1e-9);
        assert_relative_eq!(d.max_pivot, 0.5, epsilon = 1e-9);
        assert_relative_eq!(d.condition_bound, 1.0, epsilon = 1e-9);
        assert_eq!(d.flags, 0);
    }

    #[test]
    fn test_near_duplicate_equation_triggers_recovery() {
        let mut bodies = gear_pair();
        let mut c = pure_gear(3.0);
        c.add_equation(CoupledEquation::angle(1.0 + 1e-8)).unwrap();

        let mut kkt = KktBackend::new();
        let warnings = WarningPolicy::new();
        prepare(&mut c, &mut bodies, &mut kkt, &warnings);

        let d = c.diagnostics();
        assert!(
            d.flags & (warning_flags::RANK_DEFICIENT | warning_flags::ILL_CONDITIONED) != 0,
            "flags {:#b}",
            d.flags
        );
        assert!(d.flags & warning_flags::EQUATION_DROPPED != 0);
        assert_eq!(d.dropped_this_step, 1);
        assert_eq!(d.active_equations, 1);
        // The survivor must still solve cleanly.
        assert_relative_eq!(d.condition_bound, 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_drop_disabled_without_auto_recover() {
        let mut bodies = gear_pair();
        let mut c = pure_gear(3.0);
        c.add_equation(CoupledEquation::angle(1.0 + 1e-8)).unwrap();
        c.auto_recover = false;

        let mut kkt = KktBackend::new();
        let warnings = WarningPolicy::new();
        prepare(&mut c, &mut bodies, &mut kkt, &warnings);

        // Rank-deficient and unrecoverable: the constraint sits this step out.
        let d = c.diagnostics();
        assert!(d.flags & warning_flags::ALL_DROPPED != 0);
        assert_eq!(d.active_equations, 0);
        assert_eq!(c.equation(0).unwrap().impulse, 0.0);
    }

    #[test]
    fn test_deactivated_step_resumes_next_prepare() {
        let mut bodies = gear_pair();
        let mut c = pure_gear(3.0);
        c.add_equation(CoupledEquation::angle(1.0 + 1e-8)).unwrap();
        c.auto_recover = false;

        let mut kkt = KktBackend::new();
        let warnings = WarningPolicy::new();
        prepare(&mut c, &mut bodies, &mut kkt, &warnings);
        assert_eq!(c.diagnostics().active_equations, 0);

        // The duplicate disappears; next prepare recovers full rank.
        c.set_equation_active(1, false).unwrap();
        prepare(&mut c, &mut bodies, &mut kkt, &warnings);
        assert_eq!(c.diagnostics().active_equations, 1);
        assert_eq!(c.diagnostics().flags & warning_flags::ALL_DROPPED, 0);
    }

    #[test]
    fn test_weakest_equation_is_dropped_first() {
        // Equation 1 has a much smaller diagonal (tiny ratio); pairing it
        // with a near-duplicate of equation 0 forces a drop, and the
        // documented heuristic picks the smallest |diag|.
        let mut bodies = gear_pair();
        let mut c = pure_gear(3.0);
        c.add_equation(CoupledEquation::angle(1e-9)).unwrap();

        let mut kkt = KktBackend::new();
        let warnings = WarningPolicy::new();
        prepare(&mut c, &mut bodies, &mut kkt, &warnings);

        let d = c.diagnostics();
        assert!(d.dropped_this_step >= 1);
        // Equation 0 (the strong one) survives with its clean conditioning.
        assert_eq!(d.active_equations, 1);
        assert_relative_eq!(d.min_pivot, 0.5, epsilon = 1e-9);
        assert_eq!(c.equation(1).unwrap().impulse, 0.0);
    }

    #[test]
    fn test_gear_velocity_solve_converges() {
        let mut bodies = gear_pair();
        bodies[0].angular_velocity = 2.0;
        let mut c = pure_gear(3.0);

        let params = SolverParams::default();
        let warnings = WarningPolicy::new();
        let mut kkt = KktBackend::new();
        let mut ctx = PrepareContext {
            dt: 1.0 / 60.0,
            params: &params,
            kkt: &mut kkt,
            warnings: &warnings,
        };
        c.prepare(&mut bodies, &mut ctx);
        c.warm_start(&mut bodies, &params);
        for _ in 0..8 {
            c.solve_velocity(&mut bodies, 1.0 / 60.0);
        }

        // Angle-ratio equation drives relative spin to zero.
        let rel = bodies[1].angular_velocity - bodies[0].angular_velocity;
        assert!(rel.abs() < 1e-9, "residual relative spin {rel}");
        assert!(c.equation(0).unwrap().impulse != 0.0);
    }

    #[test]
    fn test_warm_start_idempotent_fixed_point() {
        // With zero external forces, repeated prepare/warm-start/solve cycles
        // must converge the accumulated impulse to a fixed point.
        let mut bodies = gear_pair();
        bodies[0].angular_velocity = 1.0;
        let mut c = pure_gear(3.0);

        let params = SolverParams::default();
        let warnings = WarningPolicy::new();
        let mut kkt = KktBackend::new();

        let mut last_impulse = 0.0;
        let mut last_delta = f64::INFINITY;
        for _ in 0..16 {
            let mut ctx = PrepareContext {
                dt: 1.0 / 60.0,
                params: &params,
                kkt: &mut kkt,
                warnings: &warnings,
            };
            c.prepare(&mut bodies, &mut ctx);
            c.warm_start(&mut bodies, &params);
            for _ in 0..4 {
                c.solve_velocity(&mut bodies, 1.0 / 60.0);
            }
            let impulse = c.equation(0).unwrap().impulse;
            last_delta = (impulse - last_impulse).abs();
            last_impulse = impulse;
        }
        assert!(last_delta < 1e-9, "impulse still moving by {last_delta}");
    }

    #[test]
    fn test_condition_warning_is_rate_limited() {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&count);
        let mut warnings = WarningPolicy::new();
        warnings.set_callback(Arc::new(move |_, _, _| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        warnings.cooldown_steps = 100;

        let mut bodies = gear_pair();
        let mut c = pure_gear(3.0);
        c.add_equation(CoupledEquation::angle(1.0 + 1e-8)).unwrap();

        let mut kkt = KktBackend::new();
        for _ in 0..10 {
            // Recovery re-drops (and would re-warn) every prepare; the
            // cooldown keeps the callback quiet after the first.
            c.equations[1].active = true;
            prepare(&mut c, &mut bodies, &mut kkt, &warnings);
            warnings.advance_step();
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
