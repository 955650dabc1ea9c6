//! Constraint State Machine
//!
//! Every constraint variant implements the same four operations, invoked in
//! fixed order each step:
//!
//! 1. `prepare(dt)` — recompute world-space anchors/axes, effective mass
//!    (including the softness/CFM term), and the Baumgarte bias from the
//!    current positional error beyond slop.
//! 2. `warm_start()` — re-apply last step's accumulated impulse so the
//!    velocity iterations start near the previous solution.
//! 3. `solve_velocity()` — one sequential-impulse correction:
//!    `lambda = -(Cdot + bias + gamma * accumulated) * effective_mass`,
//!    accumulated and applied to both bodies.
//! 4. `solve_position()` — separate impulse-like positional correction,
//!    clamped to a maximum magnitude, with no velocity change.
//!
//! Dispatch is a tagged variant ([`Constraint2d`]); each variant is a value
//! type owning its own state, selected at construction.

use crate::body::{Body, BodyHandle};
use crate::coupled::CoupledConstraint;
use crate::joint::{PrismaticJoint, RevoluteJoint};
use crate::joint_extra::{GearJoint, PlanarJoint};
use crate::kkt::KktBackend;
use crate::log::WarningPolicy;
use crate::math::Vec2;

/// Solver tuning parameters shared by all constraints.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolverParams {
    /// Baumgarte stabilization factor (fraction of positional error fed back
    /// into the velocity bias per step).
    pub baumgarte: f64,
    /// Linear positional error tolerated without correction.
    pub linear_slop: f64,
    /// Angular error tolerated without correction (radians).
    pub angular_slop: f64,
    /// Maximum positional correction applied by one `solve_position` pass.
    pub max_correction: f64,
    /// Scale on re-applied accumulated impulses during warm starting.
    pub warm_start_factor: f64,
    /// Relative normal speed below which restitution is ignored.
    pub restitution_threshold: f64,
    /// Per-constraint tolerance for determinism comparisons; 0 requires
    /// bit-identical results.
    pub determinism_tolerance: f64,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            baumgarte: 0.2,
            linear_slop: 0.005,
            angular_slop: 2.0_f64.to_radians(),
            max_correction: 0.2,
            warm_start_factor: 1.0,
            restitution_threshold: 1.0,
            determinism_tolerance: 0.0,
        }
    }
}

/// Per-step context handed to `prepare`.
///
/// Owns mutable access to the KKT backend (coupled constraints factor their
/// system matrix here) and read access to the warning policy.
pub struct PrepareContext<'a> {
    /// Step length in seconds.
    pub dt: f64,
    /// Shared solver tuning.
    pub params: &'a SolverParams,
    /// Inversion backend for coupled systems.
    pub kkt: &'a mut KktBackend,
    /// Rate-limited warning dispatch.
    pub warnings: &'a WarningPolicy,
}

/// The four-operation interface every constraint variant implements.
pub trait ConstraintOps {
    /// Recompute step-local state (anchors, effective mass, bias) for `dt`.
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>);
    /// Re-apply the previous step's accumulated impulse.
    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams);
    /// One sequential-impulse velocity correction.
    fn solve_velocity(&mut self, bodies: &mut [Body], dt: f64);
    /// One clamped positional correction (no velocity change).
    fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams);
}

/// Tagged-variant constraint, dispatching [`ConstraintOps`] by enum match.
#[derive(Clone, Debug)]
pub enum Constraint2d {
    /// Fixed distance between two anchors.
    Distance(DistanceConstraint),
    /// Distance plus relative-angle lock.
    DistanceAngle(DistanceAngleConstraint),
    /// Damped spring between two anchors (force-based, never hard).
    Spring(SpringConstraint),
    /// Shared-point pin with optional angular motor and limits.
    Revolute(RevoluteJoint),
    /// Translation along one axis with optional linear motor and limits.
    Prismatic(PrismaticJoint),
    /// Point-on-axis (line) constraint with optional linear motor.
    Planar(PlanarJoint),
    /// Fixed ratio between two bodies' angles.
    Gear(GearJoint),
    /// Coupled multi-equation constraint with conditioning recovery.
    Coupled(CoupledConstraint),
}

impl Constraint2d {
    /// Bodies this constraint references, for island clustering.
    #[must_use]
    pub fn body_pair(&self) -> (BodyHandle, BodyHandle) {
        match self {
            Constraint2d::Distance(c) => (c.body_a, c.body_b),
            Constraint2d::DistanceAngle(c) => (c.body_a, c.body_b),
            Constraint2d::Spring(c) => (c.body_a, c.body_b),
            Constraint2d::Revolute(c) => (c.body_a, c.body_b),
            Constraint2d::Prismatic(c) => (c.body_a, c.body_b),
            Constraint2d::Planar(c) => (c.body_a, c.body_b),
            Constraint2d::Gear(c) => (c.body_a, c.body_b),
            Constraint2d::Coupled(c) => (c.body_a, c.body_b),
        }
    }

    /// Read-only view of the coupled engine, for diagnostics accessors.
    #[must_use]
    pub fn as_coupled(&self) -> Option<&CoupledConstraint> {
        match self {
            Constraint2d::Coupled(c) => Some(c),
            _ => None,
        }
    }

    /// Mutable view of the coupled engine.
    pub fn as_coupled_mut(&mut self) -> Option<&mut CoupledConstraint> {
        match self {
            Constraint2d::Coupled(c) => Some(c),
            _ => None,
        }
    }
}

impl ConstraintOps for Constraint2d {
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>) {
        match self {
            Constraint2d::Distance(c) => c.prepare(bodies, ctx),
            Constraint2d::DistanceAngle(c) => c.prepare(bodies, ctx),
            Constraint2d::Spring(c) => c.prepare(bodies, ctx),
            Constraint2d::Revolute(c) => c.prepare(bodies, ctx),
            Constraint2d::Prismatic(c) => c.prepare(bodies, ctx),
            Constraint2d::Planar(c) => c.prepare(bodies, ctx),
            Constraint2d::Gear(c) => c.prepare(bodies, ctx),
            Constraint2d::Coupled(c) => c.prepare(bodies, ctx),
        }
    }

    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        match self {
            Constraint2d::Distance(c) => c.warm_start(bodies, params),
            Constraint2d::DistanceAngle(c) => c.warm_start(bodies, params),
            Constraint2d::Spring(c) => c.warm_start(bodies, params),
            Constraint2d::Revolute(c) => c.warm_start(bodies, params),
            Constraint2d::Prismatic(c) => c.warm_start(bodies, params),
            Constraint2d::Planar(c) => c.warm_start(bodies, params),
            Constraint2d::Gear(c) => c.warm_start(bodies, params),
            Constraint2d::Coupled(c) => c.warm_start(bodies, params),
        }
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], dt: f64) {
        match self {
            Constraint2d::Distance(c) => c.solve_velocity(bodies, dt),
            Constraint2d::DistanceAngle(c) => c.solve_velocity(bodies, dt),
            Constraint2d::Spring(c) => c.solve_velocity(bodies, dt),
            Constraint2d::Revolute(c) => c.solve_velocity(bodies, dt),
            Constraint2d::Prismatic(c) => c.solve_velocity(bodies, dt),
            Constraint2d::Planar(c) => c.solve_velocity(bodies, dt),
            Constraint2d::Gear(c) => c.solve_velocity(bodies, dt),
            Constraint2d::Coupled(c) => c.solve_velocity(bodies, dt),
        }
    }

    fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams) {
        match self {
            Constraint2d::Distance(c) => c.solve_position(bodies, params),
            Constraint2d::DistanceAngle(c) => c.solve_position(bodies, params),
            Constraint2d::Spring(c) => c.solve_position(bodies, params),
            Constraint2d::Revolute(c) => c.solve_position(bodies, params),
            Constraint2d::Prismatic(c) => c.solve_position(bodies, params),
            Constraint2d::Planar(c) => c.solve_position(bodies, params),
            Constraint2d::Gear(c) => c.solve_position(bodies, params),
            Constraint2d::Coupled(c) => c.solve_position(bodies, params),
        }
    }
}

/// Disjoint mutable borrows of two bodies. `None` for out-of-range or equal
/// handles, so solve routines stay safe to call speculatively.
pub(crate) fn two_bodies_mut(
    bodies: &mut [Body],
    a: BodyHandle,
    b: BodyHandle,
) -> Option<(&mut Body, &mut Body)> {
    let (ia, ib) = (a.index(), b.index());
    if ia == ib || ia >= bodies.len() || ib >= bodies.len() {
        return None;
    }
    if ia < ib {
        let (left, right) = bodies.split_at_mut(ib);
        Some((&mut left[ia], &mut right[0]))
    } else {
        let (left, right) = bodies.split_at_mut(ia);
        Some((&mut right[0], &mut left[ib]))
    }
}

/// Baumgarte bias for positional error `c`: error beyond `slop` is corrected
/// at rate `beta / dt`; error inside the slop band is ignored to avoid jitter.
#[inline]
pub(crate) fn baumgarte_bias(c: f64, slop: f64, beta: f64, dt: f64) -> f64 {
    if dt <= 0.0 {
        return 0.0;
    }
    let excess = (c.abs() - slop).max(0.0);
    beta / dt * excess * c.signum()
}

// ============================================================================
// Distance constraint
// ============================================================================

/// Keeps two anchor points at a fixed separation.
#[derive(Clone, Debug)]
pub struct DistanceConstraint {
    /// First body.
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Anchor in body A's local space.
    pub local_anchor_a: Vec2,
    /// Anchor in body B's local space.
    pub local_anchor_b: Vec2,
    /// Target separation.
    pub rest_length: f64,
    /// Softness/CFM term; 0 is perfectly rigid.
    pub softness: f64,
    /// Accumulated impulse, persisted across steps for warm starting.
    pub impulse: f64,

    // Step-local state, rebuilt by prepare().
    normal: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    effective_mass: f64,
    bias: f64,
    gamma: f64,
}

impl DistanceConstraint {
    /// Create a distance constraint at the given rest length.
    #[must_use]
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        rest_length: f64,
    ) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            rest_length,
            softness: 0.0,
            impulse: 0.0,
            normal: Vec2::UNIT_X,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            effective_mass: 0.0,
            bias: 0.0,
            gamma: 0.0,
        }
    }

    /// Set the softness (CFM) term.
    #[must_use]
    pub fn with_softness(mut self, softness: f64) -> Self {
        self.softness = softness;
        self
    }

    /// Accumulated impulse along the constraint normal.
    #[inline]
    #[must_use]
    pub fn accumulated_impulse(&self) -> f64 {
        self.impulse
    }
}

impl ConstraintOps for DistanceConstraint {
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.effective_mass = 0.0;
            return;
        };

        let world_a = a.world_point(self.local_anchor_a);
        let world_b = b.world_point(self.local_anchor_b);
        self.r_a = world_a - a.position;
        self.r_b = world_b - b.position;

        let delta = world_b - world_a;
        let length = delta.length();
        self.normal = if length > 0.0 {
            delta / length
        } else {
            Vec2::UNIT_X
        };

        let rn_a = self.r_a.cross_scalar(self.normal);
        let rn_b = self.r_b.cross_scalar(self.normal);
        let k = a.inv_mass + b.inv_mass
            + a.inv_inertia * rn_a * rn_a
            + b.inv_inertia * rn_b * rn_b;

        self.gamma = if ctx.dt > 0.0 {
            self.softness / ctx.dt
        } else {
            0.0
        };
        let denom = k + self.gamma;
        self.effective_mass = if denom > 0.0 { 1.0 / denom } else { 0.0 };

        let c = length - self.rest_length;
        self.bias = baumgarte_bias(c, ctx.params.linear_slop, ctx.params.baumgarte, ctx.dt);
    }

    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        self.impulse *= params.warm_start_factor;
        let p = self.normal * self.impulse;
        a.apply_impulse_at_point(-p, a.position + self.r_a);
        b.apply_impulse_at_point(p, b.position + self.r_b);
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], _dt: f64) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        let v_a = a.velocity + Vec2::cross_from_scalar(a.angular_velocity, self.r_a);
        let v_b = b.velocity + Vec2::cross_from_scalar(b.angular_velocity, self.r_b);
        let cdot = (v_b - v_a).dot(self.normal);

        let lambda = -self.effective_mass * (cdot + self.bias + self.gamma * self.impulse);
        if !lambda.is_finite() {
            return;
        }
        self.impulse += lambda;

        let p = self.normal * lambda;
        a.apply_impulse_at_point(-p, a.position + self.r_a);
        b.apply_impulse_at_point(p, b.position + self.r_b);
    }

    fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        let world_a = a.world_point(self.local_anchor_a);
        let world_b = b.world_point(self.local_anchor_b);
        let delta = world_b - world_a;
        let length = delta.length();
        if length == 0.0 {
            return;
        }
        let normal = delta / length;
        let c = length - self.rest_length;
        if c.abs() <= params.linear_slop {
            return;
        }

        let r_a = world_a - a.position;
        let r_b = world_b - b.position;
        let rn_a = r_a.cross_scalar(normal);
        let rn_b = r_b.cross_scalar(normal);
        let k = a.inv_mass + b.inv_mass
            + a.inv_inertia * rn_a * rn_a
            + b.inv_inertia * rn_b * rn_b;
        if k <= 0.0 {
            return;
        }

        // Clamp the corrected error, not the raw error, to avoid large pops.
        let correction = c.clamp(-params.max_correction, params.max_correction);
        let lambda = -correction / k;
        let p = normal * lambda;

        a.position -= p * a.inv_mass;
        a.angle -= rn_a * lambda * a.inv_inertia;
        b.position += p * b.inv_mass;
        b.angle += rn_b * lambda * b.inv_inertia;
    }
}

// ============================================================================
// Distance + angle constraint
// ============================================================================

/// Distance constraint plus a relative-angle lock, solved as two sequential
/// scalar rows with independent accumulated impulses.
#[derive(Clone, Debug)]
pub struct DistanceAngleConstraint {
    /// First body.
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Distance part.
    pub distance: DistanceConstraint,
    /// Relative angle held between the bodies.
    pub rest_angle: f64,
    /// Accumulated angular impulse.
    pub angular_impulse: f64,

    angular_mass: f64,
    angular_bias: f64,
}

impl DistanceAngleConstraint {
    /// Create a distance+angle constraint.
    #[must_use]
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        rest_length: f64,
        rest_angle: f64,
    ) -> Self {
        Self {
            body_a,
            body_b,
            distance: DistanceConstraint::new(
                body_a,
                body_b,
                local_anchor_a,
                local_anchor_b,
                rest_length,
            ),
            rest_angle,
            angular_impulse: 0.0,
            angular_mass: 0.0,
            angular_bias: 0.0,
        }
    }
}

impl ConstraintOps for DistanceAngleConstraint {
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>) {
        self.distance.prepare(bodies, ctx);

        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.angular_mass = 0.0;
            return;
        };
        let k = a.inv_inertia + b.inv_inertia;
        self.angular_mass = if k > 0.0 { 1.0 / k } else { 0.0 };

        let c = b.angle - a.angle - self.rest_angle;
        self.angular_bias =
            baumgarte_bias(c, ctx.params.angular_slop, ctx.params.baumgarte, ctx.dt);
    }

    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        self.distance.warm_start(bodies, params);

        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        self.angular_impulse *= params.warm_start_factor;
        a.apply_angular_impulse(-self.angular_impulse);
        b.apply_angular_impulse(self.angular_impulse);
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], dt: f64) {
        self.distance.solve_velocity(bodies, dt);

        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        let cdot = b.angular_velocity - a.angular_velocity;
        let lambda = -self.angular_mass * (cdot + self.angular_bias);
        if !lambda.is_finite() {
            return;
        }
        self.angular_impulse += lambda;
        a.apply_angular_impulse(-lambda);
        b.apply_angular_impulse(lambda);
    }

    fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams) {
        self.distance.solve_position(bodies, params);

        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        let c = b.angle - a.angle - self.rest_angle;
        if c.abs() <= params.angular_slop {
            return;
        }
        let k = a.inv_inertia + b.inv_inertia;
        if k <= 0.0 {
            return;
        }
        let correction = c.clamp(-params.max_correction, params.max_correction);
        let lambda = -correction / k;
        a.angle -= lambda * a.inv_inertia;
        b.angle += lambda * b.inv_inertia;
    }
}

// ============================================================================
// Spring constraint
// ============================================================================

/// Damped spring between two anchors. Force-based: it applies
/// `(-stiffness * C - damping * Cdot) * dt` each velocity iteration and never
/// performs positional correction, so it cannot fight the hard constraints.
#[derive(Clone, Debug)]
pub struct SpringConstraint {
    /// First body.
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Anchor in body A's local space.
    pub local_anchor_a: Vec2,
    /// Anchor in body B's local space.
    pub local_anchor_b: Vec2,
    /// Natural length.
    pub rest_length: f64,
    /// Spring stiffness (N/m).
    pub stiffness: f64,
    /// Damping coefficient (N·s/m).
    pub damping: f64,
    /// Accumulated impulse, for observability only.
    pub impulse: f64,

    normal: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    deflection: f64,
}

impl SpringConstraint {
    /// Create a damped spring.
    #[must_use]
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        rest_length: f64,
        stiffness: f64,
        damping: f64,
    ) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            rest_length,
            stiffness,
            damping,
            impulse: 0.0,
            normal: Vec2::UNIT_X,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            deflection: 0.0,
        }
    }
}

impl ConstraintOps for SpringConstraint {
    fn prepare(&mut self, bodies: &mut [Body], _ctx: &mut PrepareContext<'_>) {
        self.impulse = 0.0;
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.deflection = 0.0;
            return;
        };
        let world_a = a.world_point(self.local_anchor_a);
        let world_b = b.world_point(self.local_anchor_b);
        self.r_a = world_a - a.position;
        self.r_b = world_b - b.position;

        let delta = world_b - world_a;
        let length = delta.length();
        self.normal = if length > 0.0 {
            delta / length
        } else {
            Vec2::UNIT_X
        };
        self.deflection = length - self.rest_length;
    }

    fn warm_start(&mut self, _bodies: &mut [Body], _params: &SolverParams) {
        // Spring impulses are recomputed from deflection each step; carrying
        // them over would double-apply the force.
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], dt: f64) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        let v_a = a.velocity + Vec2::cross_from_scalar(a.angular_velocity, self.r_a);
        let v_b = b.velocity + Vec2::cross_from_scalar(b.angular_velocity, self.r_b);
        let cdot = (v_b - v_a).dot(self.normal);

        let lambda = (-self.stiffness * self.deflection - self.damping * cdot) * dt;
        if !lambda.is_finite() {
            return;
        }
        self.impulse += lambda;

        let p = self.normal * lambda;
        a.apply_impulse_at_point(-p, a.position + self.r_a);
        b.apply_impulse_at_point(p, b.position + self.r_b);
    }

    fn solve_position(&mut self, _bodies: &mut [Body], _params: &SolverParams) {
        // Springs are velocity-level only.
    }
}
