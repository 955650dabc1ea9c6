//! Planar and Gear Joints
//!
//! Secondary joint catalogue. The planar joint is a point-on-line constraint
//! (one perpendicular row, rotation left free) with an optional linear motor;
//! the gear joint ties two bodies' angles together through a fixed ratio.

use crate::body::{Body, BodyHandle};
use crate::constraint::{
    baumgarte_bias, two_bodies_mut, ConstraintOps, PrepareContext, SolverParams,
};
use crate::math::Vec2;

// ============================================================================
// Planar joint
// ============================================================================

/// Constrains body B's anchor onto a line fixed in body A (through A's anchor
/// along `local_axis_a`). Rotation stays free; an optional motor drives
/// translation along the line.
#[derive(Clone, Debug)]
pub struct PlanarJoint {
    /// First body (carries the line).
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Anchor in body A's local space.
    pub local_anchor_a: Vec2,
    /// Anchor in body B's local space.
    pub local_anchor_b: Vec2,
    /// Line direction in body A's local space (unit length).
    pub local_axis_a: Vec2,

    /// Motor enabled flag.
    pub enable_motor: bool,
    /// Target translation speed along the line.
    pub motor_speed: f64,
    /// Maximum motor force.
    pub max_motor_force: f64,

    /// Accumulated perpendicular impulse.
    pub impulse: f64,
    /// Accumulated motor impulse.
    pub motor_impulse: f64,

    // Step-local state.
    axis: Vec2,
    perp: Vec2,
    s1: f64,
    s2: f64,
    a1: f64,
    a2: f64,
    perp_mass: f64,
    axial_mass: f64,
    bias: f64,
}

impl PlanarJoint {
    /// Create a planar joint along `local_axis_a`.
    #[must_use]
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
        local_axis_a: Vec2,
    ) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            local_axis_a: local_axis_a.normalize(),
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_force: 0.0,
            impulse: 0.0,
            motor_impulse: 0.0,
            axis: Vec2::UNIT_X,
            perp: Vec2::UNIT_Y,
            s1: 0.0,
            s2: 0.0,
            a1: 0.0,
            a2: 0.0,
            perp_mass: 0.0,
            axial_mass: 0.0,
            bias: 0.0,
        }
    }

    /// Configure the linear motor.
    #[must_use]
    pub fn with_motor(mut self, speed: f64, max_force: f64) -> Self {
        self.enable_motor = true;
        self.motor_speed = speed;
        self.max_motor_force = max_force;
        self
    }
}

impl ConstraintOps for PlanarJoint {
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.perp_mass = 0.0;
            self.axial_mass = 0.0;
            return;
        };

        let r_a = self.local_anchor_a.rotate(a.angle);
        let r_b = self.local_anchor_b.rotate(b.angle);
        let d = (b.position + r_b) - (a.position + r_a);

        self.axis = self.local_axis_a.rotate(a.angle);
        self.perp = self.axis.perpendicular();
        self.s1 = (d + r_a).cross_scalar(self.perp);
        self.s2 = r_b.cross_scalar(self.perp);
        self.a1 = (d + r_a).cross_scalar(self.axis);
        self.a2 = r_b.cross_scalar(self.axis);

        let (m_a, m_b) = (a.inv_mass, b.inv_mass);
        let (i_a, i_b) = (a.inv_inertia, b.inv_inertia);

        let k_perp = m_a + m_b + i_a * self.s1 * self.s1 + i_b * self.s2 * self.s2;
        self.perp_mass = if k_perp > 0.0 { 1.0 / k_perp } else { 0.0 };

        let k_axial = m_a + m_b + i_a * self.a1 * self.a1 + i_b * self.a2 * self.a2;
        self.axial_mass = if k_axial > 0.0 { 1.0 / k_axial } else { 0.0 };

        let c = self.perp.dot(d);
        self.bias = baumgarte_bias(c, ctx.params.linear_slop, ctx.params.baumgarte, ctx.dt);

        if !self.enable_motor {
            self.motor_impulse = 0.0;
        }
    }

    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        self.impulse *= params.warm_start_factor;
        self.motor_impulse *= params.warm_start_factor;

        let p = self.perp * self.impulse + self.axis * self.motor_impulse;
        let l_a = self.impulse * self.s1 + self.motor_impulse * self.a1;
        let l_b = self.impulse * self.s2 + self.motor_impulse * self.a2;

        a.velocity -= p * a.inv_mass;
        a.angular_velocity -= a.inv_inertia * l_a;
        b.velocity += p * b.inv_mass;
        b.angular_velocity += b.inv_inertia * l_b;
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], dt: f64) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        if self.enable_motor {
            let cdot = self.axis.dot(b.velocity - a.velocity)
                + self.a2 * b.angular_velocity
                - self.a1 * a.angular_velocity
                - self.motor_speed;
            let lambda = -self.axial_mass * cdot;
            let max_impulse = self.max_motor_force * dt;
            let old = self.motor_impulse;
            self.motor_impulse = (old + lambda).clamp(-max_impulse, max_impulse);
            let applied = self.motor_impulse - old;

            let p = self.axis * applied;
            a.velocity -= p * a.inv_mass;
            a.angular_velocity -= a.inv_inertia * applied * self.a1;
            b.velocity += p * b.inv_mass;
            b.angular_velocity += b.inv_inertia * applied * self.a2;
        }

        let cdot = self.perp.dot(b.velocity - a.velocity)
            + self.s2 * b.angular_velocity
            - self.s1 * a.angular_velocity;
        let lambda = -self.perp_mass * (cdot + self.bias);
        if !lambda.is_finite() {
            return;
        }
        self.impulse += lambda;

        let p = self.perp * lambda;
        a.velocity -= p * a.inv_mass;
        a.angular_velocity -= a.inv_inertia * lambda * self.s1;
        b.velocity += p * b.inv_mass;
        b.angular_velocity += b.inv_inertia * lambda * self.s2;
    }

    fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        let r_a = self.local_anchor_a.rotate(a.angle);
        let r_b = self.local_anchor_b.rotate(b.angle);
        let d = (b.position + r_b) - (a.position + r_a);
        let axis = self.local_axis_a.rotate(a.angle);
        let perp = axis.perpendicular();

        let c = perp.dot(d);
        if c.abs() <= params.linear_slop {
            return;
        }

        let s1 = (d + r_a).cross_scalar(perp);
        let s2 = r_b.cross_scalar(perp);
        let k = a.inv_mass + b.inv_mass
            + a.inv_inertia * s1 * s1
            + b.inv_inertia * s2 * s2;
        if k <= 0.0 {
            return;
        }

        let correction = c.clamp(-params.max_correction, params.max_correction);
        let lambda = -correction / k;
        let p = perp * lambda;

        a.position -= p * a.inv_mass;
        a.angle -= a.inv_inertia * lambda * s1;
        b.position += p * b.inv_mass;
        b.angle += b.inv_inertia * lambda * s2;
    }
}

// ============================================================================
// Gear joint
// ============================================================================

/// Ties two bodies' angles through a fixed ratio:
/// `C = (angle_a - ref_a) + ratio * (angle_b - ref_b)`.
#[derive(Clone, Debug)]
pub struct GearJoint {
    /// First body.
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Gear ratio applied to body B's angle.
    pub ratio: f64,
    /// Body A's angle at rest.
    pub reference_angle_a: f64,
    /// Body B's angle at rest.
    pub reference_angle_b: f64,
    /// Accumulated impulse.
    pub impulse: f64,

    effective_mass: f64,
    bias: f64,
}

impl GearJoint {
    /// Create a gear joint with the given ratio.
    #[must_use]
    pub fn new(body_a: BodyHandle, body_b: BodyHandle, ratio: f64) -> Self {
        Self {
            body_a,
            body_b,
            ratio,
            reference_angle_a: 0.0,
            reference_angle_b: 0.0,
            impulse: 0.0,
            effective_mass: 0.0,
            bias: 0.0,
        }
    }

    fn gear_error(&self, a: &Body, b: &Body) -> f64 {
        (a.angle - self.reference_angle_a) + self.ratio * (b.angle - self.reference_angle_b)
    }
}

impl ConstraintOps for GearJoint {
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.effective_mass = 0.0;
            return;
        };

        // J = [1, ratio] on the angular velocities.
        let k = a.inv_inertia + self.ratio * self.ratio * b.inv_inertia;
        self.effective_mass = if k > 0.0 { 1.0 / k } else { 0.0 };

        let c = self.gear_error(a, b);
        self.bias = baumgarte_bias(c, ctx.params.angular_slop, ctx.params.baumgarte, ctx.dt);
    }

    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        self.impulse *= params.warm_start_factor;
        a.apply_angular_impulse(self.impulse);
        b.apply_angular_impulse(self.ratio * self.impulse);
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], _dt: f64) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        let cdot = a.angular_velocity + self.ratio * b.angular_velocity;
        let lambda = -self.effective_mass * (cdot + self.bias);
        if !lambda.is_finite() {
            return;
        }
        self.impulse += lambda;
        a.apply_angular_impulse(lambda);
        b.apply_angular_impulse(self.ratio * lambda);
    }

    fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        let c = self.gear_error(a, b);
        if c.abs() <= params.angular_slop {
            return;
        }
        let k = a.inv_inertia + self.ratio * self.ratio * b.inv_inertia;
        if k <= 0.0 {
            return;
        }
        let correction = c.clamp(-params.max_correction, params.max_correction);
        let lambda = -correction / k;
        a.angle += lambda * a.inv_inertia;
        b.angle += self.ratio * lambda * b.inv_inertia;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Shape2d;
    use crate::kkt::KktBackend;
    use crate::log::WarningPolicy;
    use approx::assert_relative_eq;

    fn ball(x: f64, y: f64) -> Body {
        Body::new_dynamic(Vec2::new(x, y), 1.0, Shape2d::Circle { radius: 0.5 })
    }

    fn step(bodies: &mut [Body], joint: &mut impl ConstraintOps, dt: f64, iters: usize) {
        let params = SolverParams::default();
        let warnings = WarningPolicy::new();
        let mut kkt = KktBackend::new();
        let mut ctx = PrepareContext {
            dt,
            params: &params,
            kkt: &mut kkt,
            warnings: &warnings,
        };
        joint.prepare(bodies, &mut ctx);
        joint.warm_start(bodies, &params);
        for _ in 0..iters {
            joint.solve_velocity(bodies, dt);
        }
        for _ in 0..iters {
            joint.solve_position(bodies, &params);
        }
    }

    #[test]
    fn test_planar_removes_off_line_velocity_keeps_spin() {
        let mut bodies = vec![
            Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
            ball(2.0, 0.0),
        ];
        bodies[1].velocity = Vec2::new(1.0, 2.0);
        bodies[1].angular_velocity = 3.0;

        let mut joint = PlanarJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::ZERO,
            Vec2::ZERO,
            Vec2::UNIT_X,
        );
        step(&mut bodies, &mut joint, 1.0 / 60.0, 8);

        assert!(bodies[1].velocity.y.abs() < 1e-8);
        assert_relative_eq!(bodies[1].velocity.x, 1.0, epsilon = 1e-8);
        // Rotation is unconstrained.
        assert_relative_eq!(bodies[1].angular_velocity, 3.0, epsilon = 1e-8);
    }

    #[test]
    fn test_planar_motor_budget() {
        let mut bodies = vec![
            Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
            ball(0.0, 0.0),
        ];
        let max_force = 0.25;
        let mut joint = PlanarJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::ZERO,
            Vec2::ZERO,
            Vec2::UNIT_X,
        )
        .with_motor(100.0, max_force);

        let dt = 1.0 / 60.0;
        step(&mut bodies, &mut joint, dt, 8);
        assert!(joint.motor_impulse.abs() <= max_force * dt + 1e-12);
    }

    #[test]
    fn test_gear_couples_spins_by_ratio() {
        let mut bodies = vec![ball(0.0, 0.0), ball(3.0, 0.0)];
        bodies[0].angular_velocity = 2.0;

        let ratio = 2.0;
        let mut joint = GearJoint::new(BodyHandle(0), BodyHandle(1), ratio);
        step(&mut bodies, &mut joint, 1.0 / 60.0, 16);

        // Gear velocity constraint: w_a + ratio * w_b -> 0.
        let cdot = bodies[0].angular_velocity + ratio * bodies[1].angular_velocity;
        assert!(cdot.abs() < 1e-9, "gear velocity residual {cdot}");
    }

    #[test]
    fn test_gear_with_static_partner_is_inert() {
        let mut bodies = vec![
            Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
            Body::new_static(Vec2::new(1.0, 0.0), Shape2d::Circle { radius: 0.5 }),
        ];
        let mut joint = GearJoint::new(BodyHandle(0), BodyHandle(1), 1.0);
        step(&mut bodies, &mut joint, 1.0 / 60.0, 4);
        assert_eq!(joint.impulse, 0.0);
    }
}
