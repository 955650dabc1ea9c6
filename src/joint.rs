//! Revolute and Prismatic Joints
//!
//! The two workhorse joints. Both follow the shared constraint state machine
//! and both drive their motors and limits through the same accumulate-and-
//! clamp pattern: each motor/limit owns an accumulated impulse bounded by
//! `max_force * dt` (or `max_torque * dt`), and that impulse resets to zero
//! whenever the motor/limit is disabled so re-enabling starts cold.

use crate::body::{Body, BodyHandle};
use crate::constraint::{
    baumgarte_bias, two_bodies_mut, ConstraintOps, PrepareContext, SolverParams,
};
use crate::linalg::{invert_2x2, SmallMat};
use crate::math::Vec2;

/// Pivot epsilon for the 2×2 joint systems.
const JOINT_PIVOT_EPS: f64 = 1e-12;

// ============================================================================
// Revolute joint
// ============================================================================

/// Pins two bodies to a shared point; optionally drives their relative angle
/// with a motor and clamps it between limits.
#[derive(Clone, Debug)]
pub struct RevoluteJoint {
    /// First body.
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Anchor in body A's local space.
    pub local_anchor_a: Vec2,
    /// Anchor in body B's local space.
    pub local_anchor_b: Vec2,
    /// Relative angle treated as zero.
    pub reference_angle: f64,

    /// Motor enabled flag.
    pub enable_motor: bool,
    /// Target relative angular velocity.
    pub motor_speed: f64,
    /// Maximum motor torque.
    pub max_motor_torque: f64,

    /// Limit enabled flag.
    pub enable_limit: bool,
    /// Lower relative-angle bound.
    pub lower_angle: f64,
    /// Upper relative-angle bound.
    pub upper_angle: f64,

    /// Accumulated point impulse.
    pub impulse: Vec2,
    /// Accumulated motor impulse.
    pub motor_impulse: f64,
    /// Accumulated limit impulse.
    pub limit_impulse: f64,

    // Step-local state.
    r_a: Vec2,
    r_b: Vec2,
    point_mass: SmallMat,
    point_bias: Vec2,
    axial_mass: f64,
    limit_state: LimitState,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LimitState {
    Inactive,
    AtLower,
    AtUpper,
}

impl RevoluteJoint {
    /// Create a revolute joint pinning the two local anchors together.
    #[must_use]
    pub fn new(
        body_a: BodyHandle,
        body_b: BodyHandle,
        local_anchor_a: Vec2,
        local_anchor_b: Vec2,
    ) -> Self {
        Self {
            body_a,
            body_b,
            local_anchor_a,
            local_anchor_b,
            reference_angle: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_torque: 0.0,
            enable_limit: false,
            lower_angle: 0.0,
            upper_angle: 0.0,
            impulse: Vec2::ZERO,
            motor_impulse: 0.0,
            limit_impulse: 0.0,
            r_a: Vec2::ZERO,
            r_b: Vec2::ZERO,
            point_mass: SmallMat::zero(2),
            point_bias: Vec2::ZERO,
            axial_mass: 0.0,
            limit_state: LimitState::Inactive,
        }
    }

    /// Configure the angular motor.
    #[must_use]
    pub fn with_motor(mut self, speed: f64, max_torque: f64) -> Self {
        self.enable_motor = true;
        self.motor_speed = speed;
        self.max_motor_torque = max_torque;
        self
    }

    /// Configure the angle limits.
    #[must_use]
    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.enable_limit = true;
        self.lower_angle = lower;
        self.upper_angle = upper;
        self
    }

    /// Relative joint angle.
    fn joint_angle(a: &Body, b: &Body, reference: f64) -> f64 {
        b.angle - a.angle - reference
    }
}

impl ConstraintOps for RevoluteJoint {
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.point_mass = SmallMat::zero(2);
            self.axial_mass = 0.0;
            return;
        };

        self.r_a = self.local_anchor_a.rotate(a.angle);
        self.r_b = self.local_anchor_b.rotate(b.angle);

        // 2x2 effective mass of the point constraint.
        let (m_a, m_b) = (a.inv_mass, b.inv_mass);
        let (i_a, i_b) = (a.inv_inertia, b.inv_inertia);
        let mut k = SmallMat::zero(2);
        k.m[0][0] = m_a + m_b + i_a * self.r_a.y * self.r_a.y + i_b * self.r_b.y * self.r_b.y;
        k.m[0][1] = -i_a * self.r_a.x * self.r_a.y - i_b * self.r_b.x * self.r_b.y;
        k.m[1][0] = k.m[0][1];
        k.m[1][1] = m_a + m_b + i_a * self.r_a.x * self.r_a.x + i_b * self.r_b.x * self.r_b.x;
        self.point_mass = match invert_2x2(&k, JOINT_PIVOT_EPS) {
            Ok((inv, _)) => inv,
            Err(_) => SmallMat::zero(2),
        };

        let c = (b.position + self.r_b) - (a.position + self.r_a);
        self.point_bias = Vec2::new(
            baumgarte_bias(c.x, ctx.params.linear_slop, ctx.params.baumgarte, ctx.dt),
            baumgarte_bias(c.y, ctx.params.linear_slop, ctx.params.baumgarte, ctx.dt),
        );

        let k_axial = i_a + i_b;
        self.axial_mass = if k_axial > 0.0 { 1.0 / k_axial } else { 0.0 };

        // Limit activation; leaving a limit zeroes its impulse state.
        self.limit_state = if self.enable_limit {
            let angle = Self::joint_angle(a, b, self.reference_angle);
            if angle <= self.lower_angle {
                LimitState::AtLower
            } else if angle >= self.upper_angle {
                LimitState::AtUpper
            } else {
                LimitState::Inactive
            }
        } else {
            LimitState::Inactive
        };
        if self.limit_state == LimitState::Inactive {
            self.limit_impulse = 0.0;
        }
        if !self.enable_motor {
            self.motor_impulse = 0.0;
        }
    }

    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        self.impulse = self.impulse * params.warm_start_factor;
        self.motor_impulse *= params.warm_start_factor;
        self.limit_impulse *= params.warm_start_factor;

        let axial = self.motor_impulse + self.limit_impulse;
        a.velocity -= self.impulse * a.inv_mass;
        a.angular_velocity -= a.inv_inertia * (self.r_a.cross_scalar(self.impulse) + axial);
        b.velocity += self.impulse * b.inv_mass;
        b.angular_velocity += b.inv_inertia * (self.r_b.cross_scalar(self.impulse) + axial);
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], dt: f64) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        // Motor: accumulate, then clamp the total to the torque budget.
        if self.enable_motor {
            let cdot = b.angular_velocity - a.angular_velocity - self.motor_speed;
            let lambda = -self.axial_mass * cdot;
            let max_impulse = self.max_motor_torque * dt;
            let old = self.motor_impulse;
            self.motor_impulse = (old + lambda).clamp(-max_impulse, max_impulse);
            let applied = self.motor_impulse - old;
            a.apply_angular_impulse(-applied);
            b.apply_angular_impulse(applied);
        }

        // Limit: one-sided accumulate/clamp depending on which bound is hit.
        if self.limit_state != LimitState::Inactive {
            let cdot = b.angular_velocity - a.angular_velocity;
            let lambda = -self.axial_mass * cdot;
            let old = self.limit_impulse;
            self.limit_impulse = match self.limit_state {
                LimitState::AtLower => (old + lambda).max(0.0),
                LimitState::AtUpper => (old + lambda).min(0.0),
                LimitState::Inactive => unreachable!(),
            };
            let applied = self.limit_impulse - old;
            a.apply_angular_impulse(-applied);
            b.apply_angular_impulse(applied);
        }

        // Point constraint.
        let v_a = a.velocity + Vec2::cross_from_scalar(a.angular_velocity, self.r_a);
        let v_b = b.velocity + Vec2::cross_from_scalar(b.angular_velocity, self.r_b);
        let cdot = v_b - v_a + self.point_bias;

        let rhs = [-cdot.x, -cdot.y, 0.0, 0.0];
        let solved = self.point_mass.mul_vec(&rhs);
        let lambda = Vec2::new(solved[0], solved[1]);
        if !lambda.is_finite() {
            return;
        }
        self.impulse += lambda;

        a.velocity -= lambda * a.inv_mass;
        a.angular_velocity -= a.inv_inertia * self.r_a.cross_scalar(lambda);
        b.velocity += lambda * b.inv_mass;
        b.angular_velocity += b.inv_inertia * self.r_b.cross_scalar(lambda);
    }

    fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        let r_a = self.local_anchor_a.rotate(a.angle);
        let r_b = self.local_anchor_b.rotate(b.angle);
        let c = (b.position + r_b) - (a.position + r_a);
        let error = c.length();
        if error <= params.linear_slop {
            return;
        }

        // Clamp the correction magnitude, preserving direction.
        let scale = (params.max_correction / error).min(1.0);
        let target = c * scale;

        let (m_a, m_b) = (a.inv_mass, b.inv_mass);
        let (i_a, i_b) = (a.inv_inertia, b.inv_inertia);
        let mut k = SmallMat::zero(2);
        k.m[0][0] = m_a + m_b + i_a * r_a.y * r_a.y + i_b * r_b.y * r_b.y;
        k.m[0][1] = -i_a * r_a.x * r_a.y - i_b * r_b.x * r_b.y;
        k.m[1][0] = k.m[0][1];
        k.m[1][1] = m_a + m_b + i_a * r_a.x * r_a.x + i_b * r_b.x * r_b.x;
        let Ok((inv, _)) = invert_2x2(&k, JOINT_PIVOT_EPS) else {
            return;
        };

        let rhs = [-target.x, -target.y, 0.0, 0.0];
        let solved = inv.mul_vec(&rhs);
        let lambda = Vec2::new(solved[0], solved[1]);

        a.position -= lambda * m_a;
        a.angle -= i_a * r_a.cross_scalar(lambda);
        b.position += lambda * m_b;
        b.angle += i_b * r_b.cross_scalar(lambda);
    }
}

// ============================================================================
// Prismatic joint
// ============================================================================

/// Constrains body B to translate along an axis fixed in body A, locking the
/// relative angle; optionally drives translation with a linear motor and
/// clamps it between limits.
#[derive(Clone, Debug)]
pub struct PrismaticJoint {
    /// First body.
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Anchor in body A's local space.
    pub local_anchor_a: Vec2,
    /// Anchor in body B's local space.
    pub local_anchor_b: Vec2,
    /// Slide axis in body A's local space (unit length).
    pub local_axis_a: Vec2,
    /// Relative angle treated as zero.
    pub reference_angle: f64,

    /// Motor enabled flag.
    pub enable_motor: bool,
    /// Target translation speed along the axis.
    pub motor_speed: f64,
    /// Maximum motor force.
    pub max_motor_force: f64,

    /// Limit enabled flag.
    pub enable_limit: bool,
    /// Lower translation bound.
    pub lower_translation: f64,
    /// Upper translation bound.
    pub upper_translation: f64,

    /// Accumulated (perpendicular, angular) impulse.
    pub impulse: Vec2,
    /// Accumulated motor impulse.
    pub motor_impulse: f64,
    /// Accumulated limit impulse.
    pub limit_impulse: f64,

    // Step-local state.
    axis: Vec2,
    perp: Vec2,
    s1: f64,
    s2: f64,
    a1: f64,
    a2: f64,
    constraint_mass: SmallMat,
    bias: Vec2,
    axial_mass: f64,
    limit_state: LimitState,
}

impl PrismaticJoint {
    /// Create a prismatic joint sliding along `local_axis_a`.
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
            reference_angle: 0.0,
            enable_motor: false,
            motor_speed: 0.0,
            max_motor_force: 0.0,
            enable_limit: false,
            lower_translation: 0.0,
            upper_translation: 0.0,
            impulse: Vec2::ZERO,
            motor_impulse: 0.0,
            limit_impulse: 0.0,
            axis: Vec2::UNIT_X,
            perp: Vec2::UNIT_Y,
            s1: 0.0,
            s2: 0.0,
            a1: 0.0,
            a2: 0.0,
            constraint_mass: SmallMat::zero(2),
            bias: Vec2::ZERO,
            axial_mass: 0.0,
            limit_state: LimitState::Inactive,
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

    /// Configure the translation limits.
    #[must_use]
    pub fn with_limits(mut self, lower: f64, upper: f64) -> Self {
        self.enable_limit = true;
        self.lower_translation = lower;
        self.upper_translation = upper;
        self
    }
}

impl ConstraintOps for PrismaticJoint {
    fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.constraint_mass = SmallMat::zero(2);
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

        let mut k = SmallMat::zero(2);
        k.m[0][0] = m_a + m_b + i_a * self.s1 * self.s1 + i_b * self.s2 * self.s2;
        k.m[0][1] = i_a * self.s1 + i_b * self.s2;
        k.m[1][0] = k.m[0][1];
        k.m[1][1] = i_a + i_b;
        if k.m[1][1] == 0.0 {
            // Both bodies spin-locked; the angular row degenerates.
            k.m[1][1] = 1.0;
        }
        self.constraint_mass = match invert_2x2(&k, JOINT_PIVOT_EPS) {
            Ok((inv, _)) => inv,
            Err(_) => SmallMat::zero(2),
        };

        let c_perp = self.perp.dot(d);
        let c_angle = b.angle - a.angle - self.reference_angle;
        self.bias = Vec2::new(
            baumgarte_bias(c_perp, ctx.params.linear_slop, ctx.params.baumgarte, ctx.dt),
            baumgarte_bias(c_angle, ctx.params.angular_slop, ctx.params.baumgarte, ctx.dt),
        );

        let k_axial = m_a + m_b + i_a * self.a1 * self.a1 + i_b * self.a2 * self.a2;
        self.axial_mass = if k_axial > 0.0 { 1.0 / k_axial } else { 0.0 };

        self.limit_state = if self.enable_limit {
            let translation = self.axis.dot(d);
            if translation <= self.lower_translation {
                LimitState::AtLower
            } else if translation >= self.upper_translation {
                LimitState::AtUpper
            } else {
                LimitState::Inactive
            }
        } else {
            LimitState::Inactive
        };
        if self.limit_state == LimitState::Inactive {
            self.limit_impulse = 0.0;
        }
        if !self.enable_motor {
            self.motor_impulse = 0.0;
        }
    }

    fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        self.impulse = self.impulse * params.warm_start_factor;
        self.motor_impulse *= params.warm_start_factor;
        self.limit_impulse *= params.warm_start_factor;

        let axial = self.motor_impulse + self.limit_impulse;
        let p = self.perp * self.impulse.x + self.axis * axial;
        let l_a = self.impulse.x * self.s1 + self.impulse.y + axial * self.a1;
        let l_b = self.impulse.x * self.s2 + self.impulse.y + axial * self.a2;

        a.velocity -= p * a.inv_mass;
        a.angular_velocity -= a.inv_inertia * l_a;
        b.velocity += p * b.inv_mass;
        b.angular_velocity += b.inv_inertia * l_b;
    }

    fn solve_velocity(&mut self, bodies: &mut [Body], dt: f64) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };

        // Linear motor along the axis.
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

        // Translation limit along the axis.
        if self.limit_state != LimitState::Inactive {
            let cdot = self.axis.dot(b.velocity - a.velocity)
                + self.a2 * b.angular_velocity
                - self.a1 * a.angular_velocity;
            let lambda = -self.axial_mass * cdot;
            let old = self.limit_impulse;
            self.limit_impulse = match self.limit_state {
                LimitState::AtLower => (old + lambda).max(0.0),
                LimitState::AtUpper => (old + lambda).min(0.0),
                LimitState::Inactive => unreachable!(),
            };
            let applied = self.limit_impulse - old;

            let p = self.axis * applied;
            a.velocity -= p * a.inv_mass;
            a.angular_velocity -= a.inv_inertia * applied * self.a1;
            b.velocity += p * b.inv_mass;
            b.angular_velocity += b.inv_inertia * applied * self.a2;
        }

        // Perpendicular + angular rows.
        let cdot1 = self.perp.dot(b.velocity - a.velocity)
            + self.s2 * b.angular_velocity
            - self.s1 * a.angular_velocity;
        let cdot2 = b.angular_velocity - a.angular_velocity;

        let rhs = [
            -(cdot1 + self.bias.x),
            -(cdot2 + self.bias.y),
            0.0,
            0.0,
        ];
        let solved = self.constraint_mass.mul_vec(&rhs);
        let lambda = Vec2::new(solved[0], solved[1]);
        if !lambda.is_finite() {
            return;
        }
        self.impulse += lambda;

        let p = self.perp * lambda.x;
        let l_a = lambda.x * self.s1 + lambda.y;
        let l_b = lambda.x * self.s2 + lambda.y;

        a.velocity -= p * a.inv_mass;
        a.angular_velocity -= a.inv_inertia * l_a;
        b.velocity += p * b.inv_mass;
        b.angular_velocity += b.inv_inertia * l_b;
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

        let c_perp = perp.dot(d);
        let c_angle = b.angle - a.angle - self.reference_angle;
        if c_perp.abs() <= params.linear_slop && c_angle.abs() <= params.angular_slop {
            return;
        }

        let s1 = (d + r_a).cross_scalar(perp);
        let s2 = r_b.cross_scalar(perp);
        let (m_a, m_b) = (a.inv_mass, b.inv_mass);
        let (i_a, i_b) = (a.inv_inertia, b.inv_inertia);

        let mut k = SmallMat::zero(2);
        k.m[0][0] = m_a + m_b + i_a * s1 * s1 + i_b * s2 * s2;
        k.m[0][1] = i_a * s1 + i_b * s2;
        k.m[1][0] = k.m[0][1];
        k.m[1][1] = i_a + i_b;
        if k.m[1][1] == 0.0 {
            k.m[1][1] = 1.0;
        }
        let Ok((inv, _)) = invert_2x2(&k, JOINT_PIVOT_EPS) else {
            return;
        };

        let max = params.max_correction;
        let rhs = [
            -c_perp.clamp(-max, max),
            -c_angle.clamp(-max, max),
            0.0,
            0.0,
        ];
        let solved = inv.mul_vec(&rhs);
        let lambda = Vec2::new(solved[0], solved[1]);

        let p = perp * lambda.x;
        a.position -= p * m_a;
        a.angle -= i_a * (lambda.x * s1 + lambda.y);
        b.position += p * m_b;
        b.angle += i_b * (lambda.x * s2 + lambda.y);
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
    fn test_revolute_removes_relative_point_velocity() {
        let mut bodies = vec![ball(0.0, 0.0), ball(1.0, 0.0)];
        bodies[1].velocity = Vec2::new(0.0, 2.0);

        let mut joint = RevoluteJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::new(0.5, 0.0),
            Vec2::new(-0.5, 0.0),
        );
        step(&mut bodies, &mut joint, 1.0 / 60.0, 8);

        let anchor_a = bodies[0].world_point(Vec2::new(0.5, 0.0));
        let anchor_b = bodies[1].world_point(Vec2::new(-0.5, 0.0));
        let rel = bodies[1].velocity_at(anchor_b) - bodies[0].velocity_at(anchor_a);
        assert!(rel.length() < 1e-8, "residual anchor velocity {rel:?}");
    }

    #[test]
    fn test_revolute_motor_torque_budget() {
        let mut bodies = vec![
            Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
            ball(1.0, 0.0),
        ];
        let max_torque = 0.5;
        let mut joint = RevoluteJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::ZERO,
            Vec2::new(-1.0, 0.0),
        )
        .with_motor(10.0, max_torque);

        let dt = 1.0 / 60.0;
        step(&mut bodies, &mut joint, dt, 8);

        // The accumulated motor impulse never exceeds torque * dt.
        assert!(joint.motor_impulse.abs() <= max_torque * dt + 1e-12);
        assert!(bodies[1].angular_velocity > 0.0);
    }

    #[test]
    fn test_revolute_motor_impulse_resets_when_disabled() {
        let mut bodies = vec![ball(0.0, 0.0), ball(1.0, 0.0)];
        let mut joint = RevoluteJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::new(0.5, 0.0),
            Vec2::new(-0.5, 0.0),
        )
        .with_motor(5.0, 10.0);

        step(&mut bodies, &mut joint, 1.0 / 60.0, 4);
        assert!(joint.motor_impulse != 0.0);

        joint.enable_motor = false;
        step(&mut bodies, &mut joint, 1.0 / 60.0, 4);
        assert_eq!(joint.motor_impulse, 0.0);
    }

    #[test]
    fn test_revolute_limit_blocks_one_direction() {
        let mut bodies = vec![
            Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
            ball(1.0, 0.0),
        ];
        // Already at the upper bound, spinning further into it.
        bodies[1].angular_velocity = 4.0;
        let mut joint = RevoluteJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::ZERO,
            Vec2::new(-1.0, 0.0),
        )
        .with_limits(-0.5, 0.0);

        step(&mut bodies, &mut joint, 1.0 / 60.0, 8);
        assert!(
            bodies[1].angular_velocity < 1e-8,
            "limit failed to stop spin: {}",
            bodies[1].angular_velocity
        );
    }

    #[test]
    fn test_prismatic_confines_motion_to_axis() {
        let mut bodies = vec![
            Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
            ball(1.0, 0.0),
        ];
        bodies[1].velocity = Vec2::new(1.0, 3.0);

        let mut joint = PrismaticJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::ZERO,
            Vec2::ZERO,
            Vec2::UNIT_X,
        );
        step(&mut bodies, &mut joint, 1.0 / 60.0, 8);

        // Off-axis velocity is removed, on-axis velocity survives.
        assert!(bodies[1].velocity.y.abs() < 1e-8);
        assert_relative_eq!(bodies[1].velocity.x, 1.0, epsilon = 1e-8);
        assert!(bodies[1].angular_velocity.abs() < 1e-8);
    }

    #[test]
    fn test_prismatic_motor_drives_translation() {
        let mut bodies = vec![
            Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
            ball(0.0, 0.0),
        ];
        let mut joint = PrismaticJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::ZERO,
            Vec2::ZERO,
            Vec2::UNIT_X,
        )
        .with_motor(2.0, 200.0);

        step(&mut bodies, &mut joint, 1.0 / 60.0, 8);
        assert_relative_eq!(bodies[1].velocity.x, 2.0, epsilon = 1e-6);
    }

    #[test]
    fn test_prismatic_limit_impulse_resets_when_inactive() {
        let mut bodies = vec![
            Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
            ball(0.0, 0.0),
        ];
        bodies[1].velocity = Vec2::new(-1.0, 0.0);
        let mut joint = PrismaticJoint::new(
            BodyHandle(0),
            BodyHandle(1),
            Vec2::ZERO,
            Vec2::ZERO,
            Vec2::UNIT_X,
        )
        .with_limits(0.0, 2.0);

        // At the lower bound and pushing into it.
        step(&mut bodies, &mut joint, 1.0 / 60.0, 8);
        assert!(joint.limit_impulse > 0.0);

        // Move inside the bounds; the limit deactivates and resets.
        bodies[1].position = Vec2::new(1.0, 0.0);
        step(&mut bodies, &mut joint, 1.0 / 60.0, 8);
        assert_eq!(joint.limit_impulse, 0.0);
    }
}
