//! Contact Constraint
//!
//! Velocity-level contact resolution with Coulomb friction, built each step
//! from a cached manifold. One constraint covers every active point of one
//! body pair: per point it carries a normal row (non-penetration, restitution
//! bias) and a tangent row (friction), each with its own effective mass and
//! accumulated impulse.
//!
//! Friction follows the stick/slip split: the candidate tangent impulse is
//! accepted in full while the total stays inside the static cone
//! (`|t| <= mu_static * n`), which drives the tangential velocity to zero
//! (stick); outside the cone it clamps to the dynamic cone
//! (`mu_dynamic * n`) and the point keeps sliding (slip). The per-point
//! `stick` flag reports which regime resolved last.

use crate::body::{Body, BodyHandle};
use crate::constraint::{two_bodies_mut, PrepareContext, SolverParams};
use crate::manifold::{ContactManifold, MAX_MANIFOLD_POINTS};
use crate::math::Vec2;

/// Position-solve feedback factor for contacts.
const CONTACT_BAUMGARTE: f64 = 0.2;

/// One solved contact point.
#[derive(Clone, Copy, Debug, Default)]
struct ContactPoint {
    /// Anchor in body A's local frame (for positional re-evaluation).
    local_a: Vec2,
    /// Anchor in body B's local frame.
    local_b: Vec2,
    r_a: Vec2,
    r_b: Vec2,
    normal_mass: f64,
    tangent_mass: f64,
    /// Restitution bias (negative of the bounce-back target velocity).
    velocity_bias: f64,
    normal_impulse: f64,
    tangent_impulse: f64,
    penetration: f64,
    /// Which manifold slot this point came from.
    manifold_slot: usize,
    /// Stick (true) vs slip (false) on the last friction solve.
    stick: bool,
}

/// Contact constraint for one body pair, covering all manifold points.
#[derive(Clone, Debug)]
pub struct ContactConstraint {
    /// First body.
    pub body_a: BodyHandle,
    /// Second body.
    pub body_b: BodyHandle,
    /// Manifold index in the cache, for impulse write-back.
    pub manifold_index: usize,
    normal: Vec2,
    tangent: Vec2,
    static_friction: f64,
    dynamic_friction: f64,
    restitution: f64,
    points: [ContactPoint; MAX_MANIFOLD_POINTS],
    point_count: usize,
}

impl ContactConstraint {
    /// Build a constraint from a cached manifold; `None` when the manifold
    /// has no active points.
    #[must_use]
    pub fn from_manifold(manifold: &ContactManifold, manifold_index: usize) -> Option<Self> {
        let normal = manifold.normal;
        if normal.length_squared() == 0.0 {
            return None;
        }

        let mut constraint = Self {
            body_a: manifold.pair.handle_a(),
            body_b: manifold.pair.handle_b(),
            manifold_index,
            normal,
            tangent: normal.perpendicular(),
            static_friction: manifold.combined.static_friction,
            dynamic_friction: manifold.combined.dynamic_friction,
            restitution: manifold.combined.restitution,
            points: [ContactPoint::default(); MAX_MANIFOLD_POINTS],
            point_count: 0,
        };

        for (slot, point) in manifold.points.iter().enumerate() {
            if !point.active {
                continue;
            }
            constraint.points[constraint.point_count] = ContactPoint {
                normal_impulse: point.normal_impulse,
                tangent_impulse: point.tangent_impulse,
                penetration: point.penetration,
                manifold_slot: slot,
                ..ContactPoint::default()
            };
            constraint.point_count += 1;
        }

        if constraint.point_count == 0 {
            None
        } else {
            Some(constraint)
        }
    }

    /// Number of points this constraint solves.
    #[must_use]
    pub fn point_count(&self) -> usize {
        self.point_count
    }

    /// Stick flag of solved point `i`.
    #[must_use]
    pub fn stick(&self, i: usize) -> bool {
        i < self.point_count && self.points[i].stick
    }

    /// Accumulated normal impulse of solved point `i`.
    #[must_use]
    pub fn normal_impulse(&self, i: usize) -> f64 {
        if i < self.point_count {
            self.points[i].normal_impulse
        } else {
            0.0
        }
    }

    /// Recompute per-point effective masses and restitution bias.
    pub fn prepare(&mut self, bodies: &mut [Body], ctx: &mut PrepareContext<'_>, manifold: &ContactManifold) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            self.point_count = 0;
            return;
        };

        let normal = self.normal;
        let tangent = self.tangent;

        for p in self.points.iter_mut().take(self.point_count) {
            let world = manifold.points[p.manifold_slot].point;
            p.local_a = (world - a.position).rotate(-a.angle);
            p.local_b = (world - b.position).rotate(-b.angle);
            p.r_a = world - a.position;
            p.r_b = world - b.position;

            let rn_a = p.r_a.cross_scalar(normal);
            let rn_b = p.r_b.cross_scalar(normal);
            let k_normal = a.inv_mass
                + b.inv_mass
                + a.inv_inertia * rn_a * rn_a
                + b.inv_inertia * rn_b * rn_b;
            p.normal_mass = if k_normal > 0.0 { 1.0 / k_normal } else { 0.0 };

            let rt_a = p.r_a.cross_scalar(tangent);
            let rt_b = p.r_b.cross_scalar(tangent);
            let k_tangent = a.inv_mass
                + b.inv_mass
                + a.inv_inertia * rt_a * rt_a
                + b.inv_inertia * rt_b * rt_b;
            p.tangent_mass = if k_tangent > 0.0 { 1.0 / k_tangent } else { 0.0 };

            // Restitution only above the approach-speed threshold.
            let v_a = a.velocity + Vec2::cross_from_scalar(a.angular_velocity, p.r_a);
            let v_b = b.velocity + Vec2::cross_from_scalar(b.angular_velocity, p.r_b);
            let approach = (v_b - v_a).dot(normal);
            p.velocity_bias = if approach < -ctx.params.restitution_threshold {
                -self.restitution * approach
            } else {
                0.0
            };
        }
    }

    /// Re-apply cached impulses from the previous step.
    pub fn warm_start(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        for p in self.points.iter_mut().take(self.point_count) {
            p.normal_impulse *= params.warm_start_factor;
            p.tangent_impulse *= params.warm_start_factor;
            let impulse = self.normal * p.normal_impulse + self.tangent * p.tangent_impulse;
            a.apply_impulse_at_point(-impulse, a.position + p.r_a);
            b.apply_impulse_at_point(impulse, b.position + p.r_b);
        }
    }

    /// One velocity iteration: friction row, then non-penetration row.
    pub fn solve_velocity(&mut self, bodies: &mut [Body]) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        let normal = self.normal;
        let tangent = self.tangent;

        for p in self.points.iter_mut().take(self.point_count) {
            // Friction, bounded by the current normal impulse.
            let v_a = a.velocity + Vec2::cross_from_scalar(a.angular_velocity, p.r_a);
            let v_b = b.velocity + Vec2::cross_from_scalar(b.angular_velocity, p.r_b);
            let vt = (v_b - v_a).dot(tangent);

            let candidate = p.tangent_impulse - p.tangent_mass * vt;
            let static_bound = self.static_friction * p.normal_impulse;
            let dynamic_bound = self.dynamic_friction * p.normal_impulse;

            let new_tangent = if candidate.abs() <= static_bound {
                p.stick = true;
                candidate
            } else {
                p.stick = false;
                candidate.clamp(-dynamic_bound, dynamic_bound)
            };
            let applied_t = new_tangent - p.tangent_impulse;
            p.tangent_impulse = new_tangent;
            if applied_t != 0.0 && applied_t.is_finite() {
                let impulse = tangent * applied_t;
                a.apply_impulse_at_point(-impulse, a.position + p.r_a);
                b.apply_impulse_at_point(impulse, b.position + p.r_b);
            }

            // Non-penetration with restitution bias; accumulated impulse is
            // clamped non-negative.
            let v_a = a.velocity + Vec2::cross_from_scalar(a.angular_velocity, p.r_a);
            let v_b = b.velocity + Vec2::cross_from_scalar(b.angular_velocity, p.r_b);
            let vn = (v_b - v_a).dot(normal);

            let lambda = -p.normal_mass * (vn - p.velocity_bias);
            let new_normal = (p.normal_impulse + lambda).max(0.0);
            let applied_n = new_normal - p.normal_impulse;
            p.normal_impulse = new_normal;
            if applied_n != 0.0 && applied_n.is_finite() {
                let impulse = normal * applied_n;
                a.apply_impulse_at_point(-impulse, a.position + p.r_a);
                b.apply_impulse_at_point(impulse, b.position + p.r_b);
            }
        }
    }

    /// One positional pass: push out whatever penetration remains after the
    /// bodies moved, clamped to `max_correction`.
    pub fn solve_position(&mut self, bodies: &mut [Body], params: &SolverParams) {
        let Some((a, b)) = two_bodies_mut(bodies, self.body_a, self.body_b) else {
            return;
        };
        let normal = self.normal;

        for p in self.points.iter().take(self.point_count) {
            let world_a = a.position + p.local_a.rotate(a.angle);
            let world_b = b.position + p.local_b.rotate(b.angle);
            // Separation gained since prepare reduces the cached penetration.
            let separation_gain = (world_b - world_a).dot(normal);
            let penetration = p.penetration - separation_gain;
            if penetration <= params.linear_slop {
                continue;
            }

            let r_a = world_a - a.position;
            let r_b = world_b - b.position;
            let rn_a = r_a.cross_scalar(normal);
            let rn_b = r_b.cross_scalar(normal);
            let k = a.inv_mass
                + b.inv_mass
                + a.inv_inertia * rn_a * rn_a
                + b.inv_inertia * rn_b * rn_b;
            if k <= 0.0 {
                continue;
            }

            let correction = (CONTACT_BAUMGARTE * (penetration - params.linear_slop))
                .min(params.max_correction);
            let lambda = correction / k;
            let impulse = normal * lambda;

            a.position -= impulse * a.inv_mass;
            a.angle -= a.inv_inertia * rn_a * lambda;
            b.position += impulse * b.inv_mass;
            b.angle += b.inv_inertia * rn_b * lambda;
        }
    }

    /// Store accumulated impulses back into the manifold for the next step.
    pub fn write_back(&self, manifold: &mut ContactManifold) {
        for p in self.points.iter().take(self.point_count) {
            let slot = &mut manifold.points[p.manifold_slot];
            slot.normal_impulse = p.normal_impulse;
            slot.tangent_impulse = p.tangent_impulse;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::body::Shape2d;
    use crate::kkt::KktBackend;
    use crate::log::WarningPolicy;
    use crate::manifold::{ContactRecord, ManifoldCache};
    use crate::material::Material;

    fn falling_pair(friction: f64) -> (Vec<Body>, ManifoldCache) {
        let ground = Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 })
            .with_material(Material::new(0.0, friction));
        let ball = Body::new_dynamic(Vec2::new(0.0, 0.9), 1.0, Shape2d::Circle { radius: 0.5 })
            .with_material(Material::new(0.0, friction));
        let bodies = vec![ground, ball];

        let mut cache = ManifoldCache::new();
        cache.begin_step();
        cache.update_pair(
            &bodies,
            BodyHandle(0),
            BodyHandle(1),
            &[ContactRecord {
                normal: Vec2::UNIT_Y,
                point: Vec2::new(0.0, 0.45),
                penetration: 0.1,
                has_contact: true,
                feature_id: 0,
            }],
        );
        (bodies, cache)
    }

    fn solve(bodies: &mut [Body], cache: &mut ManifoldCache, iters: usize) -> ContactConstraint {
        let params = SolverParams::default();
        let warnings = WarningPolicy::new();
        let mut kkt = KktBackend::new();
        let manifold = cache.manifolds()[0].clone();
        let mut c = ContactConstraint::from_manifold(&manifold, 0).unwrap();
        let mut ctx = PrepareContext {
            dt: 1.0 / 60.0,
            params: &params,
            kkt: &mut kkt,
            warnings: &warnings,
        };
        c.prepare(bodies, &mut ctx, &manifold);
        c.warm_start(bodies, &params);
        for _ in 0..iters {
            c.solve_velocity(bodies);
        }
        for _ in 0..iters {
            c.solve_position(bodies, &params);
        }
        c.write_back(&mut cache.manifolds_mut()[0]);
        c
    }

    #[test]
    fn test_normal_impulse_stops_approach() {
        let (mut bodies, mut cache) = falling_pair(0.5);
        bodies[1].velocity = Vec2::new(0.0, -3.0);

        let c = solve(&mut bodies, &mut cache, 8);

        assert!(
            bodies[1].velocity.y >= -1e-9,
            "still approaching: {}",
            bodies[1].velocity.y
        );
        assert!(c.normal_impulse(0) > 0.0);
    }

    /// Relative tangential speed at the cached contact point.
    fn tangential_speed(bodies: &[Body]) -> f64 {
        let contact = bodies[1].position + Vec2::new(0.0, -0.45);
        let rel = bodies[1].velocity_at(contact) - bodies[0].velocity_at(contact);
        rel.dot(Vec2::UNIT_Y.perpendicular())
    }

    #[test]
    fn test_slow_tangential_motion_sticks() {
        let (mut bodies, mut cache) = falling_pair(0.8);
        bodies[1].velocity = Vec2::new(0.05, -3.0);

        let c = solve(&mut bodies, &mut cache, 8);

        assert!(c.stick(0), "expected stick");
        let vt = tangential_speed(&bodies);
        assert!(vt.abs() < 1e-6, "residual slide at contact: {vt}");
    }

    #[test]
    fn test_fast_tangential_motion_slips() {
        let (mut bodies, mut cache) = falling_pair(0.2);
        bodies[1].velocity = Vec2::new(10.0, -1.0);

        let before = tangential_speed(&bodies);
        let c = solve(&mut bodies, &mut cache, 8);
        let after = tangential_speed(&bodies);

        assert!(!c.stick(0), "expected slip");
        assert!(after.abs() < before.abs(), "friction must brake the slide");
        assert!(after.abs() > 1e-3, "slip should not fully stop in one step");
    }

    #[test]
    fn test_impulse_write_back_round_trip() {
        let (mut bodies, mut cache) = falling_pair(0.5);
        bodies[1].velocity = Vec2::new(0.0, -2.0);

        solve(&mut bodies, &mut cache, 8);

        let stored = cache.manifolds()[0].points[0].normal_impulse;
        assert!(stored > 0.0, "impulse must persist in the manifold");
    }

    #[test]
    fn test_separated_point_gets_no_position_push() {
        let (mut bodies, mut cache) = falling_pair(0.5);

        let params = SolverParams::default();
        let warnings = WarningPolicy::new();
        let mut kkt = KktBackend::new();
        let manifold = cache.manifolds()[0].clone();
        let mut c = ContactConstraint::from_manifold(&manifold, 0).unwrap();
        let mut ctx = PrepareContext {
            dt: 1.0 / 60.0,
            params: &params,
            kkt: &mut kkt,
            warnings: &warnings,
        };
        c.prepare(&mut bodies, &mut ctx, &manifold);

        // The ball separates after prepare; the gained separation cancels the
        // cached penetration and no further push may happen.
        bodies[1].position.y += 0.2;
        let y_before = bodies[1].position.y;
        c.solve_position(&mut bodies, &params);
        assert_eq!(bodies[1].position.y, y_before);
    }
}
