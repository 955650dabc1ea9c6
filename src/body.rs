//! Rigid Bodies
//!
//! 2D rigid body state: pose, velocities, accumulated force/torque, inverse
//! mass properties, shape descriptor, and surface material. Bodies are owned
//! by the caller in a flat `Vec<Body>`; constraints and contact manifolds
//! refer to them by [`BodyHandle`].
//!
//! # Static bodies
//!
//! A body is static exactly when `inv_mass == 0.0` and `inv_inertia == 0.0`.
//! The mass setters maintain this as a two-way invariant: zeroing one side
//! zeroes the other, so `inv_mass == 0 ⟺ inv_inertia == 0 ⟺ static` holds
//! after any mass-setting operation.

use crate::material::Material;
use crate::math::Vec2;

/// Dense index of a body in the caller-owned body slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BodyHandle(pub u32);

impl BodyHandle {
    /// The handle as a slice index.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// 2D collision shape descriptor.
///
/// Narrow-phase intersection testing is external to this crate; the shape is
/// carried for mass-property derivation and for the surrounding simulation.
/// All shapes are defined in local space relative to the center of mass.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Shape2d {
    /// Circle defined by its radius.
    Circle {
        /// Radius of the circle.
        radius: f64,
    },
    /// Convex polygon defined by vertices in CCW winding order.
    Polygon {
        /// Vertices in counter-clockwise order. Must form a convex hull.
        vertices: Vec<Vec2>,
    },
    /// Capsule defined by a radius and half-length along the local X axis.
    Capsule {
        /// Radius of the capsule's hemicircles.
        radius: f64,
        /// Half of the segment length between hemicircle centers.
        half_length: f64,
    },
    /// Line segment (edge) from start to end.
    Edge {
        /// Start point in local space.
        start: Vec2,
        /// End point in local space.
        end: Vec2,
    },
}

/// 2D rigid body.
#[derive(Clone, Debug)]
pub struct Body {
    /// World-space position of the center of mass.
    pub position: Vec2,
    /// Orientation angle in radians (counter-clockwise from +X).
    pub angle: f64,
    /// Linear velocity.
    pub velocity: Vec2,
    /// Angular velocity (radians per second, positive = CCW).
    pub angular_velocity: f64,
    /// Accumulated force, cleared by the integrator each step.
    pub force: Vec2,
    /// Accumulated torque, cleared by the integrator each step.
    pub torque: f64,
    /// Inverse mass (0 for static bodies).
    pub inv_mass: f64,
    /// Inverse moment of inertia (0 for static bodies).
    pub inv_inertia: f64,
    /// Collision shape descriptor.
    pub shape: Shape2d,
    /// Surface material (restitution, static/dynamic friction).
    pub material: Material,
}

impl Body {
    /// Create a dynamic body. Inertia is derived from the shape.
    ///
    /// A non-positive `mass` produces a static body.
    #[must_use]
    pub fn new_dynamic(position: Vec2, mass: f64, shape: Shape2d) -> Self {
        let mut body = Self {
            position,
            angle: 0.0,
            velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            force: Vec2::ZERO,
            torque: 0.0,
            inv_mass: 0.0,
            inv_inertia: 0.0,
            shape,
            material: Material::default(),
        };
        body.set_mass(mass);
        body
    }

    /// Create a static (immovable) body.
    #[must_use]
    pub fn new_static(position: Vec2, shape: Shape2d) -> Self {
        Self {
            position,
            angle: 0.0,
            velocity: Vec2::ZERO,
            angular_velocity: 0.0,
            force: Vec2::ZERO,
            torque: 0.0,
            inv_mass: 0.0,
            inv_inertia: 0.0,
            shape,
            material: Material::default(),
        }
    }

    /// Set the surface material.
    #[must_use]
    pub fn with_material(mut self, material: Material) -> Self {
        self.material = material;
        self
    }

    /// Set mass and derive inertia from the shape.
    ///
    /// `mass <= 0` makes the body static (both inverse properties zeroed).
    /// A shape with zero derived inertia (degenerate polygon) also zeroes
    /// `inv_mass` so the static invariant cannot be half-broken.
    pub fn set_mass(&mut self, mass: f64) {
        if mass <= 0.0 {
            self.inv_mass = 0.0;
            self.inv_inertia = 0.0;
            return;
        }
        let inertia = compute_inertia(&self.shape, mass);
        if inertia <= 0.0 {
            self.inv_mass = 0.0;
            self.inv_inertia = 0.0;
            return;
        }
        self.inv_mass = 1.0 / mass;
        self.inv_inertia = 1.0 / inertia;
    }

    /// Set mass and moment of inertia directly.
    ///
    /// If either value is non-positive the body becomes static; the inverse
    /// properties are zeroed together.
    pub fn set_mass_properties(&mut self, mass: f64, inertia: f64) {
        if mass <= 0.0 || inertia <= 0.0 {
            self.inv_mass = 0.0;
            self.inv_inertia = 0.0;
        } else {
            self.inv_mass = 1.0 / mass;
            self.inv_inertia = 1.0 / inertia;
        }
    }

    /// `true` if this body has infinite mass and inertia.
    #[inline]
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.inv_mass == 0.0 && self.inv_inertia == 0.0
    }

    /// Transform a local-space point to world space.
    #[inline]
    #[must_use]
    pub fn world_point(&self, local: Vec2) -> Vec2 {
        self.position + local.rotate(self.angle)
    }

    /// Velocity of a world-space point on this body.
    #[inline]
    #[must_use]
    pub fn velocity_at(&self, world_point: Vec2) -> Vec2 {
        let r = world_point - self.position;
        self.velocity + Vec2::cross_from_scalar(self.angular_velocity, r)
    }

    /// Apply a linear impulse at the center of mass.
    #[inline]
    pub fn apply_impulse(&mut self, impulse: Vec2) {
        self.velocity += impulse * self.inv_mass;
    }

    /// Apply a linear impulse at a world-space point, generating both linear
    /// and angular response.
    pub fn apply_impulse_at_point(&mut self, impulse: Vec2, world_point: Vec2) {
        self.velocity += impulse * self.inv_mass;
        let r = world_point - self.position;
        self.angular_velocity += r.cross_scalar(impulse) * self.inv_inertia;
    }

    /// Apply an angular impulse.
    #[inline]
    pub fn apply_angular_impulse(&mut self, impulse: f64) {
        self.angular_velocity += impulse * self.inv_inertia;
    }

    /// Accumulate a force at the center of mass for the next integration step.
    #[inline]
    pub fn add_force(&mut self, force: Vec2) {
        self.force += force;
    }

    /// Accumulate a torque for the next integration step.
    #[inline]
    pub fn add_torque(&mut self, torque: f64) {
        self.torque += torque;
    }
}

/// Compute moment of inertia for a 2D shape with given mass.
fn compute_inertia(shape: &Shape2d, mass: f64) -> f64 {
    match shape {
        Shape2d::Circle { radius } => {
            // I = 0.5 * m * r^2
            0.5 * mass * radius * radius
        }
        Shape2d::Capsule {
            radius,
            half_length,
        } => {
            // Approximate as rectangle + two semicircles:
            // I ~ m * (r^2 / 2 + half_length^2 / 3)
            mass * (radius * radius / 2.0 + half_length * half_length / 3.0)
        }
        Shape2d::Polygon { vertices } => {
            if vertices.len() < 3 {
                return 0.0;
            }
            let n = vertices.len();
            let mut numerator = 0.0;
            let mut denominator = 0.0;
            for i in 0..n {
                let a = vertices[i];
                let b = vertices[(i + 1) % n];
                let cross = a.cross_scalar(b).abs();
                numerator += cross * (a.dot(a) + a.dot(b) + b.dot(b));
                denominator += cross;
            }
            if denominator == 0.0 {
                return 0.0;
            }
            mass * numerator / (6.0 * denominator)
        }
        Shape2d::Edge { start, end } => {
            // Thin rod: I = m * L^2 / 12
            mass * (*end - *start).length_squared() / 12.0
        }
    }
}
