//! # impulse2d
//!
//! **2D Rigid-Body Constraint Solver**
//!
//! Sequential-impulse constraint solving for 2D rigid bodies: distance and
//! joint constraints, coupled multi-equation systems with numerical
//! conditioning recovery, contact resolution with Coulomb friction, and an
//! island partition that solves independent clusters in parallel.
//!
//! ## Subsystems
//!
//! | Subsystem | Description |
//! |-----------|-------------|
//! | **Constraint ops** | prepare / warm-start / solve-velocity / solve-position, shared across all variants |
//! | **Coupled engine** | up to 4 scalar equations per constraint, dense solve, condition tracking, equation dropping |
//! | **KKT backend** | Gauss-Jordan inversion with partial pivoting, per-size memoization, call/hit statistics |
//! | **Island builder** | union-find clustering into independent islands, flat reused buffers |
//! | **Scheduler** | serial, fixed thread-pool, or work-stealing execution per island |
//! | **Manifold cache** | persistent contact points with impulse warm starting, one-step pruning |
//!
//! ## Scope
//!
//! Narrow-phase collision detection and body integration are external: the
//! solver consumes [`ContactRecord`]s and reads/writes body state the caller
//! owns. No broad phase, no CCD, no scene management.
//!
//! ## Quick start
//!
//! ```rust
//! use impulse2d::prelude::*;
//!
//! let mut bodies = vec![
//!     Body::new_static(Vec2::ZERO, Shape2d::Circle { radius: 0.5 }),
//!     Body::new_dynamic(Vec2::new(2.5, 0.0), 1.0, Shape2d::Circle { radius: 0.5 }),
//! ];
//! let mut constraints = vec![Constraint2d::Distance(DistanceConstraint::new(
//!     BodyHandle(0),
//!     BodyHandle(1),
//!     Vec2::ZERO,
//!     Vec2::ZERO,
//!     2.0,
//! ))];
//!
//! let mut solver = ConstraintSolver::new();
//! let options = SolveOptions::default();
//! for _ in 0..60 {
//!     solver.begin_step();
//!     // narrow-phase contact records would be fed here via update_contacts()
//!     solver.solve(&mut bodies, &mut constraints, 1.0 / 60.0, &options).unwrap();
//!     solver.end_step();
//! }
//! assert!((bodies[1].position.x - 2.0).abs() < 0.1);
//! ```
//!
//! ## Determinism
//!
//! Constraint order within an island is the caller's order; islands share no
//! bodies. Solving with 1, 2, or N worker threads — on any backend — yields
//! bit-identical results.

pub mod body;
pub mod constraint;
pub mod contact;
pub mod coupled;
pub mod error;
pub mod island;
pub mod joint;
pub mod joint_extra;
pub mod kkt;
pub mod linalg;
pub mod log;
pub mod manifold;
pub mod material;
pub mod math;
pub mod scheduler;
pub mod solver;
pub mod stats;

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::body::{Body, BodyHandle, Shape2d};
    pub use crate::constraint::{
        Constraint2d, ConstraintOps, DistanceAngleConstraint, DistanceConstraint,
        SolverParams, SpringConstraint,
    };
    pub use crate::contact::ContactConstraint;
    pub use crate::coupled::{
        CoupledConstraint, CoupledDiagnostics, CoupledEquation, MAX_COUPLED_EQUATIONS,
    };
    pub use crate::error::PhysicsError;
    pub use crate::joint::{PrismaticJoint, RevoluteJoint};
    pub use crate::joint_extra::{GearJoint, PlanarJoint};
    pub use crate::kkt::{KktBackend, KktStats};
    pub use crate::log::{WarnCategory, WarnLevel};
    pub use crate::manifold::{
        BodyPairKey, ContactManifold, ContactRecord, ManifoldCache, MAX_MANIFOLD_POINTS,
    };
    pub use crate::material::{CombineRule, CombinedMaterial, Material};
    pub use crate::math::Vec2;
    pub use crate::scheduler::{SchedulerBackend, SolveOptions};
    pub use crate::solver::ConstraintSolver;
    pub use crate::stats::StepStats;
}

pub use prelude::*;
