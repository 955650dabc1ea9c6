//! Batch Constraint Solver
//!
//! [`ConstraintSolver`] is the owned solver context: it holds the KKT
//! backend, the warning policy, the island workspace, the contact manifold
//! cache, and the step statistics. Nothing in this crate is process-global,
//! so independent simulations run independent contexts and tests stay
//! deterministic.
//!
//! One step is bracketed as:
//!
//! ```text
//! solver.begin_step();
//! solver.update_contacts(...);     // per detected pair, from narrow phase
//! solver.solve(&mut bodies, &mut constraints, dt, &options)?;
//! solver.end_step();               // prunes contact-free manifolds
//! ```
//!
//! `solve` partitions the constraint/contact graph into islands and runs the
//! fixed pipeline per island — prepare, warm start, velocity iterations,
//! position iterations, impulse write-back — in the caller-provided
//! constraint order. Islands run in parallel under the selected backend;
//! island interiors are strictly sequential, which is what makes results
//! bit-identical across thread counts.

use crate::body::{Body, BodyHandle};
use crate::constraint::{Constraint2d, ConstraintOps, PrepareContext, SolverParams};
use crate::contact::ContactConstraint;
use crate::error::PhysicsError;
use crate::island::{IslandBuilder, Islands};
use crate::kkt::{KktBackend, KktStats};
use crate::log::{WarnCallback, WarningPolicy};
use crate::manifold::{ContactRecord, ManifoldCache};
use crate::scheduler::{dispatch, SolveOptions};
use crate::stats::StepStats;

/// Owned solver context and batch-solve entry point.
#[derive(Default)]
pub struct ConstraintSolver {
    /// Shared solver tuning, applied to every constraint.
    pub params: SolverParams,
    kkt: KktBackend,
    warnings: WarningPolicy,
    island_builder: IslandBuilder,
    islands: Islands,
    manifolds: ManifoldCache,
    stats: StepStats,
    parallel_kkt_stats: KktStats,
}

/// Raw pointers to the caller's buffers, shared across island workers.
///
/// SAFETY: islands reference disjoint body sets and disjoint constraint and
/// manifold index sets (the island builder's invariant), so concurrent
/// workers never touch the same element; each worker confines itself to its
/// island's indices.
#[derive(Clone, Copy)]
struct SharedState {
    bodies: *mut Body,
    bodies_len: usize,
    constraints: *mut Constraint2d,
    constraints_len: usize,
    manifolds: *mut crate::manifold::ContactManifold,
    manifolds_len: usize,
}

unsafe impl Send for SharedState {}
unsafe impl Sync for SharedState {}

impl ConstraintSolver {
    /// Create a solver context with default parameters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a solver context with explicit parameters.
    #[must_use]
    pub fn with_params(params: SolverParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    /// Register the warning callback `(level, category, message)`; replaces
    /// the default `tracing` sink.
    pub fn set_warning_callback(&mut self, callback: WarnCallback) {
        self.warnings.set_callback(callback);
    }

    /// Restore the default `tracing` sink.
    pub fn clear_warning_callback(&mut self) {
        self.warnings.clear_callback();
    }

    /// Begin a step: age the manifold cache.
    pub fn begin_step(&mut self) {
        self.manifolds.begin_step();
    }

    /// Feed one pair's narrow-phase output for this step.
    pub fn update_contacts(
        &mut self,
        bodies: &[Body],
        a: BodyHandle,
        b: BodyHandle,
        records: &[ContactRecord],
    ) {
        self.manifolds.update_pair(bodies, a, b, records);
    }

    /// End a step: prune contact-free manifolds and advance the warning
    /// cooldown clock.
    pub fn end_step(&mut self) {
        self.manifolds.end_step();
        self.warnings.advance_step();
    }

    /// Contact manifold cache, read-only.
    #[must_use]
    pub fn manifolds(&self) -> &ManifoldCache {
        &self.manifolds
    }

    /// Statistics from the most recent [`solve`](Self::solve).
    #[must_use]
    pub fn stats(&self) -> &StepStats {
        &self.stats
    }

    /// Cumulative KKT backend counters: the persistent serial backend plus
    /// everything the parallel scratch backends reported.
    #[must_use]
    pub fn kkt_stats(&self) -> KktStats {
        let mut total = *self.kkt.stats();
        total.merge(&self.parallel_kkt_stats);
        total
    }

    /// Island partition from the most recent solve, for inspection.
    #[must_use]
    pub fn islands(&self) -> &Islands {
        &self.islands
    }

    /// Solve one step for the given ordered constraint list.
    ///
    /// Applies every constraint and cached-contact impulse for the step to
    /// the bodies' velocities and positions. Constraint order within an
    /// island is the caller's order and is deterministic across thread
    /// counts and backends.
    pub fn solve(
        &mut self,
        bodies: &mut [Body],
        constraints: &mut [Constraint2d],
        dt: f64,
        options: &SolveOptions,
    ) -> Result<(), PhysicsError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(PhysicsError::InvalidConfiguration {
                reason: "time step must be finite and positive",
            });
        }

        self.island_builder
            .build(constraints, self.manifolds.manifolds(), &mut self.islands)?;

        let shared = SharedState {
            bodies: bodies.as_mut_ptr(),
            bodies_len: bodies.len(),
            constraints: constraints.as_mut_ptr(),
            constraints_len: constraints.len(),
            manifolds: self.manifolds.manifolds_mut().as_mut_ptr(),
            manifolds_len: self.manifolds.manifolds_mut().len(),
        };

        let islands = &self.islands;
        let warnings = &self.warnings;
        let params = self.params;

        let job = move |island: usize, kkt: &mut KktBackend| -> StepStats {
            solve_island(shared, islands, island, kkt, warnings, &params, dt, options)
        };

        let (mut stats, parallel_kkt) =
            dispatch(self.islands.len(), options, &mut self.kkt, job);
        stats.islands = self.islands.len() as u32;
        self.stats = stats;
        self.parallel_kkt_stats.merge(&parallel_kkt);
        Ok(())
    }
}

/// Solve one island: the strictly sequential batch pipeline.
#[allow(clippy::too_many_arguments)]
fn solve_island(
    shared: SharedState,
    islands: &Islands,
    island: usize,
    kkt: &mut KktBackend,
    warnings: &WarningPolicy,
    params: &SolverParams,
    dt: f64,
    options: &SolveOptions,
) -> StepStats {
    // SAFETY: see `SharedState` — this island's constraint/manifold indices
    // and the bodies they reference are disjoint from every other island's,
    // and this worker is the only one touching them this step.
    let bodies =
        unsafe { core::slice::from_raw_parts_mut(shared.bodies, shared.bodies_len) };
    let constraints = unsafe {
        core::slice::from_raw_parts_mut(shared.constraints, shared.constraints_len)
    };
    let manifolds =
        unsafe { core::slice::from_raw_parts_mut(shared.manifolds, shared.manifolds_len) };

    let constraint_indices = islands.constraints_of(island);
    let contact_indices = islands.contacts_of(island);

    let mut stats = StepStats::default();
    stats.constraints_solved = constraint_indices.len() as u32;

    // Contact constraints are rebuilt from the manifold cache each step;
    // manifolds whose pair reported no contact this step are skipped (they
    // only live until end_step prunes them).
    let mut contacts: Vec<ContactConstraint> = contact_indices
        .iter()
        .filter(|&&mi| !manifolds[mi as usize].is_stale())
        .filter_map(|&mi| {
            ContactConstraint::from_manifold(&manifolds[mi as usize], mi as usize)
        })
        .collect();

    // Prepare.
    {
        let mut ctx = PrepareContext {
            dt,
            params,
            kkt,
            warnings,
        };
        for &ci in constraint_indices {
            constraints[ci as usize].prepare(bodies, &mut ctx);
            if let Some(coupled) = constraints[ci as usize].as_coupled() {
                stats.equations_dropped += coupled.diagnostics().dropped_this_step;
            }
        }
        for contact in &mut contacts {
            let manifold = &manifolds[contact.manifold_index];
            contact.prepare(bodies, &mut ctx, manifold);
            stats.contact_points += contact.point_count() as u32;
        }
    }

    // Warm start.
    for &ci in constraint_indices {
        constraints[ci as usize].warm_start(bodies, params);
    }
    for contact in &mut contacts {
        contact.warm_start(bodies, params);
    }

    // Velocity iterations, caller order within the island.
    for _ in 0..options.velocity_iterations {
        for &ci in constraint_indices {
            constraints[ci as usize].solve_velocity(bodies, dt);
        }
        for contact in &mut contacts {
            contact.solve_velocity(bodies);
        }
        stats.velocity_iterations += 1;
    }

    // Position iterations.
    for _ in 0..options.position_iterations {
        for &ci in constraint_indices {
            constraints[ci as usize].solve_position(bodies, params);
        }
        for contact in &mut contacts {
            contact.solve_position(bodies, params);
        }
        stats.position_iterations += 1;
    }

    // Persist contact impulses for next step's warm start.
    for contact in &contacts {
        contact.write_back(&mut manifolds[contact.manifold_index]);
    }

    stats
}
