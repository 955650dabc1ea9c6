//! Parallel Island Scheduler
//!
//! Dispatches the per-island batch solve across worker threads. Islands
//! reference disjoint body sets (the island builder's invariant), so islands
//! may run concurrently with no locks; within an island everything stays
//! strictly sequential because sequential impulses are order-dependent.
//!
//! Three backends:
//! - [`SchedulerBackend::Serial`] — plain loop, persistent memoizing KKT
//!   backend.
//! - [`SchedulerBackend::ThreadPool`] — dedicated fixed-size rayon pool.
//! - [`SchedulerBackend::WorkStealing`] — rayon's global work-stealing pool.
//!
//! Parallel backends hand every island a scratch KKT backend (cross-step
//! memoization is a serial-only win; correctness never depends on the cache)
//! and merge all statistics in island order after the join, which keeps the
//! counters deterministic across thread counts.

use crate::kkt::{KktBackend, KktStats};
use crate::stats::StepStats;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Which execution backend runs the islands.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SchedulerBackend {
    /// Single-threaded loop.
    Serial,
    /// Dedicated rayon pool with a fixed thread count.
    ThreadPool,
    /// Global rayon work-stealing pool.
    #[default]
    WorkStealing,
}

/// Iteration and parallelism configuration for one solve call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SolveOptions {
    /// Velocity iterations per island.
    pub velocity_iterations: usize,
    /// Position iterations per island.
    pub position_iterations: usize,
    /// Master switch for parallel execution.
    pub parallel: bool,
    /// Backend used when `parallel` is set.
    pub backend: SchedulerBackend,
    /// Worker threads for [`SchedulerBackend::ThreadPool`]; 0 picks the
    /// rayon default.
    pub threads: usize,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            velocity_iterations: 8,
            position_iterations: 3,
            parallel: true,
            backend: SchedulerBackend::default(),
            threads: 0,
        }
    }
}

/// Run `job` once per island and merge the statistics in island order.
///
/// `job` receives the island index and a KKT backend; it must only touch
/// state owned by that island. The serial path threads `persistent_kkt`
/// through every island so its memoization survives across steps; parallel
/// paths use per-island scratch backends and report their counters through
/// the returned [`KktStats`].
pub(crate) fn dispatch<F>(
    island_count: usize,
    options: &SolveOptions,
    persistent_kkt: &mut KktBackend,
    job: F,
) -> (StepStats, KktStats)
where
    F: Fn(usize, &mut KktBackend) -> StepStats + Send + Sync,
{
    let serial = !options.parallel
        || island_count <= 1
        || matches!(options.backend, SchedulerBackend::Serial)
        || cfg!(not(feature = "parallel"));

    if serial {
        let mut stats = StepStats::default();
        for island in 0..island_count {
            stats.merge(&job(island, persistent_kkt));
        }
        return (stats, KktStats::default());
    }

    #[cfg(feature = "parallel")]
    {
        let run = || -> Vec<(StepStats, KktStats)> {
            (0..island_count)
                .into_par_iter()
                .map(|island| {
                    let mut scratch = KktBackend::new();
                    let stats = job(island, &mut scratch);
                    (stats, *scratch.stats())
                })
                .collect()
        };

        let results = match options.backend {
            SchedulerBackend::ThreadPool => {
                let mut builder = rayon::ThreadPoolBuilder::new();
                if options.threads > 0 {
                    builder = builder.num_threads(options.threads);
                }
                match builder.build() {
                    Ok(pool) => pool.install(run),
                    // Pool creation failing (resource pressure) falls back to
                    // the caller's thread rather than dropping the step.
                    Err(_) => run(),
                }
            }
            SchedulerBackend::WorkStealing | SchedulerBackend::Serial => run(),
        };

        let mut stats = StepStats::default();
        let mut kkt_stats = KktStats::default();
        for (island_stats, island_kkt) in &results {
            stats.merge(island_stats);
            kkt_stats.merge(island_kkt);
        }
        (stats, kkt_stats)
    }

    #[cfg(not(feature = "parallel"))]
    unreachable!("serial fallback handled above")
}
