//! KKT Inversion Backend with Memoization
//!
//! Thin front-end over the small dense solver. Matrices at or above
//! [`CACHE_MIN_DIM`] are memoized: one slot per matrix size stores the exact
//! input bit pattern, the pivot epsilon, and the resulting inverse plus pivot
//! diagnostics. A byte-for-byte repeat returns the cached result without
//! re-factoring — coupled constraints whose geometry has not moved between
//! steps hit this path every frame. Smaller systems (1×1, 2×2) bypass the
//! cache entirely.
//!
//! The backend is an owned field of the solver context, never a process-wide
//! global, so independent simulations keep independent caches and statistics.

use crate::error::PhysicsError;
use crate::linalg::{gauss_jordan_invert, invert_2x2, PivotStats, SmallMat, MAX_DIM};

/// Smallest matrix dimension that participates in memoization.
pub const CACHE_MIN_DIM: usize = 3;

/// Cumulative backend counters, exposed read-only for observability.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct KktStats {
    /// Total inversion requests.
    pub calls: u64,
    /// Requests that consulted the cache.
    pub cache_checks: u64,
    /// Requests answered from the cache.
    pub cache_hits: u64,
    /// Requests that re-factored and refreshed the cache.
    pub cache_misses: u64,
}

impl KktStats {
    /// Fold another backend's counters into this one.
    pub fn merge(&mut self, other: &KktStats) {
        self.calls += other.calls;
        self.cache_checks += other.cache_checks;
        self.cache_hits += other.cache_hits;
        self.cache_misses += other.cache_misses;
    }
}

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    key: [[u64; MAX_DIM]; MAX_DIM],
    eps_bits: u64,
    inverse: SmallMat,
    pivots: PivotStats,
}

/// Memoizing inversion backend.
#[derive(Clone, Debug, Default)]
pub struct KktBackend {
    /// One slot per cacheable size, indexed by `n`.
    slots: [Option<CacheEntry>; MAX_DIM + 1],
    stats: KktStats,
}

impl KktBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Invert `a`, consulting the per-size cache for `n >= CACHE_MIN_DIM`.
    ///
    /// Failures are never cached; a singular matrix is re-examined on every
    /// call because the caller mutates it between attempts (equation drops).
    pub fn invert(
        &mut self,
        a: &SmallMat,
        eps: f64,
    ) -> Result<(SmallMat, PivotStats), PhysicsError> {
        self.stats.calls += 1;

        if a.n >= CACHE_MIN_DIM {
            self.stats.cache_checks += 1;
            let key = a.bit_key();
            let eps_bits = eps.to_bits();

            if let Some(entry) = &self.slots[a.n] {
                if entry.key == key && entry.eps_bits == eps_bits {
                    self.stats.cache_hits += 1;
                    return Ok((entry.inverse, entry.pivots));
                }
            }

            self.stats.cache_misses += 1;
            let (inverse, pivots) = gauss_jordan_invert(a, eps)?;
            self.slots[a.n] = Some(CacheEntry {
                key,
                eps_bits,
                inverse,
                pivots,
            });
            return Ok((inverse, pivots));
        }

        match a.n {
            2 => invert_2x2(a, eps),
            _ => gauss_jordan_invert(a, eps),
        }
    }

    /// Cumulative call/cache counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> &KktStats {
        &self.stats
    }

    /// Drop all cached factorizations, keeping the counters.
    pub fn invalidate(&mut self) {
        self.slots = [None; MAX_DIM + 1];
    }
}
