//! Small Dense Linear Algebra
//!
//! Fixed-capacity square matrices (N ≤ 4) and the routines the coupled
//! constraint engine is built on: Gauss-Jordan inversion with partial
//! pivoting and pivot-magnitude diagnostics, a closed-form 2×2 path, a
//! Gershgorin-style condition bound, and a cyclic-Jacobi spectral estimate.
//!
//! Pivot magnitudes observed during elimination are returned alongside the
//! inverse; they are the cheapest rank/conditioning signal available and the
//! coupled engine folds them into its per-step diagnostics.

use crate::error::PhysicsError;

/// Maximum dimension of a [`SmallMat`].
pub const MAX_DIM: usize = 4;

/// Floor applied to denominators in condition estimates.
const CONDITION_EPS: f64 = 1e-30;

/// Cyclic Jacobi sweep limit. Reliable for N ≤ 4; revisit before raising
/// [`MAX_DIM`].
const JACOBI_MAX_SWEEPS: usize = 32;

/// Convergence tolerance on the off-diagonal magnitude for the Jacobi sweep.
const JACOBI_TOLERANCE: f64 = 1e-12;

/// Dense square matrix with fixed storage and runtime dimension `n ≤ 4`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SmallMat {
    /// Active dimension.
    pub n: usize,
    /// Row-major storage; entries outside the active block are zero.
    pub m: [[f64; MAX_DIM]; MAX_DIM],
}

impl SmallMat {
    /// Zero matrix of dimension `n`.
    #[must_use]
    pub fn zero(n: usize) -> Self {
        debug_assert!(n <= MAX_DIM);
        Self {
            n,
            m: [[0.0; MAX_DIM]; MAX_DIM],
        }
    }

    /// Identity matrix of dimension `n`.
    #[must_use]
    pub fn identity(n: usize) -> Self {
        let mut out = Self::zero(n);
        for i in 0..n {
            out.m[i][i] = 1.0;
        }
        out
    }

    /// Matrix-vector product over the active block.
    #[must_use]
    pub fn mul_vec(&self, v: &[f64; MAX_DIM]) -> [f64; MAX_DIM] {
        let mut out = [0.0; MAX_DIM];
        for i in 0..self.n {
            let mut sum = 0.0;
            for j in 0..self.n {
                sum += self.m[i][j] * v[j];
            }
            out[i] = sum;
        }
        out
    }

    /// Exact bit pattern of the active block, for cache keying.
    #[must_use]
    pub fn bit_key(&self) -> [[u64; MAX_DIM]; MAX_DIM] {
        let mut key = [[0u64; MAX_DIM]; MAX_DIM];
        for i in 0..self.n {
            for j in 0..self.n {
                key[i][j] = self.m[i][j].to_bits();
            }
        }
        key
    }
}

/// Pivot magnitudes observed during one elimination.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PivotStats {
    /// Smallest absolute pivot selected.
    pub min_pivot: f64,
    /// Largest absolute pivot selected.
    pub max_pivot: f64,
}

impl Default for PivotStats {
    fn default() -> Self {
        Self {
            min_pivot: f64::INFINITY,
            max_pivot: 0.0,
        }
    }
}

/// Invert `a` in place alongside an identity via Gauss-Jordan elimination
/// with partial pivoting.
///
/// The row with the largest absolute entry in the current column is selected
/// and swapped in; a pivot below `eps` aborts with
/// [`PhysicsError::SingularMatrix`]. Returns the inverse together with the
/// min/max pivot magnitudes seen.
pub fn gauss_jordan_invert(a: &SmallMat, eps: f64) -> Result<(SmallMat, PivotStats), PhysicsError> {
    let n = a.n;
    let mut work = *a;
    let mut inv = SmallMat::identity(n);
    let mut stats = PivotStats::default();

    for col in 0..n {
        // Partial pivot: pick the remaining row with the largest |entry|.
        let mut pivot_row = col;
        let mut pivot_abs = work.m[col][col].abs();
        for row in (col + 1)..n {
            let candidate = work.m[row][col].abs();
            if candidate > pivot_abs {
                pivot_abs = candidate;
                pivot_row = row;
            }
        }

        if pivot_abs < eps {
            return Err(PhysicsError::SingularMatrix {
                pivot: pivot_abs,
                column: col,
            });
        }

        if pivot_row != col {
            work.m.swap(pivot_row, col);
            inv.m.swap(pivot_row, col);
        }

        stats.min_pivot = stats.min_pivot.min(pivot_abs);
        stats.max_pivot = stats.max_pivot.max(pivot_abs);

        let pivot = work.m[col][col];
        let inv_pivot = 1.0 / pivot;
        for j in 0..n {
            work.m[col][j] *= inv_pivot;
            inv.m[col][j] *= inv_pivot;
        }

        for row in 0..n {
            if row == col {
                continue;
            }
            let factor = work.m[row][col];
            if factor == 0.0 {
                continue;
            }
            for j in 0..n {
                work.m[row][j] -= factor * work.m[col][j];
                inv.m[row][j] -= factor * inv.m[col][j];
            }
        }
    }

    Ok((inv, stats))
}

/// Closed-form 2×2 inverse; falls back to the same failure contract as the
/// elimination routine when the determinant is below `eps`.
pub fn invert_2x2(a: &SmallMat, eps: f64) -> Result<(SmallMat, PivotStats), PhysicsError> {
    debug_assert_eq!(a.n, 2);
    let (a11, a12) = (a.m[0][0], a.m[0][1]);
    let (a21, a22) = (a.m[1][0], a.m[1][1]);
    let det = a11 * a22 - a12 * a21;
    if det.abs() < eps {
        return Err(PhysicsError::SingularMatrix {
            pivot: det.abs(),
            column: 1,
        });
    }
    let inv_det = 1.0 / det;
    let mut inv = SmallMat::zero(2);
    inv.m[0][0] = a22 * inv_det;
    inv.m[0][1] = -a12 * inv_det;
    inv.m[1][0] = -a21 * inv_det;
    inv.m[1][1] = a11 * inv_det;

    let p0 = a11.abs().max(a21.abs());
    let p1 = (det / if p0 == 0.0 { 1.0 } else { p0 }).abs();
    Ok((
        inv,
        PivotStats {
            min_pivot: p0.min(p1),
            max_pivot: p0.max(p1),
        },
    ))
}

/// Gershgorin-style condition bound.
///
/// `max over rows (|diag| + off-sum)` divided by `min over rows (|diag| -
/// off-sum)`, both floored at a small epsilon. Cheap, row-local, and
/// pessimistic; pairs with the spectral estimate as the second opinion.
#[must_use]
pub fn gershgorin_condition_bound(a: &SmallMat) -> f64 {
    let n = a.n;
    if n == 0 {
        return 1.0;
    }
    let mut upper: f64 = 0.0;
    let mut lower = f64::INFINITY;
    for i in 0..n {
        let diag = a.m[i][i].abs();
        let mut off = 0.0;
        for j in 0..n {
            if j != i {
                off += a.m[i][j].abs();
            }
        }
        upper = upper.max(diag + off);
        lower = lower.min(diag - off);
    }
    upper.max(CONDITION_EPS) / lower.max(CONDITION_EPS)
}

/// Eigenvalue bounds of a symmetric matrix via cyclic Jacobi rotation.
///
/// Runs at most [`JACOBI_MAX_SWEEPS`] sweeps, stopping once the largest
/// off-diagonal magnitude drops below [`JACOBI_TOLERANCE`]. Returns the
/// smallest and largest absolute eigenvalue.
#[must_use]
pub fn jacobi_eigen_range(a: &SmallMat) -> (f64, f64) {
    let n = a.n;
    if n == 0 {
        return (0.0, 0.0);
    }
    let mut work = *a;

    for _ in 0..JACOBI_MAX_SWEEPS {
        // Largest off-diagonal magnitude decides convergence.
        let mut off_max: f64 = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off_max = off_max.max(work.m[i][j].abs());
            }
        }
        if off_max < JACOBI_TOLERANCE {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                let apq = work.m[p][q];
                if apq.abs() < JACOBI_TOLERANCE {
                    continue;
                }
                let app = work.m[p][p];
                let aqq = work.m[q][q];
                let theta = 0.5 * (aqq - app) / apq;
                // Stable tangent of the rotation angle.
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let akp = work.m[k][p];
                    let akq = work.m[k][q];
                    work.m[k][p] = c * akp - s * akq;
                    work.m[k][q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = work.m[p][k];
                    let aqk = work.m[q][k];
                    work.m[p][k] = c * apk - s * aqk;
                    work.m[q][k] = s * apk + c * aqk;
                }
            }
        }
    }

    let mut min_abs = f64::INFINITY;
    let mut max_abs: f64 = 0.0;
    for i in 0..n {
        let ev = work.m[i][i].abs();
        min_abs = min_abs.min(ev);
        max_abs = max_abs.max(ev);
    }
    (min_abs, max_abs)
}

/// Spectral condition estimate: `max |λ| / min |λ|`, floored.
#[must_use]
pub fn spectral_condition_estimate(a: &SmallMat) -> f64 {
    let (min_abs, max_abs) = jacobi_eigen_range(a);
    max_abs.max(CONDITION_EPS) / min_abs.max(CONDITION_EPS)
}
