//! Solver Error Types
//!
//! Unified error type for the constraint solver. Fallible operations return
//! `Result<T, PhysicsError>`; routines that are safe to call speculatively
//! (solve stages on missing bodies, out-of-range handles in hot loops) are
//! defensive no-ops instead and never construct an error.

use thiserror::Error;

/// Unified error type for solver operations.
#[derive(Clone, Debug, PartialEq, Error)]
pub enum PhysicsError {
    /// Body handle is out of range for the body set passed to the solver.
    #[error("body handle {index} out of range (count={count})")]
    InvalidBodyHandle {
        /// The invalid handle value
        index: usize,
        /// Number of bodies available
        count: usize,
    },

    /// A constraint references state that does not exist.
    #[error("invalid constraint: {reason}")]
    InvalidConstraint {
        /// Human-readable description of the problem
        reason: &'static str,
    },

    /// Equation index outside the coupled constraint's fixed capacity.
    #[error("equation index {index} out of range (max={max})")]
    InvalidEquationIndex {
        /// The invalid index that was provided
        index: usize,
        /// Maximum number of equations
        max: usize,
    },

    /// System matrix is singular or effectively singular at the given pivot.
    #[error("singular system matrix (pivot {pivot:e} below epsilon at column {column})")]
    SingularMatrix {
        /// Magnitude of the offending pivot
        pivot: f64,
        /// Elimination column where the failure occurred
        column: usize,
    },

    /// Workspace growth failed; the enclosing batch/island operation aborts
    /// without mutating shared buffers.
    #[error("allocation failed while growing {resource} to {requested} entries")]
    AllocationFailed {
        /// What buffer could not grow
        resource: &'static str,
        /// Requested capacity
        requested: usize,
    },

    /// Invalid configuration parameter.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration {
        /// Description of the invalid configuration
        reason: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = PhysicsError::InvalidBodyHandle { index: 9, count: 3 };
        assert_eq!(e.to_string(), "body handle 9 out of range (count=3)");

        let e = PhysicsError::AllocationFailed {
            resource: "island buckets",
            requested: 128,
        };
        assert!(e.to_string().contains("island buckets"));

        let e = PhysicsError::SingularMatrix {
            pivot: 1e-14,
            column: 2,
        };
        assert!(e.to_string().contains("column 2"));
    }
}
