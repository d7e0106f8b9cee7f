use std::fmt;

/// Identifies which caller-supplied oracle broke its contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Oracle {
    Objective,
    Projection,
}

impl fmt::Display for Oracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Oracle::Objective => f.write_str("objective gradient"),
            Oracle::Projection => f.write_str("projection"),
        }
    }
}

/// Fatal conditions that abort a run.
///
/// Everything recoverable (illegal trial values, rejected curvature pairs,
/// a failed line search, exhausted budgets) is absorbed by the solvers and
/// reported through [`crate::Status`] instead.
#[derive(Debug, thiserror::Error)]
pub enum PqnError {
    #[error("The {oracle} returned a vector of length {found}, expected {expected}.")]
    DimensionMismatch {
        oracle: Oracle,
        expected: usize,
        found: usize,
    },
    #[error("The starting point is empty; there is nothing to optimize.")]
    EmptyStartingPoint,
    #[error("Invalid option `{name}`: {reason}")]
    InvalidOption { name: &'static str, reason: String },
}

pub type PqnResult<T> = Result<T, PqnError>;
