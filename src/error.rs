use thiserror::Error;

/// Systemic failure that abandons the whole generation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenError {
    #[error("block nesting depth {depth} exceeds limit {limit}")]
    DepthExceeded { depth: usize, limit: usize },
    #[error("expression depth {depth} exceeds limit {limit}")]
    ExprDepthExceeded { depth: usize, limit: usize },
    #[error("loop facts did not stabilize after {iterations} iterations")]
    FixedPointDiverged { iterations: usize },
    #[error("revisit of `{func}` nested {depth} calls deep")]
    RevisitDepthExceeded { func: String, depth: usize },
}

/// The choice being visited is illegal; try another one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected;

pub type VisitResult<T> = Result<T, Rejected>;
