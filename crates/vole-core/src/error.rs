use crate::graph::{OperandIndex, OperationIndex};
use crate::shape::Shape;

/// All errors that can occur within Vole.
///
/// The first five variants follow the engine's error taxonomy: prepare-phase
/// failures (`Configuration`, `UnassignableOperation`, `LoweringInvariant`)
/// are fatal to the session, while run-phase failures (`DynamicShape`,
/// `KernelExecution`) fail only the current execution request and leave the
/// prepared plan valid. The remaining variants are structural errors raised
/// while building or validating graphs and shapes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A backend declared support for an operation its kernel generator
    /// cannot build, or the backend set itself is inconsistent.
    #[error("configuration error: backend '{backend}': {reason}")]
    Configuration { backend: String, reason: String },

    /// No backend in the allow-list supports a required operation.
    #[error("no backend supports operation {op} ({kind})")]
    UnassignableOperation { op: OperationIndex, kind: String },

    /// An operand was left without a resolved backend/layout after lowering.
    /// Indicates an internal bug — this never occurs for a valid schedule.
    #[error("lowering invariant violated: operand {operand} has no resolved backend/layout")]
    LoweringInvariant { operand: OperandIndex },

    /// A dynamic shape could not be resolved, or is incompatible with a
    /// downstream operation. Fails the current run only.
    #[error("dynamic shape error: {0}")]
    DynamicShape(String),

    /// A backend kernel failed during run. Fails the current run only.
    #[error("kernel execution failed: {0}")]
    KernelExecution(String),

    /// Shape mismatch between operands (e.g., adding [2,3] to [4,5]).
    #[error("shape mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: Shape, got: Shape },

    /// Operation requires a specific rank.
    #[error("rank mismatch: expected rank {expected}, got {got}")]
    RankMismatch { expected: usize, got: usize },

    /// Dimension index out of range for the shape's rank.
    #[error("dimension out of range: dim {dim} for rank {rank}")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Element count mismatch when binding host data to a tensor.
    #[error("element count mismatch: shape {shape} holds {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// True for errors that fail only the current run and leave the
    /// prepared session reusable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::DynamicShape(_) | Error::KernelExecution(_))
    }
}

/// Convenience Result type used throughout Vole.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("something went wrong: {}", detail)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}
