use thiserror::Error;

/// Errors raised by the vector index and its persistence layer.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("dimension mismatch: index has {expected} dims, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("length mismatch: {vectors} vectors for {ids} ids")]
    LengthMismatch { vectors: usize, ids: usize },

    #[error("id {0} is already present in the index")]
    DuplicateId(i64),

    #[error("graph index full: capacity {capacity}, attempted to hold {requested}")]
    CapacityExceeded { capacity: usize, requested: usize },

    #[error("corrupt index data in {path}: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("index I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("index metadata error: {0}")]
    Meta(#[from] serde_json::Error),
}

impl IndexError {
    pub(crate) fn corrupt(path: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        IndexError::Corrupt {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}
