use crate::wire::CodecError;
use dframe_columnar::{ColumnType, FrameError};

pub type EngineResult<T> = Result<T, EngineError>;

/// A failure raised while processing one chunk (or one node's replica) of a job.
///
/// Task errors never escape on their own: the runtime wraps the first one in
/// [`EngineError::Distributed`] and abandons the rest of the job.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum TaskError {
    #[error("group value {value} in column {column} (row {row}) does not fit a 32-bit key")]
    KeyDomainOverflow {
        column: String,
        row: usize,
        value: f64,
    },

    #[error("group value {value} in column {column} (row {row}) is not a whole number")]
    NonIntegralGroupValue {
        column: String,
        row: usize,
        value: f64,
    },

    #[error("chunk {chunk} of {frame} has no rows in the frame layout")]
    MissingChunk { frame: String, chunk: usize },

    #[error("transport failed: {0}")]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Fatal job failure. No partial result survives it.
    #[error("distributed task failed on node {node}{}: {source}", chunk_suffix(.chunk))]
    Distributed {
        node: usize,
        chunk: Option<usize>,
        #[source]
        source: TaskError,
    },

    #[error("unsupported column {frame}[{column}]: expected {expected}, found {actual}")]
    UnsupportedColumn {
        frame: String,
        column: String,
        expected: &'static str,
        actual: ColumnType,
    },

    #[error("join key arity mismatch: left has {left} key columns, right has {right}")]
    KeyArityMismatch { left: usize, right: usize },

    #[error("at least one key column is required")]
    EmptyKey,

    #[error("join group columns must be set on both sides or neither (left {left:?}, right {right:?})")]
    GroupMismatch {
        left: Option<usize>,
        right: Option<usize>,
    },

    #[error("invalid cluster configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl EngineError {
    /// The node-local failure behind a [`EngineError::Distributed`] error.
    pub fn task_error(&self) -> Option<&TaskError> {
        match self {
            EngineError::Distributed { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn chunk_suffix(chunk: &Option<usize>) -> String {
    match chunk {
        Some(chunk) => format!(", chunk {chunk}"),
        None => String::new(),
    }
}
