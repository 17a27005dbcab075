use crate::types::ColumnType;

pub type FrameResult<T> = Result<T, FrameError>;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum FrameError {
    #[error("schema mismatch for {frame}: expected {expected} values, got {actual}")]
    SchemaMismatch {
        frame: String,
        expected: usize,
        actual: usize,
    },

    #[error("duplicate column {frame}[{column}]")]
    DuplicateColumn { frame: String, column: String },

    #[error("column index {index} out of bounds for {frame} ({count} columns)")]
    ColumnOutOfBounds {
        frame: String,
        index: usize,
        count: usize,
    },

    #[error("column length mismatch for {frame}[{column}]: expected {expected} values, got {actual}")]
    ColumnLengthMismatch {
        frame: String,
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("chunk layout mismatch for {frame}: layout covers {expected} rows, got {actual}")]
    ChunkLayoutMismatch {
        frame: String,
        expected: usize,
        actual: usize,
    },

    #[error("type mismatch for {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        column: String,
        expected: ColumnType,
        actual: &'static str,
    },

    #[error("domain of {column} exceeds {max} levels")]
    DomainOverflow { column: String, max: u64 },

    #[error("categorical code {code} out of range for {column} ({levels} levels)")]
    InvalidCode {
        column: String,
        code: u32,
        levels: usize,
    },

    #[error("validity bitmap for {column} covers {actual} rows, chunk has {expected}")]
    ValidityMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    #[error("validity bitmap of {bits} bits does not fit {words} words")]
    InvalidBitmap { bits: usize, words: usize },

    #[error("chunk sizes overflow the row count")]
    RowCountOverflow,

    #[error("duplicate level {level:?} in domain")]
    DuplicateLevel { level: String },
}
