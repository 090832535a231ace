use thiserror::Error;

use layex_core::{CellId, DatabaseError};

/// Failures that stop the conversion of a whole cell.
///
/// Problems with individual features are not errors; they are recorded in
/// the cell's [`IssueLog`](crate::issue::IssueLog) and extraction goes on.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("cell {0} is not in the database")]
    UnknownCell(CellId),

    #[error("invalid cell expansion pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("technology '{0}' has no usable layers")]
    EmptyTechnology(String),

    #[error("extraction of cell '{cell}' was cancelled")]
    Cancelled { cell: String },

    #[error("cell '{0}' instantiates itself")]
    RecursiveHierarchy(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
