use thiserror::Error;

use crate::file::{FileError, PageId, PageKind};

/// Result type for index operations
pub type IndexResult<T> = Result<T, IndexError>;

/// Errors that can occur during index operations
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("File error: {0}")]
    File(#[from] FileError),

    #[error("Invalid node capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Corrupted node: {0}")]
    CorruptedNode(String),

    #[error("Unexpected page kind {kind:?} at page {page_id}")]
    UnexpectedPageKind { page_id: PageId, kind: PageKind },
}
