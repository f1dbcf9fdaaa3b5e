use std::io;

use thiserror::Error;

use super::PageId;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Bad database file format: magic mismatch (found {0:#010x})")]
    BadFormat(u32),

    #[error("Page ID out of range: {page_id} (page count {page_count})")]
    OutOfRange { page_id: PageId, page_count: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid page size: expected {expected}, got {actual}")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Buffer pool is full")]
    BufferPoolFull,
}

pub type FileResult<T> = Result<T, FileError>;
