//! Error types for key index operations.

use std::io;
use std::path::PathBuf;
use strata_mmap::StorageError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("cannot open uninitialized index {0} read-only")]
    Uninitialized(PathBuf),

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("key {0} has no indexed values")]
    KeyNotFound(u32),

    #[error("value index {index} out of bounds for {count} values")]
    OutOfBounds { index: u64, count: u64 },
}

pub type Result<T> = std::result::Result<T, IndexError>;
