//! Error types for mapped-file operations.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("file {0} was never initialized and cannot be opened read-only")]
    Uninitialized(PathBuf),

    #[error("invalid file header in {path}: {details}")]
    InvalidHeader { path: PathBuf, details: String },

    #[error("file is mapped read-only")]
    ReadOnly,

    #[error("range [{offset}, +{len}) lies beyond the mapped region of {mapped} bytes")]
    OutOfBounds { offset: u64, len: u64, mapped: u64 },

    #[error("range [{offset}, +{len}) straddles an extent boundary (extent size {extent_size})")]
    StraddlesExtent { offset: u64, len: u64, extent_size: u64 },
}

pub type Result<T> = std::result::Result<T, StorageError>;
