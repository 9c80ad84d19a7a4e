//! Growable extent-mapped files for strata's persistent storage.
//!
//! Every on-disk structure in strata sits on top of a [`MappedFile`]: a plain
//! file mapped into memory, addressed as a flat logical byte space that is
//! carved into fixed-size extents. Accessors hand out bounds-checked slices
//! that are guaranteed not to straddle an extent boundary; ranges that may
//! cross one (bulk copies, zero-fill) go through chunked primitives driven by
//! [`MappedFile::extent_remaining`].

mod error;
mod file;

pub use error::{Result, StorageError};
pub use file::{AccessMode, MappedFile};
