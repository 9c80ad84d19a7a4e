//! Persistent inverted key index for strata journals.
//!
//! A [`KvIndex`] maps dense integer keys (interned symbol codes) to the
//! append-ordered list of row ids recorded against each key. It is built for
//! single-writer, multiple-snapshot-reader use: one thread appends with
//! [`KvIndex::add`] and publishes with [`KvIndex::commit`], while readers pin
//! a published generation and traverse row chains in either direction with no
//! locking. Committed bytes are never mutated in place, so a pinned
//! generation stays valid for as long as a reader holds it.
//!
//! ```no_run
//! use strata_index::{IndexOptions, KvIndex};
//!
//! # fn main() -> strata_index::Result<()> {
//! let mut index = KvIndex::open("/tmp/journal/sym", &IndexOptions::default())?;
//! index.add(3, 100)?;
//! index.add(3, 205)?;
//! index.commit()?;
//!
//! for row in index.fwd_cursor(3)? {
//!     println!("row {}", row?);
//! }
//! # Ok(())
//! # }
//! ```

pub mod cursor;
pub mod error;
mod generation;
pub mod index;
mod options;

pub use cursor::{FwdCursor, RevCursor};
pub use error::{IndexError, Result};
pub use index::KvIndex;
pub use options::IndexOptions;
pub use strata_mmap::AccessMode;
