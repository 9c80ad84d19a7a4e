//! Construction parameters for a key index.

use strata_mmap::AccessMode;

/// Construction parameters for [`crate::KvIndex::open`].
///
/// The count hints only size files and fix the row-block length when the
/// index is first created; they have no effect on an existing index.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Expected number of distinct keys.
    pub key_count_hint: u64,
    /// Expected total number of indexed rows. Together with
    /// `key_count_hint` this fixes the row-block length at creation time.
    pub record_count_hint: u64,
    /// Expected number of commits over the index's life; sizes the space
    /// reserved for key-directory generations.
    pub tx_count_hint: u64,
    /// How the backing files are opened.
    pub mode: AccessMode,
    /// Pin reads to the generation whose metadata sits at this offset,
    /// instead of tracking the latest published one.
    pub tx_address: Option<u64>,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            key_count_hint: 1024,
            record_count_hint: 65536,
            tx_count_hint: 16,
            mode: AccessMode::Append,
            tx_address: None,
        }
    }
}
