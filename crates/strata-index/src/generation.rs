//! Versioned snapshots of the key directory.

use strata_mmap::MappedFile;

use crate::error::Result;

/// Bytes of metadata preceding a generation's key entries: the size of the
/// entry region, then the exclusive upper bound of all row ids in it.
pub(crate) const GENERATION_HEADER: u64 = 16;

/// One version of the key directory.
///
/// `offset` addresses the generation's metadata in the key file; the entry
/// region follows it. A generation is mutated only between its creation and
/// its publication; once the directory header points at it, its bytes are
/// final and readers may hold its offset indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Generation {
    /// Metadata offset in the key file; doubles as the pin address handed to
    /// readers.
    pub offset: u64,
    /// Size of the key-entry region covered by this generation.
    pub key_block_size: u64,
    /// Largest row id recorded, plus one.
    pub max_value: u64,
}

impl Generation {
    /// Reads generation metadata from `kdata` at `offset`.
    pub fn load(kdata: &MappedFile, offset: u64) -> Result<Self> {
        Ok(Self {
            offset,
            key_block_size: kdata.read_u64(offset)?,
            max_value: kdata.read_u64(offset + 8)?,
        })
    }

    /// Writes this generation's metadata back to `kdata`.
    pub fn store(&self, kdata: &mut MappedFile) -> Result<()> {
        kdata.write_u64(self.offset, self.key_block_size)?;
        kdata.write_u64(self.offset + 8, self.max_value)?;
        Ok(())
    }

    /// Offset of the first key entry.
    pub fn entries_offset(&self) -> u64 {
        self.offset + GENERATION_HEADER
    }

    /// End of the key-entry region.
    pub fn entries_end(&self) -> u64 {
        self.entries_offset() + self.key_block_size
    }
}
