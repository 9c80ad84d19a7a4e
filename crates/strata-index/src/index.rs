//! The inverted key index.
//!
//! A [`KvIndex`] is backed by two extent-mapped files.
//!
//! `<base>.k`: key directory. Header, then one or more generations, each a
//! 16-byte metadata record followed by a dense array of 32-byte key entries
//! (all integers little-endian):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 8    | Row-block length, fixed at creation |
//! | 0x08   | 8    | Metadata offset of the published generation |
//! | 0x10   | ...  | First generation |
//!
//! The entry for `key` sits `(key + 1) * 32` bytes into a generation's entry
//! region; the first 32 bytes are reserved. Each entry:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 8    | Offset of the newest (tail) row block, 0 when empty |
//! | 0x08   | 8    | Row count |
//! | 0x10   | 8    | Offset of the oldest (head) row block, written once |
//! | 0x18   | 8    | Reserved |
//!
//! `<base>.r`: row blocks, packed back to back with no file-level framing.
//! Each block is `row_block_len * 8 + 16` bytes: the row-id slots, then the
//! forward link, then the backward link. Block offsets point one past the
//! block's end so that 0 stays free as the "no block" sentinel, and a block
//! is never moved or freed once allocated.
//!
//! Writes mutate only the current, unpublished generation; a commit publishes
//! it by advancing the directory header. Readers that pinned an earlier
//! generation keep seeing its bytes unchanged.

use byteorder::{ByteOrder, LittleEndian};
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use strata_mmap::{AccessMode, MappedFile, StorageError};
use tracing::{debug, trace};

use crate::cursor::{FwdCursor, RevCursor};
use crate::error::{IndexError, Result};
use crate::generation::{GENERATION_HEADER, Generation};
use crate::options::IndexOptions;

/// Size of one key directory entry.
const ENTRY_SIZE: u64 = 32;
const ENTRY_TAIL: u64 = 0;
const ENTRY_COUNT: u64 = 8;
const ENTRY_HEAD: u64 = 16;

/// Key-file header fields.
const ROW_BLOCK_LEN_OFFSET: u64 = 0;
const PUBLISHED_GENERATION_OFFSET: u64 = 8;
/// Metadata offset of the generation created together with the file.
const FIRST_GENERATION_OFFSET: u64 = 16;

/// Extent granule of the key file; entry field reads stay 8-byte sized, so a
/// multiple of the entry size is more than enough.
const KEY_FILE_GRANULE: u64 = ENTRY_SIZE;

/// A key's chain descriptor, decoded from its directory entry.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeyEntry {
    pub tail: u64,
    pub count: u64,
    pub head: u64,
}

/// Persistent map from dense integer keys to append-ordered row-id lists.
#[derive(Debug)]
pub struct KvIndex {
    kdata: MappedFile,
    rdata: MappedFile,
    base: PathBuf,
    mode: AccessMode,
    row_block_len: u64,
    row_block_size: u64,
    mask: u64,
    bits: u32,
    generation: Generation,
    tx_open: bool,
}

impl KvIndex {
    /// Opens the index rooted at `base`, creating `<base>.k` and `<base>.r`
    /// in an append mode.
    ///
    /// Fails with [`IndexError::Uninitialized`] when `base` names an index
    /// that was never written and the mode forbids creation.
    pub fn open(base: impl AsRef<Path>, options: &IndexOptions) -> Result<Self> {
        let base = base.as_ref();
        let key_count = options.key_count_hint.max(1);
        let tx_count = options.tx_count_hint.max(1);

        let k_hint = (key_count + 1) * ENTRY_SIZE * tx_count;
        let mut kdata = match MappedFile::open(
            component_path(base, ".k"),
            options.mode,
            k_hint,
            KEY_FILE_GRANULE,
        ) {
            Ok(file) => file,
            Err(StorageError::Uninitialized(_)) => {
                return Err(IndexError::Uninitialized(base.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        let (row_block_len, generation) = if kdata.append_offset() > 0 {
            let len = kdata.read_u64(ROW_BLOCK_LEN_OFFSET)?;
            if len == 0 || !len.is_power_of_two() {
                return Err(IndexError::Corrupt(format!(
                    "row-block length {len} is not a power of two"
                )));
            }
            let offset = match options.tx_address {
                Some(address) => address,
                None => kdata.read_u64(PUBLISHED_GENERATION_OFFSET)?,
            };
            (len, Generation::load(&kdata, offset)?)
        } else if options.mode.is_writable() {
            let rows_per_key = (options.record_count_hint / key_count).max(1);
            let len = rows_per_key.next_power_of_two();
            let generation =
                Generation { offset: FIRST_GENERATION_OFFSET, key_block_size: 0, max_value: 0 };
            kdata.write_u64(ROW_BLOCK_LEN_OFFSET, len)?;
            kdata.write_u64(PUBLISHED_GENERATION_OFFSET, generation.offset)?;
            generation.store(&mut kdata)?;
            kdata.set_append_offset(FIRST_GENERATION_OFFSET + GENERATION_HEADER)?;
            debug!(base = %base.display(), row_block_len = len, "created kv index");
            (len, generation)
        } else {
            return Err(IndexError::Uninitialized(base.to_path_buf()));
        };

        let row_block_size = row_block_len * 8 + 16;
        let rdata = match MappedFile::open(
            component_path(base, ".r"),
            options.mode,
            row_block_size * key_count,
            row_block_size,
        ) {
            Ok(file) => file,
            Err(StorageError::Uninitialized(_)) => {
                return Err(IndexError::Uninitialized(base.to_path_buf()));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            kdata,
            rdata,
            base: base.to_path_buf(),
            mode: options.mode,
            row_block_len,
            row_block_size,
            mask: row_block_len - 1,
            bits: row_block_len.trailing_zeros(),
            generation,
            tx_open: false,
        })
    }

    /// Removes both backing files of the index rooted at `base`.
    pub fn delete(base: impl AsRef<Path>) -> Result<()> {
        let base = base.as_ref();
        for suffix in [".k", ".r"] {
            let path = component_path(base, suffix);
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "deleted index file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// Appends `row_id` as the newest value for `key`.
    ///
    /// Values are stored in call order per key; nothing requires them to be
    /// numerically sorted. The first `add` after construction or after a
    /// [`commit`](Self::commit) snapshots the key directory into a fresh
    /// generation, which stays invisible to readers until the next commit.
    pub fn add(&mut self, key: u32, row_id: u64) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(IndexError::Storage(StorageError::ReadOnly));
        }
        if !self.tx_open {
            self.begin_tx()?;
        }

        let key_offset = self.key_offset(key);
        let entries_end = self.generation.entries_end();
        if key_offset >= entries_end {
            // Extending over keys that were never written: the space past the
            // old end may hold bytes from an abandoned transaction, so the
            // skipped entries and the new entry are zeroed before first use.
            self.generation.key_block_size =
                key_offset + ENTRY_SIZE - self.generation.entries_offset();
            self.kdata
                .zero_range(entries_end, self.generation.entries_end() - entries_end)?;
        }

        let tail = self.kdata.read_u64(key_offset + ENTRY_TAIL)?;
        let count = self.kdata.read_u64(key_offset + ENTRY_COUNT)?;
        let cell = count & self.mask;
        let tail = if tail == 0 || cell == 0 {
            self.allocate_row_block(key_offset, tail)?
        } else {
            tail
        };

        let start = self.block_start(tail)?;
        self.rdata.write_u64(start + cell * 8, row_id)?;
        self.kdata.write_u64(key_offset + ENTRY_COUNT, count + 1)?;

        if self.generation.max_value <= row_id {
            self.generation.max_value = row_id + 1;
        }
        Ok(())
    }

    /// Publishes the current generation, making everything added since the
    /// previous commit visible to readers that track the latest state.
    ///
    /// No-op when nothing was added.
    pub fn commit(&mut self) -> Result<()> {
        if !self.tx_open {
            return Ok(());
        }
        self.publish()?;
        self.tx_open = false;
        debug!(
            base = %self.base.display(),
            generation = self.generation.offset,
            max_value = self.generation.max_value,
            "committed"
        );
        Ok(())
    }

    /// Rolls the index back so that no stored row id is `>= size`.
    ///
    /// Walks every key's chain from the tail, unlinking whole blocks where
    /// possible. Discarded bytes stay on disk; only chain pointers and counts
    /// change. Finishes by publishing the adjusted state.
    pub fn truncate(&mut self, size: u64) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(IndexError::Storage(StorageError::ReadOnly));
        }
        let mut max_value = 0u64;
        let mut offset = self.generation.entries_offset();
        let end = self.generation.entries_end();
        while offset < end {
            let mut tail = self.kdata.read_u64(offset + ENTRY_TAIL)?;
            let mut count = self.kdata.read_u64(offset + ENTRY_COUNT)?;
            let mut len = count & self.mask;
            if len == 0 {
                len = self.row_block_len;
            }
            while tail != 0 {
                let start = self.block_start(tail)?;
                let mut kept = 0u64;
                while kept < len {
                    let value = self.rdata.read_u64(start + kept * 8)?;
                    if value >= size {
                        break;
                    }
                    if value >= max_value {
                        max_value = value + 1;
                    }
                    kept += 1;
                }
                if kept == 0 {
                    // Whole block is above the limit; its predecessor becomes
                    // the logical tail.
                    tail = self.rdata.read_u64(start + self.row_block_len * 8 + 8)?;
                    count -= len;
                    len = self.row_block_len;
                } else {
                    count -= len - kept;
                    break;
                }
            }
            self.kdata.write_u64(offset + ENTRY_TAIL, tail)?;
            self.kdata.write_u64(offset + ENTRY_COUNT, count)?;
            offset += ENTRY_SIZE;
        }

        self.generation.max_value = max_value;
        // Metadata goes to disk even when no transaction was open, otherwise
        // the recomputed maximum would only live in memory.
        self.publish()?;
        self.tx_open = false;
        debug!(base = %self.base.display(), size, max_value, "truncated");
        Ok(())
    }

    /// True if `key` has at least one value.
    pub fn contains(&self, key: u32) -> Result<bool> {
        Ok(self.value_count(key)? > 0)
    }

    /// Number of values recorded for `key`; 0 for keys the index has never
    /// seen.
    pub fn value_count(&self, key: u32) -> Result<u64> {
        Ok(self.entry(key)?.map_or(0, |entry| entry.count))
    }

    /// The `i`-th value of `key` in insertion order.
    ///
    /// Reached by walking block links from the tail, so access close to the
    /// newest values is fast and degrades the further `i` lies from the end;
    /// prefer [`values`](Self::values) or a cursor for bulk reads.
    pub fn value_at(&self, key: u32, i: u64) -> Result<u64> {
        let entry = self.entry(key)?.ok_or(IndexError::KeyNotFound(key))?;
        if i >= entry.count {
            return Err(IndexError::OutOfBounds { index: i, count: entry.count });
        }

        let mut block_count = (entry.count >> self.bits) + 1;
        if entry.count & self.mask == 0 {
            block_count -= 1;
        }
        let target = i >> self.bits;
        let mut block = entry.tail;
        for _ in target + 1..block_count {
            block = self.prev_link(block)?;
            if block == 0 {
                return Err(IndexError::Corrupt(format!(
                    "row count of key {key} exceeds its block chain"
                )));
            }
        }
        self.read_slot(block, i & self.mask)
    }

    /// The newest value of `key`.
    ///
    /// Callers are expected to check [`contains`](Self::contains) first; a
    /// key with no values fails with [`IndexError::KeyNotFound`].
    pub fn last_value(&self, key: u32) -> Result<u64> {
        let entry = self.entry(key)?.ok_or(IndexError::KeyNotFound(key))?;
        if entry.count == 0 {
            return Err(IndexError::KeyNotFound(key));
        }
        self.read_slot(entry.tail, (entry.count - 1) & self.mask)
    }

    /// All values of `key` in insertion order.
    pub fn values(&self, key: u32) -> Result<Vec<u64>> {
        let mut out = Vec::new();
        self.values_into(key, &mut out)?;
        Ok(out)
    }

    /// Fills `out` with all values of `key` in insertion order, reusing the
    /// buffer's capacity. Keys without values leave `out` empty.
    ///
    /// Blocks are visited from the tail backward and written back to front,
    /// which touches each block exactly once.
    pub fn values_into(&self, key: u32, out: &mut Vec<u64>) -> Result<()> {
        out.clear();
        let Some(entry) = self.entry(key)? else {
            return Ok(());
        };
        if entry.count == 0 {
            return Ok(());
        }
        out.resize(entry.count as usize, 0);

        let mut block_count = entry.count >> self.bits;
        let mut len = entry.count & self.mask;
        if len == 0 {
            len = self.row_block_len;
        } else {
            block_count += 1;
        }

        let mut block = entry.tail;
        for i in (0..block_count).rev() {
            let start = self.block_start(block)?;
            let bytes = self.rdata.get(start, self.row_block_size)?;
            let base = (i << self.bits) as usize;
            for cell in 0..len as usize {
                out[base + cell] = LittleEndian::read_u64(&bytes[cell * 8..cell * 8 + 8]);
            }
            if i > 0 {
                let link_at = self.row_block_len as usize * 8 + 8;
                block = LittleEndian::read_u64(&bytes[link_at..link_at + 8]);
                if block == 0 {
                    return Err(IndexError::Corrupt(format!(
                        "row count of key {key} exceeds its block chain"
                    )));
                }
            }
            len = self.row_block_len;
        }
        Ok(())
    }

    /// A cursor over `key`'s values, newest first.
    ///
    /// The fastest way to read the most recent values: it only visits as many
    /// blocks as values consumed.
    pub fn cursor(&self, key: u32) -> Result<RevCursor<'_>> {
        RevCursor::new(self, key)
    }

    /// A cursor over `key`'s values, oldest first; suited to full scans.
    pub fn fwd_cursor(&self, key: u32) -> Result<FwdCursor<'_>> {
        FwdCursor::new(self, key)
    }

    /// One past the largest row id present, or 0 when the index is empty.
    ///
    /// Keeps the index in the same unit of measure as the column it indexes.
    pub fn size(&self) -> u64 {
        self.generation.max_value
    }

    /// Rows per block, fixed when the index was created.
    pub fn row_block_len(&self) -> u64 {
        self.row_block_len
    }

    /// Address of the generation this instance currently reads, suitable for
    /// pinning another instance to the same snapshot.
    pub fn tx_address(&self) -> u64 {
        self.generation.offset
    }

    /// Re-points this instance at a generation.
    ///
    /// `Some(address)` pins the snapshot published at `address`; `None`
    /// switches back to tracking the latest published generation via
    /// [`refresh`](Self::refresh).
    pub fn set_tx_address(&mut self, address: Option<u64>) -> Result<()> {
        match address {
            None => self.refresh(),
            Some(offset) => {
                self.kdata.refresh()?;
                self.rdata.refresh()?;
                self.generation = Generation::load(&self.kdata, offset)?;
                Ok(())
            }
        }
    }

    /// Commits any open transaction, then reloads the latest published
    /// generation, remapping the backing files if a writer grew them.
    pub fn refresh(&mut self) -> Result<()> {
        self.commit()?;
        self.kdata.refresh()?;
        self.rdata.refresh()?;
        let offset = self.kdata.read_u64(PUBLISHED_GENERATION_OFFSET)?;
        self.generation = Generation::load(&self.kdata, offset)?;
        Ok(())
    }

    /// Flushes the key file's mapped pages.
    pub fn force(&self) -> Result<()> {
        self.kdata.force()?;
        Ok(())
    }

    /// Removes allocation slack from both backing files.
    pub fn compact(&mut self) -> Result<()> {
        if self.tx_open {
            // Key-file slack above the open generation is still live.
            self.rdata.compact()?;
            return Ok(());
        }
        self.kdata.compact()?;
        self.rdata.compact()?;
        Ok(())
    }

    /// Flushes and closes both backing files. An uncommitted transaction is
    /// discarded, exactly as if the process had stopped without committing.
    pub fn close(self) -> Result<()> {
        self.rdata.close()?;
        self.kdata.close()?;
        Ok(())
    }

    /// Copies the live key-entry region to the current append offset; the
    /// copy becomes the new, unpublished generation.
    fn begin_tx(&mut self) -> Result<()> {
        let src = self.kdata.read_u64(PUBLISHED_GENERATION_OFFSET)?;
        let dst = self.kdata.append_offset();
        self.kdata
            .copy_within(src, dst, GENERATION_HEADER + self.generation.key_block_size)?;
        trace!(
            src,
            dst,
            key_block_size = self.generation.key_block_size,
            "snapshotted key directory"
        );
        self.generation.offset = dst;
        self.tx_open = true;
        Ok(())
    }

    fn publish(&mut self) -> Result<()> {
        self.generation.store(&mut self.kdata)?;
        self.kdata.set_append_offset(self.generation.entries_end())?;
        self.kdata
            .write_u64(PUBLISHED_GENERATION_OFFSET, self.generation.offset)?;
        Ok(())
    }

    /// Appends a block to the row file and links it as `key`'s new tail.
    fn allocate_row_block(&mut self, key_offset: u64, prev: u64) -> Result<u64> {
        let block = self.rdata.append_offset() + self.row_block_size;
        self.rdata.set_append_offset(block)?;
        // Fresh space may hold stale bytes from an abandoned transaction;
        // the forward link must read as "none" until a successor exists.
        self.rdata.write_u64(block - 16, 0)?;
        self.rdata.write_u64(block - 8, prev)?;
        self.kdata.write_u64(key_offset + ENTRY_TAIL, block)?;
        if prev == 0 {
            self.kdata.write_u64(key_offset + ENTRY_HEAD, block)?;
        } else {
            self.rdata.write_u64(prev - 16, block)?;
        }
        trace!(block, prev, "allocated row block");
        Ok(block)
    }

    fn key_offset(&self, key: u32) -> u64 {
        self.generation.entries_offset() + (u64::from(key) + 1) * ENTRY_SIZE
    }

    /// Decodes `key`'s directory entry, or `None` when `key` lies outside the
    /// region this generation covers.
    pub(crate) fn entry(&self, key: u32) -> Result<Option<KeyEntry>> {
        let offset = self.key_offset(key);
        if offset >= self.generation.entries_end() {
            return Ok(None);
        }
        Ok(Some(KeyEntry {
            tail: self.kdata.read_u64(offset + ENTRY_TAIL)?,
            count: self.kdata.read_u64(offset + ENTRY_COUNT)?,
            head: self.kdata.read_u64(offset + ENTRY_HEAD)?,
        }))
    }

    /// Start offset of the block whose end offset is `block`.
    pub(crate) fn block_start(&self, block: u64) -> Result<u64> {
        if block < self.row_block_size {
            return Err(IndexError::Corrupt(format!(
                "block link {block} shorter than one row block"
            )));
        }
        Ok(block - self.row_block_size)
    }

    pub(crate) fn read_slot(&self, block: u64, cell: u64) -> Result<u64> {
        let start = self.block_start(block)?;
        Ok(self.rdata.read_u64(start + cell * 8)?)
    }

    pub(crate) fn next_link(&self, block: u64) -> Result<u64> {
        let start = self.block_start(block)?;
        Ok(self.rdata.read_u64(start + self.row_block_len * 8)?)
    }

    pub(crate) fn prev_link(&self, block: u64) -> Result<u64> {
        let start = self.block_start(block)?;
        Ok(self.rdata.read_u64(start + self.row_block_len * 8 + 8)?)
    }

    pub(crate) fn mask(&self) -> u64 {
        self.mask
    }

    pub(crate) fn bits(&self) -> u32 {
        self.bits
    }
}

fn component_path(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.file_name().map_or_else(OsString::new, OsString::from);
    name.push(suffix);
    base.with_file_name(name)
}
