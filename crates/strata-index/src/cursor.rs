//! Read-only traversal over a key's row-block chain.
//!
//! Both cursors borrow the index, so the generation they were created
//! against cannot change underneath them. They yield `Result` items because
//! every step reads mapped storage and a broken chain link is reported as
//! [`IndexError::Corrupt`] rather than followed.

use crate::error::{IndexError, Result};
use crate::index::KvIndex;

/// Walks a key's chain from the tail block backward, newest row first.
///
/// Visits only as many blocks as values consumed, which makes it the cheap
/// path for bounded lookbacks.
pub struct RevCursor<'a> {
    index: &'a KvIndex,
    block: u64,
    remaining_rows: u64,
    remaining_blocks: u64,
    size: u64,
}

impl<'a> RevCursor<'a> {
    pub(crate) fn new(index: &'a KvIndex, key: u32) -> Result<Self> {
        let mut cursor =
            Self { index, block: 0, remaining_rows: 0, remaining_blocks: 0, size: 0 };
        if let Some(entry) = index.entry(key)? {
            cursor.size = entry.count;
            if entry.count > 0 {
                let partial = entry.count & index.mask();
                if partial == 0 {
                    cursor.remaining_blocks = (entry.count >> index.bits()) - 1;
                    cursor.remaining_rows = index.row_block_len();
                } else {
                    cursor.remaining_blocks = entry.count >> index.bits();
                    cursor.remaining_rows = partial;
                }
                cursor.block = entry.tail;
            }
        }
        Ok(cursor)
    }

    /// Total number of rows this cursor yields.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn step(&mut self) -> Result<u64> {
        if self.remaining_rows == 0 {
            self.remaining_blocks -= 1;
            let prev = self.index.prev_link(self.block)?;
            if prev == 0 {
                return Err(IndexError::Corrupt(
                    "backward link missing before the row count is exhausted".into(),
                ));
            }
            self.block = prev;
            self.remaining_rows = self.index.row_block_len();
        }
        self.remaining_rows -= 1;
        self.index.read_slot(self.block, self.remaining_rows)
    }
}

impl Iterator for RevCursor<'_> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining_rows == 0 && self.remaining_blocks == 0 {
            return None;
        }
        match self.step() {
            Ok(value) => Some(Ok(value)),
            Err(e) => {
                self.remaining_rows = 0;
                self.remaining_blocks = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining =
            (self.remaining_rows + self.remaining_blocks * self.index.row_block_len()) as usize;
        (remaining, Some(remaining))
    }
}

/// Walks a key's chain from the head block forward, oldest row first; the
/// path for full scans such as join row enumeration.
pub struct FwdCursor<'a> {
    index: &'a KvIndex,
    block: u64,
    consumed: u64,
    size: u64,
}

impl<'a> FwdCursor<'a> {
    pub(crate) fn new(index: &'a KvIndex, key: u32) -> Result<Self> {
        let mut cursor = Self { index, block: 0, consumed: 0, size: 0 };
        if let Some(entry) = index.entry(key)? {
            if entry.count > 0 {
                cursor.size = entry.count;
                cursor.block = entry.head;
            }
        }
        Ok(cursor)
    }

    /// Total number of rows this cursor yields.
    pub fn size(&self) -> u64 {
        self.size
    }

    fn step(&mut self) -> Result<u64> {
        let cell = self.consumed & self.index.mask();
        let value = self.index.read_slot(self.block, cell)?;
        self.consumed += 1;
        // The tail block's forward link is zero; follow only while rows
        // remain, so a sole block is never walked past.
        if cell == self.index.mask() && self.consumed < self.size {
            let next = self.index.next_link(self.block)?;
            if next == 0 {
                return Err(IndexError::Corrupt(
                    "forward link missing before the row count is exhausted".into(),
                ));
            }
            self.block = next;
        }
        Ok(value)
    }
}

impl Iterator for FwdCursor<'_> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.consumed >= self.size {
            return None;
        }
        match self.step() {
            Ok(value) => Some(Ok(value)),
            Err(e) => {
                self.consumed = self.size;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.size - self.consumed) as usize;
        (remaining, Some(remaining))
    }
}
