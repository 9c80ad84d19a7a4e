//! Extent-mapped file implementation.
//!
//! A `MappedFile` owns one file and one memory mapping over it. The first 32
//! bytes are a header belonging to this layer; everything after it is the
//! caller's logical byte space, addressed from logical offset 0.
//!
//! Header layout (32 bytes, all integers little-endian):
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0x00   | 4    | Magic `SMF1` |
//! | 0x04   | 4    | Format version |
//! | 0x08   | 8    | Extent size in bytes |
//! | 0x10   | 8    | Append offset (logical) |
//! | 0x18   | 8    | Reserved |
//!
//! The logical space is carved into extents of the size recorded in the
//! header. A slice returned by [`MappedFile::get`] / [`MappedFile::get_mut`]
//! never straddles an extent boundary; the extent size is rounded up to a
//! multiple of the caller's `granule` at creation so that granule-aligned
//! records of `granule` bytes always satisfy that rule. Ranges that may cross
//! a boundary go through [`MappedFile::copy_within`] and
//! [`MappedFile::zero_range`], which chunk by [`MappedFile::extent_remaining`].
//!
//! The file grows by whole extents on write. Bytes past the append offset are
//! not trusted: they may be stale remains of an abandoned write sequence, and
//! callers zero or overwrite them before reading.

use byteorder::{ByteOrder, LittleEndian};
use memmap2::{Mmap, MmapMut, MmapOptions};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use crate::error::{Result, StorageError};

/// Bytes reserved for the file header before logical offset 0.
const HEADER_LEN: u64 = 32;

const MAGIC: u32 = u32::from_le_bytes(*b"SMF1");
const VERSION: u32 = 1;

const EXTENT_SIZE_FIELD: usize = 0x08;
const APPEND_OFFSET_FIELD: usize = 0x10;

/// Smallest extent this layer will allocate.
const MIN_EXTENT: u64 = 64 * 1024;
/// Largest extent this layer will allocate (before granule rounding).
const MAX_EXTENT: u64 = 128 * 1024 * 1024;

/// Copy buffer for [`MappedFile::copy_within`].
const COPY_BUF: usize = 8192;

/// How a [`MappedFile`] may be accessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read and append; creates the file if it does not exist.
    Append,
    /// Like [`AccessMode::Append`], sized for long sequential ingestion.
    BulkAppend,
    /// Read only; opening a file that was never written fails.
    ReadOnly,
}

impl AccessMode {
    pub fn is_writable(self) -> bool {
        !matches!(self, AccessMode::ReadOnly)
    }
}

#[derive(Debug)]
enum Map {
    Ro(Mmap),
    Rw(MmapMut),
}

impl Map {
    fn bytes(&self) -> &[u8] {
        match self {
            Map::Ro(m) => m,
            Map::Rw(m) => m,
        }
    }

    fn len(&self) -> u64 {
        self.bytes().len() as u64
    }
}

/// A growable file mapped into memory and addressed in fixed-size extents.
#[derive(Debug)]
pub struct MappedFile {
    file: File,
    path: PathBuf,
    mode: AccessMode,
    extent_size: u64,
    append_offset: u64,
    map: Map,
}

impl MappedFile {
    /// Opens or creates the file at `path`.
    ///
    /// `size_hint` is the expected payload size in bytes and only influences
    /// the extent size chosen at creation; `granule` is the caller's record
    /// size, which the extent size is made a multiple of. Reopening an
    /// existing file uses the extent size persisted in its header.
    pub fn open(
        path: impl AsRef<Path>,
        mode: AccessMode,
        size_hint: u64,
        granule: u64,
    ) -> Result<Self> {
        let path = path.as_ref();
        debug_assert!(granule > 0);

        if mode.is_writable() {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)?;
            if file.metadata()?.len() < HEADER_LEN {
                return Self::create(file, path, mode, size_hint, granule);
            }
            let map = unsafe { MmapOptions::new().map_mut(&file)? };
            let (extent_size, append_offset) = parse_header(path, &map, granule)?;
            debug!(
                path = %path.display(),
                extent_size,
                append_offset,
                "opened mapped file for append"
            );
            Ok(Self {
                file,
                path: path.to_path_buf(),
                mode,
                extent_size,
                append_offset,
                map: Map::Rw(map),
            })
        } else {
            let file = File::open(path).map_err(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    StorageError::Uninitialized(path.to_path_buf())
                } else {
                    StorageError::Io(e)
                }
            })?;
            if file.metadata()?.len() < HEADER_LEN {
                return Err(StorageError::Uninitialized(path.to_path_buf()));
            }
            let map = unsafe { MmapOptions::new().map(&file)? };
            let (extent_size, append_offset) = parse_header(path, &map, granule)?;
            debug!(
                path = %path.display(),
                extent_size,
                append_offset,
                "opened mapped file read-only"
            );
            Ok(Self {
                file,
                path: path.to_path_buf(),
                mode,
                extent_size,
                append_offset,
                map: Map::Ro(map),
            })
        }
    }

    fn create(
        file: File,
        path: &Path,
        mode: AccessMode,
        size_hint: u64,
        granule: u64,
    ) -> Result<Self> {
        let extent_size = extent_size_for(size_hint, granule, mode);
        file.set_len(HEADER_LEN)?;
        let mut map = unsafe { MmapOptions::new().map_mut(&file)? };
        LittleEndian::write_u32(&mut map[0x00..0x04], MAGIC);
        LittleEndian::write_u32(&mut map[0x04..0x08], VERSION);
        LittleEndian::write_u64(&mut map[EXTENT_SIZE_FIELD..EXTENT_SIZE_FIELD + 8], extent_size);
        LittleEndian::write_u64(&mut map[APPEND_OFFSET_FIELD..APPEND_OFFSET_FIELD + 8], 0);
        debug!(path = %path.display(), extent_size, "created mapped file");
        Ok(Self {
            file,
            path: path.to_path_buf(),
            mode,
            extent_size,
            append_offset: 0,
            map: Map::Rw(map),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> AccessMode {
        self.mode
    }

    pub fn extent_size(&self) -> u64 {
        self.extent_size
    }

    /// Logical bytes currently mapped.
    pub fn len(&self) -> u64 {
        self.map.len() - HEADER_LEN
    }

    /// True if nothing has ever been appended.
    pub fn is_empty(&self) -> bool {
        self.append_offset == 0
    }

    /// Contiguous bytes left in the extent containing `offset`.
    pub fn extent_remaining(&self, offset: u64) -> u64 {
        self.extent_size - offset % self.extent_size
    }

    /// A read-only slice over `[offset, offset + len)`.
    ///
    /// Fails if the range straddles an extent boundary or lies beyond the
    /// mapped region.
    pub fn get(&self, offset: u64, len: u64) -> Result<&[u8]> {
        self.check_extent(offset, len)?;
        let end = offset
            .checked_add(len)
            .ok_or(StorageError::OutOfBounds { offset, len, mapped: self.len() })?;
        if end > self.len() {
            return Err(StorageError::OutOfBounds { offset, len, mapped: self.len() });
        }
        let start = (HEADER_LEN + offset) as usize;
        Ok(&self.map.bytes()[start..start + len as usize])
    }

    /// A writable slice over `[offset, offset + len)`, growing the file by
    /// whole extents as needed.
    pub fn get_mut(&mut self, offset: u64, len: u64) -> Result<&mut [u8]> {
        if !self.mode.is_writable() {
            return Err(StorageError::ReadOnly);
        }
        self.check_extent(offset, len)?;
        let end = offset
            .checked_add(len)
            .ok_or(StorageError::OutOfBounds { offset, len, mapped: self.len() })?;
        self.ensure_capacity(end)?;
        let start = (HEADER_LEN + offset) as usize;
        match &mut self.map {
            Map::Ro(_) => Err(StorageError::ReadOnly),
            Map::Rw(m) => Ok(&mut m[start..start + len as usize]),
        }
    }

    pub fn read_u64(&self, offset: u64) -> Result<u64> {
        Ok(LittleEndian::read_u64(self.get(offset, 8)?))
    }

    pub fn write_u64(&mut self, offset: u64, value: u64) -> Result<()> {
        LittleEndian::write_u64(self.get_mut(offset, 8)?, value);
        Ok(())
    }

    /// Copies `len` bytes from `src` to `dst` within the file.
    ///
    /// Chunks by the remaining contiguous length of whichever extent runs out
    /// first, so both ranges may straddle any number of extent boundaries.
    /// The ranges must not overlap.
    pub fn copy_within(&mut self, mut src: u64, mut dst: u64, mut len: u64) -> Result<()> {
        let mut buf = [0u8; COPY_BUF];
        while len > 0 {
            let chunk = len
                .min(self.extent_remaining(src))
                .min(self.extent_remaining(dst))
                .min(COPY_BUF as u64);
            let n = chunk as usize;
            buf[..n].copy_from_slice(self.get(src, chunk)?);
            self.get_mut(dst, chunk)?.copy_from_slice(&buf[..n]);
            src += chunk;
            dst += chunk;
            len -= chunk;
        }
        Ok(())
    }

    /// Explicitly zeroes `[offset, offset + len)`, chunking across extents.
    ///
    /// The region past the append offset may hold stale bytes from an
    /// abandoned write sequence, so callers cannot rely on fresh space
    /// reading as zero.
    pub fn zero_range(&mut self, mut offset: u64, mut len: u64) -> Result<()> {
        while len > 0 {
            let chunk = len.min(self.extent_remaining(offset));
            self.get_mut(offset, chunk)?.fill(0);
            offset += chunk;
            len -= chunk;
        }
        Ok(())
    }

    /// The persisted append offset.
    pub fn append_offset(&self) -> u64 {
        self.append_offset
    }

    /// Records a new append offset, written through to the file header.
    pub fn set_append_offset(&mut self, offset: u64) -> Result<()> {
        match &mut self.map {
            Map::Ro(_) => Err(StorageError::ReadOnly),
            Map::Rw(m) => {
                LittleEndian::write_u64(&mut m[APPEND_OFFSET_FIELD..APPEND_OFFSET_FIELD + 8], offset);
                self.append_offset = offset;
                Ok(())
            }
        }
    }

    /// Re-reads the header and remaps to the current file length.
    ///
    /// Lets a read-only instance observe bytes appended by a writer after
    /// this instance was opened.
    pub fn refresh(&mut self) -> Result<()> {
        let file_len = self.file.metadata()?.len();
        if file_len != self.map.len() {
            self.map = match self.mode {
                AccessMode::ReadOnly => Map::Ro(unsafe { MmapOptions::new().map(&self.file)? }),
                _ => Map::Rw(unsafe { MmapOptions::new().map_mut(&self.file)? }),
            };
            trace!(path = %self.path.display(), file_len, "remapped");
        }
        self.append_offset =
            LittleEndian::read_u64(&self.map.bytes()[APPEND_OFFSET_FIELD..APPEND_OFFSET_FIELD + 8]);
        Ok(())
    }

    /// Flushes mapped pages to disk.
    pub fn force(&self) -> Result<()> {
        if let Map::Rw(m) = &self.map {
            m.flush()?;
        }
        Ok(())
    }

    /// Truncates the file back to its append offset, removing extent slack.
    pub fn compact(&mut self) -> Result<()> {
        if !self.mode.is_writable() {
            return Err(StorageError::ReadOnly);
        }
        let target = HEADER_LEN + self.append_offset;
        if self.map.len() <= target {
            return Ok(());
        }
        self.force()?;
        // Shrink the mapping first so the file is not truncated under it.
        let map = unsafe { MmapOptions::new().len(target as usize).map_mut(&self.file)? };
        self.map = Map::Rw(map);
        self.file.set_len(target)?;
        debug!(path = %self.path.display(), len = target, "compacted mapped file");
        Ok(())
    }

    /// Flushes and drops the mapping.
    pub fn close(self) -> Result<()> {
        self.force()
    }

    fn check_extent(&self, offset: u64, len: u64) -> Result<()> {
        if len > self.extent_remaining(offset) {
            return Err(StorageError::StraddlesExtent {
                offset,
                len,
                extent_size: self.extent_size,
            });
        }
        Ok(())
    }

    fn ensure_capacity(&mut self, end: u64) -> Result<()> {
        if HEADER_LEN + end <= self.map.len() {
            return Ok(());
        }
        let extents = end.div_ceil(self.extent_size);
        let new_len = HEADER_LEN + extents * self.extent_size;
        trace!(path = %self.path.display(), new_len, "growing mapped file");
        self.file.set_len(new_len)?;
        self.map = Map::Rw(unsafe { MmapOptions::new().map_mut(&self.file)? });
        Ok(())
    }
}

fn parse_header(path: &Path, map: &[u8], granule: u64) -> Result<(u64, u64)> {
    let magic = LittleEndian::read_u32(&map[0x00..0x04]);
    if magic != MAGIC {
        return Err(StorageError::InvalidHeader {
            path: path.to_path_buf(),
            details: format!("bad magic {magic:#010x}"),
        });
    }
    let version = LittleEndian::read_u32(&map[0x04..0x08]);
    if version != VERSION {
        return Err(StorageError::InvalidHeader {
            path: path.to_path_buf(),
            details: format!("unsupported version {version}"),
        });
    }
    let extent_size = LittleEndian::read_u64(&map[EXTENT_SIZE_FIELD..EXTENT_SIZE_FIELD + 8]);
    if extent_size == 0 || extent_size % granule != 0 {
        return Err(StorageError::InvalidHeader {
            path: path.to_path_buf(),
            details: format!("extent size {extent_size} incompatible with granule {granule}"),
        });
    }
    let append_offset = LittleEndian::read_u64(&map[APPEND_OFFSET_FIELD..APPEND_OFFSET_FIELD + 8]);
    Ok((extent_size, append_offset))
}

fn extent_size_for(size_hint: u64, granule: u64, mode: AccessMode) -> u64 {
    let hint = match mode {
        AccessMode::BulkAppend => size_hint.saturating_mul(4),
        _ => size_hint,
    };
    hint.clamp(MIN_EXTENT, MAX_EXTENT).next_multiple_of(granule)
}
