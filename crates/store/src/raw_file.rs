//! A file mapped into memory with a configurable virtual capacity.
//!
//! Growth is geometric (never linear) and the logical length never shrinks
//! except via [`RawFile::clear`]. Unlike the C++ original, which remaps a
//! `PROT_NONE` reservation in place with `mmap(MAP_FIXED)` so live pointers
//! survive growth, this implementation re-derives a mapping (and therefore
//! every slice) after each grow: callers never hold a `&[u8]` across a
//! mutation that might grow the file, only indices. That keeps the whole
//! stack safe Rust without losing the append-only, index-addressed shape of
//! the original design.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::{MmapMut, MmapOptions};

use crate::error::{StoreError, StoreResult};

const INITIAL_SIZE: u64 = 64 * 1024;
const GROWTH_FACTOR: u64 = 2;

/// Marker byte written as the first byte of every store file; it must
/// round-trip through open/close unchanged (see the on-disk layout in the
/// design doc).
pub const TYPE_MARKER: u8 = b'=';

/// A growable, memory-mapped file with a static capacity ceiling.
pub struct RawFile {
    path: PathBuf,
    file: Option<File>,
    mmap: Option<MmapMut>,
    /// Logical length in bytes, including the leading type marker.
    len: u64,
    capacity: u64,
    writable: bool,
}

impl RawFile {
    /// Maps `path` (created if absent) with a virtual capacity ceiling of
    /// `capacity` bytes. `writable` selects `PROT_READ|PROT_WRITE` vs.
    /// `PROT_READ` only, matching the reader/writer split in the
    /// concurrency model (readers such as `repair --dry-run` never take a
    /// writable mapping).
    pub fn open(path: impl AsRef<Path>, capacity: u64, writable: bool) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let mut opts = OpenOptions::new();
        opts.read(true);
        if writable {
            opts.write(true).create(true);
        }
        let file = opts.open(&path).map_err(|source| StoreError::Io {
            path: path.clone(),
            source,
        })?;

        let existing_len = file
            .metadata()
            .map_err(|source| StoreError::Io {
                path: path.clone(),
                source,
            })?
            .len();

        let mut this = Self {
            path,
            file: Some(file),
            mmap: None,
            len: existing_len.max(1),
            capacity,
            writable,
        };

        if existing_len == 0 {
            if !writable {
                return Err(StoreError::ReadOnly(this.path.clone()));
            }
            this.grow_file_to(1)?;
            this.write_at(0, &[TYPE_MARKER])?;
        } else {
            this.remap()?;
        }
        Ok(this)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn writable(&self) -> bool {
        self.writable
    }

    /// Logical size in bytes (including the type-marker byte).
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len <= 1
    }

    fn remap(&mut self) -> StoreResult<()> {
        let file = self.file.as_ref().expect("file handle present");
        let map_len = self.len.max(1);
        let mmap = if self.writable {
            unsafe {
                MmapOptions::new()
                    .len(map_len as usize)
                    .map_mut(file)
                    .map_err(|source| StoreError::Io {
                        path: self.path.clone(),
                        source,
                    })?
            }
        } else {
            let ro = unsafe {
                MmapOptions::new()
                    .len(map_len as usize)
                    .map(file)
                    .map_err(|source| StoreError::Io {
                        path: self.path.clone(),
                        source,
                    })?
            };
            // Safety net for the read-only path: copy into an anonymous
            // writable mapping so the rest of the kernel can use one type.
            let mut owned = MmapOptions::new()
                .len(map_len as usize)
                .map_anon()
                .map_err(|source| StoreError::Io {
                    path: self.path.clone(),
                    source,
                })?;
            owned[..ro.len()].copy_from_slice(&ro);
            owned
        };
        self.mmap = Some(mmap);
        Ok(())
    }

    fn grow_file_to(&mut self, new_len: u64) -> StoreResult<()> {
        if new_len > self.capacity {
            return Err(StoreError::CapacityExceeded {
                path: self.path.clone(),
                requested: new_len,
                capacity: self.capacity,
            });
        }
        if !self.writable {
            return Err(StoreError::ReadOnly(self.path.clone()));
        }
        let file = self.file.as_ref().expect("file handle present");
        file.set_len(new_len).map_err(|source| StoreError::Io {
            path: self.path.clone(),
            source,
        })?;
        self.len = new_len;
        self.remap()
    }

    /// Ensures the mapping covers at least `needed` bytes, growing
    /// geometrically (doubling, at minimum +[`INITIAL_SIZE`]) when it
    /// doesn't.
    pub fn ensure_len(&mut self, needed: u64) -> StoreResult<()> {
        if needed <= self.len {
            return Ok(());
        }
        let doubled = self.len.saturating_mul(GROWTH_FACTOR);
        let with_floor = self.len.saturating_add(INITIAL_SIZE);
        let new_len = doubled.max(with_floor).max(needed);
        self.grow_file_to(new_len.min(self.capacity).max(needed))
    }

    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> StoreResult<()> {
        let mmap = self.mmap.as_ref().expect("mapped");
        let start = offset as usize;
        let end = start + buf.len();
        if end as u64 > self.len {
            return Err(StoreError::Corrupt(format!(
                "read past logical end of {}: {end} > {}",
                self.path.display(),
                self.len
            )));
        }
        buf.copy_from_slice(&mmap[start..end]);
        Ok(())
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> StoreResult<()> {
        if !self.writable {
            return Err(StoreError::ReadOnly(self.path.clone()));
        }
        let needed = offset + data.len() as u64;
        self.ensure_len(needed)?;
        let mmap = self.mmap.as_mut().expect("mapped");
        let start = offset as usize;
        mmap[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap.as_ref().expect("mapped")[..self.len as usize]
    }

    /// Flushes dirty pages to disk; called before clearing the transaction
    /// log so a crash after this point cannot lose a committed mutation.
    pub fn flush(&self) -> StoreResult<()> {
        if let Some(mmap) = &self.mmap {
            mmap.flush().map_err(|source| StoreError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Truncates the file back to an empty store (just the type marker) and
    /// re-maps zeros. Used by `repair` to reset the store before replaying
    /// trusted entries.
    pub fn clear(&mut self) -> StoreResult<()> {
        self.mmap = None;
        self.grow_file_to(1)?;
        self.write_at(0, &[TYPE_MARKER])
    }

    /// Drops the mapping without truncating the file.
    pub fn close(mut self) -> StoreResult<()> {
        self.flush()?;
        self.mmap = None;
        self.file = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_geometrically_and_persists_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw");
        let mut f = RawFile::open(&path, 16 * 1024 * 1024, true).unwrap();
        assert_eq!(f.len(), 1);
        f.write_at(10, b"hello").unwrap();
        assert!(f.len() >= 15);
        let mut buf = [0u8; 5];
        f.read_at(10, &mut buf).unwrap();
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn reopen_sees_prior_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw");
        {
            let mut f = RawFile::open(&path, 1024 * 1024, true).unwrap();
            f.write_at(1, b"abcd").unwrap();
        }
        let f = RawFile::open(&path, 1024 * 1024, true).unwrap();
        let mut buf = [0u8; 4];
        f.read_at(1, &mut buf).unwrap();
        assert_eq!(&buf, b"abcd");
    }

    #[test]
    fn refuses_growth_past_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw");
        let mut f = RawFile::open(&path, 100, true).unwrap();
        assert!(matches!(
            f.ensure_len(1_000_000),
            Err(StoreError::CapacityExceeded { .. })
        ));
    }
}
