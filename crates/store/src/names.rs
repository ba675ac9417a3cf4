//! An append-only heap of variable-length byte strings.
//!
//! Job and node names need to live somewhere once a [`PrefixTree`] only
//! stores the inline chunk bytes it split on, not the whole key: the table
//! row needs the original bytes back (to erase the trie entry once the row
//! is freed, and to answer "what is this job/node actually called"). Unlike
//! [`PackedVectorHeap`](crate::vector::PackedVectorHeap), entries here are
//! never freed individually — victimizing a job or node leaks its name
//! bytes rather than reclaiming them, trading a small amount of disk space
//! for not needing a free-list over sub-4-byte elements (the allocator
//! family's records all overlay a `u32` link in their first four bytes, so
//! there's no reusing it for single bytes without extra bookkeeping this
//! heap's one use case doesn't warrant).
use std::path::Path;

use crate::raw_file::RawFile;
use crate::StoreResult;

/// A single growable file of `len:u32 | bytes` chunks, addressed by the
/// byte offset of each chunk's length prefix.
pub struct NameHeap {
    raw: RawFile,
}

impl NameHeap {
    pub fn open(path: impl AsRef<Path>, capacity: u64, writable: bool) -> StoreResult<Self> {
        Ok(NameHeap {
            raw: RawFile::open(path, capacity, writable)?,
        })
    }

    /// Appends `bytes` and returns the offset to pass to [`Self::read`].
    pub fn append(&mut self, bytes: &[u8]) -> StoreResult<u32> {
        let offset = self.raw.len();
        self.raw.write_at(offset, &(bytes.len() as u32).to_le_bytes())?;
        self.raw.write_at(offset + 4, bytes)?;
        Ok(offset as u32)
    }

    pub fn read(&self, offset: u32) -> StoreResult<Vec<u8>> {
        let mut len_buf = [0u8; 4];
        self.raw.read_at(offset as u64, &mut len_buf)?;
        let len = u32::from_le_bytes(len_buf) as usize;
        let mut buf = vec![0u8; len];
        self.raw.read_at(offset as u64 + 4, &mut buf)?;
        Ok(buf)
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.raw.flush()
    }

    pub fn clear(&mut self) -> StoreResult<()> {
        self.raw.clear()
    }
}
