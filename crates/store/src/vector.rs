//! Packed, variable-length vectors of fixed-size elements over a
//! [`FreeListAllocator`].
//!
//! Each chunk is a contiguous run of `1 + n` quanta: the first carries the
//! element count, the rest the elements themselves. Growing a vector past
//! its current size class reallocates and copies; shrinking within the same
//! class is in place. This is what backs the dependency-node and dep-crc
//! lists hanging off a run record, where `n` varies run to run but the
//! element type (a node reference or a crc) is always the same fixed size.

use crate::alloc::FreeListAllocator;
use crate::arena::{Idx, Record};
use crate::error::StoreResult;
use std::path::Path;

pub struct PackedVectorHeap<E: Record> {
    alloc: FreeListAllocator<E>,
}

impl<E: Record> PackedVectorHeap<E> {
    /// `mantissa` controls the size-class granularity; a value of `4` (one
    /// size class doubling every 16 elements) keeps internal fragmentation
    /// low for the short dependency lists a build job typically has.
    pub fn open(path: impl AsRef<Path>, capacity: u64, writable: bool, mantissa: u32) -> StoreResult<Self> {
        Ok(Self {
            alloc: FreeListAllocator::open(path, capacity, writable, mantissa, 0)?,
        })
    }

    fn len_quanta(n: usize) -> u32 {
        n as u32 + 1
    }

    pub fn len(&self, idx: Idx) -> u32 {
        if idx.is_null() {
            return 0;
        }
        self.alloc.read_u32(idx)
    }

    pub fn view(&self, idx: Idx) -> Vec<E> {
        let n = self.len(idx);
        (0..n)
            .map(|i| self.alloc.get(Idx(idx.0 + 1 + i)))
            .collect()
    }

    /// Allocates a fresh chunk holding `elems`. Returns `Idx::NULL` for an
    /// empty slice so callers can treat "no dependencies" as free.
    pub fn emplace(&mut self, elems: &[E]) -> StoreResult<Idx> {
        if elems.is_empty() {
            return Ok(Idx::NULL);
        }
        let idx = self.alloc.alloc(Self::len_quanta(elems.len()))?;
        self.alloc.write_u32(idx, elems.len() as u32)?;
        for (i, e) in elems.iter().enumerate() {
            self.alloc.set(Idx(idx.0 + 1 + i as u32), e)?;
        }
        Ok(idx)
    }

    pub fn pop(&mut self, idx: Idx) -> StoreResult<()> {
        if idx.is_null() {
            return Ok(());
        }
        let n = self.len(idx);
        self.alloc.dealloc(idx, Self::len_quanta(n as usize))
    }

    /// Replaces the contents of a chunk, reusing the storage in place when
    /// the new length falls in the same size class and reallocating
    /// otherwise.
    pub fn assign(&mut self, idx: Idx, elems: &[E]) -> StoreResult<Idx> {
        let old_n = self.len(idx) as usize;
        if idx.is_null() || !self.alloc.shrink_in_place(
            Self::len_quanta(old_n),
            Self::len_quanta(elems.len()),
        ) {
            self.pop(idx)?;
            return self.emplace(elems);
        }
        self.alloc.write_u32(idx, elems.len() as u32)?;
        for (i, e) in elems.iter().enumerate() {
            self.alloc.set(Idx(idx.0 + 1 + i as u32), e)?;
        }
        Ok(idx)
    }

    /// Appends a single element, growing the chunk as needed.
    pub fn append(&mut self, idx: Idx, elem: E) -> StoreResult<Idx> {
        let mut cur = self.view(idx);
        cur.push(elem);
        self.assign(idx, &cur)
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.alloc.flush()
    }

    pub fn clear(&mut self) -> StoreResult<()> {
        self.alloc.clear()
    }

    pub fn check_consistency(&self) -> StoreResult<()> {
        self.alloc.check_consistency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Record for u32 {
        const SIZE: usize = 4;
        fn to_bytes(&self, out: &mut [u8]) {
            out[..4].copy_from_slice(&self.to_le_bytes());
        }
        fn from_bytes(buf: &[u8]) -> Self {
            u32::from_le_bytes(buf[..4].try_into().unwrap())
        }
    }

    #[test]
    fn empty_slice_is_null() {
        let dir = tempfile::tempdir().unwrap();
        let mut v: PackedVectorHeap<u32> =
            PackedVectorHeap::open(dir.path().join("v"), 1 << 20, true, 4).unwrap();
        let idx = v.emplace(&[]).unwrap();
        assert!(idx.is_null());
        assert_eq!(v.view(idx), Vec::<u32>::new());
    }

    #[test]
    fn roundtrips_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut v: PackedVectorHeap<u32> =
            PackedVectorHeap::open(dir.path().join("v"), 1 << 20, true, 4).unwrap();
        let idx = v.emplace(&[1, 2, 3]).unwrap();
        assert_eq!(v.view(idx), vec![1, 2, 3]);
        let idx = v.append(idx, 4).unwrap();
        assert_eq!(v.view(idx), vec![1, 2, 3, 4]);
        v.pop(idx).unwrap();
        v.check_consistency().unwrap();
    }

    #[test]
    fn assign_reuses_storage_within_a_size_class() {
        let dir = tempfile::tempdir().unwrap();
        let mut v: PackedVectorHeap<u32> =
            PackedVectorHeap::open(dir.path().join("v"), 1 << 20, true, 4).unwrap();
        let idx = v.emplace(&[1, 2, 3]).unwrap();
        let idx2 = v.assign(idx, &[9, 8, 7]).unwrap();
        assert_eq!(idx, idx2);
        assert_eq!(v.view(idx2), vec![9, 8, 7]);
    }
}
