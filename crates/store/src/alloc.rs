//! Size-classed free-list allocator layered over a [`StructArena`].
//!
//! Allocations are measured in *quanta* of `T::SIZE` bytes. Requests are
//! rounded up to a size class using a fixed-mantissa floating-point
//! encoding: sizes below `2^mantissa` map one-to-one to buckets (linear
//! region), sizes above that are grouped into buckets that double every
//! `2^mantissa` of them (logarithmic region). This bounds internal
//! fragmentation to roughly `1/2^mantissa` while keeping the number of free
//! lists small regardless of how large an allocation gets.
//!
//! A `mantissa` of `0` collapses every allocation to exactly one quantum —
//! that's how the job, run and node tables use this type: single-record
//! free lists with no size classing at all.

use crate::arena::{Idx, Record, StructArena};
use crate::error::{StoreError, StoreResult};
use std::path::Path;

/// Maps a quantum count to its size-class bucket.
pub fn bucket(mantissa: u32, quanta: u64) -> u32 {
    debug_assert!(mantissa < 32);
    if quanta < (1 << mantissa) {
        return quanta as u32;
    }
    let highest_bit = 63 - quanta.leading_zeros();
    let shift = highest_bit - mantissa;
    let mantissa_bits = ((quanta >> shift) & ((1u64 << mantissa) - 1)) as u32;
    ((highest_bit - mantissa + 1) << mantissa) + mantissa_bits
}

/// Inverse of [`bucket`]: the quantum count a bucket actually reserves.
/// `quanta(bucket(n)) >= n` always; classes only ever round up.
pub fn class_size(mantissa: u32, bucket: u32) -> u64 {
    debug_assert!(mantissa < 32);
    if bucket < (1 << mantissa) {
        return bucket as u64;
    }
    let exp = (bucket >> mantissa) - 1;
    let mantissa_bits = (bucket & ((1 << mantissa) - 1)) as u64;
    ((1u64 << mantissa) | mantissa_bits) << exp
}

fn n_free_buckets(mantissa: u32) -> u32 {
    bucket(mantissa, u32::MAX as u64) + 1
}

/// A free-list allocator over fixed-size records of type `T`, supporting
/// contiguous multi-quantum runs (used by the packed vector heap) as well as
/// single-quantum records (used by the job/run/node tables, with
/// `mantissa == 0`).
pub struct FreeListAllocator<T: Record> {
    arena: StructArena<T>,
    mantissa: u32,
    n_free: u32,
    free: Vec<Idx>,
    custom_header_len: u64,
}

impl<T: Record> FreeListAllocator<T> {
    pub fn open(
        path: impl AsRef<Path>,
        capacity: u64,
        writable: bool,
        mantissa: u32,
        custom_header_len: u64,
    ) -> StoreResult<Self> {
        let n_free = n_free_buckets(mantissa);
        let free_bytes = n_free as u64 * 4;
        let arena = StructArena::open(path, capacity, writable, free_bytes + custom_header_len)?;
        let header = arena.header_bytes()?;
        let mut free = vec![Idx::NULL; n_free as usize];
        for (i, slot) in free.iter_mut().enumerate() {
            let off = i * 4;
            let bytes: [u8; 4] = header[off..off + 4].try_into().unwrap();
            *slot = Idx(u32::from_le_bytes(bytes));
        }
        Ok(Self {
            arena,
            mantissa,
            n_free,
            free,
            custom_header_len,
        })
    }

    /// Rewrites just the free-list prefix of the header, leaving whatever
    /// custom header bytes follow it untouched.
    fn persist_free(&mut self) -> StoreResult<()> {
        let mut full = self.arena.header_bytes()?;
        for (i, idx) in self.free.iter().enumerate() {
            full[i * 4..i * 4 + 4].copy_from_slice(&idx.0.to_le_bytes());
        }
        self.arena.write_header_bytes(&full)
    }

    pub fn read_custom_header(&self) -> StoreResult<Vec<u8>> {
        let full = self.arena.header_bytes()?;
        Ok(full[self.free.len() * 4..].to_vec())
    }

    pub fn write_custom_header(&mut self, bytes: &[u8]) -> StoreResult<()> {
        debug_assert_eq!(bytes.len() as u64, self.custom_header_len);
        let mut full = self.arena.header_bytes()?;
        full[self.free.len() * 4..].copy_from_slice(bytes);
        self.arena.write_header_bytes(&full)
    }

    /// Raw access to a record's leading 32 bits, independent of `T`'s
    /// decoding. The packed vector heap uses this to store a chunk's
    /// element count inline in its first quantum.
    pub fn read_u32(&self, idx: Idx) -> u32 {
        self.arena.read_link(idx).0
    }

    pub fn write_u32(&mut self, idx: Idx, value: u32) -> StoreResult<()> {
        self.arena.write_link(idx, Idx(value))
    }

    pub fn get(&self, idx: Idx) -> T {
        self.arena.get(idx)
    }

    pub fn set(&mut self, idx: Idx, value: &T) -> StoreResult<()> {
        self.arena.set(idx, value)
    }

    /// Allocates a contiguous run of at least `quanta` records, returning
    /// the index of the first one. Callers that only ever need one record
    /// at a time (the domain tables) pass `quanta == 1`.
    pub fn alloc(&mut self, quanta: u32) -> StoreResult<Idx> {
        let quanta = quanta.max(1);
        let b = bucket(self.mantissa, quanta as u64) as usize;
        if b < self.free.len() && !self.free[b].is_null() {
            let idx = self.free[b];
            let next = self.arena.read_link(idx);
            self.free[b] = next;
            self.persist_free()?;
            return Ok(idx);
        }
        let run_len = class_size(self.mantissa, b as u32) as u32;
        self.arena.grow(run_len)
    }

    /// Returns a previously allocated run of `quanta` records (the same
    /// count passed to `alloc`) to its size class's free list.
    pub fn dealloc(&mut self, idx: Idx, quanta: u32) -> StoreResult<()> {
        let b = bucket(self.mantissa, quanta.max(1) as u64) as usize;
        if b >= self.free.len() {
            return Err(StoreError::Corrupt(format!(
                "dealloc bucket {b} exceeds free-list table of {}",
                self.free.len()
            )));
        }
        let head = self.free[b];
        self.arena.write_link(idx, head)?;
        self.free[b] = idx;
        self.persist_free()
    }

    /// Shrinks a run in place when the new size falls in the same bucket,
    /// otherwise allocates a new run, copies `new_quanta` records and frees
    /// the old one. Used by the packed vector heap on `assign`/`shorten`.
    pub fn shrink_in_place(&self, old_quanta: u32, new_quanta: u32) -> bool {
        bucket(self.mantissa, old_quanta.max(1) as u64) == bucket(self.mantissa, new_quanta.max(1) as u64)
    }

    pub fn len(&self) -> u32 {
        self.arena.len()
    }

    fn free_set(&self) -> Vec<bool> {
        let mut free = vec![false; self.arena.len() as usize + 1];
        for head in &self.free {
            let mut cur = *head;
            while !cur.is_null() {
                free[cur.0 as usize] = true;
                cur = self.arena.read_link(cur);
            }
        }
        free
    }

    /// Every currently-allocated record index, ascending. The repair tool's
    /// consistency walk uses this to enumerate keys/jobs/nodes directly
    /// rather than trusting the domain-level relationships it's checking.
    pub fn live_indices(&self) -> Vec<Idx> {
        let free = self.free_set();
        (1..=self.arena.len()).filter(|&i| !free[i as usize]).map(Idx).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn path(&self) -> &std::path::Path {
        self.arena.path()
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.arena.flush()
    }

    pub fn clear(&mut self) -> StoreResult<()> {
        self.arena.clear()?;
        self.free = vec![Idx::NULL; self.n_free as usize];
        self.persist_free()
    }

    /// Walks every free list and checks that no index is linked twice and
    /// that every free index is within the live record range — the
    /// consistency check the offline repair tool runs before trusting a
    /// store it didn't just rebuild.
    pub fn check_consistency(&self) -> StoreResult<()> {
        let mut seen = vec![false; self.arena.len() as usize + 1];
        for (b, head) in self.free.iter().enumerate() {
            let mut cur = *head;
            let mut steps = 0u64;
            while !cur.is_null() {
                let i = cur.0 as usize;
                if i > self.arena.len() as usize {
                    return Err(StoreError::Corrupt(format!(
                        "free list {b} references out-of-range index {i}"
                    )));
                }
                if seen[i] {
                    return Err(StoreError::Corrupt(format!(
                        "index {i} is double-freed (bucket {b})"
                    )));
                }
                seen[i] = true;
                cur = self.arena.read_link(cur);
                steps += 1;
                if steps > self.arena.len() as u64 + 1 {
                    return Err(StoreError::Corrupt(format!(
                        "free list {b} appears to cycle"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Tag(u32);

    impl Record for Tag {
        const SIZE: usize = 8;
        fn to_bytes(&self, out: &mut [u8]) {
            out[..4].copy_from_slice(&self.0.to_le_bytes());
            out[4..8].copy_from_slice(&0u32.to_le_bytes());
        }
        fn from_bytes(buf: &[u8]) -> Self {
            Tag(u32::from_le_bytes(buf[..4].try_into().unwrap()))
        }
    }

    #[test]
    fn bucket_roundtrips_in_linear_region() {
        for n in 0..16u64 {
            assert_eq!(bucket(4, n), n as u32);
            assert_eq!(class_size(4, n as u32), n);
        }
    }

    #[test]
    fn bucket_rounds_up_in_log_region() {
        for n in 16u64..4096 {
            let b = bucket(4, n);
            let rounded = class_size(4, b);
            assert!(rounded >= n, "{rounded} < {n}");
        }
    }

    #[test]
    fn reuses_freed_slot_of_the_same_class() {
        let dir = tempfile::tempdir().unwrap();
        let mut a: FreeListAllocator<Tag> =
            FreeListAllocator::open(dir.path().join("t"), 1 << 20, true, 0, 0).unwrap();
        let i1 = a.alloc(1).unwrap();
        a.set(i1, &Tag(7)).unwrap();
        a.dealloc(i1, 1).unwrap();
        let i2 = a.alloc(1).unwrap();
        assert_eq!(i1, i2);
        a.check_consistency().unwrap();
    }

    #[test]
    fn detects_double_free() {
        let dir = tempfile::tempdir().unwrap();
        let mut a: FreeListAllocator<Tag> =
            FreeListAllocator::open(dir.path().join("t"), 1 << 20, true, 0, 0).unwrap();
        let i1 = a.alloc(1).unwrap();
        a.dealloc(i1, 1).unwrap();
        a.dealloc(i1, 1).unwrap();
        assert!(a.check_consistency().is_err());
    }
}
