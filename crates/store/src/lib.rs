//! Memory-mapped, append-only typed files that together form the on-disk
//! database underneath the cache: a [`RawFile`](raw_file::RawFile) grown in
//! geometric steps, a [`StructArena`](arena::StructArena) of fixed-size
//! records over it, a [`FreeListAllocator`](alloc::FreeListAllocator) adding
//! size-classed free lists, a [`PackedVectorHeap`](vector::PackedVectorHeap)
//! for variable-length chunks, and a [`PrefixTree`](prefix::PrefixTree) PATRICIA
//! trie built on top of the allocator.
//!
//! Every layer is append-only and grows the backing file monotonically; there
//! is no general-purpose free of arbitrary byte ranges, only of whole records
//! via free lists. Index `0` is reserved as the null reference throughout.

pub mod alloc;
pub mod arena;
pub mod names;
pub mod prefix;
pub mod raw_file;
pub mod vector;

mod error;

pub use error::{StoreError, StoreResult};
