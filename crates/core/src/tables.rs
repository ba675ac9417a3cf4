//! Domain record layout: interned keys, jobs, runs and nodes, and the
//! intrusive LRU links threading runs together.
//!
//! Each table below is a thin, typed wrapper over a `runcache_store`
//! primitive: the key/job-name/node-name tables are [`PrefixTree`]s, the
//! job/run/node tables are [`FreeListAllocator`]s of fixed-size records, and
//! the per-run dependency lists are [`PackedVectorHeap`]s. `tables.rs` only
//! knows the record shapes and their invariants; matching and eviction are
//! layered on top in `digest.rs` and `lru.rs`.

use runcache_store::alloc::FreeListAllocator;
use runcache_store::arena::{Idx, Record};
use runcache_store::StoreResult;

macro_rules! typed_idx {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        pub struct $name(pub Idx);

        impl $name {
            pub const NULL: $name = $name(Idx::NULL);

            pub fn is_null(self) -> bool {
                self.0.is_null()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}({:?})", stringify!($name), self.0)
            }
        }

        impl From<Idx> for $name {
            fn from(idx: Idx) -> Self {
                $name(idx)
            }
        }

        impl From<$name> for Idx {
            fn from(v: $name) -> Idx {
                v.0
            }
        }

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(Idx(raw))
            }
        }

        impl From<$name> for u32 {
            fn from(v: $name) -> u32 {
                (v.0).0
            }
        }
    };
}

typed_idx!(KeyIdx);
typed_idx!(JobIdx);
typed_idx!(RunIdx);
typed_idx!(NodeIdx);

impl Record for NodeIdx {
    const SIZE: usize = 4;
    fn to_bytes(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&(self.0).0.to_le_bytes());
    }
    fn from_bytes(buf: &[u8]) -> Self {
        NodeIdx(Idx(u32::from_le_bytes(buf[..4].try_into().unwrap())))
    }
}

/// A dependency crc, stored alongside its node reference in a run's
/// dependency-crc vector. See [`crate::digest::Crc`] for the bit layout.
impl Record for crate::digest::Crc {
    const SIZE: usize = 8;
    fn to_bytes(&self, out: &mut [u8]) {
        out[..8].copy_from_slice(&self.raw().to_le_bytes());
    }
    fn from_bytes(buf: &[u8]) -> Self {
        crate::digest::Crc::from_raw(u64::from_le_bytes(buf[..8].try_into().unwrap()))
    }
}

/// An origin string's refcount: how many runs currently cite this key as
/// their upload/download origin. Dropping to zero frees the interned
/// string.
#[derive(Clone, Copy, Default)]
pub struct CkeyData {
    pub ref_cnt: u32,
}

impl Record for CkeyData {
    const SIZE: usize = 4;
    fn to_bytes(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.ref_cnt.to_le_bytes());
    }
    fn from_bytes(buf: &[u8]) -> Self {
        CkeyData {
            ref_cnt: u32::from_le_bytes(buf[..4].try_into().unwrap()),
        }
    }
}

/// A node: a build artifact's dependency-side identity. `ref_cnt` counts
/// how many live runs cite this node in their dependency list; it hits zero
/// when the last citing run is victimized, at which point the node (and
/// its interned name, reached via `name_bytes`) are freed too.
#[derive(Clone, Copy, Default)]
pub struct CnodeData {
    /// Byte offset of this node's name in the node name-bytes heap; `0`
    /// only ever appears transiently while a node record is being built.
    pub name_bytes: u32,
    pub ref_cnt: u32,
}

impl Record for CnodeData {
    const SIZE: usize = 8;
    fn to_bytes(&self, out: &mut [u8]) {
        out[..4].copy_from_slice(&self.name_bytes.to_le_bytes());
        out[4..8].copy_from_slice(&self.ref_cnt.to_le_bytes());
    }
    fn from_bytes(buf: &[u8]) -> Self {
        CnodeData {
            name_bytes: u32::from_le_bytes(buf[..4].try_into().unwrap()),
            ref_cnt: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        }
    }
}

/// A job: the grouping of every run that shares a repo command line and
/// its static (always present) dependencies. `lru` is the head of this
/// job's run chain, newest first; it's null exactly when the job has no
/// runs left, which is also when the job itself is victimized. `name_bytes`
/// points at the job's own name in the packed byte heap, kept around so
/// victimizing a job can also erase its entry from the name trie.
#[derive(Clone, Copy, Default)]
pub struct CjobData {
    /// Byte offset of this job's name in the job name-bytes heap.
    pub name_bytes: u32,
    pub n_statics: u32,
    pub lru: Idx,
    /// How many runs are currently chained off `lru`. Checked against
    /// `StoreConfig::max_runs_per_job` before a new run is linked in.
    pub n_runs: u32,
}

impl Record for CjobData {
    const SIZE: usize = 16;
    fn to_bytes(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.name_bytes.to_le_bytes());
        out[4..8].copy_from_slice(&self.n_statics.to_le_bytes());
        out[8..12].copy_from_slice(&self.lru.0.to_le_bytes());
        out[12..16].copy_from_slice(&self.n_runs.to_le_bytes());
    }
    fn from_bytes(buf: &[u8]) -> Self {
        CjobData {
            name_bytes: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
            n_statics: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
            lru: Idx(u32::from_le_bytes(buf[8..12].try_into().unwrap())),
            n_runs: u32::from_le_bytes(buf[12..16].try_into().unwrap()),
        }
    }
}

/// An intrusive doubly-linked LRU node, addressed by run index rather than
/// pointer. `newer`/`older` are `0` (null) at the ends of the chain. Each
/// run carries two of these: one threading it into its job's run chain,
/// one threading it into its rate bucket's global chain.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct LruLink {
    pub newer: Idx,
    pub older: Idx,
}

impl LruLink {
    fn encode(&self, out: &mut [u8]) {
        out[0..4].copy_from_slice(&self.newer.0.to_le_bytes());
        out[4..8].copy_from_slice(&self.older.0.to_le_bytes());
    }
    fn decode(buf: &[u8]) -> Self {
        LruLink {
            newer: Idx(u32::from_le_bytes(buf[0..4].try_into().unwrap())),
            older: Idx(u32::from_le_bytes(buf[4..8].try_into().unwrap())),
        }
    }
}

/// A cached run: one (job, dependency-digest) pair's cached output.
/// Sized to fit in a fixed-size arena record; see [`crate::digest`] for how
/// `deps`/`dep_crcs` (references into packed vector heaps) are produced and
/// matched.
#[derive(Clone, Copy, Default)]
pub struct CrunData {
    pub key: KeyIdx,
    pub key_is_last: bool,
    pub last_access: u64,
    pub sz: u64,
    pub glb_lru: LruLink,
    pub job_lru: LruLink,
    pub job: JobIdx,
    pub deps: Idx,
    pub dep_crcs: Idx,
    pub rate: u8,
}

impl Record for CrunData {
    const SIZE: usize = 4 + 1 + 8 + 8 + 8 + 8 + 4 + 4 + 4 + 1;

    fn to_bytes(&self, out: &mut [u8]) {
        let mut off = 0;
        out[off..off + 4].copy_from_slice(&(self.key.0).0.to_le_bytes());
        off += 4;
        out[off] = self.key_is_last as u8;
        off += 1;
        out[off..off + 8].copy_from_slice(&self.last_access.to_le_bytes());
        off += 8;
        out[off..off + 8].copy_from_slice(&self.sz.to_le_bytes());
        off += 8;
        self.glb_lru.encode(&mut out[off..off + 8]);
        off += 8;
        self.job_lru.encode(&mut out[off..off + 8]);
        off += 8;
        out[off..off + 4].copy_from_slice(&(self.job.0).0.to_le_bytes());
        off += 4;
        out[off..off + 4].copy_from_slice(&self.deps.0.to_le_bytes());
        off += 4;
        out[off..off + 4].copy_from_slice(&self.dep_crcs.0.to_le_bytes());
        off += 4;
        out[off] = self.rate;
    }

    fn from_bytes(buf: &[u8]) -> Self {
        let mut off = 0;
        let key = KeyIdx(Idx(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())));
        off += 4;
        let key_is_last = buf[off] != 0;
        off += 1;
        let last_access = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let sz = u64::from_le_bytes(buf[off..off + 8].try_into().unwrap());
        off += 8;
        let glb_lru = LruLink::decode(&buf[off..off + 8]);
        off += 8;
        let job_lru = LruLink::decode(&buf[off..off + 8]);
        off += 8;
        let job = JobIdx(Idx(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap())));
        off += 4;
        let deps = Idx(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
        off += 4;
        let dep_crcs = Idx(u32::from_le_bytes(buf[off..off + 4].try_into().unwrap()));
        off += 4;
        let rate = buf[off];
        CrunData {
            key,
            key_is_last,
            last_access,
            sz,
            glb_lru,
            job_lru,
            job,
            deps,
            dep_crcs,
            rate,
        }
    }
}

pub type JobTable = FreeListAllocator<CjobData>;
pub type RunTable = FreeListAllocator<CrunData>;
pub type NodeTable = FreeListAllocator<CnodeData>;
pub type KeyTable = FreeListAllocator<CkeyData>;

/// Pushes `run` to the front (newest) of the job-scoped LRU chain rooted at
/// `*head`.
pub fn lru_insert_top(runs: &mut RunTable, head: &mut Idx, run: RunIdx, is_job_chain: bool) -> StoreResult<()> {
    let old_head = *head;
    set_link(runs, run, is_job_chain, LruLink { newer: Idx::NULL, older: old_head })?;
    if !old_head.is_null() {
        let mut old = get_link(runs, RunIdx(old_head), is_job_chain);
        old.newer = run.0;
        set_link(runs, RunIdx(old_head), is_job_chain, old)?;
    }
    *head = run.0;
    Ok(())
}

/// Unlinks `run` from its chain, updating `*head` if `run` was the newest
/// entry. The caller supplies the other end's pointer when known; when
/// `run` was the oldest, nothing else needs to change there.
pub fn lru_erase(runs: &mut RunTable, head: &mut Idx, run: RunIdx, is_job_chain: bool) -> StoreResult<()> {
    let link = get_link(runs, run, is_job_chain);
    if link.newer.is_null() {
        *head = link.older;
    } else {
        let mut newer = get_link(runs, RunIdx(link.newer), is_job_chain);
        newer.older = link.older;
        set_link(runs, RunIdx(link.newer), is_job_chain, newer)?;
    }
    if !link.older.is_null() {
        let mut older = get_link(runs, RunIdx(link.older), is_job_chain);
        older.newer = link.newer;
        set_link(runs, RunIdx(link.older), is_job_chain, older)?;
    }
    Ok(())
}

pub fn lru_move_to_top(runs: &mut RunTable, head: &mut Idx, run: RunIdx, is_job_chain: bool) -> StoreResult<()> {
    if *head == run.0 {
        return Ok(());
    }
    lru_erase(runs, head, run, is_job_chain)?;
    lru_insert_top(runs, head, run, is_job_chain)
}

fn get_link(runs: &RunTable, run: RunIdx, is_job_chain: bool) -> LruLink {
    let data = runs.get(run.0);
    if is_job_chain {
        data.job_lru
    } else {
        data.glb_lru
    }
}

fn set_link(runs: &mut RunTable, run: RunIdx, is_job_chain: bool, link: LruLink) -> StoreResult<()> {
    let mut data = runs.get(run.0);
    if is_job_chain {
        data.job_lru = link;
    } else {
        data.glb_lru = link;
    }
    runs.set(run.0, &data)
}

/// Walks a run chain from newest to oldest.
pub fn lru_iter_newest_first<'a>(runs: &'a RunTable, head: Idx, is_job_chain: bool) -> impl Iterator<Item = RunIdx> + 'a {
    let mut cur = head;
    std::iter::from_fn(move || {
        if cur.is_null() {
            return None;
        }
        let run = RunIdx(cur);
        cur = get_link(runs, run, is_job_chain).older;
        Some(run)
    })
}
