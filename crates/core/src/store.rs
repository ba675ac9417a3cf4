//! Ties the interned-name tries, the job/run/node tables and the eviction
//! engine together into the single aggregate the daemon and the repair
//! tool both drive.

use crate::digest::{compile, match_digest, CompileDigest, DepObservation, MatchOutcome};
use crate::error::{CoreError, CoreResult};
use crate::lru::{account_new_run, touch_run, unaccount_run, RateEngine, RateHeader};
use crate::tables::{
    lru_iter_newest_first, CjobData, CkeyData, CnodeData, CrunData, JobIdx, JobTable, KeyIdx, KeyTable, LruLink,
    NodeIdx, NodeTable, RunIdx, RunTable,
};
use runcache_store::arena::Idx;
use runcache_store::names::NameHeap;
use runcache_store::prefix::PrefixTree;
use runcache_store::vector::PackedVectorHeap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

fn default_max_sz() -> u64 {
    0
}
fn default_max_rate() -> u64 {
    1 << 30
}
fn default_max_runs_per_job() -> u32 {
    100
}

/// Tuning knobs that shape rate conversion and the size ceiling; mirrors
/// the subset of the daemon's `Config` that the store itself consults.
/// Deserializable directly from `{admin}/config.toml` so the daemon and
/// the repair tool agree on the same defaults without duplicating them.
#[derive(Clone, Copy, Debug, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_max_rate")]
    pub max_rate: u64,
    #[serde(default = "default_max_sz")]
    pub max_sz: u64,
    #[serde(default = "default_max_runs_per_job")]
    pub max_runs_per_job: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            max_rate: default_max_rate(),
            max_sz: default_max_sz(),
            max_runs_per_job: default_max_runs_per_job(),
        }
    }
}

impl StoreConfig {
    /// Reads `{admin_dir}/config.toml`, falling back to defaults for any
    /// field it omits or if the file doesn't exist at all.
    pub fn load_or_default(admin_dir: &Path) -> CoreResult<Self> {
        let path = admin_dir.join("config.toml");
        let text = match std::fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(CoreError::Corrupt(format!("cannot read {}: {e}", path.display()))),
        };
        toml::from_str(&text).map_err(|e| CoreError::Corrupt(format!("cannot parse {}: {e}", path.display())))
    }
}

const FILE_CAPACITY: u64 = 1 << 40; // 1 TiB virtual ceiling; real usage is bounded by `max_sz`.

/// Identity of a run removed from the index, passed back to the daemon so
/// it can delete the run's committed blob/metadata files; the store itself
/// never touches the filesystem beyond its own table files.
#[derive(Clone, Copy, Debug)]
pub struct VictimizedRun {
    pub job: u32,
    pub key: u32,
    pub key_is_last: bool,
}

pub struct CacheStore {
    admin_dir: PathBuf,
    config: StoreConfig,
    pub keys: KeyTable,
    pub key_names: PrefixTree,
    pub job_names: PrefixTree,
    pub node_names: PrefixTree,
    job_name_bytes: NameHeap,
    node_name_bytes: NameHeap,
    pub jobs: JobTable,
    pub runs: RunTable,
    pub nodes: NodeTable,
    pub dep_nodes: PackedVectorHeap<NodeIdx>,
    pub dep_crcs: PackedVectorHeap<crate::digest::Crc>,
    header: RateHeader,
    rate_engine: RateEngine,
    reserved_sz: u64,
}

impl CacheStore {
    pub fn open(admin_dir: impl AsRef<Path>, config: StoreConfig, writable: bool) -> CoreResult<Self> {
        let admin_dir = admin_dir.as_ref().to_path_buf();
        let store_dir = admin_dir.join("store");
        std::fs::create_dir_all(&store_dir).map_err(|e| {
            CoreError::Corrupt(format!("cannot create store directory {}: {e}", store_dir.display()))
        })?;

        let keys = KeyTable::open(store_dir.join("key"), FILE_CAPACITY, writable, 0, 0)?;
        let key_names = PrefixTree::open(store_dir.join("key_name"), FILE_CAPACITY, writable)?;
        let job_names = PrefixTree::open(store_dir.join("job_name"), FILE_CAPACITY, writable)?;
        let node_names = PrefixTree::open(store_dir.join("node_name"), FILE_CAPACITY, writable)?;
        let job_name_bytes = NameHeap::open(store_dir.join("job_name_bytes"), FILE_CAPACITY, writable)?;
        let node_name_bytes = NameHeap::open(store_dir.join("node_name_bytes"), FILE_CAPACITY, writable)?;
        let jobs = JobTable::open(store_dir.join("job"), FILE_CAPACITY, writable, 0, 0)?;
        let mut runs = RunTable::open(
            store_dir.join("run"),
            FILE_CAPACITY,
            writable,
            0,
            RateHeader::ENCODED_LEN,
        )?;
        let nodes = NodeTable::open(store_dir.join("node"), FILE_CAPACITY, writable, 0, 0)?;
        let dep_nodes = PackedVectorHeap::open(store_dir.join("nodes"), FILE_CAPACITY, writable, 4)?;
        let dep_crcs = PackedVectorHeap::open(store_dir.join("crcs"), FILE_CAPACITY, writable, 4)?;

        let header = RateHeader::decode(&runs.read_custom_header()?);
        if runs.read_custom_header()?.len() as u64 != RateHeader::ENCODED_LEN {
            return Err(CoreError::Corrupt("run table header size mismatch".into()));
        }
        runs.write_custom_header(&header.encode())?;

        Ok(CacheStore {
            admin_dir,
            config,
            keys,
            key_names,
            job_names,
            node_names,
            job_name_bytes,
            node_name_bytes,
            jobs,
            runs,
            nodes,
            dep_nodes,
            dep_crcs,
            header,
            rate_engine: RateEngine::new(),
            reserved_sz: 0,
        })
    }

    pub fn admin_dir(&self) -> &Path {
        &self.admin_dir
    }

    pub fn config(&self) -> StoreConfig {
        self.config
    }

    pub fn total_sz(&self) -> u64 {
        self.header.total_sz
    }

    fn persist_header(&mut self) -> CoreResult<()> {
        self.runs.write_custom_header(&self.header.encode())?;
        Ok(())
    }

    // ---- interning ----------------------------------------------------

    /// Interns `origin` (typically a repo+revision string), returning its
    /// id and whether this call created it. The caller is responsible for
    /// recording newly created ids wherever they need to survive a store
    /// reset — see [`crate::keylog::KeyIdLog`], used by the repair tool.
    pub fn intern_key(&mut self, origin: &[u8]) -> CoreResult<(KeyIdx, bool)> {
        let keys = &mut self.keys;
        let (value, created) = self.key_names.find_or_insert(origin, || {
            let idx = keys.alloc(1)?;
            keys.set(idx, &CkeyData { ref_cnt: 0 })?;
            Ok(idx.0)
        })?;
        Ok((KeyIdx(Idx(value)), created))
    }

    pub fn resolve_node(&mut self, name: &[u8], create_if_missing: bool) -> CoreResult<Option<NodeIdx>> {
        if let Some(v) = self.node_names.search(name) {
            return Ok(Some(NodeIdx(Idx(v))));
        }
        if !create_if_missing {
            return Ok(None);
        }
        let nodes = &mut self.nodes;
        let name_bytes_heap = &mut self.node_name_bytes;
        let (value, _created) = self.node_names.find_or_insert(name, || {
            let name_bytes = name_bytes_heap.append(name)?;
            let idx = nodes.alloc(1)?;
            nodes.set(idx, &CnodeData { name_bytes, ref_cnt: 0 })?;
            Ok(idx.0)
        })?;
        Ok(Some(NodeIdx(Idx(value))))
    }

    fn intern_job(&mut self, name: &[u8], n_statics: usize) -> CoreResult<JobIdx> {
        let jobs = &mut self.jobs;
        let name_bytes_heap = &mut self.job_name_bytes;
        let (value, created) = self.job_names.find_or_insert(name, || {
            let name_bytes = name_bytes_heap.append(name)?;
            let idx = jobs.alloc(1)?;
            jobs.set(
                idx,
                &CjobData {
                    name_bytes,
                    n_statics: n_statics as u32,
                    lru: Idx::NULL,
                    n_runs: 0,
                },
            )?;
            Ok(idx.0)
        })?;
        let job = JobIdx(Idx(value));
        if !created {
            let data = self.jobs.get(job.0);
            if data.n_statics as usize != n_statics {
                return Err(CoreError::Corrupt(format!(
                    "job {name:?} previously had {} static deps, now {n_statics}",
                    data.n_statics
                )));
            }
        }
        Ok(job)
    }

    // ---- dependency digests --------------------------------------------

    pub fn compile_digest(&mut self, deps: Vec<DepObservation>, for_download: bool) -> CompileDigest {
        compile(deps, for_download)
    }

    /// Looks for a run in `job` whose stored digest is compatible with
    /// `digest`, refreshing recency on a hit. Returns `Miss` with a null
    /// run when nothing matches.
    pub fn match_job(&mut self, job: JobIdx, digest: &CompileDigest) -> CoreResult<(RunIdx, MatchOutcome)> {
        let job_data = self.jobs.get(job.0);
        let mut result = (RunIdx::NULL, MatchOutcome::Miss);
        let chain: Vec<RunIdx> = lru_iter_newest_first(&self.runs, job_data.lru, true).collect();
        for run in chain {
            let data = self.runs.get(run.0);
            let cached_deps = self.dep_nodes.view(data.deps);
            let cached_crcs = self.dep_crcs.view(data.dep_crcs);
            let outcome = match_digest(job_data.n_statics as usize, &cached_deps, &cached_crcs, digest);
            if outcome == MatchOutcome::Hit {
                let mut job_head = job_data.lru;
                touch_run(&mut self.runs, &mut job_head, &mut self.header, run)?;
                self.persist_job_head(job, job_head)?;
                self.persist_header()?;
                return Ok((run, MatchOutcome::Hit));
            }
            if matches!(outcome, MatchOutcome::Match { .. }) && result.1 == MatchOutcome::Miss {
                result = (run, outcome);
            }
        }
        Ok(result)
    }

    /// Looks up an already-interned job by name without creating one;
    /// used by the download path, which must never fabricate a job that
    /// no upload has ever populated.
    pub fn lookup_job(&self, name: &[u8]) -> Option<JobIdx> {
        self.job_names.search(name).map(|v| JobIdx(Idx(v)))
    }

    /// The original bytes a node was interned under, for reporting a
    /// `Match` outcome's missing dependencies back to the engine by name.
    pub fn node_name(&self, node: NodeIdx) -> CoreResult<Vec<u8>> {
        let data = self.nodes.get(node.0);
        Ok(self.node_name_bytes.read(data.name_bytes)?)
    }

    /// The original bytes a job was interned under.
    pub fn job_name(&self, job: JobIdx) -> CoreResult<Vec<u8>> {
        let data = self.jobs.get(job.0);
        Ok(self.job_name_bytes.read(data.name_bytes)?)
    }

    fn persist_job_head(&mut self, job: JobIdx, head: Idx) -> CoreResult<()> {
        let mut data = self.jobs.get(job.0);
        data.lru = head;
        self.jobs.set(job.0, &data)?;
        Ok(())
    }

    /// Records a new run for `job_name`, evicting to make room first.
    /// Enforces the cardinality-two rule on `key`: at most one run with
    /// `key_is_last == true` and one with `false` may share a key, so a
    /// job's upload and download tickets never collide.
    #[allow(clippy::too_many_arguments)]
    pub fn insert_run(
        &mut self,
        job_name: &[u8],
        digest: &CompileDigest,
        key: KeyIdx,
        key_is_last: bool,
        last_access: u64,
        sz: u64,
        rate: u8,
    ) -> CoreResult<(RunIdx, Vec<VictimizedRun>)> {
        let job = self.intern_job(job_name, digest.n_statics)?;
        let job_data = self.jobs.get(job.0);

        let mut victims = Vec::new();
        let existing: Vec<RunIdx> = lru_iter_newest_first(&self.runs, job_data.lru, true).collect();
        for run in &existing {
            let data = self.runs.get(run.0);
            if data.key == key && data.key_is_last == key_is_last {
                victims.push(self.victimize_run(*run)?);
                break;
            }
        }

        // Enforce the per-job run ceiling before any size-driven eviction,
        // victimizing this job's own oldest run each time. This is a
        // separate pass from `mk_room` below and runs ahead of it, mirroring
        // the original's job-level insert hook. Re-fetch the job record on
        // every iteration rather than trusting a stale copy: the same-key
        // eviction above, and each iteration of this loop itself, can have
        // just changed it.
        if self.config.max_runs_per_job > 0 {
            loop {
                let job_data = self.jobs.get(job.0);
                if job_data.n_runs < self.config.max_runs_per_job {
                    break;
                }
                let Some(oldest) = lru_iter_newest_first(&self.runs, job_data.lru, true).last() else {
                    break;
                };
                victims.push(self.victimize_run(oldest)?);
            }
        }

        victims.extend(self.mk_room(sz)?);

        let deps = self.dep_nodes.emplace(&digest.deps)?;
        let dep_crcs = self.dep_crcs.emplace(&digest.dep_crcs)?;
        let idx = self.runs.alloc(1)?;
        self.runs.set(
            idx,
            &CrunData {
                key,
                key_is_last,
                last_access,
                sz,
                glb_lru: LruLink::default(),
                job_lru: LruLink::default(),
                job,
                deps,
                dep_crcs,
                rate,
            },
        )?;
        let run = RunIdx(idx);

        let mut job_data = self.jobs.get(job.0);
        let mut job_head = job_data.lru;
        account_new_run(&mut self.runs, &mut job_head, &mut self.header, &mut self.rate_engine, run)?;
        job_data.lru = job_head;
        job_data.n_runs += 1;
        self.jobs.set(job.0, &job_data)?;
        self.persist_header()?;

        let mut key_data = self.keys.get(key.0);
        key_data.ref_cnt += 1;
        self.keys.set(key.0, &key_data)?;
        for &n in &digest.deps {
            let mut nd = self.nodes.get(n.0);
            nd.ref_cnt += 1;
            self.nodes.set(n.0, &nd)?;
        }

        self.release_room(sz);
        Ok((run, victims))
    }

    // ---- eviction -------------------------------------------------------

    /// Reserves `sz` bytes against the size ceiling, evicting runs until
    /// there's room or returning an error if even an empty cache couldn't
    /// fit it. Returns whatever got victimized along the way.
    pub fn mk_room(&mut self, sz: u64) -> CoreResult<Vec<VictimizedRun>> {
        if self.config.max_sz > 0 && sz + self.reserved_sz > self.config.max_sz {
            return Err(CoreError::WontFit {
                requested: sz,
                max_sz: self.config.max_sz,
            });
        }
        self.reserved_sz += sz;
        let mut victims = Vec::new();
        if self.config.max_sz == 0 {
            return Ok(victims);
        }
        self.rate_engine.refresh(&self.runs, &self.header, self.config.max_rate);
        while self.header.total_sz + self.reserved_sz > self.config.max_sz {
            let Some(bucket) = self.rate_engine.best_bucket() else {
                return Err(CoreError::WontFit {
                    requested: sz,
                    max_sz: self.config.max_sz,
                });
            };
            let head = self.header.lrus[bucket as usize];
            let Some(oldest) = lru_iter_newest_first(&self.runs, head, false).last() else {
                self.rate_engine.invalidate();
                self.rate_engine.refresh(&self.runs, &self.header, self.config.max_rate);
                continue;
            };
            victims.push(self.victimize_run(oldest)?);
            self.rate_engine.refresh(&self.runs, &self.header, self.config.max_rate);
        }
        Ok(victims)
    }

    pub fn release_room(&mut self, sz: u64) {
        self.reserved_sz = self.reserved_sz.saturating_sub(sz);
    }

    /// Removes a run entirely: unlinks it from both LRU chains, drops a
    /// reference on every dependency node (freeing any that reach zero),
    /// frees its key reference, and frees the job itself if this was its
    /// last run. Returns the victim's identity so the caller can delete its
    /// committed files.
    pub fn victimize_run(&mut self, run: RunIdx) -> CoreResult<VictimizedRun> {
        let data = self.runs.get(run.0);
        let mut job_data = self.jobs.get(data.job.0);
        let mut job_head = job_data.lru;
        let victim = VictimizedRun {
            job: u32::from(data.job),
            key: u32::from(data.key),
            key_is_last: data.key_is_last,
        };

        unaccount_run(&mut self.runs, &mut job_head, &mut self.header, &mut self.rate_engine, run)?;
        job_data.lru = job_head;
        job_data.n_runs = job_data.n_runs.saturating_sub(1);
        self.jobs.set(data.job.0, &job_data)?;
        self.persist_header()?;

        let dep_nodes = self.dep_nodes.view(data.deps);
        for n in &dep_nodes {
            self.decref_node(*n)?;
        }
        self.dep_nodes.pop(data.deps)?;
        self.dep_crcs.pop(data.dep_crcs)?;

        let mut key_data = self.keys.get(data.key.0);
        if key_data.ref_cnt > 0 {
            key_data.ref_cnt -= 1;
        }
        self.keys.set(data.key.0, &key_data)?;

        self.runs.dealloc(run.0, 1)?;

        if job_head.is_null() {
            self.victimize_job(data.job)?;
        }
        Ok(victim)
    }

    fn decref_node(&mut self, node: NodeIdx) -> CoreResult<()> {
        let mut data = self.nodes.get(node.0);
        if data.ref_cnt > 0 {
            data.ref_cnt -= 1;
        }
        if data.ref_cnt == 0 {
            let name = self.node_name_bytes.read(data.name_bytes)?;
            self.node_names.erase(&name)?;
            self.nodes.dealloc(node.0, 1)?;
        } else {
            self.nodes.set(node.0, &data)?;
        }
        Ok(())
    }

    fn victimize_job(&mut self, job: JobIdx) -> CoreResult<()> {
        let data = self.jobs.get(job.0);
        let name = self.job_name_bytes.read(data.name_bytes)?;
        self.job_names.erase(&name)?;
        self.jobs.dealloc(job.0, 1)?;
        Ok(())
    }

    pub fn flush(&self) -> CoreResult<()> {
        self.keys.flush()?;
        self.key_names.flush()?;
        self.job_names.flush()?;
        self.node_names.flush()?;
        self.job_name_bytes.flush()?;
        self.node_name_bytes.flush()?;
        self.jobs.flush()?;
        self.runs.flush()?;
        self.nodes.flush()?;
        self.dep_nodes.flush()?;
        self.dep_crcs.flush()?;
        Ok(())
    }

    /// Every live run, discovered by walking the per-rate global LRU
    /// chains (every live run is linked into exactly one). Used by the
    /// repair tool's `chk` walk, which has no other way to enumerate runs
    /// without trusting the very relationships it's verifying.
    pub fn all_runs(&self) -> Vec<(RunIdx, CrunData)> {
        let mut out = Vec::new();
        for &head in &self.header.lrus {
            for run in lru_iter_newest_first(&self.runs, head, false) {
                out.push((run, self.runs.get(run.0)));
            }
        }
        out
    }

    pub fn check_consistency(&self) -> CoreResult<()> {
        self.keys.check_consistency()?;
        self.jobs.check_consistency()?;
        self.runs.check_consistency()?;
        self.nodes.check_consistency()?;
        self.dep_nodes.check_consistency()?;
        self.dep_crcs.check_consistency()?;
        Ok(())
    }

    pub fn clear(&mut self) -> CoreResult<()> {
        self.keys.clear()?;
        self.key_names.clear()?;
        self.job_names.clear()?;
        self.node_names.clear()?;
        self.job_name_bytes.clear()?;
        self.node_name_bytes.clear()?;
        self.jobs.clear()?;
        self.runs.clear()?;
        self.nodes.clear()?;
        self.dep_nodes.clear()?;
        self.dep_crcs.clear()?;
        self.header = RateHeader::empty();
        self.persist_header()?;
        self.rate_engine = RateEngine::new();
        self.reserved_sz = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::digest::Accesses;

    fn open_store(max_sz: u64) -> (tempfile::TempDir, CacheStore) {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            max_sz,
            ..StoreConfig::default()
        };
        let store = CacheStore::open(dir.path(), config, true).unwrap();
        (dir, store)
    }

    fn one_dep_digest(store: &mut CacheStore, name: &[u8]) -> CompileDigest {
        let node = store.resolve_node(name, true).unwrap().unwrap();
        let accesses = Accesses { lnk: false, reg: true, stat: false };
        let obs = DepObservation {
            node,
            is_static: false,
            accesses,
            full: true,
            crc: crate::digest::Crc::of_content(42),
        };
        store.compile_digest(vec![obs], false)
    }

    #[test]
    fn insert_then_match_is_a_hit() {
        let (_dir, mut store) = open_store(0);
        let (key, _) = store.intern_key(b"repo@rev1").unwrap();
        let digest = one_dep_digest(&mut store, b"src/main.rs");

        let (_run, victims) = store.insert_run(b"job1", &digest, key, true, 1, 100, 10).unwrap();
        assert!(victims.is_empty());

        let job = store.lookup_job(b"job1").unwrap();
        let download_digest = one_dep_digest(&mut store, b"src/main.rs");
        let (_run, outcome) = store.match_job(job, &download_digest).unwrap();
        assert_eq!(outcome, MatchOutcome::Hit);
    }

    #[test]
    fn unknown_job_is_a_miss() {
        let (_dir, store) = open_store(0);
        assert!(store.lookup_job(b"nope").is_none());
    }

    #[test]
    fn insert_run_tracks_total_sz_and_refcounts() {
        let (_dir, mut store) = open_store(0);
        let (key, _) = store.intern_key(b"repo@rev1").unwrap();
        let digest = one_dep_digest(&mut store, b"src/main.rs");
        let (run, _) = store.insert_run(b"job1", &digest, key, true, 1, 250, 10).unwrap();

        assert_eq!(store.total_sz(), 250);
        let key_data = store.keys.get(key.0);
        assert_eq!(key_data.ref_cnt, 1);

        let data = store.runs.get(run.0);
        let nodes = store.dep_nodes.view(data.deps);
        assert_eq!(nodes.len(), 1);
        let node_data = store.nodes.get(nodes[0].0);
        assert_eq!(node_data.ref_cnt, 1);
    }

    #[test]
    fn second_run_with_same_key_and_slot_victimizes_the_first() {
        let (_dir, mut store) = open_store(0);
        let (key, _) = store.intern_key(b"repo@rev1").unwrap();
        let digest_a = one_dep_digest(&mut store, b"a.rs");
        let (first, _) = store.insert_run(b"job1", &digest_a, key, true, 1, 100, 10).unwrap();

        let digest_b = one_dep_digest(&mut store, b"b.rs");
        let (_second, victims) = store.insert_run(b"job1", &digest_b, key, true, 2, 100, 10).unwrap();

        assert_eq!(victims.len(), 1);
        assert_eq!(victims[0].key, u32::from(key));
        assert!(victims[0].key_is_last);
        // the first run's record is gone; its slot has been freed and may
        // be recycled, so we only assert it's no longer linked anywhere.
        assert!(store.check_consistency().is_ok());
        let _ = first;
    }

    #[test]
    fn two_runs_per_key_can_coexist_across_first_and_last_slots() {
        let (_dir, mut store) = open_store(0);
        let (key, _) = store.intern_key(b"repo@rev1").unwrap();
        let digest_a = one_dep_digest(&mut store, b"a.rs");
        let (_first, victims_a) = store.insert_run(b"job1", &digest_a, key, false, 1, 100, 10).unwrap();
        let digest_b = one_dep_digest(&mut store, b"b.rs");
        let (_second, victims_b) = store.insert_run(b"job1", &digest_b, key, true, 2, 100, 10).unwrap();

        assert!(victims_a.is_empty());
        assert!(victims_b.is_empty());
        assert_eq!(store.total_sz(), 200);
    }

    #[test]
    fn mk_room_evicts_cheapest_rate_bucket_first() {
        // capacity for exactly two 100-byte runs; a third forces an eviction.
        let (_dir, mut store) = open_store(200);
        let (key, _) = store.intern_key(b"repo@rev1").unwrap();

        let digest_a = one_dep_digest(&mut store, b"a.rs");
        store.insert_run(b"job1", &digest_a, key, false, 1, 100, 5).unwrap();
        let digest_b = one_dep_digest(&mut store, b"b.rs");
        store.insert_run(b"job2", &digest_b, key, false, 2, 100, 50).unwrap();

        // a low rate bucket decodes to a high bytes/sec figure (cheap to
        // rebuild); it scores higher and is evicted before the high-bucket
        // (expensive, low bytes/sec) run.
        let digest_c = one_dep_digest(&mut store, b"c.rs");
        let (_run, victims) = store.insert_run(b"job3", &digest_c, key, false, 3, 100, 50).unwrap();

        assert_eq!(victims.len(), 1);
        assert_eq!(store.total_sz(), 200);
        assert!(store.lookup_job(b"job1").is_none(), "the cheap-rate job should have been victimized");
    }

    #[test]
    fn mk_room_rejects_a_reservation_larger_than_the_whole_cache() {
        let (_dir, mut store) = open_store(100);
        let err = store.mk_room(1000).unwrap_err();
        assert!(matches!(err, CoreError::WontFit { .. }));
    }

    #[test]
    fn max_runs_per_job_evicts_the_jobs_own_oldest_run() {
        let dir = tempfile::tempdir().unwrap();
        let config = StoreConfig {
            max_runs_per_job: 2,
            ..StoreConfig::default()
        };
        let mut store = CacheStore::open(dir.path(), config, true).unwrap();

        let (key_a, _) = store.intern_key(b"repo@rev1").unwrap();
        let (key_b, _) = store.intern_key(b"repo@rev2").unwrap();
        let (key_c, _) = store.intern_key(b"repo@rev3").unwrap();

        let digest_a = one_dep_digest(&mut store, b"a.rs");
        let (_run_a, victims_a) = store.insert_run(b"job1", &digest_a, key_a, true, 1, 10, 1).unwrap();
        let digest_b = one_dep_digest(&mut store, b"b.rs");
        let (_run_b, victims_b) = store.insert_run(b"job1", &digest_b, key_b, true, 2, 10, 1).unwrap();
        assert!(victims_a.is_empty());
        assert!(victims_b.is_empty());

        // a third run for the same job exceeds the ceiling; the job's own
        // oldest run is victimized to make room, not anything rate-based.
        let digest_c = one_dep_digest(&mut store, b"c.rs");
        let (_run_c, victims_c) = store.insert_run(b"job1", &digest_c, key_c, true, 3, 10, 1).unwrap();

        assert_eq!(victims_c.len(), 1);
        assert_eq!(victims_c[0].key, u32::from(key_a));
        let job = store.lookup_job(b"job1").unwrap();
        assert_eq!(store.jobs.get(job.0).n_runs, 2);
    }

    #[test]
    fn victimize_last_run_frees_the_job() {
        let (_dir, mut store) = open_store(0);
        let (key, _) = store.intern_key(b"repo@rev1").unwrap();
        let digest = one_dep_digest(&mut store, b"a.rs");
        let (run, _) = store.insert_run(b"job1", &digest, key, true, 1, 100, 10).unwrap();

        store.victimize_run(run).unwrap();
        assert!(store.lookup_job(b"job1").is_none());
        assert_eq!(store.total_sz(), 0);
        assert_eq!(store.keys.get(key.0).ref_cnt, 0);
    }

    #[test]
    fn all_runs_and_check_consistency_after_a_round_of_inserts() {
        let (_dir, mut store) = open_store(0);
        let (key, _) = store.intern_key(b"repo@rev1").unwrap();
        for (i, name) in [b"a.rs" as &[u8], b"b.rs", b"c.rs"].iter().enumerate() {
            let digest = one_dep_digest(&mut store, name);
            store
                .insert_run(format!("job{i}").as_bytes(), &digest, key, true, i as u64, 10, 1)
                .unwrap();
        }
        assert_eq!(store.all_runs().len(), 3);
        store.check_consistency().unwrap();
    }

    #[test]
    fn clear_resets_total_sz_and_removes_every_job() {
        let (_dir, mut store) = open_store(0);
        let (key, _) = store.intern_key(b"repo@rev1").unwrap();
        let digest = one_dep_digest(&mut store, b"a.rs");
        store.insert_run(b"job1", &digest, key, true, 1, 100, 10).unwrap();

        store.clear().unwrap();
        assert_eq!(store.total_sz(), 0);
        assert!(store.lookup_job(b"job1").is_none());
    }
}
