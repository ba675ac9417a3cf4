//! Cross-checks the domain-level invariants that the low-level
//! `CacheStore::check_consistency` can't see on its own: refcounts,
//! rate-bucket membership and the store's own size accounting. Read-only;
//! never mutates the store.

use std::collections::HashMap;

use runcache_core::tables::{JobIdx, KeyIdx, NodeIdx};
use runcache_core::CacheStore;

#[derive(Debug, Default)]
pub struct Report {
    pub problems: Vec<String>,
}

impl Report {
    fn push(&mut self, msg: impl Into<String>) {
        self.problems.push(msg.into());
    }

    pub fn ok(&self) -> bool {
        self.problems.is_empty()
    }
}

pub fn check(store: &CacheStore) -> Report {
    let mut report = Report::default();

    if let Err(e) = store.check_consistency() {
        report.push(format!("low-level table consistency check failed: {e}"));
    }

    let runs = store.all_runs();

    let mut key_refs: HashMap<u32, u32> = HashMap::new();
    let mut node_refs: HashMap<u32, u32> = HashMap::new();
    let mut total_sz: u64 = 0;

    for (_run, data) in &runs {
        total_sz = total_sz.saturating_add(data.sz);
        *key_refs.entry(u32::from(data.key)).or_default() += 1;

        let deps = store.dep_nodes.view(data.deps);
        let crcs = store.dep_crcs.view(data.dep_crcs);
        for &n in &deps {
            *node_refs.entry(u32::from(n)).or_default() += 1;
        }
        if crcs.len() > deps.len() {
            report.push(format!(
                "run in job {:?} has more dep-crcs ({}) than deps ({})",
                data.job,
                crcs.len(),
                deps.len()
            ));
        }
    }

    if total_sz != store.total_sz() {
        report.push(format!(
            "sum of live run sizes ({total_sz}) does not match the store's own total_sz ({})",
            store.total_sz()
        ));
    }

    for idx in store.keys.live_indices() {
        let key: KeyIdx = idx.into();
        let data = store.keys.get(idx);
        let expected = key_refs.get(&u32::from(key)).copied().unwrap_or(0);
        if data.ref_cnt != expected {
            report.push(format!(
                "key {} has ref_cnt {} but {expected} live run(s) cite it",
                u32::from(key),
                data.ref_cnt
            ));
        }
    }

    for idx in store.nodes.live_indices() {
        let node: NodeIdx = idx.into();
        let data = store.nodes.get(idx);
        let expected = node_refs.get(&u32::from(node)).copied().unwrap_or(0);
        if data.ref_cnt != expected {
            let name = store.node_name(node).ok();
            report.push(format!(
                "node {:?} (ref_cnt {}) is cited by {expected} run-dep(s)",
                name.map(|b| String::from_utf8_lossy(&b).into_owned()),
                data.ref_cnt
            ));
        }
    }

    for idx in store.jobs.live_indices() {
        let job: JobIdx = idx.into();
        let data = store.jobs.get(idx);
        if data.lru.is_null() {
            report.push(format!("job {} has no runs but was not victimized", u32::from(job)));
        }
    }

    report
}
