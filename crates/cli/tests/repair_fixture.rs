//! Builds a run-directory tree by hand (bypassing the daemon entirely) and
//! checks that repair reconstructs a matching store from it, including
//! dropping files that don't belong.

use std::path::Path;

use runcache_core::{CacheStore, KeyIdLog, StoreConfig};
use runcache_proto::message::{AccessesWire, DepWire};
use runcache_proto::{RunInfo, RunStatus};

fn write_run(admin_dir: &Path, job_id: u32, key_id: u32, key_is_last: bool, data: &[u8], info: &RunInfo) {
    let job_dir = runcache_cli::paths::runs_dir(admin_dir).join(runcache_cli::paths::job_dir_name(job_id));
    std::fs::create_dir_all(&job_dir).unwrap();
    let slot = if key_is_last { "last" } else { "first" };
    std::fs::write(job_dir.join(format!("{key_id}-{slot}-data")), data).unwrap();
    info.write(&job_dir.join(format!("{key_id}-{slot}-info"))).unwrap();
}

fn a_dep(name: &str, crc: u64) -> DepWire {
    DepWire {
        node: name.into(),
        is_static: false,
        accesses: AccessesWire { lnk: false, reg: true, stat: false },
        full: true,
        crc,
    }
}

#[test]
fn repair_rebuilds_the_store_and_drops_bad_entries() {
    let dir = tempfile::tempdir().unwrap();
    let admin_dir = dir.path();
    std::fs::create_dir_all(admin_dir).unwrap();

    let mut job_log = KeyIdLog::open(runcache_cli::sentinel::job_id_log(admin_dir)).unwrap();
    job_log.record(1, b"build-foo").unwrap();
    let mut key_log = KeyIdLog::open(runcache_cli::sentinel::key_id_log(admin_dir)).unwrap();
    key_log.record(7, b"repo@rev1").unwrap();
    drop(job_log);
    drop(key_log);

    let ok_info = RunInfo {
        status: RunStatus::Ok,
        exe_time_secs: 2.0,
        n_statics: 0,
        deps: vec![a_dep("src/main.rs", 42)],
    };
    write_run(admin_dir, 1, 7, true, b"artifact bytes", &ok_info);

    // a failed job: status != Ok, should be dropped rather than replayed.
    let failed_info = RunInfo {
        status: RunStatus::Err("compile error".into()),
        exe_time_secs: 0.5,
        n_statics: 0,
        deps: vec![],
    };
    write_run(admin_dir, 1, 7, false, b"partial", &failed_info);

    // an orphaned data file with no matching -info: should be dropped too.
    let orphan_dir = runcache_cli::paths::runs_dir(admin_dir).join(runcache_cli::paths::job_dir_name(2));
    std::fs::create_dir_all(&orphan_dir).unwrap();
    std::fs::write(orphan_dir.join("9-last-data"), b"no info file").unwrap();

    let plan = runcache_cli::repair::build_plan(admin_dir).unwrap();
    assert_eq!(plan.replay_len(), 1);
    assert_eq!(plan.delete_len(), 3); // failed run's data+info, orphan's data

    let outcome = runcache_cli::repair::run(admin_dir, false).unwrap();
    assert_eq!(outcome.replayed, 1);
    assert_eq!(outcome.deleted, 3);

    let config = StoreConfig::load_or_default(admin_dir).unwrap();
    let mut store = CacheStore::open(admin_dir, config, true).unwrap();
    let (_key, created) = store.intern_key(b"repo@rev1").unwrap();
    assert!(!created, "replay should already have interned this key");
    let observations = vec![runcache_core::digest::DepObservation {
        node: store.resolve_node(b"src/main.rs", true).unwrap().unwrap(),
        is_static: false,
        accesses: runcache_core::digest::Accesses { lnk: false, reg: true, stat: false },
        full: true,
        crc: runcache_core::digest::Crc::from_raw(42),
    }];
    let digest = store.compile_digest(observations, true);
    let job = store.lookup_job(b"build-foo").expect("replay should have created this job");
    let (_run, outcome) = store.match_job(job, &digest).unwrap();
    assert_eq!(outcome, runcache_core::digest::MatchOutcome::Hit);
}
