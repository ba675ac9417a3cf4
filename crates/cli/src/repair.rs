//! Rebuilds the on-disk index from the run-directory tree, which is the
//! one thing repair trusts more than the store's own tables: those tables
//! are exactly what a crash might have torn.
//!
//! The walk is in three passes: classify every file under `{admin}/runs`
//! into `{-data,-info} x {-first,-last}` groups (anything that doesn't
//! parse is marked for deletion); validate each group (both files present,
//! `-info` parses, `status == Ok`, else delete); then, only once a plan has
//! been fully formed, delete what's scheduled, reset the store and replay
//! every surviving group through the same `insert_run` path a live commit
//! uses.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use runcache_core::digest::{Accesses, Crc, DepObservation};
use runcache_core::lru::to_rate;
use runcache_core::{CacheStore, KeyIdLog, StoreConfig};
use runcache_proto::{RunInfo, RunStatus};
use tracing::warn;

use crate::paths;
use crate::sentinel;

#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    #[error(transparent)]
    Core(#[from] runcache_core::CoreError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("a server is running ({0}); refusing to repair a live cache")]
    ServerRunning(PathBuf),
    #[error("job {job} key {key} replayed into a conflict with an already-replayed run; the untrusted tree is inconsistent")]
    ReplayConflict { job: u32, key: u32 },
}

pub type RepairResult<T> = Result<T, RepairError>;

#[derive(Default)]
struct Group {
    data: Option<PathBuf>,
    info: Option<PathBuf>,
}

struct ReplayEntry {
    job_id: u32,
    key_id: u32,
    key_is_last: bool,
    data_path: PathBuf,
    info_path: PathBuf,
    info: RunInfo,
}

/// A fully-formed repair plan: what gets deleted and, for everything that
/// survives validation, what gets replayed. Produced before any mutation
/// so dry-run mode can show it and stop.
pub struct Plan {
    delete: Vec<PathBuf>,
    replay: Vec<ReplayEntry>,
}

impl Plan {
    pub fn describe(&self) -> String {
        let mut out = format!("{} file(s) to delete, {} run(s) to replay\n", self.delete.len(), self.replay.len());
        for path in &self.delete {
            out.push_str(&format!("  delete {}\n", path.display()));
        }
        for entry in &self.replay {
            out.push_str(&format!(
                "  replay job={} key={} key_is_last={}\n",
                entry.job_id, entry.key_id, entry.key_is_last
            ));
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.delete.is_empty() && self.replay.is_empty()
    }

    pub fn delete_len(&self) -> usize {
        self.delete.len()
    }

    pub fn replay_len(&self) -> usize {
        self.replay.len()
    }
}

/// Outcome of a completed (non dry-run) repair.
pub struct Outcome {
    pub deleted: usize,
    pub replayed: usize,
}

fn walk_groups(admin_dir: &Path) -> RepairResult<(BTreeMap<(u32, u32, bool), Group>, Vec<PathBuf>)> {
    let mut groups: BTreeMap<(u32, u32, bool), Group> = BTreeMap::new();
    let mut unclassifiable = Vec::new();

    let runs_dir = paths::runs_dir(admin_dir);
    let job_dirs = match std::fs::read_dir(&runs_dir) {
        Ok(it) => it,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((groups, unclassifiable)),
        Err(e) => return Err(e.into()),
    };

    for job_entry in job_dirs {
        let job_entry = job_entry?;
        let path = job_entry.path();
        let name = job_entry.file_name();
        let name = name.to_string_lossy().into_owned();
        if !job_entry.file_type()?.is_dir() {
            unclassifiable.push(path);
            continue;
        }
        let Some(job_id) = paths::parse_job_dir(&name) else {
            unclassifiable.push(path);
            continue;
        };
        for file_entry in std::fs::read_dir(&path)? {
            let file_entry = file_entry?;
            let file_path = file_entry.path();
            let file_name = file_entry.file_name();
            let file_name = file_name.to_string_lossy();
            match paths::parse_run_file(&file_name) {
                Some((key_id, key_is_last, is_info)) => {
                    let slot = groups.entry((job_id, key_id, key_is_last)).or_default();
                    if is_info {
                        slot.info = Some(file_path);
                    } else {
                        slot.data = Some(file_path);
                    }
                }
                None => unclassifiable.push(file_path),
            }
        }
    }

    Ok((groups, unclassifiable))
}

/// Builds a repair plan without mutating anything on disk.
pub fn build_plan(admin_dir: &Path) -> RepairResult<Plan> {
    let (groups, mut delete) = walk_groups(admin_dir)?;
    let mut replay = Vec::new();

    for ((job_id, key_id, key_is_last), group) in groups {
        let (Some(data_path), Some(info_path)) = (group.data, group.info) else {
            delete.extend(group.data);
            delete.extend(group.info);
            continue;
        };
        match RunInfo::read(&info_path)? {
            Some(info) if matches!(info.status, RunStatus::Ok) => {
                replay.push(ReplayEntry {
                    job_id,
                    key_id,
                    key_is_last,
                    data_path,
                    info_path,
                    info,
                });
            }
            _ => {
                delete.push(data_path);
                delete.push(info_path);
            }
        }
    }

    replay.sort_by_key(|e| (e.job_id, e.key_id, e.key_is_last));
    Ok(Plan { delete, replay })
}

fn remove_if_present(path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

fn file_len(path: &Path) -> std::io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}

fn atime_secs(path: &Path) -> std::io::Result<u64> {
    let accessed = std::fs::metadata(path)?.accessed()?;
    Ok(accessed.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs())
}

/// Runs the whole repair: refuses outright if a server is live, otherwise
/// claims the `repairing` sentinel, executes the plan, and releases the
/// sentinel whether it succeeded or not.
pub fn run(admin_dir: &Path, force: bool) -> RepairResult<Outcome> {
    let marker = sentinel::server_marker(admin_dir);
    if marker.exists() && !force {
        return Err(RepairError::ServerRunning(marker));
    }

    let plan = build_plan(admin_dir)?;
    let repairing = sentinel::repairing_marker(admin_dir);
    std::fs::write(&repairing, b"")?;
    let result = execute(admin_dir, plan);
    remove_if_present(&repairing)?;
    result
}

fn execute(admin_dir: &Path, plan: Plan) -> RepairResult<Outcome> {
    for path in &plan.delete {
        remove_if_present(path)?;
    }
    let deleted = plan.delete.len();

    let job_names: HashMap<u32, Vec<u8>> = KeyIdLog::load_all(sentinel::job_id_log(admin_dir))?;
    let key_names: HashMap<u32, Vec<u8>> = KeyIdLog::load_all(sentinel::key_id_log(admin_dir))?;

    let config = StoreConfig::load_or_default(admin_dir)?;
    let mut store = CacheStore::open(admin_dir, config, true)?;
    store.clear()?;

    let mut replayed = 0;
    for entry in &plan.replay {
        let Some(job_name) = job_names.get(&entry.job_id) else {
            warn!(job = entry.job_id, "no recorded name for job id; dropping its run");
            remove_if_present(&entry.data_path)?;
            remove_if_present(&entry.info_path)?;
            continue;
        };
        let Some(key_name) = key_names.get(&entry.key_id) else {
            warn!(key = entry.key_id, "no recorded name for key id; dropping its run");
            remove_if_present(&entry.data_path)?;
            remove_if_present(&entry.info_path)?;
            continue;
        };

        let (key, _) = store.intern_key(key_name)?;
        let mut observations = Vec::with_capacity(entry.info.deps.len());
        for d in &entry.info.deps {
            let node = store
                .resolve_node(d.node.as_bytes(), true)?
                .expect("create_if_missing always returns Some");
            observations.push(DepObservation {
                node,
                is_static: d.is_static,
                accesses: Accesses {
                    lnk: d.accesses.lnk,
                    reg: d.accesses.reg,
                    stat: d.accesses.stat,
                },
                full: d.full,
                crc: Crc::from_raw(d.crc),
            });
        }
        let digest = store.compile_digest(observations, false);

        let sz = file_len(&entry.data_path)? + file_len(&entry.info_path)?;
        let last_access = atime_secs(&entry.data_path)?;
        let exe_time = entry.info.exe_time_secs.max(f64::MIN_POSITIVE);
        let rate = to_rate(config.max_rate, sz as f64 / exe_time);

        let (_run, victims) = store.insert_run(job_name, &digest, key, entry.key_is_last, last_access, sz, rate)?;
        if !victims.is_empty() {
            return Err(RepairError::ReplayConflict {
                job: entry.job_id,
                key: entry.key_id,
            });
        }
        replayed += 1;
    }

    store.flush()?;
    Ok(Outcome { deleted, replayed })
}
