//! The single-writer event loop: one Unix listener, one shared
//! [`CacheStore`], and a lock instead of the original's dedicated thread —
//! every request only ever mutates the store while holding it, so
//! mutations are serialized the same way a single-threaded event loop
//! would serialize them, just through `tokio::sync::Mutex` rather than by
//! confining all I/O to one OS thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use runcache_core::digest::{Accesses, Crc, DepObservation, MatchOutcome};
use runcache_core::tables::{KeyIdx, NodeIdx};
use runcache_core::{CacheStore, CoreError, KeyIdLog, VictimizedRun};
use runcache_proto::framing;
use runcache_proto::message::{AccessesWire, DepWire, DownloadReply, RpcReply, RpcReq};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::uploads::{self, UploadLedger};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error(transparent)]
    Proto(#[from] runcache_proto::ProtoError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("a server is already running ({0} exists); remove it if the daemon is truly dead")]
    AlreadyRunning(PathBuf),
    #[error("a repair is in progress ({0} exists); refusing to start")]
    RepairInProgress(PathBuf),
}

/// Per-connection state tracked by the daemon: the key this connection's
/// `Config` call interned, kept so a disconnect can drop its reference.
struct Conn {
    key: KeyIdx,
}

struct State {
    store: CacheStore,
    uploads: UploadLedger,
    conns: HashMap<u32, Conn>,
    next_conn_id: u32,
    key_log: KeyIdLog,
    job_log: KeyIdLog,
    admin_dir: PathBuf,
}

fn dep_observations(store: &mut CacheStore, deps: &[DepWire]) -> Result<Vec<DepObservation>, DaemonError> {
    let mut out = Vec::with_capacity(deps.len());
    for d in deps {
        let node = store.resolve_node(d.node.as_bytes(), true)?.expect("create_if_missing");
        out.push(DepObservation {
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
    Ok(out)
}

impl State {
    fn handle(&mut self, req: RpcReq) -> Result<RpcReply, DaemonError> {
        match req {
            RpcReq::Config { repo_key } => self.handle_config(repo_key),
            RpcReq::Download { conn_id: _, job, deps } => self.handle_download(&job, deps),
            RpcReq::Upload { conn_id, reserved_sz } => self.handle_upload(conn_id, reserved_sz),
            RpcReq::Commit {
                conn_id,
                ticket,
                job,
                deps,
                last_access,
                sz,
                rate,
                key_is_last,
            } => self.handle_commit(conn_id, ticket, &job, deps, last_access, sz, rate, key_is_last),
            RpcReq::Dismiss { conn_id, ticket } => self.handle_dismiss(conn_id, ticket),
        }
    }

    fn handle_config(&mut self, repo_key: String) -> Result<RpcReply, DaemonError> {
        let (key, created) = self.store.intern_key(repo_key.as_bytes())?;
        if created {
            self.key_log.record(u32::from(key), repo_key.as_bytes())?;
        }
        let conn_id = self.next_conn_id;
        self.next_conn_id += 1;
        self.conns.insert(conn_id, Conn { key });
        let cfg = self.store.config();
        self.store.flush()?;
        Ok(RpcReply::Config {
            conn_id,
            max_sz: cfg.max_sz,
            max_rate: cfg.max_rate,
        })
    }

    fn handle_download(&mut self, job: &str, deps: Vec<DepWire>) -> Result<RpcReply, DaemonError> {
        let Some(job_idx) = self.store.lookup_job(job.as_bytes()) else {
            return Ok(RpcReply::Download(DownloadReply::Miss));
        };
        let observations = dep_observations(&mut self.store, &deps)?;
        let digest = self.store.compile_digest(observations, true);
        let (run, outcome) = self.store.match_job(job_idx, &digest)?;
        let reply = match outcome {
            MatchOutcome::Hit => {
                let data = self.store.runs.get(run.0);
                DownloadReply::Hit {
                    key: u32::from(data.key),
                    key_is_last: data.key_is_last,
                }
            }
            MatchOutcome::Match { missing } => {
                let mut dep_ids = Vec::with_capacity(missing.len());
                for n in missing {
                    dep_ids.push(node_name_string(&self.store, n)?);
                }
                DownloadReply::Match { dep_ids }
            }
            MatchOutcome::Miss => DownloadReply::Miss,
        };
        self.store.flush()?;
        Ok(RpcReply::Download(reply))
    }

    fn handle_upload(&mut self, conn_id: u32, reserved_sz: u64) -> Result<RpcReply, DaemonError> {
        if !self.conns.contains_key(&conn_id) {
            return Ok(RpcReply::Error {
                msg: format!("upload on unknown connection {conn_id}"),
            });
        }
        match self.store.mk_room(reserved_sz) {
            Ok(victims) => self.delete_victims(&victims)?,
            Err(CoreError::WontFit { requested, max_sz }) => {
                return Ok(RpcReply::Error {
                    msg: format!("reservation of {requested} bytes exceeds the {max_sz} byte cache ceiling"),
                });
            }
            Err(e) => return Err(e.into()),
        }
        let ticket = self.uploads.reserve(conn_id, reserved_sz);
        std::fs::create_dir_all(uploads::reserved_dir(&self.admin_dir))?;
        Ok(RpcReply::Upload {
            ticket,
            filename: ticket.to_string(),
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_commit(
        &mut self,
        conn_id: u32,
        ticket: u32,
        job: &str,
        deps: Vec<DepWire>,
        last_access: u64,
        sz: u64,
        rate: u8,
        key_is_last: bool,
    ) -> Result<RpcReply, DaemonError> {
        let Some(owner) = self.uploads.owner(ticket) else {
            return Ok(RpcReply::Error {
                msg: format!("unknown upload ticket {ticket}"),
            });
        };
        if owner != conn_id {
            return Ok(RpcReply::Error {
                msg: format!("ticket {ticket} does not belong to this connection"),
            });
        }
        let Some(key) = self.conns.get(&conn_id).map(|c| c.key) else {
            return Ok(RpcReply::Error {
                msg: "commit on unknown connection".into(),
            });
        };

        let job_existed = self.store.lookup_job(job.as_bytes()).is_some();
        let observations = dep_observations(&mut self.store, &deps)?;
        let digest = self.store.compile_digest(observations, false);
        let (run, victims) = match self
            .store
            .insert_run(job.as_bytes(), &digest, key, key_is_last, last_access, sz, rate)
        {
            Ok(v) => v,
            Err(CoreError::WontFit { .. }) => {
                self.uploads.release(ticket);
                self.cleanup_reserved(ticket)?;
                return Ok(RpcReply::Commit);
            }
            Err(e) => return Err(e.into()),
        };
        self.delete_victims(&victims)?;
        if !job_existed {
            let data = self.store.runs.get(run.0);
            self.job_log.record(u32::from(data.job), job.as_bytes())?;
        }

        if let Some(reserved) = self.uploads.release(ticket) {
            self.store.release_room(reserved);
        }

        let data = self.store.runs.get(run.0);
        let job_id = u32::from(data.job);
        let key_id = u32::from(key);

        std::fs::create_dir_all(uploads::run_dir(&self.admin_dir, job_id))?;
        std::fs::rename(
            uploads::reserved_data_path(&self.admin_dir, ticket),
            uploads::committed_data_path(&self.admin_dir, job_id, key_id, key_is_last),
        )?;
        std::fs::rename(
            uploads::reserved_info_path(&self.admin_dir, ticket),
            uploads::committed_info_path(&self.admin_dir, job_id, key_id, key_is_last),
        )?;

        self.store.flush()?;
        Ok(RpcReply::Commit)
    }

    fn handle_dismiss(&mut self, conn_id: u32, ticket: u32) -> Result<RpcReply, DaemonError> {
        match self.uploads.owner(ticket) {
            Some(owner) if owner == conn_id => {
                if let Some(reserved) = self.uploads.release(ticket) {
                    self.store.release_room(reserved);
                }
                self.cleanup_reserved(ticket)?;
                Ok(RpcReply::Dismiss)
            }
            _ => Ok(RpcReply::Error {
                msg: format!("unknown upload ticket {ticket}"),
            }),
        }
    }

    fn cleanup_reserved(&self, ticket: u32) -> Result<(), DaemonError> {
        for path in [
            uploads::reserved_data_path(&self.admin_dir, ticket),
            uploads::reserved_info_path(&self.admin_dir, ticket),
        ] {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    fn delete_victims(&self, victims: &[VictimizedRun]) -> Result<(), DaemonError> {
        for v in victims {
            for path in [
                uploads::committed_data_path(&self.admin_dir, v.job, v.key, v.key_is_last),
                uploads::committed_info_path(&self.admin_dir, v.job, v.key, v.key_is_last),
            ] {
                if let Err(e) = std::fs::remove_file(&path) {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        return Err(e.into());
                    }
                }
            }
        }
        Ok(())
    }

    /// Releases every ticket and key reference a disconnecting client was
    /// holding, run once its socket closes.
    fn drop_connection(&mut self, conn_id: u32) {
        for ticket in self.uploads.tickets_for(conn_id) {
            if let Some(reserved) = self.uploads.release(ticket) {
                self.store.release_room(reserved);
            }
            if let Err(e) = self.cleanup_reserved(ticket) {
                warn!(ticket, error = %e, "failed to clean up an abandoned upload reservation");
            }
        }
        self.conns.remove(&conn_id);
    }
}

fn node_name_string(store: &CacheStore, node: NodeIdx) -> Result<String, DaemonError> {
    let bytes = store.node_name(node)?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn serve_connection(stream: UnixStream, state: Arc<Mutex<State>>) {
    let mut stream = stream;
    if let Err(e) = framing::write_magic(&mut stream).await {
        warn!(error = %e, "failed to send protocol magic");
        return;
    }

    let mut my_conn_id: Option<u32> = None;
    loop {
        let req: RpcReq = match framing::read_frame(&mut stream).await {
            Ok(req) => req,
            Err(runcache_proto::ProtoError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(e) => {
                debug!(error = %e, "connection closed on a framing error");
                break;
            }
        };

        let is_config = matches!(req, RpcReq::Config { .. });
        let reply = {
            let mut guard = state.lock().await;
            guard.handle(req)
        };
        let reply = match reply {
            Ok(reply) => {
                if is_config {
                    if let RpcReply::Config { conn_id, .. } = &reply {
                        my_conn_id = Some(*conn_id);
                    }
                }
                reply
            }
            Err(e) => {
                error!(error = %e, "request handling failed");
                RpcReply::Error { msg: e.to_string() }
            }
        };

        if framing::write_frame(&mut stream, &reply).await.is_err() {
            break;
        }
    }

    if let Some(conn_id) = my_conn_id {
        let mut guard = state.lock().await;
        guard.drop_connection(conn_id);
    }
}

/// Creates `{admin}/server.mrkr`, refusing to start if either it or
/// `{admin}/repairing` already exists.
fn claim_sentinels(config: &Config) -> Result<(), DaemonError> {
    let repairing = config.repairing_marker();
    if repairing.exists() {
        return Err(DaemonError::RepairInProgress(repairing));
    }
    let marker = config.server_marker();
    std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::AlreadyExists {
                DaemonError::AlreadyRunning(marker.clone())
            } else {
                DaemonError::Io(e)
            }
        })?;
    Ok(())
}

fn release_sentinels(config: &Config) {
    if let Err(e) = std::fs::remove_file(config.server_marker()) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "failed to remove server marker on shutdown");
        }
    }
}

/// Runs the daemon until a shutdown signal arrives, then removes the
/// listening socket and the server marker before returning.
pub async fn run(config: Config) -> Result<(), DaemonError> {
    claim_sentinels(&config)?;

    let store = CacheStore::open(&config.admin_dir, config.store_config(), true)?;
    let key_log = KeyIdLog::open(config.key_id_log())?;
    let job_log = KeyIdLog::open(config.job_id_log())?;

    let state = Arc::new(Mutex::new(State {
        store,
        uploads: UploadLedger::new(),
        conns: HashMap::new(),
        next_conn_id: 0,
        key_log,
        job_log,
        admin_dir: config.admin_dir.clone(),
    }));

    if config.socket_path.exists() {
        std::fs::remove_file(&config.socket_path)?;
    }
    let listener = UnixListener::bind(&config.socket_path)?;
    info!(socket = %config.socket_path.display(), "listening");

    let result = accept_loop(listener, state.clone()).await;

    {
        let guard = state.lock().await;
        if let Err(e) = guard.store.flush() {
            warn!(error = %e, "failed to flush store on shutdown");
        }
    }
    let _ = std::fs::remove_file(&config.socket_path);
    release_sentinels(&config);
    result
}

async fn accept_loop(listener: UnixListener, state: Arc<Mutex<State>>) -> Result<(), DaemonError> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _addr) = accepted?;
                let state = state.clone();
                tokio::spawn(serve_connection(stream, state));
            }
            _ = shutdown_signal() => {
                info!("shutting down");
                return Ok(());
            }
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl_c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
