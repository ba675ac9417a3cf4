//! Daemon configuration: an optional TOML file under `{admin}/config.toml`
//! with CLI flags layered on top, the way the teacher layers `--repo`
//! flags over a parsed `repos.toml`.

use std::path::PathBuf;

use runcache_core::StoreConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(transparent)]
    Store(#[from] runcache_core::CoreError),
}

/// Fully resolved daemon configuration: CLI flags (where given) override
/// `{admin}/config.toml`, which overrides [`StoreConfig`]'s built-in
/// defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub admin_dir: PathBuf,
    pub socket_path: PathBuf,
    pub max_sz: u64,
    pub max_rate: u64,
    pub max_runs_per_job: u32,
}

impl Config {
    pub fn resolve(
        admin_dir: PathBuf,
        socket_path: Option<PathBuf>,
        max_sz: Option<u64>,
        max_rate: Option<u64>,
        max_runs_per_job: Option<u32>,
    ) -> Result<Self, ConfigError> {
        let file = StoreConfig::load_or_default(&admin_dir)?;
        Ok(Config {
            socket_path: socket_path.unwrap_or_else(|| admin_dir.join("socket")),
            max_sz: max_sz.unwrap_or(file.max_sz),
            max_rate: max_rate.unwrap_or(file.max_rate),
            max_runs_per_job: max_runs_per_job.unwrap_or(file.max_runs_per_job),
            admin_dir,
        })
    }

    pub fn store_config(&self) -> runcache_core::StoreConfig {
        runcache_core::StoreConfig {
            max_rate: self.max_rate,
            max_sz: self.max_sz,
            max_runs_per_job: self.max_runs_per_job,
        }
    }

    pub fn server_marker(&self) -> PathBuf {
        self.admin_dir.join("server.mrkr")
    }

    pub fn repairing_marker(&self) -> PathBuf {
        self.admin_dir.join("repairing")
    }

    pub fn key_id_log(&self) -> PathBuf {
        self.admin_dir.join("key_ids.log")
    }

    pub fn job_id_log(&self) -> PathBuf {
        self.admin_dir.join("job_ids.log")
    }
}
