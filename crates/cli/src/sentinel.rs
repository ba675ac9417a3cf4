//! The two sentinel files that gate offline tools against a live daemon:
//! `server.mrkr` (a server is running) and `repairing` (a repair is
//! mid-flight, left behind by a crash so the next run can detect it).

use std::path::{Path, PathBuf};

pub fn server_marker(admin_dir: &Path) -> PathBuf {
    admin_dir.join("server.mrkr")
}

pub fn repairing_marker(admin_dir: &Path) -> PathBuf {
    admin_dir.join("repairing")
}

pub fn key_id_log(admin_dir: &Path) -> PathBuf {
    admin_dir.join("key_ids.log")
}

pub fn job_id_log(admin_dir: &Path) -> PathBuf {
    admin_dir.join("job_ids.log")
}
