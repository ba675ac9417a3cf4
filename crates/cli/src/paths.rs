//! The on-disk naming scheme for committed run artifacts, duplicated from
//! the daemon's `uploads` module rather than shared across binaries: the
//! repair tool treats the file tree as untrusted input to reparse from
//! scratch, not a data structure handed to it by a trusted writer.

use std::path::{Path, PathBuf};

pub fn runs_dir(admin_dir: &Path) -> PathBuf {
    admin_dir.join("runs")
}

pub fn job_dir_name(job: u32) -> String {
    format!("job-{job}")
}

pub fn parse_job_dir(name: &str) -> Option<u32> {
    name.strip_prefix("job-")?.parse().ok()
}

/// `(key, key_is_last, is_info)` parsed out of a `{key}-{first,last}-{data,info}`
/// filename, or `None` if the name doesn't fit the scheme at all.
pub fn parse_run_file(name: &str) -> Option<(u32, bool, bool)> {
    let (key, rest) = name.split_once('-')?;
    let key = key.parse().ok()?;
    let (slot, kind) = rest.split_once('-')?;
    let key_is_last = match slot {
        "last" => true,
        "first" => false,
        _ => return None,
    };
    let is_info = match kind {
        "info" => true,
        "data" => false,
        _ => return None,
    };
    Some((key, key_is_last, is_info))
}
