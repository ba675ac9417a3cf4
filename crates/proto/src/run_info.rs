//! The shape of the `-info` file the job-execution side writes alongside
//! each artifact blob. The core only ever reads this after a crash or
//! during repair; it never writes it itself — the engine does, as part of
//! committing a run.

use serde::{Deserialize, Serialize};

use crate::message::DepWire;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RunStatus {
    Ok,
    Err(String),
}

/// End-of-job metadata captured alongside a run's artifact blob. Carries
/// everything [`crate::message::RpcReq::Commit`] would need so that
/// repair can replay a run purely from what's sitting on disk: the engine
/// writes the same dependency set here that it sends over the commit RPC.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunInfo {
    pub status: RunStatus,
    /// Wall-clock seconds the job took to execute; used to derive a rate
    /// bucket when replaying a run during repair.
    pub exe_time_secs: f64,
    pub n_statics: u32,
    pub deps: Vec<DepWire>,
}

impl RunInfo {
    pub fn read(path: &std::path::Path) -> std::io::Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(serde_json::from_str(&text).ok())
    }

    pub fn write(&self, path: &std::path::Path) -> std::io::Result<()> {
        let text = serde_json::to_string(self).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(path, text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("0-info");
        let info = RunInfo {
            status: RunStatus::Ok,
            exe_time_secs: 1.5,
            n_statics: 1,
            deps: vec![DepWire {
                node: "a".into(),
                is_static: true,
                accesses: Default::default(),
                full: true,
                crc: 0xdead_beef,
            }],
        };
        info.write(&path).unwrap();
        let got = RunInfo::read(&path).unwrap().unwrap();
        assert!(matches!(got.status, RunStatus::Ok));
        assert_eq!(got.exe_time_secs, 1.5);
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(RunInfo::read(&dir.path().join("absent")).unwrap().is_none());
    }
}
