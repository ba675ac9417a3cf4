//! An append-only log mapping interned key ids to their origin bytes,
//! kept outside the on-disk store proper so [`repair`](crate) can recover
//! each filename's key-id after the store — including its own key-name
//! prefix tree — has been reset and is being replayed from scratch.
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::CoreResult;

pub struct KeyIdLog {
    path: PathBuf,
    file: File,
}

impl KeyIdLog {
    pub fn open(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path).map_err(|e| {
            CoreError::Corrupt(format!("cannot open key id log {}: {e}", path.display()))
        })?;
        Ok(KeyIdLog { path, file })
    }

    pub fn record(&mut self, id: u32, origin: &[u8]) -> CoreResult<()> {
        let line = format!("{id}\t{}\n", hex_encode(origin));
        self.file.write_all(line.as_bytes()).map_err(|e| {
            CoreError::Corrupt(format!("cannot append to key id log {}: {e}", self.path.display()))
        })
    }

    /// Reads the whole log into an id → origin-bytes map. A later record
    /// for the same id overwrites an earlier one, though in practice an
    /// id's origin never actually changes once assigned.
    pub fn load_all(path: impl AsRef<Path>) -> CoreResult<HashMap<u32, Vec<u8>>> {
        let path = path.as_ref();
        let mut map = HashMap::new();
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(map),
            Err(e) => {
                return Err(CoreError::Corrupt(format!("cannot open key id log {}: {e}", path.display())))
            }
        };
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| CoreError::Corrupt(format!("reading key id log: {e}")))?;
            let Some((id, hex)) = line.split_once('\t') else {
                continue;
            };
            let (Ok(id), Some(bytes)) = (id.parse::<u32>(), hex_decode(hex)) else {
                continue;
            };
            map.insert(id, bytes);
        }
        Ok(map)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn hex_decode(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_survive_a_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("key_ids.log");
        {
            let mut log = KeyIdLog::open(&path).unwrap();
            log.record(3, b"repo@deadbeef").unwrap();
            log.record(7, b"other-repo@cafef00d").unwrap();
        }
        let loaded = KeyIdLog::load_all(&path).unwrap();
        assert_eq!(loaded.get(&3).map(Vec::as_slice), Some(&b"repo@deadbeef"[..]));
        assert_eq!(loaded.get(&7).map(Vec::as_slice), Some(&b"other-repo@cafef00d"[..]));
    }

    #[test]
    fn missing_log_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = KeyIdLog::load_all(dir.path().join("absent.log")).unwrap();
        assert!(loaded.is_empty());
    }
}
