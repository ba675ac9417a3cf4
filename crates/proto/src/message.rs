//! Wire messages exchanged between the daemon and its clients.
//!
//! A connection always begins with [`MAGIC`] sent by the server right
//! after accept; the client checks it before sending its first request.
//! `Config` establishes a connection's identity (its `conn_id`) by
//! interning the caller's repo key; every subsequent request from either
//! the original connection or a sibling connection doing the actual
//! upload echoes that `conn_id` back so the daemon can charge the right
//! key's refcount and ticket ledger.

use serde::{Deserialize, Serialize};

/// Sent by the server as the first 8 bytes after accept.
pub const MAGIC: u64 = 0x604178e6d1838dce;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccessesWire {
    pub lnk: bool,
    pub reg: bool,
    pub stat: bool,
}

/// One dependency as reported by the engine for a download or commit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DepWire {
    pub node: String,
    pub is_static: bool,
    pub accesses: AccessesWire,
    pub full: bool,
    pub crc: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcReq {
    /// Interns `repo_key` and establishes this connection's identity.
    Config { repo_key: String },
    Download {
        conn_id: u32,
        job: String,
        deps: Vec<DepWire>,
    },
    Upload { conn_id: u32, reserved_sz: u64 },
    Commit {
        conn_id: u32,
        ticket: u32,
        job: String,
        deps: Vec<DepWire>,
        last_access: u64,
        sz: u64,
        rate: u8,
        key_is_last: bool,
    },
    Dismiss { conn_id: u32, ticket: u32 },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum DownloadReply {
    /// Every dependency still checks out; `key`/`key_is_last` identify the
    /// on-disk run directory to read artifacts from.
    Hit { key: u32, key_is_last: bool },
    /// Dependency set matches but at least one crc didn't; `dep_ids` names
    /// which dependencies the engine should re-sense before retrying.
    Match { dep_ids: Vec<String> },
    Miss,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RpcReply {
    Config { conn_id: u32, max_sz: u64, max_rate: u64 },
    Download(DownloadReply),
    Upload { ticket: u32, filename: String },
    Commit,
    Dismiss,
    /// A recoverable failure (malformed request, reservation too large,
    /// unknown job): the connection stays open.
    Error { msg: String },
}
