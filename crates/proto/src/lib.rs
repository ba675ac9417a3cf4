//! The wire protocol between the daemon and its clients: message shapes
//! and the length-prefixed framing they travel over.

pub mod framing;
pub mod message;
pub mod run_info;

pub use message::{AccessesWire, DepWire, DownloadReply, RpcReply, RpcReq, MAGIC};
pub use run_info::{RunInfo, RunStatus};

#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),

    #[error("frame of {0} bytes exceeds the maximum accepted size")]
    FrameTooLarge(u64),

    #[error("bad magic: expected {expected:#x}, got {0:#x}", expected = crate::message::MAGIC)]
    BadMagic(u64),
}
