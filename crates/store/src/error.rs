use std::path::PathBuf;

/// Errors raised by the on-disk kernel.
///
/// Per the error model in the design: under-dimensioned capacity and I/O
/// failures are fatal to the process that hits them, but callers still get a
/// typed value back so a daemon can log context before aborting.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{path}: capacity exceeded ({requested} > {capacity} bytes); recompile with a larger ceiling")]
    CapacityExceeded {
        path: PathBuf,
        requested: u64,
        capacity: u64,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}: store invariant violated")]
    Corrupt(String),

    #[error("attempt to write through a read-only mapping of {0}")]
    ReadOnly(PathBuf),
}

pub type StoreResult<T> = Result<T, StoreError>;
