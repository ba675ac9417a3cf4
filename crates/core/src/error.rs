/// Errors raised by the domain layer: the dependency matcher, the eviction
/// engine and the table layout built on top of `runcache-store`.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] runcache_store::StoreError),

    #[error("cache would exceed its configured size ceiling even after evicting everything evictable ({requested} bytes requested, {max_sz} byte ceiling)")]
    WontFit { requested: u64, max_sz: u64 },

    #[error("job {job:?} already has a run with key {key:?} and key_is_last set, but a second one was requested")]
    DuplicateLastKey { job: u32, key: u32 },

    #[error("dependency digest rejected: {0}")]
    DigestConflict(String),

    #[error("{0}: domain invariant violated")]
    Corrupt(String),
}

pub type CoreResult<T> = Result<T, CoreError>;
