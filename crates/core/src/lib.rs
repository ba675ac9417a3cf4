//! The domain layer: table layout, the dependency-digest matcher and the
//! rate-bucketed eviction engine, assembled into the single [`CacheStore`]
//! aggregate the daemon and repair tool both drive.

pub mod digest;
pub mod error;
pub mod keylog;
pub mod lru;
pub mod store;
pub mod tables;

pub use error::{CoreError, CoreResult};
pub use keylog::KeyIdLog;
pub use store::{CacheStore, StoreConfig, VictimizedRun};
