//! Library surface for the cache daemon binary, split out so integration
//! tests under `tests/` can drive [`daemon::run`] directly.

pub mod config;
pub mod daemon;
pub mod uploads;
