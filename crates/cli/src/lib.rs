//! Offline repair and consistency-check library behind the `runcache-repair`
//! binary, split out so integration tests can drive a fixture tree through
//! the same entry points the CLI uses.

pub mod chk;
pub mod paths;
pub mod repair;
pub mod sentinel;
