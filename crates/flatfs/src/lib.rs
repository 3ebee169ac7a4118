#![forbid(unsafe_code)]
//! FlatFS public API facade.
//!
//! Re-exports the engine from `flatfs-core` through a stable external
//! interface. This is the crate downstream consumers depend on.

pub use flatfs_core::*;
