//! Internal implementation modules for `entitle-core`.
//!
//! Most callers should go through the re-exports at the crate root.

pub mod auto_attach;
pub mod config;
pub mod contract;
pub mod lock;
pub mod store;
