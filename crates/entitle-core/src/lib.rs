#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::must_use_candidate
)]

mod core;

pub mod auto_attach {
    pub use crate::core::auto_attach::*;
}

pub mod contract {
    pub use crate::core::contract::*;
}

pub mod lock {
    pub use crate::core::lock::*;
}

pub mod store {
    pub use crate::core::store::*;
}

pub use crate::core::auto_attach::{
    cleanup as cleanup_auto_attach, schedule_retry, AttachAction, AttachError, Clock,
    RetryAutoAttach, RetryOutcome, SystemClock,
};
pub use crate::core::config::{Config, LockConfig, PathsConfig, RetryConfig};
pub use crate::core::contract::{
    refresh_contract, reconcile, ContractSource, Entitlement, EntitlementFactory, ReconcileError,
    ReconcileResult, ServiceOutcome,
};
pub use crate::core::lock::{
    LockError, LockGuard, LockHeldError, LockHolder, LockManager, ProcessProbe,
};
#[cfg(unix)]
pub use crate::core::lock::SystemProbe;

pub use entitle_domain::{
    MachineContract, PlatformContext, RetryAutoAttachOptions, RetryAutoAttachState, RetrySchedule,
    ServiceGraph,
};
