#![deny(clippy::all)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

pub mod access;
pub mod catalog;
pub mod contract;
pub mod delta;
pub mod lock;
pub mod overrides;
pub mod retry;

pub use access::{Affordances, Directives, EntitlementAccess, Obligations, Override, Selector};
pub use catalog::{default_catalog, GraphError, ServiceGraph, ServiceSpec};
pub use contract::{ContractInfo, MachineContract, MachineTokenInfo, ResourceToken};
pub use delta::{dict_deltas, Delta, DeltaMap};
pub use lock::LockRecord;
pub use overrides::{
    apply_contract_overrides, override_weight, select_overrides, OverrideError, PlatformContext,
};
pub use retry::{RetryAutoAttachOptions, RetryAutoAttachState, RetrySchedule, RETRY_INTERVALS};
