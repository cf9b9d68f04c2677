//! Contract delta reconciliation and contract refresh.

mod entitlement;
mod reconcile;
mod refresh;

pub use entitlement::{
    ApplicationStatus, Entitlement, EntitlementFactory, EntitlementNotFoundError, ServiceError,
};
pub use reconcile::{
    process_entitlement_delta, reconcile, AccessMap, ReconcileError, ReconcileResult,
    ServiceOutcome,
};
pub use refresh::{refresh_contract, ContractSource, MachineTokenStore, RefreshError};
