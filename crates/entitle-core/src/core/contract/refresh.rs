use entitle_domain::{MachineContract, PlatformContext};
use tracing::{info, warn};

use super::entitlement::EntitlementFactory;
use super::reconcile::{reconcile, AccessMap, ReconcileResult};
use crate::core::config::PathsConfig;
use crate::core::lock::{LockError, LockManager};
use crate::core::store::{DataFile, StateFileError};

const REFRESH_LOCK_HOLDER: &str = "pro refresh";

/// Where fresh contracts come from; the contract server in production.
pub trait ContractSource {
    fn fetch_contract(&self, current: Option<&MachineContract>) -> anyhow::Result<MachineContract>;
}

/// The persisted machine contract.
#[derive(Debug)]
pub struct MachineTokenStore {
    file: DataFile<MachineContract>,
}

impl MachineTokenStore {
    #[must_use]
    pub fn new(paths: &PathsConfig) -> Self {
        Self {
            file: DataFile::new(paths.machine_token_file()),
        }
    }

    /// Reads the stored contract. A corrupt record is removed and treated as
    /// absent so the next fetch starts from scratch.
    pub fn read(&self) -> Result<Option<MachineContract>, StateFileError> {
        match self.file.read() {
            Err(err) if err.is_invalid() => {
                warn!(%err, "discarding unreadable machine contract");
                self.file.delete()?;
                Ok(None)
            }
            other => other,
        }
    }

    pub fn write(&self, contract: &MachineContract) -> Result<(), StateFileError> {
        self.file.write(contract)
    }

    pub fn delete(&self) -> Result<(), StateFileError> {
        self.file.delete()
    }

    /// Access documents of the stored contract; empty when nothing is stored.
    pub fn entitlement_accesses(&self, ctx: &PlatformContext) -> Result<AccessMap, StateFileError> {
        Ok(self
            .read()?
            .map(|contract| contract.entitlement_accesses(ctx))
            .unwrap_or_default())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("failed to fetch contract")]
    Fetch(#[source] anyhow::Error),
    #[error(transparent)]
    Store(#[from] StateFileError),
}

/// Fetches the current contract, persists it and reconciles local services
/// against the difference, all while holding the lock.
pub fn refresh_contract(
    paths: &PathsConfig,
    lock: &LockManager,
    source: &dyn ContractSource,
    factory: &dyn EntitlementFactory,
    ctx: &PlatformContext,
    allow_enable: bool,
) -> Result<ReconcileResult, RefreshError> {
    let guard = lock.acquire(REFRESH_LOCK_HOLDER)?;
    let store = MachineTokenStore::new(paths);

    let current = store.read()?;
    let previous = current
        .as_ref()
        .map(|contract| contract.entitlement_accesses(ctx))
        .unwrap_or_default();
    let updated = source
        .fetch_contract(current.as_ref())
        .map_err(RefreshError::Fetch)?;
    store.write(&updated)?;

    let accesses = updated.entitlement_accesses(ctx);
    info!(services = accesses.len(), "machine contract updated");
    let result = reconcile(factory, &previous, &accesses, ctx, allow_enable);
    if let Err(err) = guard.release() {
        warn!(error = ?err, "failed to release lock after contract refresh");
    }
    Ok(result)
}
