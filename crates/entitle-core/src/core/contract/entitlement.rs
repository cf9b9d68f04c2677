use entitle_domain::ServiceGraph;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplicationStatus {
    Enabled,
    Warning,
    Disabled,
}

/// Failure raised by a service operation.
///
/// `UserFacing` errors are expected conditions with a message meant for the
/// user; anything else is `Unexpected`.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    UserFacing(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl ServiceError {
    #[must_use]
    pub fn is_unexpected(&self) -> bool {
        matches!(self, ServiceError::Unexpected(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("entitlement `{0}` not found")]
pub struct EntitlementNotFoundError(pub String);

/// One locally managed service.
pub trait Entitlement {
    fn name(&self) -> &str;
    fn application_status(&self) -> Result<ApplicationStatus, ServiceError>;
    /// Whether the service is applicable, entitled and not yet enabled.
    fn can_enable(&self) -> Result<bool, ServiceError>;
    fn enable(&mut self) -> Result<(), ServiceError>;
    fn disable(&mut self) -> Result<(), ServiceError>;
}

pub trait EntitlementFactory {
    fn graph(&self) -> &ServiceGraph;
    fn entitlement(
        &self,
        name: &str,
        assume_yes: bool,
    ) -> Result<Box<dyn Entitlement + '_>, EntitlementNotFoundError>;
}
