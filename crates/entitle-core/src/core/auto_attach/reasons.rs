use crate::core::lock::LockHeldError;

const UNKNOWN_REASON: &str = "an unknown error";

/// Failure of a single attach attempt.
#[derive(Debug, thiserror::Error)]
pub enum AttachError {
    #[error("this machine is already attached")]
    AlreadyAttached,
    #[error("failed to enable default services: {}", .failed_services.join(", "))]
    EntitlementsNotEnabled { failed_services: Vec<String> },
    #[error(transparent)]
    LockHeld(#[from] LockHeldError),
    #[error("contract server error: {}", .message.as_deref().unwrap_or("no details"))]
    ContractApi { message: Option<String> },
    #[error("failed to connect to {}: {message}", .url.as_deref().unwrap_or("the contract server"))]
    Connectivity { url: Option<String>, message: String },
    #[error("this cloud image is not valid for auto-attach")]
    InvalidImage,
    #[error("this cloud image does not support auto-attach")]
    NonAutoAttachImage,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AttachError {
    /// Terminal errors stop the retry loop without counting as a failure.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AttachError::AlreadyAttached | AttachError::EntitlementsNotEnabled { .. }
        )
    }

    /// Short human phrase explaining the failure, as shown in notices.
    #[must_use]
    pub fn failure_reason(&self) -> String {
        match self {
            AttachError::LockHeld(err) => format!("the lock was held by pid {}", err.pid),
            AttachError::ContractApi {
                message: Some(message),
            } => format!("an error from the contract server: \"{message}\""),
            AttachError::Connectivity { url: Some(url), .. } => {
                format!("an error while reaching {url}")
            }
            AttachError::Connectivity { url: None, .. } => "a connectivity error".to_string(),
            AttachError::InvalidImage => "an invalid image".to_string(),
            AttachError::NonAutoAttachImage => {
                "an image that does not support auto-attach".to_string()
            }
            _ => UNKNOWN_REASON.to_string(),
        }
    }

    pub(crate) fn unknown_reason() -> &'static str {
        UNKNOWN_REASON
    }
}
