use async_trait::async_trait;
use http::StatusCode;
use thiserror::Error;

use crate::core::resource::ResourceId;

/// Why a policy check refused a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenialReason {
    /// Content was taken down for legal / abuse / security reasons.
    TakenDown,
    /// The remote service answered with a non-OK status.
    Rejected,
    /// The remote service could not be reached or answered unusably.
    Unavailable,
}

/// A terminal policy decision against a resource. Carries the status code and
/// message the client will see.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct PolicyDenial {
    pub status: StatusCode,
    pub message: String,
    pub reason: DenialReason,
}

impl PolicyDenial {
    pub fn new(status: StatusCode, message: impl Into<String>, reason: DenialReason) -> Self {
        Self {
            status,
            message: message.into(),
            reason,
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            message,
            DenialReason::Unavailable,
        )
    }
}

/// PolicyGate defines the port for external authorization decisions.
///
/// Both checks fail closed: any error is a denial for the current request and
/// is never retried.
#[async_trait]
pub trait PolicyGate: Send + Sync + 'static {
    /// Content moderation (takedown) check for a canonical resource identifier.
    async fn check_moderation(&self, resource: &ResourceId) -> Result<(), PolicyDenial>;

    /// Dedicated gateway subscription check, keyed by the resource's multihash.
    async fn check_access(&self, resource: &ResourceId) -> Result<(), PolicyDenial>;
}
