//! Per-request admission decisions for gated paths.
//!
//! `AdmissionController::admit` runs the ordered checks for one request and
//! returns either the admitted resource (or `None` for paths outside the gated
//! prefix) or the rejection to send. It owns no socket I/O besides the policy
//! calls made through the [`PolicyGate`] port, which keeps it testable with a
//! stub gate.
//!
//! Dedicated mode: parse -> moderation -> access.
//! Open mode: client limit -> parse -> resource limit -> moderation.
use std::sync::Arc;

use http::StatusCode;
use thiserror::Error;

use crate::{
    config::models::GatewayMode,
    core::{
        rate_limiter::{LimiterPool, RateLimiterRegistry},
        resource::{GatedPath, ResourceId},
    },
    ports::policy_gate::{PolicyDenial, PolicyGate},
};

/// Client key used when the peer address is unknown.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Reasons a gated request is refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AdmissionError {
    #[error("Invalid path")]
    InvalidPath,

    #[error("Invalid hash")]
    InvalidHash,

    #[error("Too many requests from this IP")]
    ClientRateLimited,

    #[error("Too many requests for this CID")]
    ResourceRateLimited,

    #[error(transparent)]
    Denied(#[from] PolicyDenial),
}

impl AdmissionError {
    pub fn status(&self) -> StatusCode {
        match self {
            AdmissionError::InvalidPath | AdmissionError::InvalidHash => StatusCode::BAD_REQUEST,
            AdmissionError::ClientRateLimited | AdmissionError::ResourceRateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            }
            AdmissionError::Denied(denial) => denial.status,
        }
    }
}

/// Runs the admission flow selected by the gateway mode.
#[derive(Clone)]
pub struct AdmissionController {
    mode: GatewayMode,
    limiters: Arc<RateLimiterRegistry>,
    policy: Arc<dyn PolicyGate>,
    trust_forwarded_for: bool,
}

impl AdmissionController {
    pub fn new(
        mode: GatewayMode,
        limiters: Arc<RateLimiterRegistry>,
        policy: Arc<dyn PolicyGate>,
    ) -> Self {
        Self {
            mode,
            limiters,
            policy,
            trust_forwarded_for: false,
        }
    }

    /// Key clients by forwarding headers instead of the peer address.
    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }

    pub fn trust_forwarded_for(&self) -> bool {
        self.trust_forwarded_for
    }

    pub fn mode(&self) -> GatewayMode {
        self.mode
    }

    pub fn limiters(&self) -> &Arc<RateLimiterRegistry> {
        &self.limiters
    }

    /// Decide whether a request for `path` from `client_key` may proceed.
    ///
    /// `path` is the raw request path; it is percent-decoded before matching.
    /// Returns `Ok(None)` for paths outside the gated prefix, `Ok(Some(id))`
    /// for admitted gated requests.
    pub async fn admit(
        &self,
        path: &str,
        client_key: &str,
    ) -> Result<Option<ResourceId>, AdmissionError> {
        // match on the decoded path, the form the upstream service routes on
        let decoded = urlencoding::decode(path).map_err(|_| AdmissionError::InvalidPath)?;
        let gated = GatedPath::parse(&decoded);
        if !gated.is_gated() {
            return Ok(None);
        }

        let resource = match self.mode {
            GatewayMode::Dedicated => {
                let resource = Self::resource_from(gated)?;
                self.policy.check_moderation(&resource).await?;
                self.policy.check_access(&resource).await?;
                resource
            }
            GatewayMode::Open => {
                if !self.limiters.allow(LimiterPool::ClientAddress, client_key) {
                    return Err(AdmissionError::ClientRateLimited);
                }
                let resource = Self::resource_from(gated)?;
                if !self.limiters.allow(LimiterPool::ResourceId, resource.as_str()) {
                    return Err(AdmissionError::ResourceRateLimited);
                }
                self.policy.check_moderation(&resource).await?;
                resource
            }
        };

        Ok(Some(resource))
    }

    fn resource_from(gated: GatedPath<'_>) -> Result<ResourceId, AdmissionError> {
        match gated {
            GatedPath::Token(token) => {
                ResourceId::parse(token).map_err(|_| AdmissionError::InvalidHash)
            }
            GatedPath::Empty | GatedPath::NotGated => Err(AdmissionError::InvalidPath),
        }
    }
}
