use async_trait::async_trait;
use http::{StatusCode, header};
use reqwest::Client;
use tracing::Instrument;

use crate::{
    config::models::PinningServiceConfig,
    core::resource::ResourceId,
    ports::policy_gate::{DenialReason, PolicyDenial, PolicyGate},
    tracing_setup::policy_check_span,
};

pub const API_KEY_HEADER: &str = "blockservice-API-Key";

pub const TAKEDOWN_MESSAGE: &str = "The content that you requested has been blocked because of legal, abuse, malware or security reasons. Please contact support@w3ipfs.storage for more information";
pub const MODERATION_UNAVAILABLE: &str = "Error while calling DMCA API";
pub const MODERATION_FALLBACK: &str = "Something went wrong";
pub const ACCESS_UNAVAILABLE: &str = "Error while calling dedicated gateway API";
pub const ACCESS_DENIED: &str = "No users have subscribed to this hash yet.";

/// Most of a rejection body that is read to find the remote message.
pub const MAX_ERROR_BODY: usize = 4 * 1024;

/// Policy gate backed by the pinning service HTTP API.
///
/// * `GET {endpoint}/api/dmca/{cid}` answers the moderation check
/// * `GET {endpoint}/api/dedicatedGateways/{multihash hex}` answers the access check
///
/// One pooled client is shared by every request; each call is bounded by the
/// configured timeout and never retried.
#[derive(Clone)]
pub struct PinningServiceClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl PinningServiceClient {
    pub fn new(config: &PinningServiceConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        tracing::info!(
            endpoint = %config.endpoint,
            timeout = ?config.request_timeout(),
            "Created pinning service client"
        );

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call(
        &self,
        check: &'static str,
        resource: &ResourceId,
        url: String,
        unavailable: &str,
    ) -> Result<reqwest::Response, PolicyDenial> {
        let request = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .header(header::CONTENT_TYPE, "application/json")
            .build()
            .map_err(|e| PolicyDenial::unavailable(format!("failed to create request: {e}")))?;

        let span = policy_check_span(check, resource.as_str());
        let response = self
            .client
            .execute(request)
            .instrument(span.clone())
            .await
            .map_err(|e| {
                tracing::warn!(url = %url, error = %e, "Pinning service call failed");
                PolicyDenial::unavailable(unavailable)
            })?;
        span.record("http.status_code", response.status().as_u16());
        Ok(response)
    }
}

/// Read at most `limit` bytes of the body and drop the rest.
async fn read_capped(mut response: reqwest::Response, limit: usize) -> String {
    let mut body = Vec::with_capacity(
        response
            .content_length()
            .map_or(limit, |len| (len as usize).min(limit)),
    );
    while body.len() < limit {
        match response.chunk().await {
            Ok(Some(chunk)) => {
                let take = chunk.len().min(limit - body.len());
                body.extend_from_slice(&chunk[..take]);
            }
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(error = %e, "Failed to read rejection body");
                break;
            }
        }
    }
    String::from_utf8_lossy(&body).into_owned()
}

/// Best effort extraction of the remote service's own error text.
fn remote_message(body: &str) -> Option<String> {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        return ["message", "error"]
            .iter()
            .find_map(|field| value.get(field)?.as_str())
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string);
    }

    let text = body.trim();
    (!text.is_empty()).then(|| text.to_string())
}

#[async_trait]
impl PolicyGate for PinningServiceClient {
    async fn check_moderation(&self, resource: &ResourceId) -> Result<(), PolicyDenial> {
        let url = format!("{}/api/dmca/{}", self.endpoint, resource);
        let response = self
            .call("moderation", resource, url, MODERATION_UNAVAILABLE)
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::GONE => {
                tracing::warn!(resource = %resource, "Blocked taken down content");
                Err(PolicyDenial::new(
                    StatusCode::GONE,
                    TAKEDOWN_MESSAGE,
                    DenialReason::TakenDown,
                ))
            }
            status => {
                let body = read_capped(response, MAX_ERROR_BODY).await;
                let message =
                    remote_message(&body).unwrap_or_else(|| MODERATION_FALLBACK.to_string());
                tracing::warn!(resource = %resource, %status, %message, "Moderation check rejected");
                Err(PolicyDenial::new(status, message, DenialReason::Rejected))
            }
        }
    }

    async fn check_access(&self, resource: &ResourceId) -> Result<(), PolicyDenial> {
        let hash = resource.hash_hex();
        let url = format!("{}/api/dedicatedGateways/{}", self.endpoint, hash);
        let response = self
            .call("access", resource, url, ACCESS_UNAVAILABLE)
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => {
                tracing::warn!(resource = %resource, hash, %status, "Access check rejected");
                Err(PolicyDenial::new(status, ACCESS_DENIED, DenialReason::Rejected))
            }
        }
    }
}
