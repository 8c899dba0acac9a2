//! Axum middleware used by the gateway.
//!
//! The admission middleware is the request-facing side of
//! [`AdmissionController`]: it derives the client key, runs the admission
//! flow and either forwards the request or renders the rejection. The
//! remaining helpers are stateless diagnostics layers.
use std::{net::SocketAddr, time::Instant};

use axum::{
    Router,
    extract::{ConnectInfo, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
};

use crate::core::admission::{AdmissionController, AdmissionError, UNKNOWN_CLIENT};

pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

impl IntoResponse for AdmissionError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}

/// First address of `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_client(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());

    forwarded
        .or_else(|| {
            headers
                .get("x-real-ip")
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        })
        .map(str::to_string)
}

/// Limiter key of the requesting client: the peer IP without its port.
pub fn client_key(req: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = forwarded_client(req.headers()) {
            return forwarded;
        }
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}

/// Gate requests through the admission flow.
///
/// Admitted gated requests carry their [`ResourceId`](crate::core::resource::ResourceId)
/// as a request extension for downstream handlers.
pub async fn admission_middleware(
    State(controller): State<AdmissionController>,
    mut req: Request,
    next: Next,
) -> Response {
    let client = client_key(&req, controller.trust_forwarded_for());
    let path = req.uri().path().to_string();

    match controller.admit(&path, &client).await {
        Ok(Some(resource)) => {
            tracing::debug!(path, client, resource = %resource, "Request admitted");
            req.extensions_mut().insert(resource);
            next.run(req).await
        }
        Ok(None) => next.run(req).await,
        Err(AdmissionError::Denied(denial)) => {
            tracing::warn!(
                path,
                client,
                status = %denial.status,
                reason = ?denial.reason,
                "Request denied by policy"
            );
            AdmissionError::Denied(denial).into_response()
        }
        Err(e) => {
            tracing::debug!(path, client, status = %e.status(), error = %e, "Request rejected");
            e.into_response()
        }
    }
}

/// Put the admission flow in front of a composed handler.
pub fn with_admission(router: Router, controller: AdmissionController) -> Router {
    router.layer(middleware::from_fn_with_state(controller, admission_middleware))
}

/// Log start/end of a request including latency, tagged with a per-request
/// UUID that is echoed back as `X-Request-ID`.
pub async fn request_timing_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let request_id = uuid::Uuid::new_v4().to_string();
    let method = req.method().clone();
    let uri = req.uri().clone();

    let span = tracing::info_span!("request", request_id = %request_id);
    span.in_scope(|| tracing::debug!(%method, %uri, "Started processing request"));

    let mut response = next.run(req).await;

    span.in_scope(|| {
        tracing::info!(
            %method,
            %uri,
            status = response.status().as_u16(),
            latency = ?start.elapsed(),
            "Completed request"
        )
    });

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
