//! Built-in serve options.
//!
//! Each function returns a [`ServeOption`] to be folded by
//! [`make_handler`](crate::core::pipeline::make_handler). Order matters:
//! routes registered before a mediating option bypass its wrapper.
use std::{convert::Infallible, sync::Arc};

use axum::{
    Json,
    body::Body,
    extract::Request,
    http::{HeaderMap, HeaderName, StatusCode, Uri, Version, header},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::TokioExecutor,
};
use chrono::Utc;
use serde_json::json;

use crate::{
    adapters::middleware::request_timing_middleware,
    config::models::GatewayMode,
    core::{
        pipeline::{ComposeError, ServeContext, ServeMux, ServeOption},
        rate_limiter::{LimiterPool, RateLimiterRegistry},
    },
    utils::listen_addr::socket_to_multiaddr,
};

type UpstreamClient = Client<HttpConnector, Body>;

/// `GET /health` answers `OK` while the server is accepting requests.
pub fn health_option() -> ServeOption {
    Box::new(|_: &ServeContext, mux: ServeMux| Ok(mux.route("/health", get(|| async { "OK" }))))
}

/// `GET /version` reports the package name and version.
pub fn version_option() -> ServeOption {
    Box::new(|_: &ServeContext, mux: ServeMux| {
        Ok(mux.route(
            "/version",
            get(|| async {
                Json(json!({
                    "name": env!("CARGO_PKG_NAME"),
                    "version": env!("CARGO_PKG_VERSION"),
                }))
            }),
        ))
    })
}

/// `GET /status` reports the admission mode, listen address, start time and
/// limiter key counts.
pub fn status_option(mode: GatewayMode, limiters: Arc<RateLimiterRegistry>) -> ServeOption {
    Box::new(move |ctx: &ServeContext, mux: ServeMux| {
        let listen = socket_to_multiaddr(ctx.local_addr()).to_string();
        let started_at = Utc::now().to_rfc3339();
        Ok(mux.route(
            "/status",
            get(move || async move {
                Json(json!({
                    "mode": mode.to_string(),
                    "listen_addr": listen,
                    "started_at": started_at,
                    "tracked_keys": {
                        "client_address": limiters.tracked_keys(LimiterPool::ClientAddress),
                        "resource_id": limiters.tracked_keys(LimiterPool::ResourceId),
                    },
                }))
            }),
        ))
    })
}

/// Log every later-registered request with its latency and a request id.
pub fn request_timing_option() -> ServeOption {
    Box::new(|_: &ServeContext, mux: ServeMux| {
        Ok(mux.mediate(|router| router.layer(middleware::from_fn(request_timing_middleware))))
    })
}

/// Forward everything left unmatched to the configured upstream service.
///
/// Without an `upstream` in the configuration this option does nothing.
pub fn upstream_option() -> ServeOption {
    Box::new(|ctx: &ServeContext, mux: ServeMux| {
        let Some(upstream) = ctx.config().upstream.as_deref() else {
            return Ok(mux);
        };

        let base = parse_upstream(upstream)?;
        let client: UpstreamClient = Client::builder(TokioExecutor::new()).build_http();
        tracing::info!(upstream = %base, "Forwarding unmatched requests upstream");

        Ok(mux.fallback_service(tower::service_fn(move |req: Request| {
            let client = client.clone();
            let base = base.clone();
            async move { Ok::<_, Infallible>(forward(&client, &base, req).await) }
        })))
    })
}

fn parse_upstream(raw: &str) -> Result<Arc<str>, ComposeError> {
    let url = url::Url::parse(raw)
        .map_err(|e| ComposeError::option("upstream", format!("invalid url '{raw}': {e}")))?;
    if url.scheme() != "http" || url.host().is_none() {
        return Err(ComposeError::option(
            "upstream",
            format!("'{raw}' must be a plain http url with a host"),
        ));
    }
    Ok(Arc::from(raw.trim_end_matches('/')))
}

/// Headers scoped to a single connection, never forwarded in either direction.
const HOP_BY_HOP: [HeaderName; 9] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    HeaderName::from_static("proxy-connection"),
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// Remove hop-by-hop headers, including any listed in `Connection`.
fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

async fn forward(client: &UpstreamClient, base: &str, mut req: Request) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{base}{path_and_query}");

    match target.parse::<Uri>() {
        Ok(uri) => *req.uri_mut() = uri,
        Err(e) => {
            tracing::warn!(upstream_uri = %target, error = %e, "Cannot build upstream uri");
            return (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response();
        }
    }
    *req.version_mut() = Version::HTTP_11;
    req.headers_mut().remove(header::HOST);
    strip_hop_by_hop(req.headers_mut());

    match client.request(req).await {
        Ok(mut response) => {
            strip_hop_by_hop(response.headers_mut());
            response.map(Body::new)
        }
        Err(e) => {
            tracing::warn!(upstream_uri = %target, error = %e, "Upstream request failed");
            (StatusCode::BAD_GATEWAY, "Bad Gateway").into_response()
        }
    }
}
