//! cidgate - admission control and lifecycle management for content-addressed
//! HTTP gateways.
//!
//! cidgate sits in front of a content-retrieval service. Every request under
//! `/ipfs/{cid}` is admitted or rejected before it reaches that service, and
//! the serving process is started and stopped so that in-flight requests are
//! not cut off by a shutdown.
//!
//! # Admission
//! Two flows are selected by `pinning_service.dedicated_gateway`:
//! - **Dedicated**: parse the CID, ask the pinning service whether the content
//!   was taken down, then whether anybody subscribed to it.
//! - **Open**: per-client rate limit, parse the CID, per-CID rate limit, then
//!   the takedown check.
//!
//! Policy checks fail closed. Rejections carry a status code and a short text
//! reason.
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping decision logic inside `core`:
//! - `core`: rate limiter registry, CID parsing, admission flow, handler composition
//! - `ports`: [`PolicyGate`](ports::PolicyGate) and [`HttpServer`](ports::HttpServer)
//! - `adapters`: pinning service client, axum middleware, built-in serve
//!   options, the hyper-util based server
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use cidgate::{
//!     AdmissionController, GatewayServer, GracefulShutdown, PinningServiceClient,
//!     RateLimiterRegistry,
//!     adapters::{DrainPolicy, health_option, with_admission},
//!     config::{GatewayConfig, GatewayMode},
//!     core::{ServeContext, make_handler},
//!     ports::HttpServer,
//!     utils::ListenAddr,
//! };
//!
//! # #[tokio::main] async fn main() -> eyre::Result<()> {
//! let config = Arc::new(cidgate::config::loader::load_config("config.toml").await?);
//! let limiters = Arc::new(RateLimiterRegistry::from_settings(&config.rate_limit)?);
//! let policy = Arc::new(PinningServiceClient::new(&config.pinning_service)?);
//! let controller =
//!     AdmissionController::new(GatewayMode::from_config(&config.pinning_service), limiters, policy);
//!
//! let listen: ListenAddr = config.listen_addr.parse()?;
//! let server = GatewayServer::bind(&listen, DrainPolicy::from(&config.shutdown)).await?;
//! let ctx = ServeContext::new(config.clone(), server.local_addr());
//! let router = with_admission(make_handler(&ctx, vec![health_option()])?, controller);
//!
//! let shutdown = GracefulShutdown::new();
//! server.serve(router, shutdown.shutdown_token()).await?;
//! # Ok(()) }
//! ```
pub mod config;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{GatewayServer, PinningServiceClient, ServeError},
    core::{AdmissionController, AdmissionError, RateLimiterRegistry},
    utils::{GracefulShutdown, ShutdownToken},
};
