pub mod http_server;
pub mod middleware;
pub mod pinning_service;
pub mod serve_options;

/// Re-export commonly used types from adapters
pub use http_server::{DrainPolicy, GatewayServer, ServeError};
pub use middleware::{admission_middleware, request_timing_middleware, with_admission};
pub use pinning_service::PinningServiceClient;
pub use serve_options::{
    health_option, request_timing_option, status_option, upstream_option, version_option,
};
