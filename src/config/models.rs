//! Configuration data structures for cidgate.
//!
//! These types map directly to TOML (also JSON / YAML) configuration files. Every section
//! carries defaults so that a minimal config only needs the pinning service endpoint.
use std::time::Duration;

use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "/ip4/127.0.0.1/tcp/8080".to_string()
}

/// Top level gateway configuration.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Structured listen address, e.g. `/ip4/0.0.0.0/tcp/8080`.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub pinning_service: PinningServiceConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
    /// Base URL of the content-retrieval service requests are forwarded to.
    #[serde(default)]
    pub upstream: Option<String>,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl GatewayConfig {
    /// Create a new gateway configuration builder
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            pinning_service: PinningServiceConfig::default(),
            rate_limit: RateLimitSettings::default(),
            shutdown: ShutdownConfig::default(),
            upstream: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Builder for GatewayConfig, mostly used by tests and embedders.
#[derive(Default)]
pub struct GatewayConfigBuilder {
    config: GatewayConfig,
}

impl GatewayConfigBuilder {
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn pinning_service(mut self, endpoint: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.config.pinning_service.endpoint = endpoint.into();
        self.config.pinning_service.api_key = api_key.into();
        self
    }

    pub fn dedicated_gateway(mut self, enabled: bool) -> Self {
        self.config.pinning_service.dedicated_gateway = enabled;
        self
    }

    pub fn client_limit(mut self, burst: u32, period: impl Into<String>) -> Self {
        self.config.rate_limit.client = PoolQuotaConfig {
            burst,
            period: period.into(),
        };
        self
    }

    pub fn resource_limit(mut self, burst: u32, period: impl Into<String>) -> Self {
        self.config.rate_limit.resource = PoolQuotaConfig {
            burst,
            period: period.into(),
        };
        self
    }

    pub fn shutdown(mut self, timeout_secs: u64, progress_interval_secs: u64) -> Self {
        self.config.shutdown = ShutdownConfig {
            timeout_secs,
            progress_interval_secs,
        };
        self
    }

    pub fn upstream(mut self, url: impl Into<String>) -> Self {
        self.config.upstream = Some(url.into());
        self
    }

    pub fn build(self) -> GatewayConfig {
        self.config
    }
}

/// Connection to the pinning service that owns moderation and subscription decisions.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PinningServiceConfig {
    /// Base URL, e.g. `https://pinning.example.com`.
    pub endpoint: String,
    /// Sent as the `blockservice-API-Key` header on every policy call.
    pub api_key: String,
    /// Restrict serving to subscribed resources only.
    pub dedicated_gateway: bool,
    /// Per-call timeout for policy checks.
    pub request_timeout_secs: u64,
}

impl PinningServiceConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for PinningServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            dedicated_gateway: false,
            request_timeout_secs: 15,
        }
    }
}

/// Quota of a single limiter pool: `burst` permits, one refilled every `period`.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct PoolQuotaConfig {
    pub burst: u32,
    /// Parsed by humantime, e.g. "1s", "1m", "1h"
    pub period: String,
}

/// Settings for both limiter pools plus key-space housekeeping.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RateLimitSettings {
    /// Pool keyed by client network address.
    pub client: PoolQuotaConfig,
    /// Pool keyed by canonical resource identifier.
    pub resource: PoolQuotaConfig,
    /// Use `X-Forwarded-For` / `X-Real-IP` as the client key instead of the peer address.
    pub trust_forwarded_for: bool,
    pub housekeeping_interval_secs: u64,
    pub max_tracked_keys: usize,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            client: PoolQuotaConfig {
                burst: 100,
                period: "1m".to_string(),
            },
            resource: PoolQuotaConfig {
                burst: 15,
                period: "1m".to_string(),
            },
            trust_forwarded_for: false,
            housekeeping_interval_secs: 60,
            max_tracked_keys: 100_000,
        }
    }
}

/// Bounds of the graceful drain.
#[derive(Debug, Serialize, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct ShutdownConfig {
    pub timeout_secs: u64,
    pub progress_interval_secs: u64,
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.progress_interval_secs)
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            progress_interval_secs: 5,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Which admission flow applies to gated requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayMode {
    /// Moderation plus subscription check, no rate limiting.
    Dedicated,
    /// Per-client and per-resource rate limits plus moderation.
    Open,
}

impl GatewayMode {
    pub fn from_config(config: &PinningServiceConfig) -> Self {
        if config.dedicated_gateway {
            GatewayMode::Dedicated
        } else {
            GatewayMode::Open
        }
    }
}

impl std::fmt::Display for GatewayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayMode::Dedicated => write!(f, "dedicated"),
            GatewayMode::Open => write!(f, "open"),
        }
    }
}
