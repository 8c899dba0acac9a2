use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use eyre::{Context, Result};

use crate::config::models::GatewayConfig;

/// Environment variable prefix; `CIDGATE__PINNING_SERVICE__API_KEY` overrides
/// `pinning_service.api_key`.
pub const ENV_PREFIX: &str = "CIDGATE";

/// Load configuration from a file using the config crate
/// Supports multiple formats: YAML, JSON, TOML, etc.
pub async fn load_config(config_path: &str) -> Result<GatewayConfig> {
    load_config_sync(config_path)
}

/// Load configuration synchronously, overlaying `CIDGATE__*` environment variables.
pub fn load_config_sync(config_path: &str) -> Result<GatewayConfig> {
    let config_path = Path::new(config_path);

    // Determine file format based on extension
    let format = match config_path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => FileFormat::Yaml,
        Some("json") => FileFormat::Json,
        Some("ini") => FileFormat::Ini,
        _ => FileFormat::Toml,
    };

    let settings = Config::builder()
        .add_source(File::new(
            config_path
                .to_str()
                .ok_or_else(|| eyre::eyre!("Invalid UTF-8 path: {}", config_path.display()))?,
            format,
        ))
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .with_context(|| format!("Failed to build config from {}", config_path.display()))?;

    let gateway_config: GatewayConfig = settings.try_deserialize().with_context(|| {
        format!(
            "Failed to deserialize config from {}",
            config_path.display()
        )
    })?;

    Ok(gateway_config)
}

/// Starter configuration written by `cidgate init`.
pub fn render_default_config(endpoint: &str, api_key: &str, dedicated_gateway: bool) -> String {
    format!(
        r#"# cidgate configuration

# Structured listen address (plain "host:port" is accepted too)
listen_addr = "/ip4/127.0.0.1/tcp/8080"

# Content-retrieval service that admitted requests are forwarded to
# upstream = "http://127.0.0.1:8081"

[pinning_service]
endpoint = "{endpoint}"
api_key = "{api_key}"
dedicated_gateway = {dedicated_gateway}
request_timeout_secs = 15

[rate_limit]
trust_forwarded_for = false
housekeeping_interval_secs = 60
max_tracked_keys = 100000

[rate_limit.client]
burst = 100
period = "1m"

[rate_limit.resource]
burst = 15
period = "1m"

[shutdown]
timeout_secs = 30
progress_interval_secs = 5

[logging]
level = "info"
json = false
"#
    )
}
