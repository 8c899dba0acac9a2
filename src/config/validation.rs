use eyre::Result;

use crate::{
    config::models::{GatewayConfig, PinningServiceConfig, PoolQuotaConfig, ShutdownConfig},
    utils::listen_addr::ListenAddr,
};

/// Validation result type alias
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation error types
#[derive(Debug, thiserror::Error, Clone)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    #[error("Invalid listen address '{address}': {reason}")]
    InvalidListenAddress { address: String, reason: String },

    #[error("Validation failed: {message}")]
    ValidationFailed { message: String },
}

/// Gateway configuration validator
pub struct ServerConfigValidator;

impl ServerConfigValidator {
    /// Validate the entire gateway configuration, collecting every problem.
    pub fn validate(config: &GatewayConfig) -> ValidationResult<()> {
        let mut errors = Vec::new();

        if let Err(e) = Self::validate_listen_address(&config.listen_addr) {
            errors.push(e);
        }

        if let Err(mut pinning_errors) = Self::validate_pinning_service(&config.pinning_service) {
            errors.append(&mut pinning_errors);
        }

        for (name, pool) in [
            ("rate_limit.client", &config.rate_limit.client),
            ("rate_limit.resource", &config.rate_limit.resource),
        ] {
            if let Err(e) = Self::validate_pool(name, pool) {
                errors.push(e);
            }
        }

        if config.rate_limit.housekeeping_interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "rate_limit.housekeeping_interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if let Err(mut shutdown_errors) = Self::validate_shutdown(&config.shutdown) {
            errors.append(&mut shutdown_errors);
        }

        if let Some(upstream) = &config.upstream {
            if let Err(e) = Self::validate_url(upstream, "upstream") {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::ValidationFailed {
                message: Self::format_multiple_errors(errors),
            })
        }
    }

    fn validate_listen_address(address: &str) -> ValidationResult<()> {
        address
            .parse::<ListenAddr>()
            .map(|_| ())
            .map_err(|e| ValidationError::InvalidListenAddress {
                address: address.to_string(),
                reason: e.to_string(),
            })
    }

    fn validate_pinning_service(config: &PinningServiceConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.endpoint.is_empty() {
            errors.push(ValidationError::MissingField {
                field: "pinning_service.endpoint".to_string(),
            });
        } else if let Err(e) = Self::validate_url(&config.endpoint, "pinning_service.endpoint") {
            errors.push(e);
        }

        if config.request_timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "pinning_service.request_timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_url(url_str: &str, context: &str) -> ValidationResult<()> {
        match url::Url::parse(url_str) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host().is_some() => Ok(()),
            Ok(url) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!(
                    "URL '{url_str}' must use http or https with a host (got scheme '{}')",
                    url.scheme()
                ),
            }),
            Err(e) => Err(ValidationError::InvalidField {
                field: context.to_string(),
                message: format!("Invalid URL '{url_str}': {e}"),
            }),
        }
    }

    fn validate_pool(name: &str, pool: &PoolQuotaConfig) -> ValidationResult<()> {
        if pool.burst == 0 {
            return Err(ValidationError::InvalidField {
                field: format!("{name}.burst"),
                message: "Burst must be greater than 0".to_string(),
            });
        }

        match humantime::parse_duration(&pool.period) {
            Ok(period) if period.is_zero() => Err(ValidationError::InvalidField {
                field: format!("{name}.period"),
                message: "Period must be greater than 0".to_string(),
            }),
            Ok(_) => Ok(()),
            Err(e) => Err(ValidationError::InvalidField {
                field: format!("{name}.period"),
                message: format!("Invalid period '{}': {e}", pool.period),
            }),
        }
    }

    fn validate_shutdown(config: &ShutdownConfig) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if config.timeout_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "shutdown.timeout_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }
        if config.progress_interval_secs == 0 {
            errors.push(ValidationError::InvalidField {
                field: "shutdown.progress_interval_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        } else if config.progress_interval_secs > config.timeout_secs {
            errors.push(ValidationError::InvalidField {
                field: "shutdown.progress_interval_secs".to_string(),
                message: "Must not exceed shutdown.timeout_secs".to_string(),
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn format_multiple_errors(errors: Vec<ValidationError>) -> String {
        if errors.len() == 1 {
            return errors[0].to_string();
        }

        let mut message = format!("{} configuration errors found:\n", errors.len());
        for (i, error) in errors.iter().enumerate() {
            message.push_str(&format!("  {}. {}\n", i + 1, error));
        }
        message
    }
}
