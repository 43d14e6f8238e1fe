//! Operator configuration.
//!
//! Settings are read from environment variables populated by the operator's
//! Deployment. Every setting has a default.

use thiserror::Error;

/// Default port of the health and metrics server
pub const DEFAULT_HEALTH_PORT: u16 = 8080;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {name}: {reason}")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

/// Operator-level configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace to watch, `None` for cluster-wide
    pub watch_namespace: Option<String>,
    /// Port of the health and metrics server
    pub health_port: u16,
    /// Delete owned Deployments and Services whose count dropped to zero
    pub prune_disabled_resources: bool,
    /// Instance name reported on published events
    pub pod_name: Option<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            health_port: DEFAULT_HEALTH_PORT,
            prune_disabled_resources: true,
            pod_name: None,
        }
    }
}

impl OperatorConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let health_port = match non_empty("HEALTH_PORT") {
            Some(value) => value
                .trim()
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue {
                    name: "HEALTH_PORT",
                    value: value.clone(),
                    reason: e.to_string(),
                })?,
            None => DEFAULT_HEALTH_PORT,
        };

        let prune_disabled_resources = match non_empty("PRUNE_DISABLED_RESOURCES") {
            Some(value) => parse_bool("PRUNE_DISABLED_RESOURCES", &value)?,
            None => true,
        };

        Ok(Self {
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            health_port,
            prune_disabled_resources,
            pod_name: non_empty("POD_NAME"),
        })
    }
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}
