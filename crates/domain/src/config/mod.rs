mod logging;
mod otlp;
mod server;
mod storage;

pub use logging::*;
pub use otlp::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub otlp: OtlpIngressConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub stale_run: StaleRunConfig,
}

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. An empty vec
    /// means the config is ready to run.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.otlp.grpc_enabled && self.otlp.grpc_port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "otlp.grpc_port".into(),
                message: "grpc_port must be greater than 0 when grpc is enabled".into(),
            });
        }

        if self.otlp.http_enabled && !self.otlp.http_path.starts_with('/') {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "otlp.http_path".into(),
                message: "http_path must start with '/'".into(),
            });
        }

        if self.forwarder.enabled && self.forwarder.endpoint.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "forwarder.endpoint".into(),
                message: "forwarder is enabled but endpoint is empty".into(),
            });
        }

        if self.forwarder.enabled
            && !self.forwarder.endpoint.is_empty()
            && !self.forwarder.endpoint.starts_with("http://")
            && !self.forwarder.endpoint.starts_with("https://")
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "forwarder.endpoint".into(),
                message: format!(
                    "endpoint must start with http:// or https:// (got \"{}\")",
                    self.forwarder.endpoint
                ),
            });
        }

        if self.forwarder.enabled && self.forwarder.protocol == ForwarderProtocol::Grpc {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "forwarder.protocol".into(),
                message: "grpc forwarding is not implemented; set protocol to \"http\"".into(),
            });
        }

        if self.forwarder.debounce_seconds == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "forwarder.debounce_seconds".into(),
                message: "a zero debounce flushes on every arrival; consider a nonzero window"
                    .into(),
            });
        }

        if self.stale_run.timeout_minutes_default < 1
            || self.stale_run.timeout_minutes_default > 1440
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "stale_run.timeout_minutes_default".into(),
                message: "must be between 1 and 1440 minutes".into(),
            });
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)"
                    .into(),
            });
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_only_warnings() {
        let issues = Config::default().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn zero_port_is_error() {
        let mut cfg = Config::default();
        cfg.server.port = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "server.port" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn forwarder_enabled_without_endpoint_is_error() {
        let mut cfg = Config::default();
        cfg.forwarder.enabled = true;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "forwarder.endpoint" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn forwarder_endpoint_bad_scheme_is_error() {
        let mut cfg = Config::default();
        cfg.forwarder.enabled = true;
        cfg.forwarder.endpoint = "ftp://example.com".into();
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "forwarder.endpoint" && i.message.contains("http://")));
    }

    #[test]
    fn forwarder_enabled_with_grpc_protocol_is_error() {
        let mut cfg = Config::default();
        cfg.forwarder.enabled = true;
        cfg.forwarder.endpoint = "http://collector:4317".into();
        cfg.forwarder.protocol = ForwarderProtocol::Grpc;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "forwarder.protocol" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn stale_run_timeout_out_of_range_is_error() {
        let mut cfg = Config::default();
        cfg.stale_run.timeout_minutes_default = 0;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "stale_run.timeout_minutes_default"));

        cfg.stale_run.timeout_minutes_default = 2000;
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "stale_run.timeout_minutes_default"));
    }

    #[test]
    fn toml_roundtrip() {
        let cfg = Config::default();
        let text = toml::to_string(&cfg).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.server.port, cfg.server.port);
    }

    #[test]
    fn deserialize_empty_uses_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.otlp.grpc_port, 4317);
    }
}
