use crate::error::{RateLimitError, Result};
use crate::rate_limit::middleware::MiddlewareOptions;
use crate::rate_limit::types::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Rate limit policy
    pub rate_limit: RateLimitConfig,
    /// Response behaviour of the middleware
    #[serde(default)]
    pub middleware: MiddlewareOptions,
    /// Where rate limit state is kept
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Storage backend kind
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Redis, shared by every instance
    Shared,
    /// In-process memory, one limit per instance
    #[default]
    Local,
}

/// Storage backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
    /// Redis connection URL (required for `shared`)
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Upper bound on one backend call, in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Interval of the local store's eviction sweep (0 disables it)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout_ms() -> u64 {
    500
}

fn default_sweep_interval() -> u64 {
    60
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            redis_url: None,
            timeout_ms: default_timeout_ms(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl BackendConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Sweep interval, or `None` when sweeping is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}

impl AdmissionConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| RateLimitError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| RateLimitError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        self.rate_limit.validate()?;
        self.middleware.validate()?;

        if self.backend.timeout_ms == 0 {
            return Err(RateLimitError::Config(
                "Backend timeout must be > 0".to_string(),
            ));
        }

        if self.backend.kind == BackendKind::Shared {
            match self.backend.redis_url.as_deref() {
                None | Some("") => {
                    return Err(RateLimitError::Config(
                        "Shared backend requires redis_url".to_string(),
                    ))
                }
                Some(url) if !url.starts_with("redis://") && !url.starts_with("rediss://") => {
                    return Err(RateLimitError::Config(format!(
                        "Redis URL must start with redis:// or rediss://, got: {}",
                        url
                    )))
                }
                Some(_) => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::types::RateLimitAlgorithm;
    use std::io::Write;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9090

rate_limit:
  limit: 100
  window_secs: 60
  algorithm: token-bucket
  max_burst_size: 150
  key_namespace: "api"

middleware:
  always_send_headers: false
  header_name: "Search"
  status_code: 503

backend:
  kind: shared
  redis_url: "redis://127.0.0.1:6379"
  timeout_ms: 250
"#;

        let config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.rate_limit.algorithm, RateLimitAlgorithm::TokenBucket);
        assert_eq!(config.rate_limit.burst_size(), 150);
        assert_eq!(config.rate_limit.key_namespace, "api");
        assert!(!config.middleware.always_send_headers);
        assert_eq!(config.middleware.header_name, "Search");
        assert_eq!(config.middleware.status_code, 503);
        assert_eq!(config.backend.kind, BackendKind::Shared);
        assert_eq!(config.backend.timeout(), Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let yaml = r#"
rate_limit:
  limit: 10
  window_secs: 1
"#;

        let config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.rate_limit.algorithm, RateLimitAlgorithm::FixedWindow);
        assert!(config.middleware.always_send_headers);
        assert_eq!(config.middleware.header_name, "Global");
        assert_eq!(config.middleware.status_code, 429);
        assert_eq!(config.backend.kind, BackendKind::Local);
        assert_eq!(config.backend.timeout_ms, 500);
        assert_eq!(config.backend.sweep_interval(), Some(Duration::from_secs(60)));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_limit() {
        let yaml = r#"
rate_limit:
  limit: 0
  window_secs: 60
"#;

        let config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_shared_requires_redis_url() {
        let yaml = r#"
rate_limit:
  limit: 10
  window_secs: 60
backend:
  kind: shared
"#;

        let mut config = AdmissionConfig::from_yaml(yaml).unwrap();
        assert!(config.validate().is_err());

        config.backend.redis_url = Some("http://localhost:6379".to_string());
        assert!(config.validate().is_err());

        config.backend.redis_url = Some("redis://localhost:6379".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_algorithm_rejected() {
        let yaml = r#"
rate_limit:
  limit: 10
  window_secs: 60
  algorithm: leaky-bucket
"#;

        assert!(AdmissionConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "rate_limit:\n  limit: 5\n  window_secs: 10").unwrap();

        let config = AdmissionConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rate_limit.limit, 5);

        assert!(AdmissionConfig::from_file("/nonexistent/admission.yaml").is_err());
    }
}
