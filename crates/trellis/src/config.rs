// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server configuration
//!
//! Settings are layered with the `config` crate, later sources overriding earlier ones:
//!
//! 1. built-in defaults
//! 2. `config.json`
//! 3. `config.{environment}.json`
//! 4. `SERVER__*` environment variables, `__` separating nested keys
//!    (`SERVER__CORS__ALLOWED_ORIGINS=https://a.example,https://b.example`)

use std::{
    fmt,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::Path,
    time::Duration,
};

use anyhow::{Result, anyhow, ensure};
use config::{Config, ConfigError, Environment as ConfigEnv, File};
use serde::{Deserialize, Deserializer, Serialize, de};
use trellis_routes::{DEFAULT_BODY_LIMIT, DEFAULT_PREFIX};
use utoipa::ToSchema;

use crate::error::{ServerError, ServerResult};

const ENVIRONMENT_VAR: &str = "ENVIRONMENT";

/// A listening port validated against the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerPort {
    port: u16,
    environment: Environment,
}

impl ServerPort {
    /// Validate `port` for `environment`
    ///
    /// # Errors
    ///
    /// Returns an error if the port is 0 outside of testing
    pub fn new(port: u16, environment: Environment) -> Result<Self> {
        if port == 0 && environment != Environment::Testing {
            return Err(anyhow!("port cannot be 0 in non-testing environments"));
        }
        Ok(Self { port, environment })
    }

    /// Development default, 3000
    pub const fn default_development() -> Self {
        Self {
            port: 3000,
            environment: Environment::Development,
        }
    }

    /// OS-assigned port
    pub const fn testing() -> Self {
        Self {
            port: 0,
            environment: Environment::Testing,
        }
    }

    /// Port number
    pub fn value(&self) -> u16 {
        self.port
    }
}

impl<'de> Deserialize<'de> for ServerPort {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        // revalidated in `ServerConfig::load_from` once the environment is known
        let port = u16::deserialize(deserializer)?;
        Ok(Self {
            port,
            environment: Environment::Development,
        })
    }
}

/// Request timeout, 1 to 300 seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutSeconds(Duration);

impl TimeoutSeconds {
    /// Validate a timeout in seconds
    ///
    /// # Errors
    ///
    /// Returns an error if `seconds` is 0 or above 300
    pub fn new(seconds: u64) -> Result<Self> {
        ensure!(seconds != 0, "timeout must be greater than 0");
        ensure!(seconds <= 300, "timeout cannot exceed 300");
        Ok(Self(Duration::from_secs(seconds)))
    }

    /// 30 seconds
    pub const fn default_value() -> Self {
        Self(Duration::from_secs(30))
    }

    /// 5 seconds
    pub const fn testing() -> Self {
        Self(Duration::from_secs(5))
    }

    /// Timeout duration
    pub fn value(&self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for TimeoutSeconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Self::new(seconds).map_err(|e| de::Error::custom(e.to_string()))
    }
}

impl Default for TimeoutSeconds {
    fn default() -> Self {
        Self::default_value()
    }
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production
    Production,
    /// Development
    Development,
    /// Testing
    Testing,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Development => write!(f, "development"),
            Environment::Testing => write!(f, "testing"),
        }
    }
}

/// Cross-origin settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    /// Allowed origins; any origin when empty
    pub allowed_origins: Vec<String>,
    /// Whether credentials may be sent cross-origin
    pub allow_credentials: bool,
    /// Preflight cache lifetime
    pub max_age_seconds: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allow_credentials: false,
            max_age_seconds: 3600,
        }
    }
}

/// Security response headers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityHeadersConfig {
    /// Send `X-Content-Type-Options`, `X-Frame-Options` and `Referrer-Policy`
    pub enabled: bool,
}

impl Default for SecurityHeadersConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// OpenAPI document and Swagger UI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocsConfig {
    /// Serve `/api-doc/openapi.json` and `/swagger-ui`
    pub enabled: bool,
    /// Document title
    pub title: String,
    /// API version
    pub version: String,
    /// Document description
    pub description: Option<String>,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            title: "Trellis API".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            description: None,
        }
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub host: IpAddr,
    /// Bind port
    pub port: ServerPort,
    /// Per-request timeout
    pub timeout_seconds: TimeoutSeconds,
    /// Deployment environment
    pub environment: Environment,
    /// Prefix applied to routes that do not override it
    pub api_prefix: String,
    /// Maximum request body size
    pub body_limit_bytes: usize,
    /// Default log filter when `RUST_LOG` is unset
    pub log_level: String,
    /// Cross-origin settings
    #[serde(default)]
    pub cors: CorsConfig,
    /// Security response headers
    #[serde(default)]
    pub security_headers: SecurityHeadersConfig,
    /// API documentation
    #[serde(default)]
    pub docs: DocsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: ServerPort::default_development(),
            timeout_seconds: TimeoutSeconds::default(),
            environment: Environment::Development,
            api_prefix: DEFAULT_PREFIX.to_string(),
            body_limit_bytes: DEFAULT_BODY_LIMIT,
            log_level: "info".to_string(),
            cors: CorsConfig::default(),
            security_headers: SecurityHeadersConfig::default(),
            docs: DocsConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from the working directory and the process environment
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if a source is malformed or a value is invalid.
    pub fn from_env() -> ServerResult<Self> {
        Self::load().map_err(|e| ServerError::Config {
            message: format!("failed to load configuration: {e}"),
        })
    }

    /// [`ServerConfig::load_from`] the working directory, environment taken from `ENVIRONMENT`
    pub fn load() -> Result<Self, ConfigError> {
        let environment = std::env::var(ENVIRONMENT_VAR).ok();
        Self::load_from(Path::new("."), environment.as_deref())
    }

    /// Load configuration files from `dir`
    ///
    /// `environment` selects `config.{environment}.json` and, when given, overrides the
    /// `environment` key of every other source.
    pub fn load_from(dir: &Path, environment: Option<&str>) -> Result<Self, ConfigError> {
        let env_name = environment.unwrap_or("development").to_lowercase();

        let mut builder = Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 3000)?
            .set_default("timeout_seconds", 30)?
            .set_default("environment", "development")?
            .set_default("api_prefix", DEFAULT_PREFIX)?
            .set_default("body_limit_bytes", 1_048_576)?
            .set_default("log_level", "info")?
            .add_source(File::from(dir.join("config.json")).required(false))
            .add_source(File::from(dir.join(format!("config.{env_name}.json"))).required(false))
            .add_source(
                ConfigEnv::with_prefix("SERVER")
                    .prefix_separator("__")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("cors.allowed_origins")
                    .try_parsing(true),
            );

        if environment.is_some() {
            builder = builder.set_override("environment", env_name)?;
        }

        let mut server_config: Self = builder.build()?.try_deserialize()?;

        server_config.port = ServerPort::new(server_config.port.value(), server_config.environment)
            .map_err(|e| ConfigError::Message(format!("invalid port configuration: {e}")))?;
        if server_config.body_limit_bytes == 0 {
            return Err(ConfigError::Message(
                "body_limit_bytes must be greater than 0".to_string(),
            ));
        }

        Ok(server_config)
    }

    /// Configuration for tests: OS-assigned port, short timeout
    pub fn for_testing() -> Self {
        Self {
            port: ServerPort::testing(),
            timeout_seconds: TimeoutSeconds::testing(),
            environment: Environment::Testing,
            log_level: "debug".to_string(),
            ..Self::default()
        }
    }

    /// Socket address to bind
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_validation() {
        assert!(TimeoutSeconds::new(0).is_err());
        assert!(TimeoutSeconds::new(400).is_err());

        assert!(TimeoutSeconds::new(30).is_ok());
        assert!(TimeoutSeconds::new(1).is_ok());
        assert!(TimeoutSeconds::new(300).is_ok());
    }

    #[test]
    fn server_port_validation() {
        assert!(ServerPort::new(0, Environment::Testing).is_ok());
        assert!(ServerPort::new(0, Environment::Development).is_err());
        assert!(ServerPort::new(0, Environment::Production).is_err());

        assert!(ServerPort::new(3000, Environment::Development).is_ok());
        assert!(ServerPort::new(443, Environment::Production).is_ok());
    }

    #[test]
    fn environment_display() {
        assert_eq!(Environment::Production.to_string(), "production");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Testing.to_string(), "testing");
    }

    #[test]
    fn testing_config() {
        let config = ServerConfig::for_testing();
        assert_eq!(config.port.value(), 0);
        assert_eq!(config.api_prefix, "api");
        assert_eq!(config.body_limit_bytes, DEFAULT_BODY_LIMIT);
        assert!(config.docs.enabled);
        assert!(config.cors.allowed_origins.is_empty());
    }
}
