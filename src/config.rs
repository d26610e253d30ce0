//! Configuration management for Keywarden.
//!
//! Settings come from an optional `config.yaml` in the working directory,
//! overridden by `KEYWARDEN_`-prefixed environment variables (use `__` to
//! reach nested fields, e.g. `KEYWARDEN_KEY_ROTATION__KEY_LIFETIME=48h`).
//! Everything is validated before the service starts.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::{
    generator::DEFAULT_RSA_KEY_SIZE,
    key::SigningAlgorithm,
    material::KeySealer,
};

const MIN_KEY_LIFETIME: Duration = Duration::from_secs(3600);
const MIN_KEY_ROTATION_INTERVAL: Duration = Duration::from_secs(30 * 60);
const MIN_RSA_KEY_SIZE: usize = 2048;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is below its hard floor.
    #[error("{field} must be at least {minimum}")]
    BelowMinimum {
        field: &'static str,
        minimum: &'static str,
    },

    #[error("{field} is invalid: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Application configuration settings.
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// The base URL identifying this OIDC provider (e.g., "http://localhost:8080").
    #[serde(default = "default_issuer")]
    pub issuer: String,
    /// Port number the server will listen on.
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub key_rotation: KeyRotationOptions,
    #[serde(default)]
    pub signing: SigningSettings,
    /// Durable key storage. Keys live in memory only when absent.
    #[serde(default)]
    pub persistence: Option<PersistenceSettings>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_issuer() -> String {
    "http://localhost:8080".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Controls how long keys live and how often new ones are minted.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct KeyRotationOptions {
    /// How long a key can sign and validate after it is created.
    #[serde(with = "humantime_serde")]
    pub key_lifetime: Duration,
    /// Time between rotation ticks.
    #[serde(with = "humantime_serde")]
    pub key_rotation_interval: Duration,
}

impl Default for KeyRotationOptions {
    fn default() -> Self {
        Self {
            key_lifetime: Duration::from_secs(24 * 3600),
            key_rotation_interval: Duration::from_secs(12 * 3600),
        }
    }
}

impl KeyRotationOptions {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_lifetime < MIN_KEY_LIFETIME {
            return Err(ConfigError::BelowMinimum {
                field: "key_lifetime",
                minimum: "1h",
            });
        }
        if self.key_rotation_interval < MIN_KEY_ROTATION_INTERVAL {
            return Err(ConfigError::BelowMinimum {
                field: "key_rotation_interval",
                minimum: "30m",
            });
        }
        self.key_lifetime_delta()?;
        Ok(())
    }

    pub(crate) fn key_lifetime_delta(&self) -> Result<chrono::Duration, ConfigError> {
        chrono::Duration::from_std(self.key_lifetime).map_err(|e| ConfigError::Invalid {
            field: "key_lifetime",
            reason: e.to_string(),
        })
    }
}

/// Shape of newly minted keys.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct SigningSettings {
    /// JOSE algorithm name, e.g. "RS256".
    pub algorithm: SigningAlgorithm,
    pub rsa_key_size: usize,
}

impl Default for SigningSettings {
    fn default() -> Self {
        Self {
            algorithm: SigningAlgorithm::RS256,
            rsa_key_size: DEFAULT_RSA_KEY_SIZE,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct PersistenceSettings {
    /// Path to the SQLite database file.
    pub database_path: String,
    /// Base64 encoding of 32 random bytes used to encrypt private keys at rest.
    pub key_encryption_key: String,
}

impl PersistenceSettings {
    pub fn sealer(&self) -> Result<KeySealer, ConfigError> {
        KeySealer::from_base64(&self.key_encryption_key).map_err(|e| ConfigError::Invalid {
            field: "persistence.key_encryption_key",
            reason: e.to_string(),
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoggingFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => tracing::Level::TRACE,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub level: LogLevel,
    pub axum_level: LogLevel,
    pub format: LoggingFormat,
    /// Export spans over OTLP/gRPC (endpoint from `OTEL_EXPORTER_OTLP_ENDPOINT`).
    pub otlp_enabled: bool,
    pub service_name: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            axum_level: LogLevel::Warn,
            format: LoggingFormat::Pretty,
            otlp_enabled: false,
            service_name: "keywarden".to_string(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.key_rotation.validate()?;

        if self.signing.rsa_key_size < MIN_RSA_KEY_SIZE {
            return Err(ConfigError::BelowMinimum {
                field: "signing.rsa_key_size",
                minimum: "2048",
            });
        }
        if let Some(persistence) = &self.persistence {
            persistence.sealer()?;
        }
        Ok(())
    }
}

/// Loads configuration from `config.yaml` (if present) and the environment.
#[tracing::instrument]
pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("KEYWARDEN")
                .prefix_separator("_")
                .separator("__"),
        );
    build(builder)
}

fn build(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<Settings, ConfigError> {
    let cfg = builder.build().map_err(|e| {
        tracing::error!("Failed to build configuration: {}", e);
        e
    })?;

    let settings = cfg.try_deserialize::<Settings>().map_err(|e| {
        tracing::error!("Failed to deserialize configuration: {}", e);
        e
    })?;

    settings.validate()?;
    Ok(settings)
}
