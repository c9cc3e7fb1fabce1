//! Application configuration
//!
//! Layered: built-in defaults, then an optional TOML file, then environment
//! variables prefixed `FACEGUARD` with `__` between sections
//! (`FACEGUARD__SECURITY__MAX_FAILED_ATTEMPTS=5`).

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use camera_capture::CameraConfig;
use config::{Config, ConfigError, Environment, File};
use door_lock::DoorConfig;
use face_match::MatcherConfig;
use liveness::LivenessConfig;
use pipeline::PipelineConfig;
use security::SecurityConfig;
use serde::{Deserialize, Serialize};
use storage::StorageConfig;

/// Used when `--config` is not given and the file exists
pub const DEFAULT_CONFIG_PATH: &str = "config/faceguard.toml";

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `pipeline=debug,info`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
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

/// Prometheus exporter; disabled unless `listen` is set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub listen: Option<SocketAddr>,
}

/// HTTP control surface
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Enrollment and face analysis
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrollmentConfig {
    /// One sub-directory per identity
    pub dir: PathBuf,
    /// Scripted analyzer replay file (JSON)
    pub analyzer_script: Option<PathBuf>,
}

impl Default for EnrollmentConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("data/enrollment"),
            analyzer_script: None,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub matcher: MatcherConfig,
    pub liveness: LivenessConfig,
    pub security: SecurityConfig,
    pub door: DoorConfig,
    pub storage: StorageConfig,
    pub enrollment: EnrollmentConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

impl AppConfig {
    /// Load configuration.
    ///
    /// An explicit `path` must exist; otherwise [`DEFAULT_CONFIG_PATH`] is
    /// read if present.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG_PATH).required(false),
        };
        Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("FACEGUARD")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}
