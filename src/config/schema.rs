//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::settings::Settings;
use crate::platforms::Platform;

pub const READ_TIMEOUT_KEY: &str = "HH_SERVER_READ_TIMEOUT";
pub const WRITE_TIMEOUT_KEY: &str = "HH_SERVER_WRITE_TIMEOUT";
pub const IDLE_TIMEOUT_KEY: &str = "HH_SERVER_IDLE_TIMEOUT";
pub const PIPELINE_KEY: &str = "HH_PIPELINE";

/// Root configuration for the development server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listener configuration (bind address, port).
    pub listener: ListenerConfig,

    /// Directory served by the terminal handler.
    pub directory: PathBuf,

    /// Which server to emulate.
    pub platform: Platform,

    /// Stage names, outermost first. `None` uses the platform default.
    pub pipeline: Option<Vec<String>>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Path answering readiness checks, mounted outside the pipeline.
    pub health_path: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            directory: PathBuf::from("."),
            platform: Platform::Generic,
            pipeline: None,
            timeouts: TimeoutConfig::default(),
            health_path: None,
            log_level: "info".to_string(),
        }
    }
}

impl ServerConfig {
    /// Overlay values found in the settings source on top of this config.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.timeouts.read = settings.duration(READ_TIMEOUT_KEY, self.timeouts.read);
        self.timeouts.write = settings.duration(WRITE_TIMEOUT_KEY, self.timeouts.write);
        self.timeouts.idle = settings.duration(IDLE_TIMEOUT_KEY, self.timeouts.idle);

        let pipeline = settings.list(PIPELINE_KEY, "");
        if !pipeline.is_empty() {
            self.pipeline = Some(pipeline);
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "127.0.0.1").
    pub bind: String,

    /// Port, 0 picks an ephemeral port.
    pub port: u16,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,
}

impl ListenerConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8000,
            max_connections: 1024,
        }
    }
}

/// Timeouts applied to every connection and response.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Time allowed to receive a request head.
    #[serde(with = "humantime_serde")]
    pub read: Duration,

    /// Time allowed to produce and deliver a response.
    #[serde(with = "humantime_serde")]
    pub write: Duration,

    /// Time a kept-alive connection may wait for its next request.
    #[serde(with = "humantime_serde")]
    pub idle: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            read: Duration::from_secs(5),
            write: Duration::from_secs(5),
            idle: Duration::from_secs(5),
        }
    }
}
