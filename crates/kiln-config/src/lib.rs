//! Configuration management for Kiln
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. CLI arguments (highest precedence, applied by the binary)
//! 2. Environment variables (`KILN_*` prefix, `__` between section and key)
//! 3. Explicit files passed to [`ConfigLoader::with_file`]
//! 4. kiln.local.toml (gitignored, local overrides)
//! 5. kiln.toml (git-tracked, project config)
//! 6. ~/.config/kiln/config.toml (user defaults)
//! 7. Built-in defaults (lowest precedence)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::Paths;

/// Main Kiln configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub server: ServerSection,
    pub tls: TlsSection,
    pub log: LogSection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub address: String,
    pub port: u16,
    pub tick_interval_ms: u64,
    pub chunk_size: usize,
    /// Kernel send buffer size; 0 disables write buffering.
    pub write_buffer: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub max_connections: usize,
    pub idle_timeout_ms: Option<u64>,
    /// Payload that closes the connection and stops the server. Empty
    /// string disables it.
    pub exit_sentinel: String,
    /// Echo every chunk back to its sender.
    pub echo: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7000,
            tick_interval_ms: 200,
            chunk_size: 8192,
            write_buffer: None,
            timeout_ms: None,
            max_connections: 1024,
            idle_timeout_ms: None,
            exit_sentinel: "exit".to_string(),
            echo: false,
        }
    }
}

impl ServerSection {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_ms.map(Duration::from_millis)
    }

    /// The sentinel, or `None` when disabled.
    pub fn exit_sentinel(&self) -> Option<&str> {
        Some(self.exit_sentinel.trim()).filter(|sentinel| !sentinel.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsSection {
    pub enabled: bool,
    pub cert_path: Option<PathBuf>,
    pub key_path: Option<PathBuf>,
    /// Also offer TLS 1.3 (TLS 1.2 only when false).
    pub allow_tls13: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// `tracing` filter directive, e.g. `info` or `kiln_server=debug`.
    pub filter: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl KilnConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        ConfigLoader::new().load()
    }

    /// Load configuration from specific project directory
    pub fn load_from_dir(project_dir: impl AsRef<Path>) -> Result<Self> {
        ConfigLoader::new().with_project_dir(project_dir).load()
    }

    /// Checks values that would make the server unusable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server.port must be non-zero".to_string(),
            ));
        }
        if self.server.tick_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "server.tick_interval_ms must be non-zero".to_string(),
            ));
        }
        if self.server.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "server.chunk_size must be non-zero".to_string(),
            ));
        }
        if self.tls.enabled && (self.tls.cert_path.is_none() || self.tls.key_path.is_none()) {
            return Err(ConfigError::ValidationError(
                "tls.enabled requires tls.cert_path and tls.key_path".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve relative TLS paths against `base_dir`
    pub fn resolve_paths(&mut self, base_dir: impl AsRef<Path>) {
        let base = base_dir.as_ref();
        for path in [&mut self.tls.cert_path, &mut self.tls.key_path]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}
