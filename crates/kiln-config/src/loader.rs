//! Configuration loader with multi-source merging

use crate::{KilnConfig, Paths};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    files: Vec<PathBuf>,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "KILN".to_string(),
            files: Vec::new(),
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "KILN")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Adds a file that must exist; it overrides the discovered files.
    pub fn with_file(mut self, path: impl AsRef<Path>) -> Self {
        self.files.push(path.as_ref().to_path_buf());
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<KilnConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = KilnConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/kiln/config.toml)
        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Project config (kiln.toml)
        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (kiln.local.toml, gitignored)
        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Explicit files
        for file in &self.files {
            if !file.exists() {
                anyhow::bail!("Config file not found: {}", file.display());
            }
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .required(true)
                    .format(config::FileFormat::Toml),
            );
        }

        // 6. Environment variables (KILN_SERVER__PORT=9000)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut kiln_config: KilnConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        kiln_config.resolve_paths(&self.project_dir);
        kiln_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(kiln_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> KilnConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    /// A prefix no real environment sets, so these tests only see files.
    const ISOLATED_PREFIX: &str = "KILN_LOADER_TEST_UNSET";

    fn loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(dir)
            .with_env_prefix(ISOLATED_PREFIX)
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path())
            .load()
            .expect("Failed to load config");

        assert_eq!(config.server.port, 7000);
        assert_eq!(config.server.max_connections, 1024);
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[server]
address = "0.0.0.0"
port = 9000
tick_interval_ms = 50
exit_sentinel = "quit"

[log]
filter = "kiln_server=debug"
"#;
        fs::write(project_dir.join("kiln.toml"), config_content).expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.server.address, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.tick_interval_ms, 50);
        assert_eq!(config.server.exit_sentinel(), Some("quit"));
        assert_eq!(config.log.filter, "kiln_server=debug");
        // Untouched keys keep their defaults.
        assert_eq!(config.server.chunk_size, 8192);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(project_dir.join("kiln.toml"), "[server]\nport = 7100\n")
            .expect("Failed to write project config");
        fs::write(project_dir.join("kiln.local.toml"), "[server]\nport = 7200\n")
            .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");
        assert_eq!(config.server.port, 7200);
    }

    #[test]
    fn test_explicit_file_wins_over_project_files() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(project_dir.join("kiln.local.toml"), "[server]\nport = 7200\n")
            .expect("Failed to write local config");
        let explicit = project_dir.join("custom.toml");
        fs::write(&explicit, "[server]\nport = 7300\n").expect("Failed to write custom config");

        let config = loader(project_dir)
            .with_file(&explicit)
            .load()
            .expect("Failed to load config");
        assert_eq!(config.server.port, 7300);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let result = loader(temp_dir.path())
            .with_file(temp_dir.path().join("absent.toml"))
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(temp_dir.path().join("kiln.toml"), "[server]\nport = 0\n")
            .expect("Failed to write config");

        let err = loader(temp_dir.path()).load().unwrap_err();
        assert!(format!("{err:#}").contains("server.port"));
    }

    #[test]
    fn test_tls_paths_resolve_against_project_dir() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        fs::write(
            project_dir.join("kiln.toml"),
            "[tls]\nenabled = true\ncert_path = \"cert.pem\"\nkey_path = \"key.pem\"\n",
        )
        .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");
        assert_eq!(config.tls.cert_path, Some(project_dir.join("cert.pem")));
        assert_eq!(config.tls.key_path, Some(project_dir.join("key.pem")));
    }

    // Environment overrides are covered by the CLI tests, which can set
    // variables on a child process:
    //
    // KILN_SERVER__PORT=9100
    // KILN_LOG__FILTER=debug
}
