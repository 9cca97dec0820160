//! Node configuration for the SlotGrid engine.
//!
//! Provides [`NodeConfig`] with defaults for data directory, logging, and
//! engine settings. Values are layered: built-in defaults, then an optional
//! TOML file, then `SLOTGRID__*` environment variables
//! (e.g. `SLOTGRID__ENGINE__LEASE__TTL_SECS=60`).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use slotgrid_engine::EngineSettings;

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config: {0}")]
    Load(#[from] config::ConfigError),
    #[error("config file not found: {0}")]
    Missing(PathBuf),
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for a node instance.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Root directory for all persistent data.
    pub data_dir: PathBuf,
    /// Log level filter string (e.g. "info", "debug", "slotgrid_engine=trace").
    pub log_level: String,
    pub log_format: LogFormat,
    pub engine: EngineSettings,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("slotgrid");

        Self {
            data_dir,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            engine: EngineSettings::default(),
        }
    }
}

impl NodeConfig {
    /// Load configuration, reading `path` if given.
    ///
    /// An explicit path must exist. Without one, only defaults and the
    /// environment apply.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Missing(path.to_path_buf()));
            }
            builder = builder.add_source(config::File::from(path));
        }
        let cfg = builder
            .add_source(
                config::Environment::with_prefix("SLOTGRID")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(cfg)
    }

    /// Path to the RocksDB ledger directory.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("ledger")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotgrid_engine::MatrixMode;
    use std::io::Write;

    #[test]
    fn default_log_level_is_info() {
        let cfg = NodeConfig::default();
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
    }

    #[test]
    fn default_data_dir_ends_with_slotgrid() {
        let cfg = NodeConfig::default();
        assert!(
            cfg.data_dir.ends_with("slotgrid"),
            "data_dir should end with 'slotgrid': {:?}",
            cfg.data_dir
        );
    }

    #[test]
    fn db_path_appends_ledger() {
        let cfg = NodeConfig {
            data_dir: PathBuf::from("/tmp/slotgrid-test"),
            ..NodeConfig::default()
        };
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/slotgrid-test/ledger"));
    }

    #[test]
    fn file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("slotgrid.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
data_dir = "/srv/grid"
log_format = "json"

[engine]
matrix_mode = "column_only"
validation_attempt_limit = 4

[engine.lease]
ttl_secs = 60
"#
        )
        .unwrap();

        let cfg = NodeConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/grid"));
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.engine.matrix_mode, MatrixMode::ColumnOnly);
        assert_eq!(cfg.engine.validation_attempt_limit, Some(4));
        assert_eq!(cfg.engine.lease.ttl_secs, 60);
        assert!(cfg.engine.lease.enabled);
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let err = NodeConfig::load(Some(Path::new("/nonexistent/slotgrid.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }
}
