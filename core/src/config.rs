//! Engine configuration.
//!
//! Values come from an optional TOML file, overridden by `DIVELOG_*`
//! environment variables (e.g. `DIVELOG_QUERY_TIMEOUT_MS=1500`). Anything not
//! set keeps its default.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;

use crate::error::ConfigError;
use crate::logging;
use crate::pagination::{MAX_PAGE_SIZE, MIN_PAGE_SIZE};

const ENV_PREFIX: &str = "DIVELOG";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Deadline for dive listing and statistics queries.
    pub query_timeout_ms: u64,
    /// Deadline for loading a reference table.
    pub reference_timeout_ms: u64,
    /// Page size used when a request asks for an out-of-range one.
    pub default_page_size: u64,
    /// Row cap for the country, site and buddy rollups.
    pub stats_top_n: usize,
    /// Default `tracing` filter directive; `RUST_LOG` takes precedence.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            query_timeout_ms: 1000,
            reference_timeout_ms: 2000,
            default_page_size: 20,
            stats_top_n: 10,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from `path` (if given and present) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.query_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "query_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.reference_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "reference_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if !(MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&self.default_page_size) {
            return Err(ConfigError::Validation(format!(
                "default_page_size must be between {MIN_PAGE_SIZE} and {MAX_PAGE_SIZE}"
            )));
        }
        if self.stats_top_n == 0 {
            return Err(ConfigError::Validation(
                "stats_top_n must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Install the global subscriber with `log_filter` as the default
    /// directive. Returns `false` if one was already installed.
    pub fn init_tracing(&self) -> bool {
        logging::init_tracing(&self.log_filter)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    pub fn reference_timeout(&self) -> Duration {
        Duration::from_millis(self.reference_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.query_timeout(), Duration::from_secs(1));
        assert_eq!(config.reference_timeout(), Duration::from_secs(2));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r#"
            query_timeout_ms = 1500
            log_filter = "divelog_engine=debug"
            "#,
        )
        .unwrap();
        assert_eq!(config.query_timeout_ms, 1500);
        assert_eq!(config.log_filter, "divelog_engine=debug");
        assert_eq!(config.default_page_size, 20);
        assert_eq!(config.stats_top_n, 10);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        for toml in [
            "query_timeout_ms = 0",
            "reference_timeout_ms = 0",
            "default_page_size = 0",
            "default_page_size = 101",
            "stats_top_n = 0",
        ] {
            assert!(
                matches!(EngineConfig::from_toml_str(toml), Err(ConfigError::Validation(_))),
                "{toml}"
            );
        }
    }

    #[test]
    fn test_malformed_toml() {
        assert!(matches!(
            EngineConfig::from_toml_str("query_timeout_ms = \"soon\""),
            Err(ConfigError::Load(_))
        ));
    }

    #[test]
    fn test_init_tracing_uses_log_filter() {
        let config = EngineConfig::from_toml_str(r#"log_filter = "divelog_engine=debug""#).unwrap();
        config.init_tracing();
        assert!(!config.init_tracing());
    }

    #[test]
    fn test_missing_file_is_optional() {
        let config = EngineConfig::load(Some(Path::new("/nonexistent/divelog.toml"))).unwrap();
        assert!(config.validate().is_ok());
    }
}
