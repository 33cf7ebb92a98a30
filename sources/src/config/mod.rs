//! Configuration for the source loader
//!
//! Settings come from environment variables (optionally seeded from a `.env`
//! file by the binary) and an optional YAML file. Priority: YAML > ENV vars >
//! defaults.
//!
//! # Modules
//! - `env`: Environment variable loading
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use tsdr_sources::config::LoaderConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = LoaderConfig::from_env()?;
//!
//! // Load from YAML file with environment variables as the base
//! let config = LoaderConfig::from_file(Path::new("tempest.yaml"))?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod env;
mod yaml;

pub use env::{
    ENV_APP_DIR, ENV_PLUGIN_PATH, ENV_QUEUE_DEPTH, ENV_READ_TIMEOUT_MS, ENV_SKIP_APP_DIR,
};
pub use yaml::{PluginsYaml, SourceYaml, StreamingYaml, YamlConfig};

use crate::source::{DEFAULT_QUEUE_DEPTH, DEFAULT_READ_TIMEOUT, StreamOptions};

/// Largest accepted queue depth, in callback blocks
pub const MAX_QUEUE_DEPTH: usize = 4096;

/// Longest accepted read timeout
pub const MAX_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML config{}: {message}", format_location(.path))]
    Parse {
        path: Option<PathBuf>,
        message: String,
    },

    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn format_location(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!(" {}", path.display()),
        None => String::new(),
    }
}

/// Loader configuration
///
/// Contains everything needed to find native modules and size the sample
/// queues:
/// - Plugin search order (application directory, extra directories)
/// - Streaming queue depth and read timeout
/// - Per-source init parameters
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    /// Overrides the directory of the running executable as the first
    /// search path
    pub app_dir: Option<PathBuf>,
    /// Do not search the application directory at all
    pub skip_app_dir: bool,
    /// Additional plugin directories, searched in order
    pub search_paths: Vec<PathBuf>,
    /// Callback blocks buffered per source
    pub queue_depth: usize,
    /// How long `read` waits for the first block
    pub read_timeout: Duration,
    /// Init parameters keyed by source display name
    pub source_params: HashMap<String, String>,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            app_dir: None,
            skip_app_dir: false,
            search_paths: Vec::new(),
            queue_depth: DEFAULT_QUEUE_DEPTH,
            read_timeout: DEFAULT_READ_TIMEOUT,
            source_params: HashMap::new(),
        }
    }
}

impl LoaderConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = env::load(lookup)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file on top of the environment
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed, or if the
    /// merged configuration is invalid.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml = YamlConfig::from_file(path)?;
        let config = env::load(|key| std::env::var(key).ok())?.merge_yaml(yaml);
        config.validate()?;
        tracing::debug!(path = %path.display(), "Loaded configuration file");
        Ok(config)
    }

    /// Apply YAML values over this configuration
    pub fn merge_yaml(mut self, yaml: YamlConfig) -> Self {
        if let Some(plugins) = yaml.plugins {
            if let Some(dir) = plugins.app_dir {
                self.app_dir = Some(PathBuf::from(dir));
            }
            if let Some(skip) = plugins.skip_app_dir {
                self.skip_app_dir = skip;
            }
            if let Some(paths) = plugins.search_paths {
                self.search_paths = paths.into_iter().map(PathBuf::from).collect();
            }
        }

        if let Some(streaming) = yaml.streaming {
            if let Some(depth) = streaming.queue_depth {
                self.queue_depth = depth;
            }
            if let Some(ms) = streaming.read_timeout_ms {
                self.read_timeout = Duration::from_millis(ms);
            }
        }

        if let Some(sources) = yaml.sources {
            for (name, source) in sources {
                if let Some(params) = source.params {
                    self.source_params.insert(name, params);
                }
            }
        }

        self
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 || self.queue_depth > MAX_QUEUE_DEPTH {
            return Err(ConfigError::Invalid(format!(
                "queue_depth must be between 1 and {MAX_QUEUE_DEPTH}, got {}",
                self.queue_depth
            )));
        }

        if self.read_timeout.is_zero() || self.read_timeout > MAX_READ_TIMEOUT {
            return Err(ConfigError::Invalid(format!(
                "read_timeout must be between 1 ms and {} s, got {} ms",
                MAX_READ_TIMEOUT.as_secs(),
                self.read_timeout.as_millis()
            )));
        }

        if self.search_paths.iter().any(|p| p.as_os_str().is_empty()) {
            return Err(ConfigError::Invalid("search_paths contains an empty path".to_string()));
        }

        Ok(())
    }

    /// Queue settings for streaming sources
    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            queue_depth: self.queue_depth,
            read_timeout: self.read_timeout,
            ..StreamOptions::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let config = LoaderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.stream_options(), StreamOptions::default());
    }

    #[test]
    fn test_from_lookup_validates() {
        let err = LoaderConfig::from_lookup(|key| {
            (key == ENV_QUEUE_DEPTH).then(|| "0".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_yaml_overrides_env() {
        let base = LoaderConfig::from_lookup(|key| match key {
            ENV_APP_DIR => Some("/env/app".to_string()),
            ENV_QUEUE_DEPTH => Some("16".to_string()),
            ENV_READ_TIMEOUT_MS => Some("100".to_string()),
            _ => None,
        })
        .unwrap();

        let yaml = YamlConfig::parse(
            r#"
plugins:
  search_paths: ["/yaml/plugins"]
streaming:
  queue_depth: 64
sources:
  Soapy:
    params: "driver=hackrf"
"#,
        )
        .unwrap();

        let config = base.merge_yaml(yaml);
        assert_eq!(config.app_dir, Some(PathBuf::from("/env/app")));
        assert_eq!(config.search_paths, vec![PathBuf::from("/yaml/plugins")]);
        assert_eq!(config.queue_depth, 64);
        assert_eq!(config.read_timeout, Duration::from_millis(100));
        assert_eq!(config.source_params.get("Soapy").map(String::as_str), Some("driver=hackrf"));
        assert!(!config.source_params.contains_key("RTL-SDR"));
    }

    #[test]
    fn test_validate_rejects_bad_timeout() {
        let config = LoaderConfig {
            read_timeout: Duration::ZERO,
            ..LoaderConfig::default()
        };
        assert!(config.validate().is_err());

        let config = LoaderConfig {
            read_timeout: Duration::from_secs(120),
            ..LoaderConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_invalid_yaml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "streaming: [not, a, map").unwrap();

        let err = LoaderConfig::from_file(&config_path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: Some(_), .. }));
        assert!(err.to_string().contains("config.yaml"));
    }
}
