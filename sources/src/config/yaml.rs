use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// Every field is optional so a file may configure only what it needs.
/// Values present here override the environment.
///
/// # Example YAML structure
/// ```yaml
/// plugins:
///   app_dir: "/opt/tempest"
///   skip_app_dir: false
///   search_paths:
///     - "/usr/lib/tempest/plugins"
///
/// streaming:
///   queue_depth: 32
///   read_timeout_ms: 250
///
/// sources:
///   Soapy:
///     params: "driver=rtlsdr"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub plugins: Option<PluginsYaml>,
    pub streaming: Option<StreamingYaml>,
    pub sources: Option<HashMap<String, SourceYaml>>,
}

/// Plugin search configuration from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PluginsYaml {
    pub app_dir: Option<String>,
    pub skip_app_dir: Option<bool>,
    pub search_paths: Option<Vec<String>>,
}

/// Producer/consumer queue settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct StreamingYaml {
    pub queue_depth: Option<usize>,
    pub read_timeout_ms: Option<u64>,
}

/// Per-source settings from YAML, keyed by display name
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SourceYaml {
    /// Parameter string handed to the module's init
    pub params: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or the YAML is malformed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        Self::parse(&contents).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: Some(path.to_path_buf()),
                message,
            },
            other => other,
        })
    }

    /// Parse YAML text
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(|e| ConfigError::Parse {
            path: None,
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_yaml_config_full() {
        let yaml = r#"
plugins:
  app_dir: "/opt/tempest"
  skip_app_dir: true
  search_paths:
    - "/usr/lib/tempest/plugins"
    - "/usr/local/lib/tempest"

streaming:
  queue_depth: 64
  read_timeout_ms: 500

sources:
  Soapy:
    params: "driver=rtlsdr"
  "USRP (via UHD)":
    params: "--rate 10e6"
"#;

        let config = YamlConfig::parse(yaml).unwrap();

        let plugins = config.plugins.as_ref().unwrap();
        assert_eq!(plugins.app_dir.as_deref(), Some("/opt/tempest"));
        assert_eq!(plugins.skip_app_dir, Some(true));
        assert_eq!(plugins.search_paths.as_ref().unwrap().len(), 2);

        let streaming = config.streaming.as_ref().unwrap();
        assert_eq!(streaming.queue_depth, Some(64));
        assert_eq!(streaming.read_timeout_ms, Some(500));

        let sources = config.sources.as_ref().unwrap();
        assert_eq!(sources["Soapy"].params.as_deref(), Some("driver=rtlsdr"));
        assert_eq!(sources["USRP (via UHD)"].params.as_deref(), Some("--rate 10e6"));
    }

    #[test]
    fn test_yaml_config_partial() {
        let config = YamlConfig::parse("streaming:\n  queue_depth: 8\n").unwrap();
        assert!(config.plugins.is_none());
        assert!(config.sources.is_none());
        assert_eq!(config.streaming.unwrap().queue_depth, Some(8));
    }

    #[test]
    fn test_yaml_config_empty() {
        let config = YamlConfig::parse("").unwrap();
        assert!(config.plugins.is_none());
        assert!(config.streaming.is_none());
    }

    #[test]
    fn test_yaml_config_wrong_type() {
        let err = YamlConfig::parse("streaming:\n  queue_depth: lots\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { path: None, .. }));
    }

    #[test]
    fn test_yaml_config_from_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, "plugins:\n  search_paths: [\"/srv/plugins\"]\n").unwrap();

        let config = YamlConfig::from_file(&config_path).unwrap();
        assert_eq!(
            config.plugins.unwrap().search_paths,
            Some(vec!["/srv/plugins".to_string()])
        );
    }

    #[test]
    fn test_yaml_config_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let err = YamlConfig::from_file(&temp_dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
