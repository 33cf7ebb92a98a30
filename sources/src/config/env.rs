//! Environment variable loading
//!
//! All variables are read through a lookup function so tests can supply a
//! map instead of mutating the process environment.

use std::path::PathBuf;
use std::time::Duration;

use super::{ConfigError, LoaderConfig};

pub const ENV_APP_DIR: &str = "TSDR_APP_DIR";
pub const ENV_PLUGIN_PATH: &str = "TSDR_PLUGIN_PATH";
pub const ENV_QUEUE_DEPTH: &str = "TSDR_QUEUE_DEPTH";
pub const ENV_READ_TIMEOUT_MS: &str = "TSDR_READ_TIMEOUT_MS";
pub const ENV_SKIP_APP_DIR: &str = "TSDR_SKIP_APP_DIR";

pub(super) fn load<F>(lookup: F) -> Result<LoaderConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = LoaderConfig::default();

    if let Some(dir) = non_empty(lookup(ENV_APP_DIR)) {
        config.app_dir = Some(PathBuf::from(dir));
    }

    if let Some(paths) = non_empty(lookup(ENV_PLUGIN_PATH)) {
        config.search_paths = std::env::split_paths(&paths)
            .filter(|p| !p.as_os_str().is_empty())
            .collect();
    }

    if let Some(value) = non_empty(lookup(ENV_QUEUE_DEPTH)) {
        config.queue_depth = parse_number(ENV_QUEUE_DEPTH, &value)?;
    }

    if let Some(value) = non_empty(lookup(ENV_READ_TIMEOUT_MS)) {
        config.read_timeout = Duration::from_millis(parse_number(ENV_READ_TIMEOUT_MS, &value)?);
    }

    if let Some(value) = non_empty(lookup(ENV_SKIP_APP_DIR)) {
        config.skip_app_dir = parse_bool(ENV_SKIP_APP_DIR, &value)?;
    }

    Ok(config)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
        reason: "expected a non-negative integer".to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_env_defaults() {
        let config = load(lookup(&[])).unwrap();
        assert_eq!(config, LoaderConfig::default());
    }

    #[test]
    fn test_env_values() {
        let joined = std::env::join_paths(["/opt/a", "/opt/b"]).unwrap();
        let joined = joined.to_string_lossy().into_owned();
        let config = load(lookup(&[
            (ENV_APP_DIR, "/opt/tempest"),
            (ENV_PLUGIN_PATH, &joined),
            (ENV_QUEUE_DEPTH, "8"),
            (ENV_READ_TIMEOUT_MS, "1000"),
            (ENV_SKIP_APP_DIR, "yes"),
        ]))
        .unwrap();

        assert_eq!(config.app_dir, Some(PathBuf::from("/opt/tempest")));
        assert_eq!(
            config.search_paths,
            vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")]
        );
        assert_eq!(config.queue_depth, 8);
        assert_eq!(config.read_timeout, Duration::from_millis(1000));
        assert!(config.skip_app_dir);
    }

    #[test]
    fn test_env_blank_values_ignored() {
        let config = load(lookup(&[(ENV_APP_DIR, "  "), (ENV_QUEUE_DEPTH, "")])).unwrap();
        assert!(config.app_dir.is_none());
        assert_eq!(config.queue_depth, LoaderConfig::default().queue_depth);
    }

    #[test]
    fn test_env_invalid_number() {
        let err = load(lookup(&[(ENV_QUEUE_DEPTH, "-3")])).unwrap_err();
        match err {
            ConfigError::InvalidValue { key, value, .. } => {
                assert_eq!(key, ENV_QUEUE_DEPTH);
                assert_eq!(value, "-3");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_env_invalid_bool() {
        assert!(load(lookup(&[(ENV_SKIP_APP_DIR, "maybe")])).is_err());
    }
}
