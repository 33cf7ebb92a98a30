//! Plugin Resolver
//!
//! Turns a native module identifier such as `TSDRPlugin_Soapy` into the path
//! of a loadable library. The application directory is searched first, then
//! the configured plugin directories in the order they were declared. The
//! first existing candidate wins.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::{Path, PathBuf};

use super::descriptor::SourceDescriptor;
use crate::config::LoaderConfig;
use crate::errors::{SourceError, SourceResult};

/// Ordered list of directories searched for native modules
#[derive(Debug, Clone, Default)]
pub struct PluginResolver {
    search_paths: Vec<PathBuf>,
}

impl PluginResolver {
    /// Create a resolver with no search paths
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the search order described by the configuration
    ///
    /// The application directory (configured override, or the directory of
    /// the running executable) comes first unless `skip_app_dir` is set.
    pub fn from_config(config: &LoaderConfig) -> Self {
        let mut resolver = Self::new();

        if !config.skip_app_dir {
            match config.app_dir.clone().or_else(application_dir) {
                Some(dir) => resolver.add_search_path(dir),
                None => tracing::warn!("Application directory unknown, not searched"),
            }
        }

        for path in &config.search_paths {
            resolver.add_search_path(path);
        }

        resolver
    }

    /// Append a directory to the search order
    ///
    /// Paths already present are ignored so the earlier position is kept.
    pub fn add_search_path(&mut self, path: impl AsRef<Path>) {
        let path = path.as_ref().to_path_buf();
        if !self.search_paths.contains(&path) {
            self.search_paths.push(path);
        }
    }

    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    /// Platform file names a module identifier may be stored under
    ///
    /// e.g. `libTSDRPlugin_Soapy.so` and `TSDRPlugin_Soapy.so` on Linux,
    /// `TSDRPlugin_Soapy.dll` on Windows.
    pub fn candidate_file_names(module_id: &str) -> Vec<String> {
        let mut names = Vec::with_capacity(2);
        if !DLL_PREFIX.is_empty() {
            names.push(format!("{DLL_PREFIX}{module_id}{DLL_SUFFIX}"));
        }
        names.push(format!("{module_id}{DLL_SUFFIX}"));
        names
    }

    /// Locate the library implementing `module_id`
    pub fn resolve(&self, module_id: &str) -> SourceResult<PathBuf> {
        if !is_plain_identifier(module_id) {
            tracing::warn!(module_id, "Rejecting module identifier with path components");
            return Err(SourceError::ModuleNotFound {
                module_id: module_id.to_string(),
                searched: Vec::new(),
            });
        }

        let candidates = Self::candidate_file_names(module_id);
        for dir in &self.search_paths {
            for name in &candidates {
                let path = dir.join(name);
                if path.is_file() {
                    tracing::debug!(module_id, path = %path.display(), "Resolved native module");
                    return Ok(path);
                }
            }
        }

        Err(SourceError::ModuleNotFound {
            module_id: module_id.to_string(),
            searched: self.search_paths.clone(),
        })
    }

    /// Locate the library for a descriptor
    ///
    /// Descriptors with the `absolute_path` capability name their library
    /// directly and bypass the search paths.
    pub fn resolve_descriptor(&self, descriptor: &SourceDescriptor) -> SourceResult<PathBuf> {
        if !descriptor.capabilities().absolute_path {
            return self.resolve(descriptor.module_id());
        }

        let path = PathBuf::from(descriptor.module_id());
        if path.is_file() {
            Ok(path)
        } else {
            Err(SourceError::ModuleNotFound {
                module_id: descriptor.module_id().to_string(),
                searched: vec![path],
            })
        }
    }
}

/// Directory containing the running executable
pub fn application_dir() -> Option<PathBuf> {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
}

fn is_plain_identifier(module_id: &str) -> bool {
    !module_id.is_empty()
        && module_id != "."
        && module_id != ".."
        && !module_id.contains(['/', '\\'])
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, b"").unwrap();
        path
    }

    fn library_name(module_id: &str) -> String {
        format!("{DLL_PREFIX}{module_id}{DLL_SUFFIX}")
    }

    #[test]
    fn test_candidate_file_names() {
        let names = PluginResolver::candidate_file_names("TSDRPlugin_Soapy");
        assert!(names.contains(&format!("TSDRPlugin_Soapy{DLL_SUFFIX}")));
        assert!(names.contains(&library_name("TSDRPlugin_Soapy")));
    }

    #[test]
    fn test_add_search_path_dedupes() {
        let mut resolver = PluginResolver::new();
        resolver.add_search_path("/opt/tempest");
        resolver.add_search_path("/usr/lib/tempest");
        resolver.add_search_path("/opt/tempest");
        assert_eq!(
            resolver.search_paths(),
            &[PathBuf::from("/opt/tempest"), PathBuf::from("/usr/lib/tempest")]
        );
    }

    #[test]
    fn test_resolve_first_match_wins() {
        let first = TempDir::new().unwrap();
        let second = TempDir::new().unwrap();
        let expected = touch(first.path(), &library_name("TSDRPlugin_Soapy"));
        touch(second.path(), &library_name("TSDRPlugin_Soapy"));

        let mut resolver = PluginResolver::new();
        resolver.add_search_path(first.path());
        resolver.add_search_path(second.path());

        assert_eq!(resolver.resolve("TSDRPlugin_Soapy").unwrap(), expected);
    }

    #[test]
    fn test_resolve_falls_through_to_later_paths() {
        let empty = TempDir::new().unwrap();
        let plugins = TempDir::new().unwrap();
        let expected = touch(plugins.path(), &format!("TSDRPlugin_UHD{DLL_SUFFIX}"));

        let mut resolver = PluginResolver::new();
        resolver.add_search_path(empty.path());
        resolver.add_search_path(plugins.path());

        assert_eq!(resolver.resolve("TSDRPlugin_UHD").unwrap(), expected);
    }

    #[test]
    fn test_resolve_not_found_reports_search_paths() {
        let dir = TempDir::new().unwrap();
        let mut resolver = PluginResolver::new();
        resolver.add_search_path(dir.path());

        match resolver.resolve("TSDRPlugin_Soapy") {
            Err(SourceError::ModuleNotFound { module_id, searched }) => {
                assert_eq!(module_id, "TSDRPlugin_Soapy");
                assert_eq!(searched, vec![dir.path().to_path_buf()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_resolve_ignores_directories_with_module_name() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(library_name("TSDRPlugin_Soapy"))).unwrap();
        let mut resolver = PluginResolver::new();
        resolver.add_search_path(dir.path());
        assert!(resolver.resolve("TSDRPlugin_Soapy").is_err());
    }

    #[test]
    fn test_resolve_rejects_path_components() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), &library_name("evil"));
        let mut resolver = PluginResolver::new();
        resolver.add_search_path(dir.path().join("sub"));

        assert!(matches!(
            resolver.resolve("../evil"),
            Err(SourceError::ModuleNotFound { .. })
        ));
        assert!(resolver.resolve("").is_err());
    }

    #[test]
    fn test_resolve_descriptor_absolute_path() {
        use crate::plugin::descriptor::SourceCapabilities;

        let dir = TempDir::new().unwrap();
        let path = touch(dir.path(), "ExtIO_custom.dll");
        let descriptor = SourceDescriptor::new("ExtIO", path.to_string_lossy(), false)
            .with_capabilities(SourceCapabilities::NONE.with_absolute_path(true));

        let resolver = PluginResolver::new();
        assert_eq!(resolver.resolve_descriptor(&descriptor).unwrap(), path);

        let missing = SourceDescriptor::new("Gone", dir.path().join("gone.dll").to_string_lossy(), false)
            .with_capabilities(SourceCapabilities::NONE.with_absolute_path(true));
        assert!(resolver.resolve_descriptor(&missing).is_err());
    }

    #[test]
    fn test_from_config_search_order() {
        let config = LoaderConfig {
            app_dir: Some(PathBuf::from("/opt/tempest")),
            search_paths: vec![
                PathBuf::from("/usr/lib/tempest"),
                PathBuf::from("/opt/tempest"),
            ],
            ..LoaderConfig::default()
        };
        let resolver = PluginResolver::from_config(&config);
        assert_eq!(
            resolver.search_paths(),
            &[PathBuf::from("/opt/tempest"), PathBuf::from("/usr/lib/tempest")]
        );

        let skipped = LoaderConfig {
            skip_app_dir: true,
            ..config
        };
        assert_eq!(
            PluginResolver::from_config(&skipped).search_paths(),
            &[PathBuf::from("/usr/lib/tempest"), PathBuf::from("/opt/tempest")]
        );
    }
}
