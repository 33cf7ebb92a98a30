//! End-to-end run against the real test tone plugin
//!
//! Needs the `tsdr-plugin-testtone` cdylib to have been built (for example by
//! `cargo test --workspace`). When it is missing the test logs and returns.

use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tsdr_sources::plugin::{DynamicLoader, PluginResolver, SourceRegistry};
use tsdr_sources::{SourceDescriptor, SourceManager, SourceState, StreamOptions};

const MODULE_ID: &str = "TSDRPlugin_TestTone";

fn target_dirs() -> Vec<PathBuf> {
    let target = std::env::var_os("CARGO_TARGET_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../target"));
    vec![target.join("debug"), target.join("release")]
}

fn built_plugin_dir() -> Option<PathBuf> {
    let file_name = format!("{DLL_PREFIX}{MODULE_ID}{DLL_SUFFIX}");
    target_dirs()
        .into_iter()
        .find(|dir| dir.join(&file_name).is_file())
}

#[test]
fn test_tone_plugin_streams() {
    let Some(dir) = built_plugin_dir() else {
        eprintln!("skipping: {MODULE_ID} has not been built");
        return;
    };

    let registry = Arc::new(SourceRegistry::new());
    registry
        .register(
            SourceDescriptor::new("Test tone", MODULE_ID, true)
                .with_sample_rate_bounds(1_000, 40_000_000)
                .with_default_params("tone=1000 block=512"),
        )
        .unwrap();
    let mut resolver = PluginResolver::new();
    resolver.add_search_path(&dir);

    let manager = SourceManager::new()
        .with_registry(registry)
        .with_resolver(resolver)
        .with_loader(Arc::new(DynamicLoader::new()))
        .with_options(StreamOptions {
            queue_depth: 16,
            read_timeout: Duration::from_millis(500),
            ..StreamOptions::default()
        });

    let source = manager.open("Test tone").unwrap();
    assert_eq!(source.plugin_name().as_deref(), Some("TSDR Test Tone Plugin"));

    source.init().unwrap();
    assert_eq!(source.set_sample_rate(256_000).unwrap(), 256_000);
    assert_eq!(source.sample_rate().unwrap(), 256_000);
    source.set_frequency(433_920_000).unwrap();
    source.set_gain(-6.0).unwrap();

    source.start().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    let mut samples = Vec::new();
    while samples.len() < 2048 && Instant::now() < deadline {
        samples.extend(source.read(2048 - samples.len()).unwrap());
    }
    assert_eq!(samples.len(), 2048);

    // amplitude 0.5 at -6 dB
    let peak = 0.5 * 10f32.powf(-6.0 / 20.0);
    for sample in &samples {
        assert!((sample.norm() - peak).abs() < 1e-3);
    }

    source.stop().unwrap();
    assert_eq!(source.state(), SourceState::Initialized);
    source.close().unwrap();
    assert_eq!(source.state(), SourceState::Closed);
}
