//! In-process stand-ins for native source modules
//!
//! `MockModule` implements `NativeModule` with scripted behavior and records
//! every entry point it receives. `MockLoader` hands them out in place of
//! `DynamicLoader` and tracks how many are still alive.

#![allow(dead_code)]

use std::collections::HashMap;
use std::env::consts::{DLL_PREFIX, DLL_SUFFIX};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tempfile::TempDir;
use tsdr_plugin_api::{
    REQUIRED_SYMBOLS, SYMBOL_API_VERSION, SYMBOL_GET_NAME, SYMBOL_GET_SAMPLE_RATE,
    SYMBOL_LAST_ERROR, SYMBOL_SET_GAIN, StatusCode,
};
use tsdr_sources::plugin::{
    ModuleLoader, NativeModule, PluginHandle, PluginResolver, SampleSink, SourceRegistry,
};
use tsdr_sources::{SourceDescriptor, SourceError, SourceManager, SourceResult, StreamOptions};

/// Scripted behavior of one mock module
#[derive(Debug, Clone)]
pub struct Behavior {
    pub init_status: StatusCode,
    pub base_freq_status: StatusCode,
    /// `None` echoes the requested rate
    pub applied_rate: Option<u32>,
    /// `None` means the rate query is not exported
    pub reported_rate: Option<u32>,
    pub gain_supported: bool,
    /// Samples per callback; 0 produces nothing
    pub block_len: usize,
    /// End the read loop with `read_status` after this many blocks
    pub fail_read_after: Option<usize>,
    pub read_status: StatusCode,
    pub panic_on_base_freq: bool,
    pub panic_on_init: bool,
    /// Status returned by stop; the read loop is told to end regardless
    pub stop_status: StatusCode,
    /// Time the read loop keeps running after it was told to end
    pub linger: Duration,
    pub last_error: Option<String>,
    pub plugin_name: Option<String>,
    pub api_version: Option<u32>,
    /// Required symbols the loader pretends are absent
    pub missing_symbols: Vec<&'static str>,
    pub pace: Duration,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            init_status: StatusCode::Ok,
            base_freq_status: StatusCode::Ok,
            applied_rate: None,
            reported_rate: None,
            gain_supported: false,
            block_len: 256,
            fail_read_after: None,
            read_status: StatusCode::Ok,
            panic_on_base_freq: false,
            panic_on_init: false,
            stop_status: StatusCode::Ok,
            linger: Duration::ZERO,
            last_error: None,
            plugin_name: Some("Mock plugin".to_string()),
            api_version: None,
            missing_symbols: Vec::new(),
            pace: Duration::from_micros(200),
        }
    }
}

pub struct MockModule {
    behavior: Behavior,
    calls: Mutex<Vec<String>>,
    running: AtomicBool,
    rate: Mutex<u32>,
    live: Arc<AtomicUsize>,
}

impl MockModule {
    fn new(behavior: Behavior, live: Arc<AtomicUsize>) -> Self {
        live.fetch_add(1, Ordering::SeqCst);
        Self {
            rate: Mutex::new(behavior.reported_rate.unwrap_or(0)),
            behavior,
            calls: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            live,
        }
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }

    /// Entry points received so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == call).count()
    }
}

impl Drop for MockModule {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl NativeModule for MockModule {
    fn plugin_name(&self) -> Option<String> {
        self.behavior.plugin_name.clone()
    }

    fn api_version(&self) -> Option<u32> {
        self.behavior.api_version
    }

    fn init(&self, params: &str) -> StatusCode {
        self.record(&format!("init:{params}"));
        if self.behavior.panic_on_init {
            panic!("driver table corrupted");
        }
        self.behavior.init_status
    }

    fn set_sample_rate(&self, rate: u32) -> u32 {
        self.record("setsamplerate");
        let applied = self.behavior.applied_rate.unwrap_or(rate);
        if applied != 0 {
            *self.rate.lock() = applied;
        }
        applied
    }

    fn sample_rate(&self) -> Option<u32> {
        self.record("getsamplerate");
        self.behavior.reported_rate.map(|_| *self.rate.lock())
    }

    fn set_base_frequency(&self, _frequency: u32) -> StatusCode {
        self.record("setbasefreq");
        if self.behavior.panic_on_base_freq {
            panic!("tuner exploded");
        }
        self.behavior.base_freq_status
    }

    fn set_gain(&self, _gain: f32) -> Option<StatusCode> {
        self.record("setgain");
        self.behavior.gain_supported.then_some(StatusCode::Ok)
    }

    fn read_async(&self, sink: &mut dyn SampleSink) -> StatusCode {
        self.record("readasync");
        self.running.store(true, Ordering::SeqCst);

        let mut sequence = 0u64;
        let mut blocks = 0usize;
        let mut buffer = Vec::with_capacity(self.behavior.block_len * 2);

        while self.running.load(Ordering::SeqCst) {
            if self.behavior.fail_read_after == Some(blocks) {
                self.running.store(false, Ordering::SeqCst);
                self.record("readasync:exit");
                return self.behavior.read_status;
            }

            if self.behavior.block_len > 0 {
                buffer.clear();
                for _ in 0..self.behavior.block_len {
                    buffer.push(sequence as f32);
                    buffer.push(-(sequence as f32));
                    sequence += 1;
                }
                sink.on_samples(&buffer, 0);
                blocks += 1;
            }
            std::thread::sleep(self.behavior.pace);
        }

        std::thread::sleep(self.behavior.linger);
        self.record("readasync:exit");
        StatusCode::Ok
    }

    fn stop(&self) -> StatusCode {
        self.record("stop");
        self.running.store(false, Ordering::SeqCst);
        self.behavior.stop_status
    }

    fn cleanup(&self) {
        self.record("cleanup");
    }

    fn last_error(&self) -> Option<String> {
        self.behavior.last_error.clone()
    }

    fn exports(&self, symbol: &str) -> bool {
        match symbol {
            SYMBOL_GET_SAMPLE_RATE => self.behavior.reported_rate.is_some(),
            SYMBOL_SET_GAIN => self.behavior.gain_supported,
            SYMBOL_GET_NAME => self.behavior.plugin_name.is_some(),
            SYMBOL_LAST_ERROR => self.behavior.last_error.is_some(),
            SYMBOL_API_VERSION => self.behavior.api_version.is_some(),
            other => REQUIRED_SYMBOLS.contains(&other),
        }
    }
}

/// Loader producing `MockModule`s keyed by module id
#[derive(Default)]
pub struct MockLoader {
    behaviors: Mutex<HashMap<String, Behavior>>,
    modules: Mutex<Vec<Weak<MockModule>>>,
    live: Arc<AtomicUsize>,
    loads: AtomicUsize,
}

impl MockLoader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with(self: Arc<Self>, module_id: &str, behavior: Behavior) -> Arc<Self> {
        self.behaviors.lock().insert(module_id.to_string(), behavior);
        self
    }

    /// Mock modules not yet dropped
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Most recently loaded module, while it is still loaded
    pub fn last(&self) -> Arc<MockModule> {
        self.modules
            .lock()
            .last()
            .and_then(Weak::upgrade)
            .expect("no live module")
    }
}

impl ModuleLoader for MockLoader {
    fn load(&self, module_id: &str, path: &Path) -> SourceResult<PluginHandle> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let behavior = self
            .behaviors
            .lock()
            .get(module_id)
            .cloned()
            .unwrap_or_default();

        if let Some(symbol) = behavior.missing_symbols.first() {
            return Err(SourceError::SymbolMissing {
                module_id: module_id.to_string(),
                symbol: symbol.to_string(),
            });
        }

        let module = Arc::new(MockModule::new(behavior, self.live.clone()));
        self.modules.lock().push(Arc::downgrade(&module));
        Ok(PluginHandle::new(module_id, path, module))
    }
}

/// Temporary plugin directory holding empty files named like the libraries
/// for `module_ids`
pub fn fixture_dir(module_ids: &[&str]) -> TempDir {
    let dir = TempDir::new().expect("temp dir");
    for id in module_ids {
        let path = dir.path().join(format!("{DLL_PREFIX}{id}{DLL_SUFFIX}"));
        std::fs::write(path, b"").expect("fixture file");
    }
    dir
}

/// Manager over a private registry, resolving into `dir` and loading mocks
pub fn manager(
    descriptors: Vec<SourceDescriptor>,
    dir: &TempDir,
    loader: Arc<MockLoader>,
) -> SourceManager {
    let registry = Arc::new(SourceRegistry::new());
    for descriptor in descriptors {
        registry.register(descriptor).expect("register");
    }
    let mut resolver = PluginResolver::new();
    resolver.add_search_path(dir.path());

    SourceManager::new()
        .with_registry(registry)
        .with_resolver(resolver)
        .with_loader(loader)
        .with_options(StreamOptions {
            queue_depth: 8,
            read_timeout: Duration::from_millis(200),
            ..StreamOptions::default()
        })
}

pub fn soapy() -> SourceDescriptor {
    SourceDescriptor::new("Soapy", "TSDRPlugin_Soapy", false)
}

/// Shorten how long stop waits for a read loop that does not exit
pub fn with_stop_grace(manager: SourceManager, stop_grace: Duration) -> SourceManager {
    let options = StreamOptions {
        stop_grace,
        ..manager.options()
    };
    manager.with_options(options)
}

/// Poll `done` for up to five seconds
pub fn eventually(mut done: impl FnMut() -> bool) -> bool {
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while std::time::Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Position of the first `call` in `calls`
pub fn position(calls: &[String], call: &str) -> Option<usize> {
    calls.iter().position(|c| c == call)
}
