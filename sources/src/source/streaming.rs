//! Streaming Source
//!
//! [`StreamingSource`] is the one object a caller holds for any backend. It
//! owns the plugin handle, enforces the lifecycle and moves samples from the
//! producer thread to readers.
//!
//! # Locking
//!
//! Control operations (init, start, stop, tuning, close) serialize on the
//! control mutex. Readers use the consumer mutex so a blocking read does not
//! hold up tuning. When both are needed the order is control, then consumer;
//! `read` never holds both at once. A waiting reader checks the stop flag
//! every few milliseconds, so `stop` and `close` get the consumer mutex
//! without sitting out the reader's timeout.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, sync_channel};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tsdr_plugin_api::{SYMBOL_SET_GAIN, StatusCode};

use super::samples::{Sample, SampleChunk};
use super::worker::{ChannelSink, ExitSlot, ProducerExit, StreamWorker};
use crate::errors::{SourceError, SourceResult};
use crate::plugin::descriptor::SourceDescriptor;
use crate::plugin::handle::{NativeModule, PluginHandle};
use crate::plugin::isolation::guard_native_call;
use crate::plugin::lifecycle::{SourceState, StreamCounters, StreamStats};

/// Default number of callback blocks buffered between producer and reader
pub const DEFAULT_QUEUE_DEPTH: usize = 32;

/// Default time `read` waits for the first block
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(250);

/// Default time `stop` waits for the read loop to exit
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

const STOP_RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Longest a reader waits before re-checking the stop flag
const READ_SLICE: Duration = Duration::from_millis(10);

/// Queue and timeout settings for a streaming source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    pub queue_depth: usize,
    pub read_timeout: Duration,
    /// How long stop keeps signalling a read loop that has not exited
    pub stop_grace: Duration,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            queue_depth: DEFAULT_QUEUE_DEPTH,
            read_timeout: DEFAULT_READ_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }
}

struct Control {
    state: SourceState,
    handle: Option<PluginHandle>,
    worker: Option<StreamWorker>,
    native_initialized: bool,
    sample_rate: Option<u32>,
    center_frequency: Option<u64>,
    gain: Option<f32>,
}

impl Control {
    fn module(&self) -> Option<Arc<dyn NativeModule>> {
        self.handle.as_ref().map(|h| h.module().clone())
    }
}

#[derive(Default)]
struct Consumer {
    rx: Option<Receiver<SampleChunk>>,
    pending: VecDeque<Sample>,
}

/// Move up to `capacity - out.len()` samples of `chunk` into `out`, keeping
/// the rest for the next read
fn take_chunk(chunk: SampleChunk, out: &mut Vec<Sample>, pending: &mut VecDeque<Sample>, capacity: usize) {
    let room = capacity - out.len();
    let mut samples = chunk.samples;
    if samples.len() > room {
        pending.extend(samples.drain(room..));
    }
    out.extend(samples);
}

/// A named SDR source bound to its native module
pub struct StreamingSource {
    descriptor: Arc<SourceDescriptor>,
    module_id: String,
    options: StreamOptions,
    init_params: Option<String>,
    control: Mutex<Control>,
    consumer: Mutex<Consumer>,
    counters: Arc<StreamCounters>,
    exit: ExitSlot,
    stopping: Arc<AtomicBool>,
}

impl StreamingSource {
    /// Wrap a freshly loaded module; the source starts in `Created`
    pub fn new(descriptor: Arc<SourceDescriptor>, handle: PluginHandle, options: StreamOptions) -> Self {
        let module_id = descriptor.module_id().to_string();
        Self {
            descriptor,
            module_id,
            options: StreamOptions {
                queue_depth: options.queue_depth.max(1),
                ..options
            },
            init_params: None,
            control: Mutex::new(Control {
                state: SourceState::Created,
                handle: Some(handle),
                worker: None,
                native_initialized: false,
                sample_rate: None,
                center_frequency: None,
                gain: None,
            }),
            consumer: Mutex::new(Consumer::default()),
            counters: Arc::new(StreamCounters::new()),
            exit: Arc::new(Mutex::new(None)),
            stopping: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Parameters `init()` passes to the module instead of the descriptor's
    /// defaults
    pub fn with_init_params(mut self, params: impl Into<String>) -> Self {
        self.init_params = Some(params.into());
        self
    }

    pub fn descriptor(&self) -> &Arc<SourceDescriptor> {
        &self.descriptor
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn options(&self) -> StreamOptions {
        self.options
    }

    /// Current lifecycle state
    ///
    /// Reports `Failed` as soon as the producer has parked a fault, even
    /// before the fault has been returned to a caller.
    pub fn state(&self) -> SourceState {
        let state = self.control.lock().state;
        if state == SourceState::Streaming
            && matches!(*self.exit.lock(), Some(ProducerExit::Fault(_)))
        {
            return SourceState::Failed;
        }
        state
    }

    pub fn stats(&self) -> StreamStats {
        self.counters.snapshot()
    }

    /// Last frequency accepted by the module
    pub fn center_frequency(&self) -> Option<u64> {
        self.control.lock().center_frequency
    }

    /// Last rate reported by `set_sample_rate`
    pub fn applied_sample_rate(&self) -> Option<u32> {
        self.control.lock().sample_rate
    }

    pub fn gain(&self) -> Option<f32> {
        self.control.lock().gain
    }

    /// Name the module reports for itself, if it exports one
    pub fn plugin_name(&self) -> Option<String> {
        let module = self.control.lock().module()?;
        guard_native_call(&self.module_id, "getName", || module.plugin_name())
            .ok()
            .flatten()
    }

    /// Initialize the module with the configured or default parameters
    pub fn init(&self) -> SourceResult<()> {
        let params = self
            .init_params
            .clone()
            .unwrap_or_else(|| self.descriptor.default_params().to_string());
        self.init_with_params(&params)
    }

    /// Initialize the module with an explicit parameter string
    pub fn init_with_params(&self, params: &str) -> SourceResult<()> {
        let mut control = self.control.lock();
        self.ensure(&mut control, "init", SourceState::can_init)?;

        let status = match self.call(&mut control, "init", |m| m.init(params)) {
            Ok(status) => status,
            Err(SourceError::NativeFault { message, .. }) => {
                return Err(SourceError::Init {
                    module_id: self.module_id.clone(),
                    status: StatusCode::PluginError,
                    message,
                });
            }
            Err(e) => return Err(e),
        };
        if !status.is_ok() {
            let message = self.fail(&mut control, "init");
            return Err(SourceError::Init {
                module_id: self.module_id.clone(),
                status,
                message,
            });
        }

        control.native_initialized = true;
        control.state = SourceState::Initialized;
        tracing::debug!(module_id = %self.module_id, "Source initialized");
        Ok(())
    }

    /// Launch the producer thread
    pub fn start(&self) -> SourceResult<()> {
        let mut control = self.control.lock();
        self.ensure(&mut control, "start", SourceState::can_start)?;
        let Some(module) = control.module() else {
            return Err(self.invalid_state("start", SourceState::Closed));
        };

        let (tx, rx) = sync_channel(self.options.queue_depth);
        {
            let mut consumer = self.consumer.lock();
            consumer.rx = Some(rx);
            consumer.pending.clear();
        }
        self.stopping.store(false, Ordering::SeqCst);
        // Left over from a previous stream that ended on its own
        self.exit.lock().take();

        let sink = ChannelSink::new(tx, self.counters.clone());
        match StreamWorker::spawn(&self.module_id, module, sink, self.stopping.clone(), self.exit.clone()) {
            Ok(worker) => control.worker = Some(worker),
            Err(e) => {
                self.consumer.lock().rx = None;
                return Err(e);
            }
        }

        control.state = SourceState::Streaming;
        tracing::info!(module_id = %self.module_id, "Streaming started");
        Ok(())
    }

    /// Stop streaming; a no-op when the source is initialized but idle
    pub fn stop(&self) -> SourceResult<()> {
        let mut control = self.control.lock();
        self.ensure(&mut control, "stop", SourceState::can_stop)?;

        if control.state == SourceState::Initialized {
            return Ok(());
        }

        if let Err(e) = self.halt_stream(&mut control) {
            self.counters.record_native_error();
            control.state = SourceState::Failed;
            return Err(e);
        }
        control.state = SourceState::Initialized;
        tracing::info!(module_id = %self.module_id, "Streaming stopped");
        Ok(())
    }

    /// Tune the center frequency (Hz)
    pub fn set_frequency(&self, hz: u64) -> SourceResult<()> {
        let mut control = self.control.lock();
        self.ensure(&mut control, "set frequency of", SourceState::can_configure)?;

        let (min, max) = match self.descriptor.frequency_bounds() {
            Some(bounds) => (bounds.min, bounds.max.min(u64::from(u32::MAX))),
            None => (0, u64::from(u32::MAX)),
        };
        if hz < min || hz > max {
            return Err(self.range("frequency", hz as f64, min as f64, max as f64));
        }

        let status = self.call(&mut control, "setbasefreq", |m| m.set_base_frequency(hz as u32))?;
        if !status.is_ok() {
            return Err(self.native_error(&mut control, "setbasefreq", status));
        }

        control.center_frequency = Some(hz);
        tracing::debug!(module_id = %self.module_id, frequency = hz, "Frequency set");
        Ok(())
    }

    /// Request a sample rate (Hz); returns the rate the module applied
    pub fn set_sample_rate(&self, hz: u32) -> SourceResult<u32> {
        let mut control = self.control.lock();
        self.ensure(&mut control, "set sample rate of", SourceState::can_configure)?;

        if let Some(bounds) = self.descriptor.sample_rate_bounds() {
            if !bounds.contains(u64::from(hz)) {
                return Err(self.range("sample rate", f64::from(hz), bounds.min as f64, bounds.max as f64));
            }
        }

        let actual = self.call(&mut control, "setsamplerate", |m| m.set_sample_rate(hz))?;
        if actual == 0 {
            return Err(self.native_error(&mut control, "setsamplerate", StatusCode::SampleRateWrong));
        }

        if actual != hz {
            tracing::debug!(module_id = %self.module_id, requested = hz, actual, "Module adjusted sample rate");
        }
        control.sample_rate = Some(actual);
        Ok(actual)
    }

    /// Ask the module for its current sample rate (Hz)
    ///
    /// Fails with `Unsupported`, without touching the module, when the source
    /// does not advertise the query.
    pub fn sample_rate(&self) -> SourceResult<u32> {
        if !self.descriptor.supports_sample_rate_query() {
            return Err(SourceError::Unsupported {
                module_id: self.module_id.clone(),
                capability: "sample rate query",
            });
        }

        let mut control = self.control.lock();
        self.ensure(&mut control, "query sample rate of", SourceState::can_configure)?;

        match self.call(&mut control, "getsamplerate", |m| m.sample_rate())? {
            Some(0) => Err(self.native_error(&mut control, "getsamplerate", StatusCode::SampleRateWrong)),
            Some(rate) => Ok(rate),
            None => Err(SourceError::SymbolMissing {
                module_id: self.module_id.clone(),
                symbol: tsdr_plugin_api::SYMBOL_GET_SAMPLE_RATE.to_string(),
            }),
        }
    }

    /// Set the receiver gain, for modules that export gain control
    pub fn set_gain(&self, gain: f32) -> SourceResult<()> {
        if !gain.is_finite() {
            return Err(self.range("gain", f64::from(gain), f64::from(f32::MIN), f64::from(f32::MAX)));
        }

        let mut control = self.control.lock();
        self.ensure(&mut control, "set gain of", SourceState::can_configure)?;

        let exported = control.module().is_some_and(|m| m.exports(SYMBOL_SET_GAIN));
        if !exported {
            return Err(SourceError::Unsupported {
                module_id: self.module_id.clone(),
                capability: "gain control",
            });
        }

        match self.call(&mut control, "setgain", |m| m.set_gain(gain))? {
            Some(status) if !status.is_ok() => Err(self.native_error(&mut control, "setgain", status)),
            _ => {
                control.gain = Some(gain);
                Ok(())
            }
        }
    }

    /// Read up to `capacity` samples, waiting at most the configured timeout
    pub fn read(&self, capacity: usize) -> SourceResult<Vec<Sample>> {
        self.read_timeout(capacity, self.options.read_timeout)
    }

    /// Read up to `capacity` samples, waiting at most `timeout` for the first
    /// block
    ///
    /// Returns an empty vector when nothing arrived in time. Samples come out
    /// in the order the module produced them.
    pub fn read_timeout(&self, capacity: usize, timeout: Duration) -> SourceResult<Vec<Sample>> {
        {
            let mut control = self.control.lock();
            self.ensure(&mut control, "read from", SourceState::can_read)?;
        }

        if capacity == 0 {
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(capacity.min(1 << 16));
        let mut disconnected = false;
        {
            let mut consumer = self.consumer.lock();
            let Consumer { rx, pending } = &mut *consumer;

            let n = pending.len().min(capacity);
            out.extend(pending.drain(..n));

            if let Some(rx) = rx.as_ref() {
                let deadline = Instant::now() + timeout;
                while out.is_empty() && !self.stopping.load(Ordering::SeqCst) {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        break;
                    }
                    match rx.recv_timeout(remaining.min(READ_SLICE)) {
                        Ok(chunk) => take_chunk(chunk, &mut out, pending, capacity),
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => {
                            disconnected = true;
                            break;
                        }
                    }
                }
                while out.len() < capacity {
                    match rx.try_recv() {
                        Ok(chunk) => take_chunk(chunk, &mut out, pending, capacity),
                        Err(_) => break,
                    }
                }
            }
        }

        if out.is_empty() && disconnected {
            let mut control = self.control.lock();
            self.finish_stream(&mut control)?;
        }

        self.counters.record_delivered(out.len());
        Ok(out)
    }

    /// Async variant of [`read_timeout`](Self::read_timeout), run on the
    /// blocking thread pool
    pub async fn read_async(self: &Arc<Self>, capacity: usize, timeout: Duration) -> SourceResult<Vec<Sample>> {
        let source = Arc::clone(self);
        tokio::task::spawn_blocking(move || source.read_timeout(capacity, timeout))
            .await
            .map_err(|e| SourceError::Worker {
                module_id: self.module_id.clone(),
                message: e.to_string(),
            })?
    }

    /// Stop streaming if needed, clean up the module and release it
    ///
    /// Accepted in every state; closing twice does nothing. After this
    /// returns no further call reaches the module.
    pub fn close(&self) -> SourceResult<()> {
        let mut control = self.control.lock();
        if control.state == SourceState::Closed {
            return Ok(());
        }

        let mut first_error = None;
        if let Err(e) = self.halt_stream(&mut control) {
            if control.worker.is_some() {
                // The read loop is still inside the module: keep it loaded
                control.state = SourceState::Failed;
                tracing::error!(module_id = %self.module_id, error = %e, "Read loop did not exit, module kept loaded");
                return Err(e);
            }
            first_error = Some(e);
        }

        if let Some(ProducerExit::Fault(fault)) = self.exit.lock().take() {
            tracing::debug!(module_id = %self.module_id, error = %fault, "Discarding fault on close");
        }

        if control.native_initialized {
            control.native_initialized = false;
            if let Some(module) = control.module() {
                if let Err(e) = guard_native_call(&self.module_id, "cleanup", || module.cleanup()) {
                    first_error.get_or_insert(e);
                }
            }
        }

        {
            let mut consumer = self.consumer.lock();
            consumer.rx = None;
            consumer.pending.clear();
        }
        control.handle = None;
        control.state = SourceState::Closed;
        tracing::info!(module_id = %self.module_id, "Source closed");

        first_error.map_or(Ok(()), Err)
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    /// Surface a parked producer fault, then check the state predicate
    fn ensure(
        &self,
        control: &mut Control,
        operation: &'static str,
        allowed: fn(&SourceState) -> bool,
    ) -> SourceResult<()> {
        self.check_fault(control)?;
        if allowed(&control.state) {
            Ok(())
        } else {
            Err(self.invalid_state(operation, control.state))
        }
    }

    /// Surface a parked producer fault; an end of stream stays parked until
    /// the queue is drained
    fn check_fault(&self, control: &mut Control) -> SourceResult<()> {
        let fault = {
            let mut exit = self.exit.lock();
            match exit.take() {
                Some(ProducerExit::Fault(fault)) => fault,
                other => {
                    *exit = other;
                    return Ok(());
                }
            }
        };

        control.state = SourceState::Failed;
        self.reap_worker(control);
        Err(fault)
    }

    /// Called once the queue is drained and disconnected: report how the
    /// read loop ended
    fn finish_stream(&self, control: &mut Control) -> SourceResult<()> {
        self.check_fault(control)?;
        if !matches!(self.exit.lock().take(), Some(ProducerExit::Ended)) {
            // Stopped by another caller in the meantime
            return Ok(());
        }

        self.reap_worker(control);
        if control.state == SourceState::Streaming {
            control.state = SourceState::Initialized;
        }
        tracing::info!(module_id = %self.module_id, "Stream ended");
        Err(SourceError::StreamEnded {
            module_id: self.module_id.clone(),
        })
    }

    /// Join a producer thread that has already left the module
    fn reap_worker(&self, control: &mut Control) {
        if let Some(worker) = control.worker.take() {
            if let Err(e) = worker.join() {
                tracing::warn!(module_id = %self.module_id, error = %e, "Producer thread ended abnormally");
            }
        }
    }

    /// Run a native call, moving the source to `Failed` if it panics
    fn call<T>(
        &self,
        control: &mut Control,
        call: &'static str,
        native_fn: impl FnOnce(&dyn NativeModule) -> T,
    ) -> SourceResult<T> {
        let Some(module) = control.module() else {
            return Err(self.invalid_state(call, SourceState::Closed));
        };
        match guard_native_call(&self.module_id, call, || native_fn(module.as_ref())) {
            Ok(value) => Ok(value),
            Err(fault) => {
                self.fail(control, call);
                Err(fault)
            }
        }
    }

    /// Build the error for a native call that reported failure
    fn native_error(&self, control: &mut Control, call: &'static str, status: StatusCode) -> SourceError {
        let message = self.fail(control, call);
        SourceError::Native {
            module_id: self.module_id.clone(),
            call,
            status,
            message,
        }
    }

    /// Move to `Failed`, halting any running stream; returns the module's
    /// last error text
    fn fail(&self, control: &mut Control, call: &'static str) -> String {
        self.counters.record_native_error();
        let message = control
            .module()
            .and_then(|m| {
                guard_native_call(&self.module_id, "getlasterrortext", || m.last_error())
                    .ok()
                    .flatten()
            })
            .unwrap_or_default();

        if let Err(e) = self.halt_stream(control) {
            tracing::warn!(module_id = %self.module_id, error = %e, "Failed to halt stream");
        }
        control.state = SourceState::Failed;
        tracing::warn!(module_id = %self.module_id, call, message = %message, "Native call failed");
        message
    }

    /// Tear down the producer: disconnect the queue, signal the module and
    /// join the thread
    ///
    /// A stop that lands before the module entered its read loop is lost, and
    /// a stop can fail, so stop is re-issued until the thread exits. A thread
    /// still running after the grace period is put back into `control` and
    /// `Worker` is returned; the module must then stay loaded.
    fn halt_stream(&self, control: &mut Control) -> SourceResult<()> {
        let Some(worker) = control.worker.take() else {
            return Ok(());
        };

        self.stopping.store(true, Ordering::SeqCst);
        {
            // Unblocks a producer waiting on a full queue
            let mut consumer = self.consumer.lock();
            consumer.rx = None;
            consumer.pending.clear();
        }

        let deadline = Instant::now() + self.options.stop_grace;
        let mut stop_error = None;
        loop {
            if let Some(module) = control.module() {
                match guard_native_call(&self.module_id, "stop", || module.stop()) {
                    Ok(status) if status.is_ok() => {}
                    Ok(status) => {
                        stop_error.get_or_insert_with(|| SourceError::Native {
                            module_id: self.module_id.clone(),
                            call: "stop",
                            status,
                            message: guard_native_call(&self.module_id, "getlasterrortext", || module.last_error())
                                .ok()
                                .flatten()
                                .unwrap_or_default(),
                        });
                    }
                    Err(fault) => {
                        stop_error.get_or_insert(fault);
                    }
                }
            }

            if worker.wait(STOP_RETRY_INTERVAL) {
                worker.join()?;
                return stop_error.map_or(Ok(()), Err);
            }
            if Instant::now() >= deadline {
                control.worker = Some(worker);
                let detail = stop_error.map(|e| format!(" (stop: {e})")).unwrap_or_default();
                return Err(SourceError::Worker {
                    module_id: self.module_id.clone(),
                    message: format!(
                        "read loop still running {} ms after stop{detail}",
                        self.options.stop_grace.as_millis()
                    ),
                });
            }
            tracing::debug!(module_id = %self.module_id, "Read loop still running, re-issuing stop");
        }
    }

    fn invalid_state(&self, operation: &'static str, state: SourceState) -> SourceError {
        SourceError::InvalidState {
            module_id: self.module_id.clone(),
            operation,
            state,
        }
    }

    fn range(&self, parameter: &'static str, value: f64, min: f64, max: f64) -> SourceError {
        SourceError::Range {
            module_id: self.module_id.clone(),
            parameter,
            value,
            min,
            max,
        }
    }
}

impl std::fmt::Debug for StreamingSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingSource")
            .field("name", &self.descriptor.display_name())
            .field("module_id", &self.module_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Drop for StreamingSource {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(module_id = %self.module_id, error = %e, "Error closing source on drop");
        }

        let control = self.control.get_mut();
        if let Some(worker) = control.worker.take() {
            worker.release_after_exit(control.handle.take(), control.native_initialized);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_chunk_splits_at_capacity() {
        let chunk = SampleChunk {
            samples: (0..6).map(|i| Sample::new(i as f32, 0.0)).collect(),
            dropped: 0,
        };
        let mut out = vec![Sample::new(-1.0, 0.0)];
        let mut pending = VecDeque::new();

        take_chunk(chunk, &mut out, &mut pending, 4);

        assert_eq!(out.len(), 4);
        assert_eq!(out[1].re, 0.0);
        assert_eq!(out[3].re, 2.0);
        assert_eq!(pending.len(), 3);
        assert_eq!(pending.front().map(|s| s.re), Some(3.0));
    }

    #[test]
    fn test_stream_options_default() {
        let options = StreamOptions::default();
        assert_eq!(options.queue_depth, 32);
        assert_eq!(options.read_timeout, Duration::from_millis(250));
        assert_eq!(options.stop_grace, Duration::from_secs(5));
    }
}
