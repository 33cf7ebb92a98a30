//! Producer thread
//!
//! Each streaming source owns at most one [`StreamWorker`]. The worker runs
//! the module's blocking `readasync` entry point on a dedicated thread and
//! forwards every callback block into a bounded channel. When the channel is
//! full the callback blocks, which in turn stalls the native read loop.
//!
//! A read loop that ends on its own, with or without an error, is not
//! returned anywhere directly: the outcome is parked in the shared exit slot
//! before the queue disconnects, and reported by the next call on the source.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::SyncSender;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::samples::SampleChunk;
use crate::errors::{SourceError, SourceResult};
use crate::plugin::handle::{NativeModule, PluginHandle, SampleSink};
use crate::plugin::isolation::{extract_panic_message, guard_native_call};
use crate::plugin::lifecycle::StreamCounters;

/// How a read loop ended without being asked to stop
#[derive(Debug)]
pub enum ProducerExit {
    /// The module returned OK: end of stream
    Ended,
    /// The module returned an error status or panicked
    Fault(SourceError),
}

/// Slot where the producer leaves its exit for the consumer side
pub type ExitSlot = Arc<Mutex<Option<ProducerExit>>>;

/// Sink feeding the bounded sample queue
pub struct ChannelSink {
    tx: SyncSender<SampleChunk>,
    counters: Arc<StreamCounters>,
    disconnected: bool,
}

impl ChannelSink {
    pub fn new(tx: SyncSender<SampleChunk>, counters: Arc<StreamCounters>) -> Self {
        Self {
            tx,
            counters,
            disconnected: false,
        }
    }
}

impl SampleSink for ChannelSink {
    fn on_samples(&mut self, interleaved: &[f32], dropped: u64) {
        let chunk = SampleChunk::from_interleaved(interleaved, dropped);
        self.counters.record_chunk(chunk.len(), dropped);

        if self.disconnected || chunk.is_empty() {
            return;
        }
        // Blocks while the queue is full
        if self.tx.send(chunk).is_err() {
            self.disconnected = true;
        }
    }
}

/// Handle to a running producer thread
#[derive(Debug)]
pub struct StreamWorker {
    module_id: String,
    thread: JoinHandle<()>,
}

impl StreamWorker {
    /// Spawn the producer thread for `module`
    pub fn spawn(
        module_id: &str,
        module: Arc<dyn NativeModule>,
        sink: ChannelSink,
        stopping: Arc<AtomicBool>,
        exit: ExitSlot,
    ) -> SourceResult<Self> {
        let id = module_id.to_string();
        let thread = std::thread::Builder::new()
            .name(format!("tsdr-{module_id}"))
            .spawn(move || run(&id, module.as_ref(), sink, &stopping, &exit))
            .map_err(|e| SourceError::Worker {
                module_id: module_id.to_string(),
                message: e.to_string(),
            })?;

        tracing::debug!(module_id, "Producer thread started");
        Ok(Self {
            module_id: module_id.to_string(),
            thread,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Poll until the thread has exited or `timeout` elapsed
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_finished() {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        true
    }

    /// Wait for the producer thread to exit
    pub fn join(self) -> SourceResult<()> {
        self.thread.join().map_err(|panic_info| SourceError::Worker {
            module_id: self.module_id.clone(),
            message: extract_panic_message(&panic_info),
        })?;
        tracing::debug!(module_id = %self.module_id, "Producer thread joined");
        Ok(())
    }

    /// Hand the module over to a background thread that joins the producer,
    /// then runs cleanup (if `cleanup` is set) and releases `handle`
    ///
    /// Used when a source is dropped while its read loop ignores stop.
    pub fn release_after_exit(self, handle: Option<PluginHandle>, cleanup: bool) {
        let module_id = self.module_id.clone();
        tracing::warn!(module_id = %module_id, "Read loop still running, deferring module release");

        let spawned = std::thread::Builder::new()
            .name(format!("tsdr-release-{module_id}"))
            .spawn(move || {
                if let Err(e) = self.join() {
                    tracing::warn!(module_id = %module_id, error = %e, "Producer thread ended abnormally");
                }
                if let Some(handle) = handle {
                    if cleanup {
                        let module = handle.module().clone();
                        if let Err(e) = guard_native_call(&module_id, "cleanup", || module.cleanup()) {
                            tracing::warn!(module_id = %module_id, error = %e, "Deferred cleanup failed");
                        }
                    }
                    drop(handle);
                }
                tracing::info!(module_id = %module_id, "Deferred module release complete");
            });

        if let Err(e) = spawned {
            tracing::error!(error = %e, "Failed to spawn release thread, module leaked");
        }
    }
}

fn run(
    module_id: &str,
    module: &dyn NativeModule,
    sink: ChannelSink,
    stopping: &AtomicBool,
    exit: &Mutex<Option<ProducerExit>>,
) {
    let counters = sink.counters.clone();
    let mut sink = sink;
    let result = guard_native_call(module_id, "readasync", || module.read_async(&mut sink));

    let outcome = match result {
        _ if stopping.load(Ordering::SeqCst) => {
            tracing::debug!(module_id, "Native read loop ended during stop");
            None
        }
        Ok(status) if status.is_ok() => {
            tracing::info!(module_id, "Native read loop ended on its own");
            Some(ProducerExit::Ended)
        }
        Ok(status) => Some(ProducerExit::Fault(SourceError::Native {
            module_id: module_id.to_string(),
            call: "readasync",
            status,
            message: guard_native_call(module_id, "getlasterrortext", || module.last_error())
                .ok()
                .flatten()
                .unwrap_or_default(),
        })),
        Err(e) => Some(ProducerExit::Fault(e)),
    };

    if let Some(ProducerExit::Fault(error)) = &outcome {
        counters.record_native_error();
        tracing::error!(module_id, error = %error, "Streaming failed");
    }
    if outcome.is_some() {
        *exit.lock() = outcome;
    }
    // Disconnect last: a reader that sees the queue close finds the exit parked
    drop(sink);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc::sync_channel;

    #[test]
    fn test_channel_sink_forwards_chunks() {
        let (tx, rx) = sync_channel(4);
        let counters = Arc::new(StreamCounters::new());
        let mut sink = ChannelSink::new(tx, counters.clone());

        sink.on_samples(&[1.0, 0.0, 0.0, 1.0], 0);
        sink.on_samples(&[], 512);

        let chunk = rx.try_recv().unwrap();
        assert_eq!(chunk.len(), 2);
        // Dropped-only blocks are counted but not queued
        assert!(rx.try_recv().is_err());

        let stats = counters.snapshot();
        assert_eq!(stats.chunks, 2);
        assert_eq!(stats.samples_produced, 2);
        assert_eq!(stats.dropped_samples, 512);
    }

    #[test]
    fn test_channel_sink_survives_disconnect() {
        let (tx, rx) = sync_channel(1);
        let counters = Arc::new(StreamCounters::new());
        let mut sink = ChannelSink::new(tx, counters.clone());
        drop(rx);

        sink.on_samples(&[1.0, 1.0], 0);
        sink.on_samples(&[1.0, 1.0], 0);
        assert!(sink.disconnected);
        assert_eq!(counters.snapshot().chunks, 2);
    }

    /// Emits one block, then returns `status` from the read loop
    struct OneBlock {
        status: tsdr_plugin_api::StatusCode,
    }

    impl NativeModule for OneBlock {
        fn plugin_name(&self) -> Option<String> {
            None
        }
        fn api_version(&self) -> Option<u32> {
            None
        }
        fn init(&self, _params: &str) -> tsdr_plugin_api::StatusCode {
            tsdr_plugin_api::StatusCode::Ok
        }
        fn set_sample_rate(&self, rate: u32) -> u32 {
            rate
        }
        fn sample_rate(&self) -> Option<u32> {
            None
        }
        fn set_base_frequency(&self, _frequency: u32) -> tsdr_plugin_api::StatusCode {
            tsdr_plugin_api::StatusCode::Ok
        }
        fn set_gain(&self, _gain: f32) -> Option<tsdr_plugin_api::StatusCode> {
            None
        }
        fn read_async(&self, sink: &mut dyn SampleSink) -> tsdr_plugin_api::StatusCode {
            sink.on_samples(&[1.0, -1.0], 0);
            self.status
        }
        fn stop(&self) -> tsdr_plugin_api::StatusCode {
            tsdr_plugin_api::StatusCode::Ok
        }
        fn cleanup(&self) {}
        fn last_error(&self) -> Option<String> {
            Some("device unplugged".to_string())
        }
        fn exports(&self, _symbol: &str) -> bool {
            true
        }
    }

    fn run_to_disconnect(status: tsdr_plugin_api::StatusCode) -> Option<ProducerExit> {
        let (tx, rx) = sync_channel(4);
        let counters = Arc::new(StreamCounters::new());
        let exit: ExitSlot = Arc::new(Mutex::new(None));
        let worker = StreamWorker::spawn(
            "TSDRPlugin_Soapy",
            Arc::new(OneBlock { status }),
            ChannelSink::new(tx, counters),
            Arc::new(AtomicBool::new(false)),
            exit.clone(),
        )
        .unwrap();

        assert_eq!(rx.recv().unwrap().len(), 1);
        assert!(rx.recv().is_err());
        // Parked before the queue closed
        let parked = exit.lock().take();
        worker.join().unwrap();
        parked
    }

    #[test]
    fn test_read_loop_returning_ok_is_end_of_stream() {
        let parked = run_to_disconnect(tsdr_plugin_api::StatusCode::Ok);
        assert!(matches!(parked, Some(ProducerExit::Ended)));
    }

    #[test]
    fn test_read_loop_error_is_parked_as_fault() {
        match run_to_disconnect(tsdr_plugin_api::StatusCode::PluginError) {
            Some(ProducerExit::Fault(SourceError::Native { call, message, .. })) => {
                assert_eq!(call, "readasync");
                assert_eq!(message, "device unplugged");
            }
            other => panic!("unexpected exit: {other:?}"),
        }
    }
}
