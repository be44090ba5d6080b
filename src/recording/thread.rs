//! Encode/output thread and its supervisor
//!
//! The worker walks `Constructing -> Starting -> Feeding`, leaving `Feeding`
//! either through `Stalled` (no successful push for longer than the stall
//! timeout, or a rejected push) or directly into `ShuttingDown`. A stalled
//! worker exits with the destination untouched, so the supervisor spawns a
//! fresh one on its next [`EncoderSupervisor::ensure_running`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, info, warn};

use super::description::{encode_pipeline, recording_filename, EncodeParams};
use super::encoder::{AbortHandle, BufferTiming, BusEvent, EncoderBackend, EncoderFactory, FrameFormat};
use super::{DestinationType, VideoOutput};
use crate::notify::Alert;
use crate::{Config, HudError, RecordingConfig, Result, StreamConfig};

/// Observable phase of the encode worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodePhase {
    Constructing,
    Starting,
    Feeding,
    Stalled,
    ShuttingDown,
}

/// Why the worker is shutting down
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// Output was turned off
    Disabled,
    /// Stall, push failure or a changed destination; a new worker follows
    Restart,
    /// Construction, start or bus failure; the destination is disabled
    Fatal,
}

enum EncodeState<B> {
    Constructing,
    Starting(B),
    Feeding(B),
    Stalled(B),
    ShuttingDown(Option<B>, Exit),
}

impl<B> EncodeState<B> {
    fn phase(&self) -> EncodePhase {
        match self {
            EncodeState::Constructing => EncodePhase::Constructing,
            EncodeState::Starting(_) => EncodePhase::Starting,
            EncodeState::Feeding(_) => EncodePhase::Feeding,
            EncodeState::Stalled(_) => EncodePhase::Stalled,
            EncodeState::ShuttingDown(..) => EncodePhase::ShuttingDown,
        }
    }
}

/// Parameters fixed for the lifetime of one worker
#[derive(Debug, Clone)]
pub struct EncodeSettings {
    pub format: FrameFormat,
    pub recording: RecordingConfig,
    pub stream: StreamConfig,
    pub stall_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl EncodeSettings {
    pub fn from_config(config: &Config) -> Self {
        let (width, height) = config.display.output_size();
        Self {
            format: FrameFormat {
                width,
                height,
                fps: config.recording.target_fps,
            },
            recording: config.recording.clone(),
            stream: config.stream.clone(),
            stall_timeout: config.recording.stall_timeout(),
            shutdown_timeout: config.recording.shutdown_timeout(),
        }
    }

    /// Encode frames of the given size instead of the configured window size
    pub fn with_frame_size(mut self, width: u32, height: u32) -> Self {
        self.format.width = width;
        self.format.height = height;
        self
    }

    fn frame_duration(&self) -> Duration {
        self.recording.frame_duration()
    }
}

#[derive(Default)]
struct WorkerShared {
    abort: Mutex<Option<AbortHandle>>,
    restart: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct EncodeWorker<F: EncoderFactory> {
    factory: Arc<F>,
    output: Arc<VideoOutput>,
    settings: EncodeSettings,
    destination: DestinationType,
    shared: Arc<WorkerShared>,
    count: u64,
    last_push: Instant,
    // Dropped on exit; the supervisor's receiver then disconnects
    _done: Sender<()>,
}

impl<F: EncoderFactory> EncodeWorker<F> {
    fn run(mut self) {
        let mut state = EncodeState::Constructing;

        loop {
            let phase = state.phase();
            state = match state {
                EncodeState::Constructing => self.construct(),
                EncodeState::Starting(backend) => self.start(backend),
                EncodeState::Feeding(backend) => self.feed(backend),
                EncodeState::Stalled(backend) => self.stalled(backend),
                EncodeState::ShuttingDown(backend, exit) => {
                    self.shut_down(backend, exit);
                    return;
                }
            };

            if state.phase() != phase {
                debug!("Encoder {:?} -> {:?}", phase, state.phase());
            }
        }
    }

    fn construct(&mut self) -> EncodeState<F::Backend> {
        let filename = recording_filename(
            &self.settings.recording.directory,
            self.settings.recording.container,
            Local::now(),
        );
        let encoder = self
            .settings
            .recording
            .encoder
            .clone()
            .unwrap_or_else(|| self.factory.h264_encoder());

        let params = EncodeParams {
            destination: self.destination,
            width: self.settings.format.width,
            height: self.settings.format.height,
            fps: self.settings.format.fps,
            encoder: &encoder,
            filename: &filename,
            recording: &self.settings.recording,
            stream: &self.settings.stream,
        };
        let Some(description) = encode_pipeline(&params) else {
            error!("Invalid destination passed.");
            return EncodeState::ShuttingDown(None, Exit::Disabled);
        };

        if self.destination.records_to_file() {
            info!("New recording: {}", filename.display());
            self.output.set_filename(&filename);
        }
        info!("Encoder pipeline: {}", description);

        match self.factory.construct(&description, self.settings.format) {
            Ok(backend) => {
                *lock(&self.shared.abort) = Some(backend.abort_handle());
                EncodeState::Starting(backend)
            }
            Err(e) => {
                error!("Could not construct pipeline \"{}\": {}", description, e);
                EncodeState::ShuttingDown(None, Exit::Fatal)
            }
        }
    }

    fn start(&mut self, mut backend: F::Backend) -> EncodeState<F::Backend> {
        match backend.start() {
            Ok(()) => {
                self.output.set_started(true);
                self.last_push = Instant::now();
                info!("Encoder started for {:?}", self.destination);
                EncodeState::Feeding(backend)
            }
            Err(HudError::ClockUnavailable) => {
                error!("Error getting pipeline clock. This output cannot be recorded.");
                EncodeState::ShuttingDown(Some(backend), Exit::Fatal)
            }
            Err(e) => {
                error!("Encoder failed to start: {}", e);
                EncodeState::ShuttingDown(Some(backend), Exit::Fatal)
            }
        }
    }

    /// One paced iteration of the feeding loop
    fn feed(&mut self, mut backend: F::Backend) -> EncodeState<F::Backend> {
        let current = self.output.recording_state();
        if current != self.destination {
            let exit = if current.is_enabled() {
                info!("Destination changed to {:?}, rebuilding pipeline", current);
                Exit::Restart
            } else {
                Exit::Disabled
            };
            return EncodeState::ShuttingDown(Some(backend), exit);
        }

        while let Some(event) = backend.poll_bus() {
            match event {
                BusEvent::Error(msg) => {
                    error!("Encoder pipeline error: {}", msg);
                    return EncodeState::ShuttingDown(Some(backend), Exit::Fatal);
                }
                BusEvent::Warning(msg) => warn!("Encoder pipeline warning: {}", msg),
                BusEvent::Eos => {
                    warn!("Encoder pipeline reached end of stream unexpectedly");
                    return EncodeState::Stalled(backend);
                }
                BusEvent::StateChanged { old, new } => debug!("Encoder state {} -> {}", old, new),
                BusEvent::AsyncDone => debug!("Encoder async-done"),
            }
        }

        let tick = Instant::now();
        let frame_duration = self.settings.frame_duration();

        if backend.needs_data() {
            if let Some(frame) = self.output.take_drain() {
                let timing = BufferTiming {
                    pts: backend.running_time(),
                    duration: frame_duration,
                    offset: self.count,
                };
                match backend.push_buffer(frame, timing) {
                    Ok(()) => {
                        self.count += 1;
                        self.last_push = Instant::now();
                        metrics::counter!("encoder_buffers_pushed").increment(1);
                    }
                    Err(HudError::BufferAlloc) => {
                        warn!("Failure to allocate new buffer for encoding.");
                        metrics::counter!("frames_dropped").increment(1);
                    }
                    Err(e) => {
                        error!("{}", e);
                        return EncodeState::Stalled(backend);
                    }
                }
            }
        }

        if self.last_push.elapsed() > self.settings.stall_timeout {
            warn!(
                "No buffer accepted for {:?} (frame {})",
                self.last_push.elapsed(),
                self.count
            );
            return EncodeState::Stalled(backend);
        }

        if let Some(remaining) = frame_duration.checked_sub(tick.elapsed()) {
            thread::sleep(remaining);
        }

        EncodeState::Feeding(backend)
    }

    fn stalled(&mut self, backend: F::Backend) -> EncodeState<F::Backend> {
        warn!("Encoder stalled, restarting {:?}", self.destination);
        metrics::counter!("encoder_restarts").increment(1);
        self.shared.restart.store(true, Ordering::Release);
        EncodeState::ShuttingDown(Some(backend), Exit::Restart)
    }

    fn shut_down(&mut self, backend: Option<F::Backend>, exit: Exit) {
        self.output.set_started(false);

        if let Some(mut backend) = backend {
            backend.shutdown(self.settings.shutdown_timeout);
        }
        lock(&self.shared.abort).take();

        if exit == Exit::Fatal {
            self.output.disable();
            if self.output.alerts().raise(Alert::Recording) {
                warn!("{}", Alert::Recording.message());
            }
        }

        info!("Encode thread exiting ({:?})", exit);
    }
}

struct Worker {
    handle: JoinHandle<()>,
    done: Receiver<()>,
    shared: Arc<WorkerShared>,
}

/// Spawns, restarts and stops the encode worker
pub struct EncoderSupervisor<F: EncoderFactory> {
    factory: Arc<F>,
    output: Arc<VideoOutput>,
    settings: EncodeSettings,
    worker: Option<Worker>,
    restarts: u64,
}

impl<F: EncoderFactory> EncoderSupervisor<F> {
    pub fn new(factory: F, output: Arc<VideoOutput>, settings: EncodeSettings) -> Self {
        Self {
            factory: Arc::new(factory),
            output,
            settings,
            worker: None,
            restarts: 0,
        }
    }

    /// Spawn a worker if output is enabled and none is running.
    ///
    /// Called once per rendered frame. Returns true if a worker was spawned.
    pub fn ensure_running(&mut self) -> Result<bool> {
        self.reap();

        let destination = self.output.recording_state();
        if !destination.is_enabled() || self.worker.is_some() {
            return Ok(false);
        }

        let (done_tx, done_rx) = channel::bounded(1);
        let shared = Arc::new(WorkerShared::default());
        let worker = EncodeWorker {
            factory: self.factory.clone(),
            output: self.output.clone(),
            settings: self.settings.clone(),
            destination,
            shared: shared.clone(),
            count: 0,
            last_push: Instant::now(),
            _done: done_tx,
        };

        let handle = thread::Builder::new()
            .name("encoder".into())
            .spawn(move || worker.run())?;

        info!("Encode thread spawned for {:?}", destination);
        self.worker = Some(Worker {
            handle,
            done: done_rx,
            shared,
        });
        Ok(true)
    }

    /// Join a worker that already exited on its own
    fn reap(&mut self) {
        let finished = self
            .worker
            .as_ref()
            .is_some_and(|worker| worker.handle.is_finished());
        if !finished {
            return;
        }

        if let Some(worker) = self.worker.take() {
            if worker.shared.restart.load(Ordering::Acquire) {
                self.restarts += 1;
                info!("Encode thread stalled; respawning ({} restarts)", self.restarts);
            }
            if worker.handle.join().is_err() {
                error!("Encode thread panicked");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .is_some_and(|worker| !worker.handle.is_finished())
    }

    pub fn restarts(&self) -> u64 {
        self.restarts
    }

    /// Disable output and join the worker with a bounded wait.
    ///
    /// If the worker does not exit in time its pipeline is forced to the null
    /// state and the thread is detached. Returns false in that case.
    pub fn stop(&mut self) -> bool {
        self.output.disable();

        let Some(worker) = self.worker.take() else {
            return true;
        };

        let timeout = self.settings.shutdown_timeout * 2;
        match worker.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.handle.join().is_err() {
                    error!("Encode thread panicked");
                }
                info!("Encode thread stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    "Encode thread did not stop within {:?}, forcing pipeline down",
                    timeout
                );
                if let Some(abort) = lock(&worker.shared.abort).take() {
                    abort();
                }
                false
            }
        }
    }
}

impl<F: EncoderFactory> Drop for EncoderSupervisor<F> {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::{Alerts, Notifier};
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU64, AtomicUsize};

    #[derive(Default)]
    struct FakeState {
        constructed: AtomicUsize,
        pushed: Mutex<Vec<BufferTiming>>,
        shutdowns: AtomicUsize,
        aborted: AtomicBool,
        needs_data: AtomicBool,
        fail_clock: AtomicBool,
        fail_push: AtomicBool,
        bus_error: AtomicBool,
        shutdown_delay_ms: AtomicU64,
    }

    struct FakeFactory(Arc<FakeState>);

    struct FakeBackend(Arc<FakeState>);

    impl EncoderFactory for FakeFactory {
        type Backend = FakeBackend;

        fn construct(&self, _description: &str, _format: FrameFormat) -> Result<FakeBackend> {
            self.0.constructed.fetch_add(1, Ordering::SeqCst);
            Ok(FakeBackend(self.0.clone()))
        }
    }

    impl EncoderBackend for FakeBackend {
        fn start(&mut self) -> Result<()> {
            if self.0.fail_clock.load(Ordering::SeqCst) {
                return Err(HudError::ClockUnavailable);
            }
            Ok(())
        }

        fn needs_data(&self) -> bool {
            self.0.needs_data.load(Ordering::SeqCst)
        }

        fn running_time(&self) -> Option<Duration> {
            Some(Duration::from_millis(5))
        }

        fn push_buffer(&mut self, _data: Bytes, timing: BufferTiming) -> Result<()> {
            if self.0.fail_push.load(Ordering::SeqCst) {
                return Err(HudError::Push("flushing".into()));
            }
            lock(&self.0.pushed).push(timing);
            Ok(())
        }

        fn poll_bus(&mut self) -> Option<BusEvent> {
            self.0
                .bus_error
                .swap(false, Ordering::SeqCst)
                .then(|| BusEvent::Error("not-negotiated".into()))
        }

        fn shutdown(&mut self, _timeout: Duration) {
            let delay = self.0.shutdown_delay_ms.load(Ordering::SeqCst);
            thread::sleep(Duration::from_millis(delay));
            self.0.shutdowns.fetch_add(1, Ordering::SeqCst);
        }

        fn abort_handle(&self) -> AbortHandle {
            let state = self.0.clone();
            Box::new(move || state.aborted.store(true, Ordering::SeqCst))
        }
    }

    fn settings(stall_ms: u64) -> EncodeSettings {
        let mut config = Config::default();
        config.recording.target_fps = 200;
        config.recording.directory = std::env::temp_dir();
        let mut settings = EncodeSettings::from_config(&config);
        settings.stall_timeout = Duration::from_millis(stall_ms);
        settings.shutdown_timeout = Duration::from_millis(100);
        settings
    }

    fn setup(stall_ms: u64) -> (Arc<FakeState>, Arc<VideoOutput>, EncoderSupervisor<FakeFactory>) {
        let state = Arc::new(FakeState::default());
        let (notifier, _rx) = Notifier::channel();
        let output = Arc::new(VideoOutput::new(notifier, Arc::new(Alerts::default())));
        let supervisor =
            EncoderSupervisor::new(FakeFactory(state.clone()), output.clone(), settings(stall_ms));
        (state, output, supervisor)
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        for _ in 0..300 {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_disabled_output_spawns_nothing() {
        let (state, _output, mut supervisor) = setup(1_000);
        assert!(!supervisor.ensure_running().unwrap());
        assert!(!supervisor.is_running());
        assert_eq!(state.constructed.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stall_respawns_with_same_destination() {
        let (state, output, mut supervisor) = setup(50);
        output.set_recording_state(DestinationType::RecordStream);

        assert!(supervisor.ensure_running().unwrap());
        assert!(wait_until(|| {
            supervisor.ensure_running().unwrap();
            state.constructed.load(Ordering::SeqCst) >= 2
        }));

        assert_eq!(output.recording_state(), DestinationType::RecordStream);
        assert!(state.shutdowns.load(Ordering::SeqCst) >= 1);
        assert!(supervisor.restarts() >= 1);

        assert!(supervisor.stop());
        assert_eq!(output.recording_state(), DestinationType::Disabled);
    }

    #[test]
    fn test_frames_are_pushed_with_running_time() {
        let (state, output, mut supervisor) = setup(5_000);
        state.needs_data.store(true, Ordering::SeqCst);
        output.set_recording_state(DestinationType::Record);
        supervisor.ensure_running().unwrap();

        assert!(wait_until(|| {
            output.submit_frame(Bytes::from_static(&[0u8; 16]));
            lock(&state.pushed).len() >= 3
        }));
        assert!(wait_until(|| output.recording_started()));
        supervisor.stop();

        let pushed = lock(&state.pushed);
        for (i, timing) in pushed.iter().enumerate() {
            assert_eq!(timing.offset, i as u64);
            assert_eq!(timing.duration, Duration::from_millis(5));
            assert_eq!(timing.pts, Some(Duration::from_millis(5)));
        }
        assert!(!output.recording_started());
    }

    #[test]
    fn test_push_failure_restarts() {
        let (state, output, mut supervisor) = setup(5_000);
        state.needs_data.store(true, Ordering::SeqCst);
        state.fail_push.store(true, Ordering::SeqCst);
        output.set_recording_state(DestinationType::Stream);
        supervisor.ensure_running().unwrap();

        assert!(wait_until(|| {
            output.submit_frame(Bytes::from_static(&[1u8; 16]));
            supervisor.ensure_running().unwrap();
            state.constructed.load(Ordering::SeqCst) >= 2
        }));
        assert_eq!(output.recording_state(), DestinationType::Stream);
        supervisor.stop();
    }

    #[test]
    fn test_clock_failure_disables_destination() {
        let (state, output, mut supervisor) = setup(5_000);
        state.fail_clock.store(true, Ordering::SeqCst);
        output.set_recording_state(DestinationType::Record);
        supervisor.ensure_running().unwrap();

        assert!(wait_until(|| !supervisor.is_running()));
        assert_eq!(output.recording_state(), DestinationType::Disabled);
        assert!(output.alerts().is_active(Alert::Recording));

        assert!(!supervisor.ensure_running().unwrap());
        assert_eq!(state.constructed.load(Ordering::SeqCst), 1);
        assert_eq!(supervisor.restarts(), 0);
    }

    #[test]
    fn test_bus_error_is_fatal() {
        let (state, output, mut supervisor) = setup(5_000);
        state.bus_error.store(true, Ordering::SeqCst);
        output.set_recording_state(DestinationType::Record);
        supervisor.ensure_running().unwrap();

        assert!(wait_until(|| !supervisor.is_running()));
        assert_eq!(output.recording_state(), DestinationType::Disabled);
        assert_eq!(state.shutdowns.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stop_forces_unresponsive_backend() {
        let (state, output, mut supervisor) = setup(5_000);
        state.shutdown_delay_ms.store(1_000, Ordering::SeqCst);
        output.set_recording_state(DestinationType::Record);
        supervisor.ensure_running().unwrap();
        assert!(wait_until(|| output.recording_started()));

        assert!(!supervisor.stop());
        assert!(state.aborted.load(Ordering::SeqCst));
        assert!(!supervisor.is_running());
    }
}
