//! Recording and streaming output
//!
//! [`VideoOutput`] is the shared descriptor between the render loop and the
//! encode thread: the requested destination, the triple-buffered frame
//! hand-off and the current output filename. The encode thread itself lives
//! in [`thread`] and is driven by an [`EncoderSupervisor`].

pub mod description;
pub mod encoder;
#[cfg(feature = "gstreamer-pipeline")]
pub mod gst_encoder;
pub mod health;
pub mod thread;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::{debug, info};

use crate::notify::{Alerts, Announcement, Notifier};
use crate::pipeline::{Role, TripleBuffer};

pub use encoder::{AbortHandle, BufferTiming, BusEvent, EncoderBackend, EncoderFactory, FrameFormat};
pub use health::{HealthStatus, RecordingHealth};
pub use thread::{EncodePhase, EncodeSettings, EncoderSupervisor};

/// Requested output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DestinationType {
    Disabled = 0,
    Record = 1,
    Stream = 2,
    RecordStream = 4,
}

impl DestinationType {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => DestinationType::Record,
            2 => DestinationType::Stream,
            4 => DestinationType::RecordStream,
            _ => DestinationType::Disabled,
        }
    }

    pub fn is_enabled(self) -> bool {
        self != DestinationType::Disabled
    }

    /// Whether this destination writes a local file
    pub fn records_to_file(self) -> bool {
        matches!(self, DestinationType::Record | DestinationType::RecordStream)
    }
}

/// Shared output descriptor
pub struct VideoOutput {
    destination: AtomicU8,
    started: AtomicBool,
    filename: Mutex<Option<PathBuf>>,
    slots: Mutex<TripleBuffer<Bytes>>,
    notifier: Notifier,
    alerts: Arc<Alerts>,
}

impl VideoOutput {
    pub fn new(notifier: Notifier, alerts: Arc<Alerts>) -> Self {
        Self {
            destination: AtomicU8::new(DestinationType::Disabled as u8),
            started: AtomicBool::new(false),
            filename: Mutex::new(None),
            slots: Mutex::new(TripleBuffer::new()),
            notifier,
            alerts,
        }
    }

    /// Request a destination. Re-requesting the current one does nothing.
    ///
    /// Returns true if the state changed (and was announced).
    pub fn set_recording_state(&self, destination: DestinationType) -> bool {
        let previous = self.destination.swap(destination as u8, Ordering::AcqRel);
        if previous == destination as u8 {
            info!("Recording state unchanged.");
            return false;
        }

        info!(
            "Recording state {:?} -> {:?}",
            DestinationType::from_raw(previous),
            destination
        );
        self.notifier.announce(Announcement::OutputChanged(destination));
        true
    }

    pub fn recording_state(&self) -> DestinationType {
        DestinationType::from_raw(self.destination.load(Ordering::Acquire))
    }

    /// True once the encoder pipeline is playing
    pub fn recording_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub(crate) fn set_started(&self, started: bool) {
        self.started.store(started, Ordering::Release);
    }

    /// Turn output off without an announcement (failure paths and shutdown)
    pub(crate) fn disable(&self) -> DestinationType {
        DestinationType::from_raw(
            self.destination
                .swap(DestinationType::Disabled as u8, Ordering::AcqRel),
        )
    }

    pub fn filename(&self) -> Option<PathBuf> {
        lock(&self.filename).clone()
    }

    pub(crate) fn set_filename(&self, path: &Path) {
        *lock(&self.filename) = Some(path.to_path_buf());
    }

    pub fn alerts(&self) -> &Alerts {
        &self.alerts
    }

    pub(crate) fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Hand a freshly read back frame to the encoder side.
    ///
    /// The frame goes into the capture slot, the slot about to become the
    /// next capture target is freed, and all three roles rotate at once.
    pub fn submit_frame(&self, frame: Bytes) {
        let (replaced, freed) = {
            let mut slots = lock(&self.slots);
            let replaced = slots.put(Role::Capture, frame);
            let freed = slots.take(Role::InFlight);
            slots.rotate();
            (replaced, freed)
        };
        if freed.is_some() {
            debug!("Encoder skipped a frame");
        }
        drop((replaced, freed));
    }

    /// Take the complete frame waiting in the drain slot, if any
    pub fn take_drain(&self) -> Option<Bytes> {
        lock(&self.slots).take(Role::Drain)
    }

    /// Free every resident output buffer
    pub fn clear_slots(&self) {
        let mut slots = lock(&self.slots);
        slots.clear();
    }

    #[cfg(test)]
    fn resident_frames(&self) -> usize {
        lock(&self.slots).resident()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
