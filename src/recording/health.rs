//! Periodic check that an active recording is still growing on disk

use std::time::{Duration, Instant};

use tracing::{info, warn};

use super::VideoOutput;
use crate::notify::{Alert, Announcement};
use crate::utils::file_size;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// Nothing is being recorded to a file
    Idle,
    /// Not due for a check yet
    Pending,
    Healthy,
    Unhealthy,
}

/// File-growth monitor, ticked from the render loop
#[derive(Debug)]
pub struct RecordingHealth {
    interval: Duration,
    last_check: Option<Instant>,
    last_size: Option<u64>,
    /// Whether the active Recording alert is ours to clear
    raised: bool,
}

impl RecordingHealth {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_check: None,
            last_size: None,
            raised: false,
        }
    }

    pub fn check(&mut self, output: &VideoOutput, now: Instant) -> HealthStatus {
        let recording = output.recording_started() && output.recording_state().records_to_file();
        let path = output.filename().filter(|_| recording);
        let Some(path) = path else {
            self.last_check = None;
            self.last_size = None;
            if std::mem::take(&mut self.raised) && output.alerts().clear(Alert::Recording) {
                info!("Recording alert cleared");
            }
            return HealthStatus::Idle;
        };

        if let Some(last) = self.last_check {
            if now.duration_since(last) < self.interval {
                return HealthStatus::Pending;
            }
        }
        self.last_check = Some(now);

        let size = file_size(&path).unwrap_or(0);
        let previous = self.last_size.replace(size);

        match previous {
            Some(prev) if size <= prev => {
                self.raised = true;
                if output.alerts().raise(Alert::Recording) {
                    warn!("{} is not growing ({} bytes)", path.display(), size);
                    output.notifier().announce(Announcement::RecordingUnhealthy);
                }
                HealthStatus::Unhealthy
            }
            _ => {
                self.raised = false;
                if output.alerts().clear(Alert::Recording) {
                    info!("Recording to {} resumed", path.display());
                }
                HealthStatus::Healthy
            }
        }
    }
}
