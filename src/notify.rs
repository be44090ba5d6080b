//! Announcements and on-screen alerts raised by the output path

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

use flume::{Receiver, Sender};
use tracing::{debug, info};

use crate::recording::DestinationType;

/// Spoken/text announcements handed to the notification collaborator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Announcement {
    OutputChanged(DestinationType),
    RecordingUnhealthy,
    ShuttingDown,
}

impl fmt::Display for Announcement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Announcement::OutputChanged(DestinationType::Disabled) => {
                "Stopping recording and streaming."
            }
            Announcement::OutputChanged(DestinationType::Record) => "Starting recording.",
            Announcement::OutputChanged(DestinationType::Stream) => "Starting streaming.",
            Announcement::OutputChanged(DestinationType::RecordStream) => {
                "Starting recording and streaming."
            }
            Announcement::RecordingUnhealthy => "There is potentially an error with recording.",
            Announcement::ShuttingDown => "Your hud is shutting down.",
        };
        f.write_str(text)
    }
}

/// Sending half of the announcement channel
#[derive(Clone)]
pub struct Notifier {
    tx: Sender<Announcement>,
}

impl Notifier {
    pub fn channel() -> (Self, Receiver<Announcement>) {
        let (tx, rx) = flume::unbounded();
        (Self { tx }, rx)
    }

    pub fn announce(&self, announcement: Announcement) {
        info!("Announcing: {}", announcement);
        if self.tx.send(announcement).is_err() {
            debug!("No announcement listener attached");
        }
    }
}

/// Alert conditions shown on the HUD
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Alert {
    Recording = 1 << 0,
}

impl Alert {
    pub fn message(self) -> &'static str {
        match self {
            Alert::Recording => "ERROR: Recording failed!",
        }
    }
}

/// Lock-free set of active alerts
#[derive(Debug, Default)]
pub struct Alerts {
    active: AtomicU32,
}

impl Alerts {
    /// Raise an alert; returns true if it was not already active.
    pub fn raise(&self, alert: Alert) -> bool {
        let prev = self.active.fetch_or(alert as u32, Ordering::AcqRel);
        prev & alert as u32 == 0
    }

    /// Clear an alert; returns true if it was active.
    pub fn clear(&self, alert: Alert) -> bool {
        let prev = self.active.fetch_and(!(alert as u32), Ordering::AcqRel);
        prev & alert as u32 != 0
    }

    pub fn is_active(&self, alert: Alert) -> bool {
        self.active.load(Ordering::Acquire) & alert as u32 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_raise_and_clear() {
        let alerts = Alerts::default();
        assert!(!alerts.is_active(Alert::Recording));
        assert!(alerts.raise(Alert::Recording));
        assert!(!alerts.raise(Alert::Recording));
        assert!(alerts.is_active(Alert::Recording));
        assert!(alerts.clear(Alert::Recording));
        assert!(!alerts.clear(Alert::Recording));
    }

    #[test]
    fn test_announcement_text() {
        let (notifier, rx) = Notifier::channel();
        notifier.announce(Announcement::OutputChanged(DestinationType::RecordStream));
        let got = rx.try_recv().unwrap();
        assert_eq!(got.to_string(), "Starting recording and streaming.");
    }
}
