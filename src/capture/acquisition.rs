//! Dual-camera acquisition loop

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{error, info, instrument, warn};

use super::sink::{pull, CameraSample, CameraSink, Eye, Pulled};
use super::sync::{synchronize, SyncOutcome};
use crate::context::ShutdownSignal;
use crate::pipeline::{FrameExchange, MappedFrame, StereoFrame};
use crate::{CaptureConfig, HudError, Result};

/// Left camera plus an optional right camera
pub struct CameraRig<S: CameraSink> {
    pub left: S,
    pub right: Option<S>,
}

impl<S: CameraSink> CameraRig<S> {
    pub fn stereo(left: S, right: S) -> Self {
        Self {
            left,
            right: Some(right),
        }
    }

    /// One camera feeding both eyes
    pub fn single(camera: S) -> Self {
        Self {
            left: camera,
            right: None,
        }
    }
}

/// What one iteration of the loop achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Iteration {
    Published,
    /// Published with the left frame standing in for the right eye
    PublishedDegraded,
    Retry,
}

pub struct AcquisitionLoop<S: CameraSink> {
    rig: CameraRig<S>,
    exchange: Arc<FrameExchange>,
    shutdown: ShutdownSignal,
    frame_duration: Duration,
    max_catchup: u32,
    sequence: u64,
}

impl<S: CameraSink> AcquisitionLoop<S> {
    pub fn new(
        rig: CameraRig<S>,
        exchange: Arc<FrameExchange>,
        shutdown: ShutdownSignal,
        config: &CaptureConfig,
    ) -> Self {
        Self {
            rig,
            exchange,
            shutdown,
            frame_duration: config.frame_duration(),
            max_catchup: config.max_catchup,
            sequence: 0,
        }
    }

    /// Run until shutdown is signaled or a camera reaches end-of-stream.
    ///
    /// End-of-stream on either camera is fatal: global shutdown is triggered
    /// and the error is returned.
    pub fn run(mut self) -> Result<()> {
        info!(
            "Acquisition started ({} camera mode, frame duration {:?})",
            if self.rig.right.is_some() { "stereo" } else { "single" },
            self.frame_duration
        );

        while !self.shutdown.is_triggered() {
            if let Err(e) = self.iterate() {
                error!("Acquisition stopped: {}", e);
                self.shutdown.trigger();
                return Err(e);
            }
        }

        info!("Acquisition loop exiting");
        Ok(())
    }

    /// Release the stale slot, pull a synchronized pair and publish it
    #[instrument(skip(self), level = "trace")]
    pub fn iterate(&mut self) -> Result<Iteration> {
        self.exchange.release_next();

        let left = match pull(&mut self.rig.left) {
            Pulled::Sample(s) => s,
            Pulled::Transient => {
                warn!("No sample from left camera, retrying");
                return Ok(Iteration::Retry);
            }
            Pulled::SourceLost => return Err(HudError::SourceLost(Eye::Left.label())),
        };

        let Some(right_sink) = self.rig.right.as_mut() else {
            let Some(left) = map_sample(left, Eye::Left)? else {
                return Ok(Iteration::Retry);
            };
            self.publish(left, None);
            return Ok(Iteration::Published);
        };

        let right = match pull(right_sink) {
            Pulled::Sample(s) => s,
            Pulled::Transient => {
                warn!("No sample from right camera, retrying");
                return Ok(Iteration::Retry);
            }
            Pulled::SourceLost => return Err(HudError::SourceLost(Eye::Right.label())),
        };

        match synchronize(
            &mut self.rig.left,
            right_sink,
            left,
            right,
            self.frame_duration,
            self.max_catchup,
        ) {
            SyncOutcome::Synced { left, right, .. } => {
                let (Some(left), Some(right)) =
                    (map_sample(left, Eye::Left)?, map_sample(right, Eye::Right)?)
                else {
                    return Ok(Iteration::Retry);
                };
                self.publish(left, Some(right));
                Ok(Iteration::Published)
            }
            SyncOutcome::Degraded { left } => {
                let Some(left) = map_sample(left, Eye::Left)? else {
                    return Ok(Iteration::Retry);
                };
                self.publish(left, None);
                Ok(Iteration::PublishedDegraded)
            }
            SyncOutcome::Retry => {
                warn!("Camera returned no sample during resync, retrying");
                Ok(Iteration::Retry)
            }
            SyncOutcome::SourceLost(eye) => Err(HudError::SourceLost(eye.label())),
        }
    }

    fn publish(&mut self, left: MappedFrame, right: Option<MappedFrame>) {
        self.sequence += 1;
        self.exchange.publish(StereoFrame {
            sequence: self.sequence,
            left,
            right,
            captured_at: Instant::now(),
        });
    }
}

/// Map a sample, dropping the frame when its buffer cannot be read
fn map_sample<T: CameraSample>(sample: T, eye: Eye) -> Result<Option<MappedFrame>> {
    match sample.map() {
        Ok(frame) => Ok(Some(frame)),
        Err(HudError::Map(reason)) => {
            warn!("Dropping {} camera frame: {}", eye.label(), reason);
            metrics::counter!("frames_dropped").increment(1);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Spawn the acquisition loop on its own OS thread, optionally pinned
pub fn spawn_acquisition<S>(
    rig: CameraRig<S>,
    exchange: Arc<FrameExchange>,
    shutdown: ShutdownSignal,
    config: &CaptureConfig,
) -> Result<JoinHandle<Result<()>>>
where
    S: CameraSink + 'static,
{
    let pin_core = config.pin_core;
    let acquisition = AcquisitionLoop::new(rig, exchange, shutdown, config);

    let handle = thread::Builder::new()
        .name("acquisition".into())
        .spawn(move || {
            if let Some(core) = pin_core {
                let pinned = core_affinity::get_core_ids()
                    .and_then(|ids| ids.into_iter().find(|id| id.id == core))
                    .map(core_affinity::set_for_current)
                    .unwrap_or(false);
                if pinned {
                    info!("Acquisition pinned to core {}", core);
                } else {
                    warn!("Could not pin acquisition to core {}", core);
                }
            }
            acquisition.run()
        })?;

    Ok(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::sync::tests::FakeSink;

    fn config() -> CaptureConfig {
        CaptureConfig {
            fps: 30,
            max_catchup: 4,
            ..CaptureConfig::default()
        }
    }

    #[test]
    fn test_stereo_iteration_publishes_pair() {
        let exchange = Arc::new(FrameExchange::new());
        let rig = CameraRig::stereo(FakeSink::new([10]), FakeSink::new([20]));
        let mut acq = AcquisitionLoop::new(rig, exchange.clone(), ShutdownSignal::default(), &config());

        assert_eq!(acq.iterate().unwrap(), Iteration::Published);
        let frame = exchange.latest().unwrap();
        assert_eq!(frame.sequence, 1);
        assert_eq!(frame.left.pts, Some(Duration::from_nanos(10)));
        assert_eq!(frame.right.as_ref().unwrap().pts, Some(Duration::from_nanos(20)));
    }

    #[test]
    fn test_single_camera_skips_sync() {
        let exchange = Arc::new(FrameExchange::new());
        let rig = CameraRig::single(FakeSink::new([5, 6]));
        let mut acq = AcquisitionLoop::new(rig, exchange.clone(), ShutdownSignal::default(), &config());

        assert_eq!(acq.iterate().unwrap(), Iteration::Published);
        assert_eq!(acq.iterate().unwrap(), Iteration::Published);
        let frame = exchange.latest().unwrap();
        assert_eq!(frame.sequence, 2);
        assert!(frame.right.is_none());
        assert_eq!(frame.right_or_left().pts, Some(Duration::from_nanos(6)));
    }

    #[test]
    fn test_null_sample_is_retried() {
        let exchange = Arc::new(FrameExchange::new());
        let mut left = FakeSink::new([]);
        left.samples.push_back(None);
        left.samples.push_back(Some(100));
        let rig = CameraRig::single(left);
        let mut acq = AcquisitionLoop::new(rig, exchange.clone(), ShutdownSignal::default(), &config());

        assert_eq!(acq.iterate().unwrap(), Iteration::Retry);
        assert!(exchange.latest().is_none());
        assert_eq!(acq.iterate().unwrap(), Iteration::Published);
    }

    #[test]
    fn test_eos_triggers_global_shutdown() {
        let exchange = Arc::new(FrameExchange::new());
        let mut right = FakeSink::new([]);
        right.eos = true;
        let rig = CameraRig::stereo(FakeSink::new([1, 2, 3]), right);
        let shutdown = ShutdownSignal::default();
        let acq = AcquisitionLoop::new(rig, exchange, shutdown.clone(), &config());

        let result = acq.run();
        assert!(matches!(result, Err(HudError::SourceLost("right"))));
        assert!(shutdown.is_triggered());
    }

    #[test]
    fn test_degraded_pair_publishes_left_only() {
        let exchange = Arc::new(FrameExchange::new());
        let rig = CameraRig::stereo(
            FakeSink::new([1_000_000_000]),
            FakeSink::new([0, 1, 2, 3, 4, 5, 6]),
        );
        let mut acq = AcquisitionLoop::new(rig, exchange.clone(), ShutdownSignal::default(), &config());

        assert_eq!(acq.iterate().unwrap(), Iteration::PublishedDegraded);
        assert!(exchange.latest().unwrap().right.is_none());
    }
}
