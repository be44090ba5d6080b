//! GStreamer camera input: one pipeline, one appsink per camera

use std::time::Duration;

use color_eyre::{eyre::eyre, Result};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use tracing::{debug, info, warn};

use super::acquisition::CameraRig;
use super::description::{camera_pipeline, JPEG_DECODERS, SINK_LEFT, SINK_RIGHT, SINK_SINGLE};
use super::sink::{CameraSample, CameraSink};
use crate::pipeline::MappedFrame;
use crate::{utils, CaptureConfig, HudError};

/// Bound on a single blocking pull so the loop can observe shutdown
const PULL_TIMEOUT_MS: u64 = 500;
const START_TIMEOUT_SECS: u64 = 5;

/// Owns the camera pipeline; stops it on drop
pub struct GstCameraPipeline {
    pipeline: gst::Pipeline,
}

impl GstCameraPipeline {
    /// Build the camera pipeline and hand back its sinks as a rig
    pub fn new(config: &CaptureConfig) -> Result<(Self, CameraRig<GstCameraSink>)> {
        gst::init().map_err(|e| eyre!("Failed to initialize GStreamer: {}", e))?;

        info!("Initializing GStreamer camera pipeline");

        let software = JPEG_DECODERS[JPEG_DECODERS.len() - 1];
        let jpeg_decoder = utils::first_available(&JPEG_DECODERS).unwrap_or_else(|| {
            warn!("No JPEG decoder element registered, falling back to {}", software);
            software
        });
        info!("Using JPEG decoder: {}", jpeg_decoder);

        let pipeline_str = camera_pipeline(config, jpeg_decoder);
        info!("Pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)?
            .downcast::<gst::Pipeline>()
            .map_err(|_| eyre!("Failed to create pipeline"))?;

        let rig = if config.is_stereo() {
            CameraRig::stereo(
                GstCameraSink::from_pipeline(&pipeline, SINK_LEFT)?,
                GstCameraSink::from_pipeline(&pipeline, SINK_RIGHT)?,
            )
        } else {
            CameraRig::single(GstCameraSink::from_pipeline(&pipeline, SINK_SINGLE)?)
        };

        Ok((Self { pipeline }, rig))
    }

    /// Set the pipeline playing and wait for the cameras to settle
    pub fn start_stream(&self) -> crate::Result<()> {
        info!("Starting camera pipeline");
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| HudError::PipelineStart(e.to_string()))?;

        let timeout = gst::ClockTime::from_seconds(START_TIMEOUT_SECS);
        match self.pipeline.state(Some(timeout)).0 {
            Ok(gst::StateChangeSuccess::Success) => info!("Camera pipeline playing"),
            Ok(pending) => info!("Camera pipeline still settling ({:?})", pending),
            Err(e) => return Err(HudError::PipelineStart(e.to_string())),
        }
        Ok(())
    }

    pub fn stop_stream(&self) -> crate::Result<()> {
        debug!("Stopping camera pipeline");
        self.pipeline
            .set_state(gst::State::Null)
            .map(|_| ())
            .map_err(|e| HudError::PipelineStart(e.to_string()))
    }
}

impl Drop for GstCameraPipeline {
    fn drop(&mut self) {
        if let Err(e) = self.stop_stream() {
            warn!("Failed to stop camera pipeline: {}", e);
        }
    }
}

/// One camera's appsink
pub struct GstCameraSink {
    appsink: gst_app::AppSink,
}

impl GstCameraSink {
    fn from_pipeline(pipeline: &gst::Pipeline, name: &str) -> Result<Self> {
        let appsink = pipeline
            .by_name(name)
            .ok_or_else(|| eyre!("Failed to find appsink element {}", name))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| eyre!("Failed to cast {} to AppSink", name))?;

        // Keep only the freshest frames; never sync to the clock
        appsink.set_property("max-buffers", 3u32);
        appsink.set_property("drop", true);
        appsink.set_property("sync", false);

        Ok(Self { appsink })
    }
}

impl CameraSink for GstCameraSink {
    type Sample = GstCameraSample;

    fn pull_sample(&mut self) -> Option<GstCameraSample> {
        self.appsink
            .try_pull_sample(gst::ClockTime::from_mseconds(PULL_TIMEOUT_MS))
            .map(GstCameraSample)
    }

    fn is_end_of_stream(&self) -> bool {
        self.appsink.is_eos()
    }
}

pub struct GstCameraSample(gst::Sample);

impl CameraSample for GstCameraSample {
    fn pts(&self) -> Option<Duration> {
        self.0
            .buffer()
            .and_then(|buffer| buffer.pts())
            .map(|pts| Duration::from_nanos(pts.nseconds()))
    }

    fn map(self) -> crate::Result<MappedFrame> {
        let pts = self.pts();
        let buffer = self
            .0
            .buffer_owned()
            .ok_or_else(|| HudError::Map("sample contains no buffer".into()))?;

        // Unmapped when the frame is dropped
        let mapped = buffer
            .into_mapped_buffer_readable()
            .map_err(|_| HudError::Map("buffer not readable".into()))?;

        Ok(MappedFrame::new(Box::new(mapped), pts))
    }
}
