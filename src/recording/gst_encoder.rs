//! GStreamer `appsrc` encoder backend

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use tracing::{debug, info, warn};

use super::description::{APPSRC_NAME, H264_ENCODERS};
use super::encoder::{AbortHandle, BufferTiming, BusEvent, EncoderBackend, EncoderFactory, FrameFormat};
use crate::{utils, HudError, Result};

/// Builds encoder pipelines with `gst::parse::launch`
pub struct GstEncoderFactory;

impl GstEncoderFactory {
    pub fn new() -> Result<Self> {
        gst::init().map_err(|e| HudError::PipelineConstruction(e.to_string()))?;
        Ok(Self)
    }
}

impl EncoderFactory for GstEncoderFactory {
    type Backend = GstEncoder;

    fn construct(&self, description: &str, format: FrameFormat) -> Result<GstEncoder> {
        GstEncoder::new(description, format)
    }

    /// Preferred installed H.264 encoder
    fn h264_encoder(&self) -> String {
        let software = H264_ENCODERS[H264_ENCODERS.len() - 1];
        let encoder = utils::first_available(&H264_ENCODERS).unwrap_or_else(|| {
            warn!("No H.264 encoder element registered, falling back to {}", software);
            software
        });
        info!("Using H.264 encoder: {}", encoder);
        encoder.to_string()
    }
}

pub struct GstEncoder {
    pipeline: gst::Pipeline,
    appsrc: gst_app::AppSrc,
    bus: gst::Bus,
    feed_me: Arc<AtomicBool>,
}

impl GstEncoder {
    fn new(description: &str, format: FrameFormat) -> Result<Self> {
        let pipeline = gst::parse::launch(description)
            .map_err(|e| HudError::PipelineConstruction(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| HudError::PipelineConstruction("not a pipeline".into()))?;

        let appsrc = pipeline
            .by_name(APPSRC_NAME)
            .ok_or_else(|| HudError::PipelineConstruction(format!("no element {}", APPSRC_NAME)))?
            .downcast::<gst_app::AppSrc>()
            .map_err(|_| HudError::PipelineConstruction(format!("{} is not an appsrc", APPSRC_NAME)))?;

        let bus = pipeline
            .bus()
            .ok_or_else(|| HudError::PipelineConstruction("pipeline has no bus".into()))?;

        let caps = gst_video::VideoInfo::builder(
            gst_video::VideoFormat::Rgba,
            format.width,
            format.height,
        )
        .fps(gst::Fraction::new(format.fps as i32, 1))
        .build()
        .and_then(|info| info.to_caps())
        .map_err(|e| HudError::PipelineConstruction(e.to_string()))?;

        appsrc.set_caps(Some(&caps));
        appsrc.set_is_live(true);
        appsrc.set_format(gst::Format::Time);

        let feed_me = Arc::new(AtomicBool::new(false));
        let need = feed_me.clone();
        let enough = feed_me.clone();
        appsrc.set_callbacks(
            gst_app::AppSrcCallbacks::builder()
                .need_data(move |_, _| need.store(true, Ordering::Release))
                .enough_data(move |_| enough.store(false, Ordering::Release))
                .build(),
        );

        Ok(Self {
            pipeline,
            appsrc,
            bus,
            feed_me,
        })
    }

    fn is_pipeline(&self, msg: &gst::Message) -> bool {
        msg.src()
            .is_some_and(|src| src == self.pipeline.upcast_ref::<gst::Object>())
    }
}

impl EncoderBackend for GstEncoder {
    fn start(&mut self) -> Result<()> {
        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| HudError::PipelineStart(format!("{:?}", e)))?;

        let (state_change, current, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(1)));
        debug!("Encoder pipeline state {:?} ({:?})", current, state_change);

        if self.pipeline.clock().is_none() {
            return Err(HudError::ClockUnavailable);
        }
        info!("Encoder pipeline playing");
        Ok(())
    }

    fn needs_data(&self) -> bool {
        self.feed_me.load(Ordering::Acquire)
    }

    fn running_time(&self) -> Option<Duration> {
        self.pipeline
            .current_running_time()
            .map(|t| Duration::from_nanos(t.nseconds()))
    }

    fn push_buffer(&mut self, data: Bytes, timing: BufferTiming) -> Result<()> {
        let mut buffer = gst::Buffer::from_slice(data);
        {
            let buffer = buffer.get_mut().ok_or(HudError::BufferAlloc)?;
            buffer.set_pts(
                timing
                    .pts
                    .map(|pts| gst::ClockTime::from_nseconds(pts.as_nanos() as u64)),
            );
            buffer.set_dts(gst::ClockTime::NONE);
            buffer.set_duration(gst::ClockTime::from_nseconds(
                timing.duration.as_nanos() as u64,
            ));
            buffer.set_offset(timing.offset);
        }

        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| HudError::Push(format!("{:?}", e)))
    }

    fn poll_bus(&mut self) -> Option<BusEvent> {
        while let Some(msg) = self.bus.pop() {
            let event = match msg.view() {
                gst::MessageView::Error(err) => {
                    BusEvent::Error(format!("{} ({:?})", err.error(), err.debug()))
                }
                gst::MessageView::Warning(w) => {
                    BusEvent::Warning(format!("{} ({:?})", w.error(), w.debug()))
                }
                gst::MessageView::Eos(..) => BusEvent::Eos,
                gst::MessageView::StateChanged(s) if self.is_pipeline(&msg) => {
                    BusEvent::StateChanged {
                        old: format!("{:?}", s.old()),
                        new: format!("{:?}", s.current()),
                    }
                }
                gst::MessageView::AsyncDone(..) => BusEvent::AsyncDone,
                _ => continue,
            };
            return Some(event);
        }
        None
    }

    fn shutdown(&mut self, timeout: Duration) {
        if let Err(e) = self.appsrc.end_of_stream() {
            warn!("Failed to send end-of-stream: {:?}", e);
        }

        let wait = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        match self
            .bus
            .timed_pop_filtered(wait, &[gst::MessageType::Eos, gst::MessageType::Error])
        {
            Some(msg) => {
                if let gst::MessageView::Error(err) = msg.view() {
                    warn!("Encoder error while draining: {}", err.error());
                }
            }
            None => warn!("Encoder did not drain within {:?}", timeout),
        }

        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!("Failed to stop encoder pipeline: {:?}", e);
        }
    }

    fn abort_handle(&self) -> AbortHandle {
        let pipeline = self.pipeline.clone();
        Box::new(move || {
            let _ = pipeline.set_state(gst::State::Null);
        })
    }
}

impl Drop for GstEncoder {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
