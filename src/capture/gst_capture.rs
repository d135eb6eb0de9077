//! GStreamer-based video capture feeding decoded RGB frames to the pipeline

use std::time::Duration;

use bytes::Bytes;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::frame::{Frame, PixelFormat};
use crate::Config;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("failed to initialize GStreamer: {0}")]
    Init(#[from] gst::glib::Error),
    #[error("failed to build capture pipeline: {0}")]
    Pipeline(String),
    #[error("capture pipeline failed to start")]
    Start,
    #[error("capture sample is malformed: {0}")]
    BadSample(String),
}

/// V4L2 camera source behind a GStreamer decode/convert pipeline.
/// All frames leave the appsink as tightly-packed RGB at the configured
/// geometry, regardless of what the device produces.
pub struct GstCapture {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
    sequence: u64,
}

impl GstCapture {
    pub fn new(config: &Config) -> Result<Self, CaptureError> {
        gst::init()?;

        info!("Initializing capture pipeline for camera {}", config.camera_id);

        let pipeline_str = Self::build_pipeline_string(config);
        info!("Capture pipeline: {}", pipeline_str);

        let pipeline = gst::parse::launch(&pipeline_str)
            .map_err(|e| CaptureError::Pipeline(e.to_string()))?
            .downcast::<gst::Pipeline>()
            .map_err(|_| CaptureError::Pipeline("not a pipeline".into()))?;

        let appsink = pipeline
            .by_name("appsink")
            .ok_or_else(|| CaptureError::Pipeline("appsink element missing".into()))?
            .downcast::<gst_app::AppSink>()
            .map_err(|_| CaptureError::Pipeline("failed to cast to AppSink".into()))?;

        appsink.set_property("emit-signals", false);
        appsink.set_property("max-buffers", 3u32);
        appsink.set_property("drop", true); // Drop old buffers if we can't keep up
        appsink.set_property("sync", false); // Don't sync to clock for lowest latency

        Ok(Self {
            pipeline,
            appsink,
            sequence: 0,
        })
    }

    fn build_pipeline_string(config: &Config) -> String {
        format!(
            "v4l2src device=/dev/video{} name=source ! \
             video/x-raw,width={},height={},framerate={}/1 ! \
             queue max-size-buffers=2 max-size-time=0 max-size-bytes=0 ! \
             videoconvert ! \
             video/x-raw,format=RGB ! \
             appsink name=appsink",
            config.camera_id, config.frame_width, config.frame_height, config.frame_fps
        )
    }

    /// Start the capture pipeline
    pub fn start_stream(&mut self) -> Result<(), CaptureError> {
        info!("Starting capture pipeline");

        self.pipeline
            .set_state(gst::State::Playing)
            .map_err(|_| CaptureError::Start)?;

        // Wait for the pipeline to reach playing state
        let (state_change, _, _) = self.pipeline.state(Some(gst::ClockTime::from_seconds(5)));

        match state_change {
            Ok(gst::StateChangeSuccess::Success) => {
                info!("Capture pipeline started");
                Ok(())
            }
            Ok(gst::StateChangeSuccess::Async) => {
                info!("Capture pipeline starting asynchronously");
                Ok(())
            }
            _ => Err(CaptureError::Start),
        }
    }

    /// Stop the capture pipeline
    pub fn stop_stream(&mut self) {
        info!("Stopping capture pipeline");
        if self.pipeline.set_state(gst::State::Null).is_err() {
            warn!("Capture pipeline refused state change to Null");
        }
    }

    /// Pull the next frame, waiting up to `timeout`. Returns `Ok(None)` when
    /// no sample arrived in time - an empty capture, not an error.
    pub fn capture_frame(&mut self, timeout: Duration) -> Result<Option<Frame>, CaptureError> {
        let wait = gst::ClockTime::from_nseconds(timeout.as_nanos() as u64);
        let sample = match self.appsink.try_pull_sample(wait) {
            Some(sample) => sample,
            None => {
                debug!("No capture sample within {:?}", timeout);
                return Ok(None);
            }
        };

        let buffer = sample
            .buffer()
            .ok_or_else(|| CaptureError::BadSample("sample contains no buffer".into()))?;

        let map = buffer
            .map_readable()
            .map_err(|_| CaptureError::BadSample("failed to map buffer".into()))?;

        let caps = sample
            .caps()
            .ok_or_else(|| CaptureError::BadSample("sample has no caps".into()))?;
        let video_info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|_| CaptureError::BadSample("failed to parse video info".into()))?;

        self.sequence += 1;

        Ok(Some(Frame::new(
            Bytes::copy_from_slice(map.as_slice()),
            self.sequence,
            video_info.width(),
            video_info.height(),
            PixelFormat::Rgb24,
        )))
    }
}

impl Drop for GstCapture {
    fn drop(&mut self) {
        self.stop_stream();
    }
}
