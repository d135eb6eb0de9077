//! Frame pipeline orchestrator: drives capture, detection, annotation, and
//! fan-out to the stream and metadata sinks once per frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use color_eyre::{eyre::eyre, Result};
use image::RgbImage;
use tracing::{error, info, warn};

use crate::capture::{Frame, GstCapture, PixelFormat};
use crate::detect::{annotate, postprocess, Detector};
use crate::pipeline::stats::PipelineStats;
use crate::sink::{MetadataSink, RtspStreamSink};
use crate::Config;

/// Immediate retries before one capture round counts as failed
const CAPTURE_RETRIES: u32 = 3;
/// Consecutive failed capture rounds before the pipeline gives up
const MAX_CONSECUTIVE_FAILURES: u32 = 10;

const CAPTURE_TIMEOUT: Duration = Duration::from_millis(100);
const RETRY_BACKOFF: Duration = Duration::from_millis(10);
const FAILURE_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Uninitialized,
    Ready,
    Running,
    Stopped,
}

/// Gate limiting how often metadata records are enqueued, independent of
/// the frame rate
pub struct PublishGate {
    interval: Duration,
    last: Option<Instant>,
}

impl PublishGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True when at least one interval has elapsed since the last accepted
    /// publish; the first call always passes
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

pub struct FramePipeline {
    config: Arc<Config>,
    capture: GstCapture,
    detector: Box<dyn Detector>,
    stream: RtspStreamSink,
    metadata: MetadataSink,
    #[cfg(feature = "display")]
    display: Option<crate::display::Sdl2Display>,
    state: PipelineState,
    stop: Arc<AtomicBool>,
    stats: PipelineStats,
    gate: PublishGate,
}

impl FramePipeline {
    /// Initialize every component; any failure here is fatal and aborts
    /// startup
    pub fn init(config: Arc<Config>, detector: Box<dyn Detector>) -> Result<Self> {
        info!("Initializing frame pipeline");

        let capture = GstCapture::new(&config)?;
        let stream = RtspStreamSink::new(&config)?;
        let metadata = MetadataSink::new(
            &config.metadata_host,
            config.metadata_port,
            &config.metadata_endpoint,
            config.metadata_publish_interval_ms,
        );

        #[cfg(feature = "display")]
        let display = if config.show_display {
            Some(crate::display::Sdl2Display::new(
                config.frame_width,
                config.frame_height,
            )?)
        } else {
            None
        };

        let gate = PublishGate::new(Duration::from_millis(config.metadata_publish_interval_ms));

        info!("Frame pipeline ready");
        Ok(Self {
            config,
            capture,
            detector,
            stream,
            metadata,
            #[cfg(feature = "display")]
            display,
            state: PipelineState::Ready,
            stop: Arc::new(AtomicBool::new(false)),
            stats: PipelineStats::new(),
            gate,
        })
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Shareable stop flag, checked at the top of each loop iteration
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run the capture -> detect -> annotate -> distribute loop until the
    /// stop flag is set or capture fails repeatedly
    pub fn run(&mut self) -> Result<()> {
        if self.state != PipelineState::Ready {
            return Err(eyre!("pipeline is not ready (state {:?})", self.state));
        }

        self.capture.start_stream()?;
        self.stream.start()?;
        self.metadata.start()?;
        self.state = PipelineState::Running;
        info!(
            "Frame pipeline running, annotated stream at {}",
            self.stream.stream_url()
        );

        let frame_interval = Duration::from_secs(1) / self.config.frame_fps.max(1);
        let mut consecutive_failures = 0u32;

        while !self.stop.load(Ordering::SeqCst) {
            let iteration_start = Instant::now();

            let frame = match self.acquire_frame() {
                Some(frame) => {
                    consecutive_failures = 0;
                    frame
                }
                None => {
                    self.stats.capture_failed();
                    consecutive_failures += 1;
                    if consecutive_failures >= MAX_CONSECUTIVE_FAILURES {
                        error!(
                            "capture failed {} rounds in a row, stopping",
                            consecutive_failures
                        );
                        break;
                    }
                    thread::sleep(FAILURE_BACKOFF);
                    continue;
                }
            };

            if let Err(e) = self.process_frame(frame) {
                warn!("frame processing error: {}", e);
            }

            #[cfg(feature = "display")]
            if !self.handle_input() {
                break;
            }

            // Pace the loop toward the configured frame rate
            let elapsed = iteration_start.elapsed();
            if elapsed < frame_interval {
                thread::sleep(frame_interval - elapsed);
            }
        }

        self.shutdown();
        Ok(())
    }

    /// One capture round: bounded immediate retries on empty capture
    fn acquire_frame(&mut self) -> Option<Frame> {
        for attempt in 0..CAPTURE_RETRIES {
            match self.capture.capture_frame(CAPTURE_TIMEOUT) {
                Ok(Some(frame)) => return Some(frame),
                Ok(None) => {
                    if attempt + 1 < CAPTURE_RETRIES {
                        thread::sleep(RETRY_BACKOFF);
                    }
                }
                Err(e) => {
                    warn!("capture error: {}", e);
                    return None;
                }
            }
        }
        None
    }

    fn process_frame(&mut self, frame: Frame) -> Result<()> {
        // Detect
        let raw = self.detector.detect(&frame)?;
        let detections = postprocess(
            raw.view(),
            frame.width(),
            frame.height(),
            self.config.detection_threshold,
            self.config.nms_threshold,
        );

        self.stats.frame_processed();
        self.stats.detections_found(detections.len() as u64);

        // Clone before drawing so the overlay never touches the metadata
        // sink's view of the frame
        let mut display_img = RgbImage::from_raw(frame.width(), frame.height(), frame.to_rgb24())
            .ok_or_else(|| eyre!("frame buffer size mismatch"))?;
        if self.config.draw_detections && !detections.is_empty() {
            annotate::draw_detections(&mut display_img, &detections);
        }

        let annotated = Frame::new(
            bytes::Bytes::from(display_img.clone().into_raw()),
            frame.meta.sequence,
            frame.width(),
            frame.height(),
            PixelFormat::Rgb24,
        );
        if !self.stream.push(&annotated) {
            self.stats.stream_rejected();
        }

        // Metadata is throttled to the publish interval, not the frame rate
        if self.gate.ready(Instant::now()) {
            self.metadata.enqueue(
                detections,
                frame.width(),
                frame.height(),
                &self.config.camera_label(),
            );
        }

        #[cfg(feature = "display")]
        if let Some(display) = self.display.as_mut() {
            if let Err(e) = display.render(&display_img) {
                warn!("display error, disabling preview: {}", e);
                self.display = None;
            }
        }

        Ok(())
    }

    #[cfg(feature = "display")]
    fn handle_input(&mut self) -> bool {
        use crate::display::KeyCommand;

        let Some(display) = self.display.as_mut() else {
            return true;
        };

        for key in display.poll_keys() {
            match key {
                KeyCommand::Quit => {
                    info!("quit requested");
                    self.stop.store(true, Ordering::SeqCst);
                    return false;
                }
                KeyCommand::Statistics => self.report_statistics(),
                KeyCommand::ShowConfig => info!("config: {:?}", self.config),
                KeyCommand::ResetStats => {
                    self.stats.reset();
                    info!("statistics reset");
                }
            }
        }
        true
    }

    /// Request a stop; the loop notices at its next iteration
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn shutdown(&mut self) {
        info!("Stopping frame pipeline");
        self.state = PipelineState::Stopped;

        self.report_statistics();

        self.capture.stop_stream();
        self.stream.stop();
        self.metadata.stop();

        info!("Frame pipeline stopped");
    }

    pub fn report_statistics(&self) {
        let snap = self.stats.snapshot();
        let (pushed, delivered, rejected) = self.stream.stats();
        info!(
            uptime_secs = snap.uptime_secs,
            frames = snap.frames,
            detections = snap.detections,
            avg_fps = format!("{:.1}", snap.avg_fps()),
            capture_failures = snap.capture_failures,
            stream_pushed = pushed,
            stream_delivered = delivered,
            stream_rejected = rejected,
            metadata_queue = self.metadata.queue_depth(),
            metadata_published = self.metadata.published_count(),
            metadata_failed = self.metadata.failure_count(),
            "pipeline statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_gate_first_call_passes() {
        let mut gate = PublishGate::new(Duration::from_millis(100));
        assert!(gate.ready(Instant::now()));
    }

    #[test]
    fn publish_gate_throttles_within_interval() {
        let mut gate = PublishGate::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(gate.ready(t0));

        // 30fps capture cadence: ~33ms per frame, only every third window
        // boundary may pass
        let mut accepted = 0;
        for i in 1..=30 {
            if gate.ready(t0 + Duration::from_millis(33 * i)) {
                accepted += 1;
            }
        }
        // 30 frames over ~990ms with a 100ms gate: at most one per window
        assert!(accepted <= 10, "accepted {} publishes", accepted);
        assert!(accepted >= 9);
    }

    #[test]
    fn publish_gate_reopens_after_interval() {
        let mut gate = PublishGate::new(Duration::from_millis(100));
        let t0 = Instant::now();
        assert!(gate.ready(t0));
        assert!(!gate.ready(t0 + Duration::from_millis(99)));
        assert!(gate.ready(t0 + Duration::from_millis(100)));
    }
}
