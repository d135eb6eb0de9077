//! RTSP stream sink: one shared encoding pipeline multiplexed to every
//! connected viewer.
//!
//! The media factory is shared, so the first viewer constructs the encode
//! pipeline and later viewers join it; the sink holds the pipeline's appsrc
//! as its single injection point. `push` is called from the pipeline thread
//! while connect/disconnect callbacks arrive on the serving thread, so the
//! injection set lives behind a mutex that is held only for lookup and
//! mutation - buffer construction happens with the lock released.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use crossbeam::utils::CachePadded;
use gstreamer as gst;
use gstreamer::glib;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_rtsp::RTSPLowerTrans;
use gstreamer_rtsp_server as gst_rtsp_server;
use gstreamer_rtsp_server::prelude::*;
use image::{imageops, RgbImage};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::capture::Frame;
use crate::Config;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to initialize GStreamer: {0}")]
    Init(#[from] glib::Error),
    #[error("failed to construct RTSP server: {0}")]
    Setup(String),
    #[error("stream sink is not running")]
    NotRunning,
}

#[derive(Default)]
struct StreamStats {
    pushed: CachePadded<AtomicU64>,
    delivered: CachePadded<AtomicU64>,
    rejected: CachePadded<AtomicU64>,
    idle: CachePadded<AtomicU64>,
}

/// Monotonic frame timestamping decoupled from wall-clock capture jitter:
/// every pushed frame advances the stream clock by exactly one frame
/// duration, so the encoder sees a constant-rate stream.
#[derive(Debug)]
pub struct FrameClock {
    next_pts_ns: u64,
    step_ns: u64,
}

impl FrameClock {
    pub fn new(fps: u32) -> Self {
        Self {
            next_pts_ns: 0,
            step_ns: 1_000_000_000 / fps.max(1) as u64,
        }
    }

    /// Returns (pts, duration) in nanoseconds for the next frame
    pub fn tick(&mut self) -> (u64, u64) {
        let pts = self.next_pts_ns;
        self.next_pts_ns += self.step_ns;
        (pts, self.step_ns)
    }
}

pub struct RtspStreamSink {
    server: gst_rtsp_server::RTSPServer,
    appsrcs: Arc<Mutex<Vec<gst_app::AppSrc>>>,
    main_loop: glib::MainLoop,
    serving: Option<thread::JoinHandle<()>>,
    running: Arc<AtomicBool>,
    stats: Arc<StreamStats>,
    clock: FrameClock,
    width: u32,
    height: u32,
    stream_url: String,
}

impl RtspStreamSink {
    pub fn new(config: &Config) -> Result<Self, StreamError> {
        gst::init()?;

        let appsrcs: Arc<Mutex<Vec<gst_app::AppSrc>>> = Arc::new(Mutex::new(Vec::new()));

        let server = gst_rtsp_server::RTSPServer::new();
        server.set_address("0.0.0.0");
        server.set_service(&config.rtsp_port.to_string());

        let mounts = server
            .mount_points()
            .ok_or_else(|| StreamError::Setup("server has no mount points".into()))?;

        let launch = format!(
            "( appsrc name=source is-live=true format=time \
             caps=video/x-raw,format=RGB,width={},height={},framerate={}/1 ! \
             videoconvert ! \
             x264enc tune=zerolatency speed-preset=ultrafast bitrate=1000 ! \
             rtph264pay name=pay0 pt=96 )",
            config.frame_width, config.frame_height, config.frame_fps
        );
        info!("Stream pipeline: {}", launch);

        let factory = gst_rtsp_server::RTSPMediaFactory::new();
        factory.set_launch(&launch);
        factory.set_shared(true);
        // Single reliable transport mode for delivery predictability
        factory.set_protocols(RTSPLowerTrans::TCP);

        // Viewer connected: the shared pipeline got constructed, register
        // its appsrc as the injection point
        let register = appsrcs.clone();
        factory.connect_media_constructed(move |_, media| {
            debug!("viewer connected, media pipeline constructed");

            let element = media.element();
            let Ok(bin) = element.downcast::<gst::Bin>() else {
                warn!("media element is not a bin, cannot locate appsrc");
                return;
            };
            let Some(appsrc) = bin
                .by_name_recurse_up("source")
                .and_then(|e| e.downcast::<gst_app::AppSrc>().ok())
            else {
                warn!("appsrc element missing from media pipeline");
                return;
            };

            appsrc.set_is_live(true);
            appsrc.set_format(gst::Format::Time);

            let mut sources = register.lock().unwrap();
            if sources.is_empty() {
                sources.push(appsrc);
                debug!("injection point registered for shared pipeline");
            }

            // Viewer gone: retire the injection point
            let retire = register.clone();
            media.connect_unprepared(move |_| {
                retire.lock().unwrap().clear();
                debug!("media unprepared, injection point retired");
            });
        });

        let mount = mount_path(&config.rtsp_url);
        mounts.add_factory(&mount, factory);

        let stream_url = format!("rtsp://localhost:{}{}", config.rtsp_port, mount);
        info!(
            "RTSP server ready: {} ({}x{} @ {}fps, TCP)",
            stream_url, config.frame_width, config.frame_height, config.frame_fps
        );

        Ok(Self {
            server,
            appsrcs,
            main_loop: glib::MainLoop::new(None, false),
            serving: None,
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(StreamStats::default()),
            clock: FrameClock::new(config.frame_fps),
            width: config.frame_width,
            height: config.frame_height,
            stream_url,
        })
    }

    /// Start the serving thread running the event loop
    pub fn start(&mut self) -> Result<(), StreamError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let server = self.server.clone();
        let main_loop = self.main_loop.clone();
        let running = self.running.clone();

        self.serving = Some(thread::spawn(move || {
            match server.attach(None) {
                Ok(_id) => debug!("RTSP server attached"),
                Err(e) => {
                    warn!("failed to attach RTSP server: {}", e);
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            }
            main_loop.run();
            debug!("RTSP serving loop ended");
        }));

        info!("RTSP server started at {}", self.stream_url);
        Ok(())
    }

    /// Push one annotated frame into the shared pipeline. With no viewer
    /// connected this is a cheap no-op that still reports success. Flow
    /// refusal from the encoder is counted and non-fatal.
    pub fn push(&mut self, frame: &Frame) -> bool {
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);

        // Take the injection point under the lock, build buffers outside it
        let appsrc = self.appsrcs.lock().unwrap().first().cloned();
        let Some(appsrc) = appsrc else {
            self.stats.idle.fetch_add(1, Ordering::Relaxed);
            return true;
        };

        let Some(data) = normalize_frame(frame, self.width, self.height) else {
            warn!("frame buffer size mismatch, dropping frame");
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        let Ok(mut buffer) = gst::Buffer::with_size(data.len()) else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let (pts_ns, duration_ns) = self.clock.tick();
        {
            let buffer_ref = buffer.make_mut();
            buffer_ref.set_pts(gst::ClockTime::from_nseconds(pts_ns));
            buffer_ref.set_duration(gst::ClockTime::from_nseconds(duration_ns));
            if buffer_ref.copy_from_slice(0, &data).is_err() {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                return false;
            }
        }

        match appsrc.push_buffer(buffer) {
            Ok(_) => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(flow) => {
                // Downstream flow refusal; keep running and retry next frame
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                debug!("appsrc refused buffer: {:?}", flow);
                false
            }
        }
    }

    pub fn has_viewers(&self) -> bool {
        !self.appsrcs.lock().unwrap().is_empty()
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// (pushed, delivered, rejected) counters
    pub fn stats(&self) -> (u64, u64, u64) {
        (
            self.stats.pushed.load(Ordering::Relaxed),
            self.stats.delivered.load(Ordering::Relaxed),
            self.stats.rejected.load(Ordering::Relaxed),
        )
    }

    #[cfg(test)]
    fn idle_count(&self) -> u64 {
        self.stats.idle.load(Ordering::Relaxed)
    }

    /// Stop serving, join the thread, and release injection points
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.main_loop.quit();
        if let Some(handle) = self.serving.take() {
            let _ = handle.join();
        }
        self.appsrcs.lock().unwrap().clear();
        info!("RTSP server stopped");
    }
}

impl Drop for RtspStreamSink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resize and format-normalize a frame to the pipeline's fixed RGB geometry
fn normalize_frame(frame: &Frame, width: u32, height: u32) -> Option<Vec<u8>> {
    let rgb = frame.to_rgb24();
    if frame.width() == width && frame.height() == height {
        return Some(rgb);
    }

    let img = RgbImage::from_raw(frame.width(), frame.height(), rgb)?;
    let resized = imageops::resize(&img, width, height, imageops::FilterType::Triangle);
    Some(resized.into_raw())
}

/// Extract the mount path from a configured RTSP URL
fn mount_path(rtsp_url: &str) -> String {
    let rest = rtsp_url
        .split_once("://")
        .map(|(_, rest)| rest)
        .unwrap_or(rtsp_url);
    match rest.find('/') {
        Some(idx) if idx + 1 < rest.len() => rest[idx..].to_string(),
        _ => "/stream".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::PixelFormat;
    use bytes::Bytes;

    #[test]
    fn frame_clock_advances_by_fixed_step() {
        let mut clock = FrameClock::new(30);
        let step = 1_000_000_000 / 30;
        let (p0, d0) = clock.tick();
        let (p1, _) = clock.tick();
        let (p2, _) = clock.tick();
        assert_eq!(p0, 0);
        assert_eq!(d0, step);
        assert_eq!(p1, step);
        assert_eq!(p2, 2 * step);
    }

    #[test]
    fn frame_clock_survives_zero_fps() {
        let mut clock = FrameClock::new(0);
        let (_, d) = clock.tick();
        assert_eq!(d, 1_000_000_000);
    }

    #[test]
    fn mount_path_is_extracted_from_url() {
        assert_eq!(mount_path("rtsp://localhost:8554/stream"), "/stream");
        assert_eq!(mount_path("rtsp://10.0.0.5:8554/live/main"), "/live/main");
        assert_eq!(mount_path("rtsp://localhost:8554"), "/stream");
        assert_eq!(mount_path("garbage"), "/stream");
    }

    #[test]
    fn normalize_passes_matching_rgb_through() {
        let frame = Frame::new(
            Bytes::from(vec![0u8; 4 * 4 * 3]),
            1,
            4,
            4,
            PixelFormat::Rgb24,
        );
        let out = normalize_frame(&frame, 4, 4).unwrap();
        assert_eq!(out.len(), 4 * 4 * 3);
    }

    #[test]
    fn normalize_resizes_and_converts() {
        let frame = Frame::new(
            Bytes::from(vec![128u8; 8 * 8 * 4]),
            1,
            8,
            8,
            PixelFormat::Rgba32,
        );
        let out = normalize_frame(&frame, 4, 4).unwrap();
        assert_eq!(out.len(), 4 * 4 * 3);
    }

    #[test]
    fn normalize_rejects_bad_buffer() {
        let frame = Frame::new(Bytes::from(vec![0u8; 10]), 1, 4, 4, PixelFormat::Rgb24);
        assert!(normalize_frame(&frame, 8, 8).is_none());
    }

    #[test]
    fn push_without_viewer_succeeds_without_encoding() {
        let config = crate::Config::default();
        let mut sink = RtspStreamSink::new(&config).unwrap();
        assert!(!sink.has_viewers());

        let frame = Frame::new(
            Bytes::from(vec![0u8; (config.frame_width * config.frame_height * 3) as usize]),
            1,
            config.frame_width,
            config.frame_height,
            PixelFormat::Rgb24,
        );
        assert!(sink.push(&frame));

        // No injection point: the frame never reaches buffer construction
        let (pushed, delivered, rejected) = sink.stats();
        assert_eq!(pushed, 1);
        assert_eq!(delivered, 0);
        assert_eq!(rejected, 0);
        assert_eq!(sink.idle_count(), 1);
    }
}
