//! Capture device probing helpers

use std::path::Path;

use color_eyre::{eyre::eyre, Result};
use tracing::{debug, info};
use v4l::{capability::Flags, video::Capture, Device};

/// Basic facts about a probed capture device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    pub path: String,
    pub card: String,
}

/// Verify that the configured camera exists and can capture video.
/// Logs the formats the driver advertises so misconfigured resolutions
/// are easier to diagnose.
pub fn probe_device(camera_id: u32) -> Result<DeviceInfo> {
    let path = format!("/dev/video{}", camera_id);
    if !Path::new(&path).exists() {
        return Err(eyre!("capture device {} does not exist", path));
    }

    let dev = Device::with_path(&path)?;
    let caps = dev.query_caps()?;

    if !caps.capabilities.contains(Flags::VIDEO_CAPTURE) {
        return Err(eyre!("{} ({}) cannot capture video", path, caps.card));
    }

    if let Ok(formats) = dev.enum_formats() {
        for fmt in formats {
            debug!("{} supports {} ({})", path, fmt.fourcc, fmt.description);
        }
    }

    info!("Using capture device: {} - {}", path, caps.card);
    Ok(DeviceInfo {
        path,
        card: caps.card,
    })
}
