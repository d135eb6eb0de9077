pub mod frame;
pub mod gst_capture;

pub use frame::Frame;
pub use frame::PixelFormat;
pub use gst_capture::{CaptureError, GstCapture};
