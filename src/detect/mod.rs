pub mod annotate;
pub mod labels;
pub mod onnx;
pub mod post;

pub use onnx::OnnxDetector;
pub use post::postprocess;

use ndarray::Array2;
use thiserror::Error;

use crate::capture::Frame;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("failed to load model from {path}: {reason}")]
    ModelLoad { path: String, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    BadOutput(String),
}

/// Inference engine interface. Implementations consume a decoded frame and
/// produce the raw output tensor: one row per candidate detection,
/// `[class_id, confidence, x1, y1, x2, y2]` with coordinates normalized to
/// `[0, 1]` relative to the unpadded input.
pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Array2<f32>, DetectorError>;
}

/// Axis-aligned bounding box in source-frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn xmax(&self) -> f32 {
        self.x + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.y + self.height
    }

    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
        let l = self.x.max(other.x);
        let r = self.xmax().min(other.xmax());
        let t = self.y.max(other.y);
        let b = self.ymax().min(other.ymax());
        (r - l).max(0.0) * (b - t).max(0.0)
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detected object, immutable after creation
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

impl Detection {
    pub fn class_name(&self) -> &'static str {
        labels::class_name(self.class_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BoundingBox::new(10.0, 10.0, 20.0, 20.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(20.0, 20.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn half_overlap_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 10.0, 10.0);
        // intersection 50, union 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }
}
