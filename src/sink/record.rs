//! Metadata record and its JSON wire representation

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::detect::Detection;

/// One snapshot of detection results, created once per publish interval
#[derive(Debug, Clone)]
pub struct MetadataRecord {
    pub timestamp: DateTime<Utc>,
    pub camera_id: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<Detection>,
}

impl MetadataRecord {
    pub fn new(
        detections: Vec<Detection>,
        frame_width: u32,
        frame_height: u32,
        camera_id: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            camera_id: camera_id.into(),
            frame_width,
            frame_height,
            detections,
        }
    }

    pub fn to_wire(&self) -> WirePayload {
        WirePayload {
            timestamp: self
                .timestamp
                .to_rfc3339_opts(SecondsFormat::Millis, true),
            camera_id: self.camera_id.clone(),
            frame_width: self.frame_width,
            frame_height: self.frame_height,
            detections: self.detections.iter().map(WireDetection::from).collect(),
            detection_count: self.detections.len(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_wire())
    }
}

/// HTTP POST body
#[derive(Debug, Serialize, Deserialize)]
pub struct WirePayload {
    pub timestamp: String,
    pub camera_id: String,
    pub frame_width: u32,
    pub frame_height: u32,
    pub detections: Vec<WireDetection>,
    pub detection_count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WireDetection {
    pub class_id: usize,
    pub class_name: String,
    /// Rounded to 4 decimals
    pub confidence: f32,
    pub bbox: WireBbox,
}

/// Box fields rounded to 2 decimals
#[derive(Debug, Serialize, Deserialize)]
pub struct WireBbox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl From<&Detection> for WireDetection {
    fn from(det: &Detection) -> Self {
        Self {
            class_id: det.class_id,
            class_name: det.class_name().to_string(),
            confidence: round_to(det.confidence, 4),
            bbox: WireBbox {
                x: round_to(det.bbox.x, 2),
                y: round_to(det.bbox.y, 2),
                width: round_to(det.bbox.width, 2),
                height: round_to(det.bbox.height, 2),
            },
        }
    }
}

fn round_to(v: f32, places: u32) -> f32 {
    let factor = 10f32.powi(places as i32);
    (v * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::BoundingBox;

    fn sample_record() -> MetadataRecord {
        MetadataRecord::new(
            vec![
                Detection {
                    class_id: 1,
                    confidence: 0.912_345_6,
                    bbox: BoundingBox::new(10.123_9, 20.987_1, 30.0, 40.555),
                },
                Detection {
                    class_id: 3,
                    confidence: 0.5,
                    bbox: BoundingBox::new(0.0, 0.0, 100.0, 100.0),
                },
            ],
            640,
            480,
            "camera_0",
        )
    }

    #[test]
    fn timestamp_is_iso8601_millis_utc() {
        let wire = sample_record().to_wire();
        assert!(wire.timestamp.ends_with('Z'));
        // 2026-08-23T12:34:56.789Z
        assert_eq!(wire.timestamp.len(), 24);
        assert_eq!(&wire.timestamp[4..5], "-");
        assert_eq!(&wire.timestamp[10..11], "T");
        assert_eq!(&wire.timestamp[19..20], ".");
    }

    #[test]
    fn values_are_rounded_to_declared_precision() {
        let wire = sample_record().to_wire();
        assert_eq!(wire.detections[0].confidence, 0.9123);
        assert_eq!(wire.detections[0].bbox.x, 10.12);
        assert_eq!(wire.detections[0].bbox.y, 20.99);
        assert_eq!(wire.detections[0].bbox.height, 40.56);
        assert_eq!(wire.detections[0].class_name, "person");
    }

    #[test]
    fn wire_round_trip_preserves_detections() {
        let record = sample_record();
        let json = record.to_json().unwrap();
        let parsed: WirePayload = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed.detection_count, record.detections.len());
        assert_eq!(parsed.detections.len(), record.detections.len());
        for (wire, original) in parsed.detections.iter().zip(&record.detections) {
            assert_eq!(wire.class_id, original.class_id);
            assert!((wire.confidence - original.confidence).abs() < 5e-5);
        }
        assert_eq!(parsed.frame_width, 640);
        assert_eq!(parsed.frame_height, 480);
        assert_eq!(parsed.camera_id, "camera_0");
    }

    #[test]
    fn empty_detections_serialize_with_zero_count() {
        let record = MetadataRecord::new(Vec::new(), 640, 480, "camera_0");
        let json = record.to_json().unwrap();
        assert!(json.contains("\"detection_count\":0"));
        assert!(json.contains("\"detections\":[]"));
    }
}
