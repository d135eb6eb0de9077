//! Detection post-processing: raw output tensor to stable image-space boxes.
//!
//! The detector is fed an aspect-preserving square resize of the source
//! frame, padded to a multiple of 32. Its output rows carry coordinates
//! normalized to the unpadded input, so mapping back to the source frame is
//! a plain scale by the original width/height - no letterbox offset
//! arithmetic at this layer. Verify that convention against any new model
//! before trusting the mapping.

use ndarray::ArrayView2;
use tracing::trace;

use crate::detect::{BoundingBox, Detection};

/// Boxes with a side shorter than this are near-certain false positives
/// from low-resolution feature maps
const MIN_BOX_SIDE: f32 = 10.0;

/// Map raw detector output to filtered, de-duplicated detections in
/// source-frame pixel coordinates, highest confidence first.
///
/// Rows are `[class_id, confidence, x1, y1, x2, y2]` with normalized
/// coordinates. Zero rows produce an empty vec, not an error.
pub fn postprocess(
    raw: ArrayView2<'_, f32>,
    source_width: u32,
    source_height: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
) -> Vec<Detection> {
    let w = source_width as f32;
    let h = source_height as f32;

    let mut candidates = Vec::new();
    for row in raw.rows() {
        if row.len() < 6 {
            continue;
        }

        let confidence = row[1];
        if confidence < confidence_threshold {
            continue;
        }

        // Normalized [0,1] coordinates scale directly against the source
        // dimensions, then clamp to the frame
        let x1 = (row[2] * w).clamp(0.0, w - 1.0);
        let y1 = (row[3] * h).clamp(0.0, h - 1.0);
        let x2 = (row[4] * w).clamp(0.0, w - 1.0);
        let y2 = (row[5] * h).clamp(0.0, h - 1.0);

        if x2 <= x1 || y2 <= y1 {
            continue;
        }
        if (x2 - x1) < MIN_BOX_SIDE || (y2 - y1) < MIN_BOX_SIDE {
            continue;
        }

        candidates.push(Detection {
            class_id: row[0] as usize,
            confidence,
            bbox: BoundingBox::new(x1, y1, x2 - x1, y2 - y1),
        });
    }

    sort_descending(&mut candidates);
    let kept = nms_sorted(candidates, nms_threshold);
    trace!("post-processing kept {} boxes", kept.len());
    kept
}

/// In-place descending confidence sort. Recursive quicksort with a
/// median-of-three pivot; ordering among equal confidences is arbitrary.
pub fn sort_descending(detections: &mut [Detection]) {
    if detections.len() < 2 {
        return;
    }
    quicksort(detections, 0, detections.len() - 1);
}

fn quicksort(xs: &mut [Detection], left: usize, right: usize) {
    let pivot = median_of_three(xs, left, right);

    let mut i = left as isize;
    let mut j = right as isize;
    while i <= j {
        while xs[i as usize].confidence > pivot {
            i += 1;
        }
        while xs[j as usize].confidence < pivot {
            j -= 1;
        }
        if i <= j {
            xs.swap(i as usize, j as usize);
            i += 1;
            j -= 1;
        }
    }

    if (left as isize) < j {
        quicksort(xs, left, j as usize);
    }
    if i < right as isize {
        quicksort(xs, i as usize, right);
    }
}

fn median_of_three(xs: &[Detection], left: usize, right: usize) -> f32 {
    let mid = left + (right - left) / 2;
    let (a, b, c) = (
        xs[left].confidence,
        xs[mid].confidence,
        xs[right].confidence,
    );
    a.max(b).min(a.min(b).max(c))
}

/// Greedy non-maximum suppression over a confidence-sorted list. A candidate
/// is kept only while its IoU against every already-accepted box stays
/// strictly below the threshold; rejected candidates are discarded.
pub fn nms_sorted(sorted: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
    let mut accepted: Vec<Detection> = Vec::with_capacity(sorted.len());

    // O(n^2) linear scan; fine at tens of boxes per frame. A spatial index
    // would be needed before this sees thousands of candidates.
    for candidate in sorted {
        let overlaps = accepted
            .iter()
            .any(|kept| candidate.bbox.iou(&kept.bbox) >= nms_threshold);
        if !overlaps {
            accepted.push(candidate);
        }
    }

    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn run(
        rows: Array2<f32>,
        conf: f32,
        nms: f32,
    ) -> Vec<Detection> {
        postprocess(rows.view(), 640, 480, conf, nms)
    }

    #[test]
    fn empty_tensor_yields_empty_sequence() {
        let raw = Array2::<f32>::zeros((0, 6));
        assert!(run(raw, 0.25, 0.45).is_empty());
    }

    #[test]
    fn low_confidence_rows_are_dropped() {
        let raw = array![[1.0, 0.1, 0.1, 0.1, 0.5, 0.5]];
        assert!(run(raw, 0.25, 0.45).is_empty());
    }

    #[test]
    fn boxes_are_clamped_and_within_frame() {
        let raw = array![
            [1.0, 0.9, -0.2, -0.3, 0.5, 0.5],
            [2.0, 0.8, 0.7, 0.7, 1.4, 1.2],
        ];
        let out = run(raw, 0.25, 0.45);
        assert_eq!(out.len(), 2);
        for det in &out {
            assert!(det.bbox.x >= 0.0 && det.bbox.y >= 0.0);
            assert!(det.bbox.xmax() <= 639.0);
            assert!(det.bbox.ymax() <= 479.0);
            assert!(det.bbox.width >= MIN_BOX_SIDE);
            assert!(det.bbox.height >= MIN_BOX_SIDE);
            assert!(det.bbox.area() > 0.0);
        }
    }

    #[test]
    fn degenerate_boxes_are_discarded() {
        let raw = array![
            // x2 <= x1
            [1.0, 0.9, 0.5, 0.1, 0.4, 0.5],
            // y2 <= y1
            [1.0, 0.9, 0.1, 0.5, 0.5, 0.4],
            // sub-minimum side (width ~6px)
            [1.0, 0.9, 0.10, 0.1, 0.11, 0.5],
        ];
        assert!(run(raw, 0.25, 0.45).is_empty());
    }

    #[test]
    fn output_is_confidence_descending() {
        let raw = array![
            [1.0, 0.3, 0.0, 0.0, 0.1, 0.1],
            [2.0, 0.9, 0.3, 0.3, 0.4, 0.4],
            [3.0, 0.6, 0.6, 0.6, 0.7, 0.7],
        ];
        let out = run(raw, 0.25, 0.45);
        assert_eq!(out.len(), 3);
        assert!(out.windows(2).all(|w| w[0].confidence >= w[1].confidence));
        assert_eq!(out[0].class_id, 2);
    }

    #[test]
    fn overlapping_pair_keeps_only_strongest() {
        // Two same-class boxes, IoU 0.6: [0,0,100,100] vs [0,20,100,100]
        // in a 1000x1000 frame (intersection 8000, union 12000 -> 2/3...
        // use [0,0,100,100] and [0,25,100,100]: inter 7500, union 12500 = 0.6
        let raw = array![
            [1.0, 0.9, 0.0, 0.0, 0.1, 0.1],
            [1.0, 0.7, 0.0, 0.025, 0.1, 0.125],
        ];
        let out = postprocess(raw.view(), 1000, 1000, 0.25, 0.45);
        assert_eq!(out.len(), 1);
        assert!((out[0].confidence - 0.9).abs() < 1e-6);
    }

    #[test]
    fn accepted_pairs_stay_below_nms_threshold() {
        let raw = array![
            [1.0, 0.9, 0.00, 0.00, 0.20, 0.20],
            [1.0, 0.8, 0.05, 0.05, 0.25, 0.25],
            [1.0, 0.7, 0.10, 0.10, 0.30, 0.30],
            [2.0, 0.6, 0.50, 0.50, 0.70, 0.70],
            [2.0, 0.5, 0.52, 0.52, 0.72, 0.72],
        ];
        let nms = 0.45;
        let out = postprocess(raw.view(), 1000, 1000, 0.25, nms);
        for i in 0..out.len() {
            for j in (i + 1)..out.len() {
                assert!(out[i].bbox.iou(&out[j].bbox) < nms);
            }
        }
    }

    #[test]
    fn nms_is_idempotent() {
        let raw = array![
            [1.0, 0.9, 0.00, 0.00, 0.20, 0.20],
            [1.0, 0.8, 0.05, 0.05, 0.25, 0.25],
            [1.0, 0.7, 0.40, 0.40, 0.60, 0.60],
        ];
        let once = postprocess(raw.view(), 1000, 1000, 0.25, 0.45);
        let twice = nms_sorted(once.clone(), 0.45);
        assert_eq!(once, twice);
    }

    #[test]
    fn quicksort_handles_duplicates_and_single() {
        let det = |c: f32| Detection {
            class_id: 0,
            confidence: c,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        };
        let mut xs = vec![det(0.5)];
        sort_descending(&mut xs);
        assert_eq!(xs.len(), 1);

        let mut xs = vec![det(0.5), det(0.9), det(0.5), det(0.1), det(0.9)];
        sort_descending(&mut xs);
        let confs: Vec<f32> = xs.iter().map(|d| d.confidence).collect();
        assert_eq!(confs, vec![0.9, 0.9, 0.5, 0.5, 0.1]);
    }
}
