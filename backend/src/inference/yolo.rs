//! Decoding of YOLOv8-style detection heads.
//!
//! The head emits `[4 + classes, anchors]`: rows 0..4 are the box centre and
//! size in model-input pixels, the remaining rows are per-class scores.

use ndarray::ArrayView2;

use super::preprocess::Letterbox;
use super::{BoundingBox, Detection, InferenceError};

#[derive(Debug, Clone, Copy)]
pub struct DecodeOptions {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

pub fn decode(
    output: ArrayView2<'_, f32>,
    labels: &[String],
    letterbox: &Letterbox,
    options: &DecodeOptions,
) -> Result<Vec<Detection>, InferenceError> {
    if output.nrows() <= 4 {
        return Err(InferenceError::Shape {
            expected: "[4 + classes, anchors]",
            actual: output.shape().to_vec(),
        });
    }

    let mut candidates = Vec::new();
    for anchor in output.columns() {
        let (class_id, score) = anchor
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .fold((0usize, f32::MIN), |best, (i, s)| if s > best.1 { (i, s) } else { best });
        if score < options.confidence_threshold {
            continue;
        }

        let (cx, cy, w, h) = (anchor[0], anchor[1], anchor[2], anchor[3]);
        let (x1, y1) = letterbox.to_source(cx - w / 2.0, cy - h / 2.0);
        let (x2, y2) = letterbox.to_source(cx + w / 2.0, cy + h / 2.0);
        if x2 <= x1 || y2 <= y1 {
            continue;
        }

        candidates.push(Detection {
            class_id,
            label: labels
                .get(class_id)
                .cloned()
                .unwrap_or_else(|| format!("class_{class_id}")),
            confidence: score,
            bbox: BoundingBox { x1, y1, x2, y2 },
        });
    }

    let mut kept = non_max_suppression(candidates, options.iou_threshold);
    kept.truncate(options.max_detections);
    Ok(kept)
}

/// Greedy per-class NMS; output is sorted by descending confidence.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut suppressed = vec![false; detections.len()];
    let mut kept = Vec::new();
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if !suppressed[j]
                && detections[i].class_id == detections[j].class_id
                && detections[i].bbox.iou(&detections[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }
        kept.push(detections[i].clone());
    }
    kept
}
