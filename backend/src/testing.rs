//! Stand-in models for unit tests.

use image::{DynamicImage, Rgb, RgbImage};
use ndarray::{Array4, ArrayD, Axis};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::inference::{BoundingBox, Detection, Detector, FeatureExtractor, InferenceError};
use crate::textile::{TextureClassifier, TextureHead};

pub fn write_png(dir: &Path, name: &str, color: Rgb<u8>) -> PathBuf {
    let path = dir.join(name);
    RgbImage::from_pixel(32, 32, color).save(&path).unwrap();
    path
}

pub fn detection(class_id: usize, label: &str) -> Detection {
    Detection {
        class_id,
        label: label.to_string(),
        confidence: 0.9,
        bbox: BoundingBox {
            x1: 4.0,
            y1: 4.0,
            x2: 20.0,
            y2: 20.0,
        },
    }
}

/// Returns the same detections for every image.
pub struct FixedDetector {
    detections: Vec<Detection>,
    pub calls: AtomicUsize,
}

impl FixedDetector {
    pub fn new(labels: &[&str]) -> Self {
        Self {
            detections: labels
                .iter()
                .enumerate()
                .map(|(i, l)| detection(i, l))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Detector for FixedDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.detections.clone())
    }
}

/// Replays one scripted response per call; `None` makes that call fail.
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Option<Vec<Detection>>>>,
}

impl ScriptedDetector {
    pub fn new(script: Vec<Option<Vec<Detection>>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
        }
    }
}

impl Detector for ScriptedDetector {
    fn detect(&self, _image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        match self.script.lock().unwrap().pop_front() {
            Some(Some(detections)) => Ok(detections),
            Some(None) => Err(InferenceError::Model("scripted failure".into())),
            None => Err(InferenceError::Model("script exhausted".into())),
        }
    }
}

/// Emits the per-channel mean of its input as a `[1, C]` feature row.
pub struct ChannelMeanExtractor;

impl FeatureExtractor for ChannelMeanExtractor {
    fn extract(&self, input: Array4<f32>) -> Result<ArrayD<f32>, InferenceError> {
        let means = input
            .index_axis(Axis(0), 0)
            .mean_axis(Axis(2))
            .and_then(|m| m.mean_axis(Axis(1)))
            .ok_or_else(|| InferenceError::Model("empty input".into()))?;
        Ok(means.insert_axis(Axis(0)).into_dyn())
    }
}

/// Red-dominant images are "silk", blue-dominant ones "denim".
pub fn texture_classifier() -> TextureClassifier {
    let head = TextureHead::from_json(
        r#"{
            "classes": ["silk", "denim"],
            "scaler": { "mean": [0.0, 0.0, 0.0], "scale": [1.0, 1.0, 1.0] },
            "pca": {
                "mean": [0.0, 0.0, 0.0],
                "components": [[1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]
            },
            "classifier": { "coef": [[1.0, -1.0], [-1.0, 1.0]], "intercept": [0.0, 0.0] }
        }"#,
    )
    .unwrap();
    TextureClassifier::new(Arc::new(ChannelMeanExtractor), head, 16)
}
