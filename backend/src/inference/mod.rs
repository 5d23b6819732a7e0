pub mod annotate;
pub mod preprocess;
#[cfg(feature = "torch")]
pub mod torch;
pub mod yolo;

use image::DynamicImage;
use ndarray::{Array1, Array4, ArrayD, Axis, Ix1, Ix2, Ix4};
use shared::Stage;
use std::sync::Arc;

use crate::recommend::Recommender;
use crate::textile::TextureClassifier;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("Preprocessing error: {0}")]
    Preprocessing(String),
    #[error("Model error: {0}")]
    Model(String),
    #[error("Unexpected output shape {actual:?}: {expected}")]
    Shape {
        expected: &'static str,
        actual: Vec<usize>,
    },
}

/// Axis-aligned box in source-image pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 { 0.0 } else { inter / union }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// An object detector. Implementations must be callable from several
/// request threads at once.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, InferenceError>;
}

/// A frozen backbone: NCHW input in, raw activations out (a pooled vector or
/// a `[N, C, H, W]` feature map).
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, input: Array4<f32>) -> Result<ArrayD<f32>, InferenceError>;
}

#[derive(Clone)]
pub struct DetectorSet {
    pub garment: Arc<dyn Detector>,
    pub color: Arc<dyn Detector>,
    pub pattern: Arc<dyn Detector>,
}

impl DetectorSet {
    pub fn get(&self, stage: Stage) -> &dyn Detector {
        match stage {
            Stage::Garment => self.garment.as_ref(),
            Stage::Color => self.color.as_ref(),
            Stage::Pattern => self.pattern.as_ref(),
        }
    }
}

/// Every model the server uses, loaded once at startup and only read afterwards.
/// A slot stays empty when its weights are not configured or failed to load.
#[derive(Clone, Default)]
pub struct ModelRegistry {
    pub detectors: Option<DetectorSet>,
    pub textile: Option<Arc<TextureClassifier>>,
    pub recommender: Option<Arc<Recommender>>,
}

impl ModelRegistry {
    pub fn describe(&self) -> String {
        format!(
            "detectors={}, textile={}, recommender={}",
            self.detectors.is_some(),
            self.textile.is_some(),
            self.recommender.is_some()
        )
    }
}

/// Collapses extractor output to one vector: `[1, C, H, W]` maps are
/// averaged over their spatial dims, `[1, C]` and `[C]` pass through.
pub fn pool_features(features: ArrayD<f32>) -> Result<Array1<f32>, InferenceError> {
    let shape = features.shape().to_vec();
    let wrong_shape = || InferenceError::Shape {
        expected: "[1, C, H, W], [1, C] or [C]",
        actual: shape.clone(),
    };
    match shape.len() {
        4 if shape[0] == 1 && shape[2] * shape[3] > 0 => {
            let map = features.into_dimensionality::<Ix4>().map_err(|_| wrong_shape())?;
            let pooled = map
                .index_axis(Axis(0), 0)
                .mean_axis(Axis(2))
                .and_then(|m| m.mean_axis(Axis(1)))
                .ok_or_else(wrong_shape)?;
            Ok(pooled)
        }
        2 if shape[0] == 1 => {
            let rows = features.into_dimensionality::<Ix2>().map_err(|_| wrong_shape())?;
            Ok(rows.index_axis(Axis(0), 0).to_owned())
        }
        1 => features.into_dimensionality::<Ix1>().map_err(|_| wrong_shape()),
        _ => Err(wrong_shape()),
    }
}

/// Scales `vector` to unit length in place; near-zero vectors are left alone.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in vector.iter_mut() {
            *x /= norm;
        }
    }
}

/// Reads a labels file: one class name per non-empty line.
pub fn read_labels(path: &std::path::Path) -> std::io::Result<Vec<String>> {
    Ok(std::fs::read_to_string(path)?
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox { x1, y1, x2, y2 }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert_eq!(a.iou(&bbox(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn iou_of_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(5.0, 0.0, 15.0, 10.0);
        // 50 / 150
        assert!((a.iou(&b) - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn pools_feature_maps_over_space() {
        let map = ndarray::Array4::from_shape_fn((1, 2, 2, 2), |(_, c, y, x)| {
            (c * 10 + y * 2 + x) as f32
        });
        let pooled = pool_features(map.into_dyn()).unwrap();
        assert_eq!(pooled.to_vec(), vec![1.5, 11.5]);
    }

    #[test]
    fn pooling_rejects_batches_and_odd_ranks() {
        let batch = ArrayD::<f32>::zeros(ndarray::IxDyn(&[2, 4]));
        assert!(pool_features(batch).is_err());
        let rank3 = ArrayD::<f32>::zeros(ndarray::IxDyn(&[4, 2, 2]));
        assert!(pool_features(rank3).is_err());
        let vector = ArrayD::<f32>::ones(ndarray::IxDyn(&[3]));
        assert_eq!(pool_features(vector).unwrap().len(), 3);
    }

    #[test]
    fn l2_normalize_gives_unit_length() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.6, 0.8]);
        let mut zero = vec![0.0, 0.0];
        l2_normalize(&mut zero);
        assert_eq!(zero, vec![0.0, 0.0]);
    }

    #[test]
    fn labels_file_skips_blank_lines() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("labels.txt");
        std::fs::write(&path, "shirt\n\n  dress \ntrousers\n").unwrap();
        assert_eq!(read_labels(&path).unwrap(), vec!["shirt", "dress", "trousers"]);
    }
}
