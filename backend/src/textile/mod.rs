//! Fabric-texture classification: frozen backbone features followed by a
//! fitted scaler, PCA projection and linear classifier.

pub mod head;

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::inference::preprocess::imagenet_tensor;
use crate::inference::{pool_features, FeatureExtractor, InferenceError};
use crate::outcome::ItemOutcome;
pub use head::{HeadError, TextureHead};

#[derive(Debug, thiserror::Error)]
pub enum TextileError {
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Head(#[from] HeadError),
}

pub struct TextureClassifier {
    extractor: Arc<dyn FeatureExtractor>,
    head: TextureHead,
    input_size: u32,
}

impl TextureClassifier {
    pub fn new(extractor: Arc<dyn FeatureExtractor>, head: TextureHead, input_size: u32) -> Self {
        Self {
            extractor,
            head,
            input_size,
        }
    }

    pub fn classes(&self) -> &[String] {
        self.head.classes()
    }

    fn predict(&self, path: &Path) -> Result<String, TextileError> {
        let image = image::open(path)?;
        let input = imagenet_tensor(&image, self.input_size);
        let features = pool_features(self.extractor.extract(input)?)?;
        Ok(self.head.predict(features.view())?.to_string())
    }

    /// Classifies one image. Any failure is a skip, never an error.
    pub fn classify(&self, path: &Path) -> ItemOutcome<String> {
        self.predict(path).into()
    }

    /// Maps file name to fabric class for every image that could be classified.
    pub fn classify_all(&self, paths: &[impl AsRef<Path>]) -> BTreeMap<String, String> {
        let mut results = BTreeMap::new();
        for path in paths {
            let path = path.as_ref();
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string());
            match self.classify(path) {
                ItemOutcome::Done(class) => {
                    log::info!("Textile prediction for {}: {}", name, class);
                    results.insert(name, class);
                }
                ItemOutcome::Skipped(reason) => {
                    log::warn!("Skipping textile prediction for {}: {}", name, reason);
                }
            }
        }
        results
    }
}
