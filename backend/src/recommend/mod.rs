//! Visual similarity search over a precomputed embedding index.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::ImageReader;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::inference::preprocess::imagenet_tensor;
use crate::inference::{l2_normalize, pool_features, FeatureExtractor, InferenceError};
use crate::outcome::ItemOutcome;

#[derive(Debug, thiserror::Error)]
pub enum RecommendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse embedding index: {0}")]
    IndexParse(#[from] serde_json::Error),
    #[error("Invalid embedding index: {0}")]
    InvalidIndex(String),
    #[error("Failed to decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error("Query has {actual} features, index has {expected}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Debug, Deserialize)]
struct IndexFile {
    items: Vec<IndexItem>,
}

#[derive(Debug, Deserialize)]
struct IndexItem {
    path: PathBuf,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub path: PathBuf,
    pub distance: f32,
}

/// Reference images and their unit-length embeddings, kept in memory and
/// searched exhaustively.
#[derive(Debug, Clone)]
pub struct EmbeddingIndex {
    paths: Vec<PathBuf>,
    embeddings: Vec<Vec<f32>>,
    dim: usize,
}

impl EmbeddingIndex {
    /// Loads `{"items": [{"path", "embedding"}]}`. Relative item paths are
    /// resolved against the index file's directory.
    pub fn load(path: &Path) -> Result<Self, RecommendError> {
        let file: IndexFile = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        let items = file
            .items
            .into_iter()
            .map(|item| {
                let path = if item.path.is_absolute() {
                    item.path
                } else {
                    base.join(item.path)
                };
                (path, item.embedding)
            })
            .collect();
        Self::from_items(items)
    }

    pub fn from_items(items: Vec<(PathBuf, Vec<f32>)>) -> Result<Self, RecommendError> {
        let dim = match items.first() {
            Some((_, embedding)) if !embedding.is_empty() => embedding.len(),
            Some(_) => return Err(RecommendError::InvalidIndex("empty embedding".into())),
            None => return Err(RecommendError::InvalidIndex("index has no items".into())),
        };

        let mut paths = Vec::with_capacity(items.len());
        let mut embeddings = Vec::with_capacity(items.len());
        for (path, mut embedding) in items {
            if embedding.len() != dim {
                return Err(RecommendError::InvalidIndex(format!(
                    "{} has {} features, expected {}",
                    path.display(),
                    embedding.len(),
                    dim
                )));
            }
            l2_normalize(&mut embedding);
            paths.push(path);
            embeddings.push(embedding);
        }

        Ok(Self {
            paths,
            embeddings,
            dim,
        })
    }

    /// Number of indexed images. Never zero.
    pub fn item_count(&self) -> usize {
        self.paths.len()
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// The `k` closest items by Euclidean distance, nearest first.
    pub fn nearest(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, RecommendError> {
        if query.len() != self.dim {
            return Err(RecommendError::Dimension {
                expected: self.dim,
                actual: query.len(),
            });
        }
        let mut scored: Vec<Neighbor> = self
            .embeddings
            .iter()
            .zip(&self.paths)
            .map(|(embedding, path)| Neighbor {
                path: path.clone(),
                distance: euclidean(query, embedding),
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }
}

fn euclidean(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

pub struct Recommender {
    extractor: Arc<dyn FeatureExtractor>,
    index: EmbeddingIndex,
    top_k: usize,
    input_size: u32,
}

impl Recommender {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        index: EmbeddingIndex,
        top_k: usize,
        input_size: u32,
    ) -> Self {
        Self {
            extractor,
            index,
            top_k,
            input_size,
        }
    }

    /// Unit-length embedding of the image at `path`.
    pub fn embed(&self, path: &Path) -> Result<Vec<f32>, RecommendError> {
        // Uploads are spooled without an extension, so sniff the format.
        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let input = imagenet_tensor(&image, self.input_size);
        let mut embedding = pool_features(self.extractor.extract(input)?)?.to_vec();
        l2_normalize(&mut embedding);
        Ok(embedding)
    }

    pub fn recommend(&self, path: &Path) -> Result<Vec<Neighbor>, RecommendError> {
        let query = self.embed(path)?;
        self.index.nearest(&query, self.top_k)
    }

    /// Neighbours' file contents, base64-encoded. Neighbours whose file can
    /// no longer be read are left out.
    pub fn recommend_encoded(&self, path: &Path) -> Result<Vec<String>, RecommendError> {
        let neighbors = self.recommend(path)?;
        let mut encoded = Vec::with_capacity(neighbors.len());
        for neighbor in neighbors {
            let outcome: ItemOutcome<Vec<u8>> = std::fs::read(&neighbor.path).into();
            match outcome {
                ItemOutcome::Done(bytes) => encoded.push(STANDARD.encode(bytes)),
                ItemOutcome::Skipped(reason) => {
                    log::warn!("Skipping recommendation {}: {}", neighbor.path.display(), reason);
                }
            }
        }
        Ok(encoded)
    }
}
