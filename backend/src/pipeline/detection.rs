use shared::CategoryTally;
use std::path::{Path, PathBuf};

use crate::inference::annotate::draw_detections;
use crate::inference::{Detector, InferenceError};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Failed to read image {path}: {source}")]
    Decode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Detection failed for {path}: {source}")]
    Detect {
        path: PathBuf,
        source: InferenceError,
    },
    #[error("Failed to save prediction {path}: {source}")]
    Save {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Image path has no file name: {0}")]
    NoFileName(PathBuf),
    #[error("Failed to list predictions: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0} model is not loaded")]
    ModelUnavailable(&'static str),
}

/// Result of running one detector over a batch.
#[derive(Debug, Default)]
pub struct StageOutput {
    pub tally: CategoryTally,
    /// Annotated files written, in input order. A path appears once even
    /// when several inputs shared a file name.
    pub outputs: Vec<PathBuf>,
}

/// Runs `detector` once per image, writes the annotated copy as
/// `<label>_<file name>` into `output_dir` and counts detections per class.
///
/// The first failing image aborts the whole batch.
pub fn process_images(
    images: &[PathBuf],
    detector: &dyn Detector,
    label: &str,
    output_dir: &Path,
) -> Result<StageOutput, PipelineError> {
    let mut stage = StageOutput::default();

    for path in images {
        let file_name = path
            .file_name()
            .ok_or_else(|| PipelineError::NoFileName(path.clone()))?;

        let image = image::open(path).map_err(|source| PipelineError::Decode {
            path: path.clone(),
            source,
        })?;
        let detections = detector
            .detect(&image)
            .map_err(|source| PipelineError::Detect {
                path: path.clone(),
                source,
            })?;

        let output_path = output_dir.join(format!("{}_{}", label, file_name.to_string_lossy()));
        draw_detections(&image, &detections)
            .save(&output_path)
            .map_err(|source| PipelineError::Save {
                path: output_path.clone(),
                source,
            })?;
        log::info!("Saved prediction to {}", output_path.display());

        for detection in &detections {
            *stage.tally.entry(detection.label.clone()).or_insert(0) += 1;
        }
        if !stage.outputs.contains(&output_path) {
            stage.outputs.push(output_path);
        }
    }

    Ok(stage)
}
