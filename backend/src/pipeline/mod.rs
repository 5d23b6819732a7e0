//! Runs the model a `/predict/` request selected over its images.

pub mod chain;
pub mod detection;

use shared::{ModelSelection, PredictionResults};
use std::path::{Path, PathBuf};

use crate::inference::ModelRegistry;
pub use chain::{run_chain, ChainMode};
pub use detection::{process_images, PipelineError, StageOutput};

pub fn run_selection(
    selection: ModelSelection,
    images: &[PathBuf],
    models: &ModelRegistry,
    prediction_dir: &Path,
    chain_mode: ChainMode,
) -> Result<PredictionResults, PipelineError> {
    let mut results = PredictionResults::default();
    match selection {
        ModelSelection::Single(stage) => {
            let detectors = models
                .detectors
                .as_ref()
                .ok_or(PipelineError::ModelUnavailable("detection"))?;
            let output =
                process_images(images, detectors.get(stage), stage.as_ref(), prediction_dir)?;
            log::info!("{} predictions complete for {} images", stage, images.len());
            results.stages.insert(stage.to_string(), output.tally);
        }
        ModelSelection::AllInOne => {
            let detectors = models
                .detectors
                .as_ref()
                .ok_or(PipelineError::ModelUnavailable("detection"))?;
            results.stages = run_chain(images, detectors, prediction_dir, chain_mode)?;
        }
        ModelSelection::Textile => {
            let classifier = models
                .textile
                .as_ref()
                .ok_or(PipelineError::ModelUnavailable("textile"))?;
            results.textile = Some(classifier.classify_all(images));
        }
    }
    Ok(results)
}
