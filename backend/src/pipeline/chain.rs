use serde::{Deserialize, Serialize};
use shared::{CategoryTally, Stage};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::detection::{process_images, PipelineError};
use crate::inference::DetectorSet;
use crate::storage::images::list_images;

/// Which images the color and pattern stages of `all_in_one` consume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainMode {
    /// Each stage sees exactly what the previous stage wrote.
    #[default]
    HandOff,
    /// Each stage re-scans the whole prediction folder, so later stages also
    /// see every earlier stage's outputs.
    Accumulate,
}

impl std::str::FromStr for ChainMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hand_off" | "handoff" => Ok(ChainMode::HandOff),
            "accumulate" => Ok(ChainMode::Accumulate),
            other => Err(format!("unknown chain mode '{other}'")),
        }
    }
}

/// Garment, then color, then pattern. Returns one tally per stage.
pub fn run_chain(
    images: &[PathBuf],
    detectors: &DetectorSet,
    prediction_dir: &Path,
    mode: ChainMode,
) -> Result<BTreeMap<String, CategoryTally>, PipelineError> {
    let mut results = BTreeMap::new();
    let mut inputs = images.to_vec();

    for (step, stage) in Stage::CHAIN.into_iter().enumerate() {
        if step > 0 && mode == ChainMode::Accumulate {
            inputs = list_images(prediction_dir)?;
        }
        let output = process_images(&inputs, detectors.get(stage), stage.as_ref(), prediction_dir)?;
        log::info!(
            "{} stage finished: {} images, {} detections",
            stage,
            inputs.len(),
            output.tally.values().sum::<usize>()
        );
        results.insert(stage.to_string(), output.tally);
        inputs = output.outputs;
    }

    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{write_png, FixedDetector};
    use image::Rgb;
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn detectors() -> DetectorSet {
        DetectorSet {
            garment: Arc::new(FixedDetector::new(&["shirt"])),
            color: Arc::new(FixedDetector::new(&["red"])),
            pattern: Arc::new(FixedDetector::new(&["striped"])),
        }
    }

    fn file_names(dir: &Path) -> BTreeSet<String> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn hand_off_feeds_each_stage_the_previous_outputs() {
        let uploads = TempDir::new().unwrap();
        let predictions = TempDir::new().unwrap();
        let images = vec![write_png(uploads.path(), "x.png", Rgb([10, 20, 30]))];

        let results =
            run_chain(&images, &detectors(), predictions.path(), ChainMode::HandOff).unwrap();

        assert_eq!(
            file_names(predictions.path()),
            BTreeSet::from([
                "garment_x.png".to_string(),
                "color_garment_x.png".to_string(),
                "pattern_color_garment_x.png".to_string(),
            ])
        );
        assert_eq!(results["garment"]["shirt"], 1);
        assert_eq!(results["color"]["red"], 1);
        assert_eq!(results["pattern"]["striped"], 1);
    }

    #[test]
    fn accumulate_rescans_the_prediction_folder() {
        let uploads = TempDir::new().unwrap();
        let predictions = TempDir::new().unwrap();
        let images = vec![write_png(uploads.path(), "x.png", Rgb([10, 20, 30]))];

        let results =
            run_chain(&images, &detectors(), predictions.path(), ChainMode::Accumulate).unwrap();

        assert_eq!(
            file_names(predictions.path()),
            BTreeSet::from([
                "garment_x.png".to_string(),
                "color_garment_x.png".to_string(),
                "pattern_garment_x.png".to_string(),
                "pattern_color_garment_x.png".to_string(),
            ])
        );
        assert_eq!(results["color"]["red"], 1);
        assert_eq!(results["pattern"]["striped"], 2);
    }

    #[test]
    fn parses_mode_names() {
        assert_eq!("hand_off".parse(), Ok(ChainMode::HandOff));
        assert_eq!("Accumulate".parse(), Ok(ChainMode::Accumulate));
        assert!("both".parse::<ChainMode>().is_err());
    }
}
