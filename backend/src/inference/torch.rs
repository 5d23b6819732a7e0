//! TorchScript backend (`torch` feature). Modules are exported with
//! `torch.jit.trace`/`script` and run through libtorch via `tch`.

use image::DynamicImage;
use ndarray::{Array4, ArrayD, Axis, Ix3, IxDyn};
use std::path::Path;
use std::sync::{Arc, Mutex};
use tch::{CModule, Device, IValue, Kind, Tensor};

use super::preprocess::letterbox;
use super::yolo::{decode, DecodeOptions};
use super::{
    read_labels, Detection, Detector, DetectorSet, FeatureExtractor, InferenceError, ModelRegistry,
};
use crate::config::{AppConfig, DetectorPaths};
use crate::recommend::{EmbeddingIndex, Recommender};
use crate::textile::{TextureClassifier, TextureHead};

fn model_error(e: impl std::fmt::Display) -> InferenceError {
    InferenceError::Model(e.to_string())
}

/// A loaded TorchScript module. libtorch modules are not re-entrant, so
/// calls are serialised.
pub struct TorchModule {
    module: Mutex<CModule>,
    device: Device,
}

impl TorchModule {
    pub fn load(path: &Path, use_cuda: bool) -> Result<Self, InferenceError> {
        let device = if use_cuda {
            Device::cuda_if_available()
        } else {
            Device::Cpu
        };
        let module = CModule::load_on_device(path, device)
            .map_err(|e| InferenceError::Model(format!("{}: {}", path.display(), e)))?;
        log::info!("Loaded {} on {:?}", path.display(), device);
        Ok(Self {
            module: Mutex::new(module),
            device,
        })
    }

    /// Runs the module on one NCHW batch and returns its first tensor output.
    pub fn run(&self, input: Array4<f32>) -> Result<ArrayD<f32>, InferenceError> {
        let shape: Vec<i64> = input.shape().iter().map(|&d| d as i64).collect();
        let input = input.as_standard_layout();
        let data = input
            .as_slice()
            .ok_or_else(|| InferenceError::Preprocessing("input is not contiguous".into()))?;
        let tensor = Tensor::from_slice(data).reshape(shape.as_slice()).to_device(self.device);

        let output = {
            let module = self
                .module
                .lock()
                .map_err(|_| InferenceError::Model("model lock poisoned".into()))?;
            tch::no_grad(|| module.forward_is(&[IValue::Tensor(tensor)])).map_err(model_error)?
        };
        let output = first_tensor(output)?
            .to_kind(Kind::Float)
            .to_device(Device::Cpu)
            .contiguous();

        let dims: Vec<usize> = output.size().iter().map(|&d| d as usize).collect();
        let numel = output.numel();
        let mut buffer = vec![0f32; numel];
        output.copy_data(&mut buffer, numel);
        ArrayD::from_shape_vec(IxDyn(&dims), buffer).map_err(model_error)
    }
}

fn first_tensor(value: IValue) -> Result<Tensor, InferenceError> {
    match value {
        IValue::Tensor(tensor) => Ok(tensor),
        IValue::Tuple(items) | IValue::GenericList(items) => items
            .into_iter()
            .find_map(|item| match item {
                IValue::Tensor(tensor) => Some(tensor),
                _ => None,
            })
            .ok_or_else(|| InferenceError::Model("module returned no tensor".into())),
        _ => Err(InferenceError::Model("module returned no tensor".into())),
    }
}

pub struct TorchDetector {
    module: TorchModule,
    labels: Vec<String>,
    input_size: u32,
    options: DecodeOptions,
}

impl TorchDetector {
    pub fn load(paths: &DetectorPaths, config: &AppConfig) -> Result<Self, InferenceError> {
        let labels = read_labels(&paths.labels)
            .map_err(|e| InferenceError::Model(format!("{}: {}", paths.labels.display(), e)))?;
        Ok(Self {
            module: TorchModule::load(&paths.weights, config.models.use_cuda)?,
            labels,
            input_size: config.detection.input_size,
            options: DecodeOptions {
                confidence_threshold: config.detection.confidence_threshold,
                iou_threshold: config.detection.iou_threshold,
                max_detections: config.detection.max_detections,
            },
        })
    }
}

impl Detector for TorchDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<Detection>, InferenceError> {
        let (input, letterbox) = letterbox(image, self.input_size);
        let output = self.module.run(input)?;
        let shape = output.shape().to_vec();
        let output = output
            .into_dimensionality::<Ix3>()
            .map_err(|_| InferenceError::Shape {
                expected: "[1, 4 + classes, anchors]",
                actual: shape,
            })?;
        decode(output.index_axis(Axis(0), 0), &self.labels, &letterbox, &self.options)
    }
}

pub struct TorchFeatureExtractor {
    module: TorchModule,
}

impl TorchFeatureExtractor {
    pub fn load(path: &Path, use_cuda: bool) -> Result<Self, InferenceError> {
        Ok(Self {
            module: TorchModule::load(path, use_cuda)?,
        })
    }
}

impl FeatureExtractor for TorchFeatureExtractor {
    fn extract(&self, input: Array4<f32>) -> Result<ArrayD<f32>, InferenceError> {
        self.module.run(input)
    }
}

fn load_detectors(config: &AppConfig) -> Option<DetectorSet> {
    let models = &config.models;
    let (Some(garment), Some(color), Some(pattern)) =
        (&models.garment, &models.color, &models.pattern)
    else {
        log::warn!("Detector weights not configured; /predict/ detection is disabled");
        return None;
    };
    let load = |paths: &DetectorPaths| -> Result<Arc<dyn Detector>, InferenceError> {
        Ok(Arc::new(TorchDetector::load(paths, config)?))
    };
    match (load(garment), load(color), load(pattern)) {
        (Ok(garment), Ok(color), Ok(pattern)) => Some(DetectorSet {
            garment,
            color,
            pattern,
        }),
        (g, c, p) => {
            for e in [g.err(), c.err(), p.err()].into_iter().flatten() {
                log::error!("Failed to load detector: {}", e);
            }
            None
        }
    }
}

fn load_textile(config: &AppConfig) -> Option<Arc<TextureClassifier>> {
    let (Some(extractor), Some(head)) =
        (&config.models.texture_extractor, &config.models.texture_head)
    else {
        log::warn!("Texture model not configured; textile predictions are disabled");
        return None;
    };
    let head = match TextureHead::load(head) {
        Ok(head) => head,
        Err(e) => {
            log::error!("Failed to load texture head {}: {}", head.display(), e);
            return None;
        }
    };
    match TorchFeatureExtractor::load(extractor, config.models.use_cuda) {
        Ok(extractor) => {
            let input_size = config.pipeline.texture_input_size;
            let classifier = TextureClassifier::new(Arc::new(extractor), head, input_size);
            log::info!("Texture classifier ready for {:?}", classifier.classes());
            Some(Arc::new(classifier))
        }
        Err(e) => {
            log::error!("Failed to load texture extractor: {}", e);
            None
        }
    }
}

fn load_recommender(config: &AppConfig) -> Option<Arc<Recommender>> {
    let (Some(extractor), Some(index)) =
        (&config.models.embedding_extractor, &config.models.embedding_index)
    else {
        log::warn!("Embedding model not configured; recommendations are disabled");
        return None;
    };
    let index = match EmbeddingIndex::load(index) {
        Ok(index) => index,
        Err(e) => {
            log::error!("Failed to load embedding index {}: {}", index.display(), e);
            return None;
        }
    };
    log::info!("Embedding index holds {} items of dim {}", index.item_count(), index.dim());
    match TorchFeatureExtractor::load(extractor, config.models.use_cuda) {
        Ok(extractor) => Some(Arc::new(Recommender::new(
            Arc::new(extractor),
            index,
            config.recommend.top_k,
            config.recommend.input_size,
        ))),
        Err(e) => {
            log::error!("Failed to load embedding extractor: {}", e);
            None
        }
    }
}

/// Loads every configured model. A model that fails to load leaves its slot
/// empty; the server still starts.
pub fn load_registry(config: &AppConfig) -> ModelRegistry {
    ModelRegistry {
        detectors: load_detectors(config),
        textile: load_textile(config),
        recommender: load_recommender(config),
    }
}
