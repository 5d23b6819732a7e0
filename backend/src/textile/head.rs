use ndarray::{Array1, Array2, ArrayView1};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum HeadError {
    #[error("Failed to read texture head: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse texture head: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Inconsistent texture head: {0}")]
    Invalid(String),
    #[error("Expected {expected} features, got {actual}")]
    Dimension { expected: usize, actual: usize },
}

#[derive(Debug, Deserialize)]
struct HeadFile {
    classes: Vec<String>,
    scaler: ScalerFile,
    pca: PcaFile,
    classifier: ClassifierFile,
}

#[derive(Debug, Deserialize)]
struct ScalerFile {
    mean: Vec<f32>,
    scale: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct PcaFile {
    mean: Vec<f32>,
    components: Vec<Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct ClassifierFile {
    coef: Vec<Vec<f32>>,
    intercept: Vec<f32>,
}

/// `(x - mean) / scale`, per feature.
#[derive(Debug, Clone)]
pub struct StandardScaler {
    mean: Array1<f32>,
    scale: Array1<f32>,
}

impl StandardScaler {
    pub fn transform(&self, x: ArrayView1<'_, f32>) -> Array1<f32> {
        (&x - &self.mean) / &self.scale
    }
}

/// Projection onto fitted principal components.
#[derive(Debug, Clone)]
pub struct Pca {
    mean: Array1<f32>,
    components: Array2<f32>,
}

impl Pca {
    pub fn transform(&self, x: ArrayView1<'_, f32>) -> Array1<f32> {
        self.components.dot(&(&x - &self.mean))
    }
}

/// One weight row per class; the prediction is the highest decision score.
#[derive(Debug, Clone)]
pub struct LinearClassifier {
    coef: Array2<f32>,
    intercept: Array1<f32>,
}

impl LinearClassifier {
    pub fn decision(&self, x: ArrayView1<'_, f32>) -> Array1<f32> {
        self.coef.dot(&x) + &self.intercept
    }

    pub fn predict(&self, x: ArrayView1<'_, f32>) -> usize {
        self.decision(x)
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |best, (i, &s)| if s > best.1 { (i, s) } else { best })
            .0
    }
}

/// Everything fitted on top of the frozen backbone.
#[derive(Debug, Clone)]
pub struct TextureHead {
    classes: Vec<String>,
    scaler: StandardScaler,
    pca: Pca,
    classifier: LinearClassifier,
}

fn matrix(rows: Vec<Vec<f32>>, what: &str) -> Result<Array2<f32>, HeadError> {
    let n_rows = rows.len();
    let n_cols = rows.first().map(Vec::len).unwrap_or(0);
    if n_rows == 0 || n_cols == 0 || rows.iter().any(|r| r.len() != n_cols) {
        return Err(HeadError::Invalid(format!("{what} must be a non-empty rectangular matrix")));
    }
    Array2::from_shape_vec((n_rows, n_cols), rows.into_iter().flatten().collect())
        .map_err(|e| HeadError::Invalid(format!("{what}: {e}")))
}

impl TextureHead {
    pub fn load(path: &Path) -> Result<Self, HeadError> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    pub fn from_json(json: &str) -> Result<Self, HeadError> {
        let file: HeadFile = serde_json::from_str(json)?;

        let features = file.scaler.mean.len();
        if features == 0 || file.scaler.scale.len() != features {
            return Err(HeadError::Invalid("scaler mean/scale lengths differ".into()));
        }
        if file.scaler.scale.iter().any(|s| *s == 0.0) {
            return Err(HeadError::Invalid("scaler scale contains zero".into()));
        }
        let components = matrix(file.pca.components, "pca.components")?;
        if file.pca.mean.len() != features || components.ncols() != features {
            return Err(HeadError::Invalid(format!(
                "pca expects {} inputs, scaler produces {}",
                components.ncols(),
                features
            )));
        }
        let coef = matrix(file.classifier.coef, "classifier.coef")?;
        if coef.ncols() != components.nrows() {
            return Err(HeadError::Invalid(format!(
                "classifier expects {} inputs, pca produces {}",
                coef.ncols(),
                components.nrows()
            )));
        }
        if file.classifier.intercept.len() != coef.nrows() || file.classes.len() != coef.nrows() {
            return Err(HeadError::Invalid(
                "classes, coef rows and intercept must have equal length".into(),
            ));
        }

        Ok(Self {
            classes: file.classes,
            scaler: StandardScaler {
                mean: Array1::from(file.scaler.mean),
                scale: Array1::from(file.scaler.scale),
            },
            pca: Pca {
                mean: Array1::from(file.pca.mean),
                components,
            },
            classifier: LinearClassifier {
                coef,
                intercept: Array1::from(file.classifier.intercept),
            },
        })
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn input_dim(&self) -> usize {
        self.scaler.mean.len()
    }

    pub fn predict(&self, features: ArrayView1<'_, f32>) -> Result<&str, HeadError> {
        if features.len() != self.input_dim() {
            return Err(HeadError::Dimension {
                expected: self.input_dim(),
                actual: features.len(),
            });
        }
        let scaled = self.scaler.transform(features);
        let reduced = self.pca.transform(scaled.view());
        let index = self.classifier.predict(reduced.view());
        Ok(&self.classes[index])
    }
}
