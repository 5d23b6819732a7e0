use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use strum_macros::{AsRefStr, Display, EnumString};

/// One of the three object detectors. The string form doubles as the
/// prefix of annotated output files and as the key in prediction results.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
    Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Garment,
    Color,
    Pattern,
}

impl Stage {
    /// Order of the chained (`all_in_one`) pipeline.
    pub const CHAIN: [Stage; 3] = [Stage::Garment, Stage::Color, Stage::Pattern];
}

/// What the `model_type` form field asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelSelection {
    Single(Stage),
    AllInOne,
    Textile,
}

pub const ALL_IN_ONE: &str = "all_in_one";
pub const TEXTILE: &str = "textile";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownModelType(pub String);

impl fmt::Display for UnknownModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown model type '{}'", self.0)
    }
}

impl std::error::Error for UnknownModelType {}

impl FromStr for ModelSelection {
    type Err = UnknownModelType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == ALL_IN_ONE {
            return Ok(ModelSelection::AllInOne);
        }
        // Any selector mentioning textile routes to the fabric classifier.
        if s.to_ascii_lowercase().contains(TEXTILE) {
            return Ok(ModelSelection::Textile);
        }
        Stage::from_str(s)
            .map(ModelSelection::Single)
            .map_err(|_| UnknownModelType(s.to_string()))
    }
}

/// Category label -> number of detected objects across a batch.
pub type CategoryTally = BTreeMap<String, usize>;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct PredictionResults {
    #[serde(flatten)]
    pub stages: BTreeMap<String, CategoryTally>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub textile: Option<BTreeMap<String, String>>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct PredictResponse {
    pub user_id: String,
    pub results: PredictionResults,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct RecommendResponse {
    pub recommended_images: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SeriesPayload {
    pub dates: Vec<String>,
    pub values: Vec<f64>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TrendResponse {
    pub keyword: String,
    pub historical_data: SeriesPayload,
    pub forecast_data: SeriesPayload,
    pub peak_month: u32,
    pub low_month: u32,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct HealthResponse {
    pub status: String,
    pub detectors: bool,
    pub textile: bool,
    pub recommender: bool,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}
