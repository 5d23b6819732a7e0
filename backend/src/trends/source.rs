use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use crate::config::TrendsConfig;

/// One observation of search interest (0-100 on Google's scale).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub value: f64,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Request timed out: {0}")]
    Timeout(String),
    #[error("HTTP error: {0}")]
    Http(reqwest::Error),
    #[error("Trends service answered {0}")]
    Status(u16),
    #[error("Unexpected trends payload: {0}")]
    Parse(String),
    #[error("Invalid trends URL: {0}")]
    Url(#[from] url::ParseError),
}

impl FetchError {
    /// Only timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Timeout(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout(e.to_string())
        } else {
            FetchError::Http(e)
        }
    }
}

/// Anything that can produce a historical interest series for a keyword.
#[async_trait]
pub trait TrendSource: Send + Sync {
    async fn fetch(&self, keyword: &str) -> Result<Vec<TrendPoint>, FetchError>;
}

/// Google Trends web API: an explore call hands out a token for the
/// TIMESERIES widget, which is then exchanged for the series itself.
pub struct GoogleTrends {
    http_client: HttpClient,
    base_url: String,
    timeframe: String,
    geo: String,
    language: String,
    tz_offset_minutes: i32,
}

#[derive(Debug, Deserialize)]
struct ExploreResponse {
    widgets: Vec<Widget>,
}

#[derive(Debug, Deserialize)]
struct Widget {
    id: String,
    token: String,
    request: Value,
}

#[derive(Debug, Deserialize)]
struct MultilineResponse {
    default: Timeline,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Timeline {
    timeline_data: Vec<TimelineEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimelineEntry {
    time: String,
    value: Vec<f64>,
    #[serde(default)]
    has_data: Vec<bool>,
}

impl GoogleTrends {
    pub fn new(config: &TrendsConfig) -> Result<Self, FetchError> {
        let http_client = HttpClient::builder()
            .cookie_store(true)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            timeframe: config.timeframe.clone(),
            geo: config.geo.clone(),
            language: config.language.clone(),
            tz_offset_minutes: config.tz_offset_minutes,
        })
    }

    fn api_url(&self, endpoint: &str, req: &str, token: Option<&str>) -> Result<Url, FetchError> {
        let mut url = Url::parse(&format!("{}/trends/api/{}", self.base_url, endpoint))?;
        url.query_pairs_mut()
            .append_pair("hl", &self.language)
            .append_pair("tz", &self.tz_offset_minutes.to_string())
            .append_pair("req", req);
        if let Some(token) = token {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    async fn get_text(&self, url: Url) -> Result<String, FetchError> {
        let response = self.http_client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl TrendSource for GoogleTrends {
    async fn fetch(&self, keyword: &str) -> Result<Vec<TrendPoint>, FetchError> {
        // The API refuses cookieless clients; the landing page sets one.
        self.http_client
            .get(format!("{}/?geo=US", self.base_url))
            .send()
            .await?;

        let explore_req = serde_json::json!({
            "comparisonItem": [{ "keyword": keyword, "time": self.timeframe, "geo": self.geo }],
            "category": 0,
            "property": "",
        })
        .to_string();
        let explore = self
            .get_text(self.api_url("explore", &explore_req, None)?)
            .await?;
        let (token, request) = timeseries_widget(&explore)?;

        let data = self
            .get_text(self.api_url("widgetdata/multiline", &request.to_string(), Some(&token))?)
            .await?;
        let points = parse_timeline(&data)?;
        log::info!("Fetched {} trend points for '{}'", points.len(), keyword);
        Ok(points)
    }
}

/// Drops the `)]}'` guard Google prepends to JSON bodies.
fn strip_guard(body: &str) -> &str {
    body.find('{').map(|start| &body[start..]).unwrap_or(body)
}

fn timeseries_widget(body: &str) -> Result<(String, Value), FetchError> {
    let explore: ExploreResponse =
        serde_json::from_str(strip_guard(body)).map_err(|e| FetchError::Parse(e.to_string()))?;
    explore
        .widgets
        .into_iter()
        .find(|w| w.id == "TIMESERIES")
        .map(|w| (w.token, w.request))
        .ok_or_else(|| FetchError::Parse("no TIMESERIES widget".into()))
}

fn parse_timeline(body: &str) -> Result<Vec<TrendPoint>, FetchError> {
    let response: MultilineResponse =
        serde_json::from_str(strip_guard(body)).map_err(|e| FetchError::Parse(e.to_string()))?;

    let mut points = Vec::with_capacity(response.default.timeline_data.len());
    for entry in response.default.timeline_data {
        if entry.has_data.first() == Some(&false) {
            continue;
        }
        let Some(&value) = entry.value.first() else {
            continue;
        };
        let seconds: i64 = entry
            .time
            .parse()
            .map_err(|_| FetchError::Parse(format!("bad timestamp '{}'", entry.time)))?;
        let date = DateTime::from_timestamp(seconds, 0)
            .ok_or_else(|| FetchError::Parse(format!("timestamp out of range: {seconds}")))?
            .date_naive();
        points.push(TrendPoint { date, value });
    }
    Ok(points)
}
