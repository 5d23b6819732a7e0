//! Search-interest history and a seasonal forecast for a keyword.

pub mod forecast;
pub mod retry;
pub mod source;

use chrono::NaiveDate;
use shared::{SeriesPayload, TrendResponse};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use forecast::{Forecast, ForecastError};
pub use retry::RetryPolicy;
pub use source::{FetchError, GoogleTrends, TrendPoint, TrendSource};

#[derive(Debug, thiserror::Error)]
pub enum TrendError {
    #[error("No keyword given")]
    NoKeywords,
    #[error("No data found for keyword(s): {0}")]
    NoData(String),
    #[error(transparent)]
    Forecast(#[from] ForecastError),
}

pub struct TrendService {
    source: Arc<dyn TrendSource>,
    retry: RetryPolicy,
    forecast_periods: usize,
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn series(points: &[TrendPoint]) -> SeriesPayload {
    SeriesPayload {
        dates: points
            .iter()
            .map(|p| p.date.format(DATE_FORMAT).to_string())
            .collect(),
        values: points.iter().map(|p| p.value).collect(),
    }
}

/// Inner join on date: a date is kept only when every series has it.
fn join_on_date(columns: &[Vec<TrendPoint>]) -> BTreeMap<NaiveDate, Vec<f64>> {
    let mut rows: BTreeMap<NaiveDate, Vec<Option<f64>>> = BTreeMap::new();
    for (i, column) in columns.iter().enumerate() {
        for point in column {
            let row = rows
                .entry(point.date)
                .or_insert_with(|| vec![None; columns.len()]);
            row[i] = Some(point.value);
        }
    }
    rows.into_iter()
        .filter_map(|(date, values)| {
            let values = values.into_iter().collect::<Option<Vec<f64>>>()?;
            Some((date, values))
        })
        .collect()
}

impl TrendService {
    pub fn new(source: Arc<dyn TrendSource>, retry: RetryPolicy, forecast_periods: usize) -> Self {
        Self {
            source,
            retry,
            forecast_periods,
        }
    }

    /// `keywords` is one keyword or a comma-separated list. Every keyword is
    /// fetched; the first one that returned data is forecast.
    pub async fn report(&self, keywords: &str) -> Result<TrendResponse, TrendError> {
        let keywords: Vec<&str> = keywords
            .split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .collect();
        if keywords.is_empty() {
            return Err(TrendError::NoKeywords);
        }

        let mut fetched: Vec<(&str, Vec<TrendPoint>)> = Vec::new();
        for &keyword in &keywords {
            match self.retry.run(keyword, || self.source.fetch(keyword)).await {
                Ok(points) if points.is_empty() => {
                    log::warn!("No trend data for '{}'", keyword);
                }
                Ok(points) => fetched.push((keyword, points)),
                Err(e) => {
                    log::error!("Giving up on '{}': {}", keyword, e);
                }
            }
        }
        if fetched.is_empty() {
            return Err(TrendError::NoData(keywords.join(", ")));
        }

        let columns: Vec<Vec<TrendPoint>> = fetched.iter().map(|(_, p)| p.clone()).collect();
        let history: Vec<TrendPoint> = join_on_date(&columns)
            .into_iter()
            .map(|(date, values)| TrendPoint {
                date,
                value: values[0],
            })
            .collect();
        let keyword = fetched[0].0;
        if history.is_empty() {
            return Err(TrendError::NoData(keywords.join(", ")));
        }

        let forecast = forecast::forecast(&history, self.forecast_periods)?;
        log::info!(
            "Forecast for '{}': peak month {}, low month {}",
            keyword,
            forecast.peak_month,
            forecast.low_month
        );

        Ok(TrendResponse {
            keyword: keyword.to_string(),
            historical_data: series(&history),
            forecast_data: series(&forecast.points),
            peak_month: forecast.peak_month,
            low_month: forecast.low_month,
        })
    }
}
