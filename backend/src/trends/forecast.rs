//! Additive trend-plus-seasonality model on monthly means.
//!
//! The series is averaged per calendar month, a straight line is fitted by
//! least squares, and each calendar month's seasonal effect is the mean
//! residual observed in that month (re-centred to sum to zero over the
//! months seen). Forecasts extend the line and add the month's effect.

use chrono::{Datelike, Months, NaiveDate};
use std::collections::BTreeMap;

use super::source::TrendPoint;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ForecastError {
    #[error("Need at least 2 months of data to forecast, got {0}")]
    InsufficientData(usize),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Forecast {
    /// First-of-month dates with the value predicted for that month.
    pub points: Vec<TrendPoint>,
    /// Calendar months (1-12) with the highest and lowest seasonal effect.
    pub peak_month: u32,
    pub low_month: u32,
    /// Seasonal effect per calendar month; index 0 is January.
    pub seasonality: [f64; 12],
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn month_index(date: NaiveDate) -> i64 {
    date.year() as i64 * 12 + date.month0() as i64
}

/// Averages points that fall in the same calendar month. Months with no
/// observations are absent, not zero.
pub fn monthly_means(points: &[TrendPoint]) -> Vec<TrendPoint> {
    let mut buckets: BTreeMap<NaiveDate, (f64, usize)> = BTreeMap::new();
    for point in points {
        let bucket = buckets.entry(month_start(point.date)).or_insert((0.0, 0));
        bucket.0 += point.value;
        bucket.1 += 1;
    }
    buckets
        .into_iter()
        .map(|(date, (sum, count))| TrendPoint {
            date,
            value: sum / count as f64,
        })
        .collect()
}

/// Ordinary least squares `y = intercept + slope * x`.
fn linear_fit(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean_x = xs.iter().sum::<f64>() / n;
    let mean_y = ys.iter().sum::<f64>() / n;
    let (mut sxy, mut sxx) = (0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x) * (x - mean_x);
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    (mean_y - slope * mean_x, slope)
}

pub fn forecast(points: &[TrendPoint], periods: usize) -> Result<Forecast, ForecastError> {
    let monthly = monthly_means(points);
    if monthly.len() < 2 {
        return Err(ForecastError::InsufficientData(monthly.len()));
    }

    let origin = month_index(monthly[0].date);
    let xs: Vec<f64> = monthly
        .iter()
        .map(|p| (month_index(p.date) - origin) as f64)
        .collect();
    let ys: Vec<f64> = monthly.iter().map(|p| p.value).collect();
    let (intercept, slope) = linear_fit(&xs, &ys);

    let mut sums = [0.0; 12];
    let mut counts = [0usize; 12];
    for (point, x) in monthly.iter().zip(&xs) {
        let m = point.date.month0() as usize;
        sums[m] += point.value - (intercept + slope * x);
        counts[m] += 1;
    }
    let observed: Vec<usize> = (0..12).filter(|&m| counts[m] > 0).collect();
    let mut seasonality = [0.0; 12];
    for &m in &observed {
        seasonality[m] = sums[m] / counts[m] as f64;
    }
    let centre = observed.iter().map(|&m| seasonality[m]).sum::<f64>() / observed.len() as f64;
    for &m in &observed {
        seasonality[m] -= centre;
    }

    // Ties go to the earlier month.
    let mut peak = observed[0];
    let mut low = observed[0];
    for &m in &observed[1..] {
        if seasonality[m] > seasonality[peak] {
            peak = m;
        }
        if seasonality[m] < seasonality[low] {
            low = m;
        }
    }

    let last = monthly[monthly.len() - 1].date;
    let last_x = xs[xs.len() - 1];
    let points = (1..=periods)
        .filter_map(|step| {
            let date = last.checked_add_months(Months::new(step as u32))?;
            let x = last_x + step as f64;
            let value = intercept + slope * x + seasonality[date.month0() as usize];
            Some(TrendPoint { date, value })
        })
        .collect();

    Ok(Forecast {
        points,
        peak_month: peak as u32 + 1,
        low_month: low as u32 + 1,
        seasonality,
    })
}
