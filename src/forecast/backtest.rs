use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::consumption::UsageForecaster;
use super::metrics::{ForecastMetrics, ForecastQuality, IntervalMetrics};
use crate::domain::{UsageForecastPoint, UsagePoint};
use crate::error::{DynergyError, Result};

/// Evaluation window: the newest 30 days of hourly data
pub const BACKTEST_HOURS: usize = 30 * 24;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_forecast_kwh: f64,
    pub total_actual_kwh: f64,
    pub error_abs_kwh: f64,
    /// `|Σ forecast − Σ actual| / Σ actual · 100`
    pub error_pct: f64,
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub mean_interval_width: f64,
    pub mean_interval_width_pct: f64,
    pub interval_coverage_pct: f64,
    pub predictions: usize,
    pub period_days: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BacktestRow {
    pub timestamp: NaiveDateTime,
    pub forecast: f64,
    pub lower: f64,
    pub upper: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub date: NaiveDate,
    pub forecast: f64,
    pub actual: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub metrics: BacktestMetrics,
    pub quality: ForecastQuality,
    pub hourly: Vec<BacktestRow>,
    pub daily: Vec<DailyTotal>,
}

/// Replay the last 30 days: train on everything before, forecast, compare.
///
/// `history` must be hourly and sorted, as produced by the load profile shaper.
pub fn backtest(forecaster: &dyn UsageForecaster, history: &[UsagePoint]) -> Result<BacktestReport> {
    if history.len() <= BACKTEST_HOURS {
        return Err(DynergyError::invalid(format!(
            "backtest needs more than {BACKTEST_HOURS} hourly rows, got {}",
            history.len()
        )));
    }

    let mut window = &history[history.len() - BACKTEST_HOURS..];
    if let Some(last) = window.last() {
        let last_day = last.timestamp.date();
        let hours_in_last_day = window
            .iter()
            .filter(|u| u.timestamp.date() == last_day)
            .count();
        if hours_in_last_day < 24 {
            info!(
                "Dropping incomplete last day {} with {} hours",
                last_day, hours_in_last_day
            );
            let keep = window.len() - hours_in_last_day;
            window = &window[..keep];
        }
    }
    let (start, end) = match (window.first(), window.last()) {
        (Some(s), Some(e)) => (s.timestamp, e.timestamp),
        _ => return Err(DynergyError::invalid("backtest window is empty")),
    };

    let train: Vec<UsagePoint> = history
        .iter()
        .filter(|u| u.timestamp < start)
        .copied()
        .collect();

    let horizon_days = window.len() / 24 + 1;
    let forecast = forecaster.forecast_usage(&train, horizon_days)?;
    let aligned = align_forecast(&forecast, start, end, window.len());

    let hourly: Vec<BacktestRow> = window
        .iter()
        .zip(&aligned)
        .map(|(actual, f)| BacktestRow {
            timestamp: actual.timestamp,
            forecast: f.kwh.max(0.0),
            lower: f.lower.max(0.0),
            upper: f.upper.max(0.0),
            actual: actual.kwh,
        })
        .collect();

    let total_forecast_kwh: f64 = hourly.iter().map(|r| r.forecast).sum();
    let total_actual_kwh: f64 = hourly.iter().map(|r| r.actual).sum();
    if !(total_actual_kwh > 0.0) {
        return Err(DynergyError::invalid(
            "actual usage in the backtest window sums to zero",
        ));
    }

    let actual: Vec<f64> = hourly.iter().map(|r| r.actual).collect();
    let predicted: Vec<f64> = hourly.iter().map(|r| r.forecast).collect();
    let lower: Vec<f64> = hourly.iter().map(|r| r.lower).collect();
    let upper: Vec<f64> = hourly.iter().map(|r| r.upper).collect();
    let point = ForecastMetrics::calculate(&actual, &predicted)?;
    let interval = IntervalMetrics::calculate(&actual, &predicted, &lower, &upper)?;

    let daily = daily_totals(&hourly);
    let error_abs_kwh = (total_forecast_kwh - total_actual_kwh).abs();
    let error_pct = error_abs_kwh / total_actual_kwh * 100.0;

    let metrics = BacktestMetrics {
        total_forecast_kwh,
        total_actual_kwh,
        error_abs_kwh,
        error_pct,
        mae: point.mae,
        mse: point.mse,
        rmse: point.rmse,
        mean_interval_width: interval.mean_width,
        mean_interval_width_pct: interval.mean_width_pct,
        interval_coverage_pct: interval.coverage_pct,
        predictions: hourly.len(),
        period_days: daily.len(),
    };
    info!(
        "Backtest over {} days: forecast {:.2} kWh vs actual {:.2} kWh ({:.2}% error), MAE {:.4}",
        metrics.period_days, total_forecast_kwh, total_actual_kwh, error_pct, point.mae
    );

    Ok(BacktestReport {
        quality: ForecastQuality::from_error_pct(error_pct),
        metrics,
        hourly,
        daily,
    })
}

/// Forecast rows inside `[start, end]`, extended from the rows after `end`
/// when timestamps are missing.
fn align_forecast(
    forecast: &[UsageForecastPoint],
    start: NaiveDateTime,
    end: NaiveDateTime,
    needed: usize,
) -> Vec<UsageForecastPoint> {
    let mut aligned: Vec<UsageForecastPoint> = forecast
        .iter()
        .filter(|f| f.timestamp >= start && f.timestamp <= end)
        .copied()
        .collect();
    if aligned.len() < needed {
        warn!(
            "Forecast covers {} of {} backtest hours, extending from the tail",
            aligned.len(),
            needed
        );
        let missing = needed - aligned.len();
        aligned.extend(forecast.iter().filter(|f| f.timestamp > end).take(missing).copied());
    }
    aligned.truncate(needed);
    aligned
}

fn daily_totals(rows: &[BacktestRow]) -> Vec<DailyTotal> {
    rows.iter()
        .chunk_by(|r| r.timestamp.date())
        .into_iter()
        .map(|(date, group)| {
            let (forecast, actual) = group.fold((0.0, 0.0), |(f, a), r| (f + r.forecast, a + r.actual));
            DailyTotal {
                date,
                forecast,
                actual,
            }
        })
        .collect()
}
