use chrono::{Duration, NaiveDateTime};
use tracing::debug;

use super::model::{ModelConfig, SeasonalModel};
use crate::config::ForecastConfig;
use crate::domain::{UsageForecastPoint, UsagePoint};
use crate::error::{DynergyError, Result};

pub const DEFAULT_HISTORY_DAYS: u32 = 90;
pub const DEFAULT_HORIZON_DAYS: u32 = 30;

pub trait UsageForecaster: Send + Sync {
    /// Hourly forecast for the `horizon_days` following the history.
    /// Only future rows are returned.
    fn forecast_usage(
        &self,
        history: &[UsagePoint],
        horizon_days: usize,
    ) -> Result<Vec<UsageForecastPoint>>;
}

#[derive(Debug, Clone)]
pub struct SeasonalUsageForecaster {
    model: ModelConfig,
    history_days: u32,
    horizon_days: u32,
}

impl Default for SeasonalUsageForecaster {
    fn default() -> Self {
        Self::new(ModelConfig::usage_default(), DEFAULT_HISTORY_DAYS)
    }
}

impl SeasonalUsageForecaster {
    pub fn new(model: ModelConfig, history_days: u32) -> Self {
        Self {
            model,
            history_days,
            horizon_days: DEFAULT_HORIZON_DAYS,
        }
    }

    pub fn from_config(config: &ForecastConfig) -> Self {
        Self {
            horizon_days: config.usage_horizon_days,
            ..Self::new(ModelConfig::usage_default(), config.usage_history_days)
        }
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Forecast over the configured horizon
    pub fn forecast_ahead(&self, history: &[UsagePoint]) -> Result<Vec<UsageForecastPoint>> {
        self.forecast_usage(history, self.horizon_days as usize)
    }
}

impl UsageForecaster for SeasonalUsageForecaster {
    fn forecast_usage(
        &self,
        history: &[UsagePoint],
        horizon_days: usize,
    ) -> Result<Vec<UsageForecastPoint>> {
        let last = history
            .iter()
            .map(|u| u.timestamp)
            .max()
            .ok_or_else(|| DynergyError::invalid("usage history is empty"))?;
        let cutoff = last - Duration::days(self.history_days as i64);

        let rows: Vec<(NaiveDateTime, f64)> = history
            .iter()
            .filter(|u| u.timestamp >= cutoff)
            .map(|u| (u.timestamp, u.kwh))
            .collect();
        debug!(
            "Fitting usage model on {} of {} hourly rows",
            rows.len(),
            history.len()
        );

        let fitted = SeasonalModel::new(self.model.clone()).fit(&rows)?;
        let future = fitted.future_timestamps(horizon_days * 24);
        Ok(fitted
            .predict(&future)
            .into_iter()
            .map(|p| UsageForecastPoint {
                timestamp: p.timestamp,
                kwh: p.yhat.max(0.0),
                lower: p.lower.max(0.0),
                upper: p.upper.max(0.0),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::f64::consts::PI;

    fn history(days: i64, f: impl Fn(i64) -> f64) -> Vec<UsagePoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        (0..days * 24)
            .map(|h| UsagePoint::new(start + Duration::hours(h), f(h)))
            .collect()
    }

    #[test]
    fn test_forecast_is_future_only_and_hourly() {
        let hist = history(28, |h| 0.4 + 0.2 * (2.0 * PI * (h % 24) as f64 / 24.0).sin());
        let forecast = SeasonalUsageForecaster::default()
            .forecast_usage(&hist, 7)
            .unwrap();

        assert_eq!(forecast.len(), 7 * 24);
        let last = hist.last().unwrap().timestamp;
        assert_eq!(forecast[0].timestamp, last + Duration::hours(1));
        assert!(forecast
            .windows(2)
            .all(|w| w[1].timestamp - w[0].timestamp == Duration::hours(1)));
    }

    #[test]
    fn test_negative_forecasts_clipped() {
        // Steep decline extrapolates below zero
        let hist = history(20, |h| (10.0 - h as f64 * 0.02).max(0.0));
        let forecast = SeasonalUsageForecaster::default()
            .forecast_usage(&hist, 30)
            .unwrap();
        assert!(forecast
            .iter()
            .all(|p| p.kwh >= 0.0 && p.lower >= 0.0 && p.upper >= 0.0));
        assert!(forecast.iter().any(|p| p.kwh == 0.0));
    }

    #[test]
    fn test_only_recent_history_used() {
        // A level shift long ago must not leak into the forecast
        let hist = history(200, |h| if h < 100 * 24 { 5.0 } else { 1.0 });
        let forecast = SeasonalUsageForecaster::default()
            .forecast_usage(&hist, 1)
            .unwrap();
        let avg = forecast.iter().map(|p| p.kwh).sum::<f64>() / forecast.len() as f64;
        assert!((avg - 1.0).abs() < 0.1, "avg {avg}");
    }

    #[test]
    fn test_configured_horizon_drives_forecast_ahead() {
        let config = ForecastConfig {
            usage_horizon_days: 3,
            usage_history_days: 14,
            ..Default::default()
        };
        let forecaster = SeasonalUsageForecaster::from_config(&config);
        assert_eq!(forecaster.horizon_days(), 3);

        let hist = history(21, |h| 0.5 + 0.1 * ((h % 24) as f64 / 24.0));
        let forecast = forecaster.forecast_ahead(&hist).unwrap();
        assert_eq!(forecast.len(), 3 * 24);
    }

    #[test]
    fn test_empty_history_rejected() {
        let err = SeasonalUsageForecaster::default()
            .forecast_usage(&[], 30)
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }
}
