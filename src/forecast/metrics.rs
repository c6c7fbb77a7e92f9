//! Forecast accuracy metrics
//!
//! Point accuracy (MAE, MSE, RMSE, MAPE, R²) plus prediction interval
//! coverage, used by the backtest harness.

use serde::{Deserialize, Serialize};
use std::fmt;
use strum::Display;

use crate::error::DynergyError;

/// Point forecast accuracy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Mean Squared Error
    pub mse: f64,
    /// Root Mean Square Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error (%), over non-zero actuals
    pub mape: f64,
    /// R² (coefficient of determination)
    pub r2: f64,
    pub sample_count: usize,
    pub max_error: f64,
}

impl ForecastMetrics {
    pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Self, ForecastMetricsError> {
        if actual.len() != predicted.len() {
            return Err(ForecastMetricsError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }
        if actual.is_empty() {
            return Err(ForecastMetricsError::EmptyData);
        }

        let n = actual.len() as f64;
        let errors: Vec<f64> = actual.iter().zip(predicted).map(|(a, p)| a - p).collect();

        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let sse: f64 = errors.iter().map(|e| e * e).sum();
        let mse = sse / n;

        // Percentage error skips zero actuals (night hours with no draw)
        let pct: Vec<f64> = actual
            .iter()
            .zip(&errors)
            .filter(|(a, _)| a.abs() > 1e-6)
            .map(|(a, e)| e.abs() / a.abs() * 100.0)
            .collect();
        let mape = if pct.is_empty() {
            0.0
        } else {
            pct.iter().sum::<f64>() / pct.len() as f64
        };

        let mean_actual = actual.iter().sum::<f64>() / n;
        let total_variance: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();
        let r2 = if total_variance > 1e-10 {
            1.0 - sse / total_variance
        } else {
            0.0
        };

        let max_error = errors.iter().map(|e| e.abs()).fold(0.0f64, f64::max);

        Ok(ForecastMetrics {
            mae,
            mse,
            rmse: mse.sqrt(),
            mape,
            r2,
            sample_count: actual.len(),
            max_error,
        })
    }
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE={:.3}, RMSE={:.3}, MAPE={:.2}%, R²={:.3}, n={}",
            self.mae, self.rmse, self.mape, self.r2, self.sample_count
        )
    }
}

/// Prediction interval summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntervalMetrics {
    /// Share of actuals inside `[lower, upper]`, in percent
    pub coverage_pct: f64,
    pub mean_width: f64,
    /// Mean width relative to the mean point forecast, in percent
    pub mean_width_pct: f64,
}

impl IntervalMetrics {
    pub fn calculate(
        actual: &[f64],
        predicted: &[f64],
        lower: &[f64],
        upper: &[f64],
    ) -> Result<Self, ForecastMetricsError> {
        let n = actual.len();
        for len in [predicted.len(), lower.len(), upper.len()] {
            if len != n {
                return Err(ForecastMetricsError::DimensionMismatch {
                    actual: n,
                    predicted: len,
                });
            }
        }
        if n == 0 {
            return Err(ForecastMetricsError::EmptyData);
        }

        let inside = (0..n)
            .filter(|&i| actual[i] >= lower[i] && actual[i] <= upper[i])
            .count();
        let mean_width = (0..n).map(|i| upper[i] - lower[i]).sum::<f64>() / n as f64;
        let mean_pred = predicted.iter().sum::<f64>() / n as f64;
        let mean_width_pct = if mean_pred.abs() > 1e-9 {
            mean_width / mean_pred * 100.0
        } else {
            0.0
        };

        Ok(IntervalMetrics {
            coverage_pct: inside as f64 / n as f64 * 100.0,
            mean_width,
            mean_width_pct,
        })
    }
}

/// Forecast quality classification from the total percentage error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ForecastQuality {
    Excellent, // < 10%
    Good,      // 10-20%
    Fair,      // 20-30%
    Poor,      // >= 30%
}

impl ForecastQuality {
    pub fn from_error_pct(error_pct: f64) -> Self {
        if error_pct < 10.0 {
            ForecastQuality::Excellent
        } else if error_pct < 20.0 {
            ForecastQuality::Good
        } else if error_pct < 30.0 {
            ForecastQuality::Fair
        } else {
            ForecastQuality::Poor
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ForecastMetricsError {
    #[error("Dimension mismatch: actual={actual}, predicted={predicted}")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("Empty data provided")]
    EmptyData,
}

impl From<ForecastMetricsError> for DynergyError {
    fn from(e: ForecastMetricsError) -> Self {
        DynergyError::InvalidInput(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_perfect_forecast() {
        let actual = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let metrics = ForecastMetrics::calculate(&actual, &actual).unwrap();

        assert_eq!(metrics.mae, 0.0);
        assert_eq!(metrics.mse, 0.0);
        assert_eq!(metrics.mape, 0.0);
        assert_eq!(metrics.r2, 1.0);
    }

    #[test]
    fn test_forecast_with_errors() {
        let actual = vec![100.0, 200.0, 300.0, 400.0, 500.0];
        let predicted = vec![110.0, 190.0, 310.0, 390.0, 510.0];

        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();

        assert!((metrics.mae - 10.0).abs() < 1e-12);
        assert!((metrics.mse - 100.0).abs() < 1e-12);
        assert!((metrics.rmse - 10.0).abs() < 1e-12);
        assert!(metrics.r2 > 0.95);
        assert!((metrics.max_error - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_zero_actuals_skipped_in_mape() {
        let actual = vec![0.0, 2.0];
        let predicted = vec![0.5, 1.0];
        let metrics = ForecastMetrics::calculate(&actual, &predicted).unwrap();
        assert!((metrics.mape - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = ForecastMetrics::calculate(&[1.0, 2.0, 3.0], &[1.0, 2.0]);
        assert!(result.is_err());
        let err: DynergyError = result.unwrap_err().into();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[test]
    fn test_interval_coverage() {
        let actual = [1.0, 2.0, 3.0, 10.0];
        let predicted = [1.0, 2.0, 3.0, 4.0];
        let lower = [0.5, 1.5, 2.5, 3.5];
        let upper = [1.5, 2.5, 3.5, 4.5];
        let m = IntervalMetrics::calculate(&actual, &predicted, &lower, &upper).unwrap();
        assert!((m.coverage_pct - 75.0).abs() < 1e-12);
        assert!((m.mean_width - 1.0).abs() < 1e-12);
        assert!((m.mean_width_pct - 40.0).abs() < 1e-12);
    }

    #[test]
    fn test_quality_bands() {
        assert_eq!(ForecastQuality::from_error_pct(4.0), ForecastQuality::Excellent);
        assert_eq!(ForecastQuality::from_error_pct(10.0), ForecastQuality::Good);
        assert_eq!(ForecastQuality::from_error_pct(29.9), ForecastQuality::Fair);
        assert_eq!(ForecastQuality::from_error_pct(30.0), ForecastQuality::Poor);
    }
}
