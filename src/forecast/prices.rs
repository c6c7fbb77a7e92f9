use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use std::collections::hash_map::DefaultHasher;
use std::f64::consts::{PI, SQRT_2};
use std::hash::{Hash, Hasher};
use tracing::info;

use super::model::{ModelConfig, ModelPrediction, SeasonalModel, SeasonalityMode};
use crate::domain::{PricePoint, RetailPricePoint};
use crate::error::Result;

/// z-value of the two-sided 95% interval the retail transform assumes
const Z_95: f64 = 1.96;
const MIN_SIGMA: f64 = 1e-6;

/// Structural retail additions on top of the wholesale energy price, EUR/MWh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetailParams {
    pub profile_cost: f64,
    pub risk_premium: f64,
    pub supplier_margin: f64,
    pub floor: f64,
}

impl Default for RetailParams {
    fn default() -> Self {
        Self {
            profile_cost: 10.0,
            risk_premium: 5.0,
            supplier_margin: 55.0,
            floor: 0.0,
        }
    }
}

impl RetailParams {
    pub fn markup(&self) -> f64 {
        self.profile_cost + self.risk_premium + self.supplier_margin
    }
}

/// `E[max(0, Y)]` for `Y ~ N(mu, sigma²)`
pub fn expected_positive_part(mu: f64, sigma: f64) -> f64 {
    if !(sigma > 0.0) {
        return mu.max(0.0);
    }
    let x = mu / sigma;
    let cdf = 0.5 * erfc(-x / SQRT_2);
    let pdf = (-0.5 * x * x).exp() / (2.0 * PI).sqrt();
    mu * cdf + sigma * pdf
}

/// Convert wholesale model output to retail prices.
///
/// The energy component is the zero-censored expectation with sigma taken
/// from the 95% interval; bounds are clipped naively. The markup is added
/// to all three.
pub fn apply_retail_pricing(
    predictions: &[ModelPrediction],
    params: &RetailParams,
) -> Vec<RetailPricePoint> {
    let markup = params.markup();
    predictions
        .iter()
        .map(|p| {
            let sigma = ((p.upper - p.lower) / (2.0 * Z_95)).max(MIN_SIGMA);
            let energy = expected_positive_part(p.yhat, sigma).max(params.floor);
            let retail_total = energy + markup;
            let lower = (p.lower.max(params.floor) + markup).min(retail_total);
            let upper = (p.upper.max(params.floor) + markup).max(retail_total);
            RetailPricePoint {
                timestamp: p.timestamp,
                wholesale: p.yhat,
                wholesale_lower: Some(p.lower),
                wholesale_upper: Some(p.upper),
                energy_component: energy,
                retail_total,
                lower: Some(lower),
                upper: Some(upper),
                components: Some(p.components),
            }
        })
        .collect()
}

/// Retail price series covering the training window plus the horizon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceForecast {
    pub fingerprint: String,
    pub horizon_hours: usize,
    pub trained_until: NaiveDateTime,
    pub rows: Vec<RetailPricePoint>,
}

impl PriceForecast {
    /// Rows strictly after the training window
    pub fn future(&self) -> &[RetailPricePoint] {
        let idx = self
            .rows
            .partition_point(|r| r.timestamp <= self.trained_until);
        &self.rows[idx..]
    }
}

pub trait PriceForecaster: Send + Sync {
    /// Identity of a forecast for the given inputs, used as cache key
    fn fingerprint(&self, history: &[PricePoint], horizon_hours: usize) -> String;

    fn forecast(&self, history: &[PricePoint], horizon_hours: usize) -> Result<PriceForecast>;
}

/// Seasonal-model forecaster with the probabilistic retail transform
#[derive(Debug, Clone)]
pub struct SeasonalPriceForecaster {
    model: ModelConfig,
    retail: RetailParams,
}

impl Default for SeasonalPriceForecaster {
    fn default() -> Self {
        Self::new(ModelConfig::price_default(), RetailParams::default())
    }
}

impl SeasonalPriceForecaster {
    pub fn new(model: ModelConfig, retail: RetailParams) -> Self {
        Self { model, retail }
    }

    pub fn with_mode(mode: SeasonalityMode, retail: RetailParams) -> Self {
        Self::new(ModelConfig::price_default().with_mode(mode), retail)
    }

    pub fn retail(&self) -> &RetailParams {
        &self.retail
    }
}

impl PriceForecaster for SeasonalPriceForecaster {
    fn fingerprint(&self, history: &[PricePoint], horizon_hours: usize) -> String {
        let mut hasher = DefaultHasher::new();
        history.len().hash(&mut hasher);
        history.first().map(|p| p.timestamp).hash(&mut hasher);
        history.last().map(|p| p.timestamp).hash(&mut hasher);
        for p in history {
            p.wholesale_eur_per_mwh.to_bits().hash(&mut hasher);
        }
        horizon_hours.hash(&mut hasher);
        format!("{:?}{:?}", self.model, self.retail).hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    fn forecast(&self, history: &[PricePoint], horizon_hours: usize) -> Result<PriceForecast> {
        let rows: Vec<(NaiveDateTime, f64)> = history
            .iter()
            .map(|p| (p.timestamp, p.wholesale_eur_per_mwh))
            .collect();
        let fitted = SeasonalModel::new(self.model.clone()).fit(&rows)?;

        let mut timestamps: Vec<NaiveDateTime> = rows.iter().map(|(ts, _)| *ts).collect();
        timestamps.sort();
        timestamps.extend(fitted.future_timestamps(horizon_hours));

        let predictions = fitted.predict(&timestamps);
        let retail = apply_retail_pricing(&predictions, &self.retail);
        info!(
            "Price forecast ready: {} history rows, {} future hours, markup {:.1} EUR/MWh",
            rows.len(),
            horizon_hours,
            self.retail.markup()
        );

        Ok(PriceForecast {
            fingerprint: self.fingerprint(history, horizon_hours),
            horizon_hours,
            trained_until: fitted.last_timestamp(),
            rows: retail,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ForecastComponents;
    use crate::forecast::model::Seasonality;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn ts(h: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            + chrono::Duration::hours(h)
    }

    fn prediction(yhat: f64, lower: f64, upper: f64) -> ModelPrediction {
        ModelPrediction {
            timestamp: ts(0),
            yhat,
            lower,
            upper,
            components: ForecastComponents::default(),
        }
    }

    #[test]
    fn test_zero_censoring_preserves_positive_mass() {
        let e = expected_positive_part(-5.0, 20.0);
        assert!((e - 5.727).abs() < 0.01, "got {e}");

        // sigma = 20 means a 95% band of +-39.2
        let rows = apply_retail_pricing(&[prediction(-5.0, -44.2, 34.2)], &RetailParams::default());
        assert!((rows[0].energy_component - 5.727).abs() < 0.01);
        assert!((rows[0].retail_total - 75.727).abs() < 0.01);
        assert!((rows[0].lower.unwrap() - 70.0).abs() < 1e-9);
        assert!((rows[0].upper.unwrap() - 104.2).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_sigma_is_plain_clip() {
        assert!((expected_positive_part(12.0, 0.0) - 12.0).abs() < 1e-12);
        assert_eq!(expected_positive_part(-12.0, 0.0), 0.0);
        let rows = apply_retail_pricing(&[prediction(40.0, 40.0, 40.0)], &RetailParams::default());
        assert!((rows[0].retail_total - 110.0).abs() < 1e-6);
    }

    proptest! {
        #[test]
        fn retail_energy_never_negative(
            mu in -500.0f64..500.0,
            half in 0.0f64..300.0,
        ) {
            let rows = apply_retail_pricing(
                &[prediction(mu, mu - half, mu + half)],
                &RetailParams::default(),
            );
            let r = &rows[0];
            prop_assert!(r.energy_component >= 0.0);
            prop_assert!((r.retail_total - r.energy_component - 70.0).abs() < 1e-9);
            prop_assert!(r.lower.unwrap() <= r.retail_total);
            prop_assert!(r.retail_total <= r.upper.unwrap());
        }
    }

    fn synthetic_history(days: i64) -> Vec<PricePoint> {
        (0..days * 24)
            .map(|h| {
                let hour = (h % 24) as f64;
                let shape = (2.0 * PI * hour / 24.0).sin();
                PricePoint::new(ts(h), 90.0 + 30.0 * shape)
            })
            .collect()
    }

    fn small_forecaster() -> SeasonalPriceForecaster {
        let model = ModelConfig {
            seasonalities: vec![
                Seasonality::new("weekly", 168.0, 3),
                Seasonality::new("hourly", 24.0, 6),
            ],
            ..ModelConfig::price_default()
        };
        SeasonalPriceForecaster::new(model, RetailParams::default())
    }

    #[test]
    fn test_forecast_keeps_history_rows() {
        let history = synthetic_history(14);
        let forecast = small_forecaster().forecast(&history, 48).unwrap();
        assert_eq!(forecast.rows.len(), history.len() + 48);
        assert_eq!(forecast.future().len(), 48);
        assert_eq!(forecast.rows[0].timestamp, history[0].timestamp);
        assert!(forecast.rows.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
    }

    #[test]
    fn test_zero_horizon_returns_history_only() {
        let history = synthetic_history(7);
        let forecast = small_forecaster().forecast(&history, 0).unwrap();
        assert_eq!(forecast.rows.len(), history.len());
        assert!(forecast.future().is_empty());
    }

    #[test]
    fn test_fingerprint_changes_with_horizon() {
        let history = synthetic_history(7);
        let f = small_forecaster();
        assert_eq!(f.fingerprint(&history, 24), f.fingerprint(&history, 24));
        assert_ne!(f.fingerprint(&history, 24), f.fingerprint(&history, 48));
    }
}
