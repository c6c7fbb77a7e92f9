use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ============================================================================
// Price series
// ============================================================================

/// Hourly day-ahead wholesale price in zone-local wall time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: NaiveDateTime,
    pub wholesale_eur_per_mwh: f64,
}

impl PricePoint {
    pub fn new(timestamp: NaiveDateTime, wholesale_eur_per_mwh: f64) -> Self {
        Self {
            timestamp,
            wholesale_eur_per_mwh,
        }
    }
}

/// Per-row decomposition of a forecast value
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ForecastComponents {
    pub trend: f64,
    pub yearly: f64,
    pub weekly: f64,
    pub daily: f64,
    pub hourly: f64,
}

/// Retail price row. All money values are in EUR/MWh.
///
/// `wholesale` is the model point forecast (in-sample fit for training
/// rows), `energy_component` its zero-censored expectation and
/// `retail_total` the energy component plus structural markup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetailPricePoint {
    pub timestamp: NaiveDateTime,
    pub wholesale: f64,
    pub wholesale_lower: Option<f64>,
    pub wholesale_upper: Option<f64>,
    pub energy_component: f64,
    pub retail_total: f64,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub components: Option<ForecastComponents>,
}

impl RetailPricePoint {
    pub fn retail_eur_per_kwh(&self) -> f64 {
        self.retail_total / 1000.0
    }

    pub fn interval_width(&self) -> Option<f64> {
        match (self.lower, self.upper) {
            (Some(l), Some(u)) => Some(u - l),
            _ => None,
        }
    }
}

// ============================================================================
// Usage series
// ============================================================================

/// Hourly energy use in kWh
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsagePoint {
    pub timestamp: NaiveDateTime,
    pub kwh: f64,
}

impl UsagePoint {
    pub fn new(timestamp: NaiveDateTime, kwh: f64) -> Self {
        Self { timestamp, kwh }
    }
}

/// Forecast hourly usage with prediction interval
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageForecastPoint {
    pub timestamp: NaiveDateTime,
    pub kwh: f64,
    pub lower: f64,
    pub upper: f64,
}

impl From<UsageForecastPoint> for UsagePoint {
    fn from(p: UsageForecastPoint) -> Self {
        UsagePoint::new(p.timestamp, p.kwh)
    }
}

/// Raw meter sample. `value` is average power in kW over the sampling step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeterReading {
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

pub fn total_kwh(usage: &[UsagePoint]) -> f64 {
    usage.iter().map(|u| u.kwh).sum()
}
