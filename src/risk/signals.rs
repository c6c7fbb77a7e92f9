use chrono::{Duration, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;
use tracing::debug;

use crate::domain::{PricePoint, UsagePoint};
use crate::error::{DynergyError, Result};
use crate::forecast::PriceForecast;
use crate::utils::{mean, pearson, quantile, std_dev};

// ============================================================================
// Analysis window
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct JoinedHour {
    pub timestamp: NaiveDateTime,
    pub kwh: f64,
    pub price_eur_per_kwh: f64,
}

impl JoinedHour {
    pub fn cost(&self) -> f64 {
        self.kwh * self.price_eur_per_kwh
    }
}

/// Usage and wholesale prices over the most recent `days` where both exist.
///
/// The window ends at the earlier of the two series' last timestamps.
#[derive(Debug, Clone)]
pub struct Overlap {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
    /// Every price inside the window, EUR/kWh
    pub prices: Vec<(NaiveDateTime, f64)>,
    /// Usage inside the window, joined or not
    pub usage: Vec<UsagePoint>,
    /// Hours present in both series
    pub joined: Vec<JoinedHour>,
}

impl Overlap {
    pub fn build(usage: &[UsagePoint], prices: &[PricePoint], days: u32) -> Result<Self> {
        let usage_end = usage
            .iter()
            .map(|u| u.timestamp)
            .max()
            .ok_or_else(|| DynergyError::invalid("usage series is empty"))?;
        let price_end = prices
            .iter()
            .map(|p| p.timestamp)
            .max()
            .ok_or_else(|| DynergyError::EmptyOverlap("price history is empty".into()))?;

        let end = usage_end.min(price_end);
        let start = end - Duration::days(days as i64);
        let in_window = |ts: NaiveDateTime| ts >= start && ts <= end;

        let window_prices: Vec<(NaiveDateTime, f64)> = prices
            .iter()
            .filter(|p| in_window(p.timestamp))
            .map(|p| (p.timestamp, p.wholesale_eur_per_mwh / 1000.0))
            .collect();
        let window_usage: Vec<UsagePoint> = usage
            .iter()
            .filter(|u| in_window(u.timestamp))
            .copied()
            .collect();

        let lookup: HashMap<NaiveDateTime, f64> = window_prices.iter().copied().collect();
        let joined: Vec<JoinedHour> = window_usage
            .iter()
            .filter_map(|u| {
                lookup.get(&u.timestamp).map(|p| JoinedHour {
                    timestamp: u.timestamp,
                    kwh: u.kwh,
                    price_eur_per_kwh: *p,
                })
            })
            .collect();

        if joined.is_empty() {
            return Err(DynergyError::EmptyOverlap(format!(
                "no usage hour matches a price between {start} and {end}"
            )));
        }
        debug!(
            "Risk window {} .. {}: {} prices, {} usage rows, {} joined",
            start,
            end,
            window_prices.len(),
            window_usage.len(),
            joined.len()
        );

        Ok(Self {
            start,
            end,
            prices: window_prices,
            usage: window_usage,
            joined,
        })
    }

    /// Window made only of joined hours
    pub fn from_joined(joined: Vec<JoinedHour>) -> Result<Self> {
        let start = joined
            .iter()
            .map(|j| j.timestamp)
            .min()
            .ok_or_else(|| DynergyError::EmptyOverlap("no joined hours".into()))?;
        let end = joined.iter().map(|j| j.timestamp).max().unwrap_or(start);
        Ok(Self {
            start,
            end,
            prices: joined.iter().map(|j| (j.timestamp, j.price_eur_per_kwh)).collect(),
            usage: joined.iter().map(|j| UsagePoint::new(j.timestamp, j.kwh)).collect(),
            joined,
        })
    }

    fn price_values(&self) -> Vec<f64> {
        self.prices.iter().map(|(_, p)| *p).collect()
    }
}

// ============================================================================
// Weighted-price differential
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Exposure {
    Favourable,
    Unfavourable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceDifferential {
    /// Mean price over the window, EUR/kWh
    pub market_avg_price: f64,
    /// Consumption-weighted price, EUR/kWh
    pub user_weighted_price: f64,
    pub differential: f64,
    pub differential_pct: f64,
    pub exposure: Exposure,
    /// Sample standard deviation of window prices, EUR/kWh
    pub price_volatility: f64,
    pub total_consumption_kwh: f64,
    pub total_cost: f64,
    pub hours: usize,
    pub days_analysed: i64,
}

pub fn price_differential(window: &Overlap) -> PriceDifferential {
    let prices = window.price_values();
    let market_avg_price = mean(&prices).unwrap_or(0.0);
    let price_volatility = std_dev(&prices).unwrap_or(0.0);

    let total_consumption_kwh: f64 = window.joined.iter().map(|j| j.kwh).sum();
    let total_cost: f64 = window.joined.iter().map(JoinedHour::cost).sum();
    let user_weighted_price = if total_consumption_kwh > 0.0 {
        total_cost / total_consumption_kwh
    } else {
        0.0
    };

    let differential = user_weighted_price - market_avg_price;
    let differential_pct = if market_avg_price > 0.0 {
        differential / market_avg_price * 100.0
    } else {
        0.0
    };
    let days_analysed = match (window.prices.first(), window.prices.last()) {
        (Some(first), Some(last)) => (last.0 - first.0).num_days(),
        _ => 0,
    };

    PriceDifferential {
        market_avg_price,
        user_weighted_price,
        differential,
        differential_pct,
        exposure: if differential < 0.0 {
            Exposure::Favourable
        } else {
            Exposure::Unfavourable
        },
        price_volatility,
        total_consumption_kwh,
        total_cost,
        hours: window.joined.len(),
        days_analysed,
    }
}

// ============================================================================
// Coincidence factor
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum CoincidenceRating {
    Low,
    Medium,
    High,
}

impl CoincidenceRating {
    /// `share_pct` of consumption in the `expensive_pct` most expensive hours
    pub fn rate(share_pct: f64, expensive_pct: f64) -> Self {
        if share_pct < expensive_pct - 5.0 {
            CoincidenceRating::Low
        } else if share_pct <= expensive_pct + 10.0 {
            CoincidenceRating::Medium
        } else {
            CoincidenceRating::High
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoincidenceFactor {
    pub expensive_hours_pct: f64,
    /// EUR/kWh
    pub price_threshold: f64,
    pub expensive_hours: usize,
    pub total_hours: usize,
    pub consumption_expensive_kwh: f64,
    pub consumption_total_kwh: f64,
    pub consumption_share_pct: f64,
    pub cost_expensive: f64,
    pub cost_total: f64,
    pub cost_share_pct: f64,
    pub avg_price_expensive: f64,
    pub avg_price_cheap: f64,
    /// 0 when undefined
    pub correlation: f64,
    pub rating: CoincidenceRating,
}

impl CoincidenceFactor {
    /// Share above the neutral baseline, in percentage points
    pub fn deviation(&self) -> f64 {
        self.consumption_share_pct - self.expensive_hours_pct
    }
}

pub fn coincidence_factor(window: &Overlap, expensive_hours_pct: f64) -> Result<CoincidenceFactor> {
    if !(expensive_hours_pct > 0.0 && expensive_hours_pct <= 100.0) {
        return Err(DynergyError::invalid(format!(
            "expensive hours percentage must be in (0, 100], got {expensive_hours_pct}"
        )));
    }
    let prices: Vec<f64> = window.joined.iter().map(|j| j.price_eur_per_kwh).collect();
    let usage: Vec<f64> = window.joined.iter().map(|j| j.kwh).collect();
    let threshold = quantile(&prices, 1.0 - expensive_hours_pct / 100.0)
        .ok_or_else(|| DynergyError::EmptyOverlap("no joined hours".into()))?;

    let (expensive, cheap): (Vec<&JoinedHour>, Vec<&JoinedHour>) = window
        .joined
        .iter()
        .partition(|j| j.price_eur_per_kwh >= threshold);

    let sum_kwh = |hours: &[&JoinedHour]| hours.iter().map(|j| j.kwh).sum::<f64>();
    let sum_cost = |hours: &[&JoinedHour]| hours.iter().map(|j| j.cost()).sum::<f64>();
    let avg_price = |hours: &[&JoinedHour]| {
        let p: Vec<f64> = hours.iter().map(|j| j.price_eur_per_kwh).collect();
        mean(&p).unwrap_or(0.0)
    };

    let consumption_total_kwh: f64 = usage.iter().sum();
    let consumption_expensive_kwh = sum_kwh(&expensive);
    let cost_total: f64 = window.joined.iter().map(JoinedHour::cost).sum();
    let cost_expensive = sum_cost(&expensive);
    let share = |part: f64, total: f64| if total > 0.0 { part / total * 100.0 } else { 0.0 };
    let consumption_share_pct = share(consumption_expensive_kwh, consumption_total_kwh);

    Ok(CoincidenceFactor {
        expensive_hours_pct,
        price_threshold: threshold,
        expensive_hours: expensive.len(),
        total_hours: window.joined.len(),
        consumption_expensive_kwh,
        consumption_total_kwh,
        consumption_share_pct,
        cost_expensive,
        cost_total,
        cost_share_pct: share(cost_expensive, cost_total),
        avg_price_expensive: avg_price(&expensive),
        avg_price_cheap: avg_price(&cheap),
        correlation: pearson(&usage, &prices).unwrap_or(0.0),
        rating: CoincidenceRating::rate(consumption_share_pct, expensive_hours_pct),
    })
}

// ============================================================================
// Load profile
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourOfDay {
    pub hour: u32,
    pub avg_usage_kwh: f64,
    pub avg_price_eur_per_kwh: f64,
    pub samples: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadProfile {
    /// One entry per hour 0..=23
    pub hours: Vec<HourOfDay>,
    pub peak_usage_hour: u32,
    pub lowest_usage_hour: u32,
    pub peak_price_hour: u32,
    pub lowest_price_hour: u32,
    pub correlation: f64,
    pub days_analysed: i64,
}

pub fn load_profile(window: &Overlap) -> LoadProfile {
    let mut usage_by_hour: [Vec<f64>; 24] = Default::default();
    let mut price_by_hour: [Vec<f64>; 24] = Default::default();
    for u in &window.usage {
        usage_by_hour[u.timestamp.hour() as usize].push(u.kwh);
    }
    for (ts, p) in &window.prices {
        price_by_hour[ts.hour() as usize].push(*p);
    }

    let hours: Vec<HourOfDay> = (0..24u32)
        .map(|h| {
            let usage = &usage_by_hour[h as usize];
            HourOfDay {
                hour: h,
                avg_usage_kwh: mean(usage).unwrap_or(0.0),
                avg_price_eur_per_kwh: mean(&price_by_hour[h as usize]).unwrap_or(0.0),
                samples: usage.len(),
            }
        })
        .collect();

    let with_usage: Vec<&HourOfDay> = hours.iter().filter(|h| h.avg_usage_kwh > 0.0).collect();
    let xs: Vec<f64> = with_usage.iter().map(|h| h.avg_usage_kwh).collect();
    let ys: Vec<f64> = with_usage.iter().map(|h| h.avg_price_eur_per_kwh).collect();

    let days_analysed = match (window.usage.first(), window.usage.last()) {
        (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_days(),
        _ => 0,
    };

    LoadProfile {
        peak_usage_hour: extreme_hour(&hours, |h| h.avg_usage_kwh, true),
        lowest_usage_hour: extreme_hour(&hours, |h| h.avg_usage_kwh, false),
        peak_price_hour: extreme_hour(&hours, |h| h.avg_price_eur_per_kwh, true),
        lowest_price_hour: extreme_hour(&hours, |h| h.avg_price_eur_per_kwh, false),
        correlation: pearson(&xs, &ys).unwrap_or(0.0),
        days_analysed,
        hours,
    }
}

/// First hour wins on ties
fn extreme_hour(hours: &[HourOfDay], key: impl Fn(&HourOfDay) -> f64, highest: bool) -> u32 {
    let mut best: Option<&HourOfDay> = None;
    for h in hours {
        let better = match best {
            None => true,
            Some(b) if highest => key(h) > key(b),
            Some(b) => key(h) < key(b),
        };
        if better {
            best = Some(h);
        }
    }
    best.map(|h| h.hour).unwrap_or(0)
}

/// Sample standard deviation of wholesale prices, EUR/kWh, over the last
/// `days` of the history. `None` with fewer than two prices in range.
pub fn historic_volatility(prices: &[PricePoint], days: u32) -> Option<f64> {
    let end = prices.iter().map(|p| p.timestamp).max()?;
    let start = end - Duration::days(days as i64);
    let recent: Vec<f64> = prices
        .iter()
        .filter(|p| p.timestamp >= start)
        .map(|p| p.wholesale_eur_per_mwh / 1000.0)
        .collect();
    std_dev(&recent)
}

// ============================================================================
// Forecast price volatility
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastVolatility {
    /// Sample standard deviation of forecast retail prices, EUR/kWh
    pub std_dev_eur_per_kwh: f64,
    /// Mean interval width, EUR/kWh, when the forecast carries intervals
    pub avg_interval_width_eur_per_kwh: Option<f64>,
}

/// Spread of the future retail prices. `None` with fewer than two future rows.
pub fn forecast_volatility(forecast: &PriceForecast) -> Option<ForecastVolatility> {
    let future = forecast.future();
    let retail: Vec<f64> = future.iter().map(|r| r.retail_eur_per_kwh()).collect();
    let std_dev_eur_per_kwh = std_dev(&retail)?;
    let widths: Vec<f64> = future
        .iter()
        .filter_map(|r| r.interval_width())
        .map(|w| w / 1000.0)
        .collect();
    Some(ForecastVolatility {
        std_dev_eur_per_kwh,
        avg_interval_width_eur_per_kwh: mean(&widths),
    })
}
