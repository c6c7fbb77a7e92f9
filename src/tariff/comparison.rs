use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{info, warn};

use super::cost::{CostEngine, CostResult, DegradedReason};
use crate::domain::{BillingWindow, MeterReading, RetailPricePoint, Tariff, UsagePoint};
use crate::error::Result;
use crate::forecast::UsageForecaster;
use crate::profile::{shape_meter, ReferenceProfile};

/// What is known about a household's consumption
#[derive(Debug, Clone)]
pub enum Household {
    /// Annual consumption in kWh, spread by the reference profile
    Annual(f64),
    /// Hourly kWh history from a smart meter
    Meter(Vec<UsagePoint>),
}

impl Household {
    pub fn from_meter(readings: &[MeterReading]) -> Result<Self> {
        Ok(Household::Meter(shape_meter(readings)?))
    }

    pub fn has_meter_data(&self) -> bool {
        matches!(self, Household::Meter(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub rank: usize,
    pub tariff: String,
    pub provider: Option<String>,
    pub indexed: bool,
    pub cost: CostResult,
    /// Saving against the most expensive tariff in the comparison, EUR
    pub savings_vs_most_expensive: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    /// Cheapest first
    pub entries: Vec<ComparisonEntry>,
    pub degraded: bool,
}

impl Comparison {
    pub fn cheapest(&self) -> Option<&ComparisonEntry> {
        self.entries.first()
    }
}

/// Costs a tariff catalogue for one household.
pub struct TariffComparator {
    engine: CostEngine,
    reference: Option<ReferenceProfile>,
    usage_forecaster: Box<dyn UsageForecaster>,
}

impl TariffComparator {
    pub fn new(
        reference: Option<ReferenceProfile>,
        usage_forecaster: Box<dyn UsageForecaster>,
    ) -> Self {
        Self {
            engine: CostEngine::new(),
            reference,
            usage_forecaster,
        }
    }

    pub fn compare(
        &self,
        tariffs: &[Tariff],
        household: &Household,
        prices: Option<&[RetailPricePoint]>,
    ) -> Result<Comparison> {
        // Meter forecasts depend only on the window length
        let mut forecasts: HashMap<i64, Vec<UsagePoint>> = HashMap::new();
        let mut results = Vec::with_capacity(tariffs.len());

        for tariff in tariffs {
            let window = tariff.billing_window();
            let usage = match household {
                Household::Annual(kwh) => match &self.reference {
                    Some(profile) => Some(profile.usage_for_window(*kwh, &window)?),
                    None => None,
                },
                Household::Meter(history) => {
                    let days = window.days();
                    if !forecasts.contains_key(&days) {
                        // One spare day so a forecast starting mid-day still covers the window
                        let forecast = self
                            .usage_forecaster
                            .forecast_usage(history, days as usize + 1)?;
                        forecasts.insert(days, forecast.into_iter().map(UsagePoint::from).collect());
                    }
                    forecasts
                        .get(&days)
                        .map(|forecast| redate_onto_window(forecast, &window))
                }
            };

            let result = match usage {
                Some(usage) => self.engine.cost(tariff, &usage, prices)?,
                None => {
                    warn!("No reference profile available for annual consumption");
                    self.engine
                        .fixed_charges_only(tariff, DegradedReason::MissingUsage)?
                }
            };
            results.push((tariff, result));
        }

        results.sort_by(|a, b| a.1.total_cost.total_cmp(&b.1.total_cost));
        let most_expensive = results
            .iter()
            .map(|(_, r)| r.total_cost)
            .fold(f64::NEG_INFINITY, f64::max);
        let degraded = results.iter().any(|(_, r)| r.is_degraded());

        let entries: Vec<ComparisonEntry> = results
            .into_iter()
            .enumerate()
            .map(|(i, (tariff, cost))| ComparisonEntry {
                rank: i + 1,
                tariff: tariff.name().to_string(),
                provider: tariff.provider().map(str::to_string),
                indexed: tariff.is_indexed(),
                savings_vs_most_expensive: most_expensive - cost.total_cost,
                cost,
            })
            .collect();

        if let Some(best) = entries.first() {
            info!(
                "Compared {} tariffs, cheapest '{}' at {:.2} EUR",
                entries.len(),
                best.tariff,
                best.cost.total_cost
            );
        }
        Ok(Comparison { entries, degraded })
    }
}

/// Move a usage forecast onto a billing window in whole days, starting
/// from its first midnight, so hour-of-day shape is kept.
fn redate_onto_window(forecast: &[UsagePoint], window: &BillingWindow) -> Vec<UsagePoint> {
    let Some(first_midnight) = forecast
        .iter()
        .map(|u| u.timestamp)
        .find(|ts| ts.hour() == 0)
    else {
        return Vec::new();
    };
    let window_start = window.start.and_time(NaiveTime::MIN);
    let window_end = window.end.and_time(NaiveTime::MIN);
    let shift = window_start - first_midnight;

    let usage: Vec<UsagePoint> = forecast
        .iter()
        .filter(|u| u.timestamp >= first_midnight)
        .map(|u| UsagePoint::new(u.timestamp + shift, u.kwh))
        .filter(|u| u.timestamp < window_end)
        .collect();
    if usage.len() < window.hours() {
        warn!(
            "Usage forecast covers {} of {} window hours",
            usage.len(),
            window.hours()
        );
    }
    usage
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FixedTariff, IndexedTariff, UsageForecastPoint};
    use chrono::{Duration, NaiveDate, NaiveDateTime};

    struct FlatUsage(f64);

    impl UsageForecaster for FlatUsage {
        fn forecast_usage(
            &self,
            history: &[UsagePoint],
            horizon_days: usize,
        ) -> Result<Vec<UsageForecastPoint>> {
            let last = history.last().map(|u| u.timestamp).unwrap();
            Ok((1..=horizon_days as i64 * 24)
                .map(|h| UsageForecastPoint {
                    timestamp: last + Duration::hours(h),
                    kwh: self.0,
                    lower: self.0,
                    upper: self.0,
                })
                .collect())
        }
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn at(date: NaiveDate) -> NaiveDateTime {
        date.and_hms_opt(0, 0, 0).unwrap()
    }

    fn catalogue(start: NaiveDate) -> Vec<Tariff> {
        vec![
            Tariff::Fixed(FixedTariff {
                name: "Expensive".into(),
                provider: None,
                base_fee_per_month: 12.0,
                unit_rate_eur_per_kwh: 0.40,
                start_date: start,
                min_duration_months: None,
                postal_code: None,
                features: vec![],
            }),
            Tariff::Fixed(FixedTariff {
                name: "Cheap".into(),
                provider: Some("Stadtwerk".into()),
                base_fee_per_month: 10.0,
                unit_rate_eur_per_kwh: 0.30,
                start_date: start,
                min_duration_months: Some(12),
                postal_code: None,
                features: vec![],
            }),
        ]
    }

    fn flat_reference() -> ReferenceProfile {
        let start = at(day(2025, 1, 1));
        let hourly = (0..365 * 24)
            .map(|h| UsagePoint::new(start + Duration::hours(h), 0.5))
            .collect();
        ReferenceProfile::from_hourly(hourly).unwrap()
    }

    #[test]
    fn test_annual_comparison_sorted_with_savings() {
        let comparator = TariffComparator::new(Some(flat_reference()), Box::new(FlatUsage(1.0)));
        let start = day(2025, 1, 15);
        let result = comparator
            .compare(&catalogue(start), &Household::Annual(3500.0), None)
            .unwrap();

        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.cheapest().unwrap().tariff, "Cheap");
        assert_eq!(result.entries[0].rank, 1);
        assert_eq!(result.entries[1].savings_vs_most_expensive, 0.0);

        let kwh = 3500.0 * 31.0 / 365.0;
        let cheap = 10.0 + 0.30 * kwh;
        let dear = 12.0 + 0.40 * kwh;
        assert!((result.entries[0].cost.total_cost - cheap).abs() < 1e-6);
        assert!((result.entries[0].savings_vs_most_expensive - (dear - cheap)).abs() < 1e-6);
        assert!(!result.degraded);
    }

    #[test]
    fn test_missing_reference_degrades() {
        let comparator = TariffComparator::new(None, Box::new(FlatUsage(1.0)));
        let result = comparator
            .compare(&catalogue(day(2025, 1, 15)), &Household::Annual(3500.0), None)
            .unwrap();
        assert!(result.degraded);
        assert_eq!(result.cheapest().unwrap().cost.total_cost, 10.0);
    }

    #[test]
    fn test_meter_household_uses_usage_forecast() {
        let history: Vec<UsagePoint> = (0..24 * 7)
            .map(|h| UsagePoint::new(at(day(2025, 3, 1)) + Duration::hours(h), 0.4))
            .collect();
        let comparator = TariffComparator::new(None, Box::new(FlatUsage(1.0)));
        let result = comparator
            .compare(&catalogue(day(2025, 4, 1)), &Household::Meter(history), None)
            .unwrap();
        let cheap = &result.entries[0].cost;
        assert_eq!(cheap.breakdown.billing_period_days, 30);
        assert!((cheap.breakdown.total_consumption_kwh - 720.0).abs() < 1e-9);
    }

    #[test]
    fn test_meter_forecast_lands_on_billing_window() {
        // History ends at noon, a month before the tariff starts
        let history: Vec<UsagePoint> = (0..24 * 7 + 12)
            .map(|h| UsagePoint::new(at(day(2025, 3, 1)) + Duration::hours(h), 0.4))
            .collect();
        let start = day(2025, 4, 1);
        let prices: Vec<RetailPricePoint> = (0..30 * 24)
            .map(|h| RetailPricePoint {
                timestamp: at(start) + Duration::hours(h),
                wholesale: 80.0,
                wholesale_lower: None,
                wholesale_upper: None,
                energy_component: 80.0,
                retail_total: 200.0,
                lower: None,
                upper: None,
                components: None,
            })
            .collect();
        let tariffs = vec![Tariff::Indexed(IndexedTariff {
            name: "Dynamic".into(),
            provider: None,
            base_fee_per_month: 15.0,
            start_date: start,
            one_time_network_fee: 0.0,
            add_on_ct_per_kwh: None,
            postal_code: None,
            features: vec![],
        })];

        let comparator = TariffComparator::new(None, Box::new(FlatUsage(0.5)));
        let result = comparator
            .compare(&tariffs, &Household::Meter(history), Some(&prices))
            .unwrap();
        let cost = &result.entries[0].cost;
        assert!(!result.degraded);
        assert_eq!(cost.breakdown.billing_period_days, 30);
        assert_eq!(cost.breakdown.matched_hours, 720);
        assert_eq!(cost.breakdown.dropped_hours, 0);
        assert!((cost.total_cost - (15.0 + 360.0 * 0.2)).abs() < 1e-9);
    }

    #[test]
    fn test_indexed_entry_joins_prices() {
        let start = day(2025, 1, 15);
        let prices: Vec<RetailPricePoint> = (0..31 * 24)
            .map(|h| RetailPricePoint {
                timestamp: at(start) + Duration::hours(h),
                wholesale: 80.0,
                wholesale_lower: None,
                wholesale_upper: None,
                energy_component: 80.0,
                retail_total: 150.0,
                lower: None,
                upper: None,
                components: None,
            })
            .collect();
        let mut tariffs = catalogue(start);
        tariffs.push(Tariff::Indexed(IndexedTariff {
            name: "Dynamic".into(),
            provider: None,
            base_fee_per_month: 15.0,
            start_date: start,
            one_time_network_fee: 0.0,
            add_on_ct_per_kwh: None,
            postal_code: None,
            features: vec![],
        }));

        let comparator = TariffComparator::new(Some(flat_reference()), Box::new(FlatUsage(1.0)));
        let result = comparator
            .compare(&tariffs, &Household::Annual(3500.0), Some(&prices))
            .unwrap();
        let dynamic = result.entries.iter().find(|e| e.indexed).unwrap();
        assert_eq!(dynamic.cost.breakdown.matched_hours, 744);
        assert!((dynamic.cost.mean_unit_price - 0.15).abs() < 1e-12);
        assert_eq!(result.cheapest().unwrap().tariff, "Dynamic");
    }
}
