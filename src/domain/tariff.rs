use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::RetailPricePoint;
use crate::error::{DynergyError, Result};
use crate::utils::{last_day_of_month, mean};

/// Average retail price used for scalar cost splits when no forecast is at hand (EUR/kWh)
pub const FALLBACK_RETAIL_EUR_PER_KWH: f64 = 0.25;

/// Fixed unit rate tariff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedTariff {
    pub name: String,
    pub provider: Option<String>,
    pub base_fee_per_month: f64,
    pub unit_rate_eur_per_kwh: f64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub min_duration_months: Option<u32>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

/// Market indexed ("dynamic") tariff. The unit rate follows the retail
/// price series hour by hour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexedTariff {
    pub name: String,
    pub provider: Option<String>,
    pub base_fee_per_month: f64,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub one_time_network_fee: f64,
    /// Complete non-wholesale price component for the postal code, in ct/kWh.
    #[serde(default)]
    pub add_on_ct_per_kwh: Option<f64>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Tariff {
    Fixed(FixedTariff),
    Indexed(IndexedTariff),
}

/// Tariff offer as delivered by the regional scrapers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapedTariff {
    pub provider: String,
    pub base_price_monthly: f64,
    pub add_on_ct_per_kwh: f64,
    pub postal_code: String,
}

/// Contiguous billing period, `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl BillingWindow {
    /// Same day next month, clamped to month end. A start on the last day of
    /// a month attaches to the last day of the following month.
    pub fn from_start(start: NaiveDate) -> Self {
        let (y, m, d) = (start.year(), start.month(), start.day());
        let (ny, nm) = if m == 12 { (y + 1, 1) } else { (y, m + 1) };

        let days_in_start = last_day_of_month(y, m);
        let days_in_next = last_day_of_month(ny, nm);
        let next_day = if d == days_in_start {
            days_in_next
        } else {
            d.min(days_in_next)
        };

        // Clamped day is always valid for (ny, nm)
        let end = NaiveDate::from_ymd_opt(ny, nm, next_day)
            .unwrap_or_else(|| start + chrono::Duration::days(days_in_start as i64));
        Self { start, end }
    }

    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    pub fn hours(&self) -> usize {
        (self.days() * 24) as usize
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let start = self.start;
        (0..self.days()).map(move |i| start + chrono::Duration::days(i))
    }
}

/// Scalar cost breakdown for a given consumption
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSplit {
    pub base_fee: f64,
    pub variable_cost: f64,
    pub network_fee: f64,
    pub total_cost: f64,
    pub total_consumption_kwh: f64,
    pub unit_price_eur_per_kwh: f64,
    pub billing_period_days: i64,
    pub estimated: bool,
}

impl Tariff {
    pub fn name(&self) -> &str {
        match self {
            Tariff::Fixed(t) => &t.name,
            Tariff::Indexed(t) => &t.name,
        }
    }

    pub fn provider(&self) -> Option<&str> {
        match self {
            Tariff::Fixed(t) => t.provider.as_deref(),
            Tariff::Indexed(t) => t.provider.as_deref(),
        }
    }

    pub fn base_fee(&self) -> f64 {
        match self {
            Tariff::Fixed(t) => t.base_fee_per_month,
            Tariff::Indexed(t) => t.base_fee_per_month,
        }
    }

    pub fn start_date(&self) -> NaiveDate {
        match self {
            Tariff::Fixed(t) => t.start_date,
            Tariff::Indexed(t) => t.start_date,
        }
    }

    pub fn is_indexed(&self) -> bool {
        matches!(self, Tariff::Indexed(_))
    }

    pub fn billing_window(&self) -> BillingWindow {
        BillingWindow::from_start(self.start_date())
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.base_fee() >= 0.0) {
            return Err(DynergyError::invalid(format!(
                "tariff '{}': base fee must be non-negative",
                self.name()
            )));
        }
        match self {
            Tariff::Fixed(t) if !(t.unit_rate_eur_per_kwh >= 0.0) => Err(DynergyError::invalid(
                format!("tariff '{}': unit rate must be non-negative", t.name),
            )),
            Tariff::Indexed(t) if !(t.one_time_network_fee >= 0.0) => Err(DynergyError::invalid(
                format!("tariff '{}': network fee must be non-negative", t.name),
            )),
            Tariff::Indexed(IndexedTariff {
                add_on_ct_per_kwh: Some(a),
                name,
                ..
            }) if !a.is_finite() => Err(DynergyError::invalid(format!(
                "tariff '{name}': add-on must be finite"
            ))),
            _ => Ok(()),
        }
    }

    /// Cost breakdown from a scalar consumption. Indexed tariffs use the mean
    /// retail price of the future forecast rows, or a fallback price.
    pub fn cost_split(
        &self,
        total_kwh: f64,
        forecast: Option<&[RetailPricePoint]>,
    ) -> CostSplit {
        let billing_period_days = self.billing_window().days();
        match self {
            Tariff::Fixed(t) => {
                let variable_cost = total_kwh * t.unit_rate_eur_per_kwh;
                CostSplit {
                    base_fee: t.base_fee_per_month,
                    variable_cost,
                    network_fee: 0.0,
                    total_cost: t.base_fee_per_month + variable_cost,
                    total_consumption_kwh: total_kwh,
                    unit_price_eur_per_kwh: t.unit_rate_eur_per_kwh,
                    billing_period_days,
                    estimated: false,
                }
            }
            Tariff::Indexed(t) => {
                let avg = forecast.and_then(|rows| {
                    let prices: Vec<f64> = rows
                        .iter()
                        .map(|r| match t.add_on_ct_per_kwh {
                            Some(a) => (r.energy_component + a * 10.0) / 1000.0,
                            None => r.retail_eur_per_kwh(),
                        })
                        .collect();
                    mean(&prices)
                });
                let unit_price = avg.unwrap_or(FALLBACK_RETAIL_EUR_PER_KWH);
                let variable_cost = total_kwh * unit_price;
                CostSplit {
                    base_fee: t.base_fee_per_month,
                    variable_cost,
                    network_fee: t.one_time_network_fee,
                    total_cost: t.base_fee_per_month + t.one_time_network_fee + variable_cost,
                    total_consumption_kwh: total_kwh,
                    unit_price_eur_per_kwh: unit_price,
                    billing_period_days,
                    estimated: true,
                }
            }
        }
    }

    /// Build an indexed tariff from a scraped regional offer.
    pub fn from_scraped(
        scraped: ScrapedTariff,
        start_date: NaiveDate,
        one_time_network_fee: f64,
    ) -> Tariff {
        Tariff::Indexed(IndexedTariff {
            name: format!("{} Dynamic", scraped.provider),
            provider: Some(scraped.provider),
            base_fee_per_month: scraped.base_price_monthly,
            start_date,
            one_time_network_fee,
            add_on_ct_per_kwh: Some(scraped.add_on_ct_per_kwh),
            postal_code: Some(scraped.postal_code),
            features: vec!["dynamic".to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixed(start: NaiveDate) -> Tariff {
        Tariff::Fixed(FixedTariff {
            name: "Fix 12".into(),
            provider: Some("Stadtwerk".into()),
            base_fee_per_month: 10.0,
            unit_rate_eur_per_kwh: 0.30,
            start_date: start,
            min_duration_months: Some(12),
            postal_code: None,
            features: vec!["fixed".into()],
        })
    }

    #[rstest]
    #[case(date(2025, 1, 31), date(2025, 2, 28), 28)]
    #[case(date(2025, 1, 30), date(2025, 2, 28), 29)]
    #[case(date(2025, 3, 31), date(2025, 4, 30), 30)]
    #[case(date(2025, 1, 15), date(2025, 2, 15), 31)]
    #[case(date(2024, 1, 31), date(2024, 2, 29), 29)]
    #[case(date(2025, 4, 30), date(2025, 5, 31), 31)]
    #[case(date(2025, 12, 10), date(2026, 1, 10), 31)]
    #[case(date(2025, 2, 28), date(2025, 3, 31), 31)]
    fn test_billing_window_rule(
        #[case] start: NaiveDate,
        #[case] end: NaiveDate,
        #[case] days: i64,
    ) {
        let w = BillingWindow::from_start(start);
        assert_eq!(w.end, end);
        assert_eq!(w.days(), days);
    }

    proptest! {
        #[test]
        fn billing_window_always_28_to_31_days(offset in 0i64..3650) {
            let start = date(2020, 1, 1) + chrono::Duration::days(offset);
            let days = BillingWindow::from_start(start).days();
            prop_assert!((28..=31).contains(&days));
        }
    }

    #[test]
    fn test_fixed_cost_split() {
        let split = fixed(date(2025, 1, 15)).cost_split(300.0, None);
        assert!((split.variable_cost - 90.0).abs() < 1e-9);
        assert!((split.total_cost - 100.0).abs() < 1e-9);
        assert_eq!(split.billing_period_days, 31);
        assert!(!split.estimated);
    }

    #[test]
    fn test_indexed_cost_split_falls_back_without_forecast() {
        let scraped = ScrapedTariff {
            provider: "Tibber".into(),
            base_price_monthly: 15.89,
            add_on_ct_per_kwh: 15.0,
            postal_code: "10115".into(),
        };
        let tariff = Tariff::from_scraped(scraped, date(2025, 1, 15), 5.0);
        assert!(tariff.is_indexed());
        assert_eq!(tariff.provider(), Some("Tibber"));

        let split = tariff.cost_split(100.0, None);
        assert!((split.unit_price_eur_per_kwh - FALLBACK_RETAIL_EUR_PER_KWH).abs() < 1e-12);
        assert!((split.total_cost - (15.89 + 5.0 + 25.0)).abs() < 1e-9);
        assert!(split.estimated);
    }

    #[test]
    fn test_validate_rejects_negative_fee() {
        let mut t = fixed(date(2025, 1, 1));
        if let Tariff::Fixed(ref mut f) = t {
            f.base_fee_per_month = -1.0;
        }
        assert_eq!(t.validate().unwrap_err().kind(), "invalid_input");
        assert!(fixed(date(2025, 1, 1)).validate().is_ok());
    }

    #[test]
    fn test_tariff_serde_tag() {
        let json = serde_json::to_value(fixed(date(2025, 1, 15))).unwrap();
        assert_eq!(json["kind"], "fixed");
        let back: Tariff = serde_json::from_value(json).unwrap();
        assert_eq!(back.name(), "Fix 12");
    }
}
