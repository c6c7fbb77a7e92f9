use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use strum::Display;
use tracing::{debug, warn};

use crate::domain::{total_kwh, FixedTariff, IndexedTariff, RetailPricePoint, Tariff, UsagePoint};
use crate::error::Result;

/// Months per year used for the presentation-only annualisation
const MONTHS_PER_YEAR: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MarkupSource {
    /// Postal-code add-on from scraped tariff data
    ScrapedAddOn,
    /// Structural markup already inside the retail series
    Structural,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DegradedReason {
    MissingPrices,
    MissingUsage,
    EmptyOverlap,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub billing_period_days: i64,
    pub base_fee: f64,
    pub one_time_network_fee: f64,
    pub energy_cost: f64,
    pub total_consumption_kwh: f64,
    pub unit_rate_eur_per_kwh: Option<f64>,
    pub add_on_ct_per_kwh: Option<f64>,
    pub markup_source: Option<MarkupSource>,
    pub matched_hours: usize,
    pub dropped_hours: usize,
    /// Set when only fixed charges could be computed
    pub degraded: Option<DegradedReason>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostResult {
    pub tariff: String,
    /// Cost of one billing window, EUR
    pub total_cost: f64,
    /// EUR/kWh. Unweighted mean over joined hours for indexed tariffs.
    pub mean_unit_price: f64,
    /// `total_cost × 12`, for display only
    pub annualised_cost: f64,
    pub breakdown: CostBreakdown,
}

impl CostResult {
    pub fn is_degraded(&self) -> bool {
        self.breakdown.degraded.is_some()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CostEngine;

impl CostEngine {
    pub fn new() -> Self {
        Self
    }

    /// Cost of one billing window for `usage` under `tariff`.
    ///
    /// Indexed tariffs need `prices`; without them, or when no hour matches,
    /// the result carries fixed charges only and is flagged degraded.
    pub fn cost(
        &self,
        tariff: &Tariff,
        usage: &[UsagePoint],
        prices: Option<&[RetailPricePoint]>,
    ) -> Result<CostResult> {
        tariff.validate()?;
        let days = tariff.billing_window().days();
        let result = match tariff {
            Tariff::Fixed(t) => self.fixed_cost(t, usage, days),
            Tariff::Indexed(t) => match prices {
                Some(prices) => self.indexed_cost(t, usage, prices, days),
                None => {
                    warn!("No retail prices for '{}', reporting fixed charges only", t.name);
                    degraded_indexed(t, usage, days, DegradedReason::MissingPrices)
                }
            },
        };
        debug!(
            "Tariff '{}': {:.2} EUR over {} days",
            result.tariff, result.total_cost, days
        );
        Ok(result)
    }

    /// Result carrying the fixed charges only, for when no usage could be built
    pub fn fixed_charges_only(&self, tariff: &Tariff, reason: DegradedReason) -> Result<CostResult> {
        tariff.validate()?;
        let days = tariff.billing_window().days();
        warn!(
            "Reporting fixed charges only for '{}' ({})",
            tariff.name(),
            reason
        );
        Ok(match tariff {
            Tariff::Fixed(t) => {
                let mut result = self.fixed_cost(t, &[], days);
                result.breakdown.degraded = Some(reason);
                result.mean_unit_price = 0.0;
                result
            }
            Tariff::Indexed(t) => degraded_indexed(t, &[], days, reason),
        })
    }

    fn fixed_cost(&self, t: &FixedTariff, usage: &[UsagePoint], days: i64) -> CostResult {
        let kwh = total_kwh(usage);
        let energy_cost = kwh * t.unit_rate_eur_per_kwh;
        let total_cost = t.base_fee_per_month + energy_cost;
        CostResult {
            tariff: t.name.clone(),
            total_cost,
            mean_unit_price: t.unit_rate_eur_per_kwh,
            annualised_cost: total_cost * MONTHS_PER_YEAR,
            breakdown: CostBreakdown {
                billing_period_days: days,
                base_fee: t.base_fee_per_month,
                one_time_network_fee: 0.0,
                energy_cost,
                total_consumption_kwh: kwh,
                unit_rate_eur_per_kwh: Some(t.unit_rate_eur_per_kwh),
                add_on_ct_per_kwh: None,
                markup_source: None,
                matched_hours: usage.len(),
                dropped_hours: 0,
                degraded: None,
            },
        }
    }

    fn indexed_cost(
        &self,
        t: &IndexedTariff,
        usage: &[UsagePoint],
        prices: &[RetailPricePoint],
        days: i64,
    ) -> CostResult {
        let by_ts: HashMap<NaiveDateTime, &RetailPricePoint> =
            prices.iter().map(|p| (p.timestamp, p)).collect();

        let mut energy_cost = 0.0;
        let mut kwh = 0.0;
        let mut unit_prices = Vec::with_capacity(usage.len());
        for u in usage {
            if let Some(p) = by_ts.get(&u.timestamp) {
                let unit = hourly_unit_price(p, t.add_on_ct_per_kwh);
                energy_cost += u.kwh * unit;
                kwh += u.kwh;
                unit_prices.push(unit);
            }
        }

        let matched = unit_prices.len();
        let dropped = usage.len() - matched;
        if matched == 0 {
            warn!(
                "Usage and prices do not overlap for '{}', reporting fixed charges only",
                t.name
            );
            return degraded_indexed(t, usage, days, DegradedReason::EmptyOverlap);
        }
        if dropped > 0 {
            warn!("Dropped {} usage hours without a price for '{}'", dropped, t.name);
        }

        let mean_unit_price = unit_prices.iter().sum::<f64>() / matched as f64;
        let total_cost = t.base_fee_per_month + t.one_time_network_fee + energy_cost;
        CostResult {
            tariff: t.name.clone(),
            total_cost,
            mean_unit_price,
            annualised_cost: total_cost * MONTHS_PER_YEAR,
            breakdown: CostBreakdown {
                billing_period_days: days,
                base_fee: t.base_fee_per_month,
                one_time_network_fee: t.one_time_network_fee,
                energy_cost,
                total_consumption_kwh: kwh,
                unit_rate_eur_per_kwh: None,
                add_on_ct_per_kwh: t.add_on_ct_per_kwh,
                markup_source: Some(if t.add_on_ct_per_kwh.is_some() {
                    MarkupSource::ScrapedAddOn
                } else {
                    MarkupSource::Structural
                }),
                matched_hours: matched,
                dropped_hours: dropped,
                degraded: None,
            },
        }
    }
}

/// EUR/kWh for one hour. A scraped add-on replaces the structural markup.
pub fn hourly_unit_price(p: &RetailPricePoint, add_on_ct_per_kwh: Option<f64>) -> f64 {
    match add_on_ct_per_kwh {
        Some(a) => (p.energy_component + a * 10.0) / 1000.0,
        None => p.retail_eur_per_kwh(),
    }
}

fn degraded_indexed(
    t: &IndexedTariff,
    usage: &[UsagePoint],
    days: i64,
    reason: DegradedReason,
) -> CostResult {
    let total_cost = t.base_fee_per_month + t.one_time_network_fee;
    CostResult {
        tariff: t.name.clone(),
        total_cost,
        mean_unit_price: 0.0,
        annualised_cost: total_cost * MONTHS_PER_YEAR,
        breakdown: CostBreakdown {
            billing_period_days: days,
            base_fee: t.base_fee_per_month,
            one_time_network_fee: t.one_time_network_fee,
            energy_cost: 0.0,
            total_consumption_kwh: total_kwh(usage),
            unit_rate_eur_per_kwh: None,
            add_on_ct_per_kwh: t.add_on_ct_per_kwh,
            markup_source: None,
            matched_hours: 0,
            dropped_hours: usage.len(),
            degraded: Some(reason),
        },
    }
}
