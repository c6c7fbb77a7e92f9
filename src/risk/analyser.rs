use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::score::{aggregate, simplified_score, RiskInputs};
use super::signals::{
    coincidence_factor, historic_volatility, load_profile, price_differential, CoincidenceFactor,
    ForecastVolatility, LoadProfile, Overlap, PriceDifferential,
};
use crate::config::RiskConfig;
use crate::domain::{PricePoint, RiskAssessment, RiskFactor, UsagePoint};
use crate::error::{DynergyError, Result};

/// Optional context beyond the usage and price history
#[derive(Debug, Clone, Default)]
pub struct RiskContext {
    pub indexed: bool,
    /// Backtest percentage error of the usage forecast
    pub forecast_error_pct: Option<f64>,
    pub forecast_volatility: Option<ForecastVolatility>,
    /// Recent wholesale price spread, EUR/kWh; used without meter data
    pub historic_volatility: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskReport {
    pub assessment: RiskAssessment,
    pub differential: Option<PriceDifferential>,
    pub coincidence: Option<CoincidenceFactor>,
    pub load_profile: Option<LoadProfile>,
}

#[derive(Debug, Clone)]
pub struct RiskAnalyser {
    analysis_days: u32,
    expensive_hours_pct: f64,
}

impl Default for RiskAnalyser {
    fn default() -> Self {
        Self {
            analysis_days: 30,
            expensive_hours_pct: 20.0,
        }
    }
}

impl RiskAnalyser {
    pub fn new(analysis_days: u32, expensive_hours_pct: f64) -> Result<Self> {
        if analysis_days == 0 {
            return Err(DynergyError::invalid("analysis window must cover at least one day"));
        }
        if !(expensive_hours_pct > 0.0 && expensive_hours_pct <= 100.0) {
            return Err(DynergyError::invalid(format!(
                "expensive hours percentage must be in (0, 100], got {expensive_hours_pct}"
            )));
        }
        Ok(Self {
            analysis_days,
            expensive_hours_pct,
        })
    }

    pub fn from_config(config: &RiskConfig) -> Result<Self> {
        Self::new(config.analysis_days, config.expensive_hours_pct)
    }

    /// Full assessment from hourly usage and wholesale price history.
    ///
    /// Without overlapping hours the signal factors are neutral and the
    /// assessment is flagged degraded.
    pub fn analyse(
        &self,
        usage: &[UsagePoint],
        prices: &[PricePoint],
        context: &RiskContext,
    ) -> Result<RiskReport> {
        let window = match Overlap::build(usage, prices, self.analysis_days) {
            Ok(window) => window,
            Err(DynergyError::EmptyOverlap(reason)) => {
                warn!("Risk analysis degraded: {}", reason);
                return Ok(self.degraded(context));
            }
            Err(e) => return Err(e),
        };

        let differential = price_differential(&window);
        let coincidence = coincidence_factor(&window, self.expensive_hours_pct)?;
        let profile = load_profile(&window);

        let assessment = aggregate(&RiskInputs {
            differential: Some(&differential),
            coincidence: Some(&coincidence),
            forecast_error_pct: context.forecast_error_pct,
            forecast_volatility: context.forecast_volatility.as_ref(),
            indexed: context.indexed,
        });
        info!(
            "Risk {} (score {:.0}) over {} joined hours",
            assessment.level, assessment.score, differential.hours
        );

        Ok(RiskReport {
            assessment,
            differential: Some(differential),
            coincidence: Some(coincidence),
            load_profile: Some(profile),
        })
    }

    /// Price spread over the analysis window ending at the newest price
    pub fn historic_volatility(&self, prices: &[PricePoint]) -> Option<f64> {
        historic_volatility(prices, self.analysis_days)
    }

    /// Assessment for a household without meter data
    pub fn analyse_simplified(&self, context: &RiskContext) -> RiskReport {
        RiskReport {
            assessment: simplified_score(
                context.forecast_volatility.as_ref(),
                context.historic_volatility,
                context.indexed,
            ),
            differential: None,
            coincidence: None,
            load_profile: None,
        }
    }

    fn degraded(&self, context: &RiskContext) -> RiskReport {
        let mut assessment = aggregate(&RiskInputs {
            forecast_error_pct: context.forecast_error_pct,
            forecast_volatility: context.forecast_volatility.as_ref(),
            indexed: context.indexed,
            ..Default::default()
        });
        let mut factors: Vec<RiskFactor> = [
            "Historical consumption",
            "Consumption timing",
            "Price volatility",
        ]
        .into_iter()
        .map(|name| RiskFactor::new(name, 0.0, "Usage and prices do not overlap"))
        .collect();
        factors.append(&mut assessment.factors);
        assessment.factors = factors;
        assessment.degraded = true;

        RiskReport {
            assessment,
            differential: None,
            coincidence: None,
            load_profile: None,
        }
    }
}
