use tracing::debug;

use super::signals::{CoincidenceFactor, ForecastVolatility, PriceDifferential};
use crate::domain::{RiskAssessment, RiskFactor, RiskLevel};

pub const BASELINE_SCORE: f64 = 50.0;
pub const FIXED_TARIFF_DELTA: f64 = -25.0;

// ============================================================================
// Bands
// ============================================================================

/// Consumption-weighted price vs market mean, in percent
pub fn differential_delta(pct: f64) -> f64 {
    if pct < -5.0 {
        -15.0
    } else if pct > 5.0 {
        15.0
    } else {
        0.0
    }
}

/// Expensive-hour consumption share minus the expensive-hour percentage
pub fn coincidence_delta(deviation: f64) -> f64 {
    if deviation < -5.0 {
        -15.0
    } else if deviation > 10.0 {
        15.0
    } else {
        0.0
    }
}

/// In-window price standard deviation, EUR/kWh
pub fn volatility_delta(std_eur_per_kwh: f64) -> f64 {
    if std_eur_per_kwh < 0.03 {
        -3.0
    } else if std_eur_per_kwh <= 0.05 {
        5.0
    } else {
        10.0
    }
}

/// Backtest percentage error of the usage forecast
pub fn forecast_error_delta(error_pct: f64) -> f64 {
    if error_pct < 10.0 {
        -8.0
    } else if error_pct < 20.0 {
        -4.0
    } else if error_pct < 30.0 {
        3.0
    } else {
        10.0
    }
}

/// Standard deviation of forecast retail prices, EUR/kWh
pub fn forecast_volatility_delta(std_eur_per_kwh: f64) -> f64 {
    if std_eur_per_kwh < 0.025 {
        -3.0
    } else if std_eur_per_kwh < 0.035 {
        2.0
    } else if std_eur_per_kwh < 0.05 {
        5.0
    } else {
        8.0
    }
}

/// Mean forecast interval width, EUR/kWh
pub fn forecast_interval_delta(width_eur_per_kwh: f64) -> f64 {
    if width_eur_per_kwh > 0.20 {
        10.0
    } else if width_eur_per_kwh > 0.12 {
        6.0
    } else if width_eur_per_kwh > 0.08 {
        3.0
    } else {
        -3.0
    }
}

/// Standard deviation of historic wholesale prices, EUR/kWh
pub fn historic_volatility_delta(std_eur_per_kwh: f64) -> f64 {
    if std_eur_per_kwh > 0.06 {
        10.0
    } else if std_eur_per_kwh > 0.045 {
        6.0
    } else if std_eur_per_kwh > 0.03 {
        2.0
    } else {
        -4.0
    }
}

// ============================================================================
// Aggregation
// ============================================================================

/// Everything the score can draw on. Missing signals contribute nothing.
#[derive(Debug, Clone, Default)]
pub struct RiskInputs<'a> {
    pub differential: Option<&'a PriceDifferential>,
    pub coincidence: Option<&'a CoincidenceFactor>,
    pub forecast_error_pct: Option<f64>,
    /// Only scored for indexed tariffs
    pub forecast_volatility: Option<&'a ForecastVolatility>,
    pub indexed: bool,
}

pub fn aggregate(inputs: &RiskInputs<'_>) -> RiskAssessment {
    let mut factors = Vec::new();

    if let Some(d) = inputs.differential {
        factors.push(RiskFactor::new(
            "Historical consumption",
            differential_delta(d.differential_pct),
            format!("{:+.1}% vs market average price", d.differential_pct),
        ));
    }
    if let Some(c) = inputs.coincidence {
        factors.push(RiskFactor::new(
            "Consumption timing",
            coincidence_delta(c.deviation()),
            format!(
                "{:.1}% of consumption in the {:.0}% most expensive hours",
                c.consumption_share_pct, c.expensive_hours_pct
            ),
        ));
    }
    if let Some(d) = inputs.differential {
        factors.push(RiskFactor::new(
            "Price volatility",
            volatility_delta(d.price_volatility),
            format!("{:.4} EUR/kWh standard deviation", d.price_volatility),
        ));
    }
    if let Some(err) = inputs.forecast_error_pct {
        factors.push(RiskFactor::new(
            "Forecast quality",
            forecast_error_delta(err),
            format!("{err:.1}% usage forecast error"),
        ));
    }
    if inputs.indexed {
        if let Some(v) = inputs.forecast_volatility {
            factors.push(forecast_volatility_factor(v));
            factors.extend(forecast_interval_factor(v));
        }
    } else {
        factors.push(fixed_tariff_factor());
    }

    let mut assessment = finish(factors);
    assessment.forecast_quality_included = inputs.forecast_error_pct.is_some();
    assessment
}

/// Score for households known only by their annual consumption.
///
/// `historic_volatility` is the standard deviation of recent wholesale
/// prices in EUR/kWh.
pub fn simplified_score(
    forecast_volatility: Option<&ForecastVolatility>,
    historic_volatility: Option<f64>,
    indexed: bool,
) -> RiskAssessment {
    let mut factors = Vec::new();
    if indexed {
        match forecast_volatility {
            Some(v) => factors.push(forecast_volatility_factor(v)),
            None => factors.push(RiskFactor::new(
                "Forecast price volatility",
                0.0,
                "No price forecast available",
            )),
        }
        if let Some(std) = historic_volatility {
            factors.push(RiskFactor::new(
                "Historic price volatility",
                historic_volatility_delta(std),
                format!("{std:.4} EUR/kWh standard deviation of recent prices"),
            ));
        }
    }
    factors.push(RiskFactor::new(
        "Consumption data",
        0.0,
        "No meter data, score based on market conditions only",
    ));
    if !indexed {
        factors.push(fixed_tariff_factor());
    }

    let mut assessment = finish(factors);
    assessment.simplified = true;
    assessment
}

fn forecast_volatility_factor(v: &ForecastVolatility) -> RiskFactor {
    RiskFactor::new(
        "Forecast price volatility",
        forecast_volatility_delta(v.std_dev_eur_per_kwh),
        format!("{:.4} EUR/kWh expected spread", v.std_dev_eur_per_kwh),
    )
}

fn forecast_interval_factor(v: &ForecastVolatility) -> Option<RiskFactor> {
    v.avg_interval_width_eur_per_kwh.map(|width| {
        RiskFactor::new(
            "Forecast uncertainty",
            forecast_interval_delta(width),
            format!("{width:.4} EUR/kWh mean interval width"),
        )
    })
}

fn fixed_tariff_factor() -> RiskFactor {
    RiskFactor::new("Tariff type", FIXED_TARIFF_DELTA, "Fixed unit rate")
}

fn finish(factors: Vec<RiskFactor>) -> RiskAssessment {
    let raw = BASELINE_SCORE + factors.iter().map(|f| f.delta).sum::<f64>();
    let score = raw.clamp(0.0, 100.0);
    let level = RiskLevel::from_score(score);
    debug!("Risk score {:.1} ({} factors) -> {}", score, factors.len(), level);
    RiskAssessment {
        level,
        score,
        message: level.message().to_string(),
        factors,
        forecast_quality_included: false,
        simplified: false,
        degraded: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::risk::signals::{CoincidenceRating, Exposure};
    use proptest::prelude::*;
    use rstest::rstest;

    fn differential(pct: f64, volatility: f64) -> PriceDifferential {
        PriceDifferential {
            market_avg_price: 0.1,
            user_weighted_price: 0.1 * (1.0 + pct / 100.0),
            differential: 0.1 * pct / 100.0,
            differential_pct: pct,
            exposure: if pct < 0.0 { Exposure::Favourable } else { Exposure::Unfavourable },
            price_volatility: volatility,
            total_consumption_kwh: 300.0,
            total_cost: 30.0,
            hours: 720,
            days_analysed: 30,
        }
    }

    fn coincidence(share: f64) -> CoincidenceFactor {
        CoincidenceFactor {
            expensive_hours_pct: 20.0,
            price_threshold: 0.15,
            expensive_hours: 144,
            total_hours: 720,
            consumption_expensive_kwh: 3.0 * share,
            consumption_total_kwh: 300.0,
            consumption_share_pct: share,
            cost_expensive: 0.0,
            cost_total: 30.0,
            cost_share_pct: 0.0,
            avg_price_expensive: 0.2,
            avg_price_cheap: 0.08,
            correlation: 0.0,
            rating: CoincidenceRating::rate(share, 20.0),
        }
    }

    #[test]
    fn test_favourable_household_fixed_and_indexed() {
        let d = differential(-8.0, 0.02);
        let c = coincidence(12.0);
        let mut inputs = RiskInputs {
            differential: Some(&d),
            coincidence: Some(&c),
            ..Default::default()
        };

        let fixed = aggregate(&inputs);
        assert_eq!(fixed.score, 0.0);
        assert_eq!(fixed.level, RiskLevel::Low);
        assert_eq!(fixed.factors.len(), 4);

        inputs.indexed = true;
        let indexed = aggregate(&inputs);
        assert_eq!(indexed.score, 17.0);
        assert_eq!(indexed.level, RiskLevel::Low);
        assert!(!indexed.forecast_quality_included);
    }

    #[test]
    fn test_unfavourable_household_is_high() {
        let d = differential(12.0, 0.08);
        let c = coincidence(35.0);
        let inputs = RiskInputs {
            differential: Some(&d),
            coincidence: Some(&c),
            forecast_error_pct: Some(45.0),
            indexed: true,
            ..Default::default()
        };
        let assessment = aggregate(&inputs);
        assert_eq!(assessment.score, 100.0);
        assert_eq!(assessment.level, RiskLevel::High);
        assert!(assessment.forecast_quality_included);
    }

    #[rstest]
    #[case(-5.1, -15.0)]
    #[case(-5.0, 0.0)]
    #[case(5.0, 0.0)]
    #[case(5.1, 15.0)]
    fn test_differential_bands(#[case] pct: f64, #[case] delta: f64) {
        assert_eq!(differential_delta(pct), delta);
    }

    #[rstest]
    #[case(0.029, -3.0)]
    #[case(0.03, 5.0)]
    #[case(0.05, 5.0)]
    #[case(0.051, 10.0)]
    fn test_volatility_bands(#[case] std: f64, #[case] delta: f64) {
        assert_eq!(volatility_delta(std), delta);
    }

    #[rstest]
    #[case(9.9, -8.0)]
    #[case(10.0, -4.0)]
    #[case(29.9, 3.0)]
    #[case(30.0, 10.0)]
    fn test_forecast_error_bands(#[case] err: f64, #[case] delta: f64) {
        assert_eq!(forecast_error_delta(err), delta);
    }

    #[test]
    fn test_forecast_volatility_ignored_for_fixed() {
        let v = ForecastVolatility {
            std_dev_eur_per_kwh: 0.2,
            avg_interval_width_eur_per_kwh: None,
        };
        let inputs = RiskInputs {
            forecast_volatility: Some(&v),
            ..Default::default()
        };
        let assessment = aggregate(&inputs);
        assert_eq!(assessment.score, 25.0);
        assert_eq!(assessment.factors.len(), 1);
    }

    #[test]
    fn test_simplified_score() {
        let calm = ForecastVolatility {
            std_dev_eur_per_kwh: 0.02,
            avg_interval_width_eur_per_kwh: Some(0.05),
        };
        let indexed = simplified_score(Some(&calm), None, true);
        assert!(indexed.simplified);
        assert_eq!(indexed.score, 47.0);
        assert_eq!(indexed.level, RiskLevel::Moderate);

        let fixed = simplified_score(None, Some(0.08), false);
        assert_eq!(fixed.score, 25.0);
        assert_eq!(fixed.level, RiskLevel::Low);
    }

    #[test]
    fn test_simplified_score_with_historic_volatility() {
        let calm = ForecastVolatility {
            std_dev_eur_per_kwh: 0.02,
            avg_interval_width_eur_per_kwh: None,
        };
        let stormy = simplified_score(Some(&calm), Some(0.07), true);
        assert_eq!(stormy.score, 57.0);
        assert!(stormy
            .factors
            .iter()
            .any(|f| f.name == "Historic price volatility" && f.delta == 10.0));

        let quiet = simplified_score(None, Some(0.02), true);
        assert_eq!(quiet.score, 46.0);
        assert_eq!(quiet.level, RiskLevel::Moderate);
    }

    #[rstest]
    #[case(0.061, 10.0)]
    #[case(0.06, 6.0)]
    #[case(0.045, 2.0)]
    #[case(0.03, -4.0)]
    fn test_historic_volatility_bands(#[case] std: f64, #[case] delta: f64) {
        assert_eq!(historic_volatility_delta(std), delta);
    }

    #[rstest]
    #[case(0.21, 10.0)]
    #[case(0.20, 6.0)]
    #[case(0.121, 6.0)]
    #[case(0.12, 3.0)]
    #[case(0.081, 3.0)]
    #[case(0.08, -3.0)]
    fn test_forecast_interval_bands(#[case] width: f64, #[case] delta: f64) {
        assert_eq!(forecast_interval_delta(width), delta);
    }

    #[test]
    fn test_forecast_uncertainty_scored_for_indexed_only() {
        let v = ForecastVolatility {
            std_dev_eur_per_kwh: 0.02,
            avg_interval_width_eur_per_kwh: Some(0.15),
        };
        let mut inputs = RiskInputs {
            forecast_volatility: Some(&v),
            indexed: true,
            ..Default::default()
        };
        let indexed = aggregate(&inputs);
        assert_eq!(indexed.score, 53.0);
        let uncertainty = indexed
            .factors
            .iter()
            .find(|f| f.name == "Forecast uncertainty")
            .unwrap();
        assert_eq!(uncertainty.delta, 6.0);

        inputs.indexed = false;
        let fixed = aggregate(&inputs);
        assert!(fixed.factors.iter().all(|f| f.name != "Forecast uncertainty"));
    }

    proptest! {
        #[test]
        fn score_is_bounded_and_level_consistent(
            pct in -100.0f64..100.0,
            share in 0.0f64..100.0,
            volatility in 0.0f64..0.5,
            err in proptest::option::of(0.0f64..200.0),
            indexed in any::<bool>(),
        ) {
            let d = differential(pct, volatility);
            let c = coincidence(share);
            let inputs = RiskInputs {
                differential: Some(&d),
                coincidence: Some(&c),
                forecast_error_pct: err,
                forecast_volatility: None,
                indexed,
            };
            let a = aggregate(&inputs);
            prop_assert!((0.0..=100.0).contains(&a.score));
            prop_assert_eq!(a.level == RiskLevel::Low, a.score <= 40.0);
            prop_assert_eq!(a.level == RiskLevel::High, a.score > 60.0);
        }
    }
}
