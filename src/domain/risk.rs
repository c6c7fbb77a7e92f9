use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Score at or below which a household is low risk
pub const LOW_RISK_MAX: f64 = 40.0;
/// Score above which a household is high risk
pub const MODERATE_RISK_MAX: f64 = 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score <= LOW_RISK_MAX {
            RiskLevel::Low
        } else if score <= MODERATE_RISK_MAX {
            RiskLevel::Moderate
        } else {
            RiskLevel::High
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Low risk: your consumption pattern suits an indexed tariff.",
            RiskLevel::Moderate => {
                "Moderate risk: costs may vary with market prices; shifting load to cheap hours helps."
            }
            RiskLevel::High => {
                "High risk: a large share of your consumption falls into expensive hours."
            }
        }
    }
}

/// Direction a factor pushes the score: positive lowers risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Impact {
    Positive,
    Neutral,
    Negative,
}

impl Impact {
    pub fn from_delta(delta: f64) -> Self {
        if delta < 0.0 {
            Impact::Positive
        } else if delta > 0.0 {
            Impact::Negative
        } else {
            Impact::Neutral
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    pub name: String,
    pub impact: Impact,
    pub detail: String,
    /// Signed score contribution
    pub delta: f64,
}

impl RiskFactor {
    pub fn new(name: impl Into<String>, delta: f64, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            impact: Impact::from_delta(delta),
            detail: detail.into(),
            delta,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub level: RiskLevel,
    pub score: f64,
    pub message: String,
    pub factors: Vec<RiskFactor>,
    pub forecast_quality_included: bool,
    /// Scored without meter data
    pub simplified: bool,
    /// Usage and price did not overlap; signal factors are neutral
    pub degraded: bool,
}
