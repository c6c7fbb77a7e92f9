use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use validator::Validate;

use crate::forecast::{RetailParams, SeasonalityMode};

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub market: MarketConfig,
    #[validate(nested)]
    pub forecast: ForecastConfig,
    #[validate(nested)]
    pub retail: RetailConfig,
    pub storage: StorageConfig,
    #[validate(nested)]
    pub risk: RiskConfig,
}

/// Wholesale price API settings (SMARD chart data)
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MarketConfig {
    #[validate(length(min = 1))]
    pub base_url: String,
    pub filter_id: u32,
    #[validate(length(min = 1))]
    pub region: String,
    #[validate(length(min = 1))]
    pub resolution: String,
    #[validate(range(min = 1, max = 600))]
    pub index_timeout_seconds: u64,
    #[validate(range(min = 1, max = 600))]
    pub chunk_timeout_seconds: u64,
    pub timezone: String,
    #[validate(range(min = 7))]
    pub training_days: u32,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            base_url: "https://www.smard.de/app/chart_data".to_string(),
            filter_id: 4169,
            region: "DE".to_string(),
            resolution: "hour".to_string(),
            index_timeout_seconds: 30,
            chunk_timeout_seconds: 60,
            timezone: "Europe/Berlin".to_string(),
            training_days: 730,
        }
    }
}

impl MarketConfig {
    pub fn index_timeout(&self) -> Duration {
        Duration::from_secs(self.index_timeout_seconds)
    }

    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_secs(self.chunk_timeout_seconds)
    }

    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| anyhow::anyhow!("invalid timezone '{}': {e}", self.timezone))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ForecastConfig {
    #[validate(range(max = 8760))]
    pub horizon_hours: u32,
    pub price_seasonality_mode: SeasonalityMode,
    #[validate(range(min = 7, max = 366))]
    pub usage_history_days: u32,
    #[validate(range(min = 1, max = 62))]
    pub usage_horizon_days: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            horizon_hours: 720,
            price_seasonality_mode: SeasonalityMode::Multiplicative,
            usage_history_days: 90,
            usage_horizon_days: 30,
        }
    }
}

/// Structural retail markup in EUR/MWh
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RetailConfig {
    #[validate(range(min = 0.0))]
    pub profile_cost: f64,
    #[validate(range(min = 0.0))]
    pub risk_premium: f64,
    #[validate(range(min = 0.0))]
    pub supplier_margin: f64,
    #[validate(range(min = 0.0))]
    pub floor: f64,
}

impl Default for RetailConfig {
    fn default() -> Self {
        let p = RetailParams::default();
        Self {
            profile_cost: p.profile_cost,
            risk_premium: p.risk_premium,
            supplier_margin: p.supplier_margin,
            floor: p.floor,
        }
    }
}

impl From<&RetailConfig> for RetailParams {
    fn from(c: &RetailConfig) -> Self {
        RetailParams {
            profile_cost: c.profile_cost,
            risk_premium: c.risk_premium,
            supplier_margin: c.supplier_margin,
            floor: c.floor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub reference_profile: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("app_data"),
            reference_profile: PathBuf::from("data/reference_load_profile.csv"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct RiskConfig {
    #[validate(range(min = 1, max = 365))]
    pub analysis_days: u32,
    #[validate(range(min = 1.0, max = 100.0))]
    pub expensive_hours_pct: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            analysis_days: 30,
            expensive_hours_pct: 20.0,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("DYNERGY__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract().context("config extraction failed")?;
        config.validate().context("config validation failed")?;
        config.market.tz()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.market.filter_id, 4169);
        assert_eq!(config.market.index_timeout(), Duration::from_secs(30));
        assert_eq!(config.forecast.horizon_hours, 720);
        assert!((RetailParams::from(&config.retail).markup() - 70.0).abs() < 1e-12);
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let toml = r#"
            [risk]
            expensive_hours_pct = 10.0

            [market]
            region = "AT"
        "#;
        let config = Config::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::string(toml)),
        )
        .unwrap();
        assert_eq!(config.market.region, "AT");
        assert_eq!(config.market.training_days, 730);
        assert!((config.risk.expensive_hours_pct - 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_percentile_rejected() {
        let toml = "[risk]\nexpensive_hours_pct = 150.0\n";
        let result = Config::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::string(toml)),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_timezone_rejected() {
        let toml = "[market]\ntimezone = \"Mars/Olympus\"\n";
        let result = Config::from_figment(
            Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Toml::string(toml)),
        );
        assert!(result.is_err());
    }
}
