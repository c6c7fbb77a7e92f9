use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use dynergy::config::Config;
use dynergy::domain::{FixedTariff, IndexedTariff, Tariff, UsageForecastPoint, UsagePoint};
use dynergy::error::DynergyError;
use dynergy::forecast::{
    backtest, ForecastEngine, ModelConfig, PriceForecast, SeasonalPriceForecaster,
    SeasonalUsageForecaster, UsageForecaster,
};
use dynergy::market::{required_chunks, FileStore, ForecastStore, PriceHistoryStore, SmardClient};
use dynergy::profile::{read_meter_file, shape_meter, ReferenceProfile};
use dynergy::risk::{forecast_volatility, RiskAnalyser, RiskContext};
use dynergy::tariff::{Household, TariffComparator};
use dynergy::telemetry::init_tracing;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download day-ahead prices and store them as a dump
    FetchPrices {
        #[arg(long)]
        chunks: Option<usize>,
    },
    /// Forecast retail prices from the newest dump
    ForecastPrices {
        #[arg(long)]
        horizon: Option<usize>,
    },
    /// Forecast hourly usage following the meter history
    ForecastUsage {
        #[arg(long)]
        meter: PathBuf,
        /// Defaults to forecast.usage_horizon_days
        #[arg(long)]
        days: Option<usize>,
    },
    /// Cost a tariff catalogue for one household
    Compare {
        #[arg(long, conflicts_with = "meter", required_unless_present = "meter")]
        annual_kwh: Option<f64>,
        #[arg(long)]
        meter: Option<PathBuf>,
        /// JSON array of tariffs; a built-in catalogue is used otherwise
        #[arg(long)]
        tariffs: Option<PathBuf>,
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Scraped add-on for the built-in indexed tariff, ct/kWh
        #[arg(long)]
        add_on: Option<f64>,
    },
    /// Score the risk of an indexed tariff for a household
    Risk {
        #[arg(long)]
        meter: Option<PathBuf>,
        /// Score against a fixed tariff instead
        #[arg(long, default_value_t = false)]
        fixed: bool,
        /// Include usage forecast quality from a backtest
        #[arg(long, default_value_t = false)]
        with_backtest: bool,
    },
    /// Backtest the usage forecaster on the newest 30 days of meter data
    Backtest {
        #[arg(long)]
        meter: PathBuf,
    },
}

#[derive(Debug, Serialize)]
struct UsageForecastSummary {
    horizon_days: usize,
    total_kwh: f64,
    rows: Vec<UsageForecastPoint>,
}

#[derive(Debug, Serialize)]
struct ForecastSummary {
    fingerprint: String,
    horizon_hours: usize,
    trained_until: String,
    future_rows: usize,
    mean_retail_eur_per_kwh: Option<f64>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    if let Err(e) = run(cli).await {
        let report = match e.downcast_ref::<DynergyError>() {
            Some(core) => serde_json::json!({
                "error": core.kind(),
                "message": format!("{e:#}"),
            }),
            None => serde_json::json!({ "error": "internal", "message": format!("{e:#}") }),
        };
        println!("{report}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cfg = Config::load()?;
    let store = FileStore::new(&cfg.storage.data_dir)
        .with_fallback_retail((&cfg.retail).into());

    match cli.command {
        Command::FetchPrices { chunks } => {
            let engine = engine(&cfg, &store)?;
            let limit = chunks.unwrap_or_else(|| required_chunks(cfg.market.training_days));
            let points = engine
                .fetch_prices(Some(limit))
                .await
                .context("failed to fetch wholesale prices")?;
            print_json(&serde_json::json!({
                "prices": points.len(),
                "first": points.first().map(|p| p.timestamp.to_string()),
                "last": points.last().map(|p| p.timestamp.to_string()),
            }))
        }
        Command::ForecastPrices { horizon } => {
            let engine = engine(&cfg, &store)?;
            let horizon = horizon.unwrap_or(cfg.forecast.horizon_hours as usize);
            let forecast = engine
                .forecast_prices(horizon)
                .context("failed to forecast prices")?;
            print_json(&summarise(&forecast))
        }
        Command::ForecastUsage { meter, days } => {
            let usage = load_usage(&meter)?;
            let forecaster = usage_forecaster(&cfg);
            let horizon_days = days.unwrap_or(forecaster.horizon_days() as usize);
            let rows = match days {
                Some(days) => forecaster.forecast_usage(&usage, days),
                None => forecaster.forecast_ahead(&usage),
            }
            .context("usage forecast failed")?;
            print_json(&UsageForecastSummary {
                horizon_days,
                total_kwh: rows.iter().map(|r| r.kwh).sum(),
                rows,
            })
        }
        Command::Compare {
            annual_kwh,
            meter,
            tariffs,
            start,
            add_on,
        } => {
            let start = start.unwrap_or_else(|| Local::now().date_naive());
            let tariffs = match tariffs {
                Some(path) => read_tariffs(&path)?,
                None => builtin_catalogue(start, add_on),
            };
            let household = match (annual_kwh, meter) {
                (_, Some(path)) => Household::from_meter(&read_meter_file(&path)?)?,
                (Some(kwh), None) => Household::Annual(kwh),
                (None, None) => anyhow::bail!("either --annual-kwh or --meter is required"),
            };
            let reference = optional(ReferenceProfile::from_path(&cfg.storage.reference_profile))?;
            let forecast = optional(store.latest())?;

            let comparator = TariffComparator::new(reference, Box::new(usage_forecaster(&cfg)));
            let comparison = comparator
                .compare(&tariffs, &household, forecast.as_ref().map(|f| f.rows.as_slice()))
                .context("tariff comparison failed")?;
            print_json(&comparison)
        }
        Command::Risk {
            meter,
            fixed,
            with_backtest,
        } => {
            let analyser = RiskAnalyser::from_config(&cfg.risk)?;
            let volatility = optional(store.latest())?.as_ref().and_then(forecast_volatility);
            let mut context = RiskContext {
                indexed: !fixed,
                forecast_error_pct: None,
                forecast_volatility: volatility,
                historic_volatility: None,
            };

            let report = match meter {
                Some(path) => {
                    let usage = load_usage(&path)?;
                    if with_backtest {
                        let bt = backtest(&usage_forecaster(&cfg), &usage)
                            .context("backtest for forecast quality failed")?;
                        context.forecast_error_pct = Some(bt.metrics.error_pct);
                    }
                    let prices = store
                        .latest_dump()
                        .context("no wholesale price history, run fetch-prices first")?;
                    analyser.analyse(&usage, &prices, &context)?
                }
                None => {
                    info!("No meter data given, using the simplified score");
                    context.historic_volatility = optional(store.latest_dump())?
                        .and_then(|prices| analyser.historic_volatility(&prices));
                    analyser.analyse_simplified(&context)
                }
            };
            print_json(&report)
        }
        Command::Backtest { meter } => {
            let usage = load_usage(&meter)?;
            let report = backtest(&usage_forecaster(&cfg), &usage).context("backtest failed")?;
            print_json(&report)
        }
    }
}

fn engine(cfg: &Config, store: &FileStore) -> Result<ForecastEngine> {
    let source = SmardClient::new(&cfg.market).context("failed to build wholesale client")?;
    let forecaster = SeasonalPriceForecaster::new(
        ModelConfig::price_default().with_mode(cfg.forecast.price_seasonality_mode),
        (&cfg.retail).into(),
    );
    Ok(ForecastEngine::new(
        Box::new(source),
        Box::new(forecaster),
        Box::new(store.clone()),
        Box::new(store.clone()),
    ))
}

fn usage_forecaster(cfg: &Config) -> SeasonalUsageForecaster {
    SeasonalUsageForecaster::from_config(&cfg.forecast)
}

fn load_usage(path: &Path) -> Result<Vec<UsagePoint>> {
    let readings = read_meter_file(path)
        .with_context(|| format!("failed to read meter data from {}", path.display()))?;
    Ok(shape_meter(&readings)?)
}

/// Missing artefacts are tolerated; every other error propagates.
fn optional<T>(result: dynergy::Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == "missing_artefact" => {
            warn!("{}", e);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

fn read_tariffs(path: &Path) -> Result<Vec<Tariff>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tariffs from {}", path.display()))?;
    let tariffs: Vec<Tariff> = serde_json::from_str(&raw).context("invalid tariff catalogue")?;
    Ok(tariffs)
}

fn builtin_catalogue(start: NaiveDate, add_on: Option<f64>) -> Vec<Tariff> {
    vec![
        Tariff::Fixed(FixedTariff {
            name: "Fixed 12".to_string(),
            provider: None,
            base_fee_per_month: 10.0,
            unit_rate_eur_per_kwh: 0.30,
            start_date: start,
            min_duration_months: Some(12),
            postal_code: None,
            features: vec!["price guarantee".to_string()],
        }),
        Tariff::Indexed(IndexedTariff {
            name: "Dynamic".to_string(),
            provider: None,
            base_fee_per_month: 15.89,
            start_date: start,
            one_time_network_fee: 0.0,
            add_on_ct_per_kwh: add_on,
            postal_code: None,
            features: vec!["hourly price".to_string()],
        }),
    ]
}

fn summarise(forecast: &PriceForecast) -> ForecastSummary {
    let future = forecast.future();
    let mean = if future.is_empty() {
        None
    } else {
        Some(future.iter().map(|r| r.retail_eur_per_kwh()).sum::<f64>() / future.len() as f64)
    };
    ForecastSummary {
        fingerprint: forecast.fingerprint.clone(),
        horizon_hours: forecast.horizon_hours,
        trained_until: forecast.trained_until.to_string(),
        future_rows: future.len(),
        mean_retail_eur_per_kwh: mean,
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
