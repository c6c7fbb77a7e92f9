//! Flat-file cache for price dumps and forecast artefacts.
//!
//! Writes are full-file replacements named with a timestamp; readers pick
//! the newest file by lexical name.

use chrono::{Local, NaiveDateTime};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::domain::{ForecastComponents, PricePoint, RetailPricePoint};
use crate::error::{DynergyError, Result};
use crate::forecast::{PriceForecast, RetailParams};
use crate::utils::parse_local_datetime;

pub const FORECAST_PREFIX: &str = "germany_price_forecast_";
pub const DUMP_PREFIX: &str = "germany_dayahead_prices_raw_";
const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

pub trait ForecastStore: Send + Sync {
    /// Newest forecast, `MissingArtefact` when none exists
    fn latest(&self) -> Result<PriceForecast>;

    fn find(&self, fingerprint: &str) -> Result<Option<PriceForecast>>;

    /// Persist a forecast and return its artefact name
    fn put(&self, forecast: &PriceForecast) -> Result<String>;
}

pub trait PriceHistoryStore: Send + Sync {
    fn latest_dump(&self) -> Result<Vec<PricePoint>>;

    fn put_dump(&self, points: &[PricePoint]) -> Result<String>;
}

// ============================================================================
// File store
// ============================================================================

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
    fallback_retail: RetailParams,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ForecastRecord {
    ds: String,
    yhat: f64,
    #[serde(default)]
    yhat_lower: Option<f64>,
    #[serde(default)]
    yhat_upper: Option<f64>,
    #[serde(default)]
    yhat_energy: Option<f64>,
    #[serde(default)]
    yhat_retail: Option<f64>,
    #[serde(default)]
    yhat_retail_lower: Option<f64>,
    #[serde(default)]
    yhat_retail_upper: Option<f64>,
    #[serde(default)]
    trend: Option<f64>,
    #[serde(default)]
    yearly: Option<f64>,
    #[serde(default)]
    weekly: Option<f64>,
    #[serde(default)]
    daily: Option<f64>,
    #[serde(default)]
    hourly: Option<f64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DumpRecord {
    ds: String,
    price_eur_per_mwh: f64,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            fallback_retail: RetailParams::default(),
        }
    }

    /// Markup used when reading artefacts that only carry `yhat`
    pub fn with_fallback_retail(mut self, params: RetailParams) -> Self {
        self.fallback_retail = params;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn names_with_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| n.starts_with(prefix) && n.ends_with(".csv"))
            .collect();
        names.sort();
        Ok(names)
    }

    /// Write through a temporary file so readers never see a partial artefact
    fn replace_file(&self, name: &str, write: impl FnOnce(&Path) -> Result<()>) -> Result<String> {
        fs::create_dir_all(&self.dir)?;
        let tmp = self.dir.join(format!(".{name}.tmp"));
        write(&tmp)?;
        fs::rename(&tmp, self.dir.join(name))?;
        Ok(name.to_string())
    }

    fn read_forecast(&self, name: &str) -> Result<PriceForecast> {
        let path = self.dir.join(name);
        let mut reader = csv::Reader::from_path(&path)?;
        let markup = self.fallback_retail.markup();

        let mut rows = Vec::new();
        let mut legacy = false;
        for record in reader.deserialize() {
            let r: ForecastRecord = record?;
            let timestamp = parse_local_datetime(&r.ds).ok_or_else(|| {
                DynergyError::invalid(format!("{name}: unparseable ds '{}'", r.ds))
            })?;
            if r.yhat_retail.is_none() && r.yhat_energy.is_none() {
                legacy = true;
            }
            rows.push(record_to_point(timestamp, &r, markup));
        }
        if legacy {
            warn!("{} has no retail columns, deriving retail prices from yhat", name);
        }
        rows.sort_by_key(|r| r.timestamp);

        let (horizon_hours, fingerprint) = parse_forecast_name(name);
        let trained_until = match rows.len().checked_sub(horizon_hours + 1) {
            Some(idx) => rows[idx].timestamp,
            None => rows
                .first()
                .map(|r| r.timestamp - chrono::Duration::hours(1))
                .ok_or_else(|| DynergyError::missing(format!("{name} has no rows")))?,
        };

        Ok(PriceForecast {
            fingerprint,
            horizon_hours,
            trained_until,
            rows,
        })
    }
}

fn record_to_point(timestamp: NaiveDateTime, r: &ForecastRecord, markup: f64) -> RetailPricePoint {
    let energy = match (r.yhat_energy, r.yhat_retail) {
        (Some(e), _) => e,
        (None, Some(retail)) => (retail - markup).max(0.0),
        (None, None) => r.yhat.max(0.0),
    };
    let retail_total = r.yhat_retail.unwrap_or(energy + markup);
    let lower = r
        .yhat_retail_lower
        .or_else(|| r.yhat_lower.map(|l| l.max(0.0) + markup));
    let upper = r
        .yhat_retail_upper
        .or_else(|| r.yhat_upper.map(|u| u.max(0.0) + markup));

    let components = r.trend.map(|trend| ForecastComponents {
        trend,
        yearly: r.yearly.unwrap_or(0.0),
        weekly: r.weekly.unwrap_or(0.0),
        daily: r.daily.unwrap_or(0.0),
        hourly: r.hourly.unwrap_or(0.0),
    });

    RetailPricePoint {
        timestamp,
        wholesale: r.yhat,
        wholesale_lower: r.yhat_lower,
        wholesale_upper: r.yhat_upper,
        energy_component: energy,
        retail_total,
        lower,
        upper,
        components,
    }
}

/// `germany_price_forecast_<stamp>_<H>h_<fingerprint>.csv`; older names
/// such as `germany_price_forecast_720h.csv` yield an empty fingerprint.
fn parse_forecast_name(name: &str) -> (usize, String) {
    let stem = name
        .trim_start_matches(FORECAST_PREFIX)
        .trim_end_matches(".csv");
    let parts: Vec<&str> = stem.split('_').collect();
    let horizon_idx = parts.iter().position(|p| {
        p.len() > 1 && p.ends_with('h') && p[..p.len() - 1].chars().all(|c| c.is_ascii_digit())
    });
    match horizon_idx {
        Some(i) => {
            let part = parts[i];
            let horizon = part[..part.len() - 1].parse().unwrap_or(0);
            let fingerprint = parts.get(i + 1).map(|s| s.to_string()).unwrap_or_default();
            (horizon, fingerprint)
        }
        None => (0, String::new()),
    }
}

fn stamp() -> String {
    Local::now().format(STAMP_FORMAT).to_string()
}

impl ForecastStore for FileStore {
    fn latest(&self) -> Result<PriceForecast> {
        let names = self.names_with_prefix(FORECAST_PREFIX)?;
        let name = names.last().ok_or_else(|| {
            DynergyError::missing(format!("no price forecast in {}", self.dir.display()))
        })?;
        debug!("Reading newest forecast artefact {}", name);
        self.read_forecast(name)
    }

    fn find(&self, fingerprint: &str) -> Result<Option<PriceForecast>> {
        let suffix = format!("_{fingerprint}.csv");
        let names = self.names_with_prefix(FORECAST_PREFIX)?;
        match names.iter().rev().find(|n| n.ends_with(&suffix)) {
            Some(name) => self.read_forecast(name).map(Some),
            None => Ok(None),
        }
    }

    fn put(&self, forecast: &PriceForecast) -> Result<String> {
        let name = format!(
            "{FORECAST_PREFIX}{}_{}h_{}.csv",
            stamp(),
            forecast.horizon_hours,
            forecast.fingerprint
        );
        let name = self.replace_file(&name, |path| {
            let mut writer = csv::Writer::from_path(path)?;
            for r in &forecast.rows {
                let c = r.components;
                writer.serialize(ForecastRecord {
                    ds: r.timestamp.format(TS_FORMAT).to_string(),
                    yhat: r.wholesale,
                    yhat_lower: r.wholesale_lower,
                    yhat_upper: r.wholesale_upper,
                    yhat_energy: Some(r.energy_component),
                    yhat_retail: Some(r.retail_total),
                    yhat_retail_lower: r.lower,
                    yhat_retail_upper: r.upper,
                    trend: c.map(|c| c.trend),
                    yearly: c.map(|c| c.yearly),
                    weekly: c.map(|c| c.weekly),
                    daily: c.map(|c| c.daily),
                    hourly: c.map(|c| c.hourly),
                })?;
            }
            writer.flush()?;
            Ok(())
        })?;
        info!("Wrote forecast artefact {} ({} rows)", name, forecast.rows.len());
        Ok(name)
    }
}

impl PriceHistoryStore for FileStore {
    fn latest_dump(&self) -> Result<Vec<PricePoint>> {
        let names = self.names_with_prefix(DUMP_PREFIX)?;
        let name = names.last().ok_or_else(|| {
            DynergyError::missing(format!("no price dump in {}", self.dir.display()))
        })?;

        let mut reader = csv::Reader::from_path(self.dir.join(name))?;
        let mut points = Vec::new();
        for record in reader.deserialize() {
            let r: DumpRecord = record?;
            let ts = parse_local_datetime(&r.ds)
                .ok_or_else(|| DynergyError::invalid(format!("{name}: unparseable ds '{}'", r.ds)))?;
            points.push(PricePoint::new(ts, r.price_eur_per_mwh));
        }
        points.sort_by_key(|p| p.timestamp);
        points.dedup_by_key(|p| p.timestamp);
        debug!("Read {} prices from {}", points.len(), name);
        Ok(points)
    }

    fn put_dump(&self, points: &[PricePoint]) -> Result<String> {
        let name = format!("{DUMP_PREFIX}{}.csv", stamp());
        let name = self.replace_file(&name, |path| {
            let mut writer = csv::Writer::from_path(path)?;
            for p in points {
                writer.serialize(DumpRecord {
                    ds: p.timestamp.format(TS_FORMAT).to_string(),
                    price_eur_per_mwh: p.wholesale_eur_per_mwh,
                })?;
            }
            writer.flush()?;
            Ok(())
        })?;
        info!("Wrote price dump {} ({} rows)", name, points.len());
        Ok(name)
    }
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local store, newest insert wins
#[derive(Debug, Default)]
pub struct MemoryStore {
    forecasts: RwLock<Vec<PriceForecast>>,
    dumps: RwLock<Vec<Vec<PricePoint>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ForecastStore for MemoryStore {
    fn latest(&self) -> Result<PriceForecast> {
        self.forecasts
            .read()
            .last()
            .cloned()
            .ok_or_else(|| DynergyError::missing("no price forecast in memory store"))
    }

    fn find(&self, fingerprint: &str) -> Result<Option<PriceForecast>> {
        Ok(self
            .forecasts
            .read()
            .iter()
            .rev()
            .find(|f| f.fingerprint == fingerprint)
            .cloned())
    }

    fn put(&self, forecast: &PriceForecast) -> Result<String> {
        let mut forecasts = self.forecasts.write();
        forecasts.push(forecast.clone());
        Ok(format!("memory:{}", forecasts.len()))
    }
}

impl PriceHistoryStore for MemoryStore {
    fn latest_dump(&self) -> Result<Vec<PricePoint>> {
        self.dumps
            .read()
            .last()
            .cloned()
            .ok_or_else(|| DynergyError::missing("no price dump in memory store"))
    }

    fn put_dump(&self, points: &[PricePoint]) -> Result<String> {
        let mut dumps = self.dumps.write();
        dumps.push(points.to_vec());
        Ok(format!("memory:{}", dumps.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forecast_name() {
        assert_eq!(
            parse_forecast_name("germany_price_forecast_20250101_120000_720h_00ff00ff00ff00ff.csv"),
            (720, "00ff00ff00ff00ff".to_string())
        );
        assert_eq!(
            parse_forecast_name("germany_price_forecast_720h.csv"),
            (720, String::new())
        );
        assert_eq!(parse_forecast_name("germany_price_forecast_x.csv"), (0, String::new()));
    }

    #[test]
    fn test_legacy_record_derivation() {
        let ts = parse_local_datetime("2025-01-01 00:00:00").unwrap();
        let r = ForecastRecord {
            ds: "2025-01-01 00:00:00".into(),
            yhat: -20.0,
            yhat_lower: Some(-50.0),
            yhat_upper: Some(10.0),
            ..Default::default()
        };
        let p = record_to_point(ts, &r, 70.0);
        assert_eq!(p.energy_component, 0.0);
        assert_eq!(p.retail_total, 70.0);
        assert_eq!(p.lower, Some(70.0));
        assert_eq!(p.upper, Some(80.0));
        assert!(p.components.is_none());
    }

    #[test]
    fn test_retail_only_record_backs_out_energy() {
        let ts = parse_local_datetime("2025-01-01 00:00:00").unwrap();
        let r = ForecastRecord {
            ds: String::new(),
            yhat: 40.0,
            yhat_retail: Some(112.0),
            ..Default::default()
        };
        let p = record_to_point(ts, &r, 70.0);
        assert!((p.energy_component - 42.0).abs() < 1e-12);
        assert_eq!(p.retail_total, 112.0);
    }

    #[test]
    fn test_memory_store_newest_wins() {
        let store = MemoryStore::new();
        assert_eq!(store.latest().unwrap_err().kind(), "missing_artefact");

        let ts = parse_local_datetime("2025-01-01 00:00:00").unwrap();
        for fp in ["a", "b"] {
            store
                .put(&PriceForecast {
                    fingerprint: fp.into(),
                    horizon_hours: 0,
                    trained_until: ts,
                    rows: vec![],
                })
                .unwrap();
        }
        assert_eq!(store.latest().unwrap().fingerprint, "b");
        assert!(store.find("a").unwrap().is_some());
        assert!(store.find("c").unwrap().is_none());
    }
}
