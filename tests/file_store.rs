//! Flat-file artefact store and the fetch → forecast pipeline on disk.

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use std::fs;
use tempfile::TempDir;

use dynergy::domain::PricePoint;
use dynergy::error::Result;
use dynergy::forecast::{ForecastEngine, ModelConfig, RetailParams, Seasonality, SeasonalPriceForecaster};
use dynergy::market::{FileStore, ForecastStore, PriceHistoryStore, WholesaleSource, FORECAST_PREFIX};

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 9, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn prices(days: i64) -> Vec<PricePoint> {
    (0..days * 24)
        .map(|h| {
            let evening = if (17..21).contains(&(h % 24)) { 60.0 } else { 0.0 };
            PricePoint::new(t0() + Duration::hours(h), 70.0 + evening)
        })
        .collect()
}

fn forecast_files(dir: &TempDir) -> Vec<String> {
    fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok()?.file_name().into_string().ok())
        .filter(|n| n.starts_with(FORECAST_PREFIX))
        .collect()
}

struct CannedSource(Vec<PricePoint>);

#[async_trait]
impl WholesaleSource for CannedSource {
    async fn load_wholesale(&self, _limit: Option<usize>) -> Result<Vec<PricePoint>> {
        Ok(self.0.clone())
    }
}

#[test]
fn test_newest_dump_wins() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("germany_dayahead_prices_raw_20200101_000000.csv"),
        "ds,price_eur_per_mwh\n2020-01-01 00:00:00,1.0\n",
    )
    .unwrap();

    let store = FileStore::new(dir.path());
    let name = store.put_dump(&prices(2)).unwrap();
    assert!(name.starts_with("germany_dayahead_prices_raw_"));

    let loaded = store.latest_dump().unwrap();
    assert_eq!(loaded, prices(2));
}

#[test]
fn test_empty_directory_is_missing_artefact() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path().join("not-created-yet"));
    assert_eq!(store.latest().unwrap_err().kind(), "missing_artefact");
    assert_eq!(store.latest_dump().unwrap_err().kind(), "missing_artefact");
}

#[test]
fn test_legacy_forecast_without_retail_columns() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("germany_price_forecast_20240101_000000_2h_legacy.csv"),
        "ds,yhat\n\
         2024-01-01 00:00:00,50.0\n\
         2024-01-01 01:00:00,40.0\n\
         2024-01-01 02:00:00,-20.0\n\
         2024-01-01 03:00:00,10.0\n",
    )
    .unwrap();

    let forecast = FileStore::new(dir.path()).latest().unwrap();
    assert_eq!(forecast.horizon_hours, 2);
    assert_eq!(forecast.fingerprint, "legacy");
    assert_eq!(forecast.future().len(), 2);

    let negative = &forecast.future()[0];
    assert_eq!(negative.energy_component, 0.0);
    assert_eq!(negative.retail_total, 70.0);
    assert_eq!(forecast.rows[0].retail_total, 120.0);
}

#[tokio::test]
async fn test_pipeline_persists_and_reuses_forecast() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::new(dir.path());
    let model = ModelConfig {
        seasonalities: vec![Seasonality::new("hourly", 24.0, 6)],
        ..ModelConfig::price_default()
    };
    let engine = ForecastEngine::new(
        Box::new(CannedSource(prices(14))),
        Box::new(SeasonalPriceForecaster::new(model, RetailParams::default())),
        Box::new(store.clone()),
        Box::new(store.clone()),
    );

    let first = engine.refresh(None, 48).await.unwrap();
    assert_eq!(first.future().len(), 48);
    assert!(first.rows.iter().all(|r| r.energy_component >= 0.0));

    let second = engine.forecast_prices(48).unwrap();
    assert_eq!(second.fingerprint, first.fingerprint);
    assert_eq!(forecast_files(&dir).len(), 1);

    let latest = store.latest().unwrap();
    assert_eq!(latest.trained_until, first.trained_until);
    assert_eq!(latest.rows.len(), first.rows.len());
    for (a, b) in latest.rows.iter().zip(&first.rows) {
        assert_eq!(a.timestamp, b.timestamp);
        assert!((a.retail_total - b.retail_total).abs() < 1e-9);
        assert!(a.components.is_some());
    }
}
