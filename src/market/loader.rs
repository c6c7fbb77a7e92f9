use anyhow::Context;
use async_trait::async_trait;
use chrono::DateTime;
use chrono_tz::Tz;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::MarketConfig;
use crate::domain::PricePoint;
use crate::error::{DynergyError, Result};

/// Prices beyond this magnitude are treated as data errors (EUR/MWh)
pub const ABSURD_PRICE: f64 = 1e6;

/// Number of index chunks covering `training_days`; each chunk spans about a week.
pub fn required_chunks(training_days: u32) -> usize {
    training_days as usize / 7 + 1
}

#[async_trait]
pub trait WholesaleSource: Send + Sync {
    /// Hourly day-ahead prices, oldest first. `limit_chunks` keeps only the
    /// newest N chunks of the upstream index.
    async fn load_wholesale(&self, limit_chunks: Option<usize>) -> Result<Vec<PricePoint>>;
}

/// Client for the SMARD chart data API (index + weekly chunks)
#[derive(Clone)]
pub struct SmardClient {
    client: reqwest::Client,
    base_url: String,
    filter_id: u32,
    region: String,
    resolution: String,
    index_timeout: Duration,
    chunk_timeout: Duration,
    tz: Tz,
}

#[derive(Debug, Deserialize)]
struct IndexResponse {
    timestamps: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct ChunkResponse {
    series: Vec<(i64, Option<f64>)>,
}

impl SmardClient {
    pub fn new(config: &MarketConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("dynergy/0.2"));
        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            filter_id: config.filter_id,
            region: config.region.clone(),
            resolution: config.resolution.clone(),
            index_timeout: config.index_timeout(),
            chunk_timeout: config.chunk_timeout(),
            tz: config.tz()?,
        })
    }

    fn index_url(&self) -> String {
        format!(
            "{}/{}/{}/index_{}.json",
            self.base_url, self.filter_id, self.region, self.resolution
        )
    }

    fn chunk_url(&self, ts_ms: i64) -> String {
        format!(
            "{base}/{f}/{r}/{f}_{r}_{res}_{ts_ms}.json",
            base = self.base_url,
            f = self.filter_id,
            r = self.region,
            res = self.resolution,
        )
    }

    async fn fetch_index(&self) -> anyhow::Result<Vec<i64>> {
        let url = self.index_url();
        info!("Fetching price index from {}", url);
        let resp = self
            .client
            .get(&url)
            .timeout(self.index_timeout)
            .send()
            .await
            .context("index GET failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("index API error: HTTP {status}");
        }
        let body: IndexResponse = resp.json().await.context("index JSON parse failed")?;
        let mut timestamps = body.timestamps;
        timestamps.sort_unstable();
        if timestamps.is_empty() {
            anyhow::bail!("index lists no chunks");
        }
        Ok(timestamps)
    }

    async fn fetch_chunk(&self, ts_ms: i64) -> anyhow::Result<Vec<(i64, Option<f64>)>> {
        let resp = self
            .client
            .get(self.chunk_url(ts_ms))
            .timeout(self.chunk_timeout)
            .send()
            .await
            .context("chunk GET failed")?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("chunk API error: HTTP {status}");
        }
        let body: ChunkResponse = resp.json().await.context("chunk JSON parse failed")?;
        if body.series.is_empty() {
            anyhow::bail!("chunk has no rows");
        }
        Ok(body.series)
    }
}

#[async_trait]
impl WholesaleSource for SmardClient {
    async fn load_wholesale(&self, limit_chunks: Option<usize>) -> Result<Vec<PricePoint>> {
        let mut timestamps = self
            .fetch_index()
            .await
            .map_err(|e| DynergyError::UpstreamUnavailable(format!("{e:#}")))?;
        if let Some(n) = limit_chunks {
            let skip = timestamps.len().saturating_sub(n);
            timestamps.drain(..skip);
        }

        let total = timestamps.len();
        let mut loaded = 0usize;
        let mut raw = Vec::new();
        for (i, ts) in timestamps.iter().enumerate() {
            match self.fetch_chunk(*ts).await {
                Ok(rows) => {
                    debug!("Loaded chunk {}/{} ({}): {} rows", i + 1, total, ts, rows.len());
                    loaded += 1;
                    raw.extend(rows);
                }
                Err(e) => warn!("Skipping chunk {} ({}/{}): {:#}", ts, i + 1, total, e),
            }
        }

        if loaded == 0 {
            return Err(DynergyError::UpstreamUnavailable(format!(
                "none of {total} chunks could be loaded"
            )));
        }

        let points = clean_series(raw, self.tz);
        info!(
            "Loaded {} hourly prices from {}/{} chunks",
            points.len(),
            loaded,
            total
        );
        Ok(points)
    }
}

/// Drop missing or absurd prices, de-duplicate on epoch, sort and convert
/// to zone-local wall time.
pub fn clean_series(raw: Vec<(i64, Option<f64>)>, tz: Tz) -> Vec<PricePoint> {
    let before = raw.len();
    let mut valid: Vec<(i64, f64)> = raw
        .into_iter()
        .filter_map(|(ms, price)| {
            price
                .filter(|p| p.is_finite() && p.abs() <= ABSURD_PRICE)
                .map(|p| (ms, p))
        })
        .collect();
    let removed = before - valid.len();
    if removed > 0 {
        info!("Removed {} rows with missing or invalid prices", removed);
    }

    valid.sort_by_key(|(ms, _)| *ms);
    valid.dedup_by_key(|(ms, _)| *ms);

    let mut points: Vec<PricePoint> = valid
        .into_iter()
        .filter_map(|(ms, price)| {
            let utc = DateTime::from_timestamp_millis(ms)?;
            Some(PricePoint::new(utc.with_timezone(&tz).naive_local(), price))
        })
        .collect();

    // The repeated wall-clock hour at the autumn DST switch keeps its first value
    let len = points.len();
    points.dedup_by_key(|p| p.timestamp);
    if points.len() < len {
        debug!("Collapsed {} repeated local hours", len - points.len());
    }
    points
}
