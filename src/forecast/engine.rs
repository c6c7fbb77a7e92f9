use tracing::info;

use super::PriceForecaster;
use crate::domain::PricePoint;
use crate::error::Result;
use crate::forecast::PriceForecast;
use crate::market::{ForecastStore, PriceHistoryStore, WholesaleSource};

/// Wires the wholesale source, price forecaster and artefact stores into the
/// fetch → forecast → persist pipeline.
pub struct ForecastEngine {
    pub source: Box<dyn WholesaleSource>,
    pub price_forecaster: Box<dyn PriceForecaster>,
    pub history: Box<dyn PriceHistoryStore>,
    pub forecasts: Box<dyn ForecastStore>,
}

impl ForecastEngine {
    pub fn new(
        source: Box<dyn WholesaleSource>,
        price: Box<dyn PriceForecaster>,
        history: Box<dyn PriceHistoryStore>,
        forecasts: Box<dyn ForecastStore>,
    ) -> Self {
        Self {
            source,
            price_forecaster: price,
            history,
            forecasts,
        }
    }

    /// Pull wholesale prices and persist them as a new dump
    pub async fn fetch_prices(&self, limit_chunks: Option<usize>) -> Result<Vec<PricePoint>> {
        let points = self.source.load_wholesale(limit_chunks).await?;
        let name = self.history.put_dump(&points)?;
        info!("Stored {} wholesale prices as {}", points.len(), name);
        Ok(points)
    }

    /// Forecast from the newest dump. A cached artefact with the same
    /// fingerprint is reused.
    pub fn forecast_prices(&self, horizon_hours: usize) -> Result<PriceForecast> {
        let history = self.history.latest_dump()?;
        self.forecast_from(&history, horizon_hours)
    }

    pub fn forecast_from(&self, history: &[PricePoint], horizon_hours: usize) -> Result<PriceForecast> {
        let fingerprint = self.price_forecaster.fingerprint(history, horizon_hours);
        if let Some(cached) = self.forecasts.find(&fingerprint)? {
            info!("Reusing cached forecast {}", fingerprint);
            return Ok(cached);
        }

        let forecast = self.price_forecaster.forecast(history, horizon_hours)?;
        self.forecasts.put(&forecast)?;
        Ok(forecast)
    }

    /// Fetch then forecast in one go
    pub async fn refresh(
        &self,
        limit_chunks: Option<usize>,
        horizon_hours: usize,
    ) -> Result<PriceForecast> {
        let history = self.fetch_prices(limit_chunks).await?;
        self.forecast_from(&history, horizon_hours)
    }

    /// Newest persisted retail price forecast
    pub fn latest_forecast(&self) -> Result<PriceForecast> {
        self.forecasts.latest()
    }
}
