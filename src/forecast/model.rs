//! Decomposable seasonal regression model.
//!
//! `y(t) = trend(t) + Σ s_k(t)` (additive) or `y(t) = trend(t) · (1 + Σ s_k(t))`
//! (multiplicative). The trend is either a flat level or a piecewise linear
//! curve with hinge changepoints; each seasonality is a truncated Fourier
//! series. Coefficients are the MAP estimate under Gaussian priors, which
//! reduces to ridge-penalised normal equations solved by Cholesky.
//! Prediction intervals are Gaussian with the in-sample residual scale.

use chrono::NaiveDateTime;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use strum::{Display, EnumString};
use tracing::{debug, warn};

use crate::domain::ForecastComponents;
use crate::error::{DynergyError, Result};

pub const HOURS_PER_DAY: f64 = 24.0;
pub const HOURS_PER_WEEK: f64 = 168.0;
pub const HOURS_PER_YEAR: f64 = 365.25 * 24.0;

/// Fewest training rows accepted by `fit`
pub const MIN_HISTORY: usize = 24;

const TREND_PRIOR_SCALE: f64 = 5.0;
const INITIAL_NOISE_VAR: f64 = 0.01;
const JITTER: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Growth {
    Flat,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SeasonalityMode {
    Additive,
    Multiplicative,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Seasonality {
    pub name: String,
    pub period_hours: f64,
    pub fourier_order: usize,
}

impl Seasonality {
    pub fn new(name: &str, period_hours: f64, fourier_order: usize) -> Self {
        Self {
            name: name.to_string(),
            period_hours,
            fourier_order,
        }
    }

    fn columns(&self) -> usize {
        2 * self.fourier_order
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub growth: Growth,
    pub seasonalities: Vec<Seasonality>,
    pub mode: SeasonalityMode,
    pub changepoint_prior_scale: f64,
    pub seasonality_prior_scale: f64,
    pub n_changepoints: usize,
    pub changepoint_range: f64,
    pub interval_width: f64,
}

impl ModelConfig {
    /// Day-ahead price model: no drift, strong intra-day and intra-week shape,
    /// 95% intervals.
    pub fn price_default() -> Self {
        Self {
            growth: Growth::Flat,
            seasonalities: vec![
                Seasonality::new("yearly", HOURS_PER_YEAR, 20),
                Seasonality::new("weekly", HOURS_PER_WEEK, 10),
                Seasonality::new("daily", HOURS_PER_DAY, 4),
                Seasonality::new("hourly", HOURS_PER_DAY, 12),
            ],
            mode: SeasonalityMode::Multiplicative,
            changepoint_prior_scale: 0.05,
            seasonality_prior_scale: 10.0,
            n_changepoints: 100,
            changepoint_range: 0.95,
            interval_width: 0.95,
        }
    }

    /// Household usage model: daily and weekly shape on a slowly moving level.
    pub fn usage_default() -> Self {
        Self {
            growth: Growth::Linear,
            seasonalities: vec![
                Seasonality::new("daily", HOURS_PER_DAY, 4),
                Seasonality::new("weekly", HOURS_PER_WEEK, 3),
            ],
            mode: SeasonalityMode::Additive,
            changepoint_prior_scale: 0.25,
            seasonality_prior_scale: 2.0,
            n_changepoints: 25,
            changepoint_range: 0.8,
            interval_width: 0.9,
        }
    }

    pub fn with_mode(mut self, mode: SeasonalityMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(DynergyError::invalid("interval width must lie in (0, 1)"));
        }
        if !(self.changepoint_prior_scale > 0.0 && self.seasonality_prior_scale > 0.0) {
            return Err(DynergyError::invalid("prior scales must be positive"));
        }
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(DynergyError::invalid("changepoint range must lie in (0, 1]"));
        }
        if self.seasonalities.iter().any(|s| !(s.period_hours > 0.0)) {
            return Err(DynergyError::invalid("seasonality periods must be positive"));
        }
        Ok(())
    }

    fn seasonal_columns(&self) -> usize {
        self.seasonalities.iter().map(Seasonality::columns).sum()
    }
}

/// One row of model output, in the units of the training target
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelPrediction {
    pub timestamp: NaiveDateTime,
    pub yhat: f64,
    pub lower: f64,
    pub upper: f64,
    pub components: ForecastComponents,
}

pub struct SeasonalModel {
    config: ModelConfig,
}

impl SeasonalModel {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Fit on `(timestamp, value)` rows. Rows are sorted internally.
    pub fn fit(&self, history: &[(NaiveDateTime, f64)]) -> Result<FittedModel> {
        self.config.validate()?;
        if history.len() < MIN_HISTORY {
            return Err(DynergyError::invalid(format!(
                "need at least {MIN_HISTORY} training rows, got {}",
                history.len()
            )));
        }
        if history.iter().any(|(_, y)| !y.is_finite()) {
            return Err(DynergyError::invalid("training values must be finite"));
        }

        let mut rows = history.to_vec();
        rows.sort_by_key(|(ts, _)| *ts);

        let t0 = epoch_hours(rows[0].0);
        let span = (epoch_hours(rows[rows.len() - 1].0) - t0).max(1.0);
        let y_scale = rows
            .iter()
            .map(|(_, y)| y.abs())
            .fold(0.0_f64, f64::max);
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };

        let t_scaled: Vec<f64> = rows.iter().map(|(ts, _)| (epoch_hours(*ts) - t0) / span).collect();
        let changepoints = match self.config.growth {
            Growth::Flat => Vec::new(),
            Growth::Linear => place_changepoints(
                &t_scaled,
                self.config.n_changepoints,
                self.config.changepoint_range,
            ),
        };

        let design = Design {
            config: self.config.clone(),
            t0,
            span,
            changepoints,
        };

        let n = rows.len();
        let y = DVector::from_iterator(n, rows.iter().map(|(_, v)| v / y_scale));
        let x_trend = design.trend_matrix(&rows);
        let x_seas = design.seasonal_matrix(&rows);

        let mut mode = self.config.mode;
        let (trend_beta, seasonal_beta) = match mode {
            SeasonalityMode::Additive => fit_additive(&design, &x_trend, &x_seas, &y)?,
            SeasonalityMode::Multiplicative => {
                let (trend_beta, _) = fit_two_pass(&x_trend, &y, &design.trend_penalties())?;
                let trend_hat = &x_trend * &trend_beta;
                if trend_hat.iter().any(|t| t.abs() < 1e-6) {
                    warn!("Trend crosses zero, falling back to additive seasonality");
                    mode = SeasonalityMode::Additive;
                    fit_additive(&design, &x_trend, &x_seas, &y)?
                } else {
                    let z = DVector::from_iterator(
                        n,
                        y.iter().zip(trend_hat.iter()).map(|(v, t)| v / t - 1.0),
                    );
                    let (seasonal_beta, _) =
                        fit_two_pass(&x_seas, &z, &design.seasonal_penalties())?;
                    (trend_beta, seasonal_beta)
                }
            }
        };

        let mut fitted = FittedModel {
            design,
            mode,
            y_scale,
            trend_beta,
            seasonal_beta,
            sigma: 0.0,
            z_score: z_score(self.config.interval_width)?,
            last_timestamp: rows[n - 1].0,
        };

        let sse: f64 = rows
            .iter()
            .map(|(ts, v)| {
                let (yhat, _) = fitted.point(*ts);
                (v - yhat).powi(2)
            })
            .sum();
        fitted.sigma = (sse / (n - 1) as f64).sqrt();
        if !fitted.sigma.is_finite() {
            return Err(DynergyError::ModelFailure(
                "residual scale is not finite".into(),
            ));
        }

        debug!(
            "Fitted seasonal model on {} rows ({} mode, sigma {:.4})",
            n, fitted.mode, fitted.sigma
        );
        Ok(fitted)
    }
}

/// A fitted model ready for prediction
#[derive(Debug, Clone)]
pub struct FittedModel {
    design: Design,
    mode: SeasonalityMode,
    y_scale: f64,
    trend_beta: DVector<f64>,
    seasonal_beta: DVector<f64>,
    sigma: f64,
    z_score: f64,
    last_timestamp: NaiveDateTime,
}

impl FittedModel {
    /// Residual standard deviation in target units
    pub fn sigma(&self) -> f64 {
        self.sigma
    }

    /// Seasonality mode actually used, after any fallback
    pub fn mode(&self) -> SeasonalityMode {
        self.mode
    }

    pub fn last_timestamp(&self) -> NaiveDateTime {
        self.last_timestamp
    }

    /// Hourly timestamps following the training data
    pub fn future_timestamps(&self, horizon_hours: usize) -> Vec<NaiveDateTime> {
        (1..=horizon_hours as i64)
            .map(|h| self.last_timestamp + chrono::Duration::hours(h))
            .collect()
    }

    pub fn predict(&self, timestamps: &[NaiveDateTime]) -> Vec<ModelPrediction> {
        let half_width = self.z_score * self.sigma;
        timestamps
            .iter()
            .map(|ts| {
                let (yhat, components) = self.point(*ts);
                ModelPrediction {
                    timestamp: *ts,
                    yhat,
                    lower: yhat - half_width,
                    upper: yhat + half_width,
                    components,
                }
            })
            .collect()
    }

    fn point(&self, ts: NaiveDateTime) -> (f64, ForecastComponents) {
        let hours = epoch_hours(ts);
        let mut trend_row = Vec::with_capacity(self.trend_beta.len());
        self.design.trend_row((hours - self.design.t0) / self.design.span, &mut trend_row);
        let trend_s: f64 = trend_row
            .iter()
            .zip(self.trend_beta.iter())
            .map(|(x, b)| x * b)
            .sum();
        let trend = trend_s * self.y_scale;

        let mut components = ForecastComponents {
            trend,
            ..Default::default()
        };
        let mut seasonal_row = Vec::with_capacity(self.seasonal_beta.len());
        self.design.seasonal_row(hours, &mut seasonal_row);

        let mut offset = 0;
        let mut total = 0.0;
        for s in &self.design.config.seasonalities {
            let cols = s.columns();
            let raw: f64 = seasonal_row[offset..offset + cols]
                .iter()
                .zip(self.seasonal_beta.iter().skip(offset))
                .map(|(x, b)| x * b)
                .sum();
            offset += cols;

            let value = match self.mode {
                SeasonalityMode::Additive => raw * self.y_scale,
                SeasonalityMode::Multiplicative => raw * trend,
            };
            total += value;
            match s.name.as_str() {
                "yearly" => components.yearly += value,
                "weekly" => components.weekly += value,
                "daily" => components.daily += value,
                "hourly" => components.hourly += value,
                _ => {}
            }
        }

        (trend + total, components)
    }
}

#[derive(Debug, Clone)]
struct Design {
    config: ModelConfig,
    t0: f64,
    span: f64,
    changepoints: Vec<f64>,
}

impl Design {
    fn trend_columns(&self) -> usize {
        match self.config.growth {
            Growth::Flat => 1,
            Growth::Linear => 2 + self.changepoints.len(),
        }
    }

    fn trend_row(&self, t: f64, out: &mut Vec<f64>) {
        out.push(1.0);
        if self.config.growth == Growth::Linear {
            out.push(t);
            out.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));
        }
    }

    fn seasonal_row(&self, hours: f64, out: &mut Vec<f64>) {
        for s in &self.config.seasonalities {
            for k in 1..=s.fourier_order {
                let angle = 2.0 * PI * k as f64 * hours / s.period_hours;
                out.push(angle.sin());
                out.push(angle.cos());
            }
        }
    }

    fn trend_matrix(&self, rows: &[(NaiveDateTime, f64)]) -> DMatrix<f64> {
        let p = self.trend_columns();
        let mut data = Vec::with_capacity(rows.len() * p);
        for (ts, _) in rows {
            self.trend_row((epoch_hours(*ts) - self.t0) / self.span, &mut data);
        }
        DMatrix::from_row_slice(rows.len(), p, &data)
    }

    fn seasonal_matrix(&self, rows: &[(NaiveDateTime, f64)]) -> DMatrix<f64> {
        let p = self.config.seasonal_columns();
        let mut data = Vec::with_capacity(rows.len() * p);
        for (ts, _) in rows {
            self.seasonal_row(epoch_hours(*ts), &mut data);
        }
        DMatrix::from_row_slice(rows.len(), p, &data)
    }

    /// Inverse prior variances for the trend block
    fn trend_penalties(&self) -> Vec<f64> {
        let base = 1.0 / TREND_PRIOR_SCALE.powi(2);
        let mut p = vec![base];
        if self.config.growth == Growth::Linear {
            p.push(base);
            let delta = 1.0 / self.config.changepoint_prior_scale.powi(2);
            p.extend(std::iter::repeat(delta).take(self.changepoints.len()));
        }
        p
    }

    fn seasonal_penalties(&self) -> Vec<f64> {
        vec![1.0 / self.config.seasonality_prior_scale.powi(2); self.config.seasonal_columns()]
    }
}

fn fit_additive(
    design: &Design,
    x_trend: &DMatrix<f64>,
    x_seas: &DMatrix<f64>,
    y: &DVector<f64>,
) -> Result<(DVector<f64>, DVector<f64>)> {
    let n = y.len();
    let pt = x_trend.ncols();
    let ps = x_seas.ncols();

    let mut x = DMatrix::zeros(n, pt + ps);
    x.columns_mut(0, pt).copy_from(x_trend);
    if ps > 0 {
        x.columns_mut(pt, ps).copy_from(x_seas);
    }

    let mut penalties = design.trend_penalties();
    penalties.extend(design.seasonal_penalties());

    let (beta, _) = fit_two_pass(&x, y, &penalties)?;
    let trend_beta = DVector::from_iterator(pt, beta.iter().take(pt).copied());
    let seasonal_beta = DVector::from_iterator(ps, beta.iter().skip(pt).copied());
    Ok((trend_beta, seasonal_beta))
}

/// Ridge fit with a provisional noise variance, then refit with the
/// variance estimated from the first pass residuals.
fn fit_two_pass(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    penalties: &[f64],
) -> Result<(DVector<f64>, f64)> {
    if x.ncols() == 0 {
        return Ok((DVector::zeros(0), 0.0));
    }
    let beta = ridge(x, y, penalties, INITIAL_NOISE_VAR)?;
    let resid = y - x * &beta;
    let sigma2 = (resid.norm_squared() / y.len() as f64).max(1e-12);
    let beta = ridge(x, y, penalties, sigma2)?;
    Ok((beta, sigma2))
}

fn ridge(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    penalties: &[f64],
    sigma2: f64,
) -> Result<DVector<f64>> {
    let mut a = x.tr_mul(x);
    for (j, p) in penalties.iter().enumerate() {
        a[(j, j)] += sigma2 * p + JITTER;
    }
    let b = x.tr_mul(y);
    let chol = a.cholesky().ok_or_else(|| {
        DynergyError::ModelFailure("normal equations are not positive definite".into())
    })?;
    let beta = chol.solve(&b);
    if beta.iter().any(|v| !v.is_finite()) {
        return Err(DynergyError::ModelFailure("non-finite coefficients".into()));
    }
    Ok(beta)
}

/// Changepoints at evenly spaced training rows within the first
/// `range` share of history, excluding the very first row.
fn place_changepoints(t_scaled: &[f64], n_changepoints: usize, range: f64) -> Vec<f64> {
    let hist = ((t_scaled.len() as f64) * range).floor() as usize;
    if hist < 2 || n_changepoints == 0 {
        return Vec::new();
    }
    let n = n_changepoints.min(hist - 1);
    let step = (hist - 1) as f64 / n as f64;
    let mut points: Vec<f64> = (1..=n)
        .map(|i| t_scaled[(i as f64 * step).round() as usize])
        .collect();
    points.dedup_by(|a, b| (*a - *b).abs() < f64::EPSILON);
    points
}

fn z_score(interval_width: f64) -> Result<f64> {
    let normal = Normal::new(0.0, 1.0)
        .map_err(|e| DynergyError::ModelFailure(format!("normal distribution: {e}")))?;
    Ok(normal.inverse_cdf(0.5 + interval_width / 2.0))
}

fn epoch_hours(ts: NaiveDateTime) -> f64 {
    ts.and_utc().timestamp() as f64 / 3600.0
}
