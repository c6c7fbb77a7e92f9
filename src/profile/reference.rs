use chrono::{Duration, NaiveDateTime};
use std::path::Path;
use tracing::{debug, info};

use super::meter::read_meter_file;
use super::shaper::{align_to_window, modal_spacing, resample_hourly, QUARTER_HOUR_SECS};
use crate::domain::{total_kwh, BillingWindow, MeterReading, UsagePoint};
use crate::error::{DynergyError, Result};

/// Standard household load profile as hourly kWh.
///
/// The source file holds watt values; at 15-minute spacing they become
/// `W × 0.25 / 1000` kWh per bin before hourly summation.
#[derive(Debug, Clone)]
pub struct ReferenceProfile {
    hourly: Vec<UsagePoint>,
    annual_total: f64,
}

impl ReferenceProfile {
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DynergyError::missing(format!(
                "reference load profile not found at {}",
                path.display()
            )));
        }
        let readings = read_meter_file(path)?;
        let profile = Self::from_watts(&readings)?;
        info!(
            "Loaded reference profile {} ({} hours, {:.1} kWh/year)",
            path.display(),
            profile.hourly.len(),
            profile.annual_total
        );
        Ok(profile)
    }

    pub fn from_watts(readings: &[MeterReading]) -> Result<Self> {
        let timestamps: Vec<NaiveDateTime> = readings.iter().map(|r| r.timestamp).collect();
        let factor = match modal_spacing(&timestamps) {
            Some(QUARTER_HOUR_SECS) => 0.25 / 1000.0,
            _ => 1.0 / 1000.0,
        };
        let samples: Vec<(NaiveDateTime, f64)> = readings
            .iter()
            .map(|r| (r.timestamp, r.value * factor))
            .collect();
        Self::from_hourly(resample_hourly(&samples))
    }

    /// Wrap an hourly kWh series. The annual total is taken over the first
    /// year of data so multi-year files are not double counted.
    pub fn from_hourly(hourly: Vec<UsagePoint>) -> Result<Self> {
        let first = hourly
            .first()
            .map(|u| u.timestamp)
            .ok_or_else(|| DynergyError::invalid("reference profile is empty"))?;
        let year_end = first + Duration::days(365);
        let first_year: Vec<UsagePoint> = hourly
            .iter()
            .filter(|u| u.timestamp < year_end)
            .copied()
            .collect();
        let annual_total = total_kwh(&first_year);
        if !(annual_total > 0.0) {
            return Err(DynergyError::invalid(
                "reference profile has no positive consumption",
            ));
        }
        debug!("Reference profile annual total {:.3} kWh", annual_total);
        Ok(Self {
            hourly,
            annual_total,
        })
    }

    pub fn annual_total(&self) -> f64 {
        self.annual_total
    }

    pub fn hourly(&self) -> &[UsagePoint] {
        &self.hourly
    }

    /// Every sample scaled by `annual_kwh / annual_total`
    pub fn scaled_to(&self, annual_kwh: f64) -> Result<ReferenceProfile> {
        if !(annual_kwh > 0.0 && annual_kwh.is_finite()) {
            return Err(DynergyError::invalid(format!(
                "annual consumption must be positive, got {annual_kwh}"
            )));
        }
        let factor = annual_kwh / self.annual_total;
        Ok(ReferenceProfile {
            hourly: self
                .hourly
                .iter()
                .map(|u| UsagePoint::new(u.timestamp, u.kwh * factor))
                .collect(),
            annual_total: annual_kwh,
        })
    }

    /// Scalar path: scale to `annual_kwh` and re-date onto the billing window
    pub fn usage_for_window(&self, annual_kwh: f64, window: &BillingWindow) -> Result<Vec<UsagePoint>> {
        let scaled = self.scaled_to(annual_kwh)?;
        Ok(align_to_window(&scaled.hourly, window))
    }
}
