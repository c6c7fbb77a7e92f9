use chrono::{Datelike, Duration, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

use crate::domain::{BillingWindow, MeterReading, UsagePoint};
use crate::error::{DynergyError, Result};
use crate::utils::floor_hour;
use crate::utils::stats::mode_i64;

pub const QUARTER_HOUR_SECS: i64 = 15 * 60;

/// Most frequent gap between consecutive samples, in seconds
pub fn modal_spacing(timestamps: &[NaiveDateTime]) -> Option<i64> {
    let diffs: Vec<i64> = timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds())
        .filter(|d| *d > 0)
        .collect();
    mode_i64(&diffs)
}

/// Factor turning a sample value into kWh for the detected spacing:
/// kW over 15 minutes, kW over one hour, otherwise taken as kWh already.
pub fn energy_factor(spacing_secs: Option<i64>) -> f64 {
    match spacing_secs {
        Some(QUARTER_HOUR_SECS) => 0.25,
        // hourly kW and anything else map one to one
        _ => 1.0,
    }
}

/// Sum samples into contiguous hourly bins. Hours without samples are 0.
pub fn resample_hourly(samples: &[(NaiveDateTime, f64)]) -> Vec<UsagePoint> {
    let mut bins: BTreeMap<NaiveDateTime, f64> = BTreeMap::new();
    for (ts, kwh) in samples {
        *bins.entry(floor_hour(*ts)).or_insert(0.0) += kwh;
    }

    let (first, last) = match (bins.keys().next(), bins.keys().next_back()) {
        (Some(f), Some(l)) => (*f, *l),
        _ => return Vec::new(),
    };
    let hours = (last - first).num_hours();
    (0..=hours)
        .map(|h| {
            let ts = first + Duration::hours(h);
            UsagePoint::new(ts, bins.get(&ts).copied().unwrap_or(0.0))
        })
        .collect()
}

/// Meter path: power readings to strictly hourly, non-negative kWh.
pub fn shape_meter(readings: &[MeterReading]) -> Result<Vec<UsagePoint>> {
    if readings.is_empty() {
        return Err(DynergyError::invalid("no meter readings to shape"));
    }
    let mut sorted = readings.to_vec();
    sorted.sort_by_key(|r| r.timestamp);

    let timestamps: Vec<NaiveDateTime> = sorted.iter().map(|r| r.timestamp).collect();
    let spacing = modal_spacing(&timestamps);
    let factor = energy_factor(spacing);
    debug!(
        "Meter spacing {:?}s, multiplying readings by {}",
        spacing, factor
    );

    let mut negatives = 0usize;
    let samples: Vec<(NaiveDateTime, f64)> = sorted
        .iter()
        .map(|r| {
            if r.value < 0.0 {
                negatives += 1;
            }
            (r.timestamp, r.value.max(0.0) * factor)
        })
        .collect();
    if negatives > 0 {
        warn!("Clipped {} negative meter readings to zero", negatives);
    }

    let hourly = resample_hourly(&samples);
    info!(
        "Shaped {} meter readings into {} hourly rows ({:.2} kWh)",
        readings.len(),
        hourly.len(),
        hourly.iter().map(|u| u.kwh).sum::<f64>()
    );
    Ok(hourly)
}

/// Re-date an hourly profile onto a billing window by `(month, day, hour)`.
/// Dates missing from the profile (e.g. 29 February) are dropped.
pub fn align_to_window(profile: &[UsagePoint], window: &BillingWindow) -> Vec<UsagePoint> {
    let mut lookup: HashMap<(u32, u32, u32), f64> = HashMap::with_capacity(profile.len());
    for p in profile {
        let ts = p.timestamp;
        lookup
            .entry((ts.month(), ts.day(), ts.hour()))
            .or_insert(p.kwh);
    }

    let mut out = Vec::with_capacity(window.hours());
    let mut missing_days = 0usize;
    for date in window.dates() {
        let before = out.len();
        for hour in 0..24 {
            if let Some(kwh) = lookup.get(&(date.month(), date.day(), hour)) {
                if let Some(ts) = date.and_hms_opt(hour, 0, 0) {
                    out.push(UsagePoint::new(ts, *kwh));
                }
            }
        }
        if out.len() == before {
            missing_days += 1;
        }
    }
    if missing_days > 0 {
        warn!("Reference profile has no data for {} window days", missing_days);
    }
    out
}
