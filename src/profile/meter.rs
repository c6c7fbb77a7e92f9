use serde::Deserialize;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

use crate::domain::MeterReading;
use crate::error::{DynergyError, Result};
use crate::utils::parse_local_datetime;

#[derive(Debug, Deserialize)]
struct MeterRecord {
    datetime: String,
    value: Option<f64>,
}

/// Read a `datetime,value[,status]` CSV. Rows without a value are skipped;
/// unparseable timestamps reject the whole file.
pub fn read_meter_csv<R: Read>(reader: R) -> Result<Vec<MeterReading>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    for required in ["datetime", "value"] {
        if !headers.iter().any(|h| h == required) {
            return Err(DynergyError::invalid(format!(
                "meter data is missing the '{required}' column"
            )));
        }
    }

    let mut readings = Vec::new();
    let mut skipped = 0usize;
    for (line, record) in rdr.deserialize::<MeterRecord>().enumerate() {
        let record = record?;
        let timestamp = parse_local_datetime(&record.datetime).ok_or_else(|| {
            DynergyError::invalid(format!(
                "row {}: cannot parse datetime '{}'",
                line + 2,
                record.datetime
            ))
        })?;
        match record.value {
            Some(value) if value.is_finite() => readings.push(MeterReading { timestamp, value }),
            _ => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!("Skipped {} meter rows without a usable value", skipped);
    }
    if readings.is_empty() {
        return Err(DynergyError::invalid("meter data contains no readings"));
    }
    readings.sort_by_key(|r| r.timestamp);
    debug!("Read {} meter readings", readings.len());
    Ok(readings)
}

pub fn read_meter_file(path: impl AsRef<Path>) -> Result<Vec<MeterReading>> {
    let file = std::fs::File::open(path.as_ref())?;
    read_meter_csv(file)
}
