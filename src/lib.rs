//! Household electricity tariff cost estimation and indexed-tariff risk scoring.

pub mod config;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod market;
pub mod profile;
pub mod risk;
pub mod tariff;
pub mod telemetry;
pub mod utils;

pub use error::{DynergyError, Result};
