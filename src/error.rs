use serde::Serialize;
use thiserror::Error;

/// Error kinds surfaced by the core pipeline.
#[derive(Debug, Error)]
pub enum DynergyError {
    /// The wholesale API returned nothing usable.
    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Caller supplied malformed meter data, missing columns or a non-positive scalar.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// No forecast file or no reference profile on disk.
    #[error("Missing artefact: {0}")]
    MissingArtefact(String),

    /// Usage and price series do not intersect.
    #[error("Empty overlap: {0}")]
    EmptyOverlap(String),

    /// The seasonal model could not be fitted or evaluated.
    #[error("Model failure: {0}")]
    ModelFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T> = std::result::Result<T, DynergyError>;

/// Short error kind plus human message, for user-visible reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub error: &'static str,
    pub message: String,
}

impl DynergyError {
    /// Machine-readable kind string
    pub fn kind(&self) -> &'static str {
        match self {
            DynergyError::UpstreamUnavailable(_) => "upstream_unavailable",
            DynergyError::InvalidInput(_) | DynergyError::Csv(_) => "invalid_input",
            DynergyError::MissingArtefact(_) => "missing_artefact",
            DynergyError::EmptyOverlap(_) => "empty_overlap",
            DynergyError::ModelFailure(_) => "model_failure",
            DynergyError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => "missing_artefact",
            DynergyError::Io(_) => "upstream_unavailable",
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            error: self.kind(),
            message: self.to_string(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        DynergyError::InvalidInput(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        DynergyError::MissingArtefact(msg.into())
    }
}
