//! Error types for the booster_core library.

use crate::types::{Disease, Mandant};
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for booster_core operations
///
/// The engine itself performs no I/O, so everything here is either a
/// configuration defect found at startup or a failure of a collaborator
/// (catalog file, case file) at the edge.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A disease is not offered in the configured jurisdiction
    #[error("Configuration error: {disease} is not supported for mandant {mandant}")]
    UnsupportedMandant { disease: Disease, mandant: Mandant },

    /// Product catalog could not be read or is inconsistent
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Evaluation request could not be served
    #[error("Evaluation error: {0}")]
    Evaluation(String),
}
