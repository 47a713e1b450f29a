#![forbid(unsafe_code)]

//! Booster eligibility engine for COVID-19, FSME and Mpox vaccinations.
//!
//! This crate provides:
//! - Domain types (persons, doses, certificates, protection records)
//! - Configuration of the per-disease rule sets
//! - Product catalog and the permitted-product cache
//! - Rule families and per-disease engines
//! - Merge and ordering of rule results
//! - CSV/JSON reporting of outcomes

pub mod types;
pub mod error;
pub mod catalog;
pub mod cache;
pub mod config;
pub mod logging;
pub mod history;
pub mod rules;
pub mod merge;
pub mod engine;
pub mod report;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{build_default_catalog, get_default_catalog, Catalog, FileCatalog, ProductCatalog};
pub use cache::PermittedVaccineCache;
pub use config::Config;
pub use history::{extract_history_view, load_cases, EvaluationCase, HistoryRecords, HistoryView};
pub use merge::{default_notification_preference, merge, reduce, sort_rules};
pub use engine::{BoosterEngine, DiseaseEngine, EvaluationOutcome};
