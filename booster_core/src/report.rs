//! CSV and JSON output of evaluation outcomes.

use crate::engine::EvaluationOutcome;
use crate::{ProductId, Result};
use chrono::NaiveDateTime;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    person_id: String,
    disease: String,
    matched: bool,
    immunized_until: Option<String>,
    released_from: Option<String>,
    released_from_self_pay: Option<String>,
    allowed_products: String,
    notify_on_release: Option<bool>,
}

impl From<&EvaluationOutcome> for CsvRow {
    fn from(outcome: &EvaluationOutcome) -> Self {
        let protection = outcome.protection.as_ref();
        let format = |at: Option<NaiveDateTime>| at.map(|t| t.format(TIMESTAMP_FORMAT).to_string());

        CsvRow {
            person_id: outcome.person_id.to_string(),
            disease: outcome.disease.to_string(),
            matched: protection.is_some(),
            immunized_until: format(protection.and_then(|p| p.immunized_until)),
            released_from: format(protection.and_then(|p| p.released_from)),
            released_from_self_pay: format(protection.and_then(|p| p.released_from_self_pay)),
            allowed_products: protection
                .map(|p| {
                    p.allowed_products
                        .iter()
                        .map(ProductId::as_str)
                        .collect::<Vec<_>>()
                        .join(";")
                })
                .unwrap_or_default(),
            notify_on_release: protection.map(|p| p.notify_on_release),
        }
    }
}

/// Write outcomes as CSV with a header row
pub fn write_csv<W: Write>(writer: W, outcomes: &[EvaluationOutcome]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(writer);
    for outcome in outcomes {
        writer.serialize(CsvRow::from(outcome))?;
    }
    writer.flush()?;
    Ok(())
}

/// Append outcomes to a CSV file, writing headers only for a new file
pub fn append_csv(path: &Path, outcomes: &[EvaluationOutcome]) -> Result<usize> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let needs_headers = file.metadata()?.len() == 0;

    let mut writer = csv::WriterBuilder::new()
        .has_headers(needs_headers)
        .from_writer(file);
    for outcome in outcomes {
        writer.serialize(CsvRow::from(outcome))?;
    }
    writer.flush()?;

    tracing::info!("Appended {} outcomes to {:?}", outcomes.len(), path);
    Ok(outcomes.len())
}

/// Write outcomes as a pretty-printed JSON array
pub fn write_json<W: Write>(mut writer: W, outcomes: &[EvaluationOutcome]) -> Result<()> {
    serde_json::to_writer_pretty(&mut writer, outcomes)?;
    writeln!(writer)?;
    Ok(())
}
