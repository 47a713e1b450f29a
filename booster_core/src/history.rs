//! Vaccination history view fed into the rule engine.
//!
//! The view is derived fresh for every evaluation from the raw records the
//! caller assembled (internal doses, the external certificate declaration and
//! illness records). It is never persisted.

use crate::{
    Disease, Dose, ExternalCertificate, IllnessRecord, PersonContext, ProductId, Result,
    VaccinationEvent,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Ordered vaccination and illness history of one person for one disease
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HistoryView {
    events: Vec<VaccinationEvent>,
    illnesses: Vec<IllnessRecord>,
}

impl HistoryView {
    /// Events ascending by timestamp, unknown timestamps first
    pub fn events(&self) -> &[VaccinationEvent] {
        &self.events
    }

    /// Illness records ascending by date
    pub fn illnesses(&self) -> &[IllnessRecord] {
        &self.illnesses
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn last_event(&self) -> Option<&VaccinationEvent> {
        self.events.last()
    }

    /// Timestamp of the most recent event, if that event has one
    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.last_event().and_then(VaccinationEvent::timestamp)
    }

    pub fn last_product(&self) -> Option<&ProductId> {
        self.last_event().map(VaccinationEvent::product)
    }

    /// Total number of doses represented by the history
    pub fn dose_count(&self) -> u32 {
        self.events.iter().map(VaccinationEvent::dose_count).sum()
    }

    /// Number of doses given after primary immunization
    pub fn booster_count(&self) -> u32 {
        self.events
            .iter()
            .filter(|e| !e.counts_toward_primary())
            .map(VaccinationEvent::dose_count)
            .sum()
    }

    pub fn newest_illness(&self) -> Option<&IllnessRecord> {
        self.illnesses.last()
    }

    /// Whether the primary series follows the accelerated schedule
    ///
    /// True when a certificate declares it, or when two consecutive primary
    /// doses were given less than `max_gap_days` apart.
    pub fn uses_accelerated_schedule(&self, max_gap_days: i64) -> bool {
        let declared = self.events.iter().any(|e| {
            matches!(e, VaccinationEvent::ExternalCertificate(cert) if cert.accelerated_schedule)
        });
        if declared {
            return true;
        }

        let primary: Vec<NaiveDateTime> = self
            .events
            .iter()
            .filter(|e| e.counts_toward_primary())
            .filter_map(VaccinationEvent::timestamp)
            .collect();

        primary
            .windows(2)
            .any(|pair| (pair[1] - pair[0]).num_days() < max_gap_days)
    }
}

/// Build the ordered history view from raw, possibly sparse records
///
/// Missing entries are dropped. Events are sorted ascending by timestamp with
/// unknown timestamps first; the sort is stable, so events sharing a timestamp
/// keep the order they were supplied in.
pub fn extract_history_view(
    doses: impl IntoIterator<Item = Option<Dose>>,
    external_certificate: Option<ExternalCertificate>,
    illnesses: impl IntoIterator<Item = Option<IllnessRecord>>,
) -> HistoryView {
    let mut events: Vec<VaccinationEvent> = external_certificate
        .map(VaccinationEvent::ExternalCertificate)
        .into_iter()
        .chain(doses.into_iter().flatten().map(VaccinationEvent::Dose))
        .collect();
    // Option orders None before Some, which puts unknown dates first
    events.sort_by_key(VaccinationEvent::timestamp);

    let mut illnesses: Vec<IllnessRecord> = illnesses.into_iter().flatten().collect();
    illnesses.sort_by_key(|i| i.date);

    HistoryView { events, illnesses }
}

/// Raw history records as delivered by the aggregation layer
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HistoryRecords {
    #[serde(default)]
    pub doses: Vec<Option<Dose>>,
    #[serde(default)]
    pub external_certificate: Option<ExternalCertificate>,
    #[serde(default)]
    pub illnesses: Vec<Option<IllnessRecord>>,
}

impl HistoryRecords {
    pub fn to_view(&self) -> HistoryView {
        extract_history_view(
            self.doses.iter().cloned(),
            self.external_certificate.clone(),
            self.illnesses.iter().copied(),
        )
    }
}

/// One person/disease pair to evaluate
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvaluationCase {
    pub disease: Disease,
    pub person: PersonContext,
    #[serde(default)]
    pub history: HistoryRecords,
}

/// Load evaluation cases from a JSON array file
pub fn load_cases(path: &Path) -> Result<Vec<EvaluationCase>> {
    let contents = std::fs::read_to_string(path)?;
    let cases: Vec<EvaluationCase> = serde_json::from_str(&contents)?;
    tracing::info!("Loaded {} evaluation cases from {:?}", cases.len(), path);
    Ok(cases)
}
