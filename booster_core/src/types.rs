//! Core domain types for the booster eligibility engine.
//!
//! This module defines the fundamental types used throughout the system:
//! - Diseases, jurisdictions and vaccine products
//! - Time offsets used by release rules
//! - Vaccination events, illness records and the person context
//! - The protection record produced by every evaluation

use crate::Error;
use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Disease and Jurisdiction
// ============================================================================

/// Disease a booster decision is made for
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Disease {
    Covid,
    Fsme,
    Mpox,
}

impl Disease {
    pub const ALL: [Disease; 3] = [Disease::Covid, Disease::Fsme, Disease::Mpox];

    /// Whether booster rules only apply once primary immunization is complete.
    ///
    /// FSME has no primary/booster split: every dose, including the doses of
    /// the primary series, is released by a rule.
    pub fn requires_primary_immunization(self) -> bool {
        !matches!(self, Disease::Fsme)
    }

    /// Whether the disease is offered in the given jurisdiction
    pub fn is_offered_in(self, mandant: Mandant) -> bool {
        !matches!((self, mandant), (Disease::Fsme, Mandant::Zh))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Disease::Covid => "covid",
            Disease::Fsme => "fsme",
            Disease::Mpox => "mpox",
        }
    }
}

impl fmt::Display for Disease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Disease {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "covid" | "covid19" | "covid-19" => Ok(Disease::Covid),
            "fsme" | "tbe" => Ok(Disease::Fsme),
            "mpox" | "affenpocken" => Ok(Disease::Mpox),
            other => Err(Error::Evaluation(format!("Unknown disease: {}", other))),
        }
    }
}

/// Jurisdiction ("mandant") the engine runs for
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Mandant {
    #[default]
    Be,
    Zh,
}

impl fmt::Display for Mandant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mandant::Be => "BE",
            Mandant::Zh => "ZH",
        })
    }
}

// ============================================================================
// Products
// ============================================================================

/// Identifier of a vaccine product in the catalog
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(String);

impl ProductId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ProductId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A vaccine product as supplied by the catalog
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct VaccineProduct {
    pub id: ProductId,
    pub name: String,
    pub diseases: Vec<Disease>,
    #[serde(default)]
    pub recommended_for_booster: bool,
    #[serde(default)]
    pub discontinued: bool,
}

impl VaccineProduct {
    /// Whether this product may currently be offered as a booster for `disease`
    pub fn is_booster_candidate_for(&self, disease: Disease) -> bool {
        self.recommended_for_booster && !self.discontinued && self.diseases.contains(&disease)
    }
}

// ============================================================================
// Time Offsets
// ============================================================================

/// Calendar unit of a configured offset
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OffsetUnit {
    Days,
    Weeks,
    Months,
    Years,
}

/// A validated amount + unit pair, e.g. "4 months"
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeOffset {
    pub amount: u32,
    pub unit: OffsetUnit,
}

impl TimeOffset {
    pub const fn new(amount: u32, unit: OffsetUnit) -> Self {
        Self { amount, unit }
    }

    pub const fn days(amount: u32) -> Self {
        Self::new(amount, OffsetUnit::Days)
    }

    pub const fn weeks(amount: u32) -> Self {
        Self::new(amount, OffsetUnit::Weeks)
    }

    pub const fn months(amount: u32) -> Self {
        Self::new(amount, OffsetUnit::Months)
    }

    pub const fn years(amount: u32) -> Self {
        Self::new(amount, OffsetUnit::Years)
    }

    /// Shift `at` forward by this offset.
    ///
    /// Month arithmetic clamps to the end of shorter months (Jan 31 + 1 month
    /// is Feb 28/29). Results beyond chrono's range saturate.
    pub fn after(&self, at: NaiveDateTime) -> NaiveDateTime {
        let amount = i64::from(self.amount);
        let shifted = match self.unit {
            OffsetUnit::Days => at.checked_add_signed(Duration::days(amount)),
            OffsetUnit::Weeks => at.checked_add_signed(Duration::weeks(amount)),
            OffsetUnit::Months => at.checked_add_months(Months::new(self.amount)),
            OffsetUnit::Years => {
                at.checked_add_months(Months::new(self.amount.saturating_mul(12)))
            }
        };
        shifted.unwrap_or(NaiveDateTime::MAX)
    }

    /// Coarse length in whole months, used to order rules
    pub fn whole_months(&self) -> u32 {
        match self.unit {
            OffsetUnit::Days => self.amount / 30,
            OffsetUnit::Weeks => self.amount.saturating_mul(7) / 30,
            OffsetUnit::Months => self.amount,
            OffsetUnit::Years => self.amount.saturating_mul(12),
        }
    }
}

impl fmt::Display for TimeOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.amount, self.unit)
    }
}

/// Truncate a timestamp to midnight of the same calendar day
pub fn start_of_day(at: NaiveDateTime) -> NaiveDateTime {
    at.date().and_time(NaiveTime::MIN)
}

// ============================================================================
// Vaccination History
// ============================================================================

/// A dose administered and recorded by the campaign itself
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Dose {
    pub administered_at: NaiveDateTime,
    pub product: ProductId,
    pub counts_toward_primary: bool,
    #[serde(default)]
    pub self_paid: bool,
}

/// Vaccinations declared from an external certificate
///
/// The date of the latest dose may be unknown.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExternalCertificate {
    pub latest_dose_at: Option<NaiveDateTime>,
    pub product: ProductId,
    pub dose_count: u32,
    #[serde(default)]
    pub counts_toward_primary: bool,
    #[serde(default)]
    pub accelerated_schedule: bool,
}

/// One entry of a person's vaccination history
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VaccinationEvent {
    Dose(Dose),
    ExternalCertificate(ExternalCertificate),
}

impl VaccinationEvent {
    pub fn timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            VaccinationEvent::Dose(dose) => Some(dose.administered_at),
            VaccinationEvent::ExternalCertificate(cert) => cert.latest_dose_at,
        }
    }

    pub fn product(&self) -> &ProductId {
        match self {
            VaccinationEvent::Dose(dose) => &dose.product,
            VaccinationEvent::ExternalCertificate(cert) => &cert.product,
        }
    }

    /// Number of doses this event stands for
    pub fn dose_count(&self) -> u32 {
        match self {
            VaccinationEvent::Dose(_) => 1,
            VaccinationEvent::ExternalCertificate(cert) => cert.dose_count,
        }
    }

    pub fn counts_toward_primary(&self) -> bool {
        match self {
            VaccinationEvent::Dose(dose) => dose.counts_toward_primary,
            VaccinationEvent::ExternalCertificate(cert) => cert.counts_toward_primary,
        }
    }

    /// A booster dose administered and paid for by the campaign
    pub fn is_campaign_funded_booster(&self) -> bool {
        match self {
            VaccinationEvent::Dose(dose) => !dose.counts_toward_primary && !dose.self_paid,
            VaccinationEvent::ExternalCertificate(_) => false,
        }
    }
}

/// A dated prior infection
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct IllnessRecord {
    pub date: NaiveDate,
}

// ============================================================================
// Person Context
// ============================================================================

/// Self-declared severity of chronic conditions
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ChronicCondition {
    #[default]
    None,
    Moderate,
    Severe,
}

/// Questionnaire answers feeding the points score
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Questionnaire {
    #[serde(default)]
    pub chronic_condition: ChronicCondition,
    #[serde(default)]
    pub lives_in_care_home: bool,
    #[serde(default)]
    pub health_worker: bool,
    #[serde(default)]
    pub pregnant: bool,
}

impl Questionnaire {
    /// Priority points derived from the answers
    pub fn points(&self) -> u32 {
        let chronic = match self.chronic_condition {
            ChronicCondition::None => 0,
            ChronicCondition::Moderate => 1,
            ChronicCondition::Severe => 2,
        };
        chronic
            + if self.lives_in_care_home { 2 } else { 0 }
            + u32::from(self.health_worker)
            + u32::from(self.pregnant)
    }
}

/// How the registration entered the system
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationSource {
    #[default]
    Online,
    CallCenter,
    VaccinationSite,
    HomeVisit,
    MassImport,
}

/// Read-only facts about the person being evaluated
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PersonContext {
    pub id: Uuid,
    #[serde(default)]
    pub birth_date: Option<NaiveDate>,
    #[serde(default)]
    pub questionnaire: Questionnaire,
    /// Disease-specific marker set by the caller for the evaluated disease
    #[serde(default)]
    pub primary_immunization_complete: bool,
    #[serde(default)]
    pub anonymized: bool,
    #[serde(default)]
    pub source: RegistrationSource,
    #[serde(default = "default_wants_notification")]
    pub wants_release_notification: bool,
}

fn default_wants_notification() -> bool {
    true
}

impl PersonContext {
    pub fn new(id: Uuid, birth_date: Option<NaiveDate>) -> Self {
        Self {
            id,
            birth_date,
            questionnaire: Questionnaire::default(),
            primary_immunization_complete: false,
            anonymized: false,
            source: RegistrationSource::default(),
            wants_release_notification: true,
        }
    }

    /// Age in completed years on `day`, if the birth date is known
    pub fn age_on(&self, day: NaiveDate) -> Option<u32> {
        let birth = self.birth_date?;
        let mut age = day.year() - birth.year();
        if (day.month(), day.day()) < (birth.month(), birth.day()) {
            age -= 1;
        }
        Some(age.max(0) as u32)
    }

    /// The birthday on which the person turns `age`
    ///
    /// Agrees with [`Self::age_on`]: someone born on 29 February turns a year
    /// older on 1 March in non-leap years.
    pub fn birthday_reaching(&self, age: u32) -> Option<NaiveDate> {
        let birth = self.birth_date?;
        let year = birth.year().checked_add(i32::try_from(age).ok()?)?;
        NaiveDate::from_ymd_opt(year, birth.month(), birth.day())
            .or_else(|| NaiveDate::from_ymd_opt(year, 3, 1))
    }

    pub fn points(&self) -> u32 {
        self.questionnaire.points()
    }
}

// ============================================================================
// Protection Record
// ============================================================================

/// Outcome of one evaluation for one person and disease
///
/// An empty `allowed_products` set means "no product is currently permitted",
/// which differs from "no rule matched" (no record at all).
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtectionRecord {
    pub immunized_until: Option<NaiveDateTime>,
    pub released_from: Option<NaiveDateTime>,
    pub released_from_self_pay: Option<NaiveDateTime>,
    pub allowed_products: BTreeSet<ProductId>,
    pub notify_on_release: bool,
}
