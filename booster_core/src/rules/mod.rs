//! Booster release rules.
//!
//! Every rule is a stateless, parameterized predicate + calculator: given a
//! person's history it either does not match (`None`) or produces exactly one
//! [`ProtectionRecord`]. Rules are built once from configuration and never
//! mutated afterwards.
//!
//! Three families exist, one per disease, plus a catch-all that only
//! computes a protection horizon:
//! - [`CovidRule`]: age / dose count / points banded, illness-aware
//! - [`FsmeRule`]: vaccine-specific offsets, conventional vs accelerated schedule
//! - [`MpoxRule`]: age / dose count with a two-branch offset
//! - [`ProtectionOnlyRule`]: no release, immunized-until only

pub mod covid;
pub mod fsme;
pub mod mpox;
pub mod protection;

pub use covid::CovidRule;
pub use fsme::FsmeRule;
pub use mpox::MpoxRule;
pub use protection::ProtectionOnlyRule;

use crate::history::HistoryView;
use crate::{
    start_of_day, Error, PersonContext, ProductId, ProtectionRecord, Result, TimeOffset,
};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeSet;

/// Everything a rule may look at during one evaluation
#[derive(Clone, Copy, Debug)]
pub struct EvaluationContext<'a> {
    pub person: &'a PersonContext,
    pub history: &'a HistoryView,
    /// Snapshot of the products currently recommended for booster use
    pub permitted: &'a BTreeSet<ProductId>,
    pub now: NaiveDateTime,
    /// Whether the person should be notified at all (see `merge::default_notification_preference`)
    pub notify: bool,
}

impl EvaluationContext<'_> {
    pub fn today(&self) -> NaiveDate {
        self.now.date()
    }
}

/// A configured rule of any family
#[derive(Clone, Debug)]
pub enum RuleVariant {
    Covid(CovidRule),
    Fsme(FsmeRule),
    Mpox(MpoxRule),
    ProtectionOnly(ProtectionOnlyRule),
}

impl RuleVariant {
    pub fn name(&self) -> &str {
        match self {
            RuleVariant::Covid(rule) => &rule.name,
            RuleVariant::Fsme(rule) => &rule.name,
            RuleVariant::Mpox(rule) => &rule.name,
            RuleVariant::ProtectionOnly(rule) => &rule.name,
        }
    }

    /// Evaluate the rule against one person's history
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Option<ProtectionRecord> {
        let record = match self {
            RuleVariant::Covid(rule) => rule.evaluate(ctx),
            RuleVariant::Fsme(rule) => rule.evaluate(ctx),
            RuleVariant::Mpox(rule) => rule.evaluate(ctx),
            RuleVariant::ProtectionOnly(rule) => rule.evaluate(ctx),
        };

        if record.is_some() {
            tracing::debug!("Rule '{}' matched person {}", self.name(), ctx.person.id);
        }
        record
    }

    /// Estimated months from the last dose until campaign-funded release
    ///
    /// Rules without a campaign branch return `None`. The engine orders its
    /// rules by this value, which decides whose `notify_on_release` survives
    /// the merge.
    pub fn months_until_release(&self) -> Option<u32> {
        match self {
            RuleVariant::Covid(rule) => rule.campaign.as_ref().map(|b| b.offset.whole_months()),
            RuleVariant::Fsme(rule) => rule.campaign.as_ref().map(|b| b.offset.whole_months()),
            RuleVariant::Mpox(rule) => rule
                .campaign
                .as_ref()
                .map(|b| b.after_primary.whole_months()),
            RuleVariant::ProtectionOnly(_) => None,
        }
    }
}

// ============================================================================
// Shared gates
// ============================================================================

/// Inclusive age range in completed years; `to = None` is open-ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AgeBand {
    pub from: u32,
    pub to: Option<u32>,
}

/// How a person passed the age gate
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AgeMatch {
    Within,
    /// One year too young: the rule applies, but no release before this day
    Anticipatory(NaiveDateTime),
}

impl AgeMatch {
    /// Move `date` to the anticipatory birthday if that is later
    pub fn not_before(&self, date: NaiveDateTime) -> NaiveDateTime {
        match self {
            AgeMatch::Within => date,
            AgeMatch::Anticipatory(birthday) => date.max(*birthday),
        }
    }
}

impl AgeBand {
    pub fn new(from: u32, to: Option<u32>, rule: &str) -> Result<Self> {
        if let Some(to) = to {
            if to < from {
                return Err(Error::Config(format!(
                    "rule '{}': age_to {} is below age_from {}",
                    rule, to, from
                )));
            }
        }
        Ok(Self { from, to })
    }

    pub fn is_open(&self) -> bool {
        self.from == 0 && self.to.is_none()
    }

    /// Check the person's age on `today`
    ///
    /// A person exactly one year below `from` still matches; release dates
    /// are then held back to the birthday on which they reach `from`, so
    /// nobody has to wait for the next batch run after that birthday.
    pub fn check(&self, person: &PersonContext, today: NaiveDate) -> Option<AgeMatch> {
        if self.is_open() {
            return Some(AgeMatch::Within);
        }

        let age = person.age_on(today)?;
        let below_upper = self.to.map_or(true, |to| age <= to);
        if age >= self.from && below_upper {
            return Some(AgeMatch::Within);
        }

        if self.from > 0 && age + 1 == self.from {
            let birthday = person.birthday_reaching(self.from)?;
            return Some(AgeMatch::Anticipatory(birthday.and_time(NaiveTime::MIN)));
        }

        None
    }
}

/// Inclusive count range; `max = None` is open-ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountBand {
    pub min: u32,
    pub max: Option<u32>,
}

impl CountBand {
    pub const OPEN: CountBand = CountBand { min: 0, max: None };

    pub fn new(min: u32, max: Option<u32>, field: &str, rule: &str) -> Result<Self> {
        if let Some(max) = max {
            if max < min {
                return Err(Error::Config(format!(
                    "rule '{}': max {} {} is below min {}",
                    rule, field, max, min
                )));
            }
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.min && self.max.map_or(true, |max| value <= max)
    }
}

/// Release date `offset` after the last dose, at the start of that day
pub(crate) fn release_after(last_dose_at: NaiveDateTime, offset: &TimeOffset) -> NaiveDateTime {
    start_of_day(offset.after(last_dose_at))
}

/// Whether a branch limited to `max_boosters` still applies
pub(crate) fn within_booster_limit(max_boosters: Option<u32>, history: &HistoryView) -> bool {
    max_boosters.map_or(true, |max| history.booster_count() < max)
}

/// Apply the product gate: no permitted product means no release date
pub(crate) fn finish_record(
    immunized_until: Option<NaiveDateTime>,
    released_from: Option<NaiveDateTime>,
    released_from_self_pay: Option<NaiveDateTime>,
    allowed_products: BTreeSet<ProductId>,
    notify: bool,
) -> ProtectionRecord {
    let (released_from, released_from_self_pay) = if allowed_products.is_empty() {
        (None, None)
    } else {
        (released_from, released_from_self_pay)
    };

    ProtectionRecord {
        immunized_until,
        released_from,
        released_from_self_pay,
        allowed_products,
        notify_on_release: notify,
    }
}
