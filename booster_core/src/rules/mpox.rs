//! Mpox rules: age and dose count gates with a two-branch offset.
//!
//! The offset depends on what the last dose was: the dose that completed (or
//! belonged to) the primary series, or an earlier booster.

use super::{
    finish_record, release_after, within_booster_limit, AgeBand, CountBand, EvaluationContext,
};
use crate::config::{MpoxRuleConfig, OffsetSetting};
use crate::history::HistoryView;
use crate::{Error, ProtectionRecord, Result, TimeOffset, VaccinationEvent};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TwoBranchOffset {
    pub after_primary: TimeOffset,
    pub after_booster: TimeOffset,
    pub max_boosters: Option<u32>,
}

impl TwoBranchOffset {
    fn from_settings(
        after_primary: &OffsetSetting,
        after_booster: &OffsetSetting,
        max_boosters: Option<u32>,
        field: &str,
    ) -> Result<Option<Self>> {
        let primary = after_primary.resolve(&format!("{}_after_primary", field))?;
        let booster = after_booster.resolve(&format!("{}_after_booster", field))?;
        match (primary, booster) {
            (Some(after_primary), Some(after_booster)) => Ok(Some(Self {
                after_primary,
                after_booster,
                max_boosters,
            })),
            (None, None) => Ok(None),
            _ => Err(Error::Config(format!(
                "{}: after_primary and after_booster must be configured together",
                field
            ))),
        }
    }

    fn offset_for(&self, last: &VaccinationEvent) -> &TimeOffset {
        if last.counts_toward_primary() {
            &self.after_primary
        } else {
            &self.after_booster
        }
    }
}

#[derive(Clone, Debug)]
pub struct MpoxRule {
    pub name: String,
    pub age: AgeBand,
    pub doses: CountBand,
    pub campaign: Option<TwoBranchOffset>,
    pub self_pay: Option<TwoBranchOffset>,
    pub notify: bool,
}

impl MpoxRule {
    pub fn from_config(rule: &MpoxRuleConfig) -> Result<Self> {
        if rule.name.trim().is_empty() {
            return Err(Error::Config("mpox rule has an empty name".into()));
        }
        let prefix = format!("mpox.rules.{}", rule.name);

        Ok(Self {
            name: rule.name.clone(),
            age: AgeBand::new(rule.age_from, rule.age_to, &rule.name)?,
            doses: CountBand::new(rule.min_doses, rule.max_doses, "doses", &rule.name)?,
            campaign: TwoBranchOffset::from_settings(
                &rule.release_after_primary,
                &rule.release_after_booster,
                rule.max_boosters,
                &format!("{}.release", prefix),
            )?,
            self_pay: TwoBranchOffset::from_settings(
                &rule.self_pay_after_primary,
                &rule.self_pay_after_booster,
                rule.self_pay_max_boosters,
                &format!("{}.self_pay", prefix),
            )?,
            notify: rule.notify,
        })
    }

    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Option<ProtectionRecord> {
        let age_match = self.age.check(ctx.person, ctx.today())?;
        if !self.doses.contains(ctx.history.dose_count()) {
            return None;
        }

        let dated_last = dated_last_event(ctx.history);

        // No dated dose at all: assume an old, irrelevant one
        let campaign = self
            .campaign
            .as_ref()
            .filter(|branch| within_booster_limit(branch.max_boosters, ctx.history))
            .map(|branch| {
                let release = dated_last
                    .map(|(event, at)| release_after(at, branch.offset_for(event)))
                    .unwrap_or(ctx.now);
                age_match.not_before(release)
            });

        let self_pay = self
            .self_pay
            .as_ref()
            .filter(|branch| within_booster_limit(branch.max_boosters, ctx.history))
            .and_then(|branch| {
                dated_last.map(|(event, at)| {
                    age_match.not_before(release_after(at, branch.offset_for(event)))
                })
            });

        let immunized_until = if ctx.person.primary_immunization_complete {
            campaign
        } else {
            None
        };

        Some(finish_record(
            immunized_until,
            campaign,
            self_pay,
            ctx.permitted.clone(),
            self.notify && ctx.notify,
        ))
    }
}

fn dated_last_event(history: &HistoryView) -> Option<(&VaccinationEvent, chrono::NaiveDateTime)> {
    let last = history.last_event()?;
    last.timestamp().map(|at| (last, at))
}
