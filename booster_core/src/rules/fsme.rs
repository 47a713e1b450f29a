//! FSME rules: vaccine-specific offsets.
//!
//! FSME has no separate primary-immunization phase in the engine: every dose,
//! including the second and third dose of the primary series, is released by
//! one of these rules. A rule is selected by the product of the last dose, the
//! dose count and whether the primary series follows the conventional or the
//! accelerated schedule.

use super::{
    finish_record, release_after, within_booster_limit, AgeBand, CountBand, EvaluationContext,
};
use crate::config::{FsmeConfig, FsmeRuleConfig, ScheduleKind};
use crate::{Error, ProductId, ProtectionRecord, Result, TimeOffset};
use std::collections::BTreeSet;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FsmeBranch {
    pub offset: TimeOffset,
    pub max_boosters: Option<u32>,
}

#[derive(Clone, Debug)]
pub struct FsmeRule {
    pub name: String,
    pub age: AgeBand,
    pub doses: CountBand,
    /// Products the last dose must be one of; empty matches any product
    pub products: BTreeSet<ProductId>,
    pub schedule: ScheduleKind,
    pub accelerated_max_gap_days: i64,
    /// Only offer the product of the last dose
    pub same_product: bool,
    pub campaign: Option<FsmeBranch>,
    pub self_pay: Option<FsmeBranch>,
    pub notify: bool,
}

impl FsmeRule {
    pub fn from_config(rule: &FsmeRuleConfig, settings: &FsmeConfig) -> Result<Self> {
        if rule.name.trim().is_empty() {
            return Err(Error::Config("fsme rule has an empty name".into()));
        }
        let field = |setting: &str| format!("fsme.rules.{}.{}", rule.name, setting);

        let campaign = rule
            .release
            .resolve(&field("release"))?
            .map(|offset| FsmeBranch {
                offset,
                max_boosters: rule.max_boosters,
            });
        let self_pay = rule
            .self_pay_release
            .resolve(&field("self_pay_release"))?
            .map(|offset| FsmeBranch {
                offset,
                max_boosters: rule.self_pay_max_boosters,
            });

        Ok(Self {
            name: rule.name.clone(),
            age: AgeBand::new(rule.age_from, rule.age_to, &rule.name)?,
            doses: CountBand::new(rule.min_doses, rule.max_doses, "doses", &rule.name)?,
            products: rule.products.iter().cloned().collect(),
            schedule: rule.schedule,
            accelerated_max_gap_days: settings.accelerated_max_gap_days,
            same_product: rule.same_product,
            campaign,
            self_pay,
            notify: rule.notify,
        })
    }

    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Option<ProtectionRecord> {
        let age_match = self.age.check(ctx.person, ctx.today())?;
        if !self.doses.contains(ctx.history.dose_count()) {
            return None;
        }
        if !self.products.is_empty() {
            let last_product = ctx.history.last_product()?;
            if !self.products.contains(last_product) {
                return None;
            }
        }
        if !self.schedule_matches(ctx) {
            return None;
        }

        let last_dose_at = ctx.history.last_timestamp();

        // Without a dated dose the previous dose is treated as long past
        let campaign = self
            .campaign
            .as_ref()
            .filter(|branch| within_booster_limit(branch.max_boosters, ctx.history))
            .map(|branch| {
                let release = last_dose_at
                    .map(|at| release_after(at, &branch.offset))
                    .unwrap_or(ctx.now);
                age_match.not_before(release)
            });

        let self_pay = self
            .self_pay
            .as_ref()
            .filter(|branch| within_booster_limit(branch.max_boosters, ctx.history))
            .and_then(|branch| {
                last_dose_at.map(|at| age_match.not_before(release_after(at, &branch.offset)))
            });

        let immunized_until = if ctx.person.primary_immunization_complete {
            campaign
        } else {
            None
        };

        let allowed = match ctx.history.last_product() {
            Some(last) if self.same_product => ctx
                .permitted
                .iter()
                .filter(|p| *p == last)
                .cloned()
                .collect(),
            _ => ctx.permitted.clone(),
        };

        Some(finish_record(
            immunized_until,
            campaign,
            self_pay,
            allowed,
            self.notify && ctx.notify,
        ))
    }

    fn schedule_matches(&self, ctx: &EvaluationContext<'_>) -> bool {
        let accelerated = || {
            ctx.history
                .uses_accelerated_schedule(self.accelerated_max_gap_days)
        };
        match self.schedule {
            ScheduleKind::Any => true,
            ScheduleKind::Conventional => !accelerated(),
            ScheduleKind::Accelerated => accelerated(),
        }
    }
}
