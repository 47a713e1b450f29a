//! COVID booster rules: age, dose count and points banded.
//!
//! Release rules per branch:
//! 1. `last dose + offset`, truncated to the start of the day
//! 2. If an illness offset is configured, `newest illness + illness offset`;
//!    the later of the two candidates wins
//! 3. An anticipatory birthday later than the result replaces it
//!
//! On top of that a self-pay cutoff may suppress the campaign-funded branch
//! entirely for people whose last dose was a campaign-funded booster given on
//! or after the cutoff day.

use super::{
    finish_record, release_after, within_booster_limit, AgeBand, CountBand, EvaluationContext,
};
use crate::config::{CovidConfig, CovidRuleConfig};
use crate::history::HistoryView;
use crate::{Error, PersonContext, ProductId, ProtectionRecord, Result, TimeOffset};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeSet;

/// Persons younger than this only get the configured under-30 product
pub const UNDER_30_AGE: u32 = 30;

/// One release branch (campaign-funded or self-pay)
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CovidBranch {
    pub offset: TimeOffset,
    pub illness_offset: Option<TimeOffset>,
    pub max_boosters: Option<u32>,
}

impl CovidBranch {
    fn release_date(
        &self,
        last_dose_at: NaiveDateTime,
        newest_illness: Option<NaiveDateTime>,
    ) -> NaiveDateTime {
        let by_dose = release_after(last_dose_at, &self.offset);
        match (newest_illness, &self.illness_offset) {
            (Some(illness), Some(offset)) => by_dose.max(release_after(illness, offset)),
            _ => by_dose,
        }
    }
}

#[derive(Clone, Debug)]
pub struct CovidRule {
    pub name: String,
    pub age: AgeBand,
    pub doses: CountBand,
    pub points: Option<CountBand>,
    pub immunity_window: TimeOffset,
    pub campaign: Option<CovidBranch>,
    pub self_pay: Option<CovidBranch>,
    pub self_pay_cutoff: Option<NaiveDate>,
    pub under_30_product: Option<ProductId>,
    pub notify: bool,
}

impl CovidRule {
    /// Build a rule from its config entry and the disease-wide settings
    pub fn from_config(rule: &CovidRuleConfig, settings: &CovidConfig) -> Result<Self> {
        if rule.name.trim().is_empty() {
            return Err(Error::Config("covid rule has an empty name".into()));
        }
        let field = |setting: &str| format!("covid.rules.{}.{}", rule.name, setting);

        let points = match (rule.min_points, rule.max_points) {
            (None, None) => None,
            (min, max) => Some(CountBand::new(
                min.unwrap_or(0),
                max,
                "points",
                &rule.name,
            )?),
        };

        let illness_offset = rule.illness_release.resolve(&field("illness_release"))?;
        let release = rule.release.resolve(&field("release"))?;
        if rule.self_pay_only && release.is_some() {
            return Err(Error::Config(format!(
                "{}: a self-pay-only rule cannot have a campaign release",
                field("release")
            )));
        }

        let campaign = release.map(|offset| CovidBranch {
            offset,
            illness_offset,
            max_boosters: rule.max_boosters,
        });
        let self_pay = rule
            .self_pay_release
            .resolve(&field("self_pay_release"))?
            .map(|offset| CovidBranch {
                offset,
                illness_offset,
                max_boosters: rule.self_pay_max_boosters,
            });

        Ok(Self {
            name: rule.name.clone(),
            age: AgeBand::new(rule.age_from, rule.age_to, &rule.name)?,
            doses: CountBand::new(rule.min_doses, rule.max_doses, "doses", &rule.name)?,
            points,
            immunity_window: settings.immunity_window.require("covid.immunity_window")?,
            campaign,
            self_pay,
            self_pay_cutoff: settings.self_pay_cutoff,
            under_30_product: settings.under_30_product.clone(),
            notify: rule.notify,
        })
    }

    /// # Panics
    ///
    /// Panics if the rule matches a non-empty history whose last event has
    /// no date. COVID doses always carry a date; the caller must not hand
    /// over undated declarations for this disease. An empty history is
    /// released immediately instead.
    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Option<ProtectionRecord> {
        let age_match = self.age.check(ctx.person, ctx.today())?;
        if !self.doses.contains(ctx.history.dose_count()) {
            return None;
        }
        if let Some(points) = &self.points {
            if !points.contains(ctx.person.points()) {
                return None;
            }
        }

        let allowed = restrict_under_30(
            ctx.permitted,
            self.under_30_product.as_ref(),
            ctx.person,
            ctx.today(),
        );

        // No dose at all: the campaign branch is due immediately
        if ctx.history.is_empty() {
            let campaign = self
                .campaign
                .as_ref()
                .map(|_| age_match.not_before(ctx.now));
            return Some(finish_record(
                None,
                campaign,
                None,
                allowed,
                self.notify && ctx.notify,
            ));
        }

        let last_dose_at = ctx.history.last_timestamp().unwrap_or_else(|| {
            panic!(
                "covid rule '{}' requires a dated last dose (person {})",
                self.name, ctx.person.id
            )
        });
        let newest_illness = ctx
            .history
            .newest_illness()
            .map(|illness| illness.date.and_time(NaiveTime::MIN));

        let campaign = self
            .campaign
            .as_ref()
            .filter(|branch| within_booster_limit(branch.max_boosters, ctx.history))
            .filter(|_| !self.cutoff_suppresses_campaign(ctx.history))
            .map(|branch| age_match.not_before(branch.release_date(last_dose_at, newest_illness)));

        let self_pay = self
            .self_pay
            .as_ref()
            .filter(|branch| within_booster_limit(branch.max_boosters, ctx.history))
            .map(|branch| age_match.not_before(branch.release_date(last_dose_at, newest_illness)));

        Some(finish_record(
            Some(self.immunity_window.after(last_dose_at)),
            campaign,
            self_pay,
            allowed,
            self.notify && ctx.notify,
        ))
    }

    /// Funding policy change: a campaign-funded booster on or after the
    /// cutoff means the next dose is self-pay only
    fn cutoff_suppresses_campaign(&self, history: &HistoryView) -> bool {
        let Some(cutoff) = self.self_pay_cutoff else {
            return false;
        };
        history.last_event().map_or(false, |event| {
            event.is_campaign_funded_booster()
                && event.timestamp().map_or(false, |at| at.date() >= cutoff)
        })
    }
}

/// Collapse the permitted set to the under-30 product for younger persons
///
/// If that product is not currently permitted the result is empty.
pub(crate) fn restrict_under_30(
    permitted: &BTreeSet<ProductId>,
    under_30_product: Option<&ProductId>,
    person: &PersonContext,
    today: NaiveDate,
) -> BTreeSet<ProductId> {
    match (under_30_product, person.age_on(today)) {
        (Some(product), Some(age)) if age < UNDER_30_AGE => permitted
            .iter()
            .filter(|p| *p == product)
            .cloned()
            .collect(),
        _ => permitted.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::test_support::*;
    use crate::{Dose, ExternalCertificate};

    fn settings() -> CovidConfig {
        CovidConfig {
            rules: Vec::new(),
            ..CovidConfig::default()
        }
    }

    fn adults_rule(settings: &CovidConfig) -> CovidRule {
        let config = CovidRuleConfig {
            age_from: 16,
            min_doses: 2,
            release: TimeOffset::months(4).into(),
            illness_release: TimeOffset::months(4).into(),
            self_pay_release: TimeOffset::months(4).into(),
            ..CovidRuleConfig::named("adults")
        };
        CovidRule::from_config(&config, settings).unwrap()
    }

    fn primary_series() -> Vec<Dose> {
        vec![
            dose(at(2021, 5, 1), "comirnaty", true),
            dose(at(2021, 6, 1), "comirnaty", true),
        ]
    }

    #[test]
    fn test_release_after_last_dose() {
        let rule = adults_rule(&settings());
        let person = person_born(1970, 1, 1);
        let history = history(primary_series(), Vec::new());
        let permitted = products(&["comirnaty", "spikevax"]);

        let record = rule
            .evaluate(&context(&person, &history, &permitted, at(2021, 9, 1)))
            .unwrap();

        assert_eq!(record.released_from, Some(midnight(2021, 10, 1)));
        assert_eq!(record.released_from_self_pay, Some(midnight(2021, 10, 1)));
        assert_eq!(record.immunized_until, Some(at(2022, 6, 1)));
        assert_eq!(record.allowed_products, permitted);
        assert!(record.notify_on_release);
    }

    #[test]
    fn test_under_30_restriction() {
        let settings = CovidConfig {
            under_30_product: Some("comirnaty".into()),
            ..settings()
        };
        let rule = adults_rule(&settings);
        let history = history(primary_series(), Vec::new());
        let permitted = products(&["comirnaty", "spikevax"]);

        let young = person_born(1994, 6, 1);
        let record = rule
            .evaluate(&context(&young, &history, &permitted, at(2023, 9, 1)))
            .unwrap();
        assert_eq!(record.allowed_products, products(&["comirnaty"]));

        let older = person_born(1980, 6, 1);
        let record = rule
            .evaluate(&context(&older, &history, &permitted, at(2023, 9, 1)))
            .unwrap();
        assert_eq!(record.allowed_products, permitted);
    }

    #[test]
    fn test_under_30_product_not_permitted_clears_release() {
        let settings = CovidConfig {
            under_30_product: Some("comirnaty".into()),
            ..settings()
        };
        let rule = adults_rule(&settings);
        let history = history(primary_series(), Vec::new());
        let permitted = products(&["spikevax"]);
        let young = person_born(2000, 1, 1);

        let record = rule
            .evaluate(&context(&young, &history, &permitted, at(2023, 9, 1)))
            .unwrap();
        assert!(record.allowed_products.is_empty());
        assert_eq!(record.released_from, None);
        assert_eq!(record.released_from_self_pay, None);
        assert!(record.immunized_until.is_some());
    }

    #[test]
    fn test_self_pay_cutoff_suppresses_campaign_release() {
        let settings = CovidConfig {
            self_pay_cutoff: Some(day(2023, 1, 1)),
            ..settings()
        };
        let rule = adults_rule(&settings);
        let person = person_born(1970, 1, 1);
        let permitted = products(&["comirnaty"]);

        let mut doses = primary_series();
        doses.push(dose(at(2023, 2, 1), "comirnaty", false));
        let history = history(doses, Vec::new());

        let record = rule
            .evaluate(&context(&person, &history, &permitted, at(2023, 3, 1)))
            .unwrap();
        assert_eq!(record.released_from, None);
        assert_eq!(record.released_from_self_pay, Some(midnight(2023, 6, 1)));
    }

    #[test]
    fn test_self_pay_cutoff_ignores_self_paid_booster() {
        let settings = CovidConfig {
            self_pay_cutoff: Some(day(2023, 1, 1)),
            ..settings()
        };
        let rule = adults_rule(&settings);
        let person = person_born(1970, 1, 1);
        let permitted = products(&["comirnaty"]);

        let mut doses = primary_series();
        doses.push(Dose {
            self_paid: true,
            ..dose(at(2023, 2, 1), "comirnaty", false)
        });
        let history = history(doses, Vec::new());

        let record = rule
            .evaluate(&context(&person, &history, &permitted, at(2023, 3, 1)))
            .unwrap();
        assert_eq!(record.released_from, Some(midnight(2023, 6, 1)));
    }

    #[test]
    fn test_self_pay_cutoff_ignores_boosters_before_cutoff() {
        let settings = CovidConfig {
            self_pay_cutoff: Some(day(2023, 1, 1)),
            ..settings()
        };
        let rule = adults_rule(&settings);
        let person = person_born(1970, 1, 1);
        let permitted = products(&["comirnaty"]);

        let mut doses = primary_series();
        doses.push(dose(at(2022, 12, 31), "comirnaty", false));
        let history = history(doses, Vec::new());

        let record = rule
            .evaluate(&context(&person, &history, &permitted, at(2023, 3, 1)))
            .unwrap();
        assert_eq!(record.released_from, Some(midnight(2023, 4, 30)));
    }

    #[test]
    fn test_later_illness_pushes_release_out() {
        let rule = adults_rule(&settings());
        let person = person_born(1970, 1, 1);
        let permitted = products(&["comirnaty"]);

        let history = history(primary_series(), vec![day(2021, 8, 15)]);
        let record = rule
            .evaluate(&context(&person, &history, &permitted, at(2021, 9, 1)))
            .unwrap();
        assert_eq!(record.released_from, Some(midnight(2021, 12, 15)));
    }

    #[test]
    fn test_earlier_illness_never_pulls_release_in() {
        let rule = adults_rule(&settings());
        let person = person_born(1970, 1, 1);
        let permitted = products(&["comirnaty"]);

        let without = history(primary_series(), Vec::new());
        let with_illness = history(primary_series(), vec![day(2020, 12, 1)]);

        let baseline = rule
            .evaluate(&context(&person, &without, &permitted, at(2021, 9, 1)))
            .unwrap();
        let record = rule
            .evaluate(&context(&person, &with_illness, &permitted, at(2021, 9, 1)))
            .unwrap();
        assert_eq!(record.released_from, baseline.released_from);
    }

    #[test]
    fn test_anticipatory_birthday_overrides_release() {
        let config = CovidRuleConfig {
            age_from: 65,
            min_doses: 2,
            release: TimeOffset::months(4).into(),
            ..CovidRuleConfig::named("seniors")
        };
        let rule = CovidRule::from_config(&config, &settings()).unwrap();
        let permitted = products(&["comirnaty"]);
        let history = history(primary_series(), Vec::new());

        // Turns 65 on 2022-03-20, long after the offset elapsed
        let person = person_born(1957, 3, 20);
        let record = rule
            .evaluate(&context(&person, &history, &permitted, at(2021, 11, 1)))
            .unwrap();
        assert_eq!(record.released_from, Some(midnight(2022, 3, 20)));

        // Two years too young: no match
        let younger = person_born(1958, 3, 20);
        assert!(rule
            .evaluate(&context(&younger, &history, &permitted, at(2021, 11, 1)))
            .is_none());
    }

    #[test]
    fn test_dose_and_points_gates() {
        let config = CovidRuleConfig {
            age_from: 16,
            min_doses: 2,
            min_points: Some(2),
            release: TimeOffset::months(4).into(),
            ..CovidRuleConfig::named("risk_points")
        };
        let rule = CovidRule::from_config(&config, &settings()).unwrap();
        let permitted = products(&["comirnaty"]);

        let mut person = person_born(1970, 1, 1);
        let two_doses = history(primary_series(), Vec::new());
        assert!(rule
            .evaluate(&context(&person, &two_doses, &permitted, at(2021, 9, 1)))
            .is_none());

        person.questionnaire.lives_in_care_home = true;
        assert!(rule
            .evaluate(&context(&person, &two_doses, &permitted, at(2021, 9, 1)))
            .is_some());

        let one_dose = history(vec![dose(at(2021, 5, 1), "comirnaty", true)], Vec::new());
        assert!(rule
            .evaluate(&context(&person, &one_dose, &permitted, at(2021, 9, 1)))
            .is_none());
    }

    #[test]
    fn test_booster_limit_gates_branch() {
        let config = CovidRuleConfig {
            min_doses: 2,
            release: TimeOffset::months(4).into(),
            max_boosters: Some(1),
            self_pay_release: TimeOffset::months(4).into(),
            ..CovidRuleConfig::named("first_booster_only")
        };
        let rule = CovidRule::from_config(&config, &settings()).unwrap();
        let person = person_born(1970, 1, 1);
        let permitted = products(&["comirnaty"]);

        let mut doses = primary_series();
        doses.push(dose(at(2022, 1, 10), "comirnaty", false));
        let history = history(doses, Vec::new());

        let record = rule
            .evaluate(&context(&person, &history, &permitted, at(2022, 3, 1)))
            .unwrap();
        assert_eq!(record.released_from, None);
        assert_eq!(record.released_from_self_pay, Some(midnight(2022, 5, 10)));
    }

    #[test]
    fn test_self_pay_only_rejects_campaign_release() {
        let config = CovidRuleConfig {
            self_pay_only: true,
            release: TimeOffset::months(4).into(),
            ..CovidRuleConfig::named("broken")
        };
        assert!(CovidRule::from_config(&config, &settings()).is_err());
    }

    #[test]
    fn test_empty_history_released_now() {
        let config = CovidRuleConfig {
            age_from: 16,
            release: TimeOffset::months(4).into(),
            self_pay_release: TimeOffset::months(4).into(),
            ..CovidRuleConfig::named("anyone")
        };
        let rule = CovidRule::from_config(&config, &settings()).unwrap();
        let permitted = products(&["comirnaty"]);
        let history = history(Vec::new(), Vec::new());
        let now = at(2022, 1, 1);

        let record = rule
            .evaluate(&context(&person_born(1970, 1, 1), &history, &permitted, now))
            .unwrap();
        assert_eq!(record.released_from, Some(now));
        assert_eq!(record.released_from_self_pay, None);
        assert_eq!(record.immunized_until, None);

        // 15 years old: held back to the 16th birthday
        let teen = person_born(2006, 5, 1);
        let record = rule
            .evaluate(&context(&teen, &history, &permitted, now))
            .unwrap();
        assert_eq!(record.released_from, Some(midnight(2022, 5, 1)));
    }

    #[test]
    #[should_panic(expected = "requires a dated last dose")]
    fn test_undated_last_dose_is_contract_violation() {
        let rule = adults_rule(&settings());
        let person = person_born(1970, 1, 1);
        let permitted = products(&["comirnaty"]);
        let cert = ExternalCertificate {
            latest_dose_at: None,
            product: "spikevax".into(),
            dose_count: 2,
            counts_toward_primary: true,
            accelerated_schedule: false,
        };
        let history = history_with_certificate(cert, Vec::new());

        rule.evaluate(&context(&person, &history, &permitted, at(2022, 1, 1)));
    }
}
