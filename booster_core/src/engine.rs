//! Per-disease booster engines.
//!
//! A [`DiseaseEngine`] holds the sorted rule list of one disease for one
//! mandant. Evaluation runs every rule against the person's history and folds
//! the matches with [`crate::merge::reduce`]:
//!
//! 1. COVID and Mpox only evaluate persons with a completed primary
//!    immunization; FSME releases every dose through its rules and always
//!    evaluates
//! 2. The permitted product set is read from the cache once per evaluation
//! 3. Each rule's notification flag is combined with the person's default
//!    notification preference
//!
//! [`BoosterEngine`] bundles the engines of all enabled diseases with the
//! shared cache.

use crate::cache::PermittedVaccineCache;
use crate::catalog::ProductCatalog;
use crate::history::{EvaluationCase, HistoryView};
use crate::merge::{default_notification_preference, reduce, sort_rules};
use crate::rules::{
    CovidRule, EvaluationContext, FsmeRule, MpoxRule, ProtectionOnlyRule, RuleVariant,
};
use crate::{Config, Disease, Error, Mandant, PersonContext, ProductId, ProtectionRecord, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct DiseaseEngine {
    disease: Disease,
    mandant: Mandant,
    rules: Vec<RuleVariant>,
}

impl DiseaseEngine {
    /// Build the engine of `disease` for the configured mandant
    pub fn from_config(disease: Disease, config: &Config) -> Result<Self> {
        let mandant = config.mandant;
        if !disease.is_offered_in(mandant) {
            return Err(Error::UnsupportedMandant { disease, mandant });
        }

        let mut rules = match disease {
            Disease::Covid => {
                let settings = &config.covid;
                let mut rules = settings
                    .rules
                    .iter()
                    .map(|rule| CovidRule::from_config(rule, settings).map(RuleVariant::Covid))
                    .collect::<Result<Vec<_>>>()?;
                rules.push(RuleVariant::ProtectionOnly(
                    ProtectionOnlyRule::new(
                        "covid_protection",
                        settings.immunity_window.require("covid.immunity_window")?,
                    )
                    .with_under_30_product(settings.under_30_product.clone()),
                ));
                rules
            }
            Disease::Fsme => {
                let settings = &config.fsme;
                let mut rules = settings
                    .rules
                    .iter()
                    .map(|rule| FsmeRule::from_config(rule, settings).map(RuleVariant::Fsme))
                    .collect::<Result<Vec<_>>>()?;
                rules.push(RuleVariant::ProtectionOnly(ProtectionOnlyRule::new(
                    "fsme_protection",
                    settings.protection_window.require("fsme.protection_window")?,
                )));
                rules
            }
            Disease::Mpox => {
                let settings = &config.mpox;
                let mut rules = settings
                    .rules
                    .iter()
                    .map(|rule| MpoxRule::from_config(rule).map(RuleVariant::Mpox))
                    .collect::<Result<Vec<_>>>()?;
                rules.push(RuleVariant::ProtectionOnly(ProtectionOnlyRule::new(
                    "mpox_protection",
                    settings.protection_window.require("mpox.protection_window")?,
                )));
                rules
            }
        };

        let mut names = BTreeSet::new();
        for rule in &rules {
            if !names.insert(rule.name()) {
                return Err(Error::Config(format!(
                    "{}: duplicate rule name '{}'",
                    disease,
                    rule.name()
                )));
            }
        }

        sort_rules(&mut rules);
        tracing::debug!(
            "Built {} engine for {} with {} rules",
            disease,
            mandant,
            rules.len()
        );

        Ok(Self {
            disease,
            mandant,
            rules,
        })
    }

    pub fn disease(&self) -> Disease {
        self.disease
    }

    pub fn mandant(&self) -> Mandant {
        self.mandant
    }

    /// Rules in evaluation order
    pub fn rules(&self) -> &[RuleVariant] {
        &self.rules
    }

    /// Whether this engine evaluates the person at all
    pub fn applies_to(&self, person: &PersonContext) -> bool {
        !self.disease.requires_primary_immunization() || person.primary_immunization_complete
    }

    /// Evaluate one person against the permitted products of the cache
    pub fn evaluate(
        &self,
        person: &PersonContext,
        history: &HistoryView,
        cache: &PermittedVaccineCache,
        now: NaiveDateTime,
    ) -> Option<ProtectionRecord> {
        if !self.applies_to(person) {
            return None;
        }
        let permitted = cache.permitted_booster_products(self.disease);
        self.evaluate_with(person, history, &permitted, now)
    }

    /// Evaluate one person against an explicit permitted product snapshot
    pub fn evaluate_with(
        &self,
        person: &PersonContext,
        history: &HistoryView,
        permitted: &BTreeSet<ProductId>,
        now: NaiveDateTime,
    ) -> Option<ProtectionRecord> {
        if !self.applies_to(person) {
            return None;
        }

        let ctx = EvaluationContext {
            person,
            history,
            permitted,
            now,
            notify: default_notification_preference(person, self.mandant),
        };
        reduce(self.rules.iter().map(|rule| rule.evaluate(&ctx)))
    }
}

/// Result of evaluating one case
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvaluationOutcome {
    pub person_id: Uuid,
    pub disease: Disease,
    pub protection: Option<ProtectionRecord>,
}

/// Engines of every enabled disease plus the shared product cache
#[derive(Debug)]
pub struct BoosterEngine {
    engines: BTreeMap<Disease, DiseaseEngine>,
    cache: PermittedVaccineCache,
}

impl BoosterEngine {
    /// Validate the configuration and build all enabled engines
    pub fn from_config(config: &Config, catalog: Box<dyn ProductCatalog>) -> Result<Self> {
        config.validate()?;

        let engines = config
            .enabled_diseases()
            .into_iter()
            .map(|disease| DiseaseEngine::from_config(disease, config).map(|e| (disease, e)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let cache = PermittedVaccineCache::new(
            catalog,
            Duration::from_secs(config.cache.refresh_interval_secs),
        );

        tracing::info!(
            "Booster engine ready for {} ({} diseases)",
            config.mandant,
            engines.len()
        );
        Ok(Self { engines, cache })
    }

    pub fn cache(&self) -> &PermittedVaccineCache {
        &self.cache
    }

    pub fn diseases(&self) -> impl Iterator<Item = Disease> + '_ {
        self.engines.keys().copied()
    }

    pub fn engine(&self, disease: Disease) -> Result<&DiseaseEngine> {
        self.engines.get(&disease).ok_or_else(|| {
            Error::Evaluation(format!("{} is not enabled in this configuration", disease))
        })
    }

    /// Evaluate one person for one disease
    ///
    /// COVID histories whose last event has no date are rejected here rather
    /// than handed to the rules.
    pub fn evaluate(
        &self,
        disease: Disease,
        person: &PersonContext,
        history: &HistoryView,
        now: NaiveDateTime,
    ) -> Result<Option<ProtectionRecord>> {
        let engine = self.engine(disease)?;
        if !engine.applies_to(person) {
            return Ok(None);
        }

        if disease == Disease::Covid && !history.is_empty() && history.last_timestamp().is_none()
        {
            return Err(Error::Evaluation(format!(
                "person {}: last covid vaccination has no date",
                person.id
            )));
        }

        Ok(engine.evaluate(person, history, &self.cache, now))
    }

    pub fn evaluate_case(&self, case: &EvaluationCase, now: NaiveDateTime) -> Result<EvaluationOutcome> {
        let history = case.history.to_view();
        let protection = self.evaluate(case.disease, &case.person, &history, now)?;
        Ok(EvaluationOutcome {
            person_id: case.person.id,
            disease: case.disease,
            protection,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{build_default_catalog, Catalog};
    use crate::config::CovidRuleConfig;
    use crate::history::HistoryRecords;
    use crate::rules::test_support::*;
    use crate::{ExternalCertificate, RegistrationSource, TimeOffset, VaccineProduct};

    fn cache() -> PermittedVaccineCache {
        PermittedVaccineCache::new(Box::new(build_default_catalog()), Duration::from_secs(300))
    }

    fn engine(disease: Disease) -> DiseaseEngine {
        DiseaseEngine::from_config(disease, &Config::default()).unwrap()
    }

    fn two_doses(first: NaiveDateTime, second: NaiveDateTime) -> HistoryView {
        history(
            vec![
                dose(first, "comirnaty", true),
                dose(second, "comirnaty", true),
            ],
            Vec::new(),
        )
    }

    #[test]
    fn test_rules_sorted_by_release() {
        let covid = engine(Disease::Covid);
        let names: Vec<&str> = covid.rules().iter().map(RuleVariant::name).collect();
        assert_eq!(
            names,
            vec![
                "seniors",
                "risk_points",
                "adults",
                "adolescents_self_pay",
                "covid_protection"
            ]
        );

        let fsme = engine(Disease::Fsme);
        assert_eq!(fsme.rules().first().unwrap().name(), "first_dose");
        assert_eq!(fsme.rules().last().unwrap().name(), "fsme_protection");
    }

    #[test]
    fn test_unsupported_mandant() {
        let config = Config {
            mandant: Mandant::Zh,
            ..Config::default()
        };
        assert!(matches!(
            DiseaseEngine::from_config(Disease::Fsme, &config),
            Err(Error::UnsupportedMandant {
                disease: Disease::Fsme,
                mandant: Mandant::Zh
            })
        ));
        assert!(DiseaseEngine::from_config(Disease::Mpox, &config).is_ok());
    }

    #[test]
    fn test_duplicate_rule_names_rejected() {
        let mut config = Config::default();
        let copy = config.covid.rules[0].clone();
        config.covid.rules.push(copy);
        let err = DiseaseEngine::from_config(Disease::Covid, &config).unwrap_err();
        assert!(err.to_string().contains("duplicate rule name"));
    }

    #[test]
    fn test_incomplete_primary_short_circuits_except_fsme() {
        let mut person = person_born(1980, 1, 1);
        person.primary_immunization_complete = false;
        let covid_history = two_doses(at(2022, 1, 1), at(2022, 2, 1));
        let now = at(2023, 1, 1);

        assert!(engine(Disease::Covid)
            .evaluate(&person, &covid_history, &cache(), now)
            .is_none());
        assert!(engine(Disease::Mpox)
            .evaluate(&person, &history(Vec::new(), Vec::new()), &cache(), now)
            .is_none());

        let fsme = engine(Disease::Fsme)
            .evaluate(&person, &history(Vec::new(), Vec::new()), &cache(), now)
            .unwrap();
        assert_eq!(fsme.released_from, Some(now));
        assert_eq!(fsme.immunized_until, None);
    }

    #[test]
    fn test_adult_covid_release() {
        let person = person_born(1980, 1, 1);
        let history = two_doses(at(2022, 6, 1), at(2022, 7, 1));

        let record = engine(Disease::Covid)
            .evaluate(&person, &history, &cache(), at(2022, 12, 1))
            .unwrap();
        assert_eq!(record.immunized_until, Some(at(2023, 7, 1)));
        assert_eq!(record.released_from, Some(midnight(2023, 1, 1)));
        assert_eq!(record.released_from_self_pay, Some(midnight(2022, 11, 1)));
        assert_eq!(record.allowed_products, products(&["comirnaty", "spikevax"]));
        assert!(record.notify_on_release);
    }

    #[test]
    fn test_under_30_restriction() {
        let mut config = Config::default();
        config.covid.under_30_product = Some("comirnaty".into());
        let engine = DiseaseEngine::from_config(Disease::Covid, &config).unwrap();

        let person = person_born(1993, 6, 1);
        let history = two_doses(at(2022, 6, 1), at(2022, 7, 1));
        let record = engine
            .evaluate(&person, &history, &cache(), at(2023, 3, 1))
            .unwrap();
        assert_eq!(record.allowed_products, products(&["comirnaty"]));
        assert_eq!(record.released_from, Some(midnight(2023, 1, 1)));

        let older = person_born(1990, 1, 1);
        let record = engine
            .evaluate(&older, &history, &cache(), at(2023, 3, 1))
            .unwrap();
        assert_eq!(record.allowed_products, products(&["comirnaty", "spikevax"]));
    }

    #[test]
    fn test_self_pay_cutoff_suppresses_campaign_release() {
        let mut config = Config::default();
        config.covid.self_pay_cutoff = chrono::NaiveDate::from_ymd_opt(2023, 1, 1);
        let engine = DiseaseEngine::from_config(Disease::Covid, &config).unwrap();

        let person = person_born(1950, 1, 1);
        let history = history(
            vec![
                dose(at(2021, 5, 1), "comirnaty", true),
                dose(at(2021, 6, 1), "comirnaty", true),
                dose(at(2023, 2, 1), "spikevax", false),
            ],
            Vec::new(),
        );

        let record = engine
            .evaluate(&person, &history, &cache(), at(2023, 3, 1))
            .unwrap();
        assert_eq!(record.released_from, None);
        assert_eq!(record.released_from_self_pay, Some(midnight(2023, 6, 1)));
        assert_eq!(record.immunized_until, Some(at(2024, 2, 1)));
    }

    #[test]
    fn test_mpox_without_prior_dose_released_now() {
        let person = person_born(1985, 5, 5);
        let now = at(2023, 6, 15);

        let record = engine(Disease::Mpox)
            .evaluate(&person, &history(Vec::new(), Vec::new()), &cache(), now)
            .unwrap();
        assert_eq!(record.released_from, Some(now));
        assert_eq!(record.released_from_self_pay, None);
        assert_eq!(record.allowed_products, products(&["jynneos"]));
    }

    #[test]
    fn test_covid_rule_without_dose_gate_releases_empty_history_now() {
        let mut config = Config::default();
        config.covid.rules.push(CovidRuleConfig {
            release: TimeOffset::months(4).into(),
            ..CovidRuleConfig::named("anyone")
        });
        let booster = BoosterEngine::from_config(&config, Box::new(build_default_catalog())).unwrap();

        let case = EvaluationCase {
            disease: Disease::Covid,
            person: person_born(1980, 1, 1),
            history: HistoryRecords::default(),
        };
        let now = at(2023, 6, 15);
        let protection = booster.evaluate_case(&case, now).unwrap().protection.unwrap();
        assert_eq!(protection.released_from, Some(now));
        assert_eq!(protection.released_from_self_pay, None);
        assert_eq!(protection.immunized_until, None);
        assert_eq!(protection.allowed_products, products(&["comirnaty", "spikevax"]));
    }

    #[test]
    fn test_no_permitted_product_keeps_protection_horizon() {
        let catalog = Catalog::from_products(vec![VaccineProduct {
            id: "jcovden".into(),
            name: "Janssen".into(),
            diseases: vec![Disease::Covid],
            recommended_for_booster: false,
            discontinued: true,
        }])
        .unwrap();
        let cache = PermittedVaccineCache::new(Box::new(catalog), Duration::from_secs(300));
        let person = person_born(1980, 1, 1);
        let history = two_doses(at(2022, 6, 1), at(2022, 7, 1));

        let record = engine(Disease::Covid)
            .evaluate(&person, &history, &cache, at(2022, 12, 1))
            .unwrap();
        assert!(record.allowed_products.is_empty());
        assert_eq!(record.released_from, None);
        assert_eq!(record.released_from_self_pay, None);
        assert_eq!(record.immunized_until, Some(at(2023, 7, 1)));
    }

    #[test]
    fn test_illness_never_shortens_release() {
        let engine = engine(Disease::Covid);
        let person = person_born(1980, 1, 1);
        let doses = vec![
            dose(at(2022, 6, 1), "comirnaty", true),
            dose(at(2022, 7, 1), "comirnaty", true),
        ];
        let now = at(2022, 12, 1);

        let without = engine
            .evaluate(&person, &history(doses.clone(), Vec::new()), &cache(), now)
            .unwrap();
        for illness in [day(2022, 3, 1), day(2022, 7, 15), day(2022, 10, 1)] {
            let with = engine
                .evaluate(&person, &history(doses.clone(), vec![illness]), &cache(), now)
                .unwrap();
            assert!(with.released_from >= without.released_from);
            assert!(with.released_from_self_pay >= without.released_from_self_pay);
        }

        let recent = engine
            .evaluate(&person, &history(doses, vec![day(2022, 10, 1)]), &cache(), now)
            .unwrap();
        assert_eq!(recent.released_from, Some(midnight(2023, 4, 1)));
    }

    #[test]
    fn test_anticipatory_senior_release() {
        let person = person_born(1958, 6, 15);
        let history = two_doses(at(2022, 12, 10), at(2023, 1, 10));

        let record = engine(Disease::Covid)
            .evaluate(&person, &history, &cache(), at(2023, 3, 1))
            .unwrap();
        // seniors (4 months) held back to the 65th birthday, still before adults (6 months)
        assert_eq!(record.released_from, Some(midnight(2023, 6, 15)));
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let engine = engine(Disease::Covid);
        let person = person_born(1950, 1, 1);
        let history = two_doses(at(2022, 6, 1), at(2022, 7, 1));
        let now = at(2022, 12, 1);

        let first = engine.evaluate(&person, &history, &cache(), now).unwrap();
        let second = engine.evaluate(&person, &history, &cache(), now).unwrap();
        assert_eq!(first, second);

        let json = serde_json::to_string(&first).unwrap();
        let parsed: ProtectionRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, first);
    }

    #[test]
    fn test_notification_preferences() {
        let engine = engine(Disease::Covid);
        let history = two_doses(at(2022, 6, 1), at(2022, 7, 1));
        let now = at(2022, 12, 1);

        let mut home_visit = person_born(1950, 1, 1);
        home_visit.source = RegistrationSource::HomeVisit;
        let record = engine.evaluate(&home_visit, &history, &cache(), now).unwrap();
        assert!(!record.notify_on_release);

        // Only the self-pay adolescent rule matches, and it never notifies
        let adolescent = person_born(2009, 1, 1);
        let record = engine.evaluate(&adolescent, &history, &cache(), now).unwrap();
        assert_eq!(record.released_from, None);
        assert!(record.released_from_self_pay.is_some());
        assert!(!record.notify_on_release);
    }

    #[test]
    fn test_booster_engine_cases() {
        let booster =
            BoosterEngine::from_config(&Config::default(), Box::new(build_default_catalog()))
                .unwrap();
        assert_eq!(
            booster.diseases().collect::<Vec<_>>(),
            vec![Disease::Covid, Disease::Fsme, Disease::Mpox]
        );

        let case = EvaluationCase {
            disease: Disease::Covid,
            person: person_born(1950, 1, 1),
            history: HistoryRecords {
                doses: vec![
                    Some(dose(at(2022, 6, 1), "comirnaty", true)),
                    None,
                    Some(dose(at(2022, 7, 1), "comirnaty", true)),
                ],
                ..HistoryRecords::default()
            },
        };
        let outcome = booster.evaluate_case(&case, at(2022, 12, 1)).unwrap();
        assert_eq!(outcome.person_id, case.person.id);
        assert_eq!(
            outcome.protection.unwrap().released_from,
            Some(midnight(2022, 11, 1))
        );
    }

    #[test]
    fn test_booster_engine_rejects_undated_covid_history() {
        let booster =
            BoosterEngine::from_config(&Config::default(), Box::new(build_default_catalog()))
                .unwrap();
        let case = EvaluationCase {
            disease: Disease::Covid,
            person: person_born(1950, 1, 1),
            history: HistoryRecords {
                external_certificate: Some(ExternalCertificate {
                    latest_dose_at: None,
                    product: "spikevax".into(),
                    dose_count: 2,
                    counts_toward_primary: true,
                    accelerated_schedule: false,
                }),
                ..HistoryRecords::default()
            },
        };
        assert!(matches!(
            booster.evaluate_case(&case, at(2022, 12, 1)),
            Err(Error::Evaluation(_))
        ));
    }

    #[test]
    fn test_booster_engine_disabled_disease() {
        let config = Config {
            diseases: Some(vec![Disease::Covid]),
            ..Config::default()
        };
        let booster = BoosterEngine::from_config(&config, Box::new(build_default_catalog())).unwrap();
        assert!(matches!(booster.engine(Disease::Mpox), Err(Error::Evaluation(_))));
    }
}
