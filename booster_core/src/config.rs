//! Configuration file support for the booster engine.
//!
//! Configuration is loaded once at startup from
//! `$XDG_CONFIG_HOME/booster/config.toml`. Every section has built-in
//! defaults, so a partial file only overrides what it names. Offsets are
//! written as inline tables, e.g. `release = { amount = 4, unit = "months" }`.

use crate::{Disease, Error, Mandant, OffsetUnit, ProductId, Result, TimeOffset};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application configuration
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub mandant: Mandant,

    /// Diseases to build engines for; all diseases offered in the mandant when unset
    #[serde(default)]
    pub diseases: Option<Vec<Disease>>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub covid: CovidConfig,

    #[serde(default)]
    pub fsme: FsmeConfig,

    #[serde(default)]
    pub mpox: MpoxConfig,
}

/// Amount + unit pair as written in the config file
///
/// Both halves must be present or both absent.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct OffsetSetting {
    #[serde(default)]
    pub amount: Option<u32>,
    #[serde(default)]
    pub unit: Option<OffsetUnit>,
}

impl OffsetSetting {
    pub const fn new(amount: u32, unit: OffsetUnit) -> Self {
        Self {
            amount: Some(amount),
            unit: Some(unit),
        }
    }

    pub fn is_unset(&self) -> bool {
        self.amount.is_none() && self.unit.is_none()
    }

    /// Validate into an optional offset; `field` names the setting in errors
    pub fn resolve(&self, field: &str) -> Result<Option<TimeOffset>> {
        match (self.amount, self.unit) {
            (Some(amount), Some(unit)) => Ok(Some(TimeOffset::new(amount, unit))),
            (None, None) => Ok(None),
            (Some(amount), None) => Err(Error::Config(format!(
                "{}: amount {} given without a unit",
                field, amount
            ))),
            (None, Some(unit)) => Err(Error::Config(format!(
                "{}: unit {:?} given without an amount",
                field, unit
            ))),
        }
    }

    /// Like [`resolve`](Self::resolve), but the offset is mandatory
    pub fn require(&self, field: &str) -> Result<TimeOffset> {
        self.resolve(field)?
            .ok_or_else(|| Error::Config(format!("{}: offset is required", field)))
    }
}

impl From<TimeOffset> for OffsetSetting {
    fn from(offset: TimeOffset) -> Self {
        Self::new(offset.amount, offset.unit)
    }
}

/// Permitted-product cache configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,

    /// JSON product catalog; the built-in catalog is used when unset
    #[serde(default)]
    pub catalog_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval_secs: default_refresh_interval_secs(),
            catalog_path: None,
        }
    }
}

// ============================================================================
// COVID
// ============================================================================

/// COVID booster settings (age / dose count / points banded rules)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CovidConfig {
    #[serde(default = "default_covid_immunity_window")]
    pub immunity_window: OffsetSetting,

    /// Campaign-funded boosters on or after this day force the next dose onto self-pay
    #[serde(default)]
    pub self_pay_cutoff: Option<NaiveDate>,

    /// Single product allowed for persons younger than 30
    #[serde(default)]
    pub under_30_product: Option<ProductId>,

    #[serde(default = "default_covid_rules")]
    pub rules: Vec<CovidRuleConfig>,
}

impl Default for CovidConfig {
    fn default() -> Self {
        Self {
            immunity_window: default_covid_immunity_window(),
            self_pay_cutoff: None,
            under_30_product: None,
            rules: default_covid_rules(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CovidRuleConfig {
    pub name: String,
    #[serde(default)]
    pub age_from: u32,
    #[serde(default)]
    pub age_to: Option<u32>,
    #[serde(default)]
    pub min_doses: u32,
    #[serde(default)]
    pub max_doses: Option<u32>,
    #[serde(default)]
    pub min_points: Option<u32>,
    #[serde(default)]
    pub max_points: Option<u32>,
    #[serde(default)]
    pub self_pay_only: bool,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub release: OffsetSetting,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub illness_release: OffsetSetting,
    #[serde(default)]
    pub max_boosters: Option<u32>,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub self_pay_release: OffsetSetting,
    #[serde(default)]
    pub self_pay_max_boosters: Option<u32>,
    #[serde(default = "default_notify")]
    pub notify: bool,
}

impl CovidRuleConfig {
    /// A rule with the given name and every gate open
    pub fn named(name: &str) -> Self {
        Self {
            name: name.into(),
            age_from: 0,
            age_to: None,
            min_doses: 0,
            max_doses: None,
            min_points: None,
            max_points: None,
            self_pay_only: false,
            release: OffsetSetting::default(),
            illness_release: OffsetSetting::default(),
            max_boosters: None,
            self_pay_release: OffsetSetting::default(),
            self_pay_max_boosters: None,
            notify: true,
        }
    }
}

// ============================================================================
// FSME
// ============================================================================

/// Which primary schedule a rule applies to
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    #[default]
    Any,
    Conventional,
    Accelerated,
}

/// FSME settings (vaccine-specific offsets, conventional vs accelerated schedule)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FsmeConfig {
    #[serde(default = "default_fsme_protection_window")]
    pub protection_window: OffsetSetting,

    /// Primary doses closer together than this mark the accelerated schedule
    #[serde(default = "default_accelerated_max_gap_days")]
    pub accelerated_max_gap_days: i64,

    #[serde(default = "default_fsme_rules")]
    pub rules: Vec<FsmeRuleConfig>,
}

impl Default for FsmeConfig {
    fn default() -> Self {
        Self {
            protection_window: default_fsme_protection_window(),
            accelerated_max_gap_days: default_accelerated_max_gap_days(),
            rules: default_fsme_rules(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FsmeRuleConfig {
    pub name: String,
    #[serde(default)]
    pub age_from: u32,
    #[serde(default)]
    pub age_to: Option<u32>,
    #[serde(default)]
    pub min_doses: u32,
    #[serde(default)]
    pub max_doses: Option<u32>,
    /// Products the last dose must be one of; any product when empty
    #[serde(default)]
    pub products: Vec<ProductId>,
    #[serde(default)]
    pub schedule: ScheduleKind,
    #[serde(default)]
    pub same_product: bool,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub release: OffsetSetting,
    #[serde(default)]
    pub max_boosters: Option<u32>,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub self_pay_release: OffsetSetting,
    #[serde(default)]
    pub self_pay_max_boosters: Option<u32>,
    #[serde(default = "default_notify")]
    pub notify: bool,
}

impl FsmeRuleConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.into(),
            age_from: 0,
            age_to: None,
            min_doses: 0,
            max_doses: None,
            products: Vec::new(),
            schedule: ScheduleKind::Any,
            same_product: false,
            release: OffsetSetting::default(),
            max_boosters: None,
            self_pay_release: OffsetSetting::default(),
            self_pay_max_boosters: None,
            notify: true,
        }
    }
}

// ============================================================================
// Mpox
// ============================================================================

/// Mpox settings (age / dose count rules with a two-branch offset)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MpoxConfig {
    #[serde(default = "default_mpox_protection_window")]
    pub protection_window: OffsetSetting,

    #[serde(default = "default_mpox_rules")]
    pub rules: Vec<MpoxRuleConfig>,
}

impl Default for MpoxConfig {
    fn default() -> Self {
        Self {
            protection_window: default_mpox_protection_window(),
            rules: default_mpox_rules(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MpoxRuleConfig {
    pub name: String,
    #[serde(default)]
    pub age_from: u32,
    #[serde(default)]
    pub age_to: Option<u32>,
    #[serde(default)]
    pub min_doses: u32,
    #[serde(default)]
    pub max_doses: Option<u32>,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub release_after_primary: OffsetSetting,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub release_after_booster: OffsetSetting,
    #[serde(default)]
    pub max_boosters: Option<u32>,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub self_pay_after_primary: OffsetSetting,
    #[serde(default, skip_serializing_if = "OffsetSetting::is_unset")]
    pub self_pay_after_booster: OffsetSetting,
    #[serde(default)]
    pub self_pay_max_boosters: Option<u32>,
    #[serde(default = "default_notify")]
    pub notify: bool,
}

impl MpoxRuleConfig {
    pub fn named(name: &str) -> Self {
        Self {
            name: name.into(),
            age_from: 0,
            age_to: None,
            min_doses: 0,
            max_doses: None,
            release_after_primary: OffsetSetting::default(),
            release_after_booster: OffsetSetting::default(),
            max_boosters: None,
            self_pay_after_primary: OffsetSetting::default(),
            self_pay_after_booster: OffsetSetting::default(),
            self_pay_max_boosters: None,
            notify: true,
        }
    }
}

// Default value functions
fn default_refresh_interval_secs() -> u64 {
    300
}

fn default_notify() -> bool {
    true
}

fn default_covid_immunity_window() -> OffsetSetting {
    OffsetSetting::new(12, OffsetUnit::Months)
}

fn default_fsme_protection_window() -> OffsetSetting {
    OffsetSetting::new(10, OffsetUnit::Years)
}

fn default_mpox_protection_window() -> OffsetSetting {
    OffsetSetting::new(2, OffsetUnit::Years)
}

fn default_accelerated_max_gap_days() -> i64 {
    28
}

fn default_covid_rules() -> Vec<CovidRuleConfig> {
    let four_months = OffsetSetting::new(4, OffsetUnit::Months);
    let six_months = OffsetSetting::new(6, OffsetUnit::Months);

    vec![
        CovidRuleConfig {
            age_from: 65,
            min_doses: 2,
            release: four_months,
            illness_release: four_months,
            self_pay_release: four_months,
            ..CovidRuleConfig::named("seniors")
        },
        CovidRuleConfig {
            age_from: 16,
            min_doses: 2,
            min_points: Some(2),
            release: four_months,
            illness_release: four_months,
            self_pay_release: four_months,
            ..CovidRuleConfig::named("risk_points")
        },
        CovidRuleConfig {
            age_from: 16,
            min_doses: 2,
            release: six_months,
            illness_release: six_months,
            self_pay_release: four_months,
            ..CovidRuleConfig::named("adults")
        },
        CovidRuleConfig {
            age_from: 12,
            age_to: Some(15),
            min_doses: 2,
            self_pay_only: true,
            self_pay_release: six_months,
            notify: false,
            ..CovidRuleConfig::named("adolescents_self_pay")
        },
    ]
}

fn default_fsme_rules() -> Vec<FsmeRuleConfig> {
    let encepur = || vec![ProductId::from("encepur")];
    let fsme_immun = || vec![ProductId::from("fsme_immun")];

    vec![
        FsmeRuleConfig {
            age_from: 3,
            max_doses: Some(0),
            release: OffsetSetting::new(0, OffsetUnit::Days),
            ..FsmeRuleConfig::named("first_dose")
        },
        FsmeRuleConfig {
            min_doses: 1,
            max_doses: Some(1),
            products: encepur(),
            same_product: true,
            release: OffsetSetting::new(7, OffsetUnit::Days),
            ..FsmeRuleConfig::named("encepur_second_dose")
        },
        FsmeRuleConfig {
            min_doses: 1,
            max_doses: Some(1),
            products: fsme_immun(),
            same_product: true,
            release: OffsetSetting::new(14, OffsetUnit::Days),
            ..FsmeRuleConfig::named("fsme_immun_second_dose")
        },
        FsmeRuleConfig {
            min_doses: 2,
            max_doses: Some(2),
            products: encepur(),
            schedule: ScheduleKind::Conventional,
            same_product: true,
            release: OffsetSetting::new(9, OffsetUnit::Months),
            ..FsmeRuleConfig::named("encepur_third_dose")
        },
        FsmeRuleConfig {
            min_doses: 2,
            max_doses: Some(2),
            products: encepur(),
            schedule: ScheduleKind::Accelerated,
            same_product: true,
            release: OffsetSetting::new(14, OffsetUnit::Days),
            ..FsmeRuleConfig::named("encepur_third_dose_accelerated")
        },
        FsmeRuleConfig {
            min_doses: 2,
            max_doses: Some(2),
            products: fsme_immun(),
            same_product: true,
            release: OffsetSetting::new(5, OffsetUnit::Months),
            ..FsmeRuleConfig::named("fsme_immun_third_dose")
        },
        FsmeRuleConfig {
            min_doses: 3,
            max_doses: Some(3),
            products: encepur(),
            schedule: ScheduleKind::Accelerated,
            release: OffsetSetting::new(12, OffsetUnit::Months),
            ..FsmeRuleConfig::named("encepur_accelerated_booster")
        },
        FsmeRuleConfig {
            min_doses: 3,
            release: OffsetSetting::new(10, OffsetUnit::Years),
            ..FsmeRuleConfig::named("booster")
        },
    ]
}

fn default_mpox_rules() -> Vec<MpoxRuleConfig> {
    vec![
        MpoxRuleConfig {
            age_from: 18,
            release_after_primary: OffsetSetting::new(2, OffsetUnit::Years),
            release_after_booster: OffsetSetting::new(5, OffsetUnit::Years),
            self_pay_after_primary: OffsetSetting::new(6, OffsetUnit::Months),
            self_pay_after_booster: OffsetSetting::new(1, OffsetUnit::Years),
            ..MpoxRuleConfig::named("adults")
        },
        MpoxRuleConfig {
            age_from: 12,
            age_to: Some(17),
            release_after_primary: OffsetSetting::new(2, OffsetUnit::Years),
            release_after_booster: OffsetSetting::new(5, OffsetUnit::Years),
            ..MpoxRuleConfig::named("adolescents")
        },
    ]
}

impl Config {
    /// Load configuration from the standard config path
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path();
        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            tracing::info!(
                "No config file found at {:?}, using defaults",
                config_path
            );
            Ok(Self::default())
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        tracing::info!("Loaded config from {:?}", path);
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> PathBuf {
        let base = dirs::config_dir().unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .unwrap_or_else(|| PathBuf::from("."))
        });
        base.join("booster").join("config.toml")
    }

    /// Save the current configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, contents)?;
        tracing::info!("Saved config to {:?}", path);
        Ok(())
    }

    /// Diseases engines are built for
    pub fn enabled_diseases(&self) -> Vec<Disease> {
        match &self.diseases {
            Some(diseases) => diseases.clone(),
            None => Disease::ALL
                .into_iter()
                .filter(|d| d.is_offered_in(self.mandant))
                .collect(),
        }
    }

    /// Check the whole configuration by building every enabled engine
    ///
    /// Any malformed rule, offset or unsupported mandant is reported here,
    /// at startup, never during evaluation.
    pub fn validate(&self) -> Result<()> {
        if self.cache.refresh_interval_secs == 0 {
            return Err(Error::Config(
                "cache.refresh_interval_secs must be greater than zero".into(),
            ));
        }

        for disease in self.enabled_diseases() {
            crate::engine::DiseaseEngine::from_config(disease, self)?;
        }
        Ok(())
    }
}
