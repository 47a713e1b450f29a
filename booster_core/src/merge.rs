//! Combining rule results and ordering rules.
//!
//! The engine evaluates all of its rules and folds the results left to right
//! with [`merge`]. Rules are sorted by [`sort_rules`] beforehand, so the left
//! operand of every fold step is the rule whose release comes earliest. That
//! rule's `notify_on_release` is the one that survives.

use crate::rules::RuleVariant;
use crate::{Mandant, PersonContext, ProtectionRecord, RegistrationSource};
use std::cmp::Ordering;

pub use crate::history::extract_history_view;

/// Merge two protection records into one
///
/// - `immunized_until`: the later date
/// - `released_from`, `released_from_self_pay`: the earlier date; a missing
///   date means "not computed by this rule" and loses to any real date
/// - `allowed_products`: union
/// - `notify_on_release`: taken from `first`
pub fn merge(first: &ProtectionRecord, second: &ProtectionRecord) -> ProtectionRecord {
    ProtectionRecord {
        immunized_until: later(first.immunized_until, second.immunized_until),
        released_from: earlier(first.released_from, second.released_from),
        released_from_self_pay: earlier(
            first.released_from_self_pay,
            second.released_from_self_pay,
        ),
        allowed_products: first
            .allowed_products
            .union(&second.allowed_products)
            .cloned()
            .collect(),
        notify_on_release: first.notify_on_release,
    }
}

/// Left fold over rule results in rule order
pub fn reduce<I>(results: I) -> Option<ProtectionRecord>
where
    I: IntoIterator<Item = Option<ProtectionRecord>>,
{
    results
        .into_iter()
        .fold(None, |acc, next| match (acc, next) {
            (Some(acc), Some(next)) => Some(merge(&acc, &next)),
            (acc, None) => acc,
            (None, next) => next,
        })
}

/// Sort rules ascending by months until release, rules without one last
///
/// The sort is stable: rules with equal estimates keep their configured order.
pub fn sort_rules(rules: &mut [RuleVariant]) {
    rules.sort_by(|a, b| compare_release_estimate(a.months_until_release(), b.months_until_release()));
}

fn compare_release_estimate(a: Option<u32>, b: Option<u32>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Whether a person should be notified once their release date arrives
///
/// Anonymized records and persons who opted out are never notified. Bulk
/// imported registrations are never notified in any mandant; in BE, people
/// vaccinated by home visits are contacted by the mobile teams instead.
pub fn default_notification_preference(person: &PersonContext, mandant: Mandant) -> bool {
    if person.anonymized || !person.wants_release_notification {
        return false;
    }

    match (mandant, person.source) {
        (_, RegistrationSource::MassImport) => false,
        (Mandant::Be, RegistrationSource::HomeVisit) => false,
        _ => true,
    }
}

fn later<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (a, None) => a,
        (None, b) => b,
    }
}

fn earlier<T: Ord>(a: Option<T>, b: Option<T>) -> Option<T> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, None) => a,
        (None, b) => b,
    }
}
