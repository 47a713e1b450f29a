//! Catch-all rule: protection horizon only, never a release date.
//!
//! Every disease engine appends one of these so that a vaccinated person gets
//! at least an `immunized_until` even when no release rule matches.

use super::covid::restrict_under_30;
use super::EvaluationContext;
use crate::{ProductId, ProtectionRecord, TimeOffset};

#[derive(Clone, Debug)]
pub struct ProtectionOnlyRule {
    pub name: String,
    pub window: TimeOffset,
    pub under_30_product: Option<ProductId>,
}

impl ProtectionOnlyRule {
    pub fn new(name: impl Into<String>, window: TimeOffset) -> Self {
        Self {
            name: name.into(),
            window,
            under_30_product: None,
        }
    }

    pub fn with_under_30_product(mut self, product: Option<ProductId>) -> Self {
        self.under_30_product = product;
        self
    }

    pub fn evaluate(&self, ctx: &EvaluationContext<'_>) -> Option<ProtectionRecord> {
        if ctx.history.is_empty() {
            return None;
        }

        Some(ProtectionRecord {
            immunized_until: ctx.history.last_timestamp().map(|at| self.window.after(at)),
            released_from: None,
            released_from_self_pay: None,
            allowed_products: restrict_under_30(
                ctx.permitted,
                self.under_30_product.as_ref(),
                ctx.person,
                ctx.today(),
            ),
            notify_on_release: ctx.notify,
        })
    }
}
