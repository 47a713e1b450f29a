//! Read-through cache of the products currently permitted for boosters.
//!
//! Evaluations ask the cache for the permitted set of their disease. The
//! cache reloads the catalog once the refresh interval has elapsed; readers
//! always see a complete snapshot, never a half-built one. A failed reload is
//! logged, the previous snapshot stays in use and the next attempt waits for
//! another full interval.

use crate::catalog::ProductCatalog;
use crate::{Disease, ProductId, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Snapshot {
    permitted: BTreeMap<Disease, BTreeSet<ProductId>>,
    refreshed_at: Instant,
}

pub struct PermittedVaccineCache {
    catalog: Box<dyn ProductCatalog>,
    refresh_interval: Duration,
    snapshot: RwLock<Option<Arc<Snapshot>>>,
    refreshing: Mutex<()>,
}

impl PermittedVaccineCache {
    pub fn new(catalog: Box<dyn ProductCatalog>, refresh_interval: Duration) -> Self {
        Self {
            catalog,
            refresh_interval,
            snapshot: RwLock::new(None),
            refreshing: Mutex::new(()),
        }
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// Reload the catalog and swap in a new snapshot
    ///
    /// On error the previous snapshot is kept.
    pub fn refresh(&self, now: Instant) -> Result<()> {
        let products = self.catalog.products()?;

        let mut permitted: BTreeMap<Disease, BTreeSet<ProductId>> =
            Disease::ALL.into_iter().map(|d| (d, BTreeSet::new())).collect();
        for product in &products {
            for disease in Disease::ALL {
                if product.is_booster_candidate_for(disease) {
                    permitted
                        .entry(disease)
                        .or_default()
                        .insert(product.id.clone());
                }
            }
        }

        tracing::debug!(
            "Refreshed permitted products from {} catalog entries",
            products.len()
        );

        self.store(Snapshot {
            permitted,
            refreshed_at: now,
        });
        Ok(())
    }

    /// Permitted booster products for `disease`, refreshing if stale
    pub fn permitted_booster_products(&self, disease: Disease) -> BTreeSet<ProductId> {
        self.permitted_booster_products_at(disease, Instant::now())
    }

    /// Same as [`Self::permitted_booster_products`] with an explicit clock
    pub fn permitted_booster_products_at(
        &self,
        disease: Disease,
        now: Instant,
    ) -> BTreeSet<ProductId> {
        let snapshot = match self.current() {
            Some(snapshot) if !self.is_stale(&snapshot, now) => Some(snapshot),
            previous => self.refresh_stale(previous, now),
        };

        let products = snapshot
            .and_then(|snapshot| snapshot.permitted.get(&disease).cloned())
            .unwrap_or_default();
        if products.is_empty() {
            tracing::warn!("No products are permitted for {} boosters", disease);
        }
        products
    }

    /// Refresh on behalf of a reader that found the snapshot stale
    ///
    /// Only one reader refreshes at a time; the others keep reading the
    /// previous snapshot. A failed attempt is stamped like a refresh, so the
    /// catalog is retried once per interval rather than on every read.
    fn refresh_stale(
        &self,
        previous: Option<Arc<Snapshot>>,
        now: Instant,
    ) -> Option<Arc<Snapshot>> {
        let _guard = match self.refreshing.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) if previous.is_some() => return previous,
            Err(TryLockError::WouldBlock) => self
                .refreshing
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
        };

        // Another reader may have refreshed while we waited
        if let Some(current) = self.current() {
            if !self.is_stale(&current, now) {
                return Some(current);
            }
        }

        if let Err(e) = self.refresh(now) {
            tracing::warn!(
                "Failed to refresh permitted products, retrying in {:?}: {}",
                self.refresh_interval,
                e
            );
            let permitted = self
                .current()
                .map(|snapshot| snapshot.permitted.clone())
                .unwrap_or_default();
            self.store(Snapshot {
                permitted,
                refreshed_at: now,
            });
        }
        self.current()
    }

    fn store(&self, snapshot: Snapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::new(snapshot));
    }

    fn current(&self) -> Option<Arc<Snapshot>> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn is_stale(&self, snapshot: &Snapshot, now: Instant) -> bool {
        now.saturating_duration_since(snapshot.refreshed_at) >= self.refresh_interval
    }
}

impl std::fmt::Debug for PermittedVaccineCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermittedVaccineCache")
            .field("refresh_interval", &self.refresh_interval)
            .field("loaded", &self.current().is_some())
            .finish()
    }
}
