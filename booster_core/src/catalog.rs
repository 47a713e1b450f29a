//! Vaccine product catalog.
//!
//! The catalog supplies every product with its "recommended for booster",
//! "discontinued" and "applicable disease" flags. It is only read by the
//! permitted-product cache. A built-in catalog is provided; deployments can
//! point the cache at a JSON file instead.

use crate::{Disease, Error, ProductId, Result, VaccineProduct};
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Source of vaccine products
///
/// Implementations are shared by every evaluation thread and may perform
/// I/O; a failure is reported to the cache, which keeps its previous value.
pub trait ProductCatalog: Send + Sync {
    fn products(&self) -> Result<Vec<VaccineProduct>>;
}

/// In-memory catalog keyed by product id
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    pub products: HashMap<ProductId, VaccineProduct>,
}

/// Cached default catalog - built once and reused across all operations
static DEFAULT_CATALOG: Lazy<Catalog> = Lazy::new(build_default_catalog);

/// Get a reference to the cached default catalog
pub fn get_default_catalog() -> &'static Catalog {
    &DEFAULT_CATALOG
}

/// Builds the default catalog with the built-in products
pub fn build_default_catalog() -> Catalog {
    let product = |id: &str, name: &str, disease: Disease, booster: bool, discontinued: bool| {
        VaccineProduct {
            id: id.into(),
            name: name.into(),
            diseases: vec![disease],
            recommended_for_booster: booster,
            discontinued,
        }
    };

    let products = vec![
        product("comirnaty", "Comirnaty (Pfizer/BioNTech)", Disease::Covid, true, false),
        product("spikevax", "Spikevax (Moderna)", Disease::Covid, true, false),
        product("nuvaxovid", "Nuvaxovid (Novavax)", Disease::Covid, false, false),
        product("jcovden", "COVID-19 Vaccine Janssen", Disease::Covid, false, true),
        product("encepur", "Encepur", Disease::Fsme, true, false),
        product("fsme_immun", "FSME-Immun CC", Disease::Fsme, true, false),
        product("jynneos", "Jynneos (Bavarian Nordic)", Disease::Mpox, true, false),
    ];

    Catalog {
        products: products.into_iter().map(|p| (p.id.clone(), p)).collect(),
    }
}

impl Catalog {
    /// Build a catalog from a product list, rejecting duplicate ids
    pub fn from_products(products: Vec<VaccineProduct>) -> Result<Self> {
        let mut map = HashMap::with_capacity(products.len());
        for product in products {
            let id = product.id.clone();
            if map.insert(id.clone(), product).is_some() {
                return Err(Error::Catalog(format!("duplicate product id '{}'", id)));
            }
        }
        Ok(Self { products: map })
    }

    /// Load a catalog from a JSON array of products
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let products: Vec<VaccineProduct> = serde_json::from_str(&contents)?;
        let catalog = Self::from_products(products)?;
        tracing::debug!(
            "Loaded {} products from {:?}",
            catalog.products.len(),
            path
        );
        Ok(catalog)
    }

    /// Products currently recommended for booster use against `disease`
    pub fn booster_candidates(&self, disease: Disease) -> BTreeSet<ProductId> {
        self.products
            .values()
            .filter(|p| p.is_booster_candidate_for(disease))
            .map(|p| p.id.clone())
            .collect()
    }

    /// Validate the catalog for consistency and completeness
    ///
    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        for (id, product) in &self.products {
            if id.as_str().is_empty() {
                errors.push("Product has empty ID".to_string());
            }
            if id != &product.id {
                errors.push(format!(
                    "Product key '{}' doesn't match product.id '{}'",
                    id, product.id
                ));
            }
            if product.name.is_empty() {
                errors.push(format!("Product '{}' has empty name", id));
            }
            if product.diseases.is_empty() {
                errors.push(format!("Product '{}' applies to no disease", id));
            }
            if product.discontinued && product.recommended_for_booster {
                errors.push(format!(
                    "Product '{}' is discontinued but still recommended for boosters",
                    id
                ));
            }
        }

        for disease in Disease::ALL {
            if !self.products.values().any(|p| p.diseases.contains(&disease)) {
                errors.push(format!("Catalog has no products for {}", disease));
            }
        }

        errors
    }
}

impl ProductCatalog for Catalog {
    fn products(&self) -> Result<Vec<VaccineProduct>> {
        Ok(self.products.values().cloned().collect())
    }
}

/// Catalog re-read from a JSON file on every refresh
#[derive(Clone, Debug)]
pub struct FileCatalog {
    path: PathBuf,
}

impl FileCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ProductCatalog for FileCatalog {
    fn products(&self) -> Result<Vec<VaccineProduct>> {
        let catalog = Catalog::load_from(&self.path)?;
        Ok(catalog.products.into_values().collect())
    }
}
