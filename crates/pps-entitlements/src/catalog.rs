//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Product catalog and legacy key mapping."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::fmt;

use once_cell::sync::Lazy;
use pps_logging::{pps_warn, LogContext};
use serde::{Deserialize, Serialize};

use crate::model::ProductId;
use crate::{CatalogError, CatalogResult};

/// Legacy key of the bundle base product.
pub const MAIN_PRODUCT_KEY: &str = "pmu-profit-system";
/// Legacy key of the ad generator add-on.
pub const AD_GENERATOR_KEY: &str = "pmu-ad-generator";
/// Legacy key of the consultation blueprint add-on.
pub const BLUEPRINT_KEY: &str = "consultation-success-blueprint";
/// Legacy key of the pricing template.
pub const PRICING_TEMPLATE_KEY: &str = "pricing-template";

static BUILTIN: Lazy<ProductCatalog> = Lazy::new(|| {
    ProductCatalog::new(vec![
        Product::builtin(
            "4a554622-d759-42b7-b830-79c9136d2f96",
            MAIN_PRODUCT_KEY,
            "PMU Profit System",
            "Complete course for PMU business growth",
            ProductKind::Course,
            3700,
        ),
        Product::builtin(
            "4ba5c775-a8e4-449e-828f-19f938e3710b",
            AD_GENERATOR_KEY,
            "PMU Ad Generator",
            "AI-powered ad copy generator for PMU businesses",
            ProductKind::Tool,
            2700,
        ),
        Product::builtin(
            "e5749058-500d-4333-8938-c8a19b16cd65",
            BLUEPRINT_KEY,
            "Consultation Success Blueprint",
            "Guide for successful PMU consultations",
            ProductKind::Resource,
            3300,
        ),
        Product::builtin(
            "f2a8c6b1-9d3e-4c7f-b5a2-1e8d7f9b6c3a",
            PRICING_TEMPLATE_KEY,
            "Premium Pricing Template",
            "Create professional, conversion-optimized pricing packages in minutes",
            ProductKind::Resource,
            2700,
        ),
    ])
    .expect("built-in catalog to be consistent")
});

/// Kind of digital product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductKind {
    Course,
    Tool,
    Resource,
}

impl fmt::Display for ProductKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductKind::Course => write!(f, "course"),
            ProductKind::Tool => write!(f, "tool"),
            ProductKind::Resource => write!(f, "resource"),
        }
    }
}

/// Add-ons that a bundle checkout can include next to the main product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AddOn {
    AdGenerator,
    Blueprint,
}

impl AddOn {
    /// Every bundle add-on, in grant order.
    pub const ALL: [AddOn; 2] = [AddOn::AdGenerator, AddOn::Blueprint];

    /// Legacy key of the product this add-on grants.
    #[must_use]
    pub fn legacy_key(self) -> &'static str {
        match self {
            AddOn::AdGenerator => AD_GENERATOR_KEY,
            AddOn::Blueprint => BLUEPRINT_KEY,
        }
    }
}

/// A sellable product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub legacy_key: String,
    pub name: String,
    pub description: String,
    /// Price in minor currency units.
    pub price_minor: u32,
    pub currency: String,
    pub kind: ProductKind,
    pub active: bool,
}

impl Product {
    fn builtin(
        id: &str,
        legacy_key: &str,
        name: &str,
        description: &str,
        kind: ProductKind,
        price_minor: u32,
    ) -> Self {
        Self {
            id: ProductId::from(id),
            legacy_key: legacy_key.to_owned(),
            name: name.to_owned(),
            description: description.to_owned(),
            price_minor,
            currency: "EUR".to_owned(),
            kind,
            active: true,
        }
    }
}

/// Result of resolving a raw product identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Canonical id, or the trimmed input when unrecognized.
    pub id: ProductId,
    pub recognized: bool,
}

/// Fixed mapping between legacy product keys and canonical identifiers.
#[derive(Debug, Clone)]
pub struct ProductCatalog {
    products: Vec<Product>,
    main: usize,
    add_ons: [usize; 2],
}

impl ProductCatalog {
    /// The catalog compiled into this build.
    #[must_use]
    pub fn builtin() -> &'static ProductCatalog {
        &BUILTIN
    }

    /// Build a catalog from an explicit product list.
    ///
    /// Legacy keys and canonical ids must be unique, and the main product
    /// plus every bundle add-on must be present.
    pub fn new(products: Vec<Product>) -> CatalogResult<Self> {
        let mut ids = BTreeSet::new();
        let mut keys = BTreeSet::new();
        for product in &products {
            if !ids.insert(product.id.clone()) {
                return Err(CatalogError::DuplicateId(product.id.to_string()));
            }
            if !keys.insert(product.legacy_key.to_ascii_lowercase()) {
                return Err(CatalogError::DuplicateLegacyKey(product.legacy_key.clone()));
            }
        }
        let position = |key: &'static str| {
            products
                .iter()
                .position(|product| product.legacy_key.eq_ignore_ascii_case(key))
                .ok_or(CatalogError::MissingRequired(key))
        };
        let main = position(MAIN_PRODUCT_KEY)?;
        let add_ons = [
            position(AddOn::AdGenerator.legacy_key())?,
            position(AddOn::Blueprint.legacy_key())?,
        ];
        Ok(Self {
            products,
            main,
            add_ons,
        })
    }

    /// All products in catalog order.
    #[must_use]
    pub fn products(&self) -> &[Product] {
        &self.products
    }

    fn by_id(&self, id: &str) -> Option<&Product> {
        self.products
            .iter()
            .find(|product| product.id.as_str().eq_ignore_ascii_case(id))
    }

    fn by_legacy_key(&self, key: &str) -> Option<&Product> {
        self.products
            .iter()
            .find(|product| product.legacy_key.eq_ignore_ascii_case(key))
    }

    /// Look up a product by canonical id or legacy key.
    #[must_use]
    pub fn product(&self, identifier: &str) -> Option<&Product> {
        let identifier = identifier.trim();
        self.by_id(identifier)
            .or_else(|| self.by_legacy_key(identifier))
    }

    /// Whether the identifier names a catalog product.
    #[must_use]
    pub fn is_recognized(&self, identifier: &str) -> bool {
        self.product(identifier).is_some()
    }

    /// Map a canonical id or legacy key to the canonical id.
    ///
    /// Unknown identifiers pass through unchanged (trimmed) with a warning, so
    /// ingestion never fails on a product key introduced after this build.
    pub fn resolve(&self, identifier: &str) -> Resolved {
        match self.product(identifier) {
            Some(product) => Resolved {
                id: product.id.clone(),
                recognized: true,
            },
            None => {
                let raw = identifier.trim();
                pps_warn!(
                    context = LogContext::new().with_product(raw),
                    "unrecognized product identifier; passing through"
                );
                Resolved {
                    id: ProductId::from(raw),
                    recognized: false,
                }
            }
        }
    }

    /// Catalog display name, or `None` when the identifier is unknown.
    #[must_use]
    pub fn display_name(&self, identifier: &str) -> Option<&str> {
        self.product(identifier).map(|product| product.name.as_str())
    }

    /// Legacy key for a canonical id.
    #[must_use]
    pub fn legacy_key(&self, id: &ProductId) -> Option<&str> {
        self.by_id(id.as_str())
            .map(|product| product.legacy_key.as_str())
    }

    /// The bundle base product.
    #[must_use]
    pub fn main_product(&self) -> &Product {
        &self.products[self.main]
    }

    /// The product granted by a bundle add-on.
    #[must_use]
    pub fn add_on(&self, add_on: AddOn) -> &Product {
        let index = match add_on {
            AddOn::AdGenerator => self.add_ons[0],
            AddOn::Blueprint => self.add_ons[1],
        };
        &self.products[index]
    }
}
