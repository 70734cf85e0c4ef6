//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Purchase record normalization."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
//! Turns a raw purchase row into the products it should grant.

use serde::Serialize;
use serde_json::Value;

use crate::catalog::{AddOn, ProductCatalog};
use crate::model::{ProductId, Purchase};

/// Bundle add-on flags reduced to plain booleans.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AddOnFlags {
    pub ad_generator: bool,
    pub blueprint: bool,
}

impl AddOnFlags {
    /// Read the flags from the purchase columns and metadata bag.
    ///
    /// A flag counts only when explicitly `true` or `"true"` under one of its
    /// key spellings; a missing flag never includes the add-on.
    #[must_use]
    pub fn from_purchase(purchase: &Purchase) -> Self {
        Self {
            ad_generator: flag_set(
                purchase.include_ad_generator.as_ref(),
                purchase,
                AddOn::AdGenerator,
            ),
            blueprint: flag_set(purchase.include_blueprint.as_ref(), purchase, AddOn::Blueprint),
        }
    }

    #[must_use]
    pub fn includes(&self, add_on: AddOn) -> bool {
        match add_on {
            AddOn::AdGenerator => self.ad_generator,
            AddOn::Blueprint => self.blueprint,
        }
    }
}

/// Folded spelling of the flag key: lowercase with separators removed, so
/// `include_ad_generator`, `includeAdGenerator` and `Include-Ad-Generator`
/// all compare equal.
fn folded_flag_key(add_on: AddOn) -> &'static str {
    match add_on {
        AddOn::AdGenerator => "includeadgenerator",
        AddOn::Blueprint => "includeblueprint",
    }
}

fn fold_key(key: &str) -> String {
    key.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn is_strictly_true(value: &Value) -> bool {
    match value {
        Value::Bool(flag) => *flag,
        Value::String(text) => text == "true",
        _ => false,
    }
}

fn flag_set(column: Option<&Value>, purchase: &Purchase, add_on: AddOn) -> bool {
    if column.is_some_and(is_strictly_true) {
        return true;
    }
    let wanted = folded_flag_key(add_on);
    purchase
        .metadata
        .iter()
        .any(|(key, value)| fold_key(key) == wanted && is_strictly_true(value))
}

/// How the purchase referenced its products.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum PurchaseShape {
    /// A single explicit product reference.
    Single,
    /// Main product plus flagged add-ons.
    Bundle { flags: AddOnFlags },
}

/// A product a purchase asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    /// Canonical id, or the raw reference when not in the catalog.
    pub product: ProductId,
    pub recognized: bool,
}

/// Ordered, duplicate-free products a purchase would grant once completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedPurchase {
    pub shape: PurchaseShape,
    pub candidates: Vec<Candidate>,
}

impl NormalizedPurchase {
    /// Candidates present in the catalog.
    pub fn recognized(&self) -> impl Iterator<Item = &ProductId> {
        self.candidates
            .iter()
            .filter(|candidate| candidate.recognized)
            .map(|candidate| &candidate.product)
    }

    /// Candidates the catalog does not know.
    pub fn unrecognized(&self) -> impl Iterator<Item = &ProductId> {
        self.candidates
            .iter()
            .filter(|candidate| !candidate.recognized)
            .map(|candidate| &candidate.product)
    }

    fn push(&mut self, candidate: Candidate) {
        if !self
            .candidates
            .iter()
            .any(|existing| existing.product == candidate.product)
        {
            self.candidates.push(candidate);
        }
    }
}

/// Pure mapping from purchase rows to candidate products.
#[derive(Debug, Clone, Copy)]
pub struct PurchaseNormalizer<'a> {
    catalog: &'a ProductCatalog,
}

impl<'a> PurchaseNormalizer<'a> {
    pub fn new(catalog: &'a ProductCatalog) -> Self {
        Self { catalog }
    }

    /// Normalize one purchase. Status is not considered here.
    #[must_use]
    pub fn normalize(&self, purchase: &Purchase) -> NormalizedPurchase {
        if let Some(reference) = purchase.explicit_product() {
            let resolved = self.catalog.resolve(reference);
            return NormalizedPurchase {
                shape: PurchaseShape::Single,
                candidates: vec![Candidate {
                    product: resolved.id,
                    recognized: resolved.recognized,
                }],
            };
        }

        let flags = AddOnFlags::from_purchase(purchase);
        let mut normalized = NormalizedPurchase {
            shape: PurchaseShape::Bundle { flags },
            candidates: Vec::with_capacity(1 + AddOn::ALL.len()),
        };
        normalized.push(Candidate {
            product: self.catalog.main_product().id.clone(),
            recognized: true,
        });
        for add_on in AddOn::ALL {
            if flags.includes(add_on) {
                normalized.push(Candidate {
                    product: self.catalog.add_on(add_on).id.clone(),
                    recognized: true,
                });
            }
        }
        normalized
    }
}
