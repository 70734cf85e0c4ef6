//! ---
//! pps_section: "02-entitlements"
//! pps_subsection: "module"
//! pps_type: "source"
//! pps_scope: "code"
//! pps_description: "Purchase and entitlement records."
//! pps_version: "v0.1.0"
//! pps_owner: "tbd"
//! ---
//! Records exchanged with the backing store.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrow the raw identifier.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Identifier of an account in the hosted auth service.
    UserId
);
string_id!(
    /// Canonical product identifier (a UUID string for catalog products).
    ProductId
);
string_id!(
    /// Identifier of a purchase row.
    PurchaseId
);

/// Identifier of an entitlement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntitlementId(Uuid);

impl EntitlementId {
    /// Generate a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for EntitlementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for EntitlementId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Payment lifecycle of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurchaseStatus {
    /// Checkout started, payment not confirmed.
    Pending,
    /// Payment confirmed.
    Completed,
    /// Payment failed.
    Failed,
    /// Checkout abandoned or cancelled.
    #[serde(alias = "canceled")]
    Cancelled,
    /// Payment returned to the customer.
    Refunded,
}

impl PurchaseStatus {
    /// Only completed purchases grant entitlements.
    #[must_use]
    pub fn grants_access(self) -> bool {
        matches!(self, PurchaseStatus::Completed)
    }

    /// Stable lowercase name used in storage and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::Completed => "completed",
            PurchaseStatus::Failed => "failed",
            PurchaseStatus::Cancelled => "cancelled",
            PurchaseStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(PurchaseStatus::Pending),
            "completed" => Ok(PurchaseStatus::Completed),
            "failed" => Ok(PurchaseStatus::Failed),
            "cancelled" | "canceled" => Ok(PurchaseStatus::Cancelled),
            "refunded" => Ok(PurchaseStatus::Refunded),
            other => Err(format!("unknown purchase status: {other}")),
        }
    }
}

/// A purchase row as recorded by checkout, possibly in a legacy shape.
///
/// Either `product_id` names a single product, or the purchase is a bundle
/// whose add-ons are signalled by the `include_*` columns or metadata flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Purchase {
    pub id: PurchaseId,
    /// Absent only before checkout completes.
    #[serde(default)]
    pub user_id: Option<UserId>,
    pub status: PurchaseStatus,
    /// Canonical id or legacy key of a single-product purchase.
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_ad_generator: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_blueprint: Option<Value>,
    /// Free-form bag (processor references, email, flags). Hints only.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    /// Checkout session or payment intent reference.
    #[serde(default)]
    pub payment_reference: Option<String>,
    #[serde(default)]
    pub amount_minor: Option<u64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub entitlements_created: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Purchase {
    /// Create a bare purchase record with no product reference.
    pub fn new(id: impl Into<PurchaseId>, user: Option<UserId>, status: PurchaseStatus) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            user_id: user,
            status,
            product_id: None,
            include_ad_generator: None,
            include_blueprint: None,
            metadata: Map::new(),
            payment_reference: None,
            amount_minor: None,
            currency: None,
            entitlements_created: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Set the single product reference.
    #[must_use]
    pub fn with_product(mut self, product: impl Into<String>) -> Self {
        self.product_id = Some(product.into());
        self
    }

    /// Insert a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Attach the payment processor reference.
    #[must_use]
    pub fn with_payment_reference(mut self, reference: impl Into<String>) -> Self {
        self.payment_reference = Some(reference.into());
        self
    }

    /// Owning user, ignoring blank identifiers.
    #[must_use]
    pub fn owner(&self) -> Option<&UserId> {
        self.user_id
            .as_ref()
            .filter(|user| !user.as_str().trim().is_empty())
    }

    /// Explicit product reference, ignoring blank values.
    #[must_use]
    pub fn explicit_product(&self) -> Option<&str> {
        self.product_id
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Provenance tag of an entitlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Purchase,
    Subscription,
    Manual,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Purchase => "purchase",
            SourceKind::Subscription => "subscription",
            SourceKind::Manual => "manual",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Record an entitlement was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntitlementSource {
    #[serde(rename = "source_type")]
    pub kind: SourceKind,
    #[serde(rename = "source_id")]
    pub id: String,
}

impl EntitlementSource {
    pub fn purchase(id: &PurchaseId) -> Self {
        Self {
            kind: SourceKind::Purchase,
            id: id.as_str().to_owned(),
        }
    }

    pub fn manual(reference: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::Manual,
            id: reference.into(),
        }
    }
}

impl fmt::Display for EntitlementSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

/// A durable grant of one product to one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entitlement {
    pub id: EntitlementId,
    pub user_id: UserId,
    pub product_id: ProductId,
    #[serde(flatten)]
    pub source: EntitlementSource,
    pub valid_from: DateTime<Utc>,
    #[serde(default)]
    pub valid_until: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Entitlement {
    /// Build a new active row valid from `now` with no end date.
    pub fn grant(
        user: UserId,
        product: ProductId,
        source: EntitlementSource,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntitlementId::generate(),
            user_id: user,
            product_id: product,
            source,
            valid_from: now,
            valid_until: None,
            is_active: true,
            created_at: now,
            note: None,
        }
    }

    /// Deactivate the row, closing its validity window at `at`.
    pub fn revoke(&mut self, at: DateTime<Utc>) {
        self.is_active = false;
        self.valid_until = Some(at);
    }

    /// True when this row grants `product` to `user` right now.
    #[must_use]
    pub fn is_active_for(&self, user: &UserId, product: &ProductId) -> bool {
        self.is_active && &self.user_id == user && &self.product_id == product
    }
}

/// Per-(user, product) lifecycle: `None -> Active -> Revoked`.
///
/// A revoked pair becomes active again only through a new row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementState {
    None,
    Active,
    Revoked,
}

impl EntitlementState {
    /// Derive the state of a pair from every row recorded for it.
    pub fn from_rows<'a>(rows: impl IntoIterator<Item = &'a Entitlement>) -> Self {
        let mut seen = false;
        for row in rows {
            if row.is_active {
                return EntitlementState::Active;
            }
            seen = true;
        }
        if seen {
            EntitlementState::Revoked
        } else {
            EntitlementState::None
        }
    }
}
