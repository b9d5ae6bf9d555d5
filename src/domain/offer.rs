use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which pass produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OfferSource {
    Endpoint,
    Browser,
}

/// A product summary row from the upstream search endpoint. Carries min/max
/// price and supplier count but no per-supplier prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugAggregate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_id: Option<String>,
    pub name: String,
    pub specification: String,
    pub manufacturer: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_price_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_price_cents: Option<i64>,
    pub supplier_count: u32,
}

/// A supplier known to carry a keyword. The facet endpoint returns no prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Supplier {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
}

impl Supplier {
    /// Suppliers with a null upstream id are kept distinct by name.
    pub fn merge_key(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.name)
    }
}

/// A single supplier's observed price for a specific drug identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub name: String,
    pub specification: String,
    pub manufacturer: String,
    /// Integer-scaled fixed point, two decimals.
    pub price_cents: i64,
    pub supplier_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_number: Option<String>,
    pub source: OfferSource,
    pub crawled_at: DateTime<Utc>,
}

impl Offer {
    pub fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }

    pub fn supplier_key(&self) -> &str {
        self.supplier_id.as_deref().unwrap_or(&self.supplier_name)
    }

    /// Count of populated optional fields, used to pick the more-specific
    /// record when merging duplicates.
    pub fn specificity(&self) -> u32 {
        let mut score = 0;
        if self.supplier_id.is_some() {
            score += 1;
        }
        if self.source_url.is_some() {
            score += 1;
        }
        if self.approval_number.is_some() {
            score += 1;
        }
        score
    }
}

/// How an acquisition was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionMethod {
    Endpoint,
    Browser,
    Hybrid,
}

impl AcquisitionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionMethod::Endpoint => "endpoint",
            AcquisitionMethod::Browser => "browser",
            AcquisitionMethod::Hybrid => "hybrid",
        }
    }
}

/// Merged output of the endpoint and (optional) browser passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquisitionResult {
    pub keyword: String,
    pub method: AcquisitionMethod,
    pub offers: Vec<Offer>,
    pub aggregates: Vec<DrugAggregate>,
    pub endpoint_count: usize,
    pub browser_count: usize,
}

/// Best-effort signals scraped from a product detail page.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DetailSignals {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<String>,
}
