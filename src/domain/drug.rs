use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Product category assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Drug,
    Cosmetic,
    MedicalDevice,
    HealthProduct,
    Unknown,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Drug => "drug",
            Category::Cosmetic => "cosmetic",
            Category::MedicalDevice => "medical_device",
            Category::HealthProduct => "health_product",
            Category::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "drug" => Category::Drug,
            "cosmetic" => Category::Cosmetic,
            "medical_device" => Category::MedicalDevice,
            "health_product" => Category::HealthProduct,
            _ => Category::Unknown,
        }
    }
}

/// Where a category assignment came from, kept for re-classification audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategorySource {
    Api,
    Keyword,
    Browser,
    Manual,
    Default,
}

impl CategorySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            CategorySource::Api => "api",
            CategorySource::Keyword => "keyword",
            CategorySource::Browser => "browser",
            CategorySource::Manual => "manual",
            CategorySource::Default => "default",
        }
    }
}

/// Identity of a sellable product. The (name, specification, manufacturer)
/// tuple is unique after normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drug {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_id: Option<String>,
    pub name: String,
    pub specification: String,
    pub manufacturer: String,
    pub category: Category,
    pub category_confidence: f64,
    /// Full source tag, e.g. "keyword:rx" or "browser".
    pub category_source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outlier annotation state of a price row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierFlag {
    Low,
    Normal,
    High,
    Placeholder,
}

impl OutlierFlag {
    pub fn as_i64(&self) -> i64 {
        match self {
            OutlierFlag::Low => -1,
            OutlierFlag::Normal => 0,
            OutlierFlag::High => 1,
            OutlierFlag::Placeholder => 2,
        }
    }

    pub fn from_i64(v: i64) -> Self {
        match v {
            -1 => OutlierFlag::Low,
            1 => OutlierFlag::High,
            2 => OutlierFlag::Placeholder,
            _ => OutlierFlag::Normal,
        }
    }
}

/// One observed supplier offer at one instant. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRecord {
    pub id: i64,
    pub drug_id: i64,
    /// Integer-scaled fixed point, two decimals (yuan x 100).
    pub price_cents: i64,
    pub supplier_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    pub crawled_at: DateTime<Utc>,
    pub is_outlier: OutlierFlag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outlier_reason: Option<String>,
}

impl PriceRecord {
    /// Price as a two-decimal value for the API boundary.
    pub fn price(&self) -> Decimal {
        Decimal::new(self.price_cents, 2)
    }
}

/// Non-unique alternative name mapped to a drug for search expansion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrugAlias {
    pub id: i64,
    pub drug_id: i64,
    pub alias: String,
}

/// A keyword on the operator's recurring crawl list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchListItem {
    pub id: i64,
    pub keyword: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<String>,
    /// 0 normal, 1 important, 2 urgent.
    pub priority: i64,
    pub added_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_crawled_at: Option<DateTime<Utc>>,
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    PriceDrop,
    PriceRise,
    NewSupplier,
}

impl MonitorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MonitorKind::PriceDrop => "price_drop",
            MonitorKind::PriceRise => "price_rise",
            MonitorKind::NewSupplier => "new_supplier",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "price_drop" => Some(MonitorKind::PriceDrop),
            "price_rise" => Some(MonitorKind::PriceRise),
            "new_supplier" => Some(MonitorKind::NewSupplier),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorRule {
    pub id: i64,
    pub drug_id: i64,
    pub kind: MonitorKind,
    pub threshold_pct: f64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

/// Emitted by monitor-rule evaluation over new price rows. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub rule_id: i64,
    pub drug_id: i64,
    pub kind: MonitorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price_record_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}
