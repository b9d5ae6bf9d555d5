//! Wire shapes for the upstream marketplace API.
//!
//! Every payload is wrapped in a status envelope; a non-zero code is a
//! protocol-level failure even when the HTTP status is 200.

use serde::{Deserialize, Serialize};

use crate::domain::{PharmaOpsError, Result};

/// Codes the upstream uses for an expired or missing session token.
const TOKEN_EXPIRED_CODES: &[i64] = &[401, 10401];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub code: i64,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Unwrap the payload, surfacing a protocol error on non-success status.
    pub fn into_data(self) -> Result<T> {
        if self.is_token_expired() {
            return Err(PharmaOpsError::auth(format!(
                "upstream session expired: {}",
                self.message
            )));
        }
        if self.code != 0 {
            return Err(PharmaOpsError::UpstreamProtocol {
                code: self.code,
                message: self.message,
            });
        }
        self.data.ok_or_else(|| PharmaOpsError::UpstreamProtocol {
            code: 0,
            message: "success envelope with no data".to_string(),
        })
    }

    /// The recognized "token expired" payload shape. A success code is never
    /// treated as expired, whatever the message says.
    pub fn is_token_expired(&self) -> bool {
        TOKEN_EXPIRED_CODES.contains(&self.code)
            || (self.code != 0
                && (self.message.contains("token") || self.message.contains("登录已过期")))
    }
}

/// Login response payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginData {
    pub token: String,
    /// Seconds until the token expires.
    pub expires_in: i64,
}

/// Aggregate search row: min/max price and supplier count, no per-supplier
/// prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRow {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub spec: String,
    #[serde(default)]
    pub factory: String,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub provider_count: u32,
}

/// Supplier facet row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupplierRow {
    #[serde(default)]
    pub pid: Option<String>,
    pub pname: String,
}

/// One supplier offer from the hot list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfferRow {
    pub name: String,
    #[serde(default)]
    pub spec: String,
    #[serde(default)]
    pub factory: String,
    pub price: f64,
    #[serde(default)]
    pub pid: Option<String>,
    #[serde(default)]
    pub pname: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub approval_number: Option<String>,
}

/// Paged list wrapper used by the search and hot-list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PagedList<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
    #[serde(default)]
    pub total: u64,
}

/// Convert a float yuan price into integer cents, rounding half away from
/// zero the way the upstream's own UI renders it.
pub fn price_to_cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}
