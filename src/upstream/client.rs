//! Typed, authenticated wrappers over the known upstream JSON endpoints.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use crate::auth::CredentialBroker;
use crate::domain::{DrugAggregate, Offer, OfferSource, PharmaOpsError, Result, Supplier};

use super::envelope::{price_to_cents, AggregateRow, Envelope, OfferRow, PagedList, SupplierRow};
use super::rate_limit::TokenBucket;
use super::retry::RetryPolicy;

/// Session token header expected by the upstream.
const TOKEN_HEADER: &str = "token";

const MAX_PAGE_SIZE: u32 = 200;

/// The three known upstream calls (C2). A trait seam so the orchestrator can
/// run against a stub.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn search_aggregate(
        &self,
        keyword: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<DrugAggregate>>;

    /// Suppliers carrying a keyword; up to ~1000 rows, no prices.
    async fn facet_suppliers(&self, keyword: &str) -> Result<Vec<Supplier>>;

    /// One supplier's hot offers, with prices.
    async fn supplier_hot_list(
        &self,
        supplier_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Offer>>;
}

pub struct UpstreamClient {
    http: reqwest::Client,
    base_url: Url,
    broker: Arc<CredentialBroker>,
    limiter: Arc<TokenBucket>,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(
        http: reqwest::Client,
        base_url: Url,
        broker: Arc<CredentialBroker>,
        limiter: Arc<TokenBucket>,
    ) -> Self {
        Self {
            http,
            base_url,
            broker,
            limiter,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn validate_paging(keyword: &str, page: u32, page_size: u32) -> Result<()> {
        if keyword.trim().is_empty() {
            return Err(PharmaOpsError::validation("keyword must not be empty"));
        }
        if page < 1 {
            return Err(PharmaOpsError::validation("page must be >= 1"));
        }
        if page_size < 1 || page_size > MAX_PAGE_SIZE {
            return Err(PharmaOpsError::validation(format!(
                "pageSize must be in [1, {MAX_PAGE_SIZE}]"
            )));
        }
        Ok(())
    }

    /// One authenticated GET with retry for transient failures. A 401/403 or
    /// token-expired envelope triggers a single reauthentication and one
    /// more attempt; a second auth failure propagates.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        match self.get_json_once(path, query).await {
            Err(PharmaOpsError::Auth(_)) => {
                debug!("auth failure, refreshing session and retrying once");
                self.broker.invalidate().await;
                self.get_json_once(path, query).await
            }
            other => other,
        }
    }

    async fn get_json_once<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.retry
            .execute(|| self.attempt::<T>(path, query))
            .await
    }

    async fn attempt<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        self.limiter.acquire().await;
        let token = self.broker.get().await?;

        let url = self
            .base_url
            .join(path)
            .map_err(|e| PharmaOpsError::config(format!("bad upstream path {path}: {e}")))?;

        let response = self
            .http
            .get(url)
            .header(TOKEN_HEADER, &token.token)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(PharmaOpsError::auth(format!(
                "upstream rejected session token with HTTP {status}"
            )));
        }
        if status.as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(5);
            return Err(PharmaOpsError::RateLimited { retry_after_secs });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let body_excerpt: String = body.chars().take(200).collect();
            return Err(PharmaOpsError::UpstreamClient {
                status: status.as_u16(),
                body_excerpt,
            });
        }

        let envelope: Envelope<T> = response.json().await?;
        envelope.into_data()
    }
}

#[async_trait]
impl UpstreamApi for UpstreamClient {
    #[instrument(skip(self), fields(keyword = %keyword))]
    async fn search_aggregate(
        &self,
        keyword: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<DrugAggregate>> {
        Self::validate_paging(keyword, page, page_size)?;

        let data: PagedList<AggregateRow> = self
            .get_json(
                "/api/search/aggregate",
                &[
                    ("keyword", keyword.to_string()),
                    ("page", page.to_string()),
                    ("pageSize", page_size.to_string()),
                ],
            )
            .await?;

        Ok(data.list.into_iter().map(aggregate_from_row).collect())
    }

    #[instrument(skip(self), fields(keyword = %keyword))]
    async fn facet_suppliers(&self, keyword: &str) -> Result<Vec<Supplier>> {
        if keyword.trim().is_empty() {
            return Err(PharmaOpsError::validation("keyword must not be empty"));
        }

        let data: PagedList<SupplierRow> = self
            .get_json(
                "/api/search/providers",
                &[("keyword", keyword.to_string())],
            )
            .await?;

        Ok(data
            .list
            .into_iter()
            .map(|row| Supplier {
                id: row.pid,
                name: row.pname,
            })
            .collect())
    }

    #[instrument(skip(self), fields(supplier_id = %supplier_id))]
    async fn supplier_hot_list(
        &self,
        supplier_id: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Offer>> {
        Self::validate_paging(supplier_id, page, page_size)?;

        let data: PagedList<OfferRow> = self
            .get_json(
                "/api/provider/hot",
                &[
                    ("pid", supplier_id.to_string()),
                    ("page", page.to_string()),
                    ("pageSize", page_size.to_string()),
                ],
            )
            .await?;

        Ok(data.list.into_iter().map(offer_from_row).collect())
    }
}

fn aggregate_from_row(row: AggregateRow) -> DrugAggregate {
    DrugAggregate {
        upstream_id: row.id,
        name: row.name,
        specification: row.spec,
        manufacturer: row.factory,
        min_price_cents: row.min_price.map(price_to_cents),
        max_price_cents: row.max_price.map(price_to_cents),
        supplier_count: row.provider_count,
    }
}

fn offer_from_row(row: OfferRow) -> Offer {
    Offer {
        name: row.name,
        specification: row.spec,
        manufacturer: row.factory,
        price_cents: price_to_cents(row.price),
        supplier_name: row.pname,
        supplier_id: row.pid,
        source_url: row.url,
        approval_number: row.approval_number,
        source: OfferSource::Endpoint,
        crawled_at: Utc::now(),
    }
}
