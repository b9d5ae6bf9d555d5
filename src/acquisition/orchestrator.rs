//! Endpoint-first, browser-fallback acquisition (C4).

use std::collections::HashMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, instrument, warn};

use crate::browser::OfferHarvester;
use crate::domain::{
    AcquisitionMethod, AcquisitionResult, CancelToken, DrugAggregate, Offer, OfferSource,
    PharmaOpsError, Result,
};
use crate::engine::{matches_keyword, normalize_manufacturer, normalize_name,
    normalize_specification};
use crate::upstream::UpstreamApi;

#[derive(Debug, Clone)]
pub struct AcquireOptions {
    /// How many of the (up to ~1000) facet suppliers to visit.
    pub supplier_cap: usize,
    /// Concurrent hot-list calls within one keyword.
    pub api_concurrency: usize,
    /// Endpoint pass is sufficient at this many offers.
    pub min_providers: usize,
    pub force_browser: bool,
    /// Never fall back to the browser (operator "quick" mode).
    pub endpoint_only: bool,
    /// Opt-in detail-page navigation for approval numbers.
    pub fetch_detail: bool,
}

impl Default for AcquireOptions {
    fn default() -> Self {
        Self {
            supplier_cap: 100,
            api_concurrency: 8,
            min_providers: 5,
            force_browser: false,
            endpoint_only: false,
            fetch_detail: false,
        }
    }
}

/// Dedup identity within one acquisition: normalized product identity plus
/// supplier and scaled price.
type MergeKey = (String, String, String, String, i64);

fn merge_key(offer: &Offer) -> MergeKey {
    (
        normalize_name(&offer.name),
        normalize_specification(&offer.specification),
        normalize_manufacturer(&offer.manufacturer),
        offer.supplier_key().to_string(),
        offer.price_cents,
    )
}

pub struct AcquisitionOrchestrator {
    api: Arc<dyn UpstreamApi>,
    harvester: Arc<dyn OfferHarvester>,
}

impl AcquisitionOrchestrator {
    pub fn new(api: Arc<dyn UpstreamApi>, harvester: Arc<dyn OfferHarvester>) -> Self {
        Self { api, harvester }
    }

    /// The hybrid strategy: endpoint pass, sufficiency check, optional
    /// browser pass, then an order-independent merge.
    #[instrument(skip(self, opts, cancel), fields(keyword = %keyword))]
    pub async fn acquire_suppliers_for_keyword(
        &self,
        keyword: &str,
        opts: &AcquireOptions,
        cancel: &CancelToken,
    ) -> Result<AcquisitionResult> {
        if keyword.trim().is_empty() {
            return Err(PharmaOpsError::validation("keyword must not be empty"));
        }

        cancel.check()?;
        let (aggregates, endpoint_offers) = self.endpoint_pass(keyword, opts, cancel).await?;
        let endpoint_count = endpoint_offers.len();

        let sufficient = endpoint_count >= opts.min_providers && !opts.force_browser;
        if opts.endpoint_only || sufficient {
            debug!(
                offers = endpoint_count,
                "endpoint pass sufficient, skipping browser"
            );
            return Ok(AcquisitionResult {
                keyword: keyword.to_string(),
                method: AcquisitionMethod::Endpoint,
                offers: merge_offers(endpoint_offers, Vec::new()),
                aggregates,
                endpoint_count,
                browser_count: 0,
            });
        }

        // Browser fallback. A failed harvest keeps the endpoint data.
        cancel.check()?;
        let browser_offers = match self.harvester.harvest_offers(keyword, cancel).await {
            Ok(offers) => offers,
            Err(PharmaOpsError::Cancelled) => return Err(PharmaOpsError::Cancelled),
            Err(PharmaOpsError::BrowserHarvest { reason }) => {
                warn!(keyword = %keyword, reason = %reason, "browser pass failed, keeping endpoint data");
                Vec::new()
            }
            Err(other) => return Err(other),
        };
        let browser_count = browser_offers.len();

        // The browser pass ran, so the result is never labeled Endpoint
        // here; that label is reserved for the early return above. An empty
        // or failed harvest is a degraded hybrid attempt.
        let method = match (endpoint_count, browser_count) {
            (0, n) if n > 0 => AcquisitionMethod::Browser,
            _ => AcquisitionMethod::Hybrid,
        };

        let mut offers = merge_offers(endpoint_offers, browser_offers);

        if opts.fetch_detail {
            self.enrich_with_detail(&aggregates, &mut offers).await;
        }

        info!(
            method = method.as_str(),
            endpoint = endpoint_count,
            browser = browser_count,
            merged = offers.len(),
            "acquisition complete"
        );

        Ok(AcquisitionResult {
            keyword: keyword.to_string(),
            method,
            offers,
            aggregates,
            endpoint_count,
            browser_count,
        })
    }

    async fn endpoint_pass(
        &self,
        keyword: &str,
        opts: &AcquireOptions,
        cancel: &CancelToken,
    ) -> Result<(Vec<DrugAggregate>, Vec<Offer>)> {
        let aggregates: Vec<DrugAggregate> = self
            .api
            .search_aggregate(keyword, 1, 100)
            .await?
            .into_iter()
            .filter(|agg| matches_keyword(&agg.name, keyword))
            .collect();

        cancel.check()?;
        let mut suppliers = self.api.facet_suppliers(keyword).await?;
        suppliers.truncate(opts.supplier_cap);

        cancel.check()?;

        // Hot lists complete in any order; name-only suppliers cannot be
        // queried by id and are left to the browser pass.
        let api = self.api.clone();
        let results: Vec<Result<Vec<Offer>>> = stream::iter(
            suppliers
                .into_iter()
                .filter_map(|s| s.id)
                .map(|sid| {
                    let api = api.clone();
                    let cancel = cancel.clone();
                    async move {
                        cancel.check()?;
                        api.supplier_hot_list(&sid, 1, 100).await
                    }
                }),
        )
        .buffer_unordered(opts.api_concurrency.max(1))
        .collect()
        .await;

        let mut offers = Vec::new();
        for result in results {
            match result {
                Ok(batch) => {
                    offers.extend(
                        batch
                            .into_iter()
                            .filter(|o| matches_keyword(&o.name, keyword)),
                    );
                }
                Err(e @ PharmaOpsError::Auth(_)) => return Err(e),
                Err(PharmaOpsError::Cancelled) => return Err(PharmaOpsError::Cancelled),
                Err(e) => warn!(keyword = %keyword, "supplier hot list failed: {}", e),
            }
        }

        Ok((aggregates, offers))
    }

    /// Best-effort approval-number enrichment from detail pages, bounded to
    /// the first few aggregates.
    async fn enrich_with_detail(&self, aggregates: &[DrugAggregate], offers: &mut [Offer]) {
        for aggregate in aggregates.iter().filter(|a| a.upstream_id.is_some()).take(5) {
            let upstream_id = aggregate.upstream_id.as_deref().unwrap_or_default();
            let signals = match self.harvester.extract_detail(upstream_id).await {
                Ok(signals) => signals,
                Err(e) => {
                    debug!(upstream_id = %upstream_id, "detail extraction failed: {}", e);
                    continue;
                }
            };
            let Some(approval) = signals.approval_number else {
                continue;
            };

            let agg_name = normalize_name(&aggregate.name);
            let agg_spec = normalize_specification(&aggregate.specification);
            for offer in offers.iter_mut() {
                if offer.approval_number.is_none()
                    && normalize_name(&offer.name) == agg_name
                    && normalize_specification(&offer.specification) == agg_spec
                {
                    offer.approval_number = Some(approval.clone());
                }
            }
        }
    }
}

/// Merge the two passes. On duplicate identity the record with more populated
/// fields wins; endpoint provenance wins ties on identical content.
pub fn merge_offers(endpoint: Vec<Offer>, browser: Vec<Offer>) -> Vec<Offer> {
    let mut merged: HashMap<MergeKey, Offer> = HashMap::new();

    for offer in endpoint.into_iter().chain(browser) {
        let key = merge_key(&offer);
        match merged.get_mut(&key) {
            None => {
                merged.insert(key, offer);
            }
            Some(existing) => {
                let replace = offer.specificity() > existing.specificity()
                    || (offer.specificity() == existing.specificity()
                        && existing.source == OfferSource::Browser
                        && offer.source == OfferSource::Endpoint);
                if replace {
                    *existing = offer;
                }
            }
        }
    }

    let mut offers: Vec<Offer> = merged.into_values().collect();
    // Deterministic output independent of completion order.
    offers.sort_by(|a, b| {
        (&a.name, &a.specification, a.supplier_key(), a.price_cents).cmp(&(
            &b.name,
            &b.specification,
            b.supplier_key(),
            b.price_cents,
        ))
    });
    offers
}
