//! Keyword ingest: acquire, normalize, classify, persist, annotate and
//! evaluate monitors for one keyword.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use crate::domain::{
    AcquisitionMethod, CancelToken, Offer, OutlierFlag, PharmaOpsError, Result,
};
use crate::engine::{classify, normalize_name, normalize_specification, ClassifierInput, IdentityKey};
use crate::engine::normalizer::normalize_offer;
use crate::monitor::{MonitorEvaluator, PriorPriceState};
use crate::storage::{
    DrugFields, DrugRepository, OutlierAnnotator, PriceObservation, PriceRepository, SqliteStore,
};

use super::orchestrator::{AcquireOptions, AcquisitionOrchestrator};

/// Outcome of one ingested keyword, also served to the operator console.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordReport {
    pub keyword: String,
    pub method: AcquisitionMethod,
    pub offers_seen: usize,
    pub drugs_touched: usize,
    pub prices_written: usize,
    pub alerts_emitted: usize,
    /// A few merged offers for operator inspection.
    pub sample: Vec<Offer>,
}

/// The per-keyword ingest entry point; the scheduler and the HTTP surface
/// both drive this seam.
#[async_trait]
pub trait KeywordIngestor: Send + Sync {
    async fn ingest_keyword(
        &self,
        keyword: &str,
        opts: &AcquireOptions,
        cancel: &CancelToken,
    ) -> Result<KeywordReport>;
}

pub struct IngestPipeline {
    orchestrator: AcquisitionOrchestrator,
    store: Arc<SqliteStore>,
    annotator: Arc<OutlierAnnotator<SqliteStore>>,
    monitor: MonitorEvaluator<SqliteStore>,
}

impl IngestPipeline {
    pub fn new(
        orchestrator: AcquisitionOrchestrator,
        store: Arc<SqliteStore>,
        annotator: Arc<OutlierAnnotator<SqliteStore>>,
        monitor: MonitorEvaluator<SqliteStore>,
    ) -> Self {
        Self {
            orchestrator,
            store,
            annotator,
            monitor,
        }
    }

    /// Persist one identity group: single transaction for the drug row and
    /// its observations, then annotation and monitor evaluation.
    async fn persist_group(
        &self,
        identity: &IdentityKey,
        offers: &[Offer],
        aggregates: &HashMap<(String, String), String>,
    ) -> Result<(i64, usize, usize)> {
        let approval_number = offers
            .iter()
            .find_map(|o| o.approval_number.as_deref())
            .map(str::to_string);

        let classification = classify(&ClassifierInput {
            name: &identity.name,
            manufacturer: &identity.manufacturer,
            approval_number: approval_number.as_deref(),
        });

        let upstream_id = aggregates
            .get(&(identity.name.clone(), identity.specification.clone()))
            .cloned();

        let fields = DrugFields {
            upstream_id,
            category: classification.category,
            category_confidence: classification.confidence,
            category_source: classification.source,
            approval_number,
        };

        let observations: Vec<PriceObservation> = offers
            .iter()
            .map(|o| PriceObservation {
                price_cents: o.price_cents,
                supplier_name: o.supplier_name.clone(),
                supplier_id: o.supplier_id.clone(),
                source_url: o.source_url.clone(),
                crawled_at: o.crawled_at,
            })
            .collect();

        let outcome = self
            .store
            .persist_identity(identity, &fields, &observations)
            .await?;

        self.annotator.annotate_drug(outcome.drug_id).await?;

        // Split the annotated price set into prior rows and this batch.
        let all = self.store.get_prices(outcome.drug_id, true).await?;
        let inserted: std::collections::HashSet<i64> =
            outcome.inserted_ids.iter().copied().collect();
        let (new_records, prior_records): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|r| inserted.contains(&r.id));

        let prior = PriorPriceState {
            min_price_cents: prior_records
                .iter()
                .filter(|r| r.is_outlier == OutlierFlag::Normal)
                .map(|r| r.price_cents)
                .min(),
            supplier_keys: prior_records
                .iter()
                .map(|r| {
                    r.supplier_id
                        .clone()
                        .unwrap_or_else(|| r.supplier_name.clone())
                })
                .collect(),
        };

        // Placeholder and statistical outliers never drive price alerts.
        let alertable: Vec<_> = new_records
            .iter()
            .filter(|r| r.is_outlier == OutlierFlag::Normal)
            .cloned()
            .collect();
        let alerts = self
            .monitor
            .evaluate(outcome.drug_id, &prior, &alertable)
            .await?;

        Ok((outcome.drug_id, outcome.inserted, alerts))
    }
}

#[async_trait]
impl KeywordIngestor for IngestPipeline {
    #[instrument(skip(self, opts, cancel), fields(keyword = %keyword))]
    async fn ingest_keyword(
        &self,
        keyword: &str,
        opts: &AcquireOptions,
        cancel: &CancelToken,
    ) -> Result<KeywordReport> {
        let result = self
            .orchestrator
            .acquire_suppliers_for_keyword(keyword, opts, cancel)
            .await?;

        // Group offers by normalized identity; malformed records are dropped
        // with a warning.
        let mut groups: HashMap<IdentityKey, Vec<Offer>> = HashMap::new();
        for offer in result.offers.iter().cloned() {
            match normalize_offer(offer) {
                Ok((identity, offer)) => groups.entry(identity).or_default().push(offer),
                Err(e) => warn!(keyword = %keyword, "dropping offer: {}", e),
            }
        }

        // Aggregate upstream ids keyed by normalized (name, spec); aggregates
        // alone never materialize a drug.
        let mut aggregate_ids: HashMap<(String, String), String> = HashMap::new();
        for aggregate in &result.aggregates {
            if let Some(id) = &aggregate.upstream_id {
                aggregate_ids.insert(
                    (
                        normalize_name(&aggregate.name),
                        normalize_specification(&aggregate.specification),
                    ),
                    id.clone(),
                );
            }
        }

        let mut drugs_touched = 0usize;
        let mut prices_written = 0usize;
        let mut alerts_emitted = 0usize;
        let mut first_error: Option<PharmaOpsError> = None;
        let mut identity_ids: HashMap<IdentityKey, i64> = HashMap::new();

        for (identity, offers) in &groups {
            cancel.check()?;
            match self.persist_group(identity, offers, &aggregate_ids).await {
                Ok((drug_id, inserted, alerts)) => {
                    drugs_touched += 1;
                    prices_written += inserted;
                    alerts_emitted += alerts;
                    identity_ids.insert(identity.clone(), drug_id);
                }
                Err(e) => {
                    warn!(keyword = %keyword, name = %identity.name, "identity persist failed: {}", e);
                    first_error.get_or_insert(e);
                }
            }
        }

        // Aggregate display names that differ from a stored drug's name
        // become search aliases.
        for aggregate in &result.aggregates {
            let agg_name = normalize_name(&aggregate.name);
            let agg_spec = normalize_specification(&aggregate.specification);
            for (identity, drug_id) in &identity_ids {
                if identity.specification == agg_spec && identity.name != agg_name {
                    if let Err(e) = self.store.add_alias(*drug_id, &agg_name).await {
                        warn!("alias insert failed: {}", e);
                    }
                }
            }
        }

        if drugs_touched == 0 {
            if let Some(e) = first_error {
                return Err(e);
            }
        }

        let sample: Vec<Offer> = result.offers.iter().take(5).cloned().collect();

        info!(
            keyword = %keyword,
            method = result.method.as_str(),
            offers = result.offers.len(),
            drugs = drugs_touched,
            prices = prices_written,
            "keyword ingested"
        );

        Ok(KeywordReport {
            keyword: keyword.to_string(),
            method: result.method,
            offers_seen: result.offers.len(),
            drugs_touched,
            prices_written,
            alerts_emitted,
            sample,
        })
    }
}
