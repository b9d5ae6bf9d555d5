//! Monitor-rule evaluation over newly appended price rows.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{debug, info};

use crate::domain::{MonitorKind, PriceRecord, Result};
use crate::storage::{MonitorRepository, NewAlert};

/// Snapshot of a drug's price state before a batch is appended, used as the
/// baseline for drop/rise detection.
#[derive(Debug, Clone, Default)]
pub struct PriorPriceState {
    /// Lowest non-outlier price before the batch, in cents.
    pub min_price_cents: Option<i64>,
    /// Supplier keys seen before the batch.
    pub supplier_keys: HashSet<String>,
}

impl PriorPriceState {
    pub fn from_records(records: &[PriceRecord]) -> Self {
        Self {
            min_price_cents: records.iter().map(|r| r.price_cents).min(),
            supplier_keys: records
                .iter()
                .map(|r| {
                    r.supplier_id
                        .clone()
                        .unwrap_or_else(|| r.supplier_name.clone())
                })
                .collect(),
        }
    }
}

pub struct MonitorEvaluator<M> {
    rules: Arc<M>,
}

impl<M: MonitorRepository> MonitorEvaluator<M> {
    pub fn new(rules: Arc<M>) -> Self {
        Self { rules }
    }

    /// Evaluate every enabled rule for the drug against the newly appended
    /// rows; emits immutable alerts. Returns how many alerts were created.
    pub async fn evaluate(
        &self,
        drug_id: i64,
        prior: &PriorPriceState,
        new_records: &[PriceRecord],
    ) -> Result<usize> {
        if new_records.is_empty() {
            return Ok(0);
        }
        let rules = self.rules.list_enabled_rules(drug_id).await?;
        if rules.is_empty() {
            return Ok(0);
        }

        let new_min = new_records.iter().min_by_key(|r| r.price_cents);
        let mut created = 0usize;

        for rule in rules {
            let alert = match rule.kind {
                MonitorKind::PriceDrop => self.check_price_drop(&rule, prior, new_min),
                MonitorKind::PriceRise => self.check_price_rise(&rule, prior, new_min),
                MonitorKind::NewSupplier => self.check_new_supplier(&rule, prior, new_records),
            };

            if let Some(alert) = alert {
                self.rules.insert_alert(&alert).await?;
                created += 1;
                info!(
                    drug_id,
                    kind = alert.kind.as_str(),
                    "monitor alert emitted"
                );
            }
        }

        debug!(drug_id, created, "monitor evaluation complete");
        Ok(created)
    }

    fn check_price_drop(
        &self,
        rule: &crate::domain::MonitorRule,
        prior: &PriorPriceState,
        new_min: Option<&PriceRecord>,
    ) -> Option<NewAlert> {
        let baseline = prior.min_price_cents?;
        let record = new_min?;
        if baseline <= 0 || record.price_cents >= baseline {
            return None;
        }

        let drop_pct = (baseline - record.price_cents) as f64 / baseline as f64 * 100.0;
        if drop_pct < rule.threshold_pct {
            return None;
        }

        Some(NewAlert {
            rule_id: rule.id,
            drug_id: rule.drug_id,
            kind: MonitorKind::PriceDrop,
            message: format!(
                "lowest price dropped {:.1}%: {} -> {} ({})",
                drop_pct,
                format_yuan(baseline),
                format_yuan(record.price_cents),
                record.supplier_name
            ),
            price_record_id: Some(record.id),
        })
    }

    fn check_price_rise(
        &self,
        rule: &crate::domain::MonitorRule,
        prior: &PriorPriceState,
        new_min: Option<&PriceRecord>,
    ) -> Option<NewAlert> {
        let baseline = prior.min_price_cents?;
        let record = new_min?;
        if baseline <= 0 || record.price_cents <= baseline {
            return None;
        }

        let rise_pct = (record.price_cents - baseline) as f64 / baseline as f64 * 100.0;
        if rise_pct < rule.threshold_pct {
            return None;
        }

        Some(NewAlert {
            rule_id: rule.id,
            drug_id: rule.drug_id,
            kind: MonitorKind::PriceRise,
            message: format!(
                "lowest price rose {:.1}%: {} -> {}",
                rise_pct,
                format_yuan(baseline),
                format_yuan(record.price_cents)
            ),
            price_record_id: Some(record.id),
        })
    }

    fn check_new_supplier(
        &self,
        rule: &crate::domain::MonitorRule,
        prior: &PriorPriceState,
        new_records: &[PriceRecord],
    ) -> Option<NewAlert> {
        let newcomer = new_records.iter().find(|r| {
            let key = r
                .supplier_id
                .clone()
                .unwrap_or_else(|| r.supplier_name.clone());
            !prior.supplier_keys.contains(&key)
        })?;

        // A first crawl has no baseline to be "new" against.
        if prior.supplier_keys.is_empty() {
            return None;
        }

        Some(NewAlert {
            rule_id: rule.id,
            drug_id: rule.drug_id,
            kind: MonitorKind::NewSupplier,
            message: format!(
                "new supplier {} at {}",
                newcomer.supplier_name,
                format_yuan(newcomer.price_cents)
            ),
            price_record_id: Some(newcomer.id),
        })
    }
}

fn format_yuan(cents: i64) -> String {
    format!("{:.2}", cents as f64 / 100.0)
}
