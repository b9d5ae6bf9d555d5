//! Post-insert outlier annotation (C8).
//!
//! Runs after each appended batch, scoped to one drug. Annotations are
//! non-destructive: rows are flagged, never removed or repriced.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::domain::{OutlierFlag, PriceRecord, Result};

use super::repository::{OutlierUpdate, PriceRepository};

/// Sentinel prices some suppliers publish when a real price is unavailable,
/// in yuan.
const PLACEHOLDER_YUAN: &[i64] = &[9_999, 99_999, 999_999];

/// Tukey fences need at least this many non-placeholder observations.
const MIN_STATISTICAL_SAMPLE: usize = 4;

const TUKEY_K: f64 = 1.5;

pub struct OutlierAnnotator<P> {
    prices: Arc<P>,
    /// Per-drug logical locks: a concurrent append on the same drug must not
    /// race the annotation window.
    locks: Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl<P: PriceRepository> OutlierAnnotator<P> {
    pub fn new(prices: Arc<P>) -> Self {
        Self {
            prices,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn drug_lock(&self, drug_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(drug_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Re-annotate the drug's full price set.
    #[instrument(skip(self))]
    pub async fn annotate_drug(&self, drug_id: i64) -> Result<usize> {
        let lock = self.drug_lock(drug_id).await;
        let _guard = lock.lock().await;

        let records = self.prices.get_prices(drug_id, true).await?;
        let updates = compute_annotations(&records);

        if updates.is_empty() {
            return Ok(0);
        }
        let count = updates.len();
        self.prices.set_outlier_flags(&updates).await?;
        debug!(drug_id, updated = count, "outlier annotations written");
        Ok(count)
    }
}

/// Decide the flag for every record, returning only the rows whose stored
/// annotation must change.
pub fn compute_annotations(records: &[PriceRecord]) -> Vec<OutlierUpdate> {
    let mut desired: Vec<(i64, OutlierFlag, Option<String>)> = Vec::with_capacity(records.len());

    let mut regular_cents: Vec<i64> = Vec::new();
    for record in records {
        if is_placeholder(record.price_cents) {
            desired.push((
                record.id,
                OutlierFlag::Placeholder,
                Some("placeholder".to_string()),
            ));
        } else {
            regular_cents.push(record.price_cents);
        }
    }

    let fences = if regular_cents.len() >= MIN_STATISTICAL_SAMPLE {
        Some(tukey_fences(&mut regular_cents))
    } else {
        None
    };

    for record in records {
        if is_placeholder(record.price_cents) {
            continue;
        }
        let (flag, reason) = match fences {
            Some((low, high)) => {
                let price = record.price_cents as f64;
                if price < low {
                    (
                        OutlierFlag::Low,
                        Some(format!("low (<{:.2})", low / 100.0)),
                    )
                } else if price > high {
                    (
                        OutlierFlag::High,
                        Some(format!("high (>{:.2})", high / 100.0)),
                    )
                } else {
                    (OutlierFlag::Normal, None)
                }
            }
            None => (OutlierFlag::Normal, None),
        };
        desired.push((record.id, flag, reason));
    }

    let stored: HashMap<i64, (OutlierFlag, Option<&String>)> = records
        .iter()
        .map(|r| (r.id, (r.is_outlier, r.outlier_reason.as_ref())))
        .collect();

    desired
        .into_iter()
        .filter(|(id, flag, reason)| {
            stored
                .get(id)
                .map(|(stored_flag, stored_reason)| {
                    stored_flag != flag || stored_reason.map(|s| s.as_str()) != reason.as_deref()
                })
                .unwrap_or(true)
        })
        .map(|(price_record_id, flag, reason)| OutlierUpdate {
            price_record_id,
            flag,
            reason,
        })
        .collect()
}

fn is_placeholder(price_cents: i64) -> bool {
    price_cents % 100 == 0 && PLACEHOLDER_YUAN.contains(&(price_cents / 100))
}

/// Tukey fences over the sample: hinges are medians of the lower and upper
/// halves, fences at Q1 - 1.5*IQR and Q3 + 1.5*IQR. Returns (low, high) in
/// cents.
fn tukey_fences(cents: &mut [i64]) -> (f64, f64) {
    cents.sort_unstable();
    let n = cents.len();
    let half = n / 2;

    let q1 = median(&cents[..half]);
    let q3 = if n % 2 == 0 {
        median(&cents[half..])
    } else {
        median(&cents[half + 1..])
    };
    let iqr = q3 - q1;

    (q1 - TUKEY_K * iqr, q3 + TUKEY_K * iqr)
}

fn median(sorted: &[i64]) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) as f64 / 2.0
    } else {
        sorted[n / 2] as f64
    }
}
