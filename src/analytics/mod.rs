//! Read-only analytics over the stored data model (C10): search, price
//! comparison, history and procurement recommendations.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{Category, Drug, PharmaOpsError, PriceRecord, Result};
use crate::storage::{DrugRepository, PriceRepository, SqliteStore};

/// One supplier's latest price inside a comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierPrice {
    pub supplier_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supplier_id: Option<String>,
    pub price: Decimal,
    pub crawled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonView {
    pub drug: Drug,
    /// Ascending by price; ties broken by most recent observation.
    pub suppliers: Vec<SupplierPrice>,
    pub lowest: Decimal,
    pub highest: Decimal,
    /// (highest - lowest) / lowest * 100, two decimals.
    pub diff_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricePoint {
    pub price: Decimal,
    pub supplier_name: String,
    pub crawled_at: DateTime<Utc>,
    pub is_outlier: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allocation {
    pub supplier_name: String,
    pub unit_price: Decimal,
    pub quantity: u64,
    pub subtotal: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationView {
    pub drug_id: i64,
    pub requested_quantity: u64,
    pub fulfilled_quantity: u64,
    pub allocations: Vec<Allocation>,
    pub total_cost: Decimal,
    pub median_price: Decimal,
    /// Spend avoided versus buying everything at the median supplier price.
    pub estimated_savings: Decimal,
}

pub struct AnalyticsService {
    store: Arc<SqliteStore>,
}

impl AnalyticsService {
    pub fn new(store: Arc<SqliteStore>) -> Self {
        Self { store }
    }

    pub async fn search_drugs(&self, query: &str, category: Option<Category>) -> Result<Vec<Drug>> {
        if query.trim().is_empty() {
            return Err(PharmaOpsError::validation("search query must not be empty"));
        }
        self.store.search_drugs(query, category).await
    }

    /// Latest price per supplier, cheapest first.
    pub async fn compare_drug(&self, drug_id: i64, include_outliers: bool) -> Result<ComparisonView> {
        let drug = self
            .store
            .get_drug(drug_id)
            .await?
            .ok_or(PharmaOpsError::DrugNotFound(drug_id))?;

        let records = self.store.get_prices(drug_id, include_outliers).await?;
        let latest = latest_per_supplier(&records);

        if latest.is_empty() {
            return Ok(ComparisonView {
                drug,
                suppliers: Vec::new(),
                lowest: Decimal::ZERO,
                highest: Decimal::ZERO,
                diff_pct: Decimal::ZERO,
            });
        }

        let mut suppliers: Vec<SupplierPrice> = latest
            .into_iter()
            .map(|r| SupplierPrice {
                supplier_name: r.supplier_name.clone(),
                supplier_id: r.supplier_id.clone(),
                price: r.price(),
                crawled_at: r.crawled_at,
            })
            .collect();

        suppliers.sort_by(|a, b| {
            a.price
                .cmp(&b.price)
                .then_with(|| b.crawled_at.cmp(&a.crawled_at))
        });

        let lowest = suppliers.first().map(|s| s.price).unwrap_or(Decimal::ZERO);
        let highest = suppliers.last().map(|s| s.price).unwrap_or(Decimal::ZERO);
        let diff_pct = if lowest > Decimal::ZERO {
            ((highest - lowest) / lowest * Decimal::new(100, 0)).round_dp(2)
        } else {
            Decimal::ZERO
        };

        Ok(ComparisonView {
            drug,
            suppliers,
            lowest,
            highest,
            diff_pct,
        })
    }

    /// Chronological price history over a trailing window, honoring the
    /// outlier filter.
    pub async fn price_history(
        &self,
        drug_id: i64,
        days: i64,
        include_outliers: bool,
    ) -> Result<Vec<PricePoint>> {
        if self.store.get_drug(drug_id).await?.is_none() {
            return Err(PharmaOpsError::DrugNotFound(drug_id));
        }

        let cutoff = Utc::now() - Duration::days(days.max(0));
        let records = self.store.get_prices(drug_id, include_outliers).await?;

        Ok(records
            .into_iter()
            .filter(|r| r.crawled_at >= cutoff)
            .map(|r| PricePoint {
                price: r.price(),
                supplier_name: r.supplier_name,
                crawled_at: r.crawled_at,
                is_outlier: r.is_outlier.as_i64(),
            })
            .collect())
    }

    /// Greedy allocation against the ascending price list, bounded by the
    /// requested quantity and an optional budget.
    pub async fn procurement_recommendation(
        &self,
        drug_id: i64,
        quantity: u64,
        budget: Option<Decimal>,
    ) -> Result<RecommendationView> {
        if quantity == 0 {
            return Err(PharmaOpsError::validation("quantity must be at least 1"));
        }

        let comparison = self.compare_drug(drug_id, false).await?;
        let suppliers = &comparison.suppliers;

        if suppliers.is_empty() {
            return Ok(RecommendationView {
                drug_id,
                requested_quantity: quantity,
                fulfilled_quantity: 0,
                allocations: Vec::new(),
                total_cost: Decimal::ZERO,
                median_price: Decimal::ZERO,
                estimated_savings: Decimal::ZERO,
            });
        }

        let median_price = median_decimal(suppliers.iter().map(|s| s.price));

        let mut remaining = quantity;
        let mut remaining_budget = budget;
        let mut allocations = Vec::new();
        let mut total_cost = Decimal::ZERO;

        for supplier in suppliers {
            if remaining == 0 {
                break;
            }
            let affordable = match remaining_budget {
                Some(budget) if supplier.price > Decimal::ZERO => {
                    (budget / supplier.price).trunc().to_u64().unwrap_or(0)
                }
                Some(_) => 0,
                None => remaining,
            };
            let take = remaining.min(affordable);
            if take == 0 {
                // Every later supplier is at least as expensive.
                break;
            }

            let subtotal = supplier.price * Decimal::from(take);
            total_cost += subtotal;
            if let Some(budget) = remaining_budget.as_mut() {
                *budget -= subtotal;
            }
            remaining -= take;

            allocations.push(Allocation {
                supplier_name: supplier.supplier_name.clone(),
                unit_price: supplier.price,
                quantity: take,
                subtotal,
            });
        }

        let fulfilled = quantity - remaining;
        let estimated_savings =
            (median_price * Decimal::from(fulfilled) - total_cost).max(Decimal::ZERO);

        Ok(RecommendationView {
            drug_id,
            requested_quantity: quantity,
            fulfilled_quantity: fulfilled,
            allocations,
            total_cost,
            median_price,
            estimated_savings,
        })
    }

    pub async fn recent_alerts(&self, days: i64) -> Result<Vec<crate::domain::Alert>> {
        use crate::storage::MonitorRepository;
        self.store.recent_alerts(days).await
    }
}

/// Latest observation per supplier key; ties on `crawled_at` go to the later
/// row id.
fn latest_per_supplier(records: &[PriceRecord]) -> Vec<&PriceRecord> {
    let mut latest: HashMap<&str, &PriceRecord> = HashMap::new();
    for record in records {
        let key: &str = record
            .supplier_id
            .as_deref()
            .unwrap_or(&record.supplier_name);
        match latest.get(key) {
            Some(existing)
                if (existing.crawled_at, existing.id) >= (record.crawled_at, record.id) => {}
            _ => {
                latest.insert(key, record);
            }
        }
    }
    latest.into_values().collect()
}

fn median_decimal(prices: impl Iterator<Item = Decimal>) -> Decimal {
    let mut sorted: Vec<Decimal> = prices.collect();
    sorted.sort();
    let n = sorted.len();
    if n == 0 {
        return Decimal::ZERO;
    }
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / Decimal::new(2, 0)
    } else {
        sorted[n / 2]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    use crate::domain::OutlierFlag;

    fn record(id: i64, supplier: &str, cents: i64, minutes_ago: i64) -> PriceRecord {
        PriceRecord {
            id,
            drug_id: 1,
            price_cents: cents,
            supplier_name: supplier.to_string(),
            supplier_id: None,
            source_url: None,
            crawled_at: Utc::now() - Duration::minutes(minutes_ago),
            is_outlier: OutlierFlag::Normal,
            outlier_reason: None,
        }
    }

    #[test]
    fn test_latest_per_supplier_picks_most_recent() {
        let records = vec![
            record(1, "甲商", 10_000, 60),
            record(2, "甲商", 9_000, 5),
            record(3, "乙商", 11_000, 10),
        ];
        let latest = latest_per_supplier(&records);
        assert_eq!(latest.len(), 2);
        let jia = latest
            .iter()
            .find(|r| r.supplier_name == "甲商")
            .unwrap();
        assert_eq!(jia.price_cents, 9_000);
    }

    #[test]
    fn test_latest_per_supplier_tie_takes_later_row() {
        let now = Utc::now();
        let mut a = record(1, "甲商", 10_000, 0);
        let mut b = record(2, "甲商", 9_500, 0);
        a.crawled_at = now;
        b.crawled_at = now;

        let records = vec![a, b];
        let latest = latest_per_supplier(&records);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].id, 2);
    }

    #[test]
    fn test_median_decimal() {
        assert_eq!(
            median_decimal([dec!(1), dec!(3), dec!(2)].into_iter()),
            dec!(2)
        );
        assert_eq!(
            median_decimal([dec!(1), dec!(2), dec!(3), dec!(4)].into_iter()),
            dec!(2.5)
        );
        assert_eq!(median_decimal(std::iter::empty()), Decimal::ZERO);
    }
}
