//! Headless-browser harvesting for data no endpoint returns: the full
//! per-supplier offer list rendered on the search page, and detail-page
//! fields such as the approval number.
//!
//! Browser work is blocking, so it runs on the blocking thread pool behind a
//! semaphore that strictly bounds concurrent browser sessions. Each session
//! serves a single keyword and is disposed afterwards; dropping the
//! `Browser` tears down the underlying process on every exit path.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use headless_chrome::{Browser, LaunchOptions};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};
use url::Url;

use crate::domain::{
    CancelToken, DetailSignals, Offer, OfferSource, PharmaOpsError, Result,
};
use crate::engine::classifier::classify_approval_number;

/// DOM considered settled after no content change for this long.
const SETTLE_WINDOW: Duration = Duration::from_millis(500);
const SETTLE_POLL: Duration = Duration::from_millis(250);

/// Offer payload the search page embeds for its own renderer.
static EMBEDDED_OFFERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)window\.__OFFER_DATA__\s*=\s*(\[.*?\])\s*;").unwrap()
});

/// Fallback: offer cards carry their fields as data attributes.
static OFFER_CARD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?s)<[^>]+class="[^"]*supplier-offer[^"]*"[^>]*data-name="([^"]*)"[^>]*data-spec="([^"]*)"[^>]*data-factory="([^"]*)"[^>]*data-price="([^"]*)"[^>]*data-pname="([^"]*)"(?:[^>]*data-pid="([^"]*)")?"#,
    )
    .unwrap()
});

/// JSON fields that look like an approval number, whatever the exact schema.
static APPROVAL_JSON_FIELD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""(?:approval(?:_?n(?:o|um(?:ber)?))?|approvalNo|批准文号)"\s*:\s*"([^"]+)""#)
        .unwrap()
});

/// Known regulator number formats, scanned straight out of rendered HTML.
static APPROVAL_IN_TEXT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"国药准字[HZSJB]\d{8}|国械注[准进][0-9]{0,15}|卫妆准字[0-9A-Za-z第号]{0,20}|国妆特字[0-9A-Za-z第号]{0,20}|国食健字[0-9A-Za-z第号]{0,20}|卫食健字[0-9A-Za-z第号]{0,20}",
    )
    .unwrap()
});

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    pub base_url: Url,
    /// Strict upper bound on concurrent browser sessions.
    pub max_sessions: usize,
    pub page_timeout: Duration,
    pub action_timeout: Duration,
}

impl HarvesterConfig {
    pub fn new(base_url: Url, max_sessions: usize) -> Self {
        Self {
            base_url,
            max_sessions: max_sessions.max(1),
            page_timeout: Duration::from_secs(60),
            action_timeout: Duration::from_secs(15),
        }
    }
}

/// Browser-side acquisition (C3). Trait seam so the orchestrator and
/// scheduler can be exercised with a stub.
#[async_trait]
pub trait OfferHarvester: Send + Sync {
    /// Harvest the rendered per-supplier offer list for a keyword.
    ///
    /// Failures are recoverable: the caller decides whether endpoint-only
    /// data is acceptable.
    async fn harvest_offers(&self, keyword: &str, cancel: &CancelToken) -> Result<Vec<Offer>>;

    /// Best-effort detail-page signals for one product.
    async fn extract_detail(&self, drug_identifier: &str) -> Result<DetailSignals>;
}

pub struct BrowserHarvester {
    config: HarvesterConfig,
    sessions: Arc<Semaphore>,
}

impl BrowserHarvester {
    pub fn new(config: HarvesterConfig) -> Self {
        let sessions = Arc::new(Semaphore::new(config.max_sessions));
        Self { config, sessions }
    }
}

#[async_trait]
impl OfferHarvester for BrowserHarvester {
    async fn harvest_offers(&self, keyword: &str, cancel: &CancelToken) -> Result<Vec<Offer>> {
        cancel.check()?;

        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|_| PharmaOpsError::browser("browser pool closed"))?;
        cancel.check()?;

        let mut search_url = self
            .config
            .base_url
            .join("/search")
            .map_err(|e| PharmaOpsError::browser(format!("bad search URL: {e}")))?;
        search_url
            .query_pairs_mut()
            .append_pair("keyword", keyword);

        info!(keyword = %keyword, "starting browser harvest");

        let config = self.config.clone();
        let keyword_owned = keyword.to_string();
        let cancel_inner = cancel.clone();
        let task = tokio::task::spawn_blocking(move || {
            harvest_blocking(&config, search_url, &keyword_owned, &cancel_inner)
        });

        // A stuck session must not hold a pool slot past the page budget.
        let offers = match tokio::time::timeout(
            self.config.page_timeout + Duration::from_secs(5),
            task,
        )
        .await
        {
            Err(_) => {
                return Err(PharmaOpsError::browser("browser session timed out"));
            }
            Ok(Err(join_err)) => {
                return Err(PharmaOpsError::browser(format!(
                    "browser session panicked: {join_err}"
                )));
            }
            Ok(Ok(result)) => result?,
        };

        info!(keyword = %keyword, offers = offers.len(), "browser harvest complete");
        Ok(offers)
    }

    async fn extract_detail(&self, drug_identifier: &str) -> Result<DetailSignals> {
        let _permit = self
            .sessions
            .acquire()
            .await
            .map_err(|_| PharmaOpsError::browser("browser pool closed"))?;

        let detail_url = self
            .config
            .base_url
            .join(&format!("/product/{drug_identifier}"))
            .map_err(|e| PharmaOpsError::browser(format!("bad detail URL: {e}")))?;

        let config = self.config.clone();
        let task = tokio::task::spawn_blocking(move || detail_blocking(&config, detail_url));

        match tokio::time::timeout(self.config.page_timeout + Duration::from_secs(5), task).await {
            Err(_) => Err(PharmaOpsError::browser("detail session timed out")),
            Ok(Err(join_err)) => Err(PharmaOpsError::browser(format!(
                "detail session panicked: {join_err}"
            ))),
            Ok(Ok(result)) => result,
        }
    }
}

fn launch_browser(config: &HarvesterConfig) -> Result<Browser> {
    let options = LaunchOptions::default_builder()
        .headless(true)
        .idle_browser_timeout(config.page_timeout)
        .build()
        .map_err(|e| PharmaOpsError::browser(format!("bad launch options: {e}")))?;

    Browser::new(options).map_err(|e| PharmaOpsError::browser(format!("launch failed: {e}")))
}

fn harvest_blocking(
    config: &HarvesterConfig,
    search_url: Url,
    keyword: &str,
    cancel: &CancelToken,
) -> Result<Vec<Offer>> {
    let browser = launch_browser(config)?;
    let tab = browser
        .new_tab()
        .map_err(|e| PharmaOpsError::browser(format!("tab open failed: {e}")))?;
    tab.set_default_timeout(config.action_timeout);

    cancel.check()?;
    tab.navigate_to(search_url.as_str())
        .and_then(|t| t.wait_until_navigated())
        .map_err(|e| PharmaOpsError::browser(format!("navigation failed: {e}")))?;

    // The supplier-card region renders asynchronously.
    if tab.wait_for_element(".supplier-offer").is_err() {
        warn!(keyword = %keyword, "no supplier cards rendered");
        return Ok(Vec::new());
    }

    let html = wait_for_settle(&tab, config.page_timeout, cancel)?;
    Ok(parse_offers_from_html(&html, keyword))
}

/// Poll page content until it is stable for the settle window.
fn wait_for_settle(
    tab: &headless_chrome::Tab,
    budget: Duration,
    cancel: &CancelToken,
) -> Result<String> {
    let started = Instant::now();
    let mut last = tab
        .get_content()
        .map_err(|e| PharmaOpsError::browser(format!("content read failed: {e}")))?;
    let mut stable_since = Instant::now();

    loop {
        cancel.check()?;
        if started.elapsed() > budget {
            // Layout never settled; use the last snapshot.
            return Ok(last);
        }
        std::thread::sleep(SETTLE_POLL);

        let current = tab
            .get_content()
            .map_err(|e| PharmaOpsError::browser(format!("content read failed: {e}")))?;
        if current == last {
            if stable_since.elapsed() >= SETTLE_WINDOW {
                return Ok(current);
            }
        } else {
            last = current;
            stable_since = Instant::now();
        }
    }
}

fn detail_blocking(config: &HarvesterConfig, detail_url: Url) -> Result<DetailSignals> {
    let browser = launch_browser(config)?;
    let tab = browser
        .new_tab()
        .map_err(|e| PharmaOpsError::browser(format!("tab open failed: {e}")))?;
    tab.set_default_timeout(config.action_timeout);

    tab.navigate_to(detail_url.as_str())
        .and_then(|t| t.wait_until_navigated())
        .map_err(|e| PharmaOpsError::browser(format!("navigation failed: {e}")))?;

    let html = wait_for_settle(&tab, config.page_timeout, &CancelToken::new())?;
    Ok(extract_detail_signals(&html))
}

/// Pull offers out of the rendered search page: the embedded JSON payload
/// when present, data-attribute cards otherwise.
pub fn parse_offers_from_html(html: &str, keyword: &str) -> Vec<Offer> {
    let now = Utc::now();
    let mut offers = Vec::new();

    if let Some(captures) = EMBEDDED_OFFERS.captures(html) {
        match serde_json::from_str::<Vec<super::EmbeddedOffer>>(&captures[1]) {
            Ok(rows) => {
                for row in rows {
                    offers.push(Offer {
                        name: row.name,
                        specification: row.spec.unwrap_or_default(),
                        manufacturer: row.factory.unwrap_or_default(),
                        price_cents: crate::upstream::envelope::price_to_cents(row.price),
                        supplier_name: row.pname,
                        supplier_id: row.pid,
                        source_url: row.url,
                        approval_number: row.approval_number,
                        source: OfferSource::Browser,
                        crawled_at: now,
                    });
                }
            }
            Err(e) => debug!("embedded offer payload unparseable: {}", e),
        }
    }

    if offers.is_empty() {
        for caps in OFFER_CARD.captures_iter(html) {
            let price: f64 = match caps[4].parse() {
                Ok(p) => p,
                Err(_) => continue,
            };
            offers.push(Offer {
                name: caps[1].to_string(),
                specification: caps[2].to_string(),
                manufacturer: caps[3].to_string(),
                price_cents: crate::upstream::envelope::price_to_cents(price),
                supplier_name: caps[5].to_string(),
                supplier_id: caps.get(6).map(|m| m.as_str().to_string()).filter(|s| !s.is_empty()),
                source_url: None,
                approval_number: None,
                source: OfferSource::Browser,
                crawled_at: now,
            });
        }
    }

    offers
        .into_iter()
        .filter(|o| crate::engine::matches_keyword(&o.name, keyword))
        .collect()
}

/// Two extraction strategies in order: JSON fields with approval-like names
/// anywhere in the document, then known number formats in rendered text.
pub fn extract_detail_signals(html: &str) -> DetailSignals {
    let approval_number = APPROVAL_JSON_FIELD
        .captures(html)
        .map(|caps| caps[1].to_string())
        .or_else(|| APPROVAL_IN_TEXT.find(html).map(|m| m.as_str().to_string()));

    let category_hint = approval_number
        .as_deref()
        .and_then(classify_approval_number)
        .map(|c| c.as_str().to_string());

    DetailSignals {
        approval_number,
        category_hint,
    }
}
