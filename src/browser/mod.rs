//! Headless-browser acquisition.

pub mod harvester;

use serde::Deserialize;

pub use harvester::{BrowserHarvester, HarvesterConfig, OfferHarvester};

/// Offer row as embedded by the search page for its own renderer.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EmbeddedOffer {
    pub name: String,
    #[serde(default)]
    pub spec: Option<String>,
    #[serde(default)]
    pub factory: Option<String>,
    pub price: f64,
    pub pname: String,
    #[serde(default)]
    pub pid: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, alias = "approvalNo")]
    pub approval_number: Option<String>,
}
