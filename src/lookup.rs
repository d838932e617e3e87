//! Product lookup capability.
//!
//! Resolves an ingredient name to an optional store product. The
//! browser-driven price scraper is an external collaborator; the
//! bundled implementation builds grocery search links offline so the
//! shopping list stays useful without it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::PlanError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductMatch {
    pub name: String,
    #[serde(default)]
    pub price: Option<String>,
    pub link: String,
}

/// Black-box product lookup.
#[async_trait]
pub trait ProductLookup: Send + Sync {
    async fn lookup(&self, item: &str) -> Result<Option<ProductMatch>, PlanError>;
}

/// Always returns no match. Used when price lookup is disabled.
pub struct DisabledLookup;

#[async_trait]
impl ProductLookup for DisabledLookup {
    async fn lookup(&self, _item: &str) -> Result<Option<ProductMatch>, PlanError> {
        Ok(None)
    }
}

/// Offline lookup that renders a store search URL per ingredient.
pub struct SearchLinkLookup {
    base_url: String,
}

impl SearchLinkLookup {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }
}

impl Default for SearchLinkLookup {
    fn default() -> Self {
        Self::new("https://www.heb.com/search")
    }
}

#[async_trait]
impl ProductLookup for SearchLinkLookup {
    async fn lookup(&self, item: &str) -> Result<Option<ProductMatch>, PlanError> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| PlanError::ConfigError(format!("Invalid search base URL: {}", e)))?;
        url.query_pairs_mut().append_pair("q", item);
        Ok(Some(ProductMatch {
            name: item.to_string(),
            price: None,
            link: url.to_string(),
        }))
    }
}
