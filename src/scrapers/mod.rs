//! Marketplace scraper contract
//!
//! One implementation per marketplace. The orchestrator holds a list of
//! `Arc<dyn MarketplaceScraper>` and dispatches each target to the first
//! scraper whose `supports` accepts its URL, so adding a marketplace is a
//! registration, not an orchestrator change.

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{ListingCandidate, PartialAd, TargetSpec};

pub mod olx;
pub mod vinted;

pub use olx::OlxScraper;
pub use vinted::VintedScraper;

/// Asynchronous "already seen" predicate handed to scrapers during
/// pagination so they can stop early on known listings.
///
/// Implemented by the dedup ledger in production and by in-memory sets in
/// tests. Errors propagate: if the ledger cannot answer, the cycle must not
/// guess.
#[async_trait]
pub trait KnownUrls: Send + Sync {
    async fn is_known(&self, url: &str) -> Result<bool>;
}

/// One marketplace's scraping capability.
#[async_trait]
pub trait MarketplaceScraper: Send + Sync {
    /// Platform tag stamped onto every ad this scraper produces.
    fn name(&self) -> &str;

    /// Whether this scraper handles the given target URL (host allow-list).
    fn supports(&self, url: &str) -> bool;

    /// Walk the target's result pages and return candidate listings.
    ///
    /// Pagination stops at the last page, on a short page, when a page
    /// contains a known listing (results are recency-ordered, so everything
    /// after a known item was already seen), or at the `max_pages` ceiling.
    /// A page that fails to fetch ends the walk with whatever was collected.
    async fn collect_listings(
        &self,
        target: &TargetSpec,
        known: &dyn KnownUrls,
    ) -> Result<Vec<ListingCandidate>>;

    /// Fetch and extract the full field set for one listing URL.
    ///
    /// `None` when a required field is missing after every fallback rule;
    /// incomplete records are discarded, never forwarded.
    async fn hydrate(&self, url: &str) -> Result<Option<PartialAd>>;
}
