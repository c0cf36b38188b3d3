//! Crawl orchestration
//!
//! Turns the configured targets into one cycle's batch of new, fully
//! hydrated ads: resolve a scraper per target, run discovery and hydration
//! under bounded concurrency, dedup by URL, and normalize. Per-target and
//! per-candidate failures are isolated here — only dedup-ledger failures
//! propagate, because without the ledger "new vs seen" cannot be decided.
//!
//! The orchestrator never writes to the ledger; committing URLs is the
//! caller's decision, after notification, so a delivery failure can still be
//! decided against marking a listing as seen.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::models::{Ad, ListingCandidate, TargetSpec};
use crate::scrapers::MarketplaceScraper;

const DEFAULT_LISTING_WORKERS: usize = 4;
const DEFAULT_DETAIL_WORKERS: usize = 10;

pub struct CrawlOrchestrator {
    scrapers: Vec<Arc<dyn MarketplaceScraper>>,
    database: Database,
    listing_workers: usize,
    detail_workers: usize,
}

impl CrawlOrchestrator {
    pub fn new(database: Database) -> Self {
        Self {
            scrapers: Vec::new(),
            database,
            listing_workers: DEFAULT_LISTING_WORKERS,
            detail_workers: DEFAULT_DETAIL_WORKERS,
        }
    }

    /// Register an additional marketplace scraper at runtime.
    pub fn register_scraper(&mut self, scraper: Arc<dyn MarketplaceScraper>) {
        self.scrapers.push(scraper);
    }

    pub fn with_workers(mut self, listing_workers: usize, detail_workers: usize) -> Self {
        self.listing_workers = listing_workers.max(1);
        self.detail_workers = detail_workers.max(1);
        self
    }

    /// Run one discovery + hydration cycle over the given targets and return
    /// the batch of new ads. The caller notifies and then commits the URLs.
    pub async fn collect_new_ads(&self, targets: &[TargetSpec]) -> Result<Vec<Ad>> {
        if targets.is_empty() {
            info!("No target URLs configured; nothing to scrape.");
            return Ok(Vec::new());
        }

        let jobs = self.gather_new_listing_jobs(targets).await?;
        if jobs.is_empty() {
            info!("No new listings detected in this cycle.");
            return Ok(Vec::new());
        }

        info!("Fetching details for {} new listings.", jobs.len());
        let ads = self.fetch_ad_details(jobs).await;
        info!("Collected detailed data for {} listings.", ads.len());
        Ok(ads)
    }

    fn resolve_scraper(&self, target_url: &str) -> Option<Arc<dyn MarketplaceScraper>> {
        self.scrapers
            .iter()
            .find(|scraper| scraper.supports(target_url))
            .cloned()
    }

    /// Concurrent listing discovery over all targets, bounded by the listing
    /// worker count. Output is deduplicated by URL across targets (first
    /// occurrence wins) and filtered once more against the ledger as defense
    /// in depth against writes racing discovery.
    async fn gather_new_listing_jobs(
        &self,
        targets: &[TargetSpec],
    ) -> Result<Vec<(Arc<dyn MarketplaceScraper>, ListingCandidate)>> {
        let width = self.listing_workers.min(targets.len()).max(1);

        let per_target_futures: Vec<_> = targets
            .iter()
            .map(|spec| self.scrape_target(spec).boxed())
            .collect();
        let per_target = stream::iter(per_target_futures)
            .buffer_unordered(width)
            .collect::<Vec<_>>()
            .await;

        let mut jobs = Vec::new();
        let mut seen_urls: HashSet<String> = HashSet::new();
        for outcome in per_target {
            let Some((scraper, candidates)) = outcome? else {
                continue;
            };
            for candidate in candidates {
                if !seen_urls.insert(candidate.url.clone()) {
                    debug!(
                        "[{}] Duplicate candidate ignored: {}",
                        scraper.name(),
                        candidate.url
                    );
                    continue;
                }
                jobs.push((Arc::clone(&scraper), candidate));
            }
        }
        debug!("Total unique listing jobs after dedupe: {}", jobs.len());
        Ok(jobs)
    }

    /// Discovery for one target. Scraper errors are logged and reported as
    /// "no candidates"; ledger errors propagate.
    async fn scrape_target(
        &self,
        spec: &TargetSpec,
    ) -> Result<Option<(Arc<dyn MarketplaceScraper>, Vec<ListingCandidate>)>> {
        let Some(scraper) = self.resolve_scraper(&spec.url) else {
            warn!("No scraper available for URL: {}", spec.url);
            return Ok(None);
        };

        info!("[{}] Collecting listings for {}", scraper.name(), spec.url);
        let candidates = match scraper.collect_listings(spec, &self.database).await {
            Ok(candidates) => candidates,
            Err(e) => {
                error!("Error scraping {}: {:#}", spec.url, e);
                return Ok(None);
            }
        };

        let mut fresh = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if candidate.url.is_empty() {
                continue;
            }
            if self.database.url_exists(&candidate.url).await? {
                continue;
            }
            fresh.push(candidate);
        }
        info!(
            "[{}] {} new listings detected for {}",
            scraper.name(),
            fresh.len(),
            spec.url
        );
        Ok(Some((scraper, fresh)))
    }

    /// Hydrate pending candidates under bounded concurrency and normalize
    /// the whole batch. Pre-hydrated candidates skip the fetch entirely.
    async fn fetch_ad_details(
        &self,
        jobs: Vec<(Arc<dyn MarketplaceScraper>, ListingCandidate)>,
    ) -> Vec<Ad> {
        let mut ads = Vec::new();
        let mut pending = Vec::new();

        for (scraper, candidate) in jobs {
            match candidate.data {
                Some(data) => {
                    if let Some(ad) = data.into_ad(scraper.name(), &candidate.url) {
                        ads.push(ad);
                    }
                }
                None => pending.push((scraper, candidate.url)),
            }
        }

        if pending.is_empty() {
            return ads;
        }

        let width = self.detail_workers.min(pending.len()).max(1);
        let hydration_futures: Vec<_> = pending
            .into_iter()
            .map(|(scraper, url)| {
                async move {
                    match scraper.hydrate(&url).await {
                        Ok(Some(data)) => data.into_ad(scraper.name(), &url),
                        Ok(None) => None,
                        Err(e) => {
                            error!("[{}] Failed to fetch {}: {:#}", scraper.name(), url, e);
                            None
                        }
                    }
                }
                .boxed()
            })
            .collect();
        let hydrated = stream::iter(hydration_futures)
            .buffer_unordered(width)
            .collect::<Vec<_>>()
            .await;

        ads.extend(hydrated.into_iter().flatten());
        ads
    }
}
