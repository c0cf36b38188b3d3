//! Cycle-level behavior: scraper dispatch, failure isolation, dedup and the
//! discover/commit split.

use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tempfile::TempDir;

use ad_radar::db::Database;
use ad_radar::models::{ListingCandidate, PartialAd, TargetSpec};
use ad_radar::notify::Notifier;
use ad_radar::orchestrator::CrawlOrchestrator;
use ad_radar::radar::AdRadar;
use ad_radar::scrapers::{KnownUrls, MarketplaceScraper};

async fn temp_db() -> (Database, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let db_url = format!("sqlite:{}", dir.path().join("ads.db").display());
    (Database::connect(&db_url).await.unwrap(), dir)
}

fn complete_partial(title: &str, url: &str) -> PartialAd {
    PartialAd {
        title: Some(title.to_string()),
        price: Some("10 EUR".to_string()),
        description: Some(format!("{title}, lightly used")),
        url: Some(url.to_string()),
        ..PartialAd::default()
    }
}

/// Scraper returning a fixed candidate list for any URL containing its
/// marker; hydration serves from the same fixtures.
struct StubScraper {
    marker: String,
    candidates: Vec<ListingCandidate>,
}

#[async_trait]
impl MarketplaceScraper for StubScraper {
    fn name(&self) -> &str {
        "stub"
    }

    fn supports(&self, url: &str) -> bool {
        url.contains(self.marker.as_str())
    }

    async fn collect_listings(
        &self,
        _target: &TargetSpec,
        known: &dyn KnownUrls,
    ) -> Result<Vec<ListingCandidate>> {
        let mut fresh = Vec::new();
        for candidate in &self.candidates {
            if !known.is_known(&candidate.url).await? {
                fresh.push(candidate.clone());
            }
        }
        Ok(fresh)
    }

    async fn hydrate(&self, url: &str) -> Result<Option<PartialAd>> {
        Ok(Some(complete_partial("Hydrated item", url)))
    }
}

/// Scraper that fails every discovery attempt.
struct BrokenScraper {
    marker: String,
}

#[async_trait]
impl MarketplaceScraper for BrokenScraper {
    fn name(&self) -> &str {
        "broken"
    }

    fn supports(&self, url: &str) -> bool {
        url.contains(self.marker.as_str())
    }

    async fn collect_listings(
        &self,
        _target: &TargetSpec,
        _known: &dyn KnownUrls,
    ) -> Result<Vec<ListingCandidate>> {
        bail!("connection reset by peer")
    }

    async fn hydrate(&self, _url: &str) -> Result<Option<PartialAd>> {
        bail!("connection reset by peer")
    }
}

#[tokio::test]
async fn one_failing_target_does_not_poison_the_cycle() {
    let (db, _dir) = temp_db().await;

    let mut orchestrator = CrawlOrchestrator::new(db).with_workers(4, 4);
    orchestrator.register_scraper(Arc::new(BrokenScraper { marker: "flaky-market".to_string() }));
    for n in 1..=4 {
        orchestrator.register_scraper(Arc::new(StubScraper {
            marker: format!("market-{n}"),
            candidates: vec![ListingCandidate::with_data(
                format!("https://market-{n}.example/item/1"),
                complete_partial("Item", &format!("https://market-{n}.example/item/1")),
            )],
        }));
    }

    let targets: Vec<TargetSpec> = (1..=4)
        .map(|n| TargetSpec::new(format!("https://market-{n}.example/search")))
        .chain(std::iter::once(TargetSpec::new(
            "https://flaky-market.example/search",
        )))
        .collect();

    let ads = orchestrator.collect_new_ads(&targets).await.unwrap();
    assert_eq!(ads.len(), 4);
}

#[tokio::test]
async fn seen_urls_never_resurface() {
    let (db, _dir) = temp_db().await;
    let seen = "https://market-a.example/item/old";
    let fresh = "https://market-a.example/item/new";
    db.add_url(seen).await.unwrap();

    let mut orchestrator = CrawlOrchestrator::new(db);
    orchestrator.register_scraper(Arc::new(StubScraper {
        marker: "market-a".to_string(),
        candidates: vec![
            ListingCandidate::with_data(seen, complete_partial("Old", seen)),
            ListingCandidate::with_data(fresh, complete_partial("New", fresh)),
        ],
    }));

    let targets = vec![TargetSpec::new("https://market-a.example/search")];
    let ads = orchestrator.collect_new_ads(&targets).await.unwrap();

    assert_eq!(ads.len(), 1);
    assert_eq!(ads[0].url, fresh);
}

#[tokio::test]
async fn cross_target_duplicates_collapse_to_one_ad() {
    let (db, _dir) = temp_db().await;
    let shared = "https://market-a.example/item/shared";

    let mut orchestrator = CrawlOrchestrator::new(db);
    orchestrator.register_scraper(Arc::new(StubScraper {
        marker: "market-a".to_string(),
        candidates: vec![ListingCandidate::with_data(
            shared,
            complete_partial("Shared", shared),
        )],
    }));

    // Two targets resolved to the same scraper, discovering the same URL.
    let targets = vec![
        TargetSpec::new("https://market-a.example/search?q=one"),
        TargetSpec::new("https://market-a.example/search?q=two"),
    ];
    let ads = orchestrator.collect_new_ads(&targets).await.unwrap();
    assert_eq!(ads.len(), 1);
}

#[tokio::test]
async fn unsupported_targets_are_skipped_not_fatal() {
    let (db, _dir) = temp_db().await;
    let orchestrator = CrawlOrchestrator::new(db);

    let targets = vec![TargetSpec::new("https://unknown-market.example/search")];
    let ads = orchestrator.collect_new_ads(&targets).await.unwrap();
    assert!(ads.is_empty());
}

#[tokio::test]
async fn bare_candidates_are_hydrated_and_tagged() {
    let (db, _dir) = temp_db().await;
    let url = "https://market-a.example/item/77";

    let mut orchestrator = CrawlOrchestrator::new(db);
    orchestrator.register_scraper(Arc::new(StubScraper {
        marker: "market-a".to_string(),
        candidates: vec![ListingCandidate::bare(url)],
    }));

    let targets = vec![TargetSpec::new("https://market-a.example/search")];
    let ads = orchestrator.collect_new_ads(&targets).await.unwrap();

    assert_eq!(ads.len(), 1);
    assert_eq!(ads[0].platform, "stub");
    assert_eq!(ads[0].url, url);
    assert_eq!(ads[0].title, "Hydrated item");
}

#[tokio::test]
async fn radar_cycle_commits_urls_and_second_cycle_is_quiet() {
    let (db, _dir) = temp_db().await;
    let url = "https://market-a.example/item/1";

    let mut orchestrator = CrawlOrchestrator::new(db.clone());
    orchestrator.register_scraper(Arc::new(StubScraper {
        marker: "market-a".to_string(),
        candidates: vec![ListingCandidate::with_data(
            url,
            complete_partial("Item", url),
        )],
    }));

    let target_dir = tempfile::tempdir().unwrap();
    let target_file = target_dir.path().join("target_urls.txt");
    let mut file = std::fs::File::create(&target_file).unwrap();
    writeln!(file, "https://market-a.example/search").unwrap();

    // No DISCORD_WEBHOOK_URL in the test environment: the notifier is
    // disabled and counts as delivered, so URLs get committed.
    let radar = AdRadar::new(orchestrator, db.clone(), Notifier::from_env(), target_file);

    radar.check_for_new_ads().await.unwrap();
    assert!(db.url_exists(url).await.unwrap());

    // The stub still serves the same candidate, but it is now known.
    radar.check_for_new_ads().await.unwrap();
    assert!(db.url_exists(url).await.unwrap());
}
