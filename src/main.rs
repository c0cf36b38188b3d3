use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use ad_radar::db::Database;
use ad_radar::notify::Notifier;
use ad_radar::orchestrator::CrawlOrchestrator;
use ad_radar::radar::AdRadar;
use ad_radar::scrapers::{OlxScraper, VintedScraper};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    info!("Starting Ad Radar");

    let db_url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:database/ads.db".to_string());
    let target_file = PathBuf::from(
        std::env::var("TARGET_URLS_PATH").unwrap_or_else(|_| "target_urls.txt".to_string()),
    );

    let database = Database::connect(&db_url).await?;

    let mut orchestrator = CrawlOrchestrator::new(database.clone());
    orchestrator.register_scraper(Arc::new(OlxScraper::new()?));
    orchestrator.register_scraper(Arc::new(VintedScraper::new()?));

    let radar = AdRadar::new(orchestrator, database, Notifier::from_env(), target_file);

    // Run once immediately
    if let Err(e) = radar.check_for_new_ads().await {
        error!("Error during initial check: {:#}", e);
    }

    // Then check every 5 minutes
    let sched = JobScheduler::new().await?;
    let job_radar = radar.clone();
    sched
        .add(Job::new_async("0 */5 * * * *", move |_uuid, _l| {
            let radar = job_radar.clone();
            Box::pin(async move {
                if let Err(e) = radar.check_for_new_ads().await {
                    error!("Error checking for new ads: {:#}", e);
                }
            })
        })?)
        .await?;

    info!("Scheduler started - checking every 5 minutes");
    sched.start().await?;

    // Keep the program running
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
    }
}
