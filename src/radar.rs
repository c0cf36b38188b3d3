//! One monitoring cycle: load targets, collect new ads, notify, commit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config;
use crate::db::Database;
use crate::notify::Notifier;
use crate::orchestrator::CrawlOrchestrator;

pub struct AdRadar {
    orchestrator: Arc<CrawlOrchestrator>,
    database: Database,
    notifier: Notifier,
    target_file: PathBuf,
}

impl AdRadar {
    pub fn new(
        orchestrator: CrawlOrchestrator,
        database: Database,
        notifier: Notifier,
        target_file: PathBuf,
    ) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            database,
            notifier,
            target_file,
        }
    }

    /// Run one full cycle.
    ///
    /// URLs are committed to the ledger only after their notification was
    /// delivered (or delivery is disabled); a rejected delivery leaves the
    /// listing uncommitted so the next cycle retries it.
    pub async fn check_for_new_ads(&self) -> Result<()> {
        let targets = config::load_targets(&self.target_file)?;
        let ads = self.orchestrator.collect_new_ads(&targets).await?;

        if ads.is_empty() {
            info!("No new ads found");
            return Ok(());
        }

        info!("Found {} new ads", ads.len());
        for ad in &ads {
            info!("New ad found: {} - {} ({})", ad.title, ad.price, ad.platform);

            let delivered = match self.notifier.send_notification(ad).await {
                Ok(delivered) => delivered,
                Err(e) => {
                    warn!("Notification error for {}: {:#}", ad.url, e);
                    false
                }
            };
            if delivered {
                self.database.add_url(&ad.url).await?;
            } else {
                warn!("Leaving {} uncommitted; it will be retried next cycle.", ad.url);
            }
        }

        Ok(())
    }
}

impl Clone for AdRadar {
    fn clone(&self) -> Self {
        Self {
            orchestrator: Arc::clone(&self.orchestrator),
            database: self.database.clone(),
            notifier: self.notifier.clone(),
            target_file: self.target_file.clone(),
        }
    }
}
