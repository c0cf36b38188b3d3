//! Dedup ledger
//!
//! A durable set of listing URLs that have already been reported. The unique
//! constraint lives in SQLite itself, so concurrent workers can never insert
//! a duplicate; `add_url` is idempotent by construction (`INSERT OR IGNORE`).
//! The ledger only grows — no update or delete path exists.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};
use tracing::{debug, info};

use crate::scrapers::KnownUrls;

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (creating if necessary) the ledger at `db_url` and run migrations.
    pub async fn connect(db_url: &str) -> Result<Self> {
        if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
            info!("Creating database at {}", db_url);
            Sqlite::create_database(db_url)
                .await
                .with_context(|| format!("failed to create database {db_url}"))?;
        }

        let pool = SqlitePool::connect(db_url)
            .await
            .with_context(|| format!("failed to open database {db_url}"))?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        info!("Database initialized");
        Ok(Self { pool })
    }

    /// True if the URL has already been committed to the ledger.
    pub async fn url_exists(&self, url: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM ads WHERE url = ? LIMIT 1")
            .bind(url)
            .fetch_optional(&self.pool)
            .await
            .context("failed to query dedup ledger")?;
        let exists = row.is_some();
        debug!("url_exists -> {} for {}", exists, url);
        Ok(exists)
    }

    /// Record a URL as seen. Inserting an already-present URL is a no-op.
    pub async fn add_url(&self, url: &str) -> Result<()> {
        sqlx::query("INSERT OR IGNORE INTO ads (url) VALUES (?)")
            .bind(url)
            .execute(&self.pool)
            .await
            .context("failed to write to dedup ledger")?;
        Ok(())
    }
}

#[async_trait]
impl KnownUrls for Database {
    async fn is_known(&self, url: &str) -> Result<bool> {
        self.url_exists(url).await
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}
