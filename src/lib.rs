//! Ad Radar: marketplace listing monitor
//!
//! Continuously discovers new classified-ad listings across marketplace
//! sites, extracts a normalized record per listing, and surfaces each new
//! listing exactly once. The engine is built from per-marketplace scrapers
//! behind one trait, ordered-fallback HTML extraction, rate-limited and
//! retried fetching, bounded-concurrency orchestration, and a durable
//! URL-keyed dedup ledger.

pub mod config;
pub mod db;
pub mod extract;
pub mod fetch;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod radar;
pub mod scrapers;

pub use models::{Ad, ListingCandidate, PartialAd, TargetSpec};
pub use orchestrator::CrawlOrchestrator;
pub use radar::AdRadar;
