//! Data models shared between scrapers, the orchestrator and the notifier

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One monitored marketplace search page plus its per-target tuning options.
///
/// Produced by the target-file parser; identity is the URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    pub url: String,
    pub options: HashMap<String, String>,
}

impl TargetSpec {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: HashMap::new(),
        }
    }

    /// Read an integer option, clamped to `[min, max]`.
    ///
    /// Unparsable values are logged and fall back to `default`, matching the
    /// lenient handling of the target file as a whole.
    pub fn int_option(&self, key: &str, default: u32, min: u32, max: u32) -> u32 {
        match self.options.get(key) {
            None => default.clamp(min, max),
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) => value.clamp(min, max),
                Err(_) => {
                    warn!(
                        "Invalid value for option '{}': {}. Using default {}.",
                        key, raw, default
                    );
                    default.clamp(min, max)
                }
            },
        }
    }
}

/// A listing URL discovered during pagination, not yet confirmed new.
///
/// `data` is populated when discovery already extracted enough to skip a
/// separate hydration fetch (an optimization, not a guarantee).
#[derive(Debug, Clone)]
pub struct ListingCandidate {
    pub url: String,
    pub data: Option<PartialAd>,
}

impl ListingCandidate {
    pub fn bare(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            data: None,
        }
    }

    pub fn with_data(url: impl Into<String>, data: PartialAd) -> Self {
        Self {
            url: url.into(),
            data: Some(data),
        }
    }
}

/// Fields extracted from one data source for one listing.
///
/// A partial ad may come from a search-API payload or an HTML snapshot;
/// neither source is trusted to be complete on its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialAd {
    pub title: Option<String>,
    pub price: Option<String>,
    pub description: Option<String>,
    pub seller: Option<String>,
    pub url: Option<String>,
    pub images: Vec<String>,
}

impl PartialAd {
    /// True when every required field (title, price, description) is present
    /// and non-empty.
    pub fn has_core_fields(&self) -> bool {
        fn filled(field: &Option<String>) -> bool {
            field.as_deref().is_some_and(|s| !s.trim().is_empty())
        }
        filled(&self.title) && filled(&self.price) && filled(&self.description)
    }

    /// Merge `overlay` on top of `self`: the overlay's non-empty fields win,
    /// but an empty overlay image list never erases a populated one.
    pub fn merged_with(mut self, overlay: PartialAd) -> PartialAd {
        fn overlay_field(base: &mut Option<String>, over: Option<String>) {
            if over.as_deref().is_some_and(|s| !s.trim().is_empty()) {
                *base = over;
            }
        }
        overlay_field(&mut self.title, overlay.title);
        overlay_field(&mut self.price, overlay.price);
        overlay_field(&mut self.description, overlay.description);
        overlay_field(&mut self.seller, overlay.seller);
        overlay_field(&mut self.url, overlay.url);
        if !overlay.images.is_empty() {
            self.images = overlay.images;
        }
        self
    }

    /// Finalize into an [`Ad`], tagging the originating platform and
    /// defaulting the URL from the candidate that produced this payload.
    ///
    /// Returns `None` (and logs a data-quality warning) when a required field
    /// is missing; a partial record is never forwarded.
    pub fn into_ad(self, platform: &str, fallback_url: &str) -> Option<Ad> {
        let url = self
            .url
            .clone()
            .filter(|u| !u.is_empty())
            .unwrap_or_else(|| fallback_url.to_string());
        if !self.has_core_fields() {
            let missing: Vec<&str> = [
                ("title", &self.title),
                ("price", &self.price),
                ("description", &self.description),
            ]
            .iter()
            .filter(|(_, value)| value.as_deref().map_or(true, |s| s.trim().is_empty()))
            .map(|(name, _)| *name)
            .collect();
            warn!("Missing required data for {}: {}", url, missing.join(", "));
            return None;
        }
        Some(Ad {
            title: self.title.unwrap_or_default(),
            price: self.price.unwrap_or_default(),
            url,
            description: self.description.unwrap_or_default(),
            images: self.images,
            seller: self.seller.filter(|s| !s.trim().is_empty()),
            platform: platform.to_string(),
            discovered_at: Utc::now(),
        })
    }
}

/// A fully hydrated, normalized listing — the unit of output for one cycle.
///
/// The URL is the unique key: two ads with the same URL are the same listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ad {
    pub title: String,
    pub price: String,
    pub url: String,
    pub description: String,
    pub images: Vec<String>,
    pub seller: Option<String>,
    pub platform: String,
    pub discovered_at: DateTime<Utc>,
}
