//! # Discord Webhook Notifications
//!
//! Sends one rich embed per newly discovered ad to a Discord channel
//! webhook. This is a thin delivery wrapper around the engine's output:
//! the orchestrator hands over the batch, and whether a notification went
//! out decides whether the ad's URL gets committed to the dedup ledger.
//!
//! ## Behavior
//!
//! - **Optional integration**: if `DISCORD_WEBHOOK_URL` is unset the
//!   notifier is disabled but everything else keeps working.
//! - **Graceful degradation**: a rejected webhook call is logged, never
//!   propagated — the caller decides what to do with the ad.
//! - **Embed contents**: ad title, truncated description, price, seller and
//!   platform fields, first image as the embed picture.

use anyhow::Result;
use reqwest::Client;
use serde::Serialize;
use tracing::{error, info, warn};

use crate::models::Ad;

const EMBED_COLOR: u32 = 0x0058_65F2; // Discord blue
const MAX_DESCRIPTION_CHARS: usize = 400;

/// Discord embed structure for rich notifications.
#[derive(Debug, Serialize)]
struct Embed {
    title: String,
    description: String,
    url: String,
    color: u32,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<EmbedImage>,
    fields: Vec<EmbedField>,
}

#[derive(Debug, Serialize)]
struct EmbedImage {
    url: String,
}

#[derive(Debug, Serialize)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

/// Webhook message payload.
#[derive(Debug, Serialize)]
struct WebhookMessage {
    embeds: Vec<Embed>,
}

pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
}

impl Notifier {
    /// Build a notifier from the `DISCORD_WEBHOOK_URL` environment variable.
    pub fn from_env() -> Self {
        let webhook_url = std::env::var("DISCORD_WEBHOOK_URL").ok();
        if webhook_url.is_none() {
            warn!("DISCORD_WEBHOOK_URL not set - notifications will be disabled");
        }
        Self {
            client: Client::new(),
            webhook_url,
        }
    }

    /// Send one ad's notification. Returns `Ok(false)` when delivery was
    /// rejected, so the caller can decide against committing the URL.
    pub async fn send_notification(&self, ad: &Ad) -> Result<bool> {
        let Some(webhook_url) = &self.webhook_url else {
            // Disabled: treat as delivered so the cycle still commits.
            return Ok(true);
        };

        let message = WebhookMessage {
            embeds: vec![build_embed(ad)],
        };

        let response = self.client.post(webhook_url).json(&message).send().await?;
        if response.status().is_success() {
            info!("Notification sent for ad: {}", ad.title);
            Ok(true)
        } else {
            error!("Failed to send notification: {}", response.status());
            Ok(false)
        }
    }
}

fn build_embed(ad: &Ad) -> Embed {
    let mut description = ad.description.trim().to_string();
    if description.chars().count() > MAX_DESCRIPTION_CHARS {
        description = description.chars().take(MAX_DESCRIPTION_CHARS).collect();
        description.push_str("...");
    }

    let mut fields = vec![EmbedField {
        name: "Price".to_string(),
        value: ad.price.clone(),
        inline: true,
    }];
    if let Some(seller) = &ad.seller {
        fields.push(EmbedField {
            name: "Seller".to_string(),
            value: seller.clone(),
            inline: true,
        });
    }
    fields.push(EmbedField {
        name: "Platform".to_string(),
        value: ad.platform.clone(),
        inline: true,
    });

    Embed {
        title: format!("📌 {}", ad.title),
        description,
        url: ad.url.clone(),
        color: EMBED_COLOR,
        timestamp: ad.discovered_at.to_rfc3339(),
        image: ad
            .images
            .first()
            .map(|url| EmbedImage { url: url.clone() }),
        fields,
    }
}

impl Clone for Notifier {
    fn clone(&self) -> Self {
        Self {
            client: self.client.clone(),
            webhook_url: self.webhook_url.clone(),
        }
    }
}
