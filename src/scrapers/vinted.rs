//! Vinted marketplace scraper (catalog API + HTML enrichment)
//!
//! Discovery goes through the public catalog search API, which returns most
//! fields but unreliable image sets and descriptions. Every accepted item is
//! therefore enriched with an HTML snapshot of its listing page and the two
//! payloads are merged field by field: the snapshot wins where it has data,
//! but an empty snapshot image list never erases the API's.

use anyhow::{bail, Result};
use async_trait::async_trait;
use scraper::Html;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::extract;
use crate::fetch::{FetchClient, RetryPolicy};
use crate::models::{ListingCandidate, PartialAd, TargetSpec};
use crate::scrapers::{KnownUrls, MarketplaceScraper};

const MAX_PAGE_SIZE: u32 = 20;
const MAX_PAGES: u32 = 10;

const HTML_TITLE_SELECTORS: &[&str] = &[r#"[data-testid="item-title"]"#, "main h1", "h1"];
const HTML_PRICE_SELECTORS: &[&str] = &[r#"[data-testid="item-price"]"#];
const HTML_DESCRIPTION_SELECTORS: &[&str] = &[
    r#"[data-testid="item-description"]"#,
    r#"[data-testid="item-description-content"]"#,
    r#"[data-testid="description-content"]"#,
    r#"[data-testid="item-details-description"]"#,
];
const HTML_SELLER_SELECTORS: &[&str] = &[r#"[data-testid="profile-username"]"#];
const HTML_IMAGE_SELECTORS: &[&str] = &[r#"img[data-testid^="item-photo"]"#];
const IMAGE_META_KEYS: &[&str] = &["og:image", "twitter:image"];

/// Catalog search response; unknown fields are ignored wholesale.
#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    items: Vec<ApiItem>,
}

/// One catalog item. The API reshapes these payloads often, so everything is
/// optional and the price/photo shapes are handled as loose JSON.
#[derive(Debug, Default, Deserialize)]
struct ApiItem {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    price: Option<Value>,
    #[serde(default)]
    total_item_price: Option<Value>,
    #[serde(default)]
    currency: Option<String>,
    #[serde(default)]
    photos: Option<Value>,
    #[serde(default)]
    photo: Option<Value>,
    #[serde(default)]
    user: Option<Value>,
    #[serde(default)]
    item_box: Option<Value>,
}

pub struct VintedScraper {
    /// Substring a URL's host must contain for this scraper to claim it.
    domain_marker: String,
    fetch: FetchClient,
}

impl VintedScraper {
    pub fn new() -> Result<Self> {
        Self::with_domain_marker(
            "vinted".to_string(),
            FetchClient::new(std::time::Duration::from_secs(1), RetryPolicy::default())?,
        )
    }

    /// Construct against a custom host marker, used by tests to point the
    /// scraper at a local fixture server.
    pub fn with_domain_marker(domain_marker: String, fetch: FetchClient) -> Result<Self> {
        Ok(Self {
            domain_marker,
            fetch,
        })
    }

    /// Catalog API URL for one page, mapping the target's own query
    /// parameters through and overriding the pagination ones.
    fn build_search_url(target: &Url, page_size: u32, page: u32) -> Result<Url> {
        let Some(host) = target.host_str() else {
            bail!("target URL has no host: {target}");
        };
        let mut api = Url::parse(&format!(
            "{}://{}/api/v2/catalog/items",
            target.scheme(),
            host
        ))?;
        if let Some(port) = target.port() {
            let _ = api.set_port(Some(port));
        }
        {
            let mut pairs = api.query_pairs_mut();
            for (key, value) in target.query_pairs() {
                if key != "per_page" && key != "page" {
                    pairs.append_pair(&key, &value);
                }
            }
            pairs.append_pair("per_page", &page_size.to_string());
            pairs.append_pair("page", &page.to_string());
        }
        Ok(api)
    }

    fn build_partial_from_item(item: &ApiItem, scheme: &str, authority: &str) -> Option<PartialAd> {
        let url = item_url(item, scheme, authority)?;

        let description = item
            .description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| item_box_description(item.item_box.as_ref()));
        let price = format_price(item);

        let partial = PartialAd {
            title: item.title.clone().filter(|t| !t.trim().is_empty()),
            price,
            description,
            seller: seller_name(item.user.as_ref()),
            url: Some(url.clone()),
            images: item_images(item),
        };

        if !partial.has_core_fields() {
            debug!("[vinted] Skipping {} due to missing required fields", url);
            return None;
        }
        Some(partial)
    }

    /// Fetch the listing page and extract an HTML snapshot of the fields.
    ///
    /// `None` when the page yields no usable data at all; a snapshot with
    /// some fields missing is still worth merging.
    async fn scrape_item_html(&self, url: &str) -> Option<PartialAd> {
        let body = match self.fetch.get_text(url).await {
            Ok(body) => body,
            Err(error) => {
                debug!("[vinted] HTML fetch failed for {}: {}", url, error);
                return None;
            }
        };

        let snapshot = parse_item_html(&body, url);
        let PartialAd {
            title,
            price,
            description,
            seller,
            images,
            ..
        } = &snapshot;
        if title.is_none()
            && price.is_none()
            && description.is_none()
            && seller.is_none()
            && images.is_empty()
        {
            debug!("[vinted] HTML snapshot had no usable data for {}", url);
            return None;
        }
        Some(snapshot)
    }

    /// Secondary source for hydration: look the item up through the catalog
    /// API by the numeric id in its URL.
    async fn fetch_item_via_api(&self, url: &str) -> Option<PartialAd> {
        let parsed = Url::parse(url).ok()?;
        let id = item_id_from_path(parsed.path())?;
        let authority = authority_of(&parsed)?;

        let mut api = Self::build_search_url(&parsed, 1, 1).ok()?;
        api.set_query(None);
        {
            let mut pairs = api.query_pairs_mut();
            pairs.append_pair("search_text", &id.to_string());
            pairs.append_pair("per_page", "1");
            pairs.append_pair("page", "1");
        }

        let response: CatalogResponse = match self.fetch.get_json(api.as_str()).await {
            Ok(response) => response,
            Err(error) => {
                debug!("[vinted] API fallback failed for {}: {}", url, error);
                return None;
            }
        };
        response
            .items
            .first()
            .and_then(|item| Self::build_partial_from_item(item, parsed.scheme(), &authority))
    }
}

#[async_trait]
impl MarketplaceScraper for VintedScraper {
    fn name(&self) -> &str {
        "vinted"
    }

    fn supports(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|parsed| {
                parsed
                    .host_str()
                    .map(|host| host.to_ascii_lowercase().contains(&self.domain_marker))
            })
            .unwrap_or(false)
    }

    async fn collect_listings(
        &self,
        target: &TargetSpec,
        known: &dyn KnownUrls,
    ) -> Result<Vec<ListingCandidate>> {
        let target_url = Url::parse(&target.url)?;
        let Some(authority) = authority_of(&target_url) else {
            bail!("target URL has no host: {}", target.url);
        };
        let scheme = target_url.scheme().to_string();

        let page_size = target.int_option("page_size", MAX_PAGE_SIZE, 1, MAX_PAGE_SIZE);
        let max_pages = target.int_option("max_pages", MAX_PAGES, 1, MAX_PAGES);

        let mut collected = Vec::new();
        let mut page = 1u32;

        info!("[{}] Starting scrape for {}", self.name(), target.url);
        while page <= max_pages {
            let api_url = Self::build_search_url(&target_url, page_size, page)?;
            debug!("[{}] Fetching page {} (size={})", self.name(), page, page_size);

            let response: CatalogResponse = match self.fetch.get_json(api_url.as_str()).await {
                Ok(response) => response,
                Err(error) => {
                    warn!(
                        "[{}] Failed to fetch page {} for {}: {}",
                        self.name(),
                        page,
                        target.url,
                        error
                    );
                    break;
                }
            };

            if response.items.is_empty() {
                info!("[{}] No items returned for page {}.", self.name(), page);
                break;
            }

            let item_count = response.items.len();
            let mut page_contains_known = false;

            for item in &response.items {
                let Some(api_partial) = Self::build_partial_from_item(item, &scheme, &authority)
                else {
                    continue;
                };
                let url = api_partial.url.clone().unwrap_or_default();

                if known.is_known(&url).await? {
                    page_contains_known = true;
                    debug!("[{}] Already processed: {}", self.name(), url);
                    continue;
                }

                let merged = match self.scrape_item_html(&url).await {
                    Some(snapshot) => api_partial.merged_with(snapshot),
                    None => {
                        debug!(
                            "[{}] HTML enrichment failed for {}; keeping API payload.",
                            self.name(),
                            url
                        );
                        api_partial
                    }
                };
                collected.push(ListingCandidate::with_data(url, merged));
            }

            if (item_count as u32) < page_size {
                info!(
                    "[{}] Received short page ({} items). Stopping pagination.",
                    self.name(),
                    item_count
                );
                break;
            }
            if page_contains_known {
                info!(
                    "[{}] Encountered known listings; stopping pagination early.",
                    self.name()
                );
                break;
            }
            page += 1;
        }

        info!(
            "[{}] Finished scraping {}. {} new candidates.",
            self.name(),
            target.url,
            collected.len()
        );
        Ok(collected)
    }

    async fn hydrate(&self, url: &str) -> Result<Option<PartialAd>> {
        info!("[{}] Hydrating {}", self.name(), url);

        let html = self.scrape_item_html(url).await;
        if let Some(snapshot) = &html {
            if snapshot.has_core_fields() {
                return Ok(Some(snapshot.clone()));
            }
        }

        debug!(
            "[{}] HTML snapshot incomplete for {}; trying API fallback.",
            self.name(),
            url
        );
        let merged = match (self.fetch_item_via_api(url).await, html) {
            (Some(api), Some(snapshot)) => api.merged_with(snapshot),
            (Some(api), None) => api,
            (None, Some(snapshot)) => snapshot,
            (None, None) => return Ok(None),
        };

        if !merged.has_core_fields() {
            return Ok(None);
        }
        let mut merged = merged;
        merged.url.get_or_insert_with(|| url.to_string());
        Ok(Some(merged))
    }
}

/// host[:port] of a URL, for rebuilding absolute listing links.
fn authority_of(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    })
}

fn item_url(item: &ApiItem, scheme: &str, authority: &str) -> Option<String> {
    let raw = item
        .url
        .clone()
        .or_else(|| item.path.clone())
        .filter(|u| !u.trim().is_empty());
    if let Some(raw) = raw {
        if raw.starts_with("http") {
            return Some(raw);
        }
        let path = if raw.starts_with('/') { raw } else { format!("/{raw}") };
        return Some(format!("{scheme}://{authority}{path}"));
    }
    item.id.map(|id| format!("{scheme}://{authority}/items/{id}"))
}

fn item_id_from_path(path: &str) -> Option<i64> {
    let rest = path.strip_prefix("/items/")?;
    let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Price string from whichever shape the API used: an object carrying
/// `amount`/`currency_code`, or a bare scalar plus a top-level currency.
fn format_price(item: &ApiItem) -> Option<String> {
    let candidates = [&item.price, &item.total_item_price];

    if let Some(object) = candidates
        .iter()
        .filter_map(|candidate| candidate.as_ref())
        .find(|value| value.is_object())
    {
        let amount = ["amount", "value", "number"]
            .iter()
            .find_map(|key| scalar_string(object.get(*key)?))?;
        let currency = ["currency", "currency_code"]
            .iter()
            .find_map(|key| scalar_string(object.get(*key)?));
        return Some(match currency {
            Some(currency) => format!("{amount} {currency}"),
            None => amount,
        });
    }

    let amount = candidates
        .iter()
        .filter_map(|candidate| candidate.as_ref())
        .find_map(|value| scalar_string(value))?;
    Some(match &item.currency {
        Some(currency) if !currency.is_empty() => format!("{amount} {currency}"),
        _ => amount,
    })
}

fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn item_box_description(item_box: Option<&Value>) -> Option<String> {
    let item_box = item_box?;
    ["accessibility_label", "first_line"]
        .iter()
        .find_map(|key| scalar_string(item_box.get(*key)?))
}

fn seller_name(user: Option<&Value>) -> Option<String> {
    let user = user?;
    ["login", "username", "name"]
        .iter()
        .find_map(|key| scalar_string(user.get(*key)?))
}

fn item_images(item: &ApiItem) -> Vec<String> {
    let mut images = Vec::new();
    if let Some(photos) = &item.photos {
        gather_urls(photos, &mut images);
    }
    if images.is_empty() {
        if let Some(cover) = &item.photo {
            gather_urls(cover, &mut images);
        }
    }
    images
}

/// Recursively collect every http(s) URL in a JSON fragment, preserving
/// first-seen order. The photo payload's nesting varies per endpoint.
fn gather_urls(node: &Value, into: &mut Vec<String>) {
    match node {
        Value::String(s) if s.starts_with("http") => {
            if !into.iter().any(|seen| seen == s) {
                into.push(s.clone());
            }
        }
        Value::Object(map) => {
            for value in map.values() {
                gather_urls(value, into);
            }
        }
        Value::Array(items) => {
            for value in items {
                gather_urls(value, into);
            }
        }
        _ => {}
    }
}

fn parse_item_html(body: &str, url: &str) -> PartialAd {
    let document = Html::parse_document(body);

    let title = extract::first_text(&document, HTML_TITLE_SELECTORS, " ")
        .or_else(|| extract::meta_content(&document, &["og:title", "twitter:title"]));

    let price = extract::first_text(&document, HTML_PRICE_SELECTORS, " ")
        .map(|p| p.replace('\u{a0}', " "))
        .or_else(|| {
            let amount =
                extract::meta_content(&document, &["product:price:amount", "og:price:amount"])?;
            let currency =
                extract::meta_content(&document, &["product:price:currency", "og:price:currency"]);
            Some(match currency {
                Some(currency) => format!("{amount} {currency}"),
                None => amount,
            })
        });

    let description = extract::first_text(&document, HTML_DESCRIPTION_SELECTORS, "\n").or_else(
        || {
            extract::meta_content(&document, &["description", "og:description"]).map(|meta| {
                // Meta descriptions come as "Title - actual description".
                match meta.split_once(" - ") {
                    Some((_, rest)) if !rest.trim().is_empty() => rest.trim().to_string(),
                    _ => meta,
                }
            })
        },
    );

    PartialAd {
        title,
        price,
        description,
        seller: extract::first_text(&document, HTML_SELLER_SELECTORS, " "),
        url: Some(url.to_string()),
        images: extract::image_urls(&document, HTML_IMAGE_SELECTORS, IMAGE_META_KEYS),
    }
}
