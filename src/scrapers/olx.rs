//! OLX marketplace scraper (HTML pagination)
//!
//! OLX result pages are plain server-rendered HTML. Discovery walks the
//! `page=N` pagination, pulling one candidate URL per result card; hydration
//! fetches the listing page and runs the selector chains for every field.

use anyhow::{bail, Result};
use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, info, warn};
use url::Url;

use crate::extract;
use crate::fetch::{FetchClient, RetryPolicy};
use crate::models::{ListingCandidate, PartialAd, TargetSpec};
use crate::scrapers::{KnownUrls, MarketplaceScraper};

const DEFAULT_HOSTS: &[&str] = &["www.olx.ua", "www.olx.pl", "www.olx.ro"];

/// Ceiling on pages walked per target, applied on top of the `max_pages`
/// option so a broken termination heuristic still ends.
const MAX_PAGES_CEILING: u32 = 50;
const DEFAULT_MAX_PAGES: u32 = 25;

/// Query marker OLX attaches to synthetic "nearby region" filler ads.
const FILLER_QUERY_MARKER: &str = "reason=extended-region";

const AD_CARD_SELECTORS: &[&str] = &[
    r#"[data-cy="l-card"]"#,
    r#"[data-testid="l-card"]"#,
    r#"div[data-cy="ad-card"]"#,
    "div.css-1sw7q4x",
];

const LISTING_LINK_SELECTORS: &[&str] = &[
    r#"a[data-cy="listing-ad-title"]"#,
    r#"a[data-testid="ad-title"]"#,
    r#"a[data-cy="ad-card-link"]"#,
    r#"a[data-testid="ad-card-link"]"#,
    "a.css-rc5s2u",
    "a.css-1tqlkj0",
];

const TITLE_SELECTORS: &[&str] = &[
    r#"[data-cy="ad_title"]"#,
    r#"[data-testid="ad-title"]"#,
    "h4.css-1au435n",
    "h1.css-1soizd2",
];

const PRICE_SELECTORS: &[&str] = &[
    r#"[data-testid="ad-price-container"]"#,
    r#"[data-testid="ad-price"]"#,
    "h3.css-yauxmy",
    "h3.css-ddweki",
];

const DESCRIPTION_SELECTORS: &[&str] = &[
    r#"[data-cy="ad_description"]"#,
    r#"[data-testid="ad_description"]"#,
    "div.css-19duwlz",
    "div.css-bgzo2k",
];

const SELLER_SELECTORS: &[&str] = &[
    r#"[data-testid="seller-card"] h4"#,
    r#"[data-testid="seller-contact"] h4"#,
    "h4.css-14tb3q5",
    "h4.css-1lcz6o7",
];

const IMAGE_SELECTORS: &[&str] = &[
    r#"img[data-testid*="swiper-image"]"#,
    r#"img[data-cy="gallery-image"]"#,
    r#"img[data-testid="ad-image"]"#,
];

const IMAGE_META_KEYS: &[&str] = &["og:image", "twitter:image"];

pub struct OlxScraper {
    hosts: Vec<String>,
    fetch: FetchClient,
}

/// Owned outcome of parsing one results page; `Html` never crosses an await.
struct ParsedPage {
    urls: Vec<String>,
    last_page: Option<u32>,
    has_ads: bool,
}

impl OlxScraper {
    pub fn new() -> Result<Self> {
        Self::with_hosts(
            DEFAULT_HOSTS.iter().map(|h| h.to_string()).collect(),
            FetchClient::new(std::time::Duration::from_secs(1), RetryPolicy::default())?,
        )
    }

    /// Construct against a custom host allow-list, used by tests to point the
    /// scraper at a local fixture server.
    pub fn with_hosts(hosts: Vec<String>, fetch: FetchClient) -> Result<Self> {
        Ok(Self { hosts, fetch })
    }

    fn host_supported(&self, host: &str) -> bool {
        self.hosts.iter().any(|h| h.eq_ignore_ascii_case(host))
    }

    /// Rewrite the target URL for page `page`, preserving every other query
    /// parameter.
    fn build_page_url(target: &Url, page: u32) -> Url {
        let mut url = target.clone();
        let kept: Vec<(String, String)> = target
            .query_pairs()
            .filter(|(key, _)| key != "page")
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.clear();
            for (key, value) in &kept {
                pairs.append_pair(key, value);
            }
            pairs.append_pair("page", &page.to_string());
        }
        url
    }

    /// Accept a raw card href: absolutize against the target, reject
    /// external hosts and synthetic filler listings.
    fn accept_candidate(&self, href: &str, target: &Url) -> Option<String> {
        let absolute = target.join(href).ok()?;
        match absolute.host_str() {
            Some(host) if self.host_supported(host) => {}
            _ => {
                debug!("Rejecting external listing link: {}", href);
                return None;
            }
        }
        if absolute
            .query()
            .is_some_and(|q| q.contains(FILLER_QUERY_MARKER))
        {
            debug!("Rejecting synthetic filler listing: {}", absolute);
            return None;
        }
        Some(absolute.to_string())
    }

    fn parse_listing_page(&self, body: &str, target: &Url) -> ParsedPage {
        let document = Html::parse_document(body);

        let mut cards = Vec::new();
        for raw in AD_CARD_SELECTORS {
            let Ok(selector) = Selector::parse(raw) else {
                continue;
            };
            cards = document.select(&selector).collect();
            if !cards.is_empty() {
                debug!("Using card selector {:?}, found {} ads", raw, cards.len());
                break;
            }
        }

        let mut urls = Vec::new();
        for card in &cards {
            let Some(href) = extract::listing_link(*card, LISTING_LINK_SELECTORS) else {
                debug!("Result card has no usable link, skipping.");
                continue;
            };
            if let Some(url) = self.accept_candidate(&href, target) {
                urls.push(url);
            }
        }

        ParsedPage {
            urls,
            last_page: last_page_number(&document),
            has_ads: !cards.is_empty(),
        }
    }

    fn parse_ad_document(&self, body: &str) -> PartialAd {
        let document = Html::parse_document(body);
        PartialAd {
            title: extract::first_text(&document, TITLE_SELECTORS, " "),
            price: extract::first_text(&document, PRICE_SELECTORS, " "),
            description: extract::first_text(&document, DESCRIPTION_SELECTORS, "\n"),
            seller: extract::first_text(&document, SELLER_SELECTORS, " "),
            url: None,
            images: extract::image_urls(&document, IMAGE_SELECTORS, IMAGE_META_KEYS),
        }
    }
}

/// Last page number from the pagination list, when the page carries one.
fn last_page_number(document: &Html) -> Option<u32> {
    let selector = Selector::parse("ul.pagination-list li.pagination-item").ok()?;
    document
        .select(&selector)
        .last()
        .and_then(|item| item.text().collect::<String>().trim().parse().ok())
}

#[async_trait]
impl MarketplaceScraper for OlxScraper {
    fn name(&self) -> &str {
        "olx"
    }

    fn supports(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|parsed| parsed.host_str().map(|host| self.host_supported(host)))
            .unwrap_or(false)
    }

    async fn collect_listings(
        &self,
        target: &TargetSpec,
        known: &dyn KnownUrls,
    ) -> Result<Vec<ListingCandidate>> {
        let target_url = Url::parse(&target.url)?;
        let Some(host) = target_url.host_str() else {
            bail!("target URL has no host: {}", target.url);
        };
        if !self.host_supported(host) {
            bail!(
                "bad URL: this scraper only processes {} links",
                self.hosts.join(", ")
            );
        }

        let max_pages = target.int_option("max_pages", DEFAULT_MAX_PAGES, 1, MAX_PAGES_CEILING);
        let mut listings = Vec::new();
        let mut current_page = 1u32;

        info!("[{}] Starting scrape for {}", self.name(), target.url);
        loop {
            let page_url = Self::build_page_url(&target_url, current_page);
            info!("[{}] Scraping page {}", self.name(), current_page);

            let body = match self.fetch.get_text(page_url.as_str()).await {
                Ok(body) => body,
                Err(error) => {
                    warn!(
                        "[{}] Page {} failed for {}: {}",
                        self.name(),
                        current_page,
                        target.url,
                        error
                    );
                    break;
                }
            };

            let page = self.parse_listing_page(&body, &target_url);
            if !page.has_ads {
                info!("[{}] No ads found on page {}.", self.name(), current_page);
                break;
            }
            debug!(
                "[{}] Page {} yielded {} candidate URLs",
                self.name(),
                current_page,
                page.urls.len()
            );

            let mut page_contains_known = false;
            for url in page.urls {
                if known.is_known(&url).await? {
                    page_contains_known = true;
                    debug!("[{}] Known listing on page {}: {}", self.name(), current_page, url);
                    continue;
                }
                listings.push(ListingCandidate::bare(url));
            }

            if page.last_page.map_or(true, |last| current_page >= last) {
                info!("[{}] Reached last page or no pagination.", self.name());
                break;
            }
            if page_contains_known {
                info!(
                    "[{}] Encountered known listings; stopping pagination early.",
                    self.name()
                );
                break;
            }
            if current_page >= max_pages {
                info!("[{}] Reached max_pages ceiling ({}).", self.name(), max_pages);
                break;
            }
            current_page += 1;
        }

        info!(
            "[{}] Finished scraping {}. {} new candidates.",
            self.name(),
            target.url,
            listings.len()
        );
        Ok(listings)
    }

    async fn hydrate(&self, url: &str) -> Result<Option<PartialAd>> {
        info!("[{}] Hydrating {}", self.name(), url);
        let body = match self.fetch.get_text(url).await {
            Ok(body) => body,
            Err(error) => {
                warn!("[{}] Failed to fetch {}: {}", self.name(), url, error);
                return Ok(None);
            }
        };

        let mut ad = self.parse_ad_document(&body);
        ad.url = Some(url.to_string());
        if !ad.has_core_fields() {
            // Data-quality event, not an error: the record is dropped.
            return Ok(None);
        }
        Ok(Some(ad))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchClient, RetryPolicy};
    use crate::scrapers::testing::KnownSet;
    use std::time::Duration;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_scraper(server: &MockServer) -> OlxScraper {
        let host = Url::parse(&server.uri()).unwrap().host_str().unwrap().to_string();
        let fetch = FetchClient::new(
            Duration::from_millis(0),
            RetryPolicy::new(vec![Duration::from_millis(0)]),
        )
        .unwrap();
        OlxScraper::with_hosts(vec![host], fetch).unwrap()
    }

    fn card(href: &str) -> String {
        format!(
            r#"<div data-cy="l-card"><a data-cy="listing-ad-title" href="{href}">Ad</a></div>"#
        )
    }

    fn page_html(cards: &[String], last_page: Option<u32>) -> String {
        let pagination = last_page.map_or_else(String::new, |last| {
            let items: String = (1..=last)
                .map(|n| format!(r#"<li class="pagination-item">{n}</li>"#))
                .collect();
            format!(r#"<ul class="pagination-list">{items}</ul>"#)
        });
        format!("<html><body>{}{pagination}</body></html>", cards.join(""))
    }

    #[test]
    fn build_page_url_overwrites_page_and_keeps_other_params() {
        let target = Url::parse("https://www.olx.ro/electronice/q-rtx/?currency=EUR&page=7").unwrap();
        let rebuilt = OlxScraper::build_page_url(&target, 3);
        assert_eq!(
            rebuilt.as_str(),
            "https://www.olx.ro/electronice/q-rtx/?currency=EUR&page=3"
        );
    }

    #[tokio::test]
    async fn walks_every_page_when_nothing_is_known() {
        let server = MockServer::start().await;
        let page1 = page_html(&[card("/d/oferta/one.html"), card("/d/oferta/two.html")], Some(2));
        let page2 = page_html(&[card("/d/oferta/three.html")], Some(2));

        Mock::given(method("GET"))
            .and(path("/q-lamp/"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page1))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/q-lamp/"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page2))
            .expect(1)
            .mount(&server)
            .await;

        let scraper = test_scraper(&server);
        let target = TargetSpec::new(format!("{}/q-lamp/", server.uri()));
        let listings = scraper
            .collect_listings(&target, &KnownSet::empty())
            .await
            .unwrap();

        assert_eq!(listings.len(), 3);
        assert!(listings[0].url.ends_with("/d/oferta/one.html"));
    }

    #[tokio::test]
    async fn known_listing_stops_pagination_early() {
        let server = MockServer::start().await;
        let known_url = format!("{}/d/oferta/two.html", server.uri());
        let page1 = page_html(&[card("/d/oferta/one.html"), card("/d/oferta/two.html")], Some(3));

        // Page 2 must never be requested.
        Mock::given(method("GET"))
            .and(path("/q-lamp/"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page1))
            .expect(1)
            .mount(&server)
            .await;

        let scraper = test_scraper(&server);
        let target = TargetSpec::new(format!("{}/q-lamp/", server.uri()));
        let listings = scraper
            .collect_listings(&target, &KnownSet::new([known_url]))
            .await
            .unwrap();

        assert_eq!(listings.len(), 1);
        assert!(listings[0].url.ends_with("/d/oferta/one.html"));
    }

    #[tokio::test]
    async fn rejects_external_and_filler_candidates() {
        let server = MockServer::start().await;
        let page = page_html(
            &[
                card("/d/oferta/real.html"),
                card("https://evil.example/d/oferta/offsite.html"),
                card("/d/oferta/nearby.html?reason=extended-region"),
            ],
            None,
        );
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;

        let scraper = test_scraper(&server);
        let target = TargetSpec::new(format!("{}/q-lamp/", server.uri()));
        let listings = scraper
            .collect_listings(&target, &KnownSet::empty())
            .await
            .unwrap();

        assert_eq!(listings.len(), 1);
        assert!(listings[0].url.ends_with("/d/oferta/real.html"));
    }

    #[tokio::test]
    async fn failed_page_fetch_returns_collected_so_far() {
        let server = MockServer::start().await;
        let page1 = page_html(&[card("/d/oferta/one.html")], Some(3));
        Mock::given(method("GET"))
            .and(query_param("page", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page1))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("page", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scraper = test_scraper(&server);
        let target = TargetSpec::new(format!("{}/q-lamp/", server.uri()));
        let listings = scraper
            .collect_listings(&target, &KnownSet::empty())
            .await
            .unwrap();
        assert_eq!(listings.len(), 1);
    }

    #[tokio::test]
    async fn unsupported_target_host_is_an_error() {
        let server = MockServer::start().await;
        let scraper = test_scraper(&server);
        let target = TargetSpec::new("https://www.olx.de/q-lamp/");
        assert!(scraper
            .collect_listings(&target, &KnownSet::empty())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn hydrate_accepts_record_without_seller() {
        let server = MockServer::start().await;
        let ad_page = r#"<html><body>
            <h1 data-cy="ad_title">Desk lamp</h1>
            <h3 data-testid="ad-price">40 RON</h3>
            <div data-cy="ad_description">Works fine.</div>
            <img data-testid="swiper-image-1" src="https://img/lamp.jpg">
        </body></html>"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ad_page))
            .mount(&server)
            .await;

        let scraper = test_scraper(&server);
        let ad = scraper
            .hydrate(&format!("{}/d/oferta/lamp.html", server.uri()))
            .await
            .unwrap()
            .expect("complete record");
        assert_eq!(ad.title.as_deref(), Some("Desk lamp"));
        assert_eq!(ad.price.as_deref(), Some("40 RON"));
        assert!(ad.seller.is_none());
        assert_eq!(ad.images, vec!["https://img/lamp.jpg".to_string()]);
    }

    #[tokio::test]
    async fn hydrate_discards_record_missing_description() {
        let server = MockServer::start().await;
        let ad_page = r#"<html><body>
            <h1 data-cy="ad_title">Desk lamp</h1>
            <h3 data-testid="ad-price">40 RON</h3>
        </body></html>"#;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(ad_page))
            .mount(&server)
            .await;

        let scraper = test_scraper(&server);
        let ad = scraper
            .hydrate(&format!("{}/d/oferta/lamp.html", server.uri()))
            .await
            .unwrap();
        assert!(ad.is_none());
    }
}
