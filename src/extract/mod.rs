//! Ordered-fallback HTML extraction
//!
//! Marketplace markup drifts constantly, so every field is pulled through an
//! ordered chain of selector rules: the first rule yielding non-empty text
//! wins, and a chain that misses entirely yields `None` instead of an error.
//! The chains are plain data — adding a new markup variant means appending a
//! selector string, never touching control flow.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Return the first non-empty text produced by the selector chain.
///
/// Text nodes under the matched element are joined with `separator` and
/// trimmed. Invalid selector strings are skipped so a bad rule can never take
/// down the whole chain.
pub fn first_text(document: &Html, selectors: &[&str], separator: &str) -> Option<String> {
    selectors
        .iter()
        .filter_map(|raw| Selector::parse(raw).ok())
        .find_map(|selector| {
            document
                .select(&selector)
                .next()
                .map(|el| element_text(el, separator))
                .filter(|text| !text.is_empty())
        })
}

/// Find the listing link inside one result card.
///
/// Tries the selector chain, then any `<a href>`, then a raw `href="…"` regex
/// over the card's HTML as a last resort for non-standard elements.
pub fn listing_link(element: ElementRef<'_>, selectors: &[&str]) -> Option<String> {
    for raw in selectors {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        if let Some(href) = element
            .select(&selector)
            .next()
            .and_then(|link| link.value().attr("href"))
        {
            return Some(href.to_string());
        }
    }

    let any_anchor = Selector::parse("a[href]").ok()?;
    if let Some(href) = element
        .select(&any_anchor)
        .next()
        .and_then(|link| link.value().attr("href"))
    {
        return Some(href.to_string());
    }

    let html = element.html();
    let href_re = Regex::new(r#"href=["']([^"']+)["']"#).ok()?;
    href_re
        .captures(&html)
        .map(|captures| captures[1].to_string())
}

/// Collect image URLs through ordered selector chains.
///
/// The first chain yielding at least one URL wins and the remaining chains
/// are skipped; URLs are deduplicated preserving order. When every chain
/// misses, fall back to a single meta-tag image named by `meta_keys`.
pub fn image_urls(document: &Html, selector_chains: &[&str], meta_keys: &[&str]) -> Vec<String> {
    let mut images: Vec<String> = Vec::new();

    for raw in selector_chains {
        let Ok(selector) = Selector::parse(raw) else {
            continue;
        };
        for img in document.select(&selector) {
            let src = img
                .value()
                .attr("src")
                .or_else(|| img.value().attr("data-src"))
                .or_else(|| {
                    img.value()
                        .attr("srcset")
                        .and_then(|srcset| srcset.split_whitespace().next())
                });
            if let Some(src) = src {
                if !src.is_empty() && !images.iter().any(|seen| seen.as_str() == src) {
                    images.push(src.to_string());
                }
            }
        }
        if !images.is_empty() {
            break;
        }
    }

    if images.is_empty() {
        if let Some(fallback) = meta_content(document, meta_keys) {
            images.push(fallback);
        }
    }

    images
}

/// Read the first non-empty `<meta>` content for the given keys, checking
/// both `name=` and `property=` attributes.
pub fn meta_content(document: &Html, keys: &[&str]) -> Option<String> {
    for key in keys {
        for attr in ["name", "property"] {
            let raw = format!(r#"meta[{attr}="{key}"]"#);
            let Ok(selector) = Selector::parse(&raw) else {
                continue;
            };
            if let Some(content) = document
                .select(&selector)
                .next()
                .and_then(|tag| tag.value().attr("content"))
                .map(str::trim)
                .filter(|content| !content.is_empty())
            {
                return Some(content.to_string());
            }
        }
    }
    None
}

fn element_text(element: ElementRef<'_>, separator: &str) -> String {
    element
        .text()
        .map(str::trim)
        .filter(|chunk| !chunk.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
        .trim()
        .to_string()
}
