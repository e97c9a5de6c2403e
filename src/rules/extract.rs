//! HTML link and asset extraction
//!
//! Malformed markup never fails extraction: the HTML parser recovers from
//! whatever it is given, and unusable references are skipped, so the worst case
//! is an empty set.

use crate::url::is_safe_scheme;
use crate::ConfigError;
use scraper::{Html, Selector};
use std::collections::BTreeSet;
use url::Url;

/// Finds the links a page points to
pub trait LinkExtractor: Send + Sync {
    /// Returns absolute, deduplicated link targets found in `html`
    fn extract_links(&self, html: &str, base_url: &Url) -> BTreeSet<String>;
}

/// Extracts `href` targets of elements matching a set of CSS selectors
///
/// **Skipped:**
/// - elements carrying a `download` attribute
/// - fragment-only links (same page anchors)
/// - `javascript:`, `mailto:`, `tel:`, `data:` and any other non-http(s) target
///
/// `rel="nofollow"` links are followed.
#[derive(Debug, Clone)]
pub struct SelectorLinkExtractor {
    selectors: Vec<Selector>,
}

impl SelectorLinkExtractor {
    pub fn new(selectors: &[String]) -> Result<Self, ConfigError> {
        let selectors = selectors
            .iter()
            .map(|s| {
                Selector::parse(s).map_err(|e| {
                    ConfigError::InvalidPattern(format!("Invalid link selector '{}': {:?}", s, e))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { selectors })
    }
}

impl Default for SelectorLinkExtractor {
    fn default() -> Self {
        Self {
            selectors: Selector::parse("a[href]").into_iter().collect(),
        }
    }
}

impl LinkExtractor for SelectorLinkExtractor {
    fn extract_links(&self, html: &str, base_url: &Url) -> BTreeSet<String> {
        let document = Html::parse_document(html);
        let mut links = BTreeSet::new();

        for selector in &self.selectors {
            for element in document.select(selector) {
                if element.value().attr("download").is_some() {
                    continue;
                }

                if let Some(absolute) = element
                    .value()
                    .attr("href")
                    .and_then(|href| resolve_link(href, base_url))
                {
                    links.insert(absolute);
                }
            }
        }

        links
    }
}

/// Extracts image, stylesheet and script references
///
/// # Returns
///
/// Sorted, deduplicated absolute URLs from `img[src]`,
/// `link[rel=stylesheet][href]` and `script[src]`
pub fn extract_assets(html: &str, base_url: &Url) -> Vec<String> {
    const ASSET_SELECTORS: &[(&str, &str)] = &[
        ("img[src]", "src"),
        ("link[rel~='stylesheet'][href]", "href"),
        ("script[src]", "src"),
    ];

    let document = Html::parse_document(html);
    let mut assets = BTreeSet::new();

    for (css, attr) in ASSET_SELECTORS {
        let Ok(selector) = Selector::parse(css) else {
            continue;
        };
        for element in document.select(&selector) {
            if let Some(absolute) = element
                .value()
                .attr(attr)
                .and_then(|value| resolve_link(value, base_url))
            {
                assets.insert(absolute);
            }
        }
    }

    assets.into_iter().collect()
}

/// Resolves a reference to an absolute http(s) URL
fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    let absolute = base_url.join(href).ok()?;
    is_safe_scheme(absolute.as_str()).then(|| absolute.to_string())
}
