//! Result extraction from untrusted search result markup.
//!
//! Each [`ExtractionStrategy`] is one structural hypothesis about where
//! result records live in a page. Strategies are pure: the same body and
//! base URL always produce the same hits.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::result::normalize_url;
use crate::{Result, SearchError, SearchResult, SourceId};

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Query parameters that carry the real target of a redirect link.
const REDIRECT_PARAMS: [&str; 3] = ["redirect_url", "url", "uddg"];

/// A structurally complete record found by a strategy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedHit {
    pub title: String,
    pub url: String,
    pub description: String,
}

impl ExtractedHit {
    /// Converts the hit into a search result attributed to `source`.
    pub fn into_result(self, source: SourceId, fetched_at: DateTime<Utc>) -> SearchResult {
        SearchResult::new(source, self.url, self.title, self.description, fetched_at)
    }
}

/// One structural hypothesis about result markup.
#[derive(Debug, Clone)]
pub enum ExtractionStrategy {
    /// Results are container elements holding a heading and a link.
    Blocks {
        name: &'static str,
        /// Selector for each result container.
        container: &'static str,
        /// Title selectors tried in order inside the container.
        title: &'static [&'static str],
        /// Link selectors tried in order inside the container.
        link: &'static [&'static str],
        /// Description selectors tried in order inside the container.
        description: &'static [&'static str],
    },
    /// Results are `<dt>` title/link entries followed by a `<dd>` description.
    DefinitionList { name: &'static str },
}

const TITLE_FALLBACKS: &[&str] = &["h4", "h3", ".title", "a"];
const LINK_FALLBACKS: &[&str] = &["a[href]"];
const DESCRIPTION_FALLBACKS: &[&str] = &[".description", ".content", "p"];

impl ExtractionStrategy {
    /// Blocks whose class is exactly one of the common result class names.
    pub fn generic_result_blocks() -> Self {
        Self::Blocks {
            name: "result-blocks",
            container: ".result, .searchresults, .search-result",
            title: TITLE_FALLBACKS,
            link: LINK_FALLBACKS,
            description: DESCRIPTION_FALLBACKS,
        }
    }

    /// Any `div` whose class name merely contains "result".
    pub fn class_contains_result() -> Self {
        Self::Blocks {
            name: "class-contains-result",
            container: r#"div[class*="result"]"#,
            title: TITLE_FALLBACKS,
            link: LINK_FALLBACKS,
            description: DESCRIPTION_FALLBACKS,
        }
    }

    /// `<dt>`/`<dd>` pairs.
    pub fn definition_list() -> Self {
        Self::DefinitionList {
            name: "definition-list",
        }
    }

    /// Returns the strategy name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Blocks { name, .. } | Self::DefinitionList { name } => name,
        }
    }

    /// Applies the strategy, returning every complete hit in document order.
    pub fn extract(&self, document: &Html, base_url: &Url) -> Result<Vec<ExtractedHit>> {
        match self {
            Self::Blocks {
                container,
                title,
                link,
                description,
                ..
            } => extract_blocks(document, base_url, container, title, link, description),
            Self::DefinitionList { .. } => extract_definition_list(document, base_url),
        }
    }
}

/// Runs strategies in order and returns the first one yielding at least one
/// complete hit whose URL host ends with `host_suffix`.
///
/// Hits from different strategies are never merged.
pub fn first_match(
    strategies: &[ExtractionStrategy],
    body: &str,
    base_url: &Url,
    host_suffix: &str,
) -> Option<(&'static str, Vec<ExtractedHit>)> {
    let document = Html::parse_document(body);

    for strategy in strategies {
        let hits = match strategy.extract(&document, base_url) {
            Ok(hits) => hits,
            Err(e) => {
                debug!("Strategy {} failed: {}", strategy.name(), e);
                continue;
            }
        };

        let hits: Vec<_> = hits
            .into_iter()
            .filter(|hit| host_ends_with(&hit.url, host_suffix))
            .collect();

        if !hits.is_empty() {
            debug!("Strategy {} matched {} results", strategy.name(), hits.len());
            return Some((strategy.name(), hits));
        }
    }

    None
}

fn host_ends_with(url: &str, suffix: &str) -> bool {
    Url::parse(url)
        .ok()
        .and_then(|url| url.host_str().map(|host| host.ends_with(suffix)))
        .unwrap_or(false)
}

fn extract_blocks(
    document: &Html,
    base_url: &Url,
    container: &str,
    title: &[&str],
    link: &[&str],
    description: &[&str],
) -> Result<Vec<ExtractedHit>> {
    let container = selector(container)?;
    let title_selectors = selectors(title)?;
    let link_selectors = selectors(link)?;
    let description_selectors = selectors(description)?;

    let mut hits = Vec::new();

    for element in document.select(&container) {
        let Some(title) = first_text(element, &title_selectors) else {
            continue;
        };
        let Some(url) = first_link(element, &link_selectors, base_url) else {
            continue;
        };

        let description = first_text(element, &description_selectors).unwrap_or_default();
        hits.push(ExtractedHit {
            title,
            url,
            description,
        });
    }

    Ok(hits)
}

fn extract_definition_list(document: &Html, base_url: &Url) -> Result<Vec<ExtractedHit>> {
    let term = selector("dt")?;
    let link = selectors(LINK_FALLBACKS)?;

    let mut hits = Vec::new();

    for dt in document.select(&term) {
        let title = text_of(dt);
        if title.is_empty() {
            continue;
        }
        let Some(url) = first_link(dt, &link, base_url) else {
            continue;
        };

        let description = dt
            .next_siblings()
            .filter_map(ElementRef::wrap)
            .take_while(|el| el.value().name() != "dt")
            .find(|el| el.value().name() == "dd")
            .map(text_of)
            .unwrap_or_default();

        hits.push(ExtractedHit {
            title,
            url,
            description,
        });
    }

    Ok(hits)
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css)
        .map_err(|e| SearchError::Parse(format!("Failed to parse selector: {:?}", e)))
}

fn selectors(css: &[&str]) -> Result<Vec<Selector>> {
    css.iter().map(|c| selector(c)).collect()
}

fn text_of(element: ElementRef<'_>) -> String {
    let text = element.text().collect::<String>();
    WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

fn first_text(element: ElementRef<'_>, selectors: &[Selector]) -> Option<String> {
    selectors
        .iter()
        .flat_map(|s| element.select(s))
        .map(text_of)
        .find(|text| !text.is_empty())
}

fn first_link(element: ElementRef<'_>, selectors: &[Selector], base_url: &Url) -> Option<String> {
    selectors
        .iter()
        .flat_map(|s| element.select(s))
        .filter_map(|el| el.value().attr("href"))
        .find_map(|href| resolve_link(href, base_url))
}

/// Resolves an `href` against the page URL, unwraps redirect links and
/// normalizes the result. Returns `None` for links that cannot lead to a page.
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty()
        || href.starts_with('#')
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
    {
        return None;
    }

    let resolved = base_url.join(href).ok()?;
    let target = unwrap_redirect(&resolved).unwrap_or(resolved);
    normalize_url(target.as_str())
}

fn unwrap_redirect(url: &Url) -> Option<Url> {
    url.query_pairs()
        .filter(|(key, _)| REDIRECT_PARAMS.contains(&&**key))
        .filter_map(|(_, value)| Url::parse(&value).ok())
        .find(|target| matches!(target.scheme(), "http" | "https"))
}
