//! Search result types.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{ErrorKind, SearchError, SourceId};

/// Query parameters that only identify the visitor or the campaign.
const TRACKING_PARAMS: &[&str] = &[
    "gclid",
    "gclsrc",
    "fbclid",
    "msclkid",
    "twclid",
    "mc_eid",
    "mc_cid",
    "_hsenc",
    "_hsmi",
    "ref",
    "ref_",
    "click_id",
    "campaign_id",
    "ad_id",
];

static TRACKING_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(utm_|_ga|__hs)").unwrap());

fn is_tracking_param(name: &str) -> bool {
    TRACKING_PARAMS.contains(&name) || TRACKING_PATTERN.is_match(name)
}

/// Normalizes a URL into its deduplication key.
///
/// Keeps scheme, host, non-default port, path and non-tracking query
/// parameters. Drops userinfo, fragment and the trailing slash. Returns
/// `None` for anything that is not an absolute http(s) URL.
pub fn normalize_url(raw: &str) -> Option<String> {
    let parsed = Url::parse(raw.trim()).ok()?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    let host = parsed.host_str()?;

    let mut normalized = format!("{}://{}", parsed.scheme(), host);
    if let Some(port) = parsed.port() {
        let _ = write!(normalized, ":{}", port);
    }
    normalized.push_str(parsed.path().trim_end_matches('/'));

    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| !is_tracking_param(key))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if !kept.is_empty() {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(kept)
            .finish();
        normalized.push('?');
        normalized.push_str(&query);
    }

    Some(normalized)
}

/// A single search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Source that delivered this result first.
    pub source: SourceId,
    /// Every source that returned this result.
    pub sources: BTreeSet<SourceId>,
    /// Result title.
    pub title: String,
    /// Absolute, normalized result URL.
    pub url: String,
    /// Result description/snippet.
    pub description: String,
    /// When the source page was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl SearchResult {
    /// Creates a new search result attributed to one source.
    pub fn new(
        source: SourceId,
        url: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            source,
            sources: BTreeSet::from([source]),
            title: title.into(),
            url: url.into(),
            description: description.into(),
            fetched_at,
        }
    }

    /// Returns the deduplication key for this result.
    pub fn key(&self) -> String {
        normalize_url(&self.url)
            .unwrap_or_else(|| self.url.trim().trim_end_matches('/').to_lowercase())
    }

    /// Converts the result into its exported form.
    pub fn to_record(&self) -> ExportRecord {
        ExportRecord {
            title: self.title.clone(),
            url: self.url.clone(),
            description: self.description.clone(),
            source: self.source,
            sources: self.sources.iter().copied().collect(),
            timestamp: self.fetched_at,
        }
    }
}

/// Serialized form handed to persistence collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub title: String,
    pub url: String,
    pub description: String,
    pub source: SourceId,
    pub sources: Vec<SourceId>,
    pub timestamp: DateTime<Utc>,
}

/// Stage at which a source failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorStage {
    Request,
    Parse,
}

/// A failure isolated to one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceError {
    pub source: SourceId,
    pub stage: ErrorStage,
    pub kind: ErrorKind,
    pub message: String,
}

impl SourceError {
    /// Creates a source error.
    pub fn new(
        source: SourceId,
        stage: ErrorStage,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            stage,
            kind,
            message: message.into(),
        }
    }

    /// Classifies a library error raised while serving `source`.
    pub fn from_error(source: SourceId, err: &SearchError) -> Self {
        let kind = err.kind().unwrap_or(ErrorKind::Protocol);
        let stage = match kind {
            ErrorKind::ExtractionMismatch => ErrorStage::Parse,
            _ => ErrorStage::Request,
        };
        Self::new(source, stage, kind, err.to_string())
    }
}

/// Outcome of one search invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Deduplicated results from the sources that completed.
    pub results: Vec<SearchResult>,
    /// One entry per failed source.
    pub errors: Vec<SourceError>,
    /// Search duration in milliseconds.
    pub duration_ms: u64,
}

impl SearchOutcome {
    /// Returns true if sources were queried and none produced results.
    pub fn is_total_failure(&self) -> bool {
        self.results.is_empty() && !self.errors.is_empty()
    }

    /// Returns the exported form of every result.
    pub fn records(&self) -> Vec<ExportRecord> {
        self.results.iter().map(SearchResult::to_record).collect()
    }
}
