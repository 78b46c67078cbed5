//! Search source trait and configuration.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::extract::{self, ExtractionStrategy};
use crate::transport::TransportRequest;
use crate::{Result, SearchError, SearchQuery, SearchResult};

/// User agent sent by every built-in source.
///
/// Matches the Tor Browser so sources serve the same markup they serve to
/// ordinary visitors.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; rv:128.0) Gecko/20100101 Firefox/128.0";

/// Identifier of a supported search source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Ahmia,
    Torch,
    Haystak,
}

impl SourceId {
    /// Every source known at build time.
    pub const ALL: [SourceId; 3] = [SourceId::Ahmia, SourceId::Torch, SourceId::Haystak];

    /// Returns the lowercase identifier.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ahmia => "ahmia",
            Self::Torch => "torch",
            Self::Haystak => "haystak",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceId {
    type Err = SearchError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ahmia" | "ah" => Ok(Self::Ahmia),
            "torch" | "tor" => Ok(Self::Torch),
            "haystak" | "hay" => Ok(Self::Haystak),
            other => Err(SearchError::Config(format!("unknown source '{}'", other))),
        }
    }
}

/// Configuration for a search source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Display name of the source.
    pub name: String,
    /// Short identifier (e.g., "ah" for Ahmia).
    pub shortcut: String,
    /// Request timeout in seconds. Zero defers to the search-wide timeout.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Whether the source is enabled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout() -> u64 {
    30
}

fn default_enabled() -> bool {
    true
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            shortcut: String::new(),
            timeout: default_timeout(),
            enabled: true,
            user_agent: default_user_agent(),
        }
    }
}

/// Trait for implementing search sources.
///
/// A source only knows how to address its engine and how to read the
/// markup it returns. All network I/O goes through the transport owned by
/// [`crate::Search`].
pub trait SourceAdapter: Send + Sync {
    /// Returns the source identifier.
    fn id(&self) -> SourceId;

    /// Returns the source configuration.
    fn config(&self) -> &SourceConfig;

    /// Builds the primary request for a query.
    fn build_request(&self, query: &SearchQuery) -> Result<TransportRequest>;

    /// Builds every request to try for a query, in order.
    ///
    /// Sources with mirrors override this; the first mirror that yields
    /// results ends the attempt.
    fn build_requests(&self, query: &SearchQuery) -> Result<Vec<TransportRequest>> {
        Ok(vec![self.build_request(query)?])
    }

    /// Ordered extraction strategies, most specific first.
    fn strategies(&self) -> &[ExtractionStrategy];

    /// Suffix the host of every extracted result URL must end with.
    fn result_host_suffix(&self) -> &str {
        ".onion"
    }

    /// Extracts results using the first strategy that yields a complete result.
    fn extract_results(
        &self,
        body: &str,
        base_url: &Url,
        fetched_at: DateTime<Utc>,
    ) -> Result<Vec<SearchResult>> {
        extract::first_match(
            self.strategies(),
            body,
            base_url,
            self.result_host_suffix(),
        )
        .map(|(_, hits)| {
            hits.into_iter()
                .map(|hit| hit.into_result(self.id(), fetched_at))
                .collect()
        })
        .ok_or_else(|| SearchError::ExtractionMismatch(self.name().to_string()))
    }

    /// Returns the source name.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Returns the source shortcut.
    fn shortcut(&self) -> &str {
        &self.config().shortcut
    }

    /// Returns whether the source is enabled.
    fn is_enabled(&self) -> bool {
        self.config().enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_id_from_str() {
        assert_eq!("ahmia".parse::<SourceId>().unwrap(), SourceId::Ahmia);
        assert_eq!("AH".parse::<SourceId>().unwrap(), SourceId::Ahmia);
        assert_eq!(" torch ".parse::<SourceId>().unwrap(), SourceId::Torch);
        assert_eq!("hay".parse::<SourceId>().unwrap(), SourceId::Haystak);
        assert!("google".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_source_id_display_round_trips() {
        for id in SourceId::ALL {
            assert_eq!(id.to_string().parse::<SourceId>().unwrap(), id);
        }
    }

    #[test]
    fn test_source_id_serialization() {
        let json = serde_json::to_string(&SourceId::Haystak).unwrap();
        assert_eq!(json, "\"haystak\"");
        let id: SourceId = serde_json::from_str("\"torch\"").unwrap();
        assert_eq!(id, SourceId::Torch);
    }

    #[test]
    fn test_source_config_default() {
        let config = SourceConfig::default();
        assert_eq!(config.name, "");
        assert_eq!(config.timeout, 30);
        assert!(config.enabled);
        assert_eq!(config.user_agent, DEFAULT_USER_AGENT);
    }

    #[test]
    fn test_source_config_deserialization() {
        let json = r#"{"name":"Test","shortcut":"t"}"#;
        let config: SourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.name, "Test");
        assert_eq!(config.timeout, 30); // default
        assert!(config.enabled); // default
    }

    struct StaticSource {
        config: SourceConfig,
        strategies: Vec<ExtractionStrategy>,
    }

    impl SourceAdapter for StaticSource {
        fn id(&self) -> SourceId {
            SourceId::Torch
        }

        fn config(&self) -> &SourceConfig {
            &self.config
        }

        fn build_request(&self, query: &SearchQuery) -> Result<TransportRequest> {
            Ok(TransportRequest::get(format!(
                "http://static.onion/?q={}",
                urlencoding::encode(&query.text)
            )))
        }

        fn strategies(&self) -> &[ExtractionStrategy] {
            &self.strategies
        }
    }

    fn static_source() -> StaticSource {
        StaticSource {
            config: SourceConfig {
                name: "Static".to_string(),
                shortcut: "st".to_string(),
                ..Default::default()
            },
            strategies: vec![ExtractionStrategy::generic_result_blocks()],
        }
    }

    #[test]
    fn test_default_build_requests_wraps_primary() {
        let source = static_source();
        let query = SearchQuery::new("a b", [SourceId::Torch]);
        let requests = source.build_requests(&query).unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].url, "http://static.onion/?q=a%20b");
    }

    #[test]
    fn test_extract_results_mismatch() {
        let source = static_source();
        let base = Url::parse("http://static.onion/").unwrap();
        let err = source
            .extract_results("<html><body><p>nothing</p></body></html>", &base, Utc::now())
            .unwrap_err();
        assert!(matches!(err, SearchError::ExtractionMismatch(name) if name == "Static"));
    }

    #[test]
    fn test_extract_results_tags_source() {
        let source = static_source();
        let base = Url::parse("http://static.onion/").unwrap();
        let html = r#"<div class="result"><h4>Title</h4><a href="http://a.onion/x">x</a></div>"#;
        let results = source.extract_results(html, &base, Utc::now()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].source, SourceId::Torch);
        assert!(results[0].sources.contains(&SourceId::Torch));
    }

    #[test]
    fn test_extract_results_is_idempotent() {
        let source = static_source();
        let base = Url::parse("http://static.onion/").unwrap();
        let fetched_at = Utc::now();
        let html = r#"
            <div class="result"><h4>One</h4><a href="http://one.onion/">1</a><p>first</p></div>
            <div class="result"><h4>Two</h4><a href="/relative">2</a><p>second</p></div>
        "#;
        let first = source.extract_results(html, &base, fetched_at).unwrap();
        let second = source.extract_results(html, &base, fetched_at).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn test_default_host_suffix() {
        assert_eq!(static_source().result_host_suffix(), ".onion");
    }
}
