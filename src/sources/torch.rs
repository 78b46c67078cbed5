//! Torch search source.

use crate::extract::ExtractionStrategy;
use crate::sources::html_request;
use crate::transport::TransportRequest;
use crate::{Result, SearchQuery, SourceAdapter, SourceConfig, SourceId};

const SEARCH_URL: &str =
    "http://torchdeedp3i2jigzjdmfpn5ttjhthh5wbmda2rr3jvqjg5p77c54dqd.onion/search";

/// Torch, one of the oldest onion-only search engines.
pub struct Torch {
    config: SourceConfig,
    strategies: Vec<ExtractionStrategy>,
}

impl Torch {
    /// Creates a new Torch source.
    pub fn new() -> Self {
        Self {
            config: SourceConfig {
                name: "Torch".to_string(),
                shortcut: "tor".to_string(),
                timeout: 45,
                ..Default::default()
            },
            strategies: vec![
                ExtractionStrategy::Blocks {
                    name: "torch-result-blocks",
                    container: "div.result",
                    title: &["h5 a", "h5", "h4"],
                    link: &["h5 a[href]", "a[href]"],
                    description: &["p", ".description"],
                },
                ExtractionStrategy::definition_list(),
                ExtractionStrategy::generic_result_blocks(),
                ExtractionStrategy::class_contains_result(),
            ],
        }
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }
}

impl Default for Torch {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceAdapter for Torch {
    fn id(&self) -> SourceId {
        SourceId::Torch
    }

    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn build_request(&self, query: &SearchQuery) -> Result<TransportRequest> {
        let url = format!(
            "{}?query={}&action=search",
            SEARCH_URL,
            urlencoding::encode(query.terms())
        );
        Ok(html_request(url, &self.config))
    }

    fn strategies(&self) -> &[ExtractionStrategy] {
        &self.strategies
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use url::Url;

    use super::*;
    use crate::SearchError;

    fn base() -> Url {
        Url::parse(SEARCH_URL).unwrap()
    }

    #[test]
    fn test_torch_new() {
        let source = Torch::new();
        assert_eq!(source.config.name, "Torch");
        assert_eq!(source.config.shortcut, "tor");
        assert_eq!(source.config.timeout, 45);
        assert_eq!(source.id(), SourceId::Torch);
        assert_eq!(source.strategies().len(), 4);
    }

    #[test]
    fn test_build_request() {
        let query = SearchQuery::new("drug & markets", [SourceId::Torch]);
        let request = Torch::new().build_request(&query).unwrap();
        assert!(request.url.ends_with("/search?query=drug%20%26%20markets&action=search"));
        assert!(request.url.starts_with("http://torch"));
    }

    #[test]
    fn test_single_mirror() {
        let query = SearchQuery::new("x", [SourceId::Torch]);
        assert_eq!(Torch::new().build_requests(&query).unwrap().len(), 1);
    }

    #[test]
    fn test_extract_result_blocks() {
        let html = r#"
            <div class="result">
              <h5><a href="http://dddd.onion/shop">Shop Listing</a></h5>
              <p>Everything you need</p>
              <cite>dddd.onion</cite>
            </div>
            <div class="result">
              <h5><a href="/search?query=x&page=2">Next page</a></h5>
            </div>
        "#;
        let results = Torch::new().extract_results(html, &base(), Utc::now()).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "Shop Listing");
        assert_eq!(results[0].description, "Everything you need");
        // relative links resolve onto the engine's own onion host
        assert!(results[1].url.starts_with("http://torchdeed"));
    }

    #[test]
    fn test_extract_definition_list_layout() {
        let html = r#"
            <dl>
              <dt><a href="http://eeee.onion/">Legacy Layout</a></dt>
              <dd>Old-style listing</dd>
            </dl>
        "#;
        let results = Torch::new().extract_results(html, &base(), Utc::now()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Legacy Layout");
        assert_eq!(results[0].description, "Old-style listing");
    }

    #[test]
    fn test_extract_unexpected_markup() {
        let err = Torch::new()
            .extract_results("<table><tr><td>maintenance</td></tr></table>", &base(), Utc::now())
            .unwrap_err();
        assert!(matches!(err, SearchError::ExtractionMismatch(name) if name == "Torch"));
    }
}
