//! Haystak search source.

use crate::extract::ExtractionStrategy;
use crate::sources::html_request;
use crate::transport::TransportRequest;
use crate::{Result, SearchQuery, SourceAdapter, SourceConfig, SourceId};

const SEARCH_URL: &str =
    "http://haystak5njsmn2hqkewecpaxetahtwhsbsa64jom2k22z5afxhnpxfid.onion/";

/// Haystak onion search engine.
pub struct Haystak {
    config: SourceConfig,
    strategies: Vec<ExtractionStrategy>,
}

impl Haystak {
    /// Creates a new Haystak source.
    pub fn new() -> Self {
        Self {
            config: SourceConfig {
                name: "Haystak".to_string(),
                shortcut: "hay".to_string(),
                timeout: 45,
                ..Default::default()
            },
            strategies: vec![
                ExtractionStrategy::Blocks {
                    name: "haystak-results",
                    container: "div.result",
                    title: &["h3 a", "h3", "a"],
                    link: &["h3 a[href]", "a[href]"],
                    description: &["p", ".description"],
                },
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

impl Default for Haystak {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceAdapter for Haystak {
    fn id(&self) -> SourceId {
        SourceId::Haystak
    }

    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn build_request(&self, query: &SearchQuery) -> Result<TransportRequest> {
        let url = format!("{}?q={}", SEARCH_URL, urlencoding::encode(query.terms()));
        Ok(html_request(url, &self.config))
    }

    fn strategies(&self) -> &[ExtractionStrategy] {
        &self.strategies
    }
}
