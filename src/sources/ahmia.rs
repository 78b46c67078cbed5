//! Ahmia search source.

use crate::extract::ExtractionStrategy;
use crate::sources::html_request;
use crate::transport::TransportRequest;
use crate::{Result, SearchQuery, SourceAdapter, SourceConfig, SourceId};

const CLEARNET_URL: &str = "https://ahmia.fi/search/";
const ONION_URL: &str =
    "http://juhanurmihxlp77nkq76byazcldy2hlmovfu2epvl5ankdibsot4csyd.onion/search/";

/// Ahmia, an index of onion services with a clearnet front-end.
///
/// The clearnet address is tried first and the onion address second.
pub struct Ahmia {
    config: SourceConfig,
    strategies: Vec<ExtractionStrategy>,
    onion_only: bool,
}

impl Ahmia {
    /// Creates a new Ahmia source.
    pub fn new() -> Self {
        Self {
            config: SourceConfig {
                name: "Ahmia".to_string(),
                shortcut: "ah".to_string(),
                timeout: 30,
                ..Default::default()
            },
            strategies: vec![
                ExtractionStrategy::Blocks {
                    name: "ahmia-result-list",
                    container: "li.result",
                    title: &["h4 a", "h4"],
                    link: &["h4 a[href]", "a[href]"],
                    description: &["p:not(.urlinfo)"],
                },
                ExtractionStrategy::generic_result_blocks(),
                ExtractionStrategy::class_contains_result(),
            ],
            onion_only: false,
        }
    }

    /// Skips the clearnet mirror.
    pub fn onion_only(mut self) -> Self {
        self.onion_only = true;
        self
    }

    /// Creates with custom configuration.
    pub fn with_config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }

    fn request_for(&self, base: &str, query: &SearchQuery) -> TransportRequest {
        let url = format!("{}?q={}", base, urlencoding::encode(query.terms()));
        html_request(url, &self.config)
    }
}

impl Default for Ahmia {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceAdapter for Ahmia {
    fn id(&self) -> SourceId {
        SourceId::Ahmia
    }

    fn config(&self) -> &SourceConfig {
        &self.config
    }

    fn build_request(&self, query: &SearchQuery) -> Result<TransportRequest> {
        let base = if self.onion_only { ONION_URL } else { CLEARNET_URL };
        Ok(self.request_for(base, query))
    }

    fn build_requests(&self, query: &SearchQuery) -> Result<Vec<TransportRequest>> {
        let mut requests = Vec::with_capacity(2);
        if !self.onion_only {
            requests.push(self.request_for(CLEARNET_URL, query));
        }
        requests.push(self.request_for(ONION_URL, query));
        Ok(requests)
    }

    fn strategies(&self) -> &[ExtractionStrategy] {
        &self.strategies
    }
}
