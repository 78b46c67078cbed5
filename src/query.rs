//! Search query representation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{Result, SearchError, SourceId};

/// A search query and the sources it is dispatched to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// The search terms.
    pub text: String,
    /// Sources to query.
    pub sources: BTreeSet<SourceId>,
}

impl SearchQuery {
    /// Creates a new search query for the given sources.
    pub fn new(text: impl Into<String>, sources: impl IntoIterator<Item = SourceId>) -> Self {
        Self {
            text: text.into(),
            sources: sources.into_iter().collect(),
        }
    }

    /// Creates a query dispatched to every known source.
    pub fn all_sources(text: impl Into<String>) -> Self {
        Self::new(text, SourceId::ALL)
    }

    /// Adds a source.
    pub fn with_source(mut self, source: SourceId) -> Self {
        self.sources.insert(source);
        self
    }

    /// Returns the trimmed search terms.
    pub fn terms(&self) -> &str {
        self.text.trim()
    }

    /// Rejects queries that cannot be dispatched.
    pub fn validate(&self) -> Result<()> {
        if self.terms().is_empty() {
            return Err(SearchError::InvalidQuery("Query cannot be empty".into()));
        }
        if self.sources.is_empty() {
            return Err(SearchError::NoSources);
        }
        Ok(())
    }
}
