//! Search orchestration.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};
use url::Url;

use crate::result::ErrorStage;
use crate::sources::SourceRegistry;
use crate::transport::{ProxyTransport, TransportRequest};
use crate::{
    Aggregator, ErrorKind, Result, SearchError, SearchOutcome, SearchQuery, SearchResult,
    SourceAdapter, SourceError, SourceId,
};

/// Default time budget of one source.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(30);

type Report = (SourceId, std::result::Result<Vec<SearchResult>, SourceError>);

/// Meta search over onion search sources.
///
/// Every source runs in its own task with its own deadline. A failing or
/// hanging source only produces a [`SourceError`] in the outcome.
pub struct Search {
    registry: SourceRegistry,
    transport: Arc<dyn ProxyTransport>,
    default_timeout: Duration,
}

impl Search {
    /// Creates a search with no sources.
    pub fn new(transport: Arc<dyn ProxyTransport>) -> Self {
        Self::with_registry(transport, SourceRegistry::new())
    }

    /// Creates a search over every built-in source.
    pub fn with_builtin_sources(transport: Arc<dyn ProxyTransport>) -> Self {
        Self::with_registry(transport, SourceRegistry::builtin())
    }

    /// Creates a search over the given registry.
    pub fn with_registry(transport: Arc<dyn ProxyTransport>, registry: SourceRegistry) -> Self {
        Self {
            registry,
            transport,
            default_timeout: DEFAULT_SOURCE_TIMEOUT,
        }
    }

    /// Adds a source, replacing any source with the same id.
    pub fn add_source<A: SourceAdapter + 'static>(&mut self, adapter: A) {
        self.registry.register(adapter);
    }

    /// Sets the default per-source timeout.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.default_timeout = timeout;
    }

    /// Returns the default per-source timeout.
    pub fn timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Returns the source registry.
    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    /// Returns the number of registered sources.
    pub fn source_count(&self) -> usize {
        self.registry.len()
    }

    /// Searches the query's sources with the default per-source timeout.
    pub async fn search(&self, query: SearchQuery) -> Result<SearchOutcome> {
        self.search_with_timeout(query, self.default_timeout).await
    }

    /// Searches the query's sources, bounding each source by `per_source`.
    ///
    /// Only an invalid query is an error. Source failures, including every
    /// source failing, are reported in [`SearchOutcome::errors`].
    pub async fn search_with_timeout(
        &self,
        query: SearchQuery,
        per_source: Duration,
    ) -> Result<SearchOutcome> {
        query.validate()?;

        let start = Instant::now();
        let query = Arc::new(query);
        let mut errors = Vec::new();

        let (tx, mut rx) = mpsc::unbounded_channel::<Report>();
        let mut handles = Vec::with_capacity(query.sources.len());

        for &id in &query.sources {
            let Some(adapter) = self.registry.get(id) else {
                warn!("Source {} is not registered", id);
                errors.push(SourceError::new(
                    id,
                    ErrorStage::Request,
                    ErrorKind::Protocol,
                    format!("source {} is not registered", id),
                ));
                continue;
            };
            if !adapter.is_enabled() {
                debug!("Source {} is disabled", id);
                errors.push(SourceError::new(
                    id,
                    ErrorStage::Request,
                    ErrorKind::Protocol,
                    format!("source {} is disabled", id),
                ));
                continue;
            }

            let limit = effective_timeout(adapter.config().timeout, per_source);
            let transport = Arc::clone(&self.transport);
            let query = Arc::clone(&query);
            let tx = tx.clone();

            handles.push((
                id,
                tokio::spawn(async move {
                    let attempt = query_source(&*adapter, &*transport, &query, limit);
                    let report = match timeout(limit, attempt).await {
                        Ok(Ok(results)) => Ok(results),
                        Ok(Err(e)) => Err(SourceError::from_error(id, &e)),
                        Err(_) => Err(SourceError::from_error(
                            id,
                            &SearchError::TransportTimeout(limit),
                        )),
                    };
                    let _ = tx.send((id, report));
                }),
            ));
        }
        drop(tx);

        debug!("Searching {} sources", handles.len());

        let mut aggregator = Aggregator::new();
        let mut reported = BTreeSet::new();

        while let Some((id, report)) = rx.recv().await {
            reported.insert(id);
            match report {
                Ok(results) => {
                    debug!("Source {} returned {} results", id, results.len());
                    aggregator.add(results);
                }
                Err(error) => {
                    warn!("Source {} failed: {}", id, error.message);
                    errors.push(error);
                }
            }
        }

        // Every sender is gone, so every task has finished or panicked.
        let (ids, silent): (Vec<_>, Vec<_>) = handles
            .into_iter()
            .filter(|(id, _)| !reported.contains(id))
            .unzip();
        for (id, joined) in ids.into_iter().zip(join_all(silent).await) {
            let message = match joined {
                Err(e) if e.is_panic() => format!("source {} task panicked", id),
                _ => format!("source {} task ended without reporting", id),
            };
            warn!("{}", message);
            errors.push(SourceError::new(
                id,
                ErrorStage::Request,
                ErrorKind::Protocol,
                message,
            ));
        }

        errors.sort_by_key(|e| e.source);

        Ok(SearchOutcome {
            results: aggregator.finish(),
            errors,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Applies the adapter's own timeout, where zero defers to the search.
fn effective_timeout(adapter_secs: u64, per_source: Duration) -> Duration {
    if adapter_secs == 0 {
        per_source
    } else {
        per_source.min(Duration::from_secs(adapter_secs))
    }
}

/// Tries the adapter's mirrors in order until one yields results.
///
/// Each mirror gets an even share of what is left of `limit`, so a hanging
/// mirror cannot starve the ones after it.
async fn query_source(
    adapter: &dyn SourceAdapter,
    transport: &dyn ProxyTransport,
    query: &SearchQuery,
    limit: Duration,
) -> Result<Vec<SearchResult>> {
    let started = Instant::now();
    let requests = adapter.build_requests(query)?;
    let mut last_error = None;

    for (index, request) in requests.iter().enumerate() {
        let mirrors_left = (requests.len() - index) as u32;
        let share = limit.saturating_sub(started.elapsed()) / mirrors_left;
        let attempt = timeout(share, fetch(adapter, transport, request, share)).await;
        match attempt.unwrap_or(Err(SearchError::TransportTimeout(share))) {
            Ok(results) => return Ok(results),
            Err(e) => {
                debug!("{} mirror {} failed: {}", adapter.name(), request.url, e);
                last_error = Some(e);
            }
        }
    }

    Err(last_error
        .unwrap_or_else(|| SearchError::Protocol(format!("{} built no requests", adapter.name()))))
}

async fn fetch(
    adapter: &dyn SourceAdapter,
    transport: &dyn ProxyTransport,
    request: &TransportRequest,
    limit: Duration,
) -> Result<Vec<SearchResult>> {
    let base_url = Url::parse(&request.url)?;
    let response = transport.request(request, limit).await?;

    if !response.is_success() {
        return Err(SearchError::Protocol(format!(
            "HTTP {} from {}",
            response.status, request.url
        )));
    }

    adapter.extract_results(&response.body, &base_url, Utc::now())
}
