//! # onion-search
//!
//! Meta search across onion search engines, reached through a Tor SOCKS
//! proxy, with health and circuit introspection of that proxy.
//!
//! - Concurrent fan-out with per-source timeouts and failure isolation
//! - Result extraction with ordered fallback strategies
//! - Deduplication by normalized URL
//! - Proxy health checks and control-port circuit listing
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use onion_search::transport::{ProxyEndpoint, SocksTransport};
//! use onion_search::{Search, SearchQuery, SourceId, DEFAULT_USER_AGENT};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let transport = SocksTransport::new(ProxyEndpoint::default(), DEFAULT_USER_AGENT)?;
//!     let search = Search::with_builtin_sources(Arc::new(transport));
//!
//!     let query = SearchQuery::new("hidden wiki", [SourceId::Ahmia, SourceId::Torch]);
//!     let outcome = search.search(query).await?;
//!
//!     for result in &outcome.results {
//!         println!("{}: {}", result.title, result.url);
//!     }
//!     for error in &outcome.errors {
//!         eprintln!("{} failed: {}", error.source, error.message);
//!     }
//!     Ok(())
//! }
//! ```

mod aggregator;
mod error;
mod query;
mod result;
mod search;
mod source;

pub mod circuit;
pub mod config;
pub mod extract;
pub mod health;
pub mod sources;
pub mod transport;

pub use aggregator::Aggregator;
pub use circuit::{CircuitInspector, CircuitPath, ControlConfig, RelayNode};
pub use config::Settings;
pub use error::{ErrorKind, Result, SearchError};
pub use health::{ConnectionStatus, HealthConfig, HealthFailure, HealthMonitor, HealthState};
pub use query::SearchQuery;
pub use result::{
    normalize_url, ErrorStage, ExportRecord, SearchOutcome, SearchResult, SourceError,
};
pub use search::{Search, DEFAULT_SOURCE_TIMEOUT};
pub use source::{SourceAdapter, SourceConfig, SourceId, DEFAULT_USER_AGENT};
pub use transport::ProxyTransport;
