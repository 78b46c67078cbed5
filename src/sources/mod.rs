//! Search source implementations.

mod ahmia;
mod haystak;
mod torch;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use ahmia::Ahmia;
pub use haystak::Haystak;
pub use torch::Torch;

use crate::transport::TransportRequest;
use crate::{SourceAdapter, SourceConfig, SourceId};

/// Builds a GET request with the headers every HTML source receives.
pub(crate) fn html_request(url: String, config: &SourceConfig) -> TransportRequest {
    TransportRequest::get(url)
        .with_header("User-Agent", config.user_agent.clone())
        .with_header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8")
        .with_header("Accept-Language", "en-US,en;q=0.5")
}

/// Adapters keyed by source identifier.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    adapters: BTreeMap<SourceId, Arc<dyn SourceAdapter>>,
}

impl SourceRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding every built-in source.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Ahmia::new());
        registry.register(Torch::new());
        registry.register(Haystak::new());
        registry
    }

    /// Registers an adapter, replacing any adapter with the same id.
    pub fn register<A: SourceAdapter + 'static>(&mut self, adapter: A) {
        self.adapters.insert(adapter.id(), Arc::new(adapter));
    }

    /// Returns the adapter for a source.
    pub fn get(&self, id: SourceId) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(&id).cloned()
    }

    /// Returns the registered source ids in order.
    pub fn ids(&self) -> impl Iterator<Item = SourceId> + '_ {
        self.adapters.keys().copied()
    }

    /// Returns the registered adapters in id order.
    pub fn adapters(&self) -> impl Iterator<Item = &Arc<dyn SourceAdapter>> + '_ {
        self.adapters.values()
    }

    /// Returns the number of registered sources.
    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    /// Returns whether no source is registered.
    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
