//! Configuration loaded from a JSON file.
//!
//! Every field has a default, so an empty object (or no file at all) yields
//! a working setup against a local Tor daemon.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit::ControlConfig;
use crate::health::HealthConfig;
use crate::source::DEFAULT_USER_AGENT;
use crate::sources::{Ahmia, Haystak, SourceRegistry, Torch};
use crate::transport::{ProxyEndpoint, SocksTransport};
use crate::{Result, SearchError, SourceAdapter, SourceConfig, SourceId};

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub proxy: ProxySettings,
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub search: SearchSettings,
}

/// SOCKS proxy address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    #[serde(default = "default_proxy_host")]
    pub host: String,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
}

fn default_proxy_host() -> String {
    "127.0.0.1".to_string()
}

fn default_proxy_port() -> u16 {
    9050
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            host: default_proxy_host(),
            port: default_proxy_port(),
        }
    }
}

impl ProxySettings {
    pub fn endpoint(&self) -> ProxyEndpoint {
        ProxyEndpoint::new(self.host.clone(), self.port)
    }
}

/// Search defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Per-source timeout in seconds.
    #[serde(default = "default_search_timeout")]
    pub timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Sources queried when none are named.
    #[serde(default = "default_sources")]
    pub sources: BTreeSet<SourceId>,
    /// Skip Ahmia's clearnet address.
    #[serde(default)]
    pub ahmia_onion_only: bool,
}

fn default_search_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_sources() -> BTreeSet<SourceId> {
    SourceId::ALL.into_iter().collect()
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            timeout: default_search_timeout(),
            user_agent: default_user_agent(),
            sources: default_sources(),
            ahmia_onion_only: false,
        }
    }
}

impl Settings {
    /// Parses settings from JSON.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let settings: Self = serde_json::from_str(json)
            .map_err(|e| SearchError::Config(format!("invalid settings: {}", e)))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Loads settings from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            SearchError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    /// Rejects values that would make every operation fail.
    pub fn validate(&self) -> Result<()> {
        if self.proxy.port == 0 {
            return Err(SearchError::Config("proxy.port must not be 0".into()));
        }
        if self.control.port == 0 {
            return Err(SearchError::Config("control.port must not be 0".into()));
        }
        if self.search.timeout == 0 {
            return Err(SearchError::Config("search.timeout must be positive".into()));
        }
        if self.health.probe_timeout == 0 || self.health.confirm_timeout == 0 {
            return Err(SearchError::Config("health timeouts must be positive".into()));
        }
        Ok(())
    }

    /// Returns the per-source search timeout.
    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search.timeout)
    }

    /// Builds the SOCKS transport for the configured proxy.
    pub fn transport(&self) -> Result<SocksTransport> {
        SocksTransport::new(self.proxy.endpoint(), &self.search.user_agent)
    }

    /// Builds the built-in sources with the configured user agent.
    pub fn registry(&self) -> SourceRegistry {
        let with_agent = |config: &SourceConfig| SourceConfig {
            user_agent: self.search.user_agent.clone(),
            ..config.clone()
        };

        let ahmia = Ahmia::new();
        let ahmia_config = with_agent(ahmia.config());
        let mut ahmia = ahmia.with_config(ahmia_config);
        if self.search.ahmia_onion_only {
            ahmia = ahmia.onion_only();
        }

        let torch = Torch::new();
        let torch_config = with_agent(torch.config());
        let haystak = Haystak::new();
        let haystak_config = with_agent(haystak.config());

        let mut registry = SourceRegistry::new();
        registry.register(ahmia);
        registry.register(torch.with_config(torch_config));
        registry.register(haystak.with_config(haystak_config));
        registry
    }
}
