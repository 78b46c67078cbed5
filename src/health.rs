//! Connection health monitoring for the Tor proxy.
//!
//! A check first opens a raw connection through the proxy, then asks an echo
//! endpoint whether the request really left through the anonymizing network.
//! The last result is cached and can be refreshed on demand or by a
//! background loop.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::transport::{ProxyTransport, TransportRequest};

/// Shortest period accepted by [`HealthMonitor::spawn_periodic`].
pub const MIN_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Why a health check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthFailure {
    /// The proxy refused the connection or could not reach the probe target.
    ProxyUnreachable,
    /// A check step exceeded its deadline.
    Timeout,
    /// The echo endpoint saw a non-anonymized request.
    NotAnonymized,
    /// The echo endpoint answered with an error or an unreadable body.
    EchoFailed,
}

impl fmt::Display for HealthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::ProxyUnreachable => "proxy unreachable",
            Self::Timeout => "timed out",
            Self::NotAnonymized => "traffic is not anonymized",
            Self::EchoFailed => "echo endpoint failed",
        };
        f.write_str(text)
    }
}

/// Monitor state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "failure")]
pub enum HealthState {
    #[default]
    Unknown,
    Probing,
    Healthy,
    Unhealthy(HealthFailure),
}

/// Result of the latest health check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    /// Exit address reported by the echo endpoint.
    pub exit_address: Option<String>,
    /// Time taken to open the probe connection.
    pub latency_millis: Option<u64>,
    pub checked_at: DateTime<Utc>,
    pub failure: Option<HealthFailure>,
    /// Country of the exit address, when geolocation is enabled.
    pub location: Option<String>,
}

impl ConnectionStatus {
    fn failed(failure: HealthFailure, latency_millis: Option<u64>) -> Self {
        Self {
            connected: false,
            exit_address: None,
            latency_millis,
            checked_at: Utc::now(),
            failure: Some(failure),
            location: None,
        }
    }

    /// Returns true once the status is older than `ttl`.
    pub fn is_stale(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.checked_at);
        age.to_std().map(|age| age >= ttl).unwrap_or(false)
    }

    /// Returns the monitor state this status corresponds to.
    pub fn state(&self) -> HealthState {
        match self.failure {
            Some(failure) => HealthState::Unhealthy(failure),
            None if self.connected => HealthState::Healthy,
            None => HealthState::Unknown,
        }
    }
}

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Host reached through the proxy by the raw probe.
    #[serde(default = "default_probe_host")]
    pub probe_host: String,
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,
    /// Probe timeout in seconds.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout: u64,
    /// Endpoint answering `{"IsTor": bool, "IP": string}`.
    #[serde(default = "default_echo_url")]
    pub echo_url: String,
    /// Echo request timeout in seconds.
    #[serde(default = "default_confirm_timeout")]
    pub confirm_timeout: u64,
    /// Seconds a status stays fresh.
    #[serde(default = "default_ttl")]
    pub ttl: u64,
    /// Look up the exit country after a successful check.
    #[serde(default)]
    pub geolocate: bool,
    /// Geolocation URL; `{ip}` is replaced with the exit address.
    #[serde(default = "default_geolocate_url")]
    pub geolocate_url: String,
}

fn default_probe_host() -> String {
    "check.torproject.org".to_string()
}

fn default_probe_port() -> u16 {
    443
}

fn default_probe_timeout() -> u64 {
    10
}

fn default_echo_url() -> String {
    "https://check.torproject.org/api/ip".to_string()
}

fn default_confirm_timeout() -> u64 {
    30
}

fn default_ttl() -> u64 {
    60
}

fn default_geolocate_url() -> String {
    "https://ipapi.co/{ip}/country_name/".to_string()
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_host: default_probe_host(),
            probe_port: default_probe_port(),
            probe_timeout: default_probe_timeout(),
            echo_url: default_echo_url(),
            confirm_timeout: default_confirm_timeout(),
            ttl: default_ttl(),
            geolocate: false,
            geolocate_url: default_geolocate_url(),
        }
    }
}

impl HealthConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout)
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

#[derive(Deserialize)]
struct EchoReply {
    #[serde(rename = "IsTor")]
    is_tor: bool,
    #[serde(rename = "IP", default)]
    ip: Option<String>,
}

#[derive(Default)]
struct Snapshot {
    state: HealthState,
    status: Option<ConnectionStatus>,
}

/// Tracks whether the proxy is usable and anonymizing.
///
/// Checks are serialized: one writer at a time updates the cached status,
/// readers always get a cloned snapshot.
pub struct HealthMonitor {
    transport: Arc<dyn ProxyTransport>,
    config: HealthConfig,
    writer: Mutex<()>,
    snapshot: RwLock<Snapshot>,
}

impl HealthMonitor {
    /// Creates a monitor. No check runs until one is requested.
    pub fn new(transport: Arc<dyn ProxyTransport>, config: HealthConfig) -> Self {
        Self {
            transport,
            config,
            writer: Mutex::new(()),
            snapshot: RwLock::new(Snapshot::default()),
        }
    }

    /// Returns the monitor configuration.
    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    /// Returns the current state.
    ///
    /// A check abandoned by its caller leaves `Probing` behind; once no check
    /// holds the writer gate the state falls back to the last finished result.
    pub async fn state(&self) -> HealthState {
        let snapshot = self.snapshot.read().await;
        if snapshot.state != HealthState::Probing || self.writer.try_lock().is_err() {
            return snapshot.state;
        }
        snapshot
            .status
            .as_ref()
            .map(ConnectionStatus::state)
            .unwrap_or_default()
    }

    /// Returns the last status without probing.
    pub async fn cached_status(&self) -> Option<ConnectionStatus> {
        self.snapshot.read().await.status.clone()
    }

    /// Runs a full check and caches the result.
    pub async fn check_now(&self) -> ConnectionStatus {
        let _writer = self.writer.lock().await;
        self.check_locked().await
    }

    /// Returns the cached status, checking first if it is missing or stale.
    pub async fn current_status(&self) -> ConnectionStatus {
        if let Some(status) = self.fresh_status().await {
            return status;
        }

        let _writer = self.writer.lock().await;
        // another caller may have refreshed it while we waited
        if let Some(status) = self.fresh_status().await {
            return status;
        }
        self.check_locked().await
    }

    /// Starts a background loop that checks every `every` until `shutdown`
    /// becomes true. Periods below [`MIN_CHECK_INTERVAL`] are raised to it.
    pub fn spawn_periodic(
        self: Arc<Self>,
        every: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let every = every.max(MIN_CHECK_INTERVAL);
            info!("Starting health monitor with {:?} interval", every);

            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let status = self.check_now().await;
                        debug!("Periodic health check: connected={}", status.connected);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("Health monitor shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }

    async fn fresh_status(&self) -> Option<ConnectionStatus> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .status
            .as_ref()
            .filter(|status| !status.is_stale(self.config.ttl()))
            .cloned()
    }

    async fn check_locked(&self) -> ConnectionStatus {
        self.snapshot.write().await.state = HealthState::Probing;

        let status = self.run_check().await;
        match status.failure {
            Some(failure) => warn!("Proxy health check failed: {}", failure),
            None => debug!(
                "Proxy healthy, exit {:?}, latency {:?} ms",
                status.exit_address, status.latency_millis
            ),
        }

        let mut snapshot = self.snapshot.write().await;
        snapshot.state = status.state();
        snapshot.status = Some(status.clone());
        status
    }

    async fn run_check(&self) -> ConnectionStatus {
        let probe_timeout = self.config.probe_timeout();
        let started = Instant::now();

        let probe = self
            .transport
            .probe(&self.config.probe_host, self.config.probe_port, probe_timeout);
        match timeout(probe_timeout, probe).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) if e.is_timeout() => {
                return ConnectionStatus::failed(HealthFailure::Timeout, None);
            }
            Ok(Err(e)) => {
                debug!("Probe through proxy failed: {}", e);
                return ConnectionStatus::failed(HealthFailure::ProxyUnreachable, None);
            }
            Err(_) => return ConnectionStatus::failed(HealthFailure::Timeout, None),
        }
        let latency = Some(started.elapsed().as_millis() as u64);

        let reply = match self.confirm().await {
            Ok(reply) => reply,
            Err(failure) => return ConnectionStatus::failed(failure, latency),
        };

        if !reply.is_tor {
            let mut status = ConnectionStatus::failed(HealthFailure::NotAnonymized, latency);
            status.exit_address = reply.ip;
            return status;
        }

        let location = match (&reply.ip, self.config.geolocate) {
            (Some(ip), true) => self.geolocate(ip).await,
            _ => None,
        };

        ConnectionStatus {
            connected: true,
            exit_address: reply.ip,
            latency_millis: latency,
            checked_at: Utc::now(),
            failure: None,
            location,
        }
    }

    async fn confirm(&self) -> std::result::Result<EchoReply, HealthFailure> {
        let confirm_timeout = self.config.confirm_timeout();
        let request =
            TransportRequest::get(&self.config.echo_url).with_header("Accept", "application/json");

        let exchange = self.transport.request(&request, confirm_timeout);
        let response = match timeout(confirm_timeout, exchange).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) if e.is_timeout() => return Err(HealthFailure::Timeout),
            Ok(Err(e)) => {
                debug!("Echo request failed: {}", e);
                return Err(HealthFailure::EchoFailed);
            }
            Err(_) => return Err(HealthFailure::Timeout),
        };

        if !response.is_success() {
            debug!("Echo endpoint returned HTTP {}", response.status);
            return Err(HealthFailure::EchoFailed);
        }

        serde_json::from_str(&response.body).map_err(|e| {
            debug!("Echo endpoint returned an unreadable body: {}", e);
            HealthFailure::EchoFailed
        })
    }

    async fn geolocate(&self, ip: &str) -> Option<String> {
        let deadline = self.config.confirm_timeout();
        let request = TransportRequest::get(self.config.geolocate_url.replace("{ip}", ip));

        match timeout(deadline, self.transport.request(&request, deadline)).await {
            Ok(Ok(response)) if response.is_success() => {
                let country = response.body.trim();
                (!country.is_empty()).then(|| country.to_string())
            }
            Ok(Ok(response)) => {
                warn!("Geolocation of {} returned HTTP {}", ip, response.status);
                None
            }
            Ok(Err(e)) => {
                warn!("Geolocation of {} failed: {}", ip, e);
                None
            }
            Err(_) => {
                warn!("Geolocation of {} timed out", ip);
                None
            }
        }
    }
}

/// Owns the shutdown signal of a periodic monitor.
pub struct HealthMonitorHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl HealthMonitorHandle {
    pub fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { shutdown_tx: tx }, rx)
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Default for HealthMonitorHandle {
    fn default() -> Self {
        Self::new().0
    }
}
