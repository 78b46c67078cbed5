//! Proxied network transport.
//!
//! Every outbound request of the library goes through a [`ProxyTransport`].
//! Components receive the transport explicitly, so nothing in the process
//! is rerouted behind their back and tests can substitute a fake.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Proxy as ReqwestProxy};
use tokio::time::timeout;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::{Result, SearchError};

/// HTTP method of a transport request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
}

/// A request to send through the proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl TransportRequest {
    /// Creates a GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    /// Creates a POST request with a form-encoded body.
    pub fn post_form(url: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![(
                "Content-Type".to_string(),
                "application/x-www-form-urlencoded".to_string(),
            )],
            body: Some(body.into()),
        }
    }

    /// Adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns the value of a header, matching the name case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    /// Returns true for 2xx statuses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network access routed through a single proxy endpoint.
///
/// Implementations must be safe to share between concurrent tasks.
#[async_trait]
pub trait ProxyTransport: Send + Sync {
    /// Sends a request and returns its status and body.
    async fn request(
        &self,
        request: &TransportRequest,
        timeout: Duration,
    ) -> Result<TransportResponse>;

    /// Opens a raw connection to `host:port` through the proxy, without
    /// speaking HTTP.
    async fn probe(&self, host: &str, port: u16, timeout: Duration) -> Result<()>;

    /// Boolean view of [`ProxyTransport::probe`].
    async fn is_reachable(&self, host: &str, port: u16, timeout: Duration) -> bool {
        self.probe(host, port, timeout).await.is_ok()
    }
}

/// Address of a SOCKS5 proxy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyEndpoint {
    /// Proxy host (IP or domain)
    pub host: String,
    /// Proxy port
    pub port: u16,
}

impl ProxyEndpoint {
    /// Creates a new proxy endpoint.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the proxy URL with remote hostname resolution.
    ///
    /// `socks5h` makes the proxy resolve names, which `.onion` hosts need.
    pub fn url(&self) -> String {
        format!("socks5h://{}:{}", self.host, self.port)
    }
}

impl Default for ProxyEndpoint {
    fn default() -> Self {
        Self::new("127.0.0.1", 9050)
    }
}

/// Transport backed by a Tor SOCKS5 port.
///
/// HTTP requests share one pooled reqwest client; probes open a fresh
/// SOCKS5 stream each time.
pub struct SocksTransport {
    endpoint: ProxyEndpoint,
    client: Client,
}

impl SocksTransport {
    /// Creates a transport for the given proxy endpoint.
    pub fn new(endpoint: ProxyEndpoint, user_agent: &str) -> Result<Self> {
        let proxy = ReqwestProxy::all(endpoint.url())
            .map_err(|e| SearchError::Config(format!("Failed to create proxy: {}", e)))?;

        let client = Client::builder()
            .user_agent(user_agent)
            .proxy(proxy)
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| SearchError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { endpoint, client })
    }

    /// Returns the proxy endpoint.
    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }
}

#[async_trait]
impl ProxyTransport for SocksTransport {
    async fn request(
        &self,
        request: &TransportRequest,
        deadline: Duration,
    ) -> Result<TransportResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.client.get(&request.url),
            HttpMethod::Post => self.client.post(&request.url),
        };
        builder = builder.timeout(deadline);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        debug!("Requesting {} via {}", request.url, self.endpoint.url());

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status().as_u16();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>(TransportResponse { status, body })
        };

        match timeout(deadline, exchange).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) if e.is_timeout() => Err(SearchError::TransportTimeout(deadline)),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SearchError::TransportTimeout(deadline)),
        }
    }

    async fn probe(&self, host: &str, port: u16, deadline: Duration) -> Result<()> {
        let proxy = (self.endpoint.host.as_str(), self.endpoint.port);

        match timeout(deadline, Socks5Stream::connect(proxy, (host, port))).await {
            Ok(Ok(_stream)) => {
                debug!("Probe to {}:{} through {} succeeded", host, port, self.endpoint.url());
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(SearchError::TransportTimeout(deadline)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_endpoint_default() {
        let endpoint = ProxyEndpoint::default();
        assert_eq!(endpoint.host, "127.0.0.1");
        assert_eq!(endpoint.port, 9050);
    }

    #[test]
    fn test_proxy_endpoint_url() {
        let endpoint = ProxyEndpoint::new("10.0.0.2", 9150);
        assert_eq!(endpoint.url(), "socks5h://10.0.0.2:9150");
    }

    #[test]
    fn test_transport_request_get() {
        let request = TransportRequest::get("http://a.onion/?q=x").with_header("Accept", "text/html");
        assert_eq!(request.method, HttpMethod::Get);
        assert_eq!(request.header("accept"), Some("text/html"));
        assert_eq!(request.header("Cookie"), None);
        assert!(request.body.is_none());
    }

    #[test]
    fn test_transport_request_post_form() {
        let request = TransportRequest::post_form("http://a.onion/search", "q=x");
        assert_eq!(request.method, HttpMethod::Post);
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(request.body.as_deref(), Some("q=x"));
    }

    #[test]
    fn test_transport_response_is_success() {
        let ok = TransportResponse {
            status: 204,
            body: String::new(),
        };
        let not_found = TransportResponse {
            status: 404,
            body: String::new(),
        };
        assert!(ok.is_success());
        assert!(!not_found.is_success());
    }

    #[test]
    fn test_socks_transport_new() {
        let transport = SocksTransport::new(ProxyEndpoint::default(), "test-agent").unwrap();
        assert_eq!(transport.endpoint().port, 9050);
    }

    async fn closed_port() -> u16 {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        port
    }

    #[tokio::test]
    async fn test_probe_unreachable_proxy() {
        let port = closed_port().await;
        let transport =
            SocksTransport::new(ProxyEndpoint::new("127.0.0.1", port), "test-agent").unwrap();
        let err = transport
            .probe("check.torproject.org", 443, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SearchError::TransportUnreachable(_) | SearchError::TransportTimeout(_)
        ));
        assert!(
            !transport
                .is_reachable("check.torproject.org", 443, Duration::from_secs(2))
                .await
        );
    }

    #[tokio::test]
    async fn test_request_unreachable_proxy() {
        let port = closed_port().await;
        let transport =
            SocksTransport::new(ProxyEndpoint::new("127.0.0.1", port), "test-agent").unwrap();
        let err = transport
            .request(
                &TransportRequest::get("http://example.onion/"),
                Duration::from_secs(2),
            )
            .await
            .unwrap_err();
        assert!(err.kind().is_some());
    }

    #[tokio::test]
    async fn test_probe_silent_proxy_times_out() {
        // Accepts the TCP connection but never answers the SOCKS handshake.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let transport =
            SocksTransport::new(ProxyEndpoint::new("127.0.0.1", port), "test-agent").unwrap();
        let err = transport
            .probe("example.onion", 80, Duration::from_millis(200))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        server.abort();
    }
}
