//! End-to-end tests through the public API.
//!
//! Tests marked `#[ignore]` need a Tor daemon with SOCKS on 9050 and the
//! control port on 9051, and reach live onion services.
//!
//! Run them with: `cargo test --test integration -- --ignored`

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use onion_search::transport::{ProxyEndpoint, SocksTransport, TransportRequest, TransportResponse};
use onion_search::{
    CircuitInspector, ControlConfig, ErrorKind, HealthConfig, HealthMonitor, ProxyTransport,
    Search, SearchError, SearchQuery, Settings, SourceId, DEFAULT_USER_AGENT,
};

/// Serves canned pages keyed by a substring of the request URL.
struct CannedTransport {
    pages: Vec<(&'static str, u16, &'static str)>,
}

#[async_trait]
impl ProxyTransport for CannedTransport {
    async fn request(
        &self,
        request: &TransportRequest,
        _timeout: Duration,
    ) -> onion_search::Result<TransportResponse> {
        self.pages
            .iter()
            .find(|(needle, _, _)| request.url.contains(needle))
            .map(|(_, status, body)| TransportResponse {
                status: *status,
                body: body.to_string(),
            })
            .ok_or_else(|| SearchError::TransportUnreachable("no route".to_string()))
    }

    async fn probe(&self, _host: &str, _port: u16, _timeout: Duration) -> onion_search::Result<()> {
        Ok(())
    }
}

const AHMIA_PAGE: &str = r#"
<html><body><ol class="searchResults">
  <li class="result">
    <h4><a href="/search/redirect?search_term=wiki&redirect_url=http://wikiwikiwiki.onion/">The Hidden Wiki</a></h4>
    <p>Directory of onion services</p>
  </li>
  <li class="result">
    <h4><a href="/search/redirect?search_term=wiki&redirect_url=http://library.onion/books">Library</a></h4>
    <p>Books</p>
  </li>
</ol></body></html>
"#;

const TORCH_PAGE: &str = r#"
<html><body>
  <div class="result">
    <h5><a href="http://wikiwikiwiki.onion">Hidden Wiki mirror</a></h5>
    <p>Mirror listing</p>
  </div>
</body></html>
"#;

const HAYSTAK_PAGE: &str = r#"
<html><body>
  <div class="result">
    <h3><a href="http://library.onion/books/?utm_campaign=haystak">Library (haystak)</a></h3>
  </div>
  <div class="result">
    <h3><a href="http://forum.onion/">Forum</a></h3>
    <p>Discussion board</p>
  </div>
</body></html>
"#;

fn canned_search() -> Search {
    let transport = Arc::new(CannedTransport {
        pages: vec![
            ("ahmia.fi", 200, AHMIA_PAGE),
            ("torchdeed", 200, TORCH_PAGE),
            ("haystak", 200, HAYSTAK_PAGE),
        ],
    });
    Search::with_builtin_sources(transport)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_search_all_sources_deduplicates() {
    let outcome = canned_search()
        .search(SearchQuery::all_sources("wiki"))
        .await
        .unwrap();

    assert!(outcome.errors.is_empty(), "{:?}", outcome.errors);
    assert_eq!(outcome.results.len(), 3);

    let wiki = outcome
        .results
        .iter()
        .find(|r| r.url == "http://wikiwikiwiki.onion")
        .unwrap();
    assert_eq!(
        wiki.sources,
        BTreeSet::from([SourceId::Ahmia, SourceId::Torch])
    );

    let library = outcome
        .results
        .iter()
        .find(|r| r.url.starts_with("http://library.onion/books"))
        .unwrap();
    assert_eq!(
        library.sources,
        BTreeSet::from([SourceId::Ahmia, SourceId::Haystak])
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_search_reports_failed_source_next_to_results() {
    let transport = Arc::new(CannedTransport {
        pages: vec![
            ("ahmia.fi", 200, AHMIA_PAGE),
            ("torchdeed", 503, "Service Unavailable"),
        ],
    });
    let search = Search::with_builtin_sources(transport);

    let outcome = search
        .search(SearchQuery::new("wiki", [SourceId::Ahmia, SourceId::Torch]))
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert_eq!(outcome.errors.len(), 1);
    assert_eq!(outcome.errors[0].source, SourceId::Torch);
    assert_eq!(outcome.errors[0].kind, ErrorKind::Protocol);
    assert!(!outcome.is_total_failure());
}

#[tokio::test]
async fn test_export_records() {
    let outcome = canned_search()
        .search(SearchQuery::new("wiki", [SourceId::Torch]))
        .await
        .unwrap();

    let records = serde_json::to_value(outcome.records()).unwrap();
    assert_eq!(records[0]["title"], "Hidden Wiki mirror");
    assert_eq!(records[0]["url"], "http://wikiwikiwiki.onion");
    assert_eq!(records[0]["description"], "Mirror listing");
    assert_eq!(records[0]["source"], "torch");
    assert!(records[0]["timestamp"].is_string());
}

#[tokio::test]
async fn test_search_rejects_empty_query() {
    let result = canned_search().search(SearchQuery::all_sources("")).await;
    assert!(matches!(result, Err(SearchError::InvalidQuery(_))));
}

#[tokio::test]
async fn test_settings_drive_search() {
    let settings = Settings::from_json_str(r#"{"search": {"sources": ["haystak"]}}"#).unwrap();
    let transport = Arc::new(CannedTransport {
        pages: vec![("haystak", 200, HAYSTAK_PAGE)],
    });
    let search = Search::with_registry(transport, settings.registry());

    let query = SearchQuery::new("forum", settings.search.sources.iter().copied());
    let outcome = search
        .search_with_timeout(query, settings.search_timeout())
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 2);
    assert!(outcome.results.iter().all(|r| r.source == SourceId::Haystak));
}

#[tokio::test]
async fn test_unreachable_proxy_reports_disconnected() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let transport =
        SocksTransport::new(ProxyEndpoint::new("127.0.0.1", port), DEFAULT_USER_AGENT).unwrap();
    let monitor = HealthMonitor::new(
        Arc::new(transport),
        HealthConfig {
            probe_timeout: 2,
            ..Default::default()
        },
    );

    let started = Instant::now();
    let status = monitor.check_now().await;
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(!status.connected);
}

#[tokio::test]
async fn test_missing_control_port_lists_nothing() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let inspector = CircuitInspector::new(ControlConfig {
        port,
        ..Default::default()
    });
    assert!(inspector.list_circuits().await.is_empty());
}

fn live_transport() -> Arc<SocksTransport> {
    Arc::new(SocksTransport::new(ProxyEndpoint::default(), DEFAULT_USER_AGENT).unwrap())
}

#[tokio::test]
#[ignore]
async fn test_live_health_check() {
    let monitor = HealthMonitor::new(live_transport(), HealthConfig::default());
    let status = monitor.check_now().await;
    println!("{:?}", status);
    assert!(status.connected, "Tor should be reachable and anonymizing");
}

#[tokio::test]
#[ignore]
async fn test_live_circuits() {
    let inspector = CircuitInspector::new(ControlConfig::default());
    let circuits = inspector.list_circuits().await;
    for circuit in &circuits {
        println!("{} {:?} {} relays", circuit.id, circuit.purpose, circuit.relays.len());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[ignore]
async fn test_live_search() {
    let search = Search::with_builtin_sources(live_transport());
    let outcome = search
        .search_with_timeout(SearchQuery::all_sources("hidden wiki"), Duration::from_secs(60))
        .await
        .unwrap();

    println!(
        "{} results, {} errors in {}ms",
        outcome.results.len(),
        outcome.errors.len(),
        outcome.duration_ms
    );
    for result in outcome.results.iter().take(5) {
        println!("  {} - {}", result.title, result.url);
    }
    for error in &outcome.errors {
        println!("  {} failed: {}", error.source, error.message);
    }
}
