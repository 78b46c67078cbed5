//! onion-search CLI - search onion services through Tor.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use onion_search::{
    CircuitInspector, HealthMonitor, Search, SearchQuery, Settings, SourceAdapter, SourceId,
};

/// onion-search - meta search across onion search engines
#[derive(Parser)]
#[command(name = "onion-search")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (JSON)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Tor SOCKS proxy as host:port
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Tor control port
    #[arg(long, global = true)]
    control_port: Option<u16>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search onion search engines
    Search(SearchArgs),

    /// Check that the proxy works and is anonymizing
    Status {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List the built circuits of the Tor daemon
    Circuits {
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// List available search sources
    Sources,
}

#[derive(Parser)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Sources to use (comma-separated)
    /// Available: ahmia, torch, haystak
    #[arg(short, long, value_delimiter = ',')]
    sources: Option<Vec<String>>,

    /// Maximum number of results to display
    #[arg(short, long, default_value = "10")]
    limit: usize,

    /// Per-source timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Output format
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Compact single-line output
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let settings = load_settings(&cli)?;

    match cli.command {
        Commands::Search(args) => run_search(&settings, args).await,
        Commands::Status { format } => show_status(&settings, format).await,
        Commands::Circuits { format } => show_circuits(&settings, format).await,
        Commands::Sources => list_sources(&settings),
    }
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut settings = match &cli.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };

    if let Some(proxy) = &cli.proxy {
        let (host, port) = parse_host_port(proxy)?;
        settings.proxy.host = host;
        settings.proxy.port = port;
    }
    if let Some(port) = cli.control_port {
        settings.control.port = port;
    }

    settings.validate()?;
    Ok(settings)
}

fn parse_host_port(value: &str) -> Result<(String, u16)> {
    let (host, port) = value
        .rsplit_once(':')
        .with_context(|| format!("Expected host:port, got '{}'", value))?;
    if host.is_empty() {
        anyhow::bail!("Missing proxy host in '{}'", value);
    }
    let port = port
        .parse()
        .with_context(|| format!("Invalid proxy port in '{}'", value))?;
    Ok((host.to_string(), port))
}

fn list_sources(settings: &Settings) -> Result<()> {
    println!("Available search sources:\n");
    for adapter in settings.registry().adapters() {
        let default = if settings.search.sources.contains(&adapter.id()) {
            " (default)"
        } else {
            ""
        };
        println!(
            "  {:<8} - {} [{}]{}",
            adapter.id(),
            adapter.name(),
            adapter.shortcut(),
            default
        );
    }
    println!();
    println!("Usage: onion-search search \"query\" -s ahmia,torch");
    Ok(())
}

async fn run_search(settings: &Settings, args: SearchArgs) -> Result<()> {
    let sources: Vec<SourceId> = match &args.sources {
        Some(names) => names
            .iter()
            .map(|name| name.parse::<SourceId>())
            .collect::<onion_search::Result<_>>()?,
        None => settings.search.sources.iter().copied().collect(),
    };
    if sources.is_empty() {
        anyhow::bail!("No valid sources specified");
    }

    let transport = Arc::new(settings.transport()?);
    let search = Search::with_registry(transport, settings.registry());
    let timeout = args
        .timeout
        .map(Duration::from_secs)
        .unwrap_or_else(|| settings.search_timeout());

    let query = SearchQuery::new(&args.query, sources);
    let outcome = search.search_with_timeout(query, timeout).await?;

    match args.format {
        OutputFormat::Text => {
            println!(
                "\nSearch results for \"{}\" ({} results in {}ms):\n",
                args.query,
                outcome.results.len(),
                outcome.duration_ms
            );

            for (i, result) in outcome.results.iter().take(args.limit).enumerate() {
                println!("{}. {}", i + 1, result.title);
                println!("   URL: {}", result.url);
                if !result.description.is_empty() {
                    println!("   {}", truncate(&result.description, 150));
                }
                let sources: Vec<_> = result.sources.iter().map(SourceId::as_str).collect();
                println!("   Sources: {}", sources.join(", "));
                println!();
            }

            for error in &outcome.errors {
                eprintln!("Warning: {} failed: {}", error.source, error.message);
            }
        }
        OutputFormat::Json => {
            let records: Vec<_> = outcome.records().into_iter().take(args.limit).collect();
            let output = serde_json::json!({
                "results": records,
                "errors": outcome.errors,
                "duration_ms": outcome.duration_ms,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Compact => {
            for result in outcome.results.iter().take(args.limit) {
                println!("{}\t{}", result.title, result.url);
            }
        }
    }

    if outcome.is_total_failure() {
        anyhow::bail!("Every source failed");
    }
    Ok(())
}

async fn show_status(settings: &Settings, format: OutputFormat) -> Result<()> {
    let transport = Arc::new(settings.transport()?);
    let monitor = HealthMonitor::new(transport, settings.health.clone());
    let status = monitor.check_now().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&status)?),
        OutputFormat::Compact => println!(
            "{}\t{}\t{}",
            if status.connected { "connected" } else { "disconnected" },
            status.exit_address.as_deref().unwrap_or("-"),
            status
                .latency_millis
                .map(|ms| ms.to_string())
                .unwrap_or_else(|| "-".to_string())
        ),
        OutputFormat::Text => {
            println!("Proxy: {}", settings.proxy.endpoint().url());
            match status.failure {
                None => println!("Status: connected through Tor"),
                Some(failure) => println!("Status: not connected ({})", failure),
            }
            if let Some(address) = &status.exit_address {
                println!("Exit address: {}", address);
            }
            if let Some(location) = &status.location {
                println!("Exit location: {}", location);
            }
            if let Some(latency) = status.latency_millis {
                println!("Latency: {}ms", latency);
            }
            println!("Checked at: {}", status.checked_at.to_rfc3339());
        }
    }

    if !status.connected {
        anyhow::bail!("Proxy is not usable");
    }
    Ok(())
}

async fn show_circuits(settings: &Settings, format: OutputFormat) -> Result<()> {
    let inspector = CircuitInspector::new(settings.control.clone());
    let circuits = inspector.list_circuits().await;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&circuits)?),
        OutputFormat::Compact => {
            for circuit in &circuits {
                let path: Vec<_> = circuit
                    .relays
                    .iter()
                    .map(|r| r.nickname.as_deref().unwrap_or(&r.fingerprint))
                    .collect();
                println!("{}\t{}", circuit.id, path.join(" -> "));
            }
        }
        OutputFormat::Text => {
            if circuits.is_empty() {
                println!("No circuits (is the control port enabled?)");
            }
            for circuit in &circuits {
                println!(
                    "Circuit {} ({})",
                    circuit.id,
                    circuit.purpose.as_deref().unwrap_or("unknown purpose")
                );
                for relay in &circuit.relays {
                    let flags: Vec<_> = relay.flags.iter().map(String::as_str).collect();
                    println!(
                        "   {} {} [{}] {} {}",
                        relay.nickname.as_deref().unwrap_or("?"),
                        relay.address.as_deref().unwrap_or("-"),
                        relay.country.as_deref().unwrap_or("??"),
                        relay.fingerprint,
                        flags.join(",")
                    );
                }
                println!();
            }
        }
    }

    Ok(())
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}
