//! Question Paper Analyzer server
//!
//! Main entry point: loads configuration, connects the Gemini gateway and
//! serves the REST and WebSocket API.

use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use qpa_gemini::GeminiClient;
use qpa_orchestrator::{create_router, AppState, Config, Gateway, API_VERSION};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Default port for the HTTP API server.
const DEFAULT_PORT: u16 = 8000;

/// Default bind address.
const DEFAULT_HOST: &str = "0.0.0.0";

/// Question Paper Analyzer - exam paper extraction and rubric generation
///
/// Extracts the structure and content of uploaded question papers and
/// streams per-question rubrics and answer keys over a WebSocket.
#[derive(Parser, Debug)]
#[command(name = "qpa")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: qpa.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Address to bind the HTTP API server to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: IpAddr,

    /// Port for the HTTP API server
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!(version = API_VERSION, "Question Paper Analyzer starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run_server(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads configuration, builds the gateway and serves until Ctrl+C.
async fn run_server(args: Args) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?
        .with_env_overrides()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    // Re-validate after overrides
    config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;

    print_config(&config);

    let client = GeminiClient::from_config(&config.gemini)
        .map_err(|e| anyhow::anyhow!("Failed to build Gemini client: {e}"))?;
    if !config.gemini.has_credentials() {
        tracing::warn!(
            "GEMINI_API_KEY is not set; analysis endpoints will fail and /health reports unhealthy"
        );
    }
    let gateway = Gateway::new(Arc::new(client), &config);

    let state = AppState::new(config, gateway);
    let router = create_router(state);

    let addr = SocketAddr::new(args.host, args.port);
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port"
        )
    })?;

    println!();
    println!("HTTP API server running on http://{addr}");
    println!("  REST:      http://{addr}/api/v1");
    println!("  WebSocket: ws://{addr}/api/v1/ws/rubric-generation");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// Resolves when Ctrl+C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    println!();
    println!("Received Ctrl+C, shutting down...");
}

/// Loads configuration from the specified path or the default location.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Prints the effective configuration. The API key is never printed.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Model: {}", config.gemini.model);
    println!(
        "  API key: {}",
        if config.gemini.has_credentials() {
            "set"
        } else {
            "missing"
        }
    );
    println!("  Max upload size: {} MB", config.max_file_size_mb);
    println!(
        "  Enhanced extraction: {}",
        config.features.enhanced_extraction
    );
    println!("  Rubric generation: {}", config.features.rubric_generation);
    println!(
        "  Rubric workers: {} ({} mode)",
        config.rubric.worker_count,
        config.rubric.quality_mode.as_str()
    );
    if config.rubric.timeout_seconds > 0 {
        println!("  Rubric job timeout: {}s", config.rubric.timeout_seconds);
    }
}
