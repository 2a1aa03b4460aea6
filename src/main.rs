//! gatetally -- LLM gateway chat proxy with usage analytics.
//!
//! Entry point. Wires together:
//!   - Configuration loading
//!   - Database initialization
//!   - Usage recorder + background writer
//!   - Portkey gateway client
//!   - Combined HTTP server (API + dashboard)
//!   - Graceful shutdown on SIGTERM / SIGINT

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use gatetally::analytics::AnalyticsCache;
use gatetally::config::{Config, DEFAULT_CONFIG_FILE};
use gatetally::db::Database;
use gatetally::gateway::PortkeyGateway;
use gatetally::usage::{SqliteUsageStore, UsageRecorder};
use gatetally::{AppState, build_app};

/// How long to wait for the usage writer to drain on shutdown.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// CLI argument parsing (minimal, no clap dependency)
// ---------------------------------------------------------------------------

struct CliArgs {
    config_path: Option<PathBuf>,
}

fn parse_args() -> CliArgs {
    let mut args = std::env::args().skip(1);
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                if let Some(path) = args.next() {
                    config_path = Some(PathBuf::from(path));
                } else {
                    eprintln!("Error: --config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--help" | "-h" => {
                print_usage();
                std::process::exit(0);
            }
            "--version" | "-V" => {
                println!("gatetally {}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                eprintln!("Run with --help for usage information.");
                std::process::exit(1);
            }
        }
    }

    CliArgs { config_path }
}

fn print_usage() {
    println!(
        "\
gatetally {version} -- LLM gateway proxy with usage analytics

USAGE:
    gatetally [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Path to configuration file [default: {default}]
    -h, --help             Print this help message
    -V, --version          Print version information

ENVIRONMENT:
    RUST_LOG               Override log level (e.g. RUST_LOG=debug)
    GATETALLY_CONFIG       Alternative to --config flag
    PORTKEY_API_KEY        Gateway API key (or GATETALLY_GATEWAY_API_KEY)
",
        version = env!("CARGO_PKG_VERSION"),
        default = DEFAULT_CONFIG_FILE,
    );
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> anyhow::Result<()> {
    // 1. Parse CLI arguments; --config wins over GATETALLY_CONFIG.
    let cli = parse_args();
    let config_path = cli
        .config_path
        .or_else(|| std::env::var("GATETALLY_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));

    // 2. Load configuration
    let config = Config::load(&config_path)?;

    // 3. Initialize tracing/logging
    init_tracing(&config);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting gatetally"
    );
    for (setting, env_var) in config.env_overrides.iter() {
        tracing::info!(setting, env_var, "Setting overridden by environment");
    }

    // 4. Open database
    let db = Database::open(&config.database.path)?;
    tracing::info!(path = %config.database.path.display(), "Database opened");

    // 5. Usage recorder with background writer
    let cache = Arc::new(AnalyticsCache::new(config.analytics.cache_ttl()));
    let store = Arc::new(SqliteUsageStore::new(db));
    let (recorder, writer_handle) = UsageRecorder::with_writer(store, cache.clone());
    tracing::debug!("Usage writer spawned");

    // 6. Gateway client
    if config.gateway.api_key.is_none() {
        tracing::warn!("No gateway API key configured; chat requests will fail");
    }
    let gateway = Arc::new(PortkeyGateway::new(&config.gateway)?);
    tracing::info!(base_url = %config.gateway.base_url, "Gateway client ready");

    // 7. Shared state and router
    let listen_addr = config.listen_addr();
    let state = AppState::new(config, recorder, gateway, cache);
    let app = build_app(state.clone());

    // 8. Bind and serve
    let listener = TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "Listening");

    println!();
    println!("  gatetally v{} is running", env!("CARGO_PKG_VERSION"));
    println!("  Chat:      http://{listen_addr}/api/chat");
    println!("  Dashboard: http://{listen_addr}/ui/dashboard");
    println!("  Health:    http://{listen_addr}/health");
    println!();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 9. Drain the usage writer. It exits once the last recorder clone (and
    //    with it the channel sender) is dropped.
    tracing::info!("Shutting down gracefully");
    drop(state);
    match tokio::time::timeout(WRITER_DRAIN_TIMEOUT, writer_handle).await {
        Ok(Ok(())) => tracing::debug!("Usage writer drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "Usage writer task failed"),
        Err(_) => tracing::warn!("Timed out waiting for usage writer to drain"),
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tracing initialization
// ---------------------------------------------------------------------------

/// Set up the tracing subscriber based on configuration.
fn init_tracing(config: &Config) {
    // RUST_LOG env var takes precedence over config file
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &config.logging.level;
        EnvFilter::new(format!("gatetally={level},tower_http={level},warn"))
    });

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

// ---------------------------------------------------------------------------
// Graceful shutdown
// ---------------------------------------------------------------------------

/// Wait for a shutdown signal (SIGTERM or SIGINT / Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl+C)");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM");
        }
    }
}
