use clap::Parser;
use tether_core::TetherConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use tether_server::{server, AppContext};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "tether.toml")]
    config: String,

    #[arg(long)]
    health: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (dev convenience, production uses real env vars)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let config = match TetherConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.service.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let ctx = match AppContext::from_config(config.clone()).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to initialise backends: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        match ctx.store_health().await {
            Ok(v) => println!("✅ Store ({}) reachable: {}", ctx.store.name(), v),
            Err(e) => {
                println!("❌ Store health check failed: {}", e);
                std::process::exit(1);
            }
        }
        println!("✅ Tether health check passed");
        return Ok(());
    }

    ctx.sessions.reconcile_on_startup().await?;

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown signal received");
                let _ = shutdown_tx.send(());
            }
            Err(e) => tracing::error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    if config.http.enabled {
        let http_ctx = ctx.clone();
        let http_shutdown = tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = tether_server::http::start_http_server(http_ctx, http_shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    let socket_path = config.service.resolved_socket_path();
    let result = server::run_unix_server(&socket_path, ctx.clone(), tx.subscribe()).await;

    ctx.sessions.shutdown().await;
    tracing::info!("All sessions closed");

    result
}
