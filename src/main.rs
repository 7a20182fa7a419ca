mod cache;
mod collectors;
mod config;
mod http;
mod metrics;
mod scheduler;
mod state;

use axum::serve;
use cache::SnapshotCache;
use clap::Parser;
use collectors::snapshot::{ProbeConfig, SnapshotBuilder};
use collectors::system::SysinfoHost;
use config::Config;
use metrics::Metrics;
use scheduler::Scheduler;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "telemetryd")]
#[command(version)]
struct Cli {
    /// Optional YAML file; environment variables override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let cfg = match Config::load(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "failed to load configuration");
            std::process::exit(1);
        }
    };

    info!(
        listen = %cfg.listen,
        refresh_interval_secs = cfg.refresh_interval_secs,
        top_sessions = cfg.top_sessions,
        "starting telemetryd"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialise metrics");
            std::process::exit(1);
        }
    };
    let cache = Arc::new(SnapshotCache::new());

    let builder = SnapshotBuilder::new(SysinfoHost::new(), ProbeConfig::from(&cfg), metrics.clone());
    let refresher = Scheduler::new(builder, cache.clone(), metrics, cfg.refresh_interval());
    refresher.prime().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector_task = refresher.spawn(shutdown_rx.clone());

    let http_task = {
        let listen = cfg.listen.clone();
        let cache = cache.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(cache);
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "invalid listen address");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "failed to start HTTP server");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "HTTP server error");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    let _ = collector_task.await;
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
