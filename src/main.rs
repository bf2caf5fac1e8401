mod collectors;
mod config;
mod format;
mod http;
mod metrics;
mod refresh;
mod report;
mod snapshot;
mod state;

use axum::serve;
use clap::Parser;
use collectors::capabilities::Capabilities;
use collectors::Aggregator;
use config::Config;
use metrics::{now_unix, Metrics};
use refresh::Refresher;
use state::State;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fullinfo")]
#[command(version)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    print_default_config: bool,
    /// Capture once, print the report and exit.
    #[arg(long, conflicts_with = "export")]
    once: bool,
    /// Capture once, write the report to this path and exit.
    #[arg(long, value_name = "PATH")]
    export: Option<PathBuf>,
    #[arg(long)]
    no_auto_refresh: bool,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match &cli.config {
        Some(path) => match Config::load_from_file(path) {
            Ok(cfg) => cfg,
            Err(err) => {
                error!(error = %err, "failed to load configuration");
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };
    if cli.no_auto_refresh {
        cfg.auto_refresh = false;
    }

    let capabilities = Arc::new(Capabilities::detect(&cfg.gpu));
    let aggregator = Aggregator::new(capabilities, cfg.capture_settings());

    let shared_state = Arc::new(RwLock::new(State::new(now_unix(), cfg.history_len)));
    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "failed to initialize metrics");
            std::process::exit(1);
        }
    };
    let refresher = Refresher::new(
        aggregator,
        shared_state.clone(),
        metrics.clone(),
        cfg.export_dir.clone(),
    );

    if cli.once || cli.export.is_some() {
        run_single(&refresher, cli.export).await;
        return;
    }

    info!(
        listen = %cfg.listen,
        interval_secs = cfg.interval_secs,
        auto_refresh = cfg.auto_refresh,
        "starting fullinfo"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let cfg = cfg.clone();
        let metrics = metrics.clone();
        let http_state = shared_state.clone();
        let refresher = refresher.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let app = http::build_router(metrics, http_state, refresher);
            let addr: SocketAddr = match cfg.listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %cfg.listen, "invalid listen address");
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

    // the display shows something as soon as the first worker finishes
    refresher.spawn_refresh();

    let refresh_task = if cfg.auto_refresh {
        let refresher = refresher.clone();
        let shutdown = shutdown_rx.clone();
        Some(tokio::spawn(
            refresher.run_auto_refresh(cfg.interval_secs, shutdown),
        ))
    } else {
        None
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to wait for Ctrl+C");
    }
    info!("received Ctrl+C, shutting down");

    let _ = shutdown_tx.send(true);

    if let Some(task) = refresh_task {
        let _ = task.await;
    }
    let _ = http_task.await;
}

async fn run_single(refresher: &Refresher, export: Option<PathBuf>) {
    let published = match refresher.refresh_now().await {
        Ok(p) => p,
        Err(err) => {
            error!(error = %err, "failed to capture snapshot");
            std::process::exit(1);
        }
    };

    match export {
        Some(path) => match refresher.export(Some(path)).await {
            Ok(path) => println!("{}", path.display()),
            Err(err) => {
                error!(error = %err, "failed to export report");
                std::process::exit(1);
            }
        },
        None => print!("{}", published.report),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
