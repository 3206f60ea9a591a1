//! trebble-api - HTTP server for publishing and listing LinkedIn posts

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use clap::Parser;
use libtrebble::error::ConfigError;
use libtrebble::logging::LoggingConfig;
use libtrebble::{Config, PublishingService, Result, TrebbleError};
use tracing::{error, info};
use trebble_api::{build_router, AppState};

#[derive(Parser, Debug)]
#[command(name = "trebble-api")]
#[command(version)]
#[command(about = "HTTP server for publishing and listing LinkedIn posts")]
#[command(long_about = "\
trebble-api - HTTP server for publishing and listing LinkedIn posts

ENDPOINTS:
    POST /socials/linkedin/   Publish now, or schedule with scheduled_time
    GET  /socials/list/       The caller's posts, newest first
    GET  /health              Liveness probe

    Both /socials endpoints need an 'Authorization: Bearer <token>' header.
    Tokens are issued with 'trebble-accounts issue-token'.

CONFIGURATION:
    Configuration file: ~/.config/trebble/config.toml (or $TREBBLE_CONFIG)

    [api]
    bind = \"127.0.0.1:8000\"
    run_dispatcher = true   # fire scheduled posts in this process

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
    3 - Invalid input
")]
struct Cli {
    /// Address to listen on (overrides config)
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,

    /// Do not fire scheduled posts from this process
    #[arg(long)]
    no_dispatcher: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!("trebble-api failed: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let bind = cli.bind.unwrap_or_else(|| config.api.bind.clone());
    let run_dispatcher = config.api.run_dispatcher && !cli.no_dispatcher;

    let service = PublishingService::new(config).await?;

    let stranded = service.stranded().await?;
    if !stranded.is_empty() {
        info!(
            "{} unpublished post(s) are past due; use 'trebble-send republish' to retry",
            stranded.len()
        );
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let dispatcher_task = if run_dispatcher {
        let dispatcher = service.dispatcher();
        let flag = shutdown.clone();
        Some(tokio::spawn(async move { dispatcher.run(flag).await }))
    } else {
        info!("Dispatcher disabled; scheduled posts need a running trebble-send");
        None
    };

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .map_err(|e| ConfigError::InvalidValue {
            field: "api.bind".to_string(),
            reason: format!("cannot listen on {}: {}", bind, e),
        })?;
    info!("trebble-api listening on {}", bind);

    let app = build_router(Arc::new(AppState::new(service)));
    let signal_flag = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal, stopping gracefully...");
            signal_flag.store(true, Ordering::Relaxed);
        })
        .await
        .map_err(TrebbleError::Runtime)?;

    // The server can also stop on its own; make sure the dispatcher follows
    shutdown.store(true, Ordering::Relaxed);
    if let Some(task) = dispatcher_task {
        match task.await {
            Ok(result) => result?,
            Err(e) => error!("Dispatcher task panicked: {}", e),
        }
    }

    info!("trebble-api stopped");
    Ok(())
}
