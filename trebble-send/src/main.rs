//! trebble-send - Background daemon for scheduled posting
//!
//! Fires deferred posts when their time comes. The same dispatcher also runs
//! inside `trebble-api` unless it is started with `--no-dispatcher`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use libtrebble::logging::LoggingConfig;
use libtrebble::{Config, PublishOutcome, PublishingService, Result, TrebbleError};
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "trebble-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled posting")]
#[command(long_about = "\
trebble-send - Background daemon for scheduled posting

DESCRIPTION:
    trebble-send polls the schedule table and publishes every post whose
    time has come. Entries are claimed atomically, so several dispatchers
    (this daemon and trebble-api) can share one database.

    A failed publish is not retried automatically. The entry is marked
    failed with the error, and the post can be sent again with
    'trebble-send republish <POST_ID>'.

USAGE:
    # Run in foreground (logs to stderr)
    trebble-send

    # Poll every 5 seconds
    trebble-send --poll-interval 5s

    # Posts that missed their time
    trebble-send stranded

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current tick)

CONFIGURATION:
    Configuration file: ~/.config/trebble/config.toml (or $TREBBLE_CONFIG)

    [scheduling]
    poll_interval_ms = 1000
    stale_after_secs = 600  # reclaim entries stuck mid-attempt
    batch_size = 16

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Configuration or database error
    3 - Invalid input
")]
struct Cli {
    /// Poll interval, e.g. '500ms' or '30s' (overrides config)
    #[arg(long, value_name = "DURATION", value_parser = humantime::parse_duration)]
    poll_interval: Option<Duration>,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Process due posts once and exit
    #[arg(long)]
    once: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List unpublished posts whose time has passed
    Stranded,

    /// Publish an unpublished post again
    Republish {
        /// UUID of the post
        post_id: Uuid,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    LoggingConfig::from_env(cli.verbose).init();

    if let Err(e) = run(cli).await {
        error!("trebble-send failed: {}", e);
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(interval) = cli.poll_interval {
        config.scheduling.poll_interval_ms = interval.as_millis().max(1) as u64;
    }

    let service = PublishingService::new(config).await?;

    match cli.command {
        Some(Command::Stranded) => print_stranded(&service).await,
        Some(Command::Republish { post_id }) => republish(&service, &post_id).await,
        None => run_dispatcher(&service, cli.once).await,
    }
}

async fn run_dispatcher(service: &PublishingService, once: bool) -> Result<()> {
    info!("trebble-send daemon starting");

    for (status, count) in service.database().schedule_counts().await? {
        info!("Schedule entries {}: {}", status, count);
    }
    let stranded = service.stranded().await?;
    if !stranded.is_empty() {
        warn!(
            "{} unpublished post(s) are past due; see 'trebble-send stranded'",
            stranded.len()
        );
    }

    let dispatcher = service.dispatcher();

    if once {
        let report = dispatcher.tick().await?;
        info!(
            claimed = report.claimed,
            published = report.published,
            already_published = report.already_published,
            failed = report.failed,
            "trebble-send: processed due posts once, exiting"
        );
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;
    dispatcher.run(shutdown).await?;

    info!("trebble-send daemon stopped");
    Ok(())
}

async fn print_stranded(service: &PublishingService) -> Result<()> {
    let stranded = service.stranded().await?;
    if stranded.is_empty() {
        println!("No stranded posts");
        return Ok(());
    }

    for post in stranded {
        let due = chrono::DateTime::from_timestamp(post.date_published, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| post.date_published.to_string());
        let preview: String = post.content.chars().take(40).collect();
        println!("{}\t{}\t{}\t{}", post.uuid, post.account_uid, due, preview);
    }
    Ok(())
}

async fn republish(service: &PublishingService, post_id: &Uuid) -> Result<()> {
    match service.republish(post_id).await? {
        PublishOutcome::Published(response) => {
            println!("Published {}: {}", post_id, response);
        }
        PublishOutcome::AlreadyPublished => {
            println!("Post {} was already published", post_id);
        }
    }
    Ok(())
}

/// Set up signal handlers for graceful shutdown
#[cfg(unix)]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(TrebbleError::Runtime)?;

    std::thread::spawn(move || {
        if let Some(sig) = signals.forever().next() {
            info!("Received signal {}, stopping gracefully...", sig);
            shutdown.store(true, Ordering::Relaxed);
        }
    });

    Ok(())
}

#[cfg(not(unix))]
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, stopping gracefully...");
            shutdown.store(true, Ordering::Relaxed);
        }
    });
    Ok(())
}
