use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use moodcast_core::clock::SystemClock;
use moodcast_daemon::config::{DEFAULT_DB, ServeOpts};
use moodcast_daemon::server;
use moodcast_daemon::store::Store;

/// How long background tasks get to finish after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Parser)]
#[command(name = "moodcast", version, about = "Ambient presence and mood aggregation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon (default when no subcommand given)
    Serve(ServeOpts),
    /// Print the stored aggregate and last room snapshot as JSON
    Presence {
        #[arg(long, env = "MOODCAST_DB", default_value = DEFAULT_DB)]
        db: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // MOODCAST_LOG wins over RUST_LOG; default info. Logs go to stderr so
    // `moodcast presence` output stays clean JSON.
    let filter = EnvFilter::try_from_env("MOODCAST_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Serve(opts)) => run_daemon(opts).await,
        None => run_daemon(ServeOpts::from_env()?).await,
        Some(Commands::Presence { db }) => print_presence(&db),
    }
}

async fn run_daemon(opts: ServeOpts) -> anyhow::Result<()> {
    let store = Store::open(&opts.db)
        .with_context(|| format!("failed to open store at {}", opts.db.display()))?;
    let listener = TcpListener::bind(opts.bind)
        .await
        .with_context(|| format!("failed to bind {}", opts.bind))?;

    let cancel = CancellationToken::new();
    let (state, tasks) = server::start(
        opts.app_config(),
        Arc::new(store),
        Arc::new(SystemClock),
        cancel.clone(),
    );
    tracing::info!(
        bind = %opts.bind,
        db = %opts.db.display(),
        simulation = opts.simulation,
        "moodcast daemon starting"
    );

    let mut server = tokio::spawn(server::serve(listener, state, cancel.clone()));

    tokio::select! {
        result = &mut server => {
            cancel.cancel();
            result.context("server task panicked")??;
            tracing::warn!("server exited unexpectedly");
            return Ok(());
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
    }

    cancel.cancel();
    server.await.context("server task panicked")??;
    for task in tasks {
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            tracing::warn!("background task did not stop in time");
        }
    }

    tracing::info!("moodcast daemon stopped");
    Ok(())
}

fn print_presence(db: &Path) -> anyhow::Result<()> {
    let store =
        Store::open(db).with_context(|| format!("failed to open store at {}", db.display()))?;
    let aggregate = store.load_aggregate()?;
    let room = store.load_room_snapshot()?;
    let report = json!({
        "aggregate": {
            "estimated_total": aggregate.estimated_total,
            "sample_count": aggregate.sample_count,
            "last_update": aggregate.last_update,
            "snapshot": aggregate.to_snapshot(),
        },
        "room": room,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
