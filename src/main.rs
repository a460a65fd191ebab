//! fern-obs - OBS WebSocket bridge for Fern Shell
//!
//! Two modes share one protocol client:
//! - `daemon` keeps a persistent session with OBS and publishes a JSON
//!   snapshot to `~/.local/state/fern/obs-state.json` for the shell.
//! - every other subcommand is a one-shot invocation: connect, send a
//!   single command, print the result, exit.

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod daemon;
mod error;
mod paths;
mod protocol;
mod publisher;
mod reconcile;
mod state;

use crate::commands::Command;
use crate::config::ObsConfig;
use crate::daemon::Daemon;
use crate::error::Result;

/// fern-obs - OBS WebSocket bridge for Fern Shell
#[derive(Parser, Debug)]
#[command(name = "fern-obs")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// OBS WebSocket host
    #[arg(long, default_value = "localhost", global = true, env = "OBS_HOST")]
    host: String,

    /// OBS WebSocket port
    #[arg(long, default_value_t = 4455, global = true, env = "OBS_PORT")]
    port: u16,

    /// OBS WebSocket password
    #[arg(long, global = true, env = "OBS_PASSWORD")]
    password: Option<String>,

    /// Request deadline in milliseconds
    #[arg(long, default_value_t = 5000, global = true)]
    timeout: u64,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the OBS bridge daemon
    ///
    /// Maintains a persistent connection to OBS and writes state updates
    /// to ~/.local/state/fern/obs-state.json
    Daemon {
        /// How often to update stats and elapsed times (milliseconds)
        #[arg(long, default_value_t = 1000)]
        stats_interval: u64,

        /// Initial reconnection delay (milliseconds); doubles per attempt
        #[arg(long, default_value_t = 5000)]
        reconnect_interval: u64,

        /// Maximum reconnection attempts (0 = unlimited)
        #[arg(long, default_value_t = 0)]
        max_reconnects: u32,

        /// Keep retrying after a rejected password instead of exiting
        #[arg(long)]
        retry_auth: bool,

        /// Disable stats collection
        #[arg(long)]
        no_stats: bool,
    },

    /// Start recording
    #[command(alias = "rec")]
    StartRecording,

    /// Stop recording
    #[command(alias = "stop-rec")]
    StopRecording,

    /// Toggle recording pause
    #[command(alias = "pause")]
    TogglePause,

    /// Start streaming
    #[command(alias = "stream")]
    StartStreaming,

    /// Stop streaming
    #[command(alias = "stop-stream")]
    StopStreaming,

    /// Set the current scene
    Scene {
        /// Name of the scene to switch to
        name: String,
    },

    /// Get current OBS status
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    let base_config = ObsConfig {
        host: cli.host,
        port: cli.port,
        password: cli.password,
        request_timeout_ms: cli.timeout,
        ..Default::default()
    };

    let result = dispatch(cli.command, base_config).await;

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn dispatch(command: Commands, base_config: ObsConfig) -> Result<()> {
    match command {
        Commands::Daemon {
            stats_interval,
            reconnect_interval,
            max_reconnects,
            retry_auth,
            no_stats,
        } => {
            let config = ObsConfig {
                stats_interval_ms: stats_interval,
                reconnect_interval_ms: reconnect_interval,
                max_reconnect_attempts: max_reconnects,
                retry_on_auth_failure: retry_auth,
                show_stats: !no_stats,
                ..base_config
            };
            Daemon::new(config).run().await
        }

        Commands::StartRecording => commands::run(&base_config, Command::StartRecording).await,
        Commands::StopRecording => commands::run(&base_config, Command::StopRecording).await,
        Commands::TogglePause => commands::run(&base_config, Command::TogglePause).await,
        Commands::StartStreaming => commands::run(&base_config, Command::StartStreaming).await,
        Commands::StopStreaming => commands::run(&base_config, Command::StopStreaming).await,
        Commands::Scene { name } => commands::run(&base_config, Command::SetScene(name)).await,
        Commands::Status { json } => commands::run(&base_config, Command::Status { json }).await,
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false)
                .compact(),
        )
        .init();
}
