//! One-shot CLI commands.
//!
//! Each command is an independent process invocation and an independent
//! client of OBS: connect, identify, issue exactly one operation, print,
//! close, exit. No state is shared with a running daemon; failures surface
//! immediately as a nonzero exit code, never a retry.

use tracing::debug;

use crate::config::ObsConfig;
use crate::error::{Error, Result};
use crate::protocol::{ProtocolClient, Transport};
use crate::reconcile::Reconciler;
use crate::state::ObsState;

/// Commands that can be sent to OBS.
#[derive(Debug, Clone)]
pub enum Command {
    /// Start recording.
    StartRecording,
    /// Stop recording.
    StopRecording,
    /// Toggle recording pause.
    TogglePause,
    /// Start streaming.
    StartStreaming,
    /// Stop streaming.
    StopStreaming,
    /// Set the current scene.
    SetScene(String),
    /// Print the current status, optionally as JSON.
    Status { json: bool },
}

/// Connects, runs one command, prints the outcome and closes.
///
/// # Errors
///
/// Any connection, auth, protocol or timeout error is returned as-is for
/// the caller to map onto an exit code.
pub async fn run(config: &ObsConfig, command: Command) -> Result<()> {
    let transport = Transport::connect_timeout(
        &config.host,
        config.port,
        std::time::Duration::from_millis(config.request_timeout_ms),
    )
    .await?;
    let mut client = ProtocolClient::identify(transport, config).await?;
    debug!(?command, "connected for one-shot command");

    let result = execute(&mut client, config, command).await;
    client.close().await;
    result
}

async fn execute(client: &mut ProtocolClient, config: &ObsConfig, command: Command) -> Result<()> {
    match command {
        Command::StartRecording => {
            client.start_record().await?;
            println!("Recording started");
        }
        Command::StopRecording => {
            let path = client.stop_record().await?;
            println!("Recording saved to: {path}");
        }
        Command::TogglePause => {
            // Query first to decide direction; OBS's toggle reply does not
            // say which way it went.
            let status = client.record_status().await?;
            if !status.output_active {
                return Err(Error::Rejected {
                    request: "TogglePause".into(),
                    comment: "recording is not active".into(),
                });
            }
            if status.output_paused {
                client.resume_record().await?;
                println!("Recording resumed");
            } else {
                client.pause_record().await?;
                println!("Recording paused");
            }
        }
        Command::StartStreaming => {
            client.start_stream().await?;
            println!("Streaming started");
        }
        Command::StopStreaming => {
            client.stop_stream().await?;
            println!("Streaming stopped");
        }
        Command::SetScene(name) => {
            client.set_scene(&name).await?;
            println!("Scene set to: {name}");
        }
        Command::Status { json } => {
            let state = fetch_status(client, config).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print!("{}", render_status(&state));
            }
        }
    }
    Ok(())
}

/// Builds a full snapshot through the same reconciliation path the daemon
/// uses for its initial sync.
async fn fetch_status(client: &mut ProtocolClient, config: &ObsConfig) -> Result<ObsState> {
    let mut reconciler = Reconciler::new();
    reconciler.set_connected();

    let recording = client.record_status().await?;
    reconciler.apply_record_status(&recording);

    let streaming = client.stream_status().await?;
    reconciler.apply_stream_status(&streaming);

    let scene_list = client.scene_list().await?;
    reconciler.set_scenes(scene_list.scenes.into_iter().map(|s| s.scene_name).collect());
    if let Some(current) = scene_list.current_program_scene_name {
        reconciler.set_scene(current);
    }

    if config.show_stats {
        if let Ok(stats) = client.stats().await {
            reconciler.set_stats(&stats);
        }
    }

    reconciler.state.touch();
    Ok(reconciler.state)
}

/// Human-readable status rendering.
fn render_status(state: &ObsState) -> String {
    use std::fmt::Write;

    let mut out = String::new();
    let _ = writeln!(out, "Connected: {}", state.connected);

    if let Some(scene) = &state.current_scene {
        let _ = writeln!(out, "Scene: {scene}");
    }

    let _ = writeln!(
        out,
        "Recording: {}{}",
        if state.recording.active { "active" } else { "inactive" },
        if state.recording.paused { " (paused)" } else { "" }
    );
    if state.recording.active {
        if let Some(tc) = &state.recording.timecode {
            let _ = writeln!(out, "  Duration: {tc}");
        }
    }

    let _ = writeln!(
        out,
        "Streaming: {}{}",
        if state.streaming.active { "active" } else { "inactive" },
        if state.streaming.reconnecting { " (reconnecting)" } else { "" }
    );
    if state.streaming.active {
        if let Some(tc) = &state.streaming.timecode {
            let _ = writeln!(out, "  Duration: {tc}");
        }
    }

    if let Some(stats) = &state.stats {
        let _ = writeln!(out, "Stats:");
        let _ = writeln!(out, "  CPU: {:.1}%", stats.cpu_usage);
        let _ = writeln!(out, "  FPS: {:.1}", stats.active_fps);
        if let Some(drop) = stats.render_drop_percent {
            let _ = writeln!(out, "  Render drops: {drop:.2}%");
        }
        if let Some(drop) = stats.output_drop_percent {
            let _ = writeln!(out, "  Output drops: {drop:.2}%");
        }
    }

    if !state.scenes.is_empty() {
        let _ = writeln!(out, "Scenes: {}", state.scenes.join(", "));
    }

    out
}
