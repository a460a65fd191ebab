//! State reconciliation: events and responses in, canonical snapshot out.
//!
//! Event-driven updates (`apply_event`) and poll-driven updates
//! (`apply_record_status`, `apply_stream_status`, initial sync) share one
//! code path onto [`ObsState`]. All mutation happens on the daemon's single
//! event loop, so whichever update lands last simply wins.

use std::time::{Duration, Instant};

use crate::protocol::messages::{RawStats, RecordStatus, StreamStatus};
use crate::protocol::{Event, OutputState};
use crate::state::{format_timecode, ObsStats, ObsState, RecordingState, StreamingState};

/// Owns the canonical snapshot plus the monotonic anchors used to derive
/// elapsed times between OBS messages.
#[derive(Debug)]
pub struct Reconciler {
    /// The serializable snapshot.
    pub state: ObsState,

    /// When recording (re)started, rebased across pauses so paused time is
    /// excluded from `elapsed_secs`.
    recording_started: Option<Instant>,

    /// When streaming started.
    streaming_started: Option<Instant>,
}

impl Reconciler {
    /// Creates a reconciler holding a disconnected snapshot.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ObsState::disconnected(),
            recording_started: None,
            streaming_started: None,
        }
    }

    /// Marks the session as established.
    pub fn set_connected(&mut self) {
        self.state.connected = true;
        self.state.error = None;
    }

    /// Marks the session as lost. Recording and streaming reset to safe
    /// defaults; scenes keep their last-known values, labeled stale via
    /// `connected: false`.
    pub fn set_disconnected(&mut self, error: Option<String>) {
        self.state.connected = false;
        self.state.error = error;
        self.state.recording = RecordingState::idle();
        self.state.streaming = StreamingState::idle();
        self.state.stats = None;
        self.recording_started = None;
        self.streaming_started = None;
    }

    /// Applies one unsolicited event.
    pub fn apply_event(&mut self, event: &Event) {
        match event {
            Event::RecordStateChanged {
                active,
                state,
                output_path,
            } => self.apply_record_transition(*active, *state, output_path.clone()),
            Event::StreamStateChanged { active, state } => {
                self.apply_stream_transition(*active, *state);
            }
            Event::CurrentProgramSceneChanged { scene_name } => {
                self.state.current_scene = Some(scene_name.clone());
            }
            Event::SceneListChanged { scenes } => {
                self.state.scenes = scenes.clone();
            }
            // OBS is about to close; the transport error that follows drives
            // the actual disconnect.
            Event::ExitStarted => {}
            Event::Unknown => {}
        }
    }

    fn apply_record_transition(
        &mut self,
        active: bool,
        state: OutputState,
        output_path: Option<String>,
    ) {
        match state {
            OutputState::Started => self.start_recording(Duration::ZERO, false),
            OutputState::Stopped => self.stop_recording(output_path),
            OutputState::Paused => {
                self.state.recording.paused = true;
            }
            OutputState::Resumed => {
                self.state.recording.paused = false;
                // Rebase so paused time is excluded going forward.
                self.recording_started =
                    Some(anchor_for(Duration::from_secs(self.state.recording.elapsed_secs)));
            }
            OutputState::Starting | OutputState::Stopping => {}
            _ => {
                // Unrecognized transition: trust the activity flag.
                if active && !self.state.recording.active {
                    self.start_recording(Duration::ZERO, false);
                } else if !active && self.state.recording.active {
                    self.stop_recording(output_path);
                }
            }
        }
    }

    fn apply_stream_transition(&mut self, active: bool, state: OutputState) {
        match state {
            OutputState::Started => self.start_streaming(Duration::ZERO),
            OutputState::Stopped => self.stop_streaming(),
            OutputState::Reconnecting => {
                if self.state.streaming.active {
                    self.state.streaming.reconnecting = true;
                }
            }
            OutputState::Reconnected => {
                self.state.streaming.reconnecting = false;
            }
            OutputState::Starting | OutputState::Stopping => {}
            _ => {
                if active && !self.state.streaming.active {
                    self.start_streaming(Duration::ZERO);
                } else if !active && self.state.streaming.active {
                    self.stop_streaming();
                }
            }
        }
    }

    /// Applies a `GetRecordStatus` response (initial sync and status
    /// queries go through here).
    pub fn apply_record_status(&mut self, status: &RecordStatus) {
        if status.output_active {
            let reported = Duration::from_millis(status.output_duration.unwrap_or(0));
            if self.state.recording.active {
                // Already tracking; only move elapsed forward, never back.
                let secs = reported.as_secs().max(self.state.recording.elapsed_secs);
                self.state.recording.elapsed_secs = secs;
                self.state.recording.timecode = Some(format_timecode(secs));
                self.recording_started = Some(anchor_for(Duration::from_secs(secs)));
                self.state.recording.paused = status.output_paused;
            } else {
                self.start_recording(reported, status.output_paused);
            }
        } else if self.state.recording.active {
            self.stop_recording(None);
        }
    }

    /// Applies a `GetStreamStatus` response.
    pub fn apply_stream_status(&mut self, status: &StreamStatus) {
        if status.output_active {
            if !self.state.streaming.active {
                self.start_streaming(Duration::from_millis(status.output_duration.unwrap_or(0)));
            }
            self.state.streaming.reconnecting = status.output_reconnecting;
        } else if self.state.streaming.active {
            self.stop_streaming();
        }
    }

    /// Sets the current scene.
    pub fn set_scene(&mut self, scene: impl Into<String>) {
        self.state.current_scene = Some(scene.into());
    }

    /// Sets the list of available scenes.
    pub fn set_scenes(&mut self, scenes: Vec<String>) {
        self.state.scenes = scenes;
    }

    /// Sets performance stats from a `GetStats` response.
    pub fn set_stats(&mut self, raw: &RawStats) {
        let mut stats = ObsStats {
            cpu_usage: raw.cpu_usage,
            memory_mb: raw.memory_usage,
            available_disk_mb: raw.available_disk_space,
            active_fps: raw.active_fps,
            average_frame_time_ms: raw.average_frame_render_time,
            render_missed_frames: raw.render_skipped_frames,
            render_total_frames: raw.render_total_frames,
            output_skipped_frames: raw.output_skipped_frames,
            output_total_frames: raw.output_total_frames,
            render_drop_percent: None,
            output_drop_percent: None,
        };
        stats.calculate_percentages();
        self.state.stats = Some(stats);
    }

    /// Refreshes elapsed times from the monotonic anchors. Called on every
    /// ticker tick so timecodes stay live between OBS messages.
    pub fn update_elapsed(&mut self) {
        if let Some(started) = self.recording_started {
            if self.state.recording.active && !self.state.recording.paused {
                let elapsed = started.elapsed().as_secs();
                let secs = elapsed.max(self.state.recording.elapsed_secs);
                self.state.recording.elapsed_secs = secs;
                self.state.recording.timecode = Some(format_timecode(secs));
            }
        }

        if let Some(started) = self.streaming_started {
            if self.state.streaming.active {
                let elapsed = started.elapsed().as_secs();
                let secs = elapsed.max(self.state.streaming.elapsed_secs);
                self.state.streaming.elapsed_secs = secs;
                self.state.streaming.timecode = Some(format_timecode(secs));
            }
        }
    }

    fn start_recording(&mut self, already_elapsed: Duration, paused: bool) {
        self.recording_started = Some(anchor_for(already_elapsed));
        let secs = already_elapsed.as_secs();
        self.state.recording = RecordingState {
            active: true,
            paused,
            elapsed_secs: secs,
            timecode: Some(format_timecode(secs)),
            output_path: None,
        };
    }

    fn stop_recording(&mut self, output_path: Option<String>) {
        self.recording_started = None;
        self.state.recording.active = false;
        self.state.recording.paused = false;
        if output_path.is_some() {
            self.state.recording.output_path = output_path;
        }
        // elapsed_secs keeps the final duration; it resets on the next start.
    }

    fn start_streaming(&mut self, already_elapsed: Duration) {
        self.streaming_started = Some(anchor_for(already_elapsed));
        let secs = already_elapsed.as_secs();
        self.state.streaming = StreamingState {
            active: true,
            elapsed_secs: secs,
            timecode: Some(format_timecode(secs)),
            reconnecting: false,
        };
    }

    fn stop_streaming(&mut self) {
        self.streaming_started = None;
        self.state.streaming.active = false;
        self.state.streaming.reconnecting = false;
    }
}

impl Default for Reconciler {
    fn default() -> Self {
        Self::new()
    }
}

/// Anchor instant such that `anchor.elapsed() == already_elapsed` now.
fn anchor_for(already_elapsed: Duration) -> Instant {
    Instant::now()
        .checked_sub(already_elapsed)
        .unwrap_or_else(Instant::now)
}
