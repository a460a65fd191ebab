//! Serializable OBS state types.
//!
//! These types form the canonical snapshot written to
//! `~/.local/state/fern/obs-state.json` for the shell to consume.

use serde::{Deserialize, Serialize};

/// Complete OBS state written to the state file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObsState {
    /// Whether the daemon currently holds a session with OBS.
    pub connected: bool,

    /// Current recording state.
    pub recording: RecordingState,

    /// Current streaming state.
    pub streaming: StreamingState,

    /// Name of the currently active scene. May hold the last-known value
    /// while disconnected; `connected` flags the staleness.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_scene: Option<String>,

    /// List of available scene names.
    #[serde(default)]
    pub scenes: Vec<String>,

    /// Performance statistics, absent when polling is disabled or no
    /// sample has been received yet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ObsStats>,

    /// Error message if the connection failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Unix timestamp of the last update.
    #[serde(default)]
    pub updated_at_secs: u64,
}

impl ObsState {
    /// Creates a new disconnected state.
    #[must_use]
    pub fn disconnected() -> Self {
        Self::default()
    }

    /// Updates the timestamp to now. Never regresses within a process
    /// lifetime, even if the wall clock steps backwards.
    pub fn touch(&mut self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.updated_at_secs = self.updated_at_secs.max(now);
    }
}

/// Recording state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordingState {
    /// Whether recording is currently active.
    pub active: bool,

    /// Whether recording is paused (only meaningful if active).
    pub paused: bool,

    /// Elapsed recording time in seconds.
    pub elapsed_secs: u64,

    /// Recording timecode string (e.g., "01:23:45").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timecode: Option<String>,

    /// Output file path once a recording has stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
}

impl RecordingState {
    /// Creates a new idle recording state.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Streaming state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamingState {
    /// Whether streaming is currently active.
    pub active: bool,

    /// Elapsed streaming time in seconds.
    pub elapsed_secs: u64,

    /// Streaming timecode string (e.g., "01:23:45").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timecode: Option<String>,

    /// Whether OBS is reconnecting its stream output. Distinct from the
    /// bridge's own connection state; only meaningful while active.
    pub reconnecting: bool,
}

impl StreamingState {
    /// Creates a new idle streaming state.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }
}

/// OBS performance statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObsStats {
    /// CPU usage percentage (0-100).
    pub cpu_usage: f64,

    /// Memory usage in megabytes.
    pub memory_mb: f64,

    /// Available disk space in megabytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub available_disk_mb: Option<f64>,

    /// Active FPS (frames per second).
    pub active_fps: f64,

    /// Average frame render time in milliseconds.
    pub average_frame_time_ms: f64,

    /// Number of frames missed due to rendering lag.
    pub render_missed_frames: u64,

    /// Total number of rendered frames.
    pub render_total_frames: u64,

    /// Number of frames skipped due to encoding lag.
    pub output_skipped_frames: u64,

    /// Total number of output frames.
    pub output_total_frames: u64,

    /// Calculated render drop percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub render_drop_percent: Option<f64>,

    /// Calculated output drop percentage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_drop_percent: Option<f64>,
}

impl ObsStats {
    /// Calculates drop percentages from frame counts.
    pub fn calculate_percentages(&mut self) {
        if self.render_total_frames > 0 {
            self.render_drop_percent =
                Some((self.render_missed_frames as f64 / self.render_total_frames as f64) * 100.0);
        }
        if self.output_total_frames > 0 {
            self.output_drop_percent = Some(
                (self.output_skipped_frames as f64 / self.output_total_frames as f64) * 100.0,
            );
        }
    }
}

/// Formats seconds as a timecode, `MM:SS` under an hour, `HH:MM:SS` above.
#[must_use]
pub fn format_timecode(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timecode_format() {
        assert_eq!(format_timecode(0), "00:00");
        assert_eq!(format_timecode(59), "00:59");
        assert_eq!(format_timecode(60), "01:00");
        assert_eq!(format_timecode(3599), "59:59");
        assert_eq!(format_timecode(3600), "01:00:00");
        assert_eq!(format_timecode(3661), "01:01:01");
    }

    #[test]
    fn obs_state_default_disconnected() {
        let state = ObsState::default();
        assert!(!state.connected);
        assert!(!state.recording.active);
        assert!(!state.streaming.active);
        assert!(state.stats.is_none());
    }

    #[test]
    fn serde_round_trip_preserves_state() {
        let state = ObsState {
            connected: true,
            recording: RecordingState {
                active: true,
                paused: false,
                elapsed_secs: 3600,
                timecode: Some("01:00:00".into()),
                output_path: None,
            },
            streaming: StreamingState::idle(),
            current_scene: Some("Gaming".into()),
            scenes: vec!["Desktop".into(), "Gaming".into(), "BRB".into()],
            stats: Some(ObsStats {
                cpu_usage: 2.5,
                memory_mb: 512.0,
                active_fps: 60.0,
                ..Default::default()
            }),
            error: None,
            updated_at_secs: 1_703_001_234,
        };

        let json = serde_json::to_string(&state).unwrap();
        let back: ObsState = serde_json::from_str(&json).unwrap();
        assert_eq!(state, back);
    }

    #[test]
    fn touch_never_regresses() {
        let mut state = ObsState::default();
        state.updated_at_secs = u64::MAX;
        state.touch();
        assert_eq!(state.updated_at_secs, u64::MAX);

        let mut state = ObsState::default();
        state.touch();
        assert!(state.updated_at_secs > 0);
    }

    #[test]
    fn obs_stats_percentages() {
        let mut stats = ObsStats {
            render_missed_frames: 10,
            render_total_frames: 1000,
            output_skipped_frames: 5,
            output_total_frames: 500,
            ..Default::default()
        };

        stats.calculate_percentages();

        assert!((stats.render_drop_percent.unwrap() - 1.0).abs() < 0.001);
        assert!((stats.output_drop_percent.unwrap() - 1.0).abs() < 0.001);
    }
}
