//! Session state and playback snapshots.

use std::sync::Arc;

use serde::Serialize;

use crate::paths::FilePathInfo;

/// Where the session is in the lifecycle of one track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    #[default]
    Idle,
    /// Engine asked to load the source, waiting on `prepared`.
    Preparing,
    Playing,
    Paused,
}

impl PlaybackState {
    /// Anything but idle counts as busy for queueing and replacement.
    pub fn is_busy(self) -> bool {
        self != PlaybackState::Idle
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Preparing => "preparing",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
        }
    }
}

/// Point-in-time record of a track, handed to `on_complete` and `on_fail`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackInfo {
    pub full_path: String,
    pub directory: String,
    pub filename: String,
    /// Duration as declared by the engine, 0 when unknown.
    pub duration_ms: u64,
    /// Measured wall time from start to natural completion. Only present
    /// in completion snapshots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
}

impl PlaybackInfo {
    /// Snapshot with the declared duration only.
    pub fn estimated(track: &FilePathInfo, duration_ms: u64) -> Self {
        Self {
            full_path: track.full_path.clone(),
            directory: track.directory.clone(),
            filename: track.filename.clone(),
            duration_ms,
            elapsed_ms: None,
        }
    }

    /// Snapshot carrying the measured playback time.
    pub fn measured(track: &FilePathInfo, duration_ms: u64, elapsed_ms: u64) -> Self {
        Self {
            elapsed_ms: Some(elapsed_ms),
            ..Self::estimated(track, duration_ms)
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Shared callback for completion and failure notifications.
pub type Callback = Arc<dyn Fn(&PlaybackInfo) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_is_the_only_non_busy_state() {
        assert!(!PlaybackState::Idle.is_busy());
        assert!(PlaybackState::Preparing.is_busy());
        assert!(PlaybackState::Playing.is_busy());
        assert!(PlaybackState::Paused.is_busy());
        assert_eq!(PlaybackState::default(), PlaybackState::Idle);
    }

    #[test]
    fn estimated_snapshot_has_no_elapsed_field() {
        let info = PlaybackInfo::estimated(&FilePathInfo::parse("missing"), 0);
        assert_eq!(info.full_path, "missing");
        assert_eq!(info.directory, "");
        assert_eq!(info.filename, "missing");
        assert_eq!(info.elapsed_ms, None);

        let json: serde_json::Value = serde_json::from_str(&info.to_json()).unwrap();
        assert!(json.get("elapsed_ms").is_none());
        assert_eq!(json["duration_ms"], 0);
    }

    #[test]
    fn measured_snapshot_serializes_elapsed() {
        let track = FilePathInfo::parse("data://sfx/ding.mp3");
        let info = PlaybackInfo::measured(&track, 1500, 1490);
        let json: serde_json::Value = serde_json::from_str(&info.to_json()).unwrap();
        assert_eq!(json["filename"], "ding.mp3");
        assert_eq!(json["directory"], "data://sfx/");
        assert_eq!(json["elapsed_ms"], 1490);
        assert_eq!(json["duration_ms"], 1500);
    }
}
