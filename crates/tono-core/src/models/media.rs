//! Engine status codes and media description.
//!
//! Status codes are the host platform's, gaps included: 4 and 6 are not
//! used and must stay unused.

use serde::Serialize;

/// Status reported by the audio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[repr(i32)]
pub enum EngineStatus {
    Idle = 0,
    Initialized = 1,
    Preparing = 2,
    Prepared = 3,
    Started = 5,
    Paused = 7,
}

impl EngineStatus {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(EngineStatus::Idle),
            1 => Some(EngineStatus::Initialized),
            2 => Some(EngineStatus::Preparing),
            3 => Some(EngineStatus::Prepared),
            5 => Some(EngineStatus::Started),
            7 => Some(EngineStatus::Paused),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EngineStatus::Idle => "IDLE",
            EngineStatus::Initialized => "INITIALIZED",
            EngineStatus::Preparing => "PREPARING",
            EngineStatus::Prepared => "PREPARED",
            EngineStatus::Started => "STARTED",
            EngineStatus::Paused => "PAUSED",
        }
    }
}

/// Symbolic name for a raw status code, `UNKNOWN_<code>` otherwise.
pub fn status_name(code: i32) -> String {
    match EngineStatus::from_code(code) {
        Some(status) => status.name().to_string(),
        None => format!("UNKNOWN_{}", code),
    }
}

/// What the engine knows about the loaded source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub duration_ms: u64,
    pub sample_rate: Option<u32>,
    pub channels: Option<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_keep_platform_gaps() {
        assert_eq!(EngineStatus::Started.code(), 5);
        assert_eq!(EngineStatus::Paused.code(), 7);
        assert_eq!(EngineStatus::from_code(4), None);
        assert_eq!(EngineStatus::from_code(6), None);
        for code in [0, 1, 2, 3, 5, 7] {
            assert_eq!(EngineStatus::from_code(code).map(|s| s.code()), Some(code));
        }
    }

    #[test]
    fn names_and_unknowns() {
        assert_eq!(status_name(0), "IDLE");
        assert_eq!(status_name(3), "PREPARED");
        assert_eq!(status_name(7), "PAUSED");
        assert_eq!(status_name(4), "UNKNOWN_4");
        assert_eq!(status_name(-1), "UNKNOWN_-1");
    }
}
