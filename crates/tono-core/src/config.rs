//! Configuration for tono sessions
//!
//! Constants live in small modules; `PlayerOptions` is what a host hands to
//! `Player::open`. Options deserialize from JSON so the FFI can pass them
//! through as a string.

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;

use crate::error::Result;
use crate::models::playback::Callback;

/// Watchdog configuration
pub mod timeouts {
    /// Grace period added on top of the track duration before a playing
    /// track is reported as stuck. Also the prepare watchdog duration.
    pub const DEFAULT_FAIL_TIMEOUT_MS: u64 = 3000;
}

/// Speaker self-test configuration
pub mod speaker_test {
    /// File name of the test clip inside the scratch directory
    pub const FILE_NAME: &str = "tono_speaker_test.wav";

    /// Sample rate of the generated clip
    pub const SAMPLE_RATE: u32 = 8000;

    /// Clip length in milliseconds
    pub const CLIP_MS: u32 = 120;
}

/// Environment variable overriding the scratch directory
pub const SCRATCH_DIR_ENV: &str = "TONO_SCRATCH_DIR";

/// Options for opening the playback session.
///
/// Every field is optional in JSON:
///
/// ```json
/// { "track": "/data/beep.mp3", "stop_on_change": true, "use_queue": false }
/// ```
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct PlayerOptions {
    /// Track selected at construction. The engine source is set right away.
    pub track: Option<String>,
    /// Stop and replace an in-flight track instead of queueing behind it.
    #[serde(alias = "stop_on_change")]
    pub auto_replace: bool,
    /// Queue `play` requests that arrive while busy.
    pub use_queue: bool,
    pub fail_timeout_ms: u64,
    /// Where the speaker self-test writes its clip.
    pub scratch_dir: PathBuf,
    #[serde(skip)]
    pub on_complete: Option<Callback>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            track: None,
            auto_replace: false,
            use_queue: true,
            fail_timeout_ms: timeouts::DEFAULT_FAIL_TIMEOUT_MS,
            scratch_dir: default_scratch_dir(),
            on_complete: None,
        }
    }
}

impl PlayerOptions {
    /// Parse options from a JSON object. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn track(mut self, path: impl Into<String>) -> Self {
        self.track = Some(path.into());
        self
    }

    pub fn auto_replace(mut self, enabled: bool) -> Self {
        self.auto_replace = enabled;
        self
    }

    pub fn use_queue(mut self, enabled: bool) -> Self {
        self.use_queue = enabled;
        self
    }

    pub fn fail_timeout_ms(mut self, ms: u64) -> Self {
        self.fail_timeout_ms = ms;
        self
    }

    pub fn scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    /// Callback for natural track completion.
    pub fn on_complete(
        mut self,
        callback: impl Fn(&crate::PlaybackInfo) + Send + Sync + 'static,
    ) -> Self {
        self.on_complete = Some(std::sync::Arc::new(callback));
        self
    }
}

impl fmt::Debug for PlayerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerOptions")
            .field("track", &self.track)
            .field("auto_replace", &self.auto_replace)
            .field("use_queue", &self.use_queue)
            .field("fail_timeout_ms", &self.fail_timeout_ms)
            .field("scratch_dir", &self.scratch_dir)
            .field("on_complete", &self.on_complete.is_some())
            .finish()
    }
}

fn default_scratch_dir() -> PathBuf {
    std::env::var_os(SCRATCH_DIR_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}
