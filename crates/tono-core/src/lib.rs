//! tono-core — single-stream playback sessions.
//!
//! One audio stream, one session. Callers post `play`/`pause`/`stop`
//! and get told about the outcome through `on_complete` and `on_fail`.
//! The engine underneath is asynchronous: `prepare` answers later, and
//! natural end of stream arrives as an event.
//!
//! # Architecture
//!
//! ```text
//! Player (process-wide handle)
//!   └─ Session (mailbox, state machine, queue, watchdog)
//!        ├─ AudioEngine   (native / silent / recording)
//!        └─ Scheduler     (wall clock / manual)
//! ```

pub mod config;
pub mod diag;
pub mod effects;
pub mod error;
pub mod models;
pub mod monitor;
pub mod paths;
pub mod player;
pub mod queue;
pub mod scheduler;
mod session;
pub mod speaker;

pub use config::PlayerOptions;
pub use diag::set_log_level;
pub use effects::probe;
pub use effects::recording::{EngineCall, RecordingEngine};
pub use effects::silent::SilentEngine;
pub use effects::{default_engine, AudioEngine, EngineEvent, EngineListener};
pub use error::{Result, TonoError};
pub use models::*;
pub use paths::FilePathInfo;
pub use player::Player;
pub use scheduler::{ManualScheduler, Scheduler, ThreadScheduler};

#[cfg(feature = "native")]
pub use effects::audio::NativeEngine;
