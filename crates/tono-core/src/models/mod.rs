//! tono data models.
//!
//! Value types only: session state, the snapshot handed to callbacks,
//! and the engine's status codes and media description.

pub mod media;
pub mod playback;

pub use media::{status_name, EngineStatus, MediaInfo};
pub use playback::{Callback, PlaybackInfo, PlaybackState};
