use std::sync::Arc;

use parking_lot::Mutex;

use crate::models::media::{EngineStatus, MediaInfo};

/// Event raised by an audio engine. Delivered one at a time, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// `prepare()` finished. `success == false` means the source can't play.
    Prepared { success: bool },
    /// The stream reached its natural end.
    Completed,
}

/// Receiver for engine events.
pub type EngineListener = Arc<dyn Fn(EngineEvent) + Send + Sync>;

/// Trait for single-stream audio engines.
///
/// The session drives exactly one engine and never waits on it: `prepare`
/// answers through the listener, never through its return value.
/// All methods take `&self`; engines manage their own concurrency.
pub trait AudioEngine: Send + Sync {
    /// Register the event listener, or detach it with `None`.
    fn set_listener(&self, listener: Option<EngineListener>);
    fn set_source(&self, file_path: &str);
    fn prepare(&self);
    fn start(&self);
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
    fn release(&self);
    /// Declared duration of the loaded source, 0 when unknown.
    fn duration_ms(&self) -> u64;
    /// Volume, 0-100.
    fn volume(&self) -> u32;
    /// Returns false when the engine rejects the value.
    fn set_volume(&self, volume: u32) -> bool;
    fn title(&self) -> Option<String>;
    fn artist(&self) -> Option<String>;
    fn media_info(&self) -> Option<MediaInfo>;
    fn status(&self) -> EngineStatus;
}

/// Listener storage shared by the bundled engines.
///
/// The listener is cloned out of the lock before it is called, so a
/// listener may call back into the engine.
#[derive(Default)]
pub struct ListenerSlot {
    listener: Mutex<Option<EngineListener>>,
}

impl ListenerSlot {
    pub fn set(&self, listener: Option<EngineListener>) {
        *self.listener.lock() = listener;
    }

    pub fn is_set(&self) -> bool {
        self.listener.lock().is_some()
    }

    /// Deliver `event`. Returns false when nobody is listening.
    pub fn emit(&self, event: EngineEvent) -> bool {
        let listener = self.listener.lock().clone();
        match listener {
            Some(listener) => {
                listener(event);
                true
            }
            None => {
                log::debug!("tono: {:?} dropped, no listener attached", event);
                false
            }
        }
    }
}

/// Engine used by `Player::open`: the cpal engine when built with the
/// `native` feature, the silent engine otherwise.
pub fn default_engine() -> Arc<dyn AudioEngine> {
    #[cfg(feature = "native")]
    {
        Arc::new(audio::NativeEngine::new())
    }
    #[cfg(not(feature = "native"))]
    {
        Arc::new(silent::SilentEngine::new())
    }
}

#[cfg(feature = "native")]
pub mod audio;
pub mod probe;
pub mod recording;
pub mod silent;
