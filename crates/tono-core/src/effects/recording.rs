//! Headless engine that records calls and lets its driver raise events.
//!
//! Nothing plays. The host (or a test) decides when `prepared` and
//! `complete` happen by calling `emit_prepared` / `emit_completed`.

use parking_lot::Mutex;

use super::{AudioEngine, EngineEvent, EngineListener, ListenerSlot};
use crate::models::media::{EngineStatus, MediaInfo};

/// One call made on the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    SetSource(String),
    Prepare,
    Start,
    Pause,
    Resume,
    Stop,
    Release,
    SetVolume(u32),
}

pub struct RecordingEngine {
    listener: ListenerSlot,
    calls: Mutex<Vec<EngineCall>>,
    state: Mutex<RecordedState>,
}

struct RecordedState {
    status: EngineStatus,
    source: Option<String>,
    duration_ms: u64,
    volume: u32,
    media: Option<MediaInfo>,
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self {
            listener: ListenerSlot::default(),
            calls: Mutex::new(Vec::new()),
            state: Mutex::new(RecordedState {
                status: EngineStatus::Idle,
                source: None,
                duration_ms: 0,
                volume: 80,
                media: None,
            }),
        }
    }

    /// Declared duration reported for every source.
    pub fn set_duration_ms(&self, duration_ms: u64) {
        self.state.lock().duration_ms = duration_ms;
    }

    /// Metadata reported for every source.
    pub fn set_media_info(&self, media: MediaInfo) {
        self.state.lock().media = Some(media);
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    /// Return and forget the calls recorded so far.
    pub fn take_calls(&self) -> Vec<EngineCall> {
        std::mem::take(&mut *self.calls.lock())
    }

    pub fn count(&self, call: &EngineCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    pub fn source(&self) -> Option<String> {
        self.state.lock().source.clone()
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_set()
    }

    /// Raise `prepared`. Returns false when no listener is attached.
    pub fn emit_prepared(&self, success: bool) -> bool {
        if success {
            self.state.lock().status = EngineStatus::Prepared;
        }
        self.listener.emit(EngineEvent::Prepared { success })
    }

    /// Raise `complete`. Returns false when no listener is attached.
    pub fn emit_completed(&self) -> bool {
        self.state.lock().status = EngineStatus::Prepared;
        self.listener.emit(EngineEvent::Completed)
    }

    fn record(&self, call: EngineCall, status: Option<EngineStatus>) {
        log::trace!("tono: engine <- {:?}", call);
        self.calls.lock().push(call);
        if let Some(status) = status {
            self.state.lock().status = status;
        }
    }
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioEngine for RecordingEngine {
    fn set_listener(&self, listener: Option<EngineListener>) {
        self.listener.set(listener);
    }

    fn set_source(&self, file_path: &str) {
        self.state.lock().source = Some(file_path.to_string());
        self.record(
            EngineCall::SetSource(file_path.to_string()),
            Some(EngineStatus::Initialized),
        );
    }

    fn prepare(&self) {
        self.record(EngineCall::Prepare, Some(EngineStatus::Preparing));
    }

    fn start(&self) {
        self.record(EngineCall::Start, Some(EngineStatus::Started));
    }

    fn pause(&self) {
        self.record(EngineCall::Pause, Some(EngineStatus::Paused));
    }

    fn resume(&self) {
        self.record(EngineCall::Resume, Some(EngineStatus::Started));
    }

    fn stop(&self) {
        self.record(EngineCall::Stop, Some(EngineStatus::Prepared));
    }

    fn release(&self) {
        self.record(EngineCall::Release, Some(EngineStatus::Idle));
    }

    fn duration_ms(&self) -> u64 {
        self.state.lock().duration_ms
    }

    fn volume(&self) -> u32 {
        self.state.lock().volume
    }

    fn set_volume(&self, volume: u32) -> bool {
        if volume > 100 {
            return false;
        }
        self.state.lock().volume = volume;
        self.record(EngineCall::SetVolume(volume), None);
        true
    }

    fn title(&self) -> Option<String> {
        self.state.lock().media.as_ref().and_then(|m| m.title.clone())
    }

    fn artist(&self) -> Option<String> {
        self.state.lock().media.as_ref().and_then(|m| m.artist.clone())
    }

    fn media_info(&self) -> Option<MediaInfo> {
        self.state.lock().media.clone()
    }

    fn status(&self) -> EngineStatus {
        self.state.lock().status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn records_calls_and_status() {
        let engine = RecordingEngine::new();
        engine.set_source("a.mp3");
        engine.prepare();
        assert_eq!(engine.status(), EngineStatus::Preparing);
        engine.start();
        engine.pause();
        assert_eq!(engine.status(), EngineStatus::Paused);
        assert_eq!(
            engine.take_calls(),
            vec![
                EngineCall::SetSource("a.mp3".into()),
                EngineCall::Prepare,
                EngineCall::Start,
                EngineCall::Pause,
            ]
        );
        assert!(engine.calls().is_empty());
    }

    #[test]
    fn emits_only_with_listener() {
        let engine = RecordingEngine::new();
        assert!(!engine.emit_completed());

        let seen = Arc::new(AtomicUsize::new(0));
        let s = Arc::clone(&seen);
        engine.set_listener(Some(Arc::new(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        })));
        assert!(engine.is_listening());
        assert!(engine.emit_prepared(true));
        assert!(engine.emit_completed());
        assert_eq!(seen.load(Ordering::SeqCst), 2);

        engine.set_listener(None);
        assert!(!engine.emit_completed());
    }

    #[test]
    fn rejects_volume_above_hundred() {
        let engine = RecordingEngine::new();
        assert!(engine.set_volume(55));
        assert!(!engine.set_volume(101));
        assert_eq!(engine.volume(), 55);
    }
}
