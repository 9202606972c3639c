//! Silent engine: real timing, no sound.
//!
//! `prepare` probes the file on a worker thread and answers with the probe
//! result. `start` schedules `complete` after the probed duration. Used on
//! machines without an output device and for dry runs.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use super::{probe, AudioEngine, EngineEvent, EngineListener, ListenerSlot};
use crate::models::media::{EngineStatus, MediaInfo};
use crate::scheduler::{ScheduledTask, Scheduler, ThreadScheduler};

pub struct SilentEngine {
    state: Arc<SilentState>,
}

struct SilentState {
    listener: ListenerSlot,
    clock: ThreadScheduler,
    status: Mutex<EngineStatus>,
    source: Mutex<Option<String>>,
    media: Mutex<Option<MediaInfo>>,
    volume: AtomicU32,
    /// Bumped by anything that invalidates in-flight work.
    generation: AtomicU64,
    run: Mutex<Option<Run>>,
}

/// Simulated playback of the loaded source.
struct Run {
    remaining_ms: u64,
    started_ms: u64,
    timer: Option<ScheduledTask>,
}

impl SilentEngine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(SilentState {
                listener: ListenerSlot::default(),
                clock: ThreadScheduler::new(),
                status: Mutex::new(EngineStatus::Idle),
                source: Mutex::new(None),
                media: Mutex::new(None),
                volume: AtomicU32::new(80),
                generation: AtomicU64::new(0),
                run: Mutex::new(None),
            }),
        }
    }

    fn invalidate(&self) {
        self.state.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(run) = self.state.run.lock().take() {
            if let Some(timer) = run.timer {
                timer.cancel();
            }
        }
    }
}

impl Default for SilentEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SilentState {
    /// Schedule `complete` for whatever is left of the current run.
    fn arm_completion(self: &Arc<Self>) {
        let generation = self.generation.load(Ordering::SeqCst);
        let mut guard = self.run.lock();
        let Some(run) = guard.as_mut() else {
            return;
        };
        run.started_ms = self.clock.now_ms();

        let state = Arc::clone(self);
        run.timer = Some(self.clock.schedule(
            Duration::from_millis(run.remaining_ms),
            Box::new(move || {
                if state.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                state.run.lock().take();
                *state.status.lock() = EngineStatus::Prepared;
                state.listener.emit(EngineEvent::Completed);
            }),
        ));
    }
}

impl AudioEngine for SilentEngine {
    fn set_listener(&self, listener: Option<EngineListener>) {
        self.state.listener.set(listener);
    }

    fn set_source(&self, file_path: &str) {
        self.invalidate();
        *self.state.source.lock() = Some(file_path.to_string());
        *self.state.media.lock() = None;
        *self.state.status.lock() = EngineStatus::Initialized;
    }

    fn prepare(&self) {
        let Some(path) = self.state.source.lock().clone() else {
            log::warn!("tono: prepare without a source");
            self.state.listener.emit(EngineEvent::Prepared { success: false });
            return;
        };
        *self.state.status.lock() = EngineStatus::Preparing;

        let generation = self.state.generation.load(Ordering::SeqCst);
        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name("tono-silent-prepare".into())
            .spawn(move || {
                let probed = probe::media_info(&path);
                if state.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let success = match probed {
                    Ok(info) => {
                        *state.media.lock() = Some(info);
                        *state.status.lock() = EngineStatus::Prepared;
                        true
                    }
                    Err(e) => {
                        log::warn!("tono: can't prepare {}: {}", path, e);
                        *state.status.lock() = EngineStatus::Initialized;
                        false
                    }
                };
                state.listener.emit(EngineEvent::Prepared { success });
            });
        if let Err(e) = spawned {
            log::error!("tono: failed to spawn prepare thread: {}", e);
            self.state.listener.emit(EngineEvent::Prepared { success: false });
        }
    }

    fn start(&self) {
        let remaining_ms = self.duration_ms();
        *self.state.run.lock() = Some(Run {
            remaining_ms,
            started_ms: 0,
            timer: None,
        });
        *self.state.status.lock() = EngineStatus::Started;
        self.state.arm_completion();
    }

    fn pause(&self) {
        let now = self.state.clock.now_ms();
        if let Some(run) = self.state.run.lock().as_mut() {
            if let Some(timer) = run.timer.take() {
                timer.cancel();
                let played = now.saturating_sub(run.started_ms);
                run.remaining_ms = run.remaining_ms.saturating_sub(played);
            }
        }
        *self.state.status.lock() = EngineStatus::Paused;
    }

    fn resume(&self) {
        *self.state.status.lock() = EngineStatus::Started;
        self.state.arm_completion();
    }

    fn stop(&self) {
        self.invalidate();
        *self.state.status.lock() = EngineStatus::Prepared;
    }

    fn release(&self) {
        self.invalidate();
        *self.state.media.lock() = None;
        *self.state.status.lock() = EngineStatus::Idle;
    }

    fn duration_ms(&self) -> u64 {
        self.state
            .media
            .lock()
            .as_ref()
            .map(|m| m.duration_ms)
            .unwrap_or(0)
    }

    fn volume(&self) -> u32 {
        self.state.volume.load(Ordering::SeqCst)
    }

    fn set_volume(&self, volume: u32) -> bool {
        if volume > 100 {
            return false;
        }
        self.state.volume.store(volume, Ordering::SeqCst);
        true
    }

    fn title(&self) -> Option<String> {
        self.state.media.lock().as_ref().and_then(|m| m.title.clone())
    }

    fn artist(&self) -> Option<String> {
        self.state.media.lock().as_ref().and_then(|m| m.artist.clone())
    }

    fn media_info(&self) -> Option<MediaInfo> {
        self.state.media.lock().clone()
    }

    fn status(&self) -> EngineStatus {
        *self.state.status.lock()
    }
}
