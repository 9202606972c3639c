//! Process-wide player handle.
//!
//! There is one audio stream, so there is one session. `Player::open`
//! creates it on first use and hands back the same session afterwards;
//! `destroy` tears it down and frees the slot for a fresh `open`.
//!
//! Control calls post to the session mailbox and return immediately.
//! Accessors read the session and the engine directly.

use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::Mutex;

use crate::config::PlayerOptions;
use crate::effects::{self, AudioEngine};
use crate::error::TonoError;
use crate::models::media::{self, EngineStatus, MediaInfo};
use crate::models::playback::{Callback, PlaybackInfo, PlaybackState};
use crate::paths::FilePathInfo;
use crate::scheduler::{Scheduler, ThreadScheduler};
use crate::session::{Command, Shared};
use crate::speaker;

static REGISTRY: Lazy<Mutex<Option<Player>>> = Lazy::new(|| Mutex::new(None));

/// Status reported once the session is destroyed.
pub const DESTROYED_STATUS: i32 = -1;

/// Cloneable handle to the playback session.
#[derive(Clone)]
pub struct Player {
    shared: Arc<Shared>,
}

impl Player {
    /// Open the session with the default engine and a wall-clock scheduler,
    /// or return the session that is already open.
    pub fn open(options: PlayerOptions) -> Player {
        Self::open_or_existing(options, || {
            (effects::default_engine(), Arc::new(ThreadScheduler::new()))
        })
    }

    /// Open the session over a specific engine and scheduler, or return the
    /// session that is already open (the arguments are then dropped).
    pub fn open_with(
        engine: Arc<dyn AudioEngine>,
        scheduler: Arc<dyn Scheduler>,
        options: PlayerOptions,
    ) -> Player {
        Self::open_or_existing(options, move || (engine, scheduler))
    }

    fn open_or_existing(
        options: PlayerOptions,
        parts: impl FnOnce() -> (Arc<dyn AudioEngine>, Arc<dyn Scheduler>),
    ) -> Player {
        let mut slot = REGISTRY.lock();
        if let Some(existing) = slot.as_ref().filter(|p| !p.is_destroyed()) {
            log::warn!("tono: session already open, returning it (options ignored)");
            return existing.clone();
        }
        let (engine, scheduler) = parts();
        let player = Player {
            shared: Shared::new(engine, scheduler, options),
        };
        *slot = Some(player.clone());
        player
    }

    /// The open session, if any.
    pub fn current() -> Option<Player> {
        REGISTRY
            .lock()
            .as_ref()
            .filter(|p| !p.is_destroyed())
            .cloned()
    }

    /// Session outside the registry.
    #[cfg(test)]
    pub(crate) fn detached(
        engine: Arc<dyn AudioEngine>,
        scheduler: Arc<dyn Scheduler>,
        options: PlayerOptions,
    ) -> Player {
        Player {
            shared: Shared::new(engine, scheduler, options),
        }
    }

    /// True when both handles refer to the same session.
    pub fn same_session(&self, other: &Player) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // -- callbacks ----------------------------------------------------------

    /// Called with a measured snapshot when a track ends naturally.
    /// Replaces the previous callback.
    pub fn on_complete(&self, callback: impl Fn(&PlaybackInfo) + Send + Sync + 'static) {
        self.set_on_complete(Some(Arc::new(callback)));
    }

    /// Called when a prepare fails or the watchdog flags a stall.
    /// Replaces the previous callback.
    pub fn on_fail(&self, callback: impl Fn(&PlaybackInfo) + Send + Sync + 'static) {
        self.set_on_fail(Some(Arc::new(callback)));
    }

    pub fn set_on_complete(&self, callback: Option<Callback>) {
        self.shared.post(Command::SetOnComplete(callback));
    }

    pub fn set_on_fail(&self, callback: Option<Callback>) {
        self.shared.post(Command::SetOnFail(callback));
    }

    // -- control ------------------------------------------------------------

    /// Watchdog grace period for tracks started from now on. Negative values
    /// are logged and ignored.
    pub fn set_fail_timeout(&self, ms: i64) {
        self.shared.post(Command::SetFailTimeout(ms));
    }

    /// Play the current track.
    pub fn play(&self) {
        self.shared.post(Command::Play(None));
    }

    /// Select `path` and play it, queueing it if the session is busy.
    pub fn play_file(&self, path: impl Into<String>) {
        self.shared.post(Command::Play(Some(path.into())));
    }

    pub fn pause(&self) {
        self.shared.post(Command::Pause);
    }

    pub fn resume(&self) {
        self.shared.post(Command::Resume);
    }

    pub fn stop(&self) {
        self.shared.post(Command::Stop);
    }

    /// Select the track used by the next `play()`. Does not start playback.
    pub fn change_file(&self, path: impl Into<String>) {
        self.shared.post(Command::ChangeFile(path.into()));
    }

    /// Stop, detach from the engine and drop both callbacks. Every call on
    /// this session is a no-op afterwards; `Player::open` builds a new one.
    ///
    /// Like every command this is applied in mailbox order. Called from a
    /// callback, it takes effect once the callback returns, and until then
    /// `Player::open` keeps handing out this session.
    pub fn destroy(&self) {
        self.shared.post(Command::Destroy);
        if !self.is_destroyed() {
            log::debug!("tono: destroy deferred behind the running command");
            return;
        }
        let mut slot = REGISTRY.lock();
        if slot.as_ref().is_some_and(|p| p.same_session(self)) {
            *slot = None;
        }
    }

    /// Play a short generated clip and report whether it completed.
    ///
    /// The caller's `on_complete`/`on_fail` are swapped out for the duration
    /// of the test and restored afterwards. `callback` runs exactly once.
    pub fn is_speaker_available(&self, callback: impl FnOnce(bool) + Send + 'static) {
        if self.is_destroyed() {
            callback(false);
            return;
        }
        let dir = self.shared.inspect(|s| s.scratch_dir().to_path_buf());
        let clip = match speaker::ensure_clip(&dir) {
            Ok(path) => path,
            Err(e) => {
                log::warn!(
                    "tono: speaker test clip unavailable in {}: {}",
                    dir.display(),
                    TonoError::from(e)
                );
                callback(false);
                return;
            }
        };
        self.shared.post(Command::SpeakerTest {
            clip: clip.to_string_lossy().into_owned(),
            reply: Box::new(callback),
        });
    }

    // -- session state ------------------------------------------------------

    pub fn state(&self) -> PlaybackState {
        self.shared.inspect(|s| s.state())
    }

    pub fn current_track(&self) -> FilePathInfo {
        self.shared.inspect(|s| s.current_track().clone())
    }

    /// Tracks waiting behind the current one, oldest first.
    pub fn queued(&self) -> Vec<String> {
        self.shared.inspect(|s| s.queued())
    }

    pub fn fail_timeout_ms(&self) -> u64 {
        self.shared.inspect(|s| s.fail_timeout_ms())
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.inspect(|s| s.is_destroyed())
    }

    /// Preparing or playing.
    pub fn is_playing(&self) -> bool {
        matches!(
            self.state(),
            PlaybackState::Preparing | PlaybackState::Playing
        )
    }

    // -- engine state -------------------------------------------------------

    fn engine_query<R>(&self, destroyed: R, f: impl FnOnce(&dyn AudioEngine) -> R) -> R {
        self.shared.inspect(|s| {
            if s.is_destroyed() {
                destroyed
            } else {
                f(s.engine().as_ref())
            }
        })
    }

    /// Output volume, 0-100.
    pub fn volume(&self) -> u32 {
        self.engine_query(0, |e| e.volume())
    }

    /// Set the output volume. False when out of range or destroyed.
    pub fn set_volume(&self, volume: u32) -> bool {
        if volume > 100 {
            log::warn!("tono: {}", TonoError::VolumeOutOfRange(volume));
            return false;
        }
        self.engine_query(false, |e| e.set_volume(volume))
    }

    pub fn duration_ms(&self) -> u64 {
        self.engine_query(0, |e| e.duration_ms())
    }

    pub fn title(&self) -> String {
        self.engine_query(None, |e| e.title()).unwrap_or_default()
    }

    pub fn artist(&self) -> String {
        self.engine_query(None, |e| e.artist()).unwrap_or_default()
    }

    pub fn media_info(&self) -> Option<MediaInfo> {
        self.engine_query(None, |e| e.media_info())
    }

    /// Engine status code, `DESTROYED_STATUS` once destroyed.
    pub fn status(&self) -> i32 {
        self.engine_query(DESTROYED_STATUS, |e| e.status().code())
    }

    pub fn status_name(&self) -> String {
        media::status_name(self.status())
    }

    pub fn is_paused(&self) -> bool {
        self.status() == EngineStatus::Paused.code()
    }

    pub fn is_stopped(&self) -> bool {
        self.status() == EngineStatus::Idle.code()
    }
}
