//! Playback session kernel.
//!
//! Every mutation goes through one mailbox. Public calls, engine events and
//! watchdog fires are all posted as `Command`s and applied one at a time by
//! whichever thread wins the drain flag. `Session::apply` runs under the
//! session lock and only returns what should happen next; callbacks are
//! invoked after the lock is released, so a callback may call straight back
//! into the player.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;

use crate::config::PlayerOptions;
use crate::diag;
use crate::effects::{AudioEngine, EngineEvent, EngineListener};
use crate::error::{Result, TonoError};
use crate::models::media::EngineStatus;
use crate::models::playback::{Callback, PlaybackInfo, PlaybackState};
use crate::monitor::FailureMonitor;
use crate::paths::FilePathInfo;
use crate::queue::PlaybackQueue;
use crate::scheduler::Scheduler;
use crate::speaker::{CallbackOverride, SpeakerProbe, SpeakerReply};

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

/// Inbound message for the session.
pub(crate) enum Command {
    Play(Option<String>),
    Pause,
    Resume,
    Stop,
    ChangeFile(String),
    SetFailTimeout(i64),
    Destroy,
    Engine(EngineEvent),
    /// Watchdog fire, tagged with the generation it was armed with.
    Watchdog(u64),
    /// Start the next queued track after a natural completion.
    DrainQueue,
    SetOnComplete(Option<Callback>),
    SetOnFail(Option<Callback>),
    RestoreCallbacks {
        on_complete: Option<Callback>,
        on_fail: Option<Callback>,
    },
    SpeakerTest {
        clip: String,
        reply: SpeakerReply,
    },
}

impl Command {
    fn label(&self) -> &'static str {
        match self {
            Command::Play(_) => "play",
            Command::Pause => "pause",
            Command::Resume => "resume",
            Command::Stop => "stop",
            Command::ChangeFile(_) => "change_file",
            Command::SetFailTimeout(_) => "set_fail_timeout",
            Command::Destroy => "destroy",
            Command::Engine(EngineEvent::Prepared { .. }) => "prepared",
            Command::Engine(EngineEvent::Completed) => "completed",
            Command::Watchdog(_) => "watchdog",
            Command::DrainQueue => "drain_queue",
            Command::SetOnComplete(_) => "on_complete",
            Command::SetOnFail(_) => "on_fail",
            Command::RestoreCallbacks { .. } => "restore_callbacks",
            Command::SpeakerTest { .. } => "speaker_test",
        }
    }
}

/// Outward notification, delivered with the session unlocked.
enum Notice {
    Complete(Callback, PlaybackInfo),
    Fail(Callback, PlaybackInfo),
    Speaker(SpeakerReply, bool),
}

impl Notice {
    fn deliver(self) {
        match self {
            Notice::Complete(cb, info) => {
                log::debug!("tono: on_complete({})", info.full_path);
                cb(&info);
            }
            Notice::Fail(cb, info) => {
                log::debug!("tono: on_fail({})", info.full_path);
                cb(&info);
            }
            Notice::Speaker(reply, available) => reply(available),
        }
    }
}

/// What applying one command leaves to do outside the lock.
#[derive(Default)]
struct Outcome {
    notices: Vec<Notice>,
    /// Applied right after the notices, ahead of anything they posted.
    follow_up: Option<Command>,
    /// Replaced callbacks. Dropping one can run arbitrary code.
    discard: Vec<Callback>,
}

impl Outcome {
    fn finish(self) -> Option<Command> {
        drop(self.discard);
        for notice in self.notices {
            notice.deliver();
        }
        self.follow_up
    }
}

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

/// Session plus its mailbox. Owned by `Player` handles.
pub(crate) struct Shared {
    session: Mutex<Session>,
    mailbox: Mutex<VecDeque<Command>>,
    draining: AtomicBool,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Shared {
    pub(crate) fn new(
        engine: Arc<dyn AudioEngine>,
        scheduler: Arc<dyn Scheduler>,
        options: PlayerOptions,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me: &Weak<Shared>| Shared {
            session: Mutex::new(Session::new(engine, scheduler, me.clone(), options)),
            mailbox: Mutex::new(VecDeque::new()),
            draining: AtomicBool::new(false),
        })
    }

    /// Queue a command and drain the mailbox unless another caller already is.
    pub(crate) fn post(&self, command: Command) {
        self.mailbox.lock().push_back(command);
        self.drain();
    }

    fn drain(&self) {
        loop {
            if self
                .draining
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_err()
            {
                return;
            }
            {
                let _guard = DrainGuard(&self.draining);
                loop {
                    let next = self.mailbox.lock().pop_front();
                    let Some(command) = next else {
                        break;
                    };
                    self.run(command);
                }
            }
            // A post may have landed between the last pop and the flag reset.
            if self.mailbox.lock().is_empty() {
                return;
            }
        }
    }

    fn run(&self, command: Command) {
        let mut next = Some(command);
        while let Some(command) = next.take() {
            let outcome = self.session.lock().apply(command);
            next = outcome.finish();
        }
    }

    /// Read session state directly. Never call back into the player from `f`.
    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&Session) -> R) -> R {
        f(&self.session.lock())
    }
}

fn engine_listener(me: Weak<Shared>) -> EngineListener {
    Arc::new(move |event| {
        if let Some(shared) = me.upgrade() {
            shared.post(Command::Engine(event));
        }
    })
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

pub(crate) struct Session {
    engine: Arc<dyn AudioEngine>,
    scheduler: Arc<dyn Scheduler>,
    me: Weak<Shared>,
    state: PlaybackState,
    current: FilePathInfo,
    /// Track handed to the engine by the last `play`. Snapshots describe it
    /// even after `current` has moved on.
    active: Option<FilePathInfo>,
    auto_replace: bool,
    use_queue: bool,
    queue: PlaybackQueue,
    fail_timeout_ms: u64,
    play_start_ms: u64,
    monitor: FailureMonitor,
    on_complete: Option<Callback>,
    on_fail: Option<Callback>,
    scratch_dir: PathBuf,
    destroyed: bool,
}

impl Session {
    fn new(
        engine: Arc<dyn AudioEngine>,
        scheduler: Arc<dyn Scheduler>,
        me: Weak<Shared>,
        options: PlayerOptions,
    ) -> Self {
        engine.set_listener(Some(engine_listener(me.clone())));

        let mut current = FilePathInfo::default();
        if let Some(track) = options.track.as_deref().filter(|t| !t.is_empty()) {
            current = FilePathInfo::parse(track);
            engine.set_source(track);
        }

        log::info!(
            "tono: session opened (auto_replace={}, use_queue={}, fail_timeout={}ms)",
            options.auto_replace,
            options.use_queue,
            options.fail_timeout_ms
        );

        Self {
            monitor: FailureMonitor::new(Arc::clone(&scheduler)),
            engine,
            scheduler,
            me,
            state: PlaybackState::Idle,
            current,
            active: None,
            auto_replace: options.auto_replace,
            use_queue: options.use_queue,
            queue: PlaybackQueue::new(),
            fail_timeout_ms: options.fail_timeout_ms,
            play_start_ms: 0,
            on_complete: options.on_complete,
            on_fail: None,
            scratch_dir: options.scratch_dir,
            destroyed: false,
        }
    }

    fn apply(&mut self, command: Command) -> Outcome {
        let mut out = Outcome::default();
        let label = command.label();
        if self.destroyed {
            log::debug!("tono: {} ignored, {}", label, TonoError::Destroyed);
            self.reject(command, &mut out);
            return out;
        }

        diag::timed(label, || match command {
            Command::Play(track) => self.play(track),
            Command::Pause => self.pause(),
            Command::Resume => self.resume(),
            Command::Stop => self.stop(),
            Command::ChangeFile(track) => self.change_file(&track),
            Command::SetFailTimeout(ms) => {
                diag::log_err(self.set_fail_timeout(ms), "set_fail_timeout");
            }
            Command::Destroy => self.destroy(&mut out),
            Command::Engine(EngineEvent::Prepared { success }) => self.prepared(success, &mut out),
            Command::Engine(EngineEvent::Completed) => self.completed(&mut out),
            Command::Watchdog(generation) => self.watchdog(generation, &mut out),
            Command::DrainQueue => self.drain_queue(),
            Command::SetOnComplete(cb) => {
                out.discard.extend(std::mem::replace(&mut self.on_complete, cb));
            }
            Command::SetOnFail(cb) => {
                out.discard.extend(std::mem::replace(&mut self.on_fail, cb));
            }
            Command::RestoreCallbacks {
                on_complete,
                on_fail,
            } => {
                out.discard
                    .extend(std::mem::replace(&mut self.on_complete, on_complete));
                out.discard.extend(std::mem::replace(&mut self.on_fail, on_fail));
            }
            Command::SpeakerTest { clip, reply } => self.speaker_test(clip, reply),
        });
        out
    }

    /// Dispose of a command sent to a destroyed session.
    fn reject(&self, command: Command, out: &mut Outcome) {
        match command {
            Command::SetOnComplete(cb) | Command::SetOnFail(cb) => out.discard.extend(cb),
            Command::RestoreCallbacks {
                on_complete,
                on_fail,
            } => {
                out.discard.extend(on_complete);
                out.discard.extend(on_fail);
            }
            Command::SpeakerTest { reply, .. } => out.notices.push(Notice::Speaker(reply, false)),
            _ => {}
        }
    }

    // -- public operations --------------------------------------------------

    fn play(&mut self, track: Option<String>) {
        if let Some(track) = track.as_deref() {
            self.change_file(track);
        }
        self.monitor.disarm();

        if self.current.is_empty() {
            log::warn!("tono: play ignored: {}", TonoError::NoTrack);
            return;
        }

        if self.state.is_busy() {
            if self.use_queue {
                let queued = track.unwrap_or_else(|| self.current.full_path.clone());
                log::info!("tono: busy, queued {} ({} pending)", queued, self.queue.len() + 1);
                self.queue.enqueue(queued);
                return;
            }
            if self.auto_replace {
                self.stop();
            }
        }

        let track = self.current.clone();
        log::info!("tono: preparing {}", track.full_path);
        self.state = PlaybackState::Preparing;
        self.play_start_ms = self.scheduler.now_ms();
        self.engine.set_source(&track.full_path);
        self.active = Some(track);

        if self.on_fail.is_some() {
            self.arm(Duration::from_millis(self.fail_timeout_ms));
        }
        self.engine.prepare();
    }

    fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            log::debug!("tono: pause ignored in state {}", self.state.as_str());
            return;
        }
        self.monitor.disarm();
        self.engine.pause();
        self.state = PlaybackState::Paused;
    }

    fn resume(&mut self) {
        if self.state != PlaybackState::Paused {
            log::debug!("tono: resume ignored in state {}", self.state.as_str());
            return;
        }
        self.engine.resume();
        self.state = PlaybackState::Playing;
    }

    fn stop(&mut self) {
        self.monitor.disarm();
        if self.state.is_busy() {
            self.engine.stop();
            self.engine.release();
        }
        self.state = PlaybackState::Idle;
        self.active = None;
    }

    fn change_file(&mut self, track: &str) {
        self.monitor.disarm();
        if self.state.is_busy() && self.auto_replace {
            self.stop();
        }
        self.current = FilePathInfo::parse(track);
    }

    fn set_fail_timeout(&mut self, ms: i64) -> Result<()> {
        let ms = u64::try_from(ms).map_err(|_| TonoError::NegativeTimeout(ms))?;
        self.fail_timeout_ms = ms;
        Ok(())
    }

    fn destroy(&mut self, out: &mut Outcome) {
        if self.state.is_busy() {
            self.stop();
        } else if self.engine.status() != EngineStatus::Idle {
            self.engine.release();
        }
        self.engine.set_listener(None);
        self.monitor.disarm();
        self.queue.clear();
        out.discard.extend(self.on_complete.take());
        out.discard.extend(self.on_fail.take());
        self.destroyed = true;
        log::info!("tono: session destroyed");
    }

    fn speaker_test(&mut self, clip: String, reply: SpeakerReply) {
        let saved = CallbackOverride::new(
            self.me.clone(),
            self.on_complete.take(),
            self.on_fail.take(),
        );
        let probe = SpeakerProbe::new(saved, reply);
        self.on_complete = Some(probe.callback(true));
        self.on_fail = Some(probe.callback(false));
        self.play(Some(clip));
    }

    // -- engine events ------------------------------------------------------

    fn prepared(&mut self, success: bool, out: &mut Outcome) {
        if self.state != PlaybackState::Preparing {
            log::debug!("tono: stale prepared event in state {}", self.state.as_str());
            return;
        }
        self.monitor.disarm();

        if success {
            self.engine.start();
            self.state = PlaybackState::Playing;
            if self.on_fail.is_some() {
                let after = self.engine.duration_ms() + self.fail_timeout_ms;
                self.arm(Duration::from_millis(after));
            }
            return;
        }

        let info = self.estimated();
        log::warn!("tono: prepare failed for {}", info.full_path);
        self.engine.release();
        self.state = PlaybackState::Idle;
        self.active = None;
        match &self.on_fail {
            Some(cb) => out.notices.push(Notice::Fail(Arc::clone(cb), info)),
            None => log::warn!("tono: no on_fail registered, failure absorbed"),
        }
    }

    fn completed(&mut self, out: &mut Outcome) {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            log::debug!("tono: stale complete event in state {}", self.state.as_str());
            return;
        }
        self.monitor.disarm();

        let elapsed = self.scheduler.now_ms().saturating_sub(self.play_start_ms);
        let info = PlaybackInfo::measured(self.active_track(), self.engine.duration_ms(), elapsed);
        log::info!("tono: completed {} after {}ms", info.full_path, elapsed);
        self.stop();

        if let Some(cb) = &self.on_complete {
            out.notices.push(Notice::Complete(Arc::clone(cb), info));
        }
        if self.use_queue && !self.queue.is_empty() {
            out.follow_up = Some(Command::DrainQueue);
        }
    }

    fn watchdog(&mut self, generation: u64, out: &mut Outcome) {
        if !self.monitor.claim(generation) {
            log::debug!("tono: stale watchdog fire #{}", generation);
            return;
        }
        if !matches!(self.state, PlaybackState::Preparing | PlaybackState::Playing) {
            return;
        }
        let info = self.estimated();
        log::warn!(
            "tono: {} stalled while {}",
            info.full_path,
            self.state.as_str()
        );
        if let Some(cb) = &self.on_fail {
            out.notices.push(Notice::Fail(Arc::clone(cb), info));
        }
    }

    fn drain_queue(&mut self) {
        if let Some(next) = self.queue.dequeue_next() {
            log::info!("tono: dequeued {} ({} left)", next, self.queue.len());
            self.play(Some(next));
        }
    }

    // -- helpers ------------------------------------------------------------

    fn arm(&mut self, after: Duration) {
        let me = self.me.clone();
        self.monitor.arm(after, move |generation| {
            if let Some(shared) = me.upgrade() {
                shared.post(Command::Watchdog(generation));
            }
        });
    }

    fn active_track(&self) -> &FilePathInfo {
        self.active.as_ref().unwrap_or(&self.current)
    }

    fn estimated(&self) -> PlaybackInfo {
        PlaybackInfo::estimated(self.active_track(), self.engine.duration_ms())
    }

    // -- read access for the player handle ----------------------------------

    pub(crate) fn engine(&self) -> &Arc<dyn AudioEngine> {
        &self.engine
    }

    pub(crate) fn state(&self) -> PlaybackState {
        self.state
    }

    pub(crate) fn current_track(&self) -> &FilePathInfo {
        &self.current
    }

    pub(crate) fn queued(&self) -> Vec<String> {
        self.queue.pending()
    }

    pub(crate) fn fail_timeout_ms(&self) -> u64 {
        self.fail_timeout_ms
    }

    pub(crate) fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    pub(crate) fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}
