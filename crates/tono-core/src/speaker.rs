//! Speaker self-test.
//!
//! A short generated beep is written to the scratch directory (or reused
//! if an identical-size file is already there) and played through the
//! session with private callbacks. The caller's callbacks are parked in a
//! `CallbackOverride` whose drop restores them, so restoration happens on
//! every path: completion, failure, or the probe being discarded.

use std::f32::consts::PI;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::config::speaker_test::{CLIP_MS, FILE_NAME, SAMPLE_RATE};
use crate::models::playback::{Callback, PlaybackInfo};
use crate::session::{Command, Shared};

/// Answer to `is_speaker_available`.
pub type SpeakerReply = Box<dyn FnOnce(bool) + Send + 'static>;

/// 16-bit mono PCM WAV: a 1 kHz beep with 10 ms fades.
pub(crate) fn test_clip() -> Vec<u8> {
    let frames = SAMPLE_RATE * CLIP_MS / 1000;
    let data_len = frames * 2;
    let fade = (SAMPLE_RATE / 100) as f32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for i in 0..frames {
        let t = i as f32 / SAMPLE_RATE as f32;
        let edge = (i as f32).min((frames - 1 - i) as f32);
        let gain = (edge / fade).min(1.0) * 0.5;
        let sample = ((2.0 * PI * 1000.0 * t).sin() * gain * i16::MAX as f32) as i16;
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// Write the test clip into `dir` unless a file of the right size is there.
pub(crate) fn ensure_clip(dir: &Path) -> io::Result<PathBuf> {
    let path = dir.join(FILE_NAME);
    let clip = test_clip();

    if let Ok(meta) = fs::metadata(&path) {
        if meta.is_file() && meta.len() == clip.len() as u64 {
            return Ok(path);
        }
    }

    fs::create_dir_all(dir)?;
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    file.write_all(&clip)?;
    file.sync_all()?;
    Ok(path)
}

/// Caller callbacks parked while the self-test owns the notifications.
pub(crate) struct CallbackOverride {
    shared: Weak<Shared>,
    saved: Option<(Option<Callback>, Option<Callback>)>,
}

impl CallbackOverride {
    pub(crate) fn new(
        shared: Weak<Shared>,
        on_complete: Option<Callback>,
        on_fail: Option<Callback>,
    ) -> Self {
        Self {
            shared,
            saved: Some((on_complete, on_fail)),
        }
    }
}

impl Drop for CallbackOverride {
    fn drop(&mut self) {
        let Some((on_complete, on_fail)) = self.saved.take() else {
            return;
        };
        // Goes through the mailbox: this may run while the session is locked.
        if let Some(shared) = self.shared.upgrade() {
            shared.post(Command::RestoreCallbacks {
                on_complete,
                on_fail,
            });
        }
    }
}

/// One self-test run. Whichever of its callbacks fires first answers.
pub(crate) struct SpeakerProbe {
    guard: Mutex<Option<CallbackOverride>>,
    reply: Mutex<Option<SpeakerReply>>,
}

impl SpeakerProbe {
    pub(crate) fn new(guard: CallbackOverride, reply: SpeakerReply) -> Arc<Self> {
        Arc::new(Self {
            guard: Mutex::new(Some(guard)),
            reply: Mutex::new(Some(reply)),
        })
    }

    /// Callback installed in place of the caller's. `available` is what it reports.
    pub(crate) fn callback(self: &Arc<Self>, available: bool) -> Callback {
        let probe = Arc::clone(self);
        Arc::new(move |info: &PlaybackInfo| {
            log::info!(
                "tono: speaker test {} ({})",
                if available { "passed" } else { "failed" },
                info.filename
            );
            probe.finish(available);
        })
    }

    fn finish(&self, available: bool) {
        drop(self.guard.lock().take());
        let reply = self.reply.lock().take();
        if let Some(reply) = reply {
            reply(available);
        }
    }
}

impl Drop for SpeakerProbe {
    fn drop(&mut self) {
        if self.reply.get_mut().is_some() {
            log::warn!("tono: speaker test discarded before it finished");
            self.finish(false);
        }
    }
}
