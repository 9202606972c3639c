//! Native engine: symphonia decode + cpal output.
//!
//! 1. `prepare` probes the file and the output device on a worker thread
//! 2. `start` spawns a decoder thread that fills a sample ring
//! 3. an output thread drains the ring into a cpal stream
//!
//! Events go through a dedicated notifier thread. The session reacts to
//! `Completed` by calling `stop`, which joins the decoder and output
//! threads, so neither of them may deliver the event itself.

use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use parking_lot::Mutex;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::probe::{self, StreamLayout};
use super::{AudioEngine, EngineEvent, EngineListener, ListenerSlot};
use crate::error::{Result, TonoError};
use crate::models::media::{EngineStatus, MediaInfo};

/// Roughly two seconds of 48 kHz stereo.
const RING_CAPACITY: usize = 48_000 * 2 * 2;

pub struct NativeEngine {
    state: Arc<NativeState>,
}

struct NativeState {
    listener: ListenerSlot,
    /// Feeds the notifier thread. Events carry the generation they belong to.
    events: Mutex<mpsc::Sender<(u64, EngineEvent)>>,
    /// Bumped by `set_source`, `stop` and `release`.
    generation: AtomicU64,
    status: Mutex<EngineStatus>,
    source: Mutex<Option<String>>,
    media: Mutex<Option<MediaInfo>>,
    output: Mutex<Option<OutputPlan>>,
    /// Volume 0-100.
    volume: AtomicU32,
    paused: AtomicBool,
    stop_signal: AtomicBool,
    /// Decoder reached end of stream.
    drained: AtomicBool,
    /// Decoder or output thread gave up.
    failed: AtomicBool,
    samples: Mutex<SampleRing>,
    threads: Mutex<Vec<thread::JoinHandle<()>>>,
}

/// Stream configuration chosen during `prepare`.
#[derive(Debug, Clone, Copy)]
struct OutputPlan {
    layout: StreamLayout,
    device_channels: u16,
}

/// Bounded FIFO of interleaved f32 samples.
struct SampleRing {
    buf: VecDeque<f32>,
    capacity: usize,
}

impl SampleRing {
    fn new(capacity: usize) -> Self {
        Self {
            buf: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn room(&self) -> usize {
        self.capacity - self.buf.len()
    }

    /// Append as much of `samples` as fits. Returns how many were taken.
    fn push(&mut self, samples: &[f32]) -> usize {
        let n = samples.len().min(self.room());
        self.buf.extend(samples[..n].iter().copied());
        n
    }

    /// Fill `out`, padding with silence. Returns how many samples were real.
    fn pull(&mut self, out: &mut [f32]) -> usize {
        let n = out.len().min(self.buf.len());
        for (slot, s) in out.iter_mut().zip(self.buf.drain(..n)) {
            *slot = s;
        }
        out[n..].fill(0.0);
        n
    }

    fn len(&self) -> usize {
        self.buf.len()
    }

    fn clear(&mut self) {
        self.buf.clear();
    }
}

impl NativeEngine {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::channel();
        let state = Arc::new(NativeState {
            listener: ListenerSlot::default(),
            events: Mutex::new(tx),
            generation: AtomicU64::new(0),
            status: Mutex::new(EngineStatus::Idle),
            source: Mutex::new(None),
            media: Mutex::new(None),
            output: Mutex::new(None),
            volume: AtomicU32::new(80),
            paused: AtomicBool::new(false),
            stop_signal: AtomicBool::new(false),
            drained: AtomicBool::new(false),
            failed: AtomicBool::new(false),
            samples: Mutex::new(SampleRing::new(RING_CAPACITY)),
            threads: Mutex::new(Vec::new()),
        });
        spawn_notifier(Arc::downgrade(&state), rx);
        Self { state }
    }

    /// Stop the decoder and output threads and wait for them.
    fn halt(&self) {
        self.state.stop_signal.store(true, Ordering::SeqCst);
        self.state.paused.store(false, Ordering::SeqCst);
        self.state.samples.lock().clear();

        let handles: Vec<_> = self.state.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
    }
}

impl Default for NativeEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NativeEngine {
    fn drop(&mut self) {
        self.state.invalidate();
        self.halt();
    }
}

impl NativeState {
    fn notify(&self, generation: u64, event: EngineEvent) {
        if self.events.lock().send((generation, event)).is_err() {
            log::warn!("tono: notifier gone, {:?} dropped", event);
        }
    }

    fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

fn spawn_notifier(state: Weak<NativeState>, rx: mpsc::Receiver<(u64, EngineEvent)>) {
    let spawned = thread::Builder::new()
        .name("tono-notifier".into())
        .spawn(move || {
            for (generation, event) in rx {
                let Some(state) = state.upgrade() else {
                    break;
                };
                if state.generation.load(Ordering::SeqCst) != generation {
                    log::debug!("tono: stale {:?} dropped", event);
                    continue;
                }
                state.listener.emit(event);
            }
        });
    if let Err(e) = spawned {
        log::error!("tono: failed to spawn notifier thread: {}", e);
    }
}

impl AudioEngine for NativeEngine {
    fn set_listener(&self, listener: Option<EngineListener>) {
        self.state.listener.set(listener);
    }

    fn set_source(&self, file_path: &str) {
        self.state.invalidate();
        self.halt();
        *self.state.source.lock() = Some(file_path.to_string());
        *self.state.media.lock() = None;
        *self.state.output.lock() = None;
        *self.state.status.lock() = EngineStatus::Initialized;
    }

    fn prepare(&self) {
        let generation = self.state.generation.load(Ordering::SeqCst);
        let Some(path) = self.state.source.lock().clone() else {
            log::warn!("tono: prepare without a source");
            self.state
                .notify(generation, EngineEvent::Prepared { success: false });
            return;
        };
        *self.state.status.lock() = EngineStatus::Preparing;

        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name("tono-prepare".into())
            .spawn(move || {
                let planned = probe::media_info(&path).and_then(|info| {
                    let layout = probe::stream_layout(&path)?;
                    Ok((info, plan_output(layout)?))
                });
                if state.generation.load(Ordering::SeqCst) != generation {
                    return;
                }
                let success = match planned {
                    Ok((info, plan)) => {
                        log::info!(
                            "tono: prepared {} ({}Hz, {}ch -> {}ch)",
                            path,
                            plan.layout.sample_rate,
                            plan.layout.channels,
                            plan.device_channels
                        );
                        *state.media.lock() = Some(info);
                        *state.output.lock() = Some(plan);
                        *state.status.lock() = EngineStatus::Prepared;
                        true
                    }
                    Err(e) => {
                        log::warn!("tono: can't prepare {}: {}", path, e);
                        *state.status.lock() = EngineStatus::Initialized;
                        false
                    }
                };
                state.notify(generation, EngineEvent::Prepared { success });
            });
        if let Err(e) = spawned {
            log::error!("tono: failed to spawn prepare thread: {}", e);
            self.state
                .notify(generation, EngineEvent::Prepared { success: false });
        }
    }

    fn start(&self) {
        let (Some(path), Some(plan)) = (
            self.state.source.lock().clone(),
            *self.state.output.lock(),
        ) else {
            log::warn!("tono: start before a successful prepare");
            return;
        };
        self.halt();

        self.state.stop_signal.store(false, Ordering::SeqCst);
        self.state.drained.store(false, Ordering::SeqCst);
        self.state.failed.store(false, Ordering::SeqCst);
        *self.state.status.lock() = EngineStatus::Started;
        let generation = self.state.generation.load(Ordering::SeqCst);

        let mut threads = self.state.threads.lock();

        let decoder_state = Arc::clone(&self.state);
        let decoder = thread::Builder::new()
            .name("tono-decoder".into())
            .spawn(move || {
                if let Err(e) = decode_to_ring(&path, &decoder_state) {
                    log::error!("tono: decode error: {}", e);
                    decoder_state.failed.store(true, Ordering::SeqCst);
                }
                decoder_state.drained.store(true, Ordering::SeqCst);
            });

        let output_state = Arc::clone(&self.state);
        let output = thread::Builder::new()
            .name("tono-output".into())
            .spawn(move || match output_from_ring(&output_state, plan) {
                Ok(true) => output_state.notify(generation, EngineEvent::Completed),
                Ok(false) => {}
                Err(e) => {
                    log::error!("tono: output error: {}", e);
                    output_state.failed.store(true, Ordering::SeqCst);
                }
            });

        for spawned in [decoder, output] {
            match spawned {
                Ok(handle) => threads.push(handle),
                Err(e) => {
                    log::error!("tono: failed to spawn playback thread: {}", e);
                    self.state.failed.store(true, Ordering::SeqCst);
                }
            }
        }
    }

    fn pause(&self) {
        self.state.paused.store(true, Ordering::SeqCst);
        *self.state.status.lock() = EngineStatus::Paused;
    }

    fn resume(&self) {
        self.state.paused.store(false, Ordering::SeqCst);
        *self.state.status.lock() = EngineStatus::Started;
    }

    fn stop(&self) {
        self.state.invalidate();
        self.halt();
        *self.state.status.lock() = EngineStatus::Prepared;
    }

    fn release(&self) {
        self.state.invalidate();
        self.halt();
        *self.state.media.lock() = None;
        *self.state.output.lock() = None;
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

/// Pick a device configuration for the track. The device must run at the
/// track's rate; channel counts are adapted on the fly.
fn plan_output(layout: StreamLayout) -> Result<OutputPlan> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| TonoError::Audio("no output device".into()))?;
    let configs = device
        .supported_output_configs()
        .map_err(|e| TonoError::Audio(e.to_string()))?;

    let channels: Vec<u16> = configs
        .filter(|range| {
            range.sample_format() == cpal::SampleFormat::F32
                && range.min_sample_rate().0 <= layout.sample_rate
                && range.max_sample_rate().0 >= layout.sample_rate
        })
        .map(|range| range.channels())
        .collect();

    let device_channels = if channels.contains(&layout.channels) {
        layout.channels
    } else {
        channels.into_iter().max().ok_or_else(|| {
            TonoError::Audio(format!("device can't play {}Hz f32", layout.sample_rate))
        })?
    };
    Ok(OutputPlan {
        layout,
        device_channels,
    })
}

/// Decode a file with symphonia and push samples to the ring.
fn decode_to_ring(file_path: &str, state: &NativeState) -> Result<()> {
    let path = Path::new(file_path);
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| TonoError::Decode("no default track".into()))?;
    let track_id = track.id;
    let mut decoder =
        symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    loop {
        if state.stop_signal.load(Ordering::SeqCst) {
            return Ok(());
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(symphonia::core::errors::Error::IoError(ref e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = decoder.decode(&packet)?;
        let mut sample_buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
        sample_buf.copy_interleaved_ref(decoded);
        let samples = sample_buf.samples();

        if !feed_ring(&state.samples, samples, &state.stop_signal) {
            return Ok(());
        }
    }
}

/// Push `samples` into the ring in pieces as room frees up. Returns false
/// if `stop` was raised first.
fn feed_ring(ring: &Mutex<SampleRing>, mut samples: &[f32], stop: &AtomicBool) -> bool {
    while !samples.is_empty() {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let taken = ring.lock().push(samples);
        samples = &samples[taken..];
        if taken == 0 {
            thread::sleep(Duration::from_millis(5));
        }
    }
    true
}

/// Play the ring through cpal until it runs dry or playback is stopped.
/// Returns true on natural end of stream.
fn output_from_ring(state: &Arc<NativeState>, plan: OutputPlan) -> Result<bool> {
    let device = cpal::default_host()
        .default_output_device()
        .ok_or_else(|| TonoError::Audio("no output device".into()))?;

    let config = cpal::StreamConfig {
        channels: plan.device_channels,
        sample_rate: cpal::SampleRate(plan.layout.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let src_ch = plan.layout.channels.max(1);
    let dst_ch = plan.device_channels.max(1);

    let cb_state = Arc::clone(state);
    let mut scratch = Vec::new();
    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                if cb_state.paused.load(Ordering::SeqCst) {
                    data.fill(0.0);
                    return;
                }
                if src_ch == dst_ch {
                    cb_state.samples.lock().pull(data);
                } else {
                    let frames = data.len() / dst_ch as usize;
                    scratch.resize(frames * src_ch as usize, 0.0);
                    cb_state.samples.lock().pull(&mut scratch);
                    adapt_channels(&scratch, src_ch, data, dst_ch);
                }
                let gain = cb_state.volume.load(Ordering::SeqCst) as f32 / 100.0;
                for s in data.iter_mut() {
                    *s *= gain;
                }
            },
            move |err| {
                log::error!("tono: cpal error: {}", err);
            },
            None,
        )
        .map_err(|e| TonoError::Audio(e.to_string()))?;

    stream.play().map_err(|e| TonoError::Audio(e.to_string()))?;

    loop {
        if state.stop_signal.load(Ordering::SeqCst) || state.failed.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if state.drained.load(Ordering::SeqCst) && state.samples.lock().len() == 0 {
            // Let the device play out its last buffer.
            thread::sleep(Duration::from_millis(50));
            return Ok(!state.stop_signal.load(Ordering::SeqCst)
                && !state.failed.load(Ordering::SeqCst));
        }
        thread::sleep(Duration::from_millis(20));
    }
}

/// Convert interleaved frames between channel counts. Mono is duplicated
/// to every output channel, down-mixes to mono average, anything else
/// copies the shared channels and zero-fills the rest.
fn adapt_channels(src: &[f32], src_ch: u16, dst: &mut [f32], dst_ch: u16) {
    let (src_ch, dst_ch) = (src_ch as usize, dst_ch as usize);
    for (frame, out) in dst.chunks_exact_mut(dst_ch).enumerate() {
        let start = (frame * src_ch).min(src.len());
        let end = (start + src_ch).min(src.len());
        let input = &src[start..end];

        if input.is_empty() {
            out.fill(0.0);
        } else if src_ch == 1 {
            out.fill(input[0]);
        } else if dst_ch == 1 {
            out[0] = input.iter().sum::<f32>() / input.len() as f32;
        } else {
            for (c, slot) in out.iter_mut().enumerate() {
                *slot = input.get(c).copied().unwrap_or(0.0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_fifo() {
        let mut ring = SampleRing::new(8);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0]), 3);
        let mut out = [0.0; 2];
        assert_eq!(ring.pull(&mut out), 2);
        assert_eq!(out, [1.0, 2.0]);
        assert_eq!(ring.len(), 1);
    }

    #[test]
    fn ring_takes_what_fits() {
        let mut ring = SampleRing::new(4);
        assert_eq!(ring.push(&[1.0, 2.0, 3.0]), 3);
        assert_eq!(ring.push(&[4.0, 5.0]), 1);
        assert_eq!(ring.len(), 4);
        assert_eq!(ring.push(&[6.0]), 0);
    }

    #[test]
    fn packet_larger_than_ring_goes_through_in_pieces() {
        let ring = Arc::new(Mutex::new(SampleRing::new(4)));
        let stop = AtomicBool::new(false);
        let packet: Vec<f32> = (0..25).map(|i| i as f32).collect();

        let reader_ring = Arc::clone(&ring);
        let reader = thread::spawn(move || {
            let mut got = Vec::new();
            while got.len() < 25 {
                let mut out = [0.0; 3];
                let n = reader_ring.lock().pull(&mut out);
                got.extend_from_slice(&out[..n]);
                if n == 0 {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            got
        });

        assert!(feed_ring(&ring, &packet, &stop));
        assert_eq!(reader.join().unwrap(), packet);
    }

    #[test]
    fn feeding_a_full_ring_gives_up_on_stop() {
        let ring = Mutex::new(SampleRing::new(2));
        let stop = AtomicBool::new(true);
        assert!(!feed_ring(&ring, &[1.0, 2.0, 3.0], &stop));
        assert_eq!(ring.lock().len(), 0);
    }

    #[test]
    fn ring_underflow_pads_silence() {
        let mut ring = SampleRing::new(4);
        ring.push(&[0.5]);
        let mut out = [9.0; 3];
        assert_eq!(ring.pull(&mut out), 1);
        assert_eq!(out, [0.5, 0.0, 0.0]);
        ring.clear();
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn mono_fans_out() {
        let mut out = [0.0; 4];
        adapt_channels(&[0.25, -0.5], 1, &mut out, 2);
        assert_eq!(out, [0.25, 0.25, -0.5, -0.5]);
    }

    #[test]
    fn stereo_downmixes() {
        let mut out = [0.0; 2];
        adapt_channels(&[1.0, 0.0, 0.5, 0.5], 2, &mut out, 1);
        assert_eq!(out, [0.5, 0.5]);
    }

    #[test]
    fn extra_channels_are_zeroed() {
        let mut out = [9.0; 6];
        adapt_channels(&[0.1, 0.2, 0.3, 0.4], 2, &mut out, 3);
        assert_eq!(out, [0.1, 0.2, 0.0, 0.3, 0.4, 0.0]);
    }

    #[test]
    fn prepare_without_source_fails() {
        let engine = NativeEngine::new();
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        engine.set_listener(Some(Arc::new(move |ev| {
            let _ = tx.lock().send(ev);
        })));
        engine.prepare();
        let ev = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(ev, EngineEvent::Prepared { success: false });
    }
}
