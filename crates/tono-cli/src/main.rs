//! tono CLI — play sounds through a single-stream session.
//!
//! Commands:
//!   tono play <file> [file...]   Play files in order through the queue
//!   tono speaker                 Run the speaker self-test
//!   tono info <file>             Probe a file and print its media info
//!
//! Options (before the command):
//!   --volume <0-100>             Output volume
//!   --fail-timeout <ms>          Watchdog grace period
//!   --replace                    Replace instead of queueing
//!   --log <0-5>                  Log level (default: RUST_LOG)

use std::io::Write;
use std::sync::mpsc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tono_core::{PlaybackInfo, PlaybackState, Player, PlayerOptions};

enum Event {
    Completed(PlaybackInfo),
    Failed(PlaybackInfo),
}

/// Decides when a `play` run is over.
///
/// The session passes through `Idle` between a completion and the start of
/// the next queued track, so a single `Idle` sighting proves nothing. The
/// run ends once every expected track has completed, or after `Idle` has
/// been seen on consecutive polls with no completion in between (a failed
/// prepare leaves the rest of the queue waiting).
struct PlayWatch {
    left: usize,
    idle_polls: u32,
}

impl PlayWatch {
    const IDLE_POLLS: u32 = 2;

    fn new(tracks: usize) -> Self {
        Self {
            left: tracks,
            idle_polls: 0,
        }
    }

    fn completed(&mut self) {
        self.left = self.left.saturating_sub(1);
        self.idle_polls = 0;
    }

    fn finished(&mut self, state: PlaybackState) -> bool {
        if self.left == 0 {
            return true;
        }
        if state != PlaybackState::Idle {
            self.idle_polls = 0;
            return false;
        }
        self.idle_polls += 1;
        self.idle_polls >= Self::IDLE_POLLS
    }
}

struct Flags {
    volume: Option<u32>,
    fail_timeout_ms: Option<i64>,
    replace: bool,
}

fn main() {
    env_logger::init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let flags = match take_flags(&mut args) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            std::process::exit(2);
        }
    };
    if args.is_empty() {
        print_usage();
        return;
    }

    let ok = match args[0].as_str() {
        "play" => cmd_play(&flags, &args[1..]),
        "speaker" => cmd_speaker(&flags),
        "info" => cmd_info(&args[1..]),
        other => {
            eprintln!("unknown command: {}", other);
            print_usage();
            false
        }
    };
    if !ok {
        std::process::exit(1);
    }
}

fn take_flags(args: &mut Vec<String>) -> Result<Flags, String> {
    let mut flags = Flags {
        volume: None,
        fail_timeout_ms: None,
        replace: false,
    };
    while let Some(first) = args.first().cloned() {
        if !first.starts_with("--") {
            break;
        }
        args.remove(0);
        match first.as_str() {
            "--replace" => flags.replace = true,
            "--volume" => flags.volume = Some(flag_value(args, &first)?),
            "--fail-timeout" => flags.fail_timeout_ms = Some(flag_value(args, &first)?),
            "--log" => tono_core::set_log_level(flag_value(args, &first)?),
            other => return Err(format!("unknown option: {}", other)),
        }
    }
    Ok(flags)
}

fn flag_value<T: std::str::FromStr>(args: &mut Vec<String>, name: &str) -> Result<T, String> {
    if args.is_empty() {
        return Err(format!("{} needs a value", name));
    }
    let raw = args.remove(0);
    raw.parse()
        .map_err(|_| format!("invalid value for {}: {}", name, raw))
}

fn open(flags: &Flags) -> Player {
    let options = PlayerOptions::default()
        .auto_replace(flags.replace)
        .use_queue(!flags.replace);
    let player = Player::open(options);
    if let Some(volume) = flags.volume {
        if !player.set_volume(volume) {
            eprintln!("volume must be 0-100, keeping {}", player.volume());
        }
    }
    if let Some(ms) = flags.fail_timeout_ms {
        player.set_fail_timeout(ms);
    }
    player
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn cmd_play(flags: &Flags, files: &[String]) -> bool {
    if files.is_empty() {
        eprintln!("usage: tono play <file> [file...]");
        return false;
    }

    let player = open(flags);
    let (tx, rx) = mpsc::channel();
    let done = Mutex::new(tx.clone());
    player.on_complete(move |info| {
        let _ = done.lock().map(|tx| tx.send(Event::Completed(info.clone())));
    });
    let failed = Mutex::new(tx);
    player.on_fail(move |info| {
        let _ = failed.lock().map(|tx| tx.send(Event::Failed(info.clone())));
    });

    for file in files {
        player.play_file(file.as_str());
    }

    // With --replace each file cuts off the one before, so only the last completes.
    let mut watch = PlayWatch::new(if flags.replace { 1 } else { files.len() });
    let mut ok = true;
    let mut track_start = Instant::now();
    loop {
        match rx.recv_timeout(Duration::from_millis(250)) {
            Ok(Event::Completed(info)) => {
                println!(
                    "\r  done  {}  ({} measured, {} declared)",
                    info.filename,
                    fmt_time(info.elapsed_ms.unwrap_or(0)),
                    fmt_time(info.duration_ms)
                );
                watch.completed();
                track_start = Instant::now();
            }
            Ok(Event::Failed(info)) => {
                println!("\r  fail  {}", info.full_path);
                ok = false;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }

        let state = player.state();
        if watch.finished(state) {
            let left = player.queued();
            if !left.is_empty() {
                eprintln!("stopped with {} track(s) still queued", left.len());
                ok = false;
            }
            break;
        }
        if state == PlaybackState::Playing {
            print_progress(&player, track_start.elapsed());
        }
    }

    player.destroy();
    ok
}

fn cmd_speaker(flags: &Flags) -> bool {
    let player = open(flags);
    let (tx, rx) = mpsc::channel();
    player.is_speaker_available(move |available| {
        let _ = tx.send(available);
    });

    let available = match rx.recv_timeout(Duration::from_secs(10)) {
        Ok(available) => available,
        Err(_) => {
            log::warn!("speaker test did not answer in time");
            false
        }
    };
    println!("speaker: {}", if available { "available" } else { "unavailable" });
    player.destroy();
    available
}

fn cmd_info(args: &[String]) -> bool {
    let Some(file) = args.first() else {
        eprintln!("usage: tono info <file>");
        return false;
    };
    match tono_core::probe::media_info(file) {
        Ok(info) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&info).unwrap_or_default()
            );
            true
        }
        Err(e) => {
            eprintln!("can't read {}: {}", file, e);
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_progress(player: &Player, elapsed: Duration) {
    let bar_width = 30;
    let pos_ms = elapsed.as_millis() as u64;
    let dur_ms = player.duration_ms();
    let filled = if dur_ms > 0 {
        (((pos_ms as f64 / dur_ms as f64) * bar_width as f64) as usize).min(bar_width)
    } else {
        0
    };
    let empty = bar_width - filled;
    let track = player.current_track();
    let title = Some(player.title())
        .filter(|t| !t.is_empty())
        .unwrap_or(track.filename);

    print!(
        "\r  {}  [{}{}] {} / {}  vol: {}%    ",
        title,
        "=".repeat(filled),
        " ".repeat(empty),
        fmt_time(pos_ms),
        fmt_time(dur_ms),
        player.volume(),
    );
    std::io::stdout().flush().ok();
}

fn fmt_time(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

fn print_usage() {
    println!("tono - single-stream sound player");
    println!();
    println!("usage: tono [options] <command> [args]");
    println!();
    println!("commands:");
    println!("  play <file> [file...]  Play files in order through the queue");
    println!("  speaker                Run the speaker self-test");
    println!("  info <file>            Print media info for a file");
    println!();
    println!("options:");
    println!("  --volume <0-100>       Output volume");
    println!("  --fail-timeout <ms>    Watchdog grace period");
    println!("  --replace              Replace the playing track instead of queueing");
    println!("  --log <0-5>            Log level");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_between_queued_tracks_is_not_the_end() {
        let mut watch = PlayWatch::new(3);
        assert!(!watch.finished(PlaybackState::Playing));
        watch.completed();
        // Seen right after the completion, before the queue is drained.
        assert!(!watch.finished(PlaybackState::Idle));
        assert!(!watch.finished(PlaybackState::Preparing));
        assert!(!watch.finished(PlaybackState::Idle));
    }

    #[test]
    fn ends_when_every_track_completed() {
        let mut watch = PlayWatch::new(2);
        watch.completed();
        assert!(!watch.finished(PlaybackState::Idle));
        watch.completed();
        assert!(watch.finished(PlaybackState::Idle));
    }

    #[test]
    fn ends_when_left_idle_after_failure() {
        let mut watch = PlayWatch::new(3);
        assert!(!watch.finished(PlaybackState::Preparing));
        assert!(!watch.finished(PlaybackState::Idle));
        assert!(watch.finished(PlaybackState::Idle));
    }

    #[test]
    fn completion_resets_idle_count() {
        let mut watch = PlayWatch::new(3);
        assert!(!watch.finished(PlaybackState::Idle));
        watch.completed();
        assert!(!watch.finished(PlaybackState::Idle));
    }

    #[test]
    fn fmt_time_pads_seconds() {
        assert_eq!(fmt_time(0), "0:00");
        assert_eq!(fmt_time(65_400), "1:05");
    }
}
