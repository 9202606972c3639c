//! C FFI surface for tono.
//!
//! Pattern: opaque PlayerHandle + C strings + JSON serialization.
//!
//! Watch firmware, mobile shells and anything else with a C FFI can drive
//! the session through these. Strings returned here are owned by the
//! caller and freed with `tono_string_free`. Functions returning `i32`
//! answer 1 on success and 0 on error; the reason is in `tono_last_error`.

use std::cell::RefCell;
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use tono_core::{Player, PlayerOptions, TonoError};

// ---------------------------------------------------------------------------
// Error handling (thread-local last error)
// ---------------------------------------------------------------------------

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

fn set_error(msg: String) {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = Some(msg));
}

fn clear_error() {
    LAST_ERROR.with(|cell| *cell.borrow_mut() = None);
}

/// Returns the last error message (caller frees with `tono_string_free`).
#[no_mangle]
pub extern "C" fn tono_last_error() -> *mut c_char {
    LAST_ERROR.with(|cell| {
        cell.borrow_mut()
            .take()
            .and_then(|s| CString::new(s).ok())
            .map(|s| s.into_raw())
            .unwrap_or(ptr::null_mut())
    })
}

/// Frees a string returned from tono FFI.
///
/// # Safety
/// Must be a pointer returned from this FFI and not already freed.
#[no_mangle]
pub unsafe extern "C" fn tono_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        let _ = CString::from_raw(ptr);
    }
}

// ---------------------------------------------------------------------------
// Opaque handle
// ---------------------------------------------------------------------------

#[repr(C)]
pub struct PlayerHandle {
    _private: [u8; 0],
}

struct PlayerHandleInner {
    player: Player,
}

/// Host callback receiving a playback snapshot as JSON. The string is only
/// valid for the duration of the call.
pub type TonoInfoCallback = Option<extern "C" fn(info_json: *const c_char, user_data: *mut c_void)>;

/// Host callback receiving the speaker self-test result (1 or 0).
pub type TonoSpeakerCallback = Option<extern "C" fn(available: i32, user_data: *mut c_void)>;

/// Host context handed back to callbacks untouched.
#[derive(Clone, Copy)]
struct UserData(*mut c_void);

// The host owns the pointer and promises it stays valid across threads.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    fn get(self) -> *mut c_void {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// Set log verbosity: 0 off, 1 error, 2 warn, 3 info, 4 debug, 5 trace.
#[no_mangle]
pub extern "C" fn tono_set_log_level(level: u8) {
    tono_core::set_log_level(level);
}

/// Opens the playback session, or attaches to the one already open.
/// `options_json` may be NULL for defaults. Returns an opaque handle
/// (free with `tono_close`), or NULL on error.
///
/// # Safety
/// `options_json` must be NULL or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn tono_open(options_json: *const c_char) -> *mut PlayerHandle {
    clear_error();
    let options = if options_json.is_null() {
        PlayerOptions::default()
    } else {
        let json = match read_cstr(options_json) {
            Ok(s) => s,
            Err(e) => {
                set_error(e);
                return ptr::null_mut();
            }
        };
        match PlayerOptions::from_json(&json) {
            Ok(o) => o,
            Err(e) => {
                set_error(e.to_string());
                return ptr::null_mut();
            }
        }
    };

    let player = Player::open(options);
    Box::into_raw(Box::new(PlayerHandleInner { player })) as *mut PlayerHandle
}

/// Destroys the session and frees the handle.
#[no_mangle]
pub extern "C" fn tono_close(handle: *mut PlayerHandle) {
    if !handle.is_null() {
        unsafe {
            let inner = Box::from_raw(handle as *mut PlayerHandleInner);
            inner.player.destroy();
        }
    }
}

// ---------------------------------------------------------------------------
// Callbacks
// ---------------------------------------------------------------------------

/// Register the natural-completion callback. NULL `callback` removes it.
#[no_mangle]
pub extern "C" fn tono_on_complete(
    handle: *mut PlayerHandle,
    callback: TonoInfoCallback,
    user_data: *mut c_void,
) -> i32 {
    with_player(handle, |player| {
        player.set_on_complete(info_callback(callback, user_data));
        Ok(())
    })
}

/// Register the failure callback (prepare failed or playback stalled).
/// NULL `callback` removes it.
#[no_mangle]
pub extern "C" fn tono_on_fail(
    handle: *mut PlayerHandle,
    callback: TonoInfoCallback,
    user_data: *mut c_void,
) -> i32 {
    with_player(handle, |player| {
        player.set_on_fail(info_callback(callback, user_data));
        Ok(())
    })
}

fn info_callback(
    callback: TonoInfoCallback,
    user_data: *mut c_void,
) -> Option<tono_core::Callback> {
    let callback = callback?;
    let data = UserData(user_data);
    Some(std::sync::Arc::new(move |info: &tono_core::PlaybackInfo| {
        match CString::new(info.to_json()) {
            Ok(json) => callback(json.as_ptr(), data.get()),
            Err(e) => log::error!("tono: snapshot not representable as C string: {}", e),
        }
    }))
}

// ---------------------------------------------------------------------------
// Playback commands
// ---------------------------------------------------------------------------

/// Play `path`, or the current track when `path` is NULL.
///
/// # Safety
/// `path` must be NULL or a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn tono_play(handle: *mut PlayerHandle, path: *const c_char) -> i32 {
    let track = if path.is_null() {
        None
    } else {
        match read_cstr(path) {
            Ok(p) => Some(p),
            Err(e) => {
                set_error(e);
                return 0;
            }
        }
    };
    with_player(handle, |player| {
        match track {
            Some(track) => player.play_file(track),
            None => player.play(),
        }
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn tono_pause(handle: *mut PlayerHandle) -> i32 {
    with_player(handle, |player| {
        player.pause();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn tono_resume(handle: *mut PlayerHandle) -> i32 {
    with_player(handle, |player| {
        player.resume();
        Ok(())
    })
}

#[no_mangle]
pub extern "C" fn tono_stop(handle: *mut PlayerHandle) -> i32 {
    with_player(handle, |player| {
        player.stop();
        Ok(())
    })
}

/// Select the track for the next `tono_play(handle, NULL)`.
///
/// # Safety
/// `path` must be a valid null-terminated C string.
#[no_mangle]
pub unsafe extern "C" fn tono_change_file(handle: *mut PlayerHandle, path: *const c_char) -> i32 {
    let track = match read_cstr(path) {
        Ok(p) => p,
        Err(e) => {
            set_error(e);
            return 0;
        }
    };
    with_player(handle, |player| {
        player.change_file(track);
        Ok(())
    })
}

/// Watchdog grace period in milliseconds for tracks started from now on.
#[no_mangle]
pub extern "C" fn tono_set_fail_timeout(handle: *mut PlayerHandle, ms: i64) -> i32 {
    with_player(handle, |player| {
        if ms < 0 {
            return Err(TonoError::NegativeTimeout(ms).to_string());
        }
        player.set_fail_timeout(ms);
        Ok(())
    })
}

/// Run the speaker self-test. `callback` is invoked exactly once, possibly
/// from another thread, with 1 when the test clip played to the end.
#[no_mangle]
pub extern "C" fn tono_is_speaker_available(
    handle: *mut PlayerHandle,
    callback: TonoSpeakerCallback,
    user_data: *mut c_void,
) -> i32 {
    let Some(callback) = callback else {
        set_error("null callback".into());
        return 0;
    };
    let data = UserData(user_data);
    with_player(handle, |player| {
        player.is_speaker_available(move |available| callback(available as i32, data.get()));
        Ok(())
    })
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Session state name: idle, preparing, playing or paused (caller frees).
#[no_mangle]
pub extern "C" fn tono_state(handle: *mut PlayerHandle) -> *mut c_char {
    clear_error();
    match player_ref(handle) {
        Ok(p) => to_cstr(p.state().as_str().to_string()),
        Err(e) => err_null(e),
    }
}

/// Engine status code, -1 when destroyed or on error.
#[no_mangle]
pub extern "C" fn tono_status(handle: *mut PlayerHandle) -> i32 {
    clear_error();
    match player_ref(handle) {
        Ok(p) => p.status(),
        Err(e) => {
            set_error(e);
            -1
        }
    }
}

/// Engine status name, e.g. STARTED (caller frees).
#[no_mangle]
pub extern "C" fn tono_status_name(handle: *mut PlayerHandle) -> *mut c_char {
    clear_error();
    match player_ref(handle) {
        Ok(p) => to_cstr(p.status_name()),
        Err(e) => err_null(e),
    }
}

#[no_mangle]
pub extern "C" fn tono_is_playing(handle: *mut PlayerHandle) -> i32 {
    query_flag(handle, Player::is_playing)
}

#[no_mangle]
pub extern "C" fn tono_is_paused(handle: *mut PlayerHandle) -> i32 {
    query_flag(handle, Player::is_paused)
}

#[no_mangle]
pub extern "C" fn tono_is_stopped(handle: *mut PlayerHandle) -> i32 {
    query_flag(handle, Player::is_stopped)
}

/// Current track as `{"full_path","directory","filename"}` JSON (caller frees).
#[no_mangle]
pub extern "C" fn tono_current_track(handle: *mut PlayerHandle) -> *mut c_char {
    clear_error();
    match player_ref(handle) {
        Ok(p) => json_to_cstr(&p.current_track()),
        Err(e) => err_null(e),
    }
}

/// Pending tracks as a JSON array, oldest first (caller frees).
#[no_mangle]
pub extern "C" fn tono_queue(handle: *mut PlayerHandle) -> *mut c_char {
    clear_error();
    match player_ref(handle) {
        Ok(p) => json_to_cstr(&p.queued()),
        Err(e) => err_null(e),
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Volume 0-100, -1 on error.
#[no_mangle]
pub extern "C" fn tono_volume(handle: *mut PlayerHandle) -> i32 {
    clear_error();
    match player_ref(handle) {
        Ok(p) => p.volume() as i32,
        Err(e) => {
            set_error(e);
            -1
        }
    }
}

#[no_mangle]
pub extern "C" fn tono_set_volume(handle: *mut PlayerHandle, volume: u32) -> i32 {
    with_player(handle, |player| {
        if player.set_volume(volume) {
            Ok(())
        } else {
            Err(TonoError::VolumeOutOfRange(volume).to_string())
        }
    })
}

/// Declared duration of the loaded track in milliseconds, -1 on error.
#[no_mangle]
pub extern "C" fn tono_duration_ms(handle: *mut PlayerHandle) -> i64 {
    clear_error();
    match player_ref(handle) {
        Ok(p) => p.duration_ms() as i64,
        Err(e) => {
            set_error(e);
            -1
        }
    }
}

/// Media info JSON object (caller frees). Title and artist are empty and
/// `media` is `null` until a source has been probed.
#[no_mangle]
pub extern "C" fn tono_media_info(handle: *mut PlayerHandle) -> *mut c_char {
    clear_error();
    match player_ref(handle) {
        Ok(p) => {
            let info = serde_json::json!({
                "title": p.title(),
                "artist": p.artist(),
                "duration_ms": p.duration_ms(),
                "media": p.media_info(),
            });
            json_to_cstr(&info)
        }
        Err(e) => err_null(e),
    }
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// Returns the FFI API version.
#[no_mangle]
pub extern "C" fn tono_version() -> u32 {
    1
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn player_ref<'a>(handle: *mut PlayerHandle) -> Result<&'a Player, String> {
    if handle.is_null() {
        return Err("null player handle".into());
    }
    let inner = unsafe { &*(handle as *mut PlayerHandleInner) };
    Ok(&inner.player)
}

fn with_player(
    handle: *mut PlayerHandle,
    f: impl FnOnce(&Player) -> Result<(), String>,
) -> i32 {
    clear_error();
    match player_ref(handle).and_then(f) {
        Ok(()) => 1,
        Err(e) => {
            set_error(e);
            0
        }
    }
}

fn query_flag(handle: *mut PlayerHandle, f: impl FnOnce(&Player) -> bool) -> i32 {
    clear_error();
    match player_ref(handle) {
        Ok(p) => f(p) as i32,
        Err(e) => {
            set_error(e);
            0
        }
    }
}

fn read_cstr(ptr: *const c_char) -> Result<String, String> {
    if ptr.is_null() {
        return Err("null string pointer".into());
    }
    unsafe {
        CStr::from_ptr(ptr)
            .to_str()
            .map(String::from)
            .map_err(|_| "invalid utf-8".into())
    }
}

fn json_to_cstr<T: serde::Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => to_cstr(json),
        Err(e) => err_null(e.to_string()),
    }
}

fn to_cstr(s: String) -> *mut c_char {
    CString::new(s)
        .map(|c| c.into_raw())
        .unwrap_or(ptr::null_mut())
}

fn err_null(msg: String) -> *mut c_char {
    set_error(msg);
    ptr::null_mut()
}

// ---------------------------------------------------------------------------
// FFI Integration Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use once_cell::sync::Lazy;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;

    static REGISTRY_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    /// Open a session via FFI with a temp scratch dir. Returns (dir, handle, guard).
    fn ffi_player(
        options: serde_json::Value,
    ) -> (TempDir, *mut PlayerHandle, std::sync::MutexGuard<'static, ()>) {
        let guard = REGISTRY_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let dir = TempDir::new().expect("tempdir");
        let mut options = options;
        options["scratch_dir"] = serde_json::json!(dir.path());
        let json = c(&options.to_string());
        let handle = unsafe { tono_open(json.as_ptr()) };
        assert!(!handle.is_null(), "tono_open returned null");
        (dir, handle, guard)
    }

    /// Read a *mut c_char into a String and free it.
    fn read_ffi_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null(), "FFI returned null string");
        let s = unsafe { CStr::from_ptr(ptr).to_str().unwrap().to_string() };
        unsafe { tono_string_free(ptr) };
        s
    }

    fn last_error() -> String {
        read_ffi_string(tono_last_error())
    }

    fn c(s: &str) -> CString {
        CString::new(s).unwrap()
    }

    /// `user_data` is a leaked `Mutex<Sender<String>>`.
    extern "C" fn forward_info(info_json: *const c_char, user_data: *mut c_void) {
        let tx = unsafe { &*(user_data as *const Mutex<mpsc::Sender<String>>) };
        let json = unsafe { CStr::from_ptr(info_json).to_string_lossy().into_owned() };
        let _ = tx.lock().unwrap().send(json);
    }

    extern "C" fn forward_flag(available: i32, user_data: *mut c_void) {
        let tx = unsafe { &*(user_data as *const Mutex<mpsc::Sender<i32>>) };
        let _ = tx.lock().unwrap().send(available);
    }

    fn channel<T>() -> (*mut c_void, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel();
        let data = Box::leak(Box::new(Mutex::new(tx))) as *mut Mutex<mpsc::Sender<T>>;
        (data as *mut c_void, rx)
    }

    // -------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------

    #[test]
    fn ffi_version() {
        assert_eq!(tono_version(), 1);
    }

    #[test]
    fn ffi_open_close_lifecycle() {
        let (_dir, handle, _guard) = ffi_player(serde_json::json!({}));
        assert_eq!(tono_status(handle), 0);
        assert_eq!(read_ffi_string(tono_status_name(handle)), "IDLE");
        assert_eq!(read_ffi_string(tono_state(handle)), "idle");
        assert_eq!(tono_is_stopped(handle), 1);
        tono_close(handle);
    }

    #[test]
    fn ffi_second_open_shares_session() {
        let (_dir, first, _guard) = ffi_player(serde_json::json!({}));
        let second = unsafe { tono_open(ptr::null()) };
        assert!(!second.is_null());

        let path = c("/data/sfx/ding.mp3");
        assert_eq!(unsafe { tono_change_file(first, path.as_ptr()) }, 1);
        let track = read_ffi_string(tono_current_track(second));
        assert!(track.contains("ding.mp3"));

        tono_close(second);
        assert_eq!(tono_status(first), -1);
        tono_close(first);
    }

    #[test]
    fn ffi_null_handle_returns_error() {
        let ptr = tono_state(ptr::null_mut());
        assert!(ptr.is_null());
        assert!(last_error().contains("null"));
        assert_eq!(tono_pause(ptr::null_mut()), 0);
        assert_eq!(tono_status(ptr::null_mut()), -1);
    }

    #[test]
    fn ffi_invalid_options_rejected() {
        let _guard = REGISTRY_LOCK.lock().unwrap_or_else(|p| p.into_inner());
        let json = c(r#"{"use_queue": "sometimes"}"#);
        let handle = unsafe { tono_open(json.as_ptr()) };
        assert!(handle.is_null());
        assert!(last_error().contains("invalid player options"));
    }

    #[test]
    fn ffi_options_track_is_selected() {
        let (_dir, handle, _guard) =
            ffi_player(serde_json::json!({"track": "/music/intro.wav", "stop_on_change": true}));
        let track: serde_json::Value =
            serde_json::from_str(&read_ffi_string(tono_current_track(handle))).unwrap();
        assert_eq!(track["directory"], "/music/");
        assert_eq!(track["filename"], "intro.wav");
        tono_close(handle);
    }

    #[test]
    fn ffi_media_info_before_anything_is_loaded() {
        let (_dir, handle, _guard) = ffi_player(serde_json::json!({}));
        let info: serde_json::Value =
            serde_json::from_str(&read_ffi_string(tono_media_info(handle))).unwrap();
        assert_eq!(info["title"], "");
        assert_eq!(info["artist"], "");
        assert_eq!(info["duration_ms"], 0);
        assert!(info["media"].is_null());
        tono_close(handle);
    }

    // -------------------------------------------------------------------
    // Usage errors
    // -------------------------------------------------------------------

    #[test]
    fn ffi_negative_timeout_rejected() {
        let (_dir, handle, _guard) = ffi_player(serde_json::json!({}));
        assert_eq!(tono_set_fail_timeout(handle, -5), 0);
        assert!(last_error().contains("negative"));
        assert_eq!(tono_set_fail_timeout(handle, 1500), 1);
        tono_close(handle);
    }

    #[test]
    fn ffi_volume_bounds() {
        let (_dir, handle, _guard) = ffi_player(serde_json::json!({}));
        assert_eq!(tono_set_volume(handle, 40), 1);
        assert_eq!(tono_volume(handle), 40);
        assert_eq!(tono_set_volume(handle, 101), 0);
        assert!(last_error().contains("101"));
        assert_eq!(tono_volume(handle), 40);
        tono_close(handle);
    }

    // -------------------------------------------------------------------
    // Playback via FFI
    // -------------------------------------------------------------------

    #[test]
    fn ffi_missing_file_reports_failure() {
        let (_dir, handle, _guard) = ffi_player(serde_json::json!({}));
        let (data, rx) = channel::<String>();
        assert_eq!(tono_on_fail(handle, Some(forward_info), data), 1);

        let path = c("/nonexistent/tono/missing.mp3");
        assert_eq!(unsafe { tono_play(handle, path.as_ptr()) }, 1);

        let json = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        let info: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(info["full_path"], "/nonexistent/tono/missing.mp3");
        assert!(info.get("elapsed_ms").is_none());
        assert_eq!(read_ffi_string(tono_state(handle)), "idle");
        tono_close(handle);
    }

    #[test]
    fn ffi_speaker_test_completes() {
        let (_dir, handle, _guard) = ffi_player(serde_json::json!({}));
        let (data, rx) = channel::<i32>();
        assert_eq!(tono_is_speaker_available(handle, Some(forward_flag), data), 1);
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 1);
        tono_close(handle);
    }

    #[test]
    fn ffi_speaker_test_needs_callback() {
        let (_dir, handle, _guard) = ffi_player(serde_json::json!({}));
        assert_eq!(tono_is_speaker_available(handle, None, ptr::null_mut()), 0);
        tono_close(handle);
    }

    #[test]
    fn ffi_play_without_track_is_harmless() {
        let (_dir, handle, _guard) = ffi_player(serde_json::json!({}));
        assert_eq!(unsafe { tono_play(handle, ptr::null()) }, 1);
        assert_eq!(tono_is_playing(handle), 0);
        assert_eq!(read_ffi_string(tono_queue(handle)), "[]");
        tono_close(handle);
    }

    // -------------------------------------------------------------------
    // String free safety
    // -------------------------------------------------------------------

    #[test]
    fn ffi_string_free_null_safe() {
        unsafe { tono_string_free(ptr::null_mut()) };
    }
}
