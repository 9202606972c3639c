//! Logging helpers shared by the session and the engines.

use std::time::Instant;

use log::LevelFilter;

/// Set the verbosity with the player's numeric levels.
///
/// 0 silences everything, 5 logs every call. Values above 5 clamp to trace.
pub fn set_log_level(level: u8) {
    let filter = level_filter(level);
    log::set_max_level(filter);
    log::info!("tono: log level set to {} ({})", level, filter);
}

pub(crate) fn level_filter(level: u8) -> LevelFilter {
    match level {
        0 => LevelFilter::Off,
        1 => LevelFilter::Error,
        2 => LevelFilter::Warn,
        3 => LevelFilter::Info,
        4 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Run `f`, tracing entry, exit and wall time.
pub(crate) fn timed<T>(label: &str, f: impl FnOnce() -> T) -> T {
    if !log::log_enabled!(log::Level::Trace) {
        return f();
    }
    let start = Instant::now();
    log::trace!("tono: >>> {}", label);
    let out = f();
    log::trace!("tono: <<< {}, {}us", label, start.elapsed().as_micros());
    out
}

/// Log errors from session steps without propagating them.
pub(crate) fn log_err<T, E: std::fmt::Display>(result: Result<T, E>, context: &str) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            log::warn!("tono: {}: {}", context, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_levels_map_onto_filters() {
        assert_eq!(level_filter(0), LevelFilter::Off);
        assert_eq!(level_filter(1), LevelFilter::Error);
        assert_eq!(level_filter(3), LevelFilter::Info);
        assert_eq!(level_filter(5), LevelFilter::Trace);
        assert_eq!(level_filter(42), LevelFilter::Trace);
    }

    #[test]
    fn timed_returns_closure_value() {
        assert_eq!(timed("answer", || 42), 42);
    }

    #[test]
    fn log_err_passes_ok_through() {
        assert_eq!(log_err::<_, String>(Ok(7), "ctx"), Some(7));
        assert_eq!(log_err::<u8, _>(Err("boom"), "ctx"), None);
    }
}
