//! Source probing: symphonia for the stream layout, lofty for tags.
//!
//! Used by the bundled engines to answer `prepare()` and by hosts that want
//! to inspect a file before queueing it.

use std::fs::File;
use std::path::Path;

use lofty::prelude::*;
use lofty::probe::Probe;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use crate::error::{Result, TonoError};
use crate::models::media::MediaInfo;

/// Layout of a file's default track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    pub sample_rate: u32,
    pub channels: u16,
    /// 0 when the container doesn't declare a frame count.
    pub duration_ms: u64,
}

/// Probe the default track without decoding any packets.
pub fn stream_layout(file_path: &str) -> Result<StreamLayout> {
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

    let track = probed
        .format
        .default_track()
        .ok_or_else(|| TonoError::Decode("no default track".into()))?;
    let params = &track.codec_params;
    let sample_rate = params
        .sample_rate
        .filter(|&r| r > 0)
        .ok_or_else(|| TonoError::Decode("unknown sample rate".into()))?;
    let channels = params.channels.map(|c| c.count() as u16).unwrap_or(2);
    let duration_ms = params
        .n_frames
        .map(|n| n * 1000 / sample_rate as u64)
        .unwrap_or(0);

    Ok(StreamLayout {
        sample_rate,
        channels,
        duration_ms,
    })
}

/// Layout plus whatever tags the file carries.
///
/// Fails only when the audio itself can't be probed; missing tags are fine.
pub fn media_info(file_path: &str) -> Result<MediaInfo> {
    let layout = stream_layout(file_path)?;
    let mut info = MediaInfo {
        duration_ms: layout.duration_ms,
        sample_rate: Some(layout.sample_rate),
        channels: Some(layout.channels),
        ..MediaInfo::default()
    };

    match Probe::open(file_path).and_then(|p| p.read()) {
        Ok(tagged) => {
            if let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) {
                info.title = tag.title().map(|s| s.to_string());
                info.artist = tag.artist().map(|s| s.to_string());
                info.album = tag.album().map(|s| s.to_string());
            }
            if info.duration_ms == 0 {
                info.duration_ms = tagged.properties().duration().as_millis() as u64;
            }
        }
        Err(e) => log::debug!("tono: no tags for {}: {}", file_path, e),
    }

    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_file_is_io_error() {
        let err = stream_layout("/nonexistent/tono/none.mp3").unwrap_err();
        assert!(matches!(err, TonoError::Io(_)));
    }

    #[test]
    fn garbage_is_rejected() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = dir.path().join("noise.mp3");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(b"definitely not an mpeg stream").unwrap();
        drop(f);
        assert!(media_info(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn probes_generated_wav() {
        let dir = tempfile::TempDir::new().expect("tempdir");
        let path = crate::speaker::ensure_clip(dir.path()).unwrap();
        let info = media_info(path.to_str().unwrap()).unwrap();
        assert_eq!(info.sample_rate, Some(crate::config::speaker_test::SAMPLE_RATE));
        assert_eq!(info.channels, Some(1));
        assert!((100..=140).contains(&info.duration_ms), "{}", info.duration_ms);
        assert!(info.title.is_none());
    }
}
