//! Media probing via an external `ffprobe` subprocess.
//!
//! Grounded on the teacher's `ffmpeg::get_metadata` for invoking `ffprobe`
//! through `tokio::process::Command`, narrowed to the fields
//! `original_source/src/retrovue/plex/validation.py`'s `_get_media_info`
//! actually reads.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("failed to launch ffprobe: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("ffprobe timed out after {0:?}")]
    Timeout(Duration),
    #[error("ffprobe exited with a non-zero status: {0}")]
    NonZeroExit(String),
    #[error("failed to parse ffprobe output: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawStream {
    codec_type: String,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    width: Option<i64>,
    #[serde(default)]
    height: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawProbeOutput {
    format: RawFormat,
    #[serde(default)]
    streams: Vec<RawStream>,
}

#[derive(Debug, Clone, Default)]
pub struct ProbeInfo {
    pub duration_ms: i64,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Invoke `ffprobe` against `path` and extract duration/codec/resolution.
/// Returns [`ProbeError::Timeout`] if the process doesn't exit within
/// `timeout`, killing the child on the way out.
pub async fn probe(ffprobe_path: &str, path: &Path, timeout: Duration) -> Result<ProbeInfo, ProbeError> {
    let mut child = tokio::process::Command::new(ffprobe_path)
        .args([
            "-v".as_ref(),
            "quiet".as_ref(),
            "-print_format".as_ref(),
            "json".as_ref(),
            "-show_format".as_ref(),
            "-show_streams".as_ref(),
            path.as_os_str(),
        ])
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .spawn()
        .map_err(ProbeError::Spawn)?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result.map_err(ProbeError::Spawn)?,
        Err(_) => return Err(ProbeError::Timeout(timeout)),
    };

    if !output.status.success() {
        return Err(ProbeError::NonZeroExit(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    let raw: RawProbeOutput = serde_json::from_slice(&output.stdout)?;
    let duration_ms = raw
        .format
        .duration
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0) as i64)
        .unwrap_or(0);

    let video_stream = raw.streams.iter().find(|s| s.codec_type == "video");
    let audio_stream = raw.streams.iter().find(|s| s.codec_type == "audio");

    Ok(ProbeInfo {
        duration_ms,
        video_codec: video_stream.and_then(|s| s.codec_name.clone()),
        audio_codec: audio_stream.and_then(|s| s.codec_name.clone()),
        width: video_stream.and_then(|s| s.width),
        height: video_stream.and_then(|s| s.height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_duration_and_streams_from_raw_json() {
        let raw = r#"{
            "format": {"duration": "120.5"},
            "streams": [
                {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080},
                {"codec_type": "audio", "codec_name": "aac"}
            ]
        }"#;
        let parsed: RawProbeOutput = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.streams.len(), 2);
        assert_eq!(parsed.format.duration.as_deref(), Some("120.5"));
    }
}
