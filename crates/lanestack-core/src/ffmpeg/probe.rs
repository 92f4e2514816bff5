//! ffprobe invocation and JSON parsing
//!
//! One probe call per file:
//! `ffprobe -v error -select_streams a -show_streams -of json <file>`.
//! Every stream field is defaulted individually; a missing sample rate or
//! duration never aborts the parse. Zero audio streams is a successful,
//! empty result.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use super::locator::ToolLocator;
use super::process::run_with_timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from probing a single file
#[derive(Error, Debug)]
pub enum ProbeError {
    /// ffprobe is not installed or not on PATH
    #[error("ffprobe not found; install FFmpeg to add media files")]
    ToolMissing,

    /// The media file itself is missing
    #[error("file not found: {0}")]
    FileMissing(PathBuf),

    /// The subprocess could not be started
    #[error("failed to start ffprobe: {0}")]
    SpawnFailed(String),

    /// ffprobe ran but reported failure
    #[error("ffprobe exited with {code}: {output}")]
    NonZeroExit { code: String, output: String },

    /// Output was not the JSON we asked for
    #[error("unparseable ffprobe output: {0}")]
    MalformedOutput(String),
}

/// Result type for probe operations
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Metadata for one audio stream, as reported by ffprobe. Ephemeral:
/// produced per probe call, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioStreamInfo {
    pub stream_index: usize,
    pub channels: usize,
    /// Hz; 0.0 when ffprobe omitted the field
    pub sample_rate: f64,
    pub codec: String,
    pub channel_layout: String,
    /// Seconds; 0.0 when unknown on both the stream and its tags
    pub duration: f64,
    /// Bits per second; 0 when unknown
    pub bit_rate: i64,
}

// ffprobe's JSON shape. Numeric-looking values arrive as strings
// (sample_rate, duration, bit_rate), hence the string fields here.
#[derive(Debug, Deserialize, Default)]
struct ProbeDocument {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeStream {
    #[serde(default)]
    index: Option<i64>,
    #[serde(default)]
    channels: Option<i64>,
    #[serde(default)]
    sample_rate: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
    #[serde(default)]
    channel_layout: Option<String>,
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
    #[serde(default)]
    tags: Option<ProbeTags>,
}

#[derive(Debug, Deserialize, Default)]
struct ProbeTags {
    // Matroska keeps duration in a tag instead of the stream entry
    #[serde(rename = "DURATION", default)]
    duration: Option<String>,
}

impl ProbeStream {
    fn into_info(self) -> AudioStreamInfo {
        let duration = self
            .duration
            .as_deref()
            .and_then(parse_seconds)
            .or_else(|| {
                self.tags
                    .as_ref()
                    .and_then(|t| t.duration.as_deref())
                    .and_then(parse_seconds)
            })
            .unwrap_or(0.0);

        AudioStreamInfo {
            stream_index: self.index.unwrap_or(0).max(0) as usize,
            channels: self.channels.unwrap_or(0).max(0) as usize,
            sample_rate: self
                .sample_rate
                .as_deref()
                .and_then(|s| s.parse::<f64>().ok())
                .unwrap_or(0.0),
            codec: self.codec_name.unwrap_or_default(),
            channel_layout: self.channel_layout.unwrap_or_default(),
            duration,
            bit_rate: self
                .bit_rate
                .as_deref()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(0),
        }
    }
}

/// Seconds from either a plain float or a "HH:MM:SS.sss" tag value
fn parse_seconds(text: &str) -> Option<f64> {
    let text = text.trim();
    if let Ok(secs) = text.parse::<f64>() {
        return Some(secs);
    }
    let mut parts = text.split(':');
    let h = parts.next()?.parse::<f64>().ok()?;
    let m = parts.next()?.parse::<f64>().ok()?;
    let s = parts.next()?.parse::<f64>().ok()?;
    Some(h * 3600.0 + m * 60.0 + s)
}

/// Runs ffprobe against media files and parses the audio stream list
pub struct MediaProber {
    locator: ToolLocator,
}

impl MediaProber {
    pub fn new(locator: ToolLocator) -> Self {
        Self { locator }
    }

    /// Probe a file for audio streams
    ///
    /// Blocking (subprocess wait, up to 30s); run from a background
    /// thread, never the coordinating thread.
    pub fn probe(&self, file: &Path) -> ProbeResult<Vec<AudioStreamInfo>> {
        let Some(ffprobe) = self.locator.ffprobe_path() else {
            return Err(ProbeError::ToolMissing);
        };
        if !file.is_file() {
            return Err(ProbeError::FileMissing(file.to_path_buf()));
        }

        let mut cmd = Command::new(ffprobe);
        cmd.args(["-v", "error", "-select_streams", "a", "-show_streams", "-of", "json"])
            .arg(file);

        let output = run_with_timeout(&mut cmd, PROBE_TIMEOUT)
            .map_err(|e| ProbeError::SpawnFailed(e.to_string()))?;

        if !output.success() {
            let code = output
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal/timeout".to_string());
            return Err(ProbeError::NonZeroExit {
                code,
                output: output.combined_text(),
            });
        }

        let streams = parse_probe_json(&String::from_utf8_lossy(&output.stdout))?;
        log::debug!("probed {:?}: {} audio stream(s)", file, streams.len());
        Ok(streams)
    }
}

/// Parse ffprobe's JSON document into stream infos (pure, unit-tested)
pub(crate) fn parse_probe_json(text: &str) -> ProbeResult<Vec<AudioStreamInfo>> {
    let doc: ProbeDocument = serde_json::from_str(text)
        .map_err(|e| ProbeError::MalformedOutput(e.to_string()))?;
    Ok(doc.streams.into_iter().map(ProbeStream::into_info).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_stream_entry() {
        let json = r#"{
            "streams": [{
                "index": 1,
                "codec_name": "pcm_s24le",
                "channels": 4,
                "channel_layout": "4.0",
                "sample_rate": "48000",
                "duration": "12.5",
                "bit_rate": "4608000"
            }]
        }"#;
        let streams = parse_probe_json(json).unwrap();
        assert_eq!(streams.len(), 1);
        let s = &streams[0];
        assert_eq!(s.stream_index, 1);
        assert_eq!(s.channels, 4);
        assert_eq!(s.sample_rate, 48000.0);
        assert_eq!(s.codec, "pcm_s24le");
        assert_eq!(s.duration, 12.5);
        assert_eq!(s.bit_rate, 4_608_000);
    }

    #[test]
    fn missing_fields_default_instead_of_failing() {
        let json = r#"{"streams": [{"index": 0}]}"#;
        let streams = parse_probe_json(json).unwrap();
        let s = &streams[0];
        assert_eq!(s.channels, 0);
        assert_eq!(s.sample_rate, 0.0);
        assert_eq!(s.duration, 0.0);
        assert_eq!(s.bit_rate, 0);
        assert!(s.codec.is_empty());
    }

    #[test]
    fn duration_falls_back_to_tags() {
        let json = r#"{
            "streams": [{
                "index": 0,
                "channels": 2,
                "tags": {"DURATION": "00:01:30.500000000"}
            }]
        }"#;
        let streams = parse_probe_json(json).unwrap();
        assert!((streams[0].duration - 90.5).abs() < 1e-6);
    }

    #[test]
    fn no_streams_key_is_success_with_empty_list() {
        assert!(parse_probe_json("{}").unwrap().is_empty());
    }

    #[test]
    fn garbage_is_malformed_output() {
        assert!(matches!(
            parse_probe_json("not json"),
            Err(ProbeError::MalformedOutput(_))
        ));
    }
}
