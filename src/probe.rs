use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, UpmuxError};
use crate::media::{MediaCommand, MediaCommandBuilder};
use crate::runner::CommandRunner;

/// `ffprobe -show_streams -show_format -of json` output
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamReport {
    #[serde(default)]
    pub streams: Vec<ProbedStream>,
    #[serde(default)]
    pub format: ProbedFormat,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbedStream {
    pub index: u32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub r_frame_rate: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProbedFormat {
    pub format_name: Option<String>,
    pub duration: Option<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl ProbedStream {
    /// Tag lookup ignoring the key's case
    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }

    fn is(&self, kind: &str) -> bool {
        self.codec_type.as_deref() == Some(kind)
    }

    /// Frame rate from the `num/den` rational
    pub fn frame_rate(&self) -> Option<f64> {
        let rate = self.r_frame_rate.as_deref()?;
        match rate.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.parse().ok()?;
                let den: f64 = den.parse().ok()?;
                (den != 0.0).then(|| num / den)
            }
            None => rate.parse().ok(),
        }
    }
}

impl ProbedFormat {
    pub fn tag(&self, key: &str) -> Option<&str> {
        find_tag(&self.tags, key)
    }
}

fn find_tag<'a>(tags: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    tags.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

impl StreamReport {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| UpmuxError::Probe(format!("Unreadable stream report: {}", e)))
    }

    /// First real video stream; attached pictures do not count
    pub fn first_video(&self) -> Option<&ProbedStream> {
        self.streams
            .iter()
            .find(|s| s.is("video") && !is_attached_picture(s))
    }

    pub fn first_audio(&self) -> Option<&ProbedStream> {
        self.streams.iter().find(|s| s.is("audio"))
    }

    /// Index of the stream carrying a metadata sidecar
    ///
    /// A filename ending in `suffix` wins over a matching MIME type.
    pub fn sidecar_stream(&self, suffix: &str, mime: &str) -> Option<u32> {
        let suffix = suffix.to_lowercase();
        let by_name = self.streams.iter().find(|s| {
            s.tag("filename")
                .is_some_and(|name| name.to_lowercase().ends_with(&suffix))
        });
        let by_mime = self.streams.iter().find(|s| {
            s.tag("mimetype")
                .is_some_and(|m| m.eq_ignore_ascii_case(mime))
        });
        by_name.or(by_mime).map(|s| s.index)
    }
}

fn is_attached_picture(stream: &ProbedStream) -> bool {
    matches!(stream.codec_name.as_deref(), Some("mjpeg" | "png" | "webp" | "bmp"))
        && stream.frame_rate().is_none_or(|fps| fps < 1.0)
}

/// `mediainfo --Output=JSON` output
#[derive(Debug, Clone, Deserialize)]
pub struct ContainerReport {
    pub media: ContainerMedia,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerMedia {
    #[serde(default)]
    pub track: Vec<ContainerTrack>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerTrack {
    #[serde(rename = "@type")]
    pub kind: String,
    #[serde(flatten)]
    pub fields: HashMap<String, Value>,
}

impl ContainerTrack {
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

impl ContainerReport {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| UpmuxError::Probe(format!("Unreadable container report: {}", e)))
    }

    pub fn general(&self) -> Option<&ContainerTrack> {
        self.media.track.iter().find(|t| t.kind == "General")
    }

    pub fn has_video(&self) -> bool {
        self.media.track.iter().any(|t| t.kind == "Video")
    }

    /// Lowercased container format name
    pub fn format(&self) -> Option<String> {
        self.general()?.field("Format").map(str::to_lowercase)
    }

    pub fn is_streamable(&self) -> bool {
        self.general()
            .and_then(|g| g.field("IsStreamable"))
            .is_some_and(|v| v == "Yes")
    }

    pub fn description(&self) -> Option<String> {
        self.general()?.field("Description").map(str::to_string)
    }
}

/// Runs the probe utilities and parses their output
pub struct Prober<'a> {
    runner: &'a dyn CommandRunner,
    commands: &'a MediaCommandBuilder,
}

impl<'a> Prober<'a> {
    pub fn new(runner: &'a dyn CommandRunner, commands: &'a MediaCommandBuilder) -> Self {
        Self { runner, commands }
    }

    pub async fn streams(&self, media: &Path) -> Result<StreamReport> {
        let stdout = self.capture(self.commands.probe_streams(media)).await?;
        StreamReport::from_json(&stdout)
    }

    pub async fn container(&self, media: &Path) -> Result<ContainerReport> {
        let stdout = self.capture(self.commands.media_info(media)).await?;
        ContainerReport::from_json(&stdout)
    }

    async fn capture(&self, command: MediaCommand) -> Result<Vec<u8>> {
        let outcome = self.runner.run(&command).await?;
        if !outcome.success() {
            return Err(UpmuxError::Probe(format!(
                "{} failed: {}",
                command.description, outcome.message
            )));
        }
        debug!("{} returned {} bytes", command.description, outcome.stdout.len());
        Ok(outcome.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAMS: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "vp9", "width": 1920, "height": 1080, "r_frame_rate": "30000/1001"},
            {"index": 1, "codec_type": "audio", "codec_name": "opus"},
            {"index": 2, "codec_type": "attachment", "codec_name": "ttf", "tags": {"filename": "font.ttf", "mimetype": "font/ttf"}},
            {"index": 3, "codec_type": "attachment", "tags": {"filename": "data.json", "mimetype": "application/json"}},
            {"index": 4, "codec_type": "attachment", "tags": {"FILENAME": "Some Title [abcdefghijk].info.json", "mimetype": "application/octet-stream"}}
        ],
        "format": {"format_name": "matroska,webm", "duration": "212.480000", "tags": {"TITLE": "Some Title"}}
    }"#;

    #[test]
    fn sidecar_prefers_filename_over_mime() {
        let report = StreamReport::from_json(STREAMS.as_bytes()).unwrap();
        assert_eq!(report.sidecar_stream(".info.json", "application/json"), Some(4));
        assert_eq!(report.sidecar_stream(".nope", "application/json"), Some(3));
        assert_eq!(report.sidecar_stream(".nope", "text/plain"), None);
    }

    #[test]
    fn stream_lookups() {
        let report = StreamReport::from_json(STREAMS.as_bytes()).unwrap();
        let video = report.first_video().unwrap();
        assert_eq!(video.codec_name.as_deref(), Some("vp9"));
        assert!((video.frame_rate().unwrap() - 29.97).abs() < 0.01);
        assert_eq!(report.first_audio().unwrap().index, 1);
        assert_eq!(report.format.tag("title"), Some("Some Title"));
    }

    #[test]
    fn container_report_fields() {
        let report = ContainerReport::from_json(
            br#"{"media": {"track": [
                {"@type": "General", "Format": "MPEG-4", "IsStreamable": "Yes", "Description": "hello"},
                {"@type": "Audio", "Format": "AAC"}
            ]}}"#,
        )
        .unwrap();
        assert_eq!(report.format().as_deref(), Some("mpeg-4"));
        assert!(report.is_streamable());
        assert!(!report.has_video());
        assert_eq!(report.description().as_deref(), Some("hello"));
    }
}
