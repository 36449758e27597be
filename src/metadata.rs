use serde_json::{Map, Value};

use crate::probe::StreamReport;

/// Well-known bag keys shared with the invoking host
pub mod keys {
    pub const COMMENT: &str = "comment";
    pub const REQUESTER_ADDRESS: &str = "up_ip";
    pub const RECEIVED_AT: &str = "up_at";
    pub const UPLOADER: &str = "uploader";
    pub const ARTIST: &str = "artist";
    pub const TITLE: &str = "title";
    pub const DATE: &str = "date";
    pub const DESCRIPTION: &str = "description";
    pub const DURATION: &str = ".dur";
    pub const WIDTH: &str = ".resw";
    pub const HEIGHT: &str = ".resh";
    pub const FPS: &str = ".fps";
    pub const RESOLUTION: &str = "res";
    pub const VIDEO_CODEC: &str = "vc";
    pub const AUDIO_CODEC: &str = "ac";
    pub const DOCUMENT_SOURCE: &str = "infoj";
}

/// String-keyed scalar metadata about the upload
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataBag {
    values: Map<String, Value>,
}

impl MetadataBag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse what the host pushed on stdin; only a JSON object counts
    pub fn from_host_bytes(bytes: &[u8]) -> Option<Self> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(values)) => Some(Self { values }),
            _ => None,
        }
    }

    /// Derive the bag from a stream probe when the host sent nothing usable
    pub fn from_stream_report(report: &StreamReport) -> Self {
        let mut bag = Self::new();
        let format = &report.format;

        for (key, tag) in [
            (keys::TITLE, "title"),
            (keys::ARTIST, "artist"),
            (keys::DATE, "date"),
            (keys::DESCRIPTION, "description"),
            (keys::COMMENT, "comment"),
        ] {
            if let Some(value) = format.tag(tag) {
                bag.set(key, value);
            }
        }

        if let Some(duration) = format.duration.as_deref().and_then(|d| d.parse::<f64>().ok()) {
            bag.set(keys::DURATION, duration);
        }

        if let Some(video) = report.first_video() {
            if let Some(codec) = &video.codec_name {
                bag.set(keys::VIDEO_CODEC, codec.as_str());
            }
            if let (Some(w), Some(h)) = (video.width, video.height) {
                bag.set(keys::WIDTH, w);
                bag.set(keys::HEIGHT, h);
                bag.set(keys::RESOLUTION, format!("{}x{}", w, h));
            }
            if let Some(fps) = video.frame_rate() {
                bag.set(keys::FPS, fps);
            }
        }

        if let Some(codec) = report.first_audio().and_then(|a| a.codec_name.as_deref()) {
            bag.set(keys::AUDIO_CODEC, codec);
        }

        bag
    }

    pub fn set<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Scalar value rendered as text; empty strings and null count as absent
    pub fn text(&self, key: &str) -> Option<String> {
        match self.values.get(key)? {
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Numeric value, accepting numbers carried as strings
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.values.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Vertical resolution from `res` (`WxH`), falling back to `.resh`
    pub fn height(&self) -> Option<String> {
        self.text(keys::RESOLUTION)
            .and_then(|res| res.rsplit('x').next().map(str::to_string))
            .filter(|h| !h.is_empty())
            .or_else(|| self.number(keys::HEIGHT).map(|h| (h.round() as i64).to_string()))
    }

    /// Human summary used in notifications: `212s, 1920x1080 vp9/opus`
    pub fn properties_summary(&self) -> String {
        let duration = self.number(keys::DURATION).unwrap_or(0.0) as i64;
        format!(
            "{}s, {} {}/{}",
            duration,
            self.text(keys::RESOLUTION).unwrap_or_else(|| "?".to_string()),
            self.text(keys::VIDEO_CODEC).unwrap_or_else(|| "?".to_string()),
            self.text(keys::AUDIO_CODEC).unwrap_or_else(|| "?".to_string()),
        )
    }
}
