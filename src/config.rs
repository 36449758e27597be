use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use crate::error::{Result, UpmuxError};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the run log, retry queue, salt, identity store and documents
    pub state_dir: PathBuf,
    pub tools: ToolsConfig,
    pub gate: GateConfig,
    pub validation: ValidationConfig,
    pub media: MediaConfig,
    pub remote: RemoteConfig,
    pub notify: NotifyConfig,
    pub identity: IdentityConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// Path to ffmpeg binary
    pub ffmpeg: String,
    /// Path to ffprobe binary
    pub ffprobe: String,
    /// Path to mediainfo binary
    pub mediainfo: String,
    /// Path to rclone binary
    pub rclone: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Suffix the uploader gives to files still being written
    pub partial_suffix: String,
    /// Interval between directory scans while waiting for idle
    pub poll_interval_ms: u64,
    /// Number of consecutive clean scans before the directory counts as idle
    pub debounce_polls: u32,
    /// Give up waiting for idle after this long and process anyway
    pub idle_timeout_secs: u64,
    /// Named lock files; their count caps concurrent runs
    pub lock_paths: Vec<PathBuf>,
    /// Sleep between lock pool sweeps
    pub lock_retry_ms: u64,
    /// Marker file name written into directories that need no reprocessing
    pub processed_marker: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Only ship items whose upstream verdict equals `pass_value`
    pub conditional_upload: bool,
    /// Metadata key carrying the upstream verdict
    pub verdict_key: String,
    pub pass_value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    /// Bounding box for generated thumbnails
    pub thumbnail_width: u32,
    pub thumbnail_height: u32,
    /// Filename suffix identifying a metadata sidecar
    pub sidecar_suffix: String,
    /// MIME type of an embedded sidecar attachment
    pub sidecar_mime: String,
    /// Extensions (without leading dot) that are shipped to the remote
    pub ship_extensions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// rclone remote name; files land in `{name}:{identifier}/`
    pub name: String,
    /// Log the sync command instead of running it and keep local files
    pub dry_run: bool,
    /// Manifest file written into the item directory
    pub manifest_name: String,
    /// Failed sync commands are appended here for manual retry
    pub retry_queue: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Webhook receiving outcome embeds; notices are only logged when unset
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// SQLite database mapping requester addresses to identities
    pub store_path: PathBuf,
    /// File holding the salt for derived identities
    pub salt_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root of the sharded metadata document tree
    pub documents_dir: PathBuf,
    /// Directory of the append-only run log
    pub log_dir: PathBuf,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            ffmpeg: "ffmpeg".to_string(),
            ffprobe: "ffprobe".to_string(),
            mediainfo: "mediainfo".to_string(),
            rclone: "rclone".to_string(),
        }
    }
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            partial_suffix: ".PARTIAL".to_string(),
            poll_interval_ms: 1000,
            debounce_polls: 10,
            idle_timeout_secs: 600,
            lock_paths: vec![
                PathBuf::from("/dev/shm/upmux-lock1"),
                PathBuf::from("/dev/shm/upmux-lock2"),
            ],
            lock_retry_ms: 1000,
            processed_marker: ".processed".to_string(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            conditional_upload: true,
            verdict_key: "vidchk".to_string(),
            pass_value: "ok".to_string(),
        }
    }
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            thumbnail_width: 512,
            thumbnail_height: 288,
            sidecar_suffix: ".info.json".to_string(),
            sidecar_mime: "application/json".to_string(),
            ship_extensions: [
                "mp4", "webm", "mkv", "flv", "opus", "ogg", "mp3", "m4a", "aac",
                "webp", "jpg", "png", "chat.json", "info.json",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            name: "archive".to_string(),
            dry_run: false,
            manifest_name: "rclone.lst".to_string(),
            retry_queue: PathBuf::from("failed-syncs.sh"),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            store_path: PathBuf::from("identities.db3"),
            salt_path: PathBuf::from("salt"),
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            documents_dir: PathBuf::from("documents"),
            log_dir: PathBuf::from("log"),
        }
    }
}

impl GateConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.lock_retry_ms)
    }
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| UpmuxError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&content)
            .map_err(|e| UpmuxError::Config(format!("Failed to parse config file: {}", e)))
    }

    /// Resolve a state path against `state_dir` unless it is already absolute
    pub fn state_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.state_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let config: Config = toml::from_str(
            r#"
            state_dir = "/srv/upmux"

            [remote]
            name = "gdrive"
            dry_run = true
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.name, "gdrive");
        assert!(config.remote.dry_run);
        assert_eq!(config.remote.manifest_name, "rclone.lst");
        assert_eq!(config.gate.lock_paths.len(), 2);
        assert_eq!(config.tools.ffmpeg, "ffmpeg");
        assert_eq!(config.state_path("salt"), PathBuf::from("/srv/upmux/salt"));
        assert_eq!(config.state_path("/etc/salt"), PathBuf::from("/etc/salt"));
    }
}
