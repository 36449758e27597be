use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{Result, UpmuxError};
use crate::runner::CommandRunner;
use super::classify::{append_extension, prefixed_sibling};
use super::{remove_artifact, MediaCommandBuilder, StreamKind};

/// Container a remux writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemuxTarget {
    Mp4,
    WebM,
}

impl RemuxTarget {
    pub fn extension(&self) -> &'static str {
        match self {
            RemuxTarget::Mp4 => "mp4",
            RemuxTarget::WebM => "webm",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemuxStrategy {
    pub target: RemuxTarget,
    pub exclude_attachments: bool,
}

impl fmt::Display for RemuxStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "remux to {}", self.target.extension())?;
        if self.exclude_attachments {
            write!(f, " without attachments")?;
        }
        Ok(())
    }
}

/// Remux attempts in the order they are tried
pub const REMUX_CHAIN: [RemuxStrategy; 4] = [
    RemuxStrategy { target: RemuxTarget::Mp4, exclude_attachments: false },
    RemuxStrategy { target: RemuxTarget::Mp4, exclude_attachments: true },
    RemuxStrategy { target: RemuxTarget::WebM, exclude_attachments: false },
    RemuxStrategy { target: RemuxTarget::WebM, exclude_attachments: true },
];

/// Source codecs, used to pick split containers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodecHints {
    pub video: Option<String>,
    pub audio: Option<String>,
}

impl CodecHints {
    pub fn video_container(&self) -> &'static str {
        match self.video.as_deref() {
            Some("vp8") => "webm",
            _ => "mp4",
        }
    }

    pub fn audio_container(&self) -> &'static str {
        match self.audio.as_deref() {
            Some("vorbis" | "opus") => "ogg",
            _ => "m4a",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalization {
    Remuxed {
        strategy: RemuxStrategy,
        output: PathBuf,
    },
    Split {
        video: PathBuf,
        audio: PathBuf,
    },
}

impl Normalization {
    /// Files the normalization added
    pub fn outputs(&self) -> Vec<PathBuf> {
        match self {
            Normalization::Remuxed { output, .. } => vec![output.clone()],
            Normalization::Split { video, audio } => vec![video.clone(), audio.clone()],
        }
    }
}

/// Failed attempts of a fallback chain, kept for the final log line
#[derive(Debug, Default)]
pub struct AttemptLog {
    failures: Vec<(String, String)>,
}

impl AttemptLog {
    pub fn failed<S: ToString>(&mut self, attempt: S, error: &str) {
        self.failures.push((attempt.to_string(), error.to_string()));
    }

    pub fn summary(&self) -> String {
        self.failures
            .iter()
            .map(|(attempt, error)| format!("{}: {}", attempt, error))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Drives remux, then split, until one produces web-playable output
pub struct Normalizer<'a> {
    runner: &'a dyn CommandRunner,
    commands: &'a MediaCommandBuilder,
}

impl<'a> Normalizer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, commands: &'a MediaCommandBuilder) -> Self {
        Self { runner, commands }
    }

    pub async fn normalize(&self, media: &Path, hints: &CodecHints) -> Result<Normalization> {
        let mut attempts = AttemptLog::default();

        for strategy in REMUX_CHAIN {
            match self.remux(media, strategy).await? {
                Ok(output) => {
                    info!("{} succeeded: {}", strategy, output.display());
                    return Ok(Normalization::Remuxed { strategy, output });
                }
                Err(error) => attempts.failed(strategy, &error),
            }
        }

        match self.split(media, hints).await? {
            Ok((video, audio)) => {
                info!("Split OK: {} + {}", video.display(), audio.display());
                Ok(Normalization::Split { video, audio })
            }
            Err(error) => {
                attempts.failed("split", &error);
                Err(UpmuxError::NormalizationFailed(attempts.summary()))
            }
        }
    }

    /// Inner `Err` is a failed attempt; outer `Err` means the pipeline cannot go on
    async fn remux(
        &self,
        media: &Path,
        strategy: RemuxStrategy,
    ) -> Result<std::result::Result<PathBuf, String>> {
        let output = append_extension(media, strategy.target.extension());
        let staging = prefixed_sibling(&output, "mux-");
        let command = self
            .commands
            .remux(media, &staging, strategy.exclude_attachments);

        info!("Trying {}: {}", strategy, command.shell_line());
        let outcome = self.runner.run(&command).await?;

        if outcome.success() {
            if !outcome.message.is_empty() {
                info!("{}", outcome.message);
            }
            std::fs::rename(&staging, &output)?;
            return Ok(Ok(output));
        }

        warn!("{} failed; {}", strategy, outcome.message);
        remove_artifact(&staging)?;
        remove_artifact(&output)?;
        Ok(Err(outcome.message))
    }

    async fn split(
        &self,
        media: &Path,
        hints: &CodecHints,
    ) -> Result<std::result::Result<(PathBuf, PathBuf), String>> {
        let video = append_extension(media, &format!("v.{}", hints.video_container()));
        let audio = append_extension(media, &format!("a.{}", hints.audio_container()));
        info!(
            "Splitting into v.{} + a.{}",
            hints.video_container(),
            hints.audio_container()
        );

        for (output, kind) in [(&audio, StreamKind::Audio), (&video, StreamKind::Video)] {
            let command = self.commands.split_stream(media, output, kind);
            info!("Running {}", command.shell_line());
            let outcome = self.runner.run(&command).await?;
            if !outcome.success() {
                warn!("Split failed! {}", outcome.message);
                remove_artifact(&audio)?;
                remove_artifact(&video)?;
                return Ok(Err(outcome.message));
            }
        }

        Ok(Ok((video, audio)))
    }
}
