use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::MediaConfig;
use crate::error::{Result, UpmuxError};
use crate::runner::CommandRunner;
use super::classify::append_extension;
use super::normalize::AttemptLog;
use super::{remove_artifact, MediaCommandBuilder};

/// Extensions that already count as a thumbnail
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "webp", "png"];

/// Attached-picture formats tried in order
const EXTRACT_FORMATS: [&str; 3] = ["webp", "png", "jpg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThumbnailOutcome {
    AlreadyPresent,
    Extracted(PathBuf),
    Generated(PathBuf),
}

impl ThumbnailOutcome {
    pub fn created(&self) -> Option<&Path> {
        match self {
            ThumbnailOutcome::AlreadyPresent => None,
            ThumbnailOutcome::Extracted(p) | ThumbnailOutcome::Generated(p) => Some(p),
        }
    }
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
}

pub struct ThumbnailAcquirer<'a> {
    runner: &'a dyn CommandRunner,
    commands: &'a MediaCommandBuilder,
    config: &'a MediaConfig,
}

impl<'a> ThumbnailAcquirer<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        commands: &'a MediaCommandBuilder,
        config: &'a MediaConfig,
    ) -> Self {
        Self {
            runner,
            commands,
            config,
        }
    }

    /// Ensure one thumbnail exists among `files`
    ///
    /// Extraction and generation failures come back as `ExtractionFailed`,
    /// which callers log and move past.
    pub async fn acquire(&self, media: &Path, files: &[PathBuf]) -> Result<ThumbnailOutcome> {
        if files.iter().any(|f| is_image(f)) {
            info!("Thumbnail already present");
            return Ok(ThumbnailOutcome::AlreadyPresent);
        }

        let mut attempts = AttemptLog::default();

        for ext in EXTRACT_FORMATS {
            let output = append_extension(media, ext);
            let command = self.commands.extract_thumbnail(media, &output);
            info!("thumb-ex {}: {}", ext, command.shell_line());
            let outcome = self.runner.run(&command).await?;
            if outcome.success() {
                info!("thumb-ex OK");
                return Ok(ThumbnailOutcome::Extracted(output));
            }
            warn!("thumb-ex failed; {}", outcome.message);
            remove_artifact(&output)?;
            attempts.failed(format!("extract {}", ext), &outcome.message);
        }

        let output = append_extension(media, "jpg");
        let command = self.commands.generate_thumbnail(
            media,
            &output,
            self.config.thumbnail_width,
            self.config.thumbnail_height,
        );
        info!("thumb-gen: {}", command.shell_line());
        let outcome = self.runner.run(&command).await?;
        if outcome.success() {
            info!("thumb-gen OK");
            return Ok(ThumbnailOutcome::Generated(output));
        }

        remove_artifact(&output)?;
        attempts.failed("generate jpg", &outcome.message);
        Err(UpmuxError::ExtractionFailed(attempts.summary()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolsConfig;
    use crate::runner::{CommandOutcome, MockCommandRunner};
    use mockall::Sequence;

    fn failure() -> CommandOutcome {
        CommandOutcome {
            code: 1,
            message: "ERROR 1: Output file does not contain any stream".to_string(),
            stdout: Vec::new(),
        }
    }

    #[tokio::test]
    async fn existing_image_skips_everything() {
        let runner = MockCommandRunner::new();
        let commands = MediaCommandBuilder::new(ToolsConfig::default());
        let config = MediaConfig::default();
        let files = vec![PathBuf::from("/up/a.mp4"), PathBuf::from("/up/a.JPG")];

        let outcome = ThumbnailAcquirer::new(&runner, &commands, &config)
            .acquire(Path::new("/up/a.mp4"), &files)
            .await
            .unwrap();
        assert_eq!(outcome, ThumbnailOutcome::AlreadyPresent);
    }

    #[tokio::test]
    async fn extraction_tries_formats_in_order() {
        let mut runner = MockCommandRunner::new();
        let mut seq = Sequence::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.args.last().unwrap().ends_with(".webp"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(failure()));
        runner
            .expect_run()
            .withf(|cmd| cmd.args.last().unwrap().ends_with(".png"))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(CommandOutcome::default()));

        let commands = MediaCommandBuilder::new(ToolsConfig::default());
        let config = MediaConfig::default();
        let outcome = ThumbnailAcquirer::new(&runner, &commands, &config)
            .acquire(Path::new("/up/a.mkv"), &[PathBuf::from("/up/a.mkv")])
            .await
            .unwrap();
        assert_eq!(outcome, ThumbnailOutcome::Extracted(PathBuf::from("/up/a.mkv.png")));
    }

    #[tokio::test]
    async fn generation_only_after_every_extraction_fails() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("a.mp4");

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.description == "Thumbnail extraction")
            .times(3)
            .returning(|cmd| {
                std::fs::write(cmd.args.last().unwrap(), b"junk").unwrap();
                Ok(failure())
            });
        runner
            .expect_run()
            .withf(|cmd| {
                cmd.description == "Thumbnail generation"
                    && cmd.args.iter().any(|a| a.starts_with("scale=512:288"))
            })
            .times(1)
            .returning(|_| Ok(CommandOutcome::default()));

        let commands = MediaCommandBuilder::new(ToolsConfig::default());
        let config = MediaConfig::default();
        let outcome = ThumbnailAcquirer::new(&runner, &commands, &config)
            .acquire(&media, &[media.clone()])
            .await
            .unwrap();

        assert_eq!(outcome, ThumbnailOutcome::Generated(dir.path().join("a.mp4.jpg")));
        assert!(!dir.path().join("a.mp4.webp").exists());
        assert!(!dir.path().join("a.mp4.png").exists());
    }

    #[tokio::test]
    async fn total_failure_is_an_extraction_error() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().times(4).returning(|_| Ok(failure()));

        let commands = MediaCommandBuilder::new(ToolsConfig::default());
        let config = MediaConfig::default();
        let err = ThumbnailAcquirer::new(&runner, &commands, &config)
            .acquire(Path::new("/nonexistent/a.flv"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, UpmuxError::ExtractionFailed(_)));
    }
}
