use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::config::RemoteConfig;
use crate::error::{Result, UpmuxError};
use crate::fileset::ShipList;
use crate::identifier::Identifier;
use crate::media::{remove_artifact, MediaCommandBuilder};
use crate::metadata::MetadataBag;
use crate::notify::{deliver, Notice, NoticeKind, Notifier};
use crate::runner::CommandRunner;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded { removed: usize },
    DryRun { command: String },
}

/// Ships the final file list to the remote and cleans up after it
pub struct Uploader<'a> {
    runner: &'a dyn CommandRunner,
    commands: &'a MediaCommandBuilder,
    notifier: &'a dyn Notifier,
    config: &'a RemoteConfig,
    retry_queue: PathBuf,
}

impl<'a> Uploader<'a> {
    pub fn new(
        runner: &'a dyn CommandRunner,
        commands: &'a MediaCommandBuilder,
        notifier: &'a dyn Notifier,
        config: &'a RemoteConfig,
        retry_queue: PathBuf,
    ) -> Self {
        Self {
            runner,
            commands,
            notifier,
            config,
            retry_queue,
        }
    }

    pub async fn upload(
        &self,
        id: &Identifier,
        dir: &Path,
        files: &ShipList,
        bag: &MetadataBag,
    ) -> Result<UploadOutcome> {
        let manifest = dir.join(&self.config.manifest_name);
        write_manifest(&manifest, dir, files)?;

        let destination = format!("{}:{}/", self.config.name, id);
        let command = self.commands.sync(&manifest, dir, &destination);
        let line = command.shell_line();

        if self.config.dry_run {
            info!("Dry run, not executing: {}", line);
            return Ok(UploadOutcome::DryRun { command: line });
        }

        info!("Running {}", line);
        let outcome = self.runner.run(&command).await?;

        if !outcome.success() {
            error!("rclone failed: {}", line);
            error!("{}", outcome.message);
            if let Err(e) = self.enqueue_retry(&line) {
                error!("Could not queue retry in {}: {}", self.retry_queue.display(), e);
            }
            deliver(
                self.notifier,
                Notice::new(NoticeKind::SyncFailed(outcome.message.clone()), id.as_str(), bag),
            )
            .await;
            return Err(UpmuxError::SyncFailed(outcome.message));
        }

        deliver(self.notifier, Notice::new(NoticeKind::Uploaded, id.as_str(), bag)).await;

        let mut removed = 0;
        for file in &files.shipped {
            match remove_artifact(&file.path) {
                Ok(()) => removed += 1,
                Err(e) => warn!("Could not remove {}: {}", file.path.display(), e),
            }
        }
        remove_artifact(&manifest)?;
        info!("Uploaded {} files to {}", removed, destination);

        Ok(UploadOutcome::Uploaded { removed })
    }

    fn enqueue_retry(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.retry_queue.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut queue = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.retry_queue)?;
        writeln!(queue, "{}", line)?;
        warn!("Queued for retry in {}", self.retry_queue.display());
        Ok(())
    }
}

/// One name per line, relative to `dir`
pub fn write_manifest(manifest: &Path, dir: &Path, files: &ShipList) -> Result<()> {
    let mut body = String::new();
    for file in &files.shipped {
        let relative = pathdiff::diff_paths(&file.path, dir).unwrap_or_else(|| PathBuf::from(&file.name));
        body.push_str(&relative.to_string_lossy());
        body.push('\n');
    }
    std::fs::write(manifest, body)?;
    Ok(())
}
