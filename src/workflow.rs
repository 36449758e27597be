use std::path::{Path, PathBuf};
use tracing::{info, info_span, warn, Instrument, Span};
use uuid::Uuid;

use crate::config::Config;
use crate::document::{write_document, Synthesizer};
use crate::error::{Result, UpmuxError};
use crate::fileset::{FileSet, Rendition};
use crate::gate::{check_verdict, IdleOutcome, IdleWatcher, LockPool, ProcessedMarker};
use crate::identifier::{self, Identifier};
use crate::identity::{resolve_uploader, Salt, SqliteIdentityStore};
use crate::media::{
    canonical_path, classify, CodecHints, ContainerFacts, MediaCommandBuilder, Normalizer,
    ThumbnailAcquirer,
};
use crate::metadata::{keys, MetadataBag};
use crate::notify::{deliver, LogNotifier, Notice, NoticeKind, Notifier, WebhookNotifier};
use crate::probe::Prober;
use crate::runner::{CommandRunner, ProcessRunner};
use crate::upload::{UploadOutcome, Uploader};

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Uploaded { id: Identifier, shipped: usize },
    DryRun { id: Identifier, command: String },
    /// The directory was handled by an earlier run
    AlreadyProcessed,
    Unresolved,
    Quarantined { verdict: String },
}

/// Post-upload processing for a single media file
pub struct Pipeline {
    config: Config,
    runner: Box<dyn CommandRunner>,
    notifier: Box<dyn Notifier>,
    commands: MediaCommandBuilder,
}

impl Pipeline {
    pub fn new(config: Config) -> Result<Self> {
        let notifier: Box<dyn Notifier> = match &config.notify.webhook_url {
            Some(url) => Box::new(WebhookNotifier::new(url.clone())?),
            None => Box::new(LogNotifier),
        };
        Ok(Self::with_parts(config, Box::new(ProcessRunner), notifier))
    }

    pub fn with_parts(
        config: Config,
        runner: Box<dyn CommandRunner>,
        notifier: Box<dyn Notifier>,
    ) -> Self {
        let commands = MediaCommandBuilder::new(config.tools.clone());
        Self {
            config,
            runner,
            notifier,
            commands,
        }
    }

    /// Process `media`, seeding the bag from `host_metadata` when it is a JSON object
    pub async fn run(&self, media: &Path, host_metadata: Option<&[u8]>) -> Result<RunOutcome> {
        let span = info_span!("run", run = %Uuid::new_v4(), id = tracing::field::Empty);
        self.process(media, host_metadata).instrument(span).await
    }

    async fn process(&self, media: &Path, host_metadata: Option<&[u8]>) -> Result<RunOutcome> {
        if !media.is_file() {
            return Err(UpmuxError::FileNotFound(media.display().to_string()));
        }
        let dir = match media.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        info!("Processing {}", media.display());

        let marker = ProcessedMarker::new(&dir, &self.config.gate);
        if marker.is_set() {
            info!("{} already processed", dir.display());
            return Ok(RunOutcome::AlreadyProcessed);
        }

        if IdleWatcher::new(&self.config.gate).wait(&dir).await == IdleOutcome::TimedOut {
            warn!("Proceeding while uploads may still be in progress");
        }
        let _slot = LockPool::new(&self.config.gate)?.acquire().await?;

        let mut bag = self.metadata_bag(media, host_metadata).await;
        self.identify_uploader(&mut bag);

        let resolution = match identifier::resolve(&bag, media) {
            Ok(resolution) => resolution,
            Err(UpmuxError::IdentifierUnresolved(path)) => {
                warn!("No identifier for {}, leaving it alone", path);
                return Ok(RunOutcome::Unresolved);
            }
            Err(e) => return Err(e),
        };
        let id = resolution.id;
        Span::current().record("id", id.as_str());
        info!("Identifier {} from {}", id, resolution.source.as_str());

        match check_verdict(&bag, &self.config.validation) {
            Ok(()) => {}
            Err(UpmuxError::ValidationRejected(verdict)) => {
                warn!("Quarantined: {}", verdict);
                deliver(
                    self.notifier.as_ref(),
                    Notice::new(NoticeKind::Quarantined(verdict.clone()), id.as_str(), &bag),
                )
                .await;
                return Ok(RunOutcome::Quarantined { verdict });
            }
            Err(e) => return Err(e),
        }

        if resolution.trusted_directory {
            marker.set()?;
        }

        let prober = Prober::new(self.runner.as_ref(), &self.commands);
        let container = match prober.container(media).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!("Container probe failed: {}", e);
                None
            }
        };

        let mut media = media.to_path_buf();
        let mut needs_normalization = false;
        if let Some(report) = &container {
            let facts = ContainerFacts::from_report(report);
            let classification = classify(&facts);
            info!("Container {:?}, normalize: {}", facts.format, classification.needs_normalization);
            needs_normalization = classification.needs_normalization;

            if let Some(target) = classification
                .extension
                .and_then(|ext| canonical_path(&media, ext))
            {
                info!("Renaming {} -> {}", media.display(), target.display());
                std::fs::rename(&media, &target)?;
                media = target;
            }
        }

        let mut files = FileSet::discover(&media)?;

        if needs_normalization {
            let hints = CodecHints {
                video: bag.text(keys::VIDEO_CODEC),
                audio: bag.text(keys::AUDIO_CODEC),
            };
            match Normalizer::new(self.runner.as_ref(), &self.commands)
                .normalize(&media, &hints)
                .await
            {
                Ok(normalization) => {
                    for output in normalization.outputs() {
                        files.push(output);
                    }
                }
                Err(UpmuxError::NormalizationFailed(summary)) => {
                    warn!("Shipping without a web-playable copy: {}", summary)
                }
                Err(e) => return Err(e),
            }
        }

        match ThumbnailAcquirer::new(self.runner.as_ref(), &self.commands, &self.config.media)
            .acquire(&media, files.paths())
            .await
        {
            Ok(outcome) => {
                if let Some(thumbnail) = outcome.created() {
                    files.push(thumbnail.to_path_buf());
                }
            }
            Err(UpmuxError::ExtractionFailed(reason)) => warn!("No thumbnail: {}", reason),
            Err(e) => return Err(e),
        }

        let rendition = Rendition {
            height: bag.height(),
            codec: bag.text(keys::VIDEO_CODEC),
        };
        let mut shipped = files.finalize(&id, &rendition, &self.config.media.ship_extensions)?;
        let media = shipped
            .renamed(&media)
            .map(Path::to_path_buf)
            .unwrap_or(media);

        let description = container.as_ref().and_then(|r| r.description());
        let document = Synthesizer::new(self.runner.as_ref(), &self.commands, &self.config.media)
            .synthesize(&id, &media, &mut shipped, &mut bag, description)
            .await?;
        let written = write_document(
            &self.config.state_path(&self.config.output.documents_dir),
            &id,
            &document,
        )?;
        info!("Wrote {}", written.display());

        let uploader = Uploader::new(
            self.runner.as_ref(),
            &self.commands,
            self.notifier.as_ref(),
            &self.config.remote,
            self.config.state_path(&self.config.remote.retry_queue),
        );
        match uploader.upload(&id, &dir, &shipped, &bag).await? {
            UploadOutcome::Uploaded { removed } => Ok(RunOutcome::Uploaded { id, shipped: removed }),
            UploadOutcome::DryRun { command } => Ok(RunOutcome::DryRun { id, command }),
        }
    }

    async fn metadata_bag(&self, media: &Path, host_metadata: Option<&[u8]>) -> MetadataBag {
        if let Some(bag) = host_metadata.and_then(MetadataBag::from_host_bytes) {
            return bag;
        }

        info!("No host metadata, probing streams");
        match Prober::new(self.runner.as_ref(), &self.commands)
            .streams(media)
            .await
        {
            Ok(report) => MetadataBag::from_stream_report(&report),
            Err(e) => {
                warn!("Stream probe failed: {}", e);
                MetadataBag::new()
            }
        }
    }

    /// Record the uploader identity for a requester address in the bag
    fn identify_uploader(&self, bag: &mut MetadataBag) {
        let Some(address) = bag.text(keys::REQUESTER_ADDRESS) else {
            return;
        };

        let resolved = std::fs::create_dir_all(&self.config.state_dir)
            .map_err(UpmuxError::from)
            .and_then(|()| Salt::load_or_create(&self.config.state_path(&self.config.identity.salt_path)))
            .and_then(|salt| {
                let store = SqliteIdentityStore::new(self.config.state_path(&self.config.identity.store_path));
                resolve_uploader(&store, &salt, &address)
            });

        match resolved {
            Ok(uploader) => bag.set(keys::UPLOADER, uploader),
            Err(e) => warn!("Could not resolve uploader identity: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MetadataDocument;
    use crate::notify::MockNotifier;
    use crate::runner::{CommandOutcome, MockCommandRunner};
    use assert_fs::prelude::*;
    use assert_fs::TempDir;
    use walkdir::WalkDir;

    const SIDECAR: &str = r#"{"id": "dQw4w9WgXcQ", "uploader": "Rick Astley",
        "channel_id": "UCuAXFkgsw1L7xaCfnd5JJOw", "upload_date": "20091025",
        "title": "Never Gonna Give You Up", "duration": 212}"#;

    const MATROSKA: &str = r#"{"media": {"track": [
        {"@type": "General", "Format": "Matroska"},
        {"@type": "Video", "Format": "VP9"},
        {"@type": "Audio", "Format": "Opus"}
    ]}}"#;

    fn config(temp: &TempDir) -> Config {
        let mut config = Config::default();
        config.state_dir = temp.path().join("state");
        config.gate.poll_interval_ms = 1;
        config.gate.debounce_polls = 1;
        config.gate.idle_timeout_secs = 1;
        config.gate.lock_retry_ms = 1;
        config.gate.lock_paths = vec![temp.path().join("lock1")];
        config
    }

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = WalkDir::new(dir)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .map(|e| e.path().strip_prefix(dir).unwrap().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    fn host_bag(verdict: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "vidchk": verdict,
            "res": "1920x1080",
            "vc": "vp9",
            "ac": "opus",
            ".dur": 212.2,
            "up_ip": "203.0.113.7",
            "up_at": 1700000000
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn processed_directory_is_left_untouched() {
        let temp = TempDir::new().unwrap();
        let slot = temp.child("dQw4w9WgXcQ");
        slot.child("upload.mkv").write_str("media").unwrap();
        slot.child(".processed").write_str("a").unwrap();
        let before = listing(temp.path());

        let pipeline = Pipeline::with_parts(
            config(&temp),
            Box::new(MockCommandRunner::new()),
            Box::new(MockNotifier::new()),
        );
        let outcome = pipeline
            .run(&slot.path().join("upload.mkv"), Some(&host_bag("ok")))
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::AlreadyProcessed);
        assert_eq!(listing(temp.path()), before);
    }

    #[tokio::test]
    async fn unresolved_identifier_ends_quietly() {
        let temp = TempDir::new().unwrap();
        temp.child("misc/holiday.mp4").write_str("media").unwrap();

        let pipeline = Pipeline::with_parts(
            config(&temp),
            Box::new(MockCommandRunner::new()),
            Box::new(MockNotifier::new()),
        );
        let outcome = pipeline
            .run(&temp.path().join("misc/holiday.mp4"), Some(br#"{"vidchk": "ok"}"#))
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Unresolved);
        assert!(!temp.child("misc/.processed").path().exists());
        assert!(temp.child("misc/holiday.mp4").path().exists());
    }

    #[tokio::test]
    async fn streams_are_read_only_while_holding_a_slot() {
        let temp = TempDir::new().unwrap();
        temp.child("misc/holiday.mp4").write_str("media").unwrap();
        let media = temp.path().join("misc/holiday.mp4");
        let config = config(&temp);

        let held = LockPool::new(&config.gate).unwrap().try_acquire().unwrap().unwrap();
        let blocked = Pipeline::with_parts(
            config.clone(),
            Box::new(MockCommandRunner::new()),
            Box::new(MockNotifier::new()),
        );
        let waited = tokio::time::timeout(
            std::time::Duration::from_millis(200),
            blocked.run(&media, None),
        )
        .await;
        assert!(waited.is_err());
        drop(held);

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.description == "Stream probe")
            .times(1)
            .returning(|_| Err(UpmuxError::Probe("no streams".to_string())));
        let pipeline = Pipeline::with_parts(config, Box::new(runner), Box::new(MockNotifier::new()));
        let outcome = pipeline.run(&media, None).await.unwrap();

        assert_eq!(outcome, RunOutcome::Unresolved);
    }

    #[tokio::test]
    async fn rejected_verdict_quarantines_without_mutation() {
        let temp = TempDir::new().unwrap();
        let slot = temp.child("dQw4w9WgXcQ-1700000000000");
        slot.child("upload.mkv").write_str("media").unwrap();

        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|n| {
                n.kind == NoticeKind::Quarantined("nsfw".to_string())
                    && n.identifier == "dQw4w9WgXcQ"
                    && n.uploader.starts_with("ip:")
            })
            .times(1)
            .returning(|_| Ok(()));

        let pipeline =
            Pipeline::with_parts(config(&temp), Box::new(MockCommandRunner::new()), Box::new(notifier));
        let outcome = pipeline
            .run(&slot.path().join("upload.mkv"), Some(&host_bag("nsfw")))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Quarantined {
                verdict: "nsfw".to_string()
            }
        );
        assert_eq!(listing(slot.path()), vec!["upload.mkv"]);
    }

    #[tokio::test]
    async fn failed_canonical_rename_stops_the_run() {
        let temp = TempDir::new().unwrap();
        let slot = temp.child("dQw4w9WgXcQ-1700000000000");
        slot.child("upload.bin").write_str("media").unwrap();
        slot.child("upload.mkv/occupied").touch().unwrap();

        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd| cmd.description == "Container probe")
            .times(1)
            .returning(|_| {
                Ok(CommandOutcome {
                    stdout: MATROSKA.as_bytes().to_vec(),
                    ..CommandOutcome::default()
                })
            });

        let pipeline =
            Pipeline::with_parts(config(&temp), Box::new(runner), Box::new(MockNotifier::new()));
        let err = pipeline
            .run(&slot.path().join("upload.bin"), Some(&host_bag("ok")))
            .await
            .unwrap_err();

        assert!(matches!(err, UpmuxError::Io(_)));
        slot.child("upload.bin").assert("media");
        assert_eq!(
            listing(slot.path()),
            vec![".processed", "upload.bin", "upload.mkv", "upload.mkv/occupied"]
        );
    }

    #[tokio::test]
    async fn full_run_ships_and_archives() {
        let temp = TempDir::new().unwrap();
        let slot = temp.child("dQw4w9WgXcQ-1700000000000");
        slot.child("upload.mkv").write_str("media").unwrap();
        slot.child("upload.info.json").write_str(SIDECAR).unwrap();
        slot.child("upload.en.vtt").write_str("WEBVTT").unwrap();

        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|cmd| match cmd.description.as_str() {
            "Container probe" => Ok(CommandOutcome {
                stdout: MATROSKA.as_bytes().to_vec(),
                ..CommandOutcome::default()
            }),
            "Remux" | "Thumbnail extraction" => {
                std::fs::write(cmd.args.last().unwrap(), b"derived").unwrap();
                Ok(CommandOutcome::default())
            }
            "Remote sync" => Ok(CommandOutcome::default()),
            other => panic!("unexpected command {}", other),
        });
        let mut notifier = MockNotifier::new();
        notifier
            .expect_notify()
            .withf(|n| n.kind == NoticeKind::Uploaded && n.source == "provided")
            .times(1)
            .returning(|_| Ok(()));

        let config = config(&temp);
        let documents = config.state_path(&config.output.documents_dir).join("vd");
        let pipeline = Pipeline::with_parts(config, Box::new(runner), Box::new(notifier));
        let outcome = pipeline
            .run(&slot.path().join("upload.mkv"), Some(&host_bag("ok")))
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RunOutcome::Uploaded {
                id: Identifier::parse("dQw4w9WgXcQ").unwrap(),
                shipped: 4
            }
        );
        assert_eq!(listing(slot.path()), vec![".processed", "upload.en.vtt"]);

        let written = listing(&documents);
        assert_eq!(written.len(), 1);
        let doc: MetadataDocument =
            serde_json::from_slice(&std::fs::read(documents.join(&written[0])).unwrap()).unwrap();
        assert_eq!(doc.video_id, "dQw4w9WgXcQ");
        assert_eq!(doc.upload_date.as_deref(), Some("2009-10-25"));
        let names: Vec<&str> = doc.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "dQw4w9WgXcQ.1080.vp9.mkv",
                "dQw4w9WgXcQ.info.json",
                "dQw4w9WgXcQ.1080.vp9.mp4",
                "dQw4w9WgXcQ.webp",
            ]
        );
        let import = doc.import.unwrap();
        assert!(import.received_from.starts_with("ip:"));
        assert_eq!(import.received_at, Some(1700000000));

        let again = Pipeline::with_parts(
            Config::default(),
            Box::new(MockCommandRunner::new()),
            Box::new(MockNotifier::new()),
        );
        slot.child("late.mkv").write_str("media").unwrap();
        let outcome = again.run(&slot.path().join("late.mkv"), None).await.unwrap();
        assert_eq!(outcome, RunOutcome::AlreadyProcessed);
    }
}
