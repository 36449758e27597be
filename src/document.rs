use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::{info, warn};

use crate::config::MediaConfig;
use crate::error::{Result, UpmuxError};
use crate::fileset::ShipList;
use crate::identifier::Identifier;
use crate::media::{remove_artifact, MediaCommandBuilder};
use crate::metadata::{keys, MetadataBag};
use crate::probe::Prober;
use crate::runner::CommandRunner;

static UPLOAD_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(....)-?(..)-?(..)").unwrap());

static ADDRESS_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ip=[0-9A-Fa-f%.:]+").unwrap());

const MASKED_ADDRESS: &str = "0.0.0.0";

/// Archived description of one item
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub video_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upload_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fps: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub like_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dislike_count: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileEntry>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub import: Option<ImportBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    pub name: String,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportBlock {
    pub is_imported: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received_at: Option<i64>,
    pub received_from: String,
}

/// The fields read from a downloader's `.info.json`
#[derive(Debug, Clone, Deserialize)]
pub struct Sidecar {
    pub id: String,
    pub uploader: String,
    pub channel_id: String,
    pub upload_date: Value,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub width: Option<f64>,
    #[serde(default)]
    pub height: Option<f64>,
    #[serde(default)]
    pub fps: Option<f64>,
    #[serde(default)]
    pub format_id: Option<String>,
    #[serde(default)]
    pub view_count: Option<i64>,
    #[serde(default)]
    pub like_count: Option<i64>,
    #[serde(default)]
    pub dislike_count: Option<i64>,
}

/// Where the document's fields came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSource {
    /// Sidecar shipped next to the media
    Provided,
    /// Sidecar pulled out of a container attachment
    Embedded,
    /// Probe output only
    Synthesized,
}

impl DocumentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentSource::Provided => "provided",
            DocumentSource::Embedded => "embedded",
            DocumentSource::Synthesized => "synthesized",
        }
    }
}

/// `20240131` or `2024-01-31...` -> `2024-01-31`; anything else passes through
pub fn normalize_upload_date(raw: &str) -> String {
    match UPLOAD_DATE.captures(raw) {
        Some(c) => format!("{}-{}-{}", &c[1], &c[2], &c[3]),
        None => raw.to_string(),
    }
}

/// Mask requester addresses embedded in signed media URLs
///
/// Only `ip=` query parameters count: preceded by `?` or `&`, followed by
/// `&` or a closing quote. Delimiters are left in place so adjacent
/// parameters are all masked.
pub fn scrub_addresses(text: &str) -> String {
    let mut scrubbed = String::with_capacity(text.len());
    let mut copied = 0;
    for found in ADDRESS_PARAM.find_iter(text) {
        let before = text[..found.start()].chars().next_back();
        let after = text[found.end()..].chars().next();
        if matches!(before, Some('?' | '&')) && matches!(after, Some('&' | '"')) {
            scrubbed.push_str(&text[copied..found.start()]);
            scrubbed.push_str("ip=");
            scrubbed.push_str(MASKED_ADDRESS);
            copied = found.end();
        }
    }
    scrubbed.push_str(&text[copied..]);
    scrubbed
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn rounded(value: Option<f64>) -> Option<i64> {
    value.map(|v| v.round() as i64)
}

impl MetadataDocument {
    pub fn from_sidecar(id: &Identifier, sidecar: Sidecar, files: Vec<FileEntry>) -> Self {
        if sidecar.id != id.as_str() {
            warn!("Sidecar describes {} but the item is {}", sidecar.id, id);
        }

        Self {
            video_id: id.to_string(),
            channel_name: Some(sidecar.uploader),
            channel_id: Some(sidecar.channel_id),
            upload_date: scalar_text(&sidecar.upload_date).map(|d| normalize_upload_date(&d)),
            title: Some(sidecar.title),
            description: sidecar.description,
            duration: rounded(sidecar.duration),
            width: rounded(sidecar.width),
            height: rounded(sidecar.height),
            fps: sidecar.fps,
            format_id: sidecar.format_id,
            view_count: sidecar.view_count,
            like_count: sidecar.like_count,
            dislike_count: sidecar.dislike_count,
            files,
            import: None,
        }
    }

    /// Reduced document from what the probes and the host told us
    pub fn from_probe(
        id: &Identifier,
        bag: &MetadataBag,
        container_description: Option<String>,
        files: Vec<FileEntry>,
    ) -> Self {
        Self {
            video_id: id.to_string(),
            channel_name: bag.text(keys::ARTIST),
            upload_date: bag.text(keys::DATE).map(|d| normalize_upload_date(&d)),
            title: bag.text(keys::TITLE),
            description: container_description.or_else(|| bag.text(keys::DESCRIPTION)),
            duration: rounded(bag.number(keys::DURATION)),
            width: rounded(bag.number(keys::WIDTH)),
            height: rounded(bag.number(keys::HEIGHT)),
            fps: bag.number(keys::FPS).map(f64::round),
            files,
            ..Self::default()
        }
    }

    /// Attach the requester identity recorded in the bag
    pub fn attach_import(&mut self, bag: &MetadataBag) {
        if let Some(uploader) = bag.text(keys::UPLOADER) {
            self.import = Some(ImportBlock {
                is_imported: true,
                received_at: bag.number(keys::RECEIVED_AT).map(|t| t as i64),
                received_from: uploader,
            });
        }
    }
}

/// Name and size of every shipped file
pub fn file_entries(list: &ShipList) -> Result<Vec<FileEntry>> {
    list.shipped
        .iter()
        .map(|f| {
            Ok(FileEntry {
                name: f.name.clone(),
                size: std::fs::metadata(&f.path)?.len(),
            })
        })
        .collect()
}

/// Write `{root}/v{shard}/{id}-{unix}.json`, never replacing an existing file
pub fn write_document(root: &Path, id: &Identifier, doc: &MetadataDocument) -> Result<PathBuf> {
    let dir = root.join(format!("v{}", id.shard()));
    std::fs::create_dir_all(&dir)?;

    let body = serde_json::to_vec_pretty(doc)?;
    let stamp = chrono::Utc::now().timestamp();

    let mut attempt = 0u32;
    loop {
        let name = match attempt {
            0 => format!("{}-{}.json", id, stamp),
            n => format!("{}-{}-{}.json", id, stamp, n),
        };
        let path = dir.join(name);
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                file.write_all(&body)?;
                return Ok(path);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => attempt += 1,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Builds the metadata document from the best available source
pub struct Synthesizer<'a> {
    runner: &'a dyn CommandRunner,
    commands: &'a MediaCommandBuilder,
    config: &'a MediaConfig,
}

impl<'a> Synthesizer<'a> {
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

    /// Sidecar first, probe summary second
    ///
    /// An extracted sidecar joins `files`. The source used is recorded in
    /// the bag for notifications.
    pub async fn synthesize(
        &self,
        id: &Identifier,
        media: &Path,
        files: &mut ShipList,
        bag: &mut MetadataBag,
        container_description: Option<String>,
    ) -> Result<MetadataDocument> {
        info!("Building metadata document from sidecar");
        let mut doc = match self.from_sidecar(id, media, files).await {
            Ok((doc, source)) => {
                bag.set(keys::DOCUMENT_SOURCE, source.as_str());
                doc
            }
            Err(e) => {
                match &e {
                    UpmuxError::ExtractionFailed(reason) => info!("No usable sidecar: {}", reason),
                    other => warn!("Document from sidecar failed: {}", other),
                }
                info!("Building metadata document from probe output");
                bag.set(keys::DOCUMENT_SOURCE, DocumentSource::Synthesized.as_str());
                MetadataDocument::from_probe(id, bag, container_description, file_entries(files)?)
            }
        };

        doc.attach_import(bag);
        if let Some(import) = &doc.import {
            info!("uploader: {}", import.received_from);
        }
        Ok(doc)
    }

    async fn from_sidecar(
        &self,
        id: &Identifier,
        media: &Path,
        files: &mut ShipList,
    ) -> Result<(MetadataDocument, DocumentSource)> {
        let suffix = self.config.sidecar_suffix.to_lowercase();
        let provided = files
            .shipped
            .iter()
            .find(|f| f.name.to_lowercase().ends_with(&suffix))
            .map(|f| f.path.clone());

        let (path, source) = match provided {
            Some(path) => (path, DocumentSource::Provided),
            None => (self.extract(id, media).await?, DocumentSource::Embedded),
        };

        let parsed = std::fs::read_to_string(&path)
            .map_err(UpmuxError::from)
            .and_then(|text| {
                let text = scrub_addresses(&text);
                std::fs::write(&path, &text)?;
                Ok(serde_json::from_str::<Sidecar>(&text)?)
            });

        let sidecar = match parsed {
            Ok(sidecar) => sidecar,
            Err(e) => {
                if source == DocumentSource::Embedded {
                    remove_artifact(&path)?;
                }
                return Err(e);
            }
        };

        if source == DocumentSource::Embedded {
            files.push_final(path);
        }
        let doc = MetadataDocument::from_sidecar(id, sidecar, file_entries(files)?);
        Ok((doc, source))
    }

    /// Dump the sidecar attachment next to the media as `{id}{suffix}`
    async fn extract(&self, id: &Identifier, media: &Path) -> Result<PathBuf> {
        let report = Prober::new(self.runner, self.commands)
            .streams(media)
            .await
            .map_err(|e| UpmuxError::ExtractionFailed(e.to_string()))?;

        let index = report
            .sidecar_stream(&self.config.sidecar_suffix, &self.config.sidecar_mime)
            .ok_or_else(|| UpmuxError::ExtractionFailed("no sidecar attachment".to_string()))?;
        info!("found sidecar attachment at stream #{}", index);

        let dir = media.parent().unwrap_or_else(|| Path::new("."));
        let output = dir.join(format!("{}{}", id, self.config.sidecar_suffix));
        let command = self.commands.dump_attachment(media, index, &output);
        info!("Running {}", command.shell_line());

        let outcome = self.runner.run(&command).await?;
        if !outcome.success() {
            remove_artifact(&output)?;
            return Err(UpmuxError::ExtractionFailed(format!(
                "sidecar extraction failed: {}",
                outcome.message
            )));
        }
        Ok(output)
    }
}
