use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

use crate::error::{Result, UpmuxError};
use crate::identifier::Identifier;

/// Extensions that get the `.{height}.{codec}` rendition tag
const RENDITION_EXTENSIONS: [&str; 4] = ["mp4", "webm", "mkv", "flv"];

/// Compound extensions that must survive renaming intact
const COMPOUND_EXTENSIONS: [&str; 2] = ["chat.json", "info.json"];

/// Files belonging to one upload, before renaming
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileSet {
    entries: Vec<PathBuf>,
}

impl FileSet {
    /// Every file in the media's directory sharing its `basename.` prefix
    pub fn discover(media: &Path) -> Result<Self> {
        let dir = parent_dir(media);
        let name = media
            .file_name()
            .ok_or_else(|| UpmuxError::FileNotFound(media.display().to_string()))?
            .to_string_lossy()
            .to_string();
        let prefix = match name.rsplit_once('.') {
            Some((stem, _)) => format!("{}.", stem),
            None => format!("{}.", name),
        };

        let mut entries: Vec<PathBuf> = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
            .map(|e| e.into_path())
            .collect();
        entries.sort();

        let mut set = Self::default();
        set.push(media.to_path_buf());
        for entry in entries {
            info!("found {}", entry.display());
            set.push(entry);
        }
        Ok(set)
    }

    /// Add a file unless it is already listed
    pub fn push(&mut self, path: PathBuf) {
        if !self.entries.contains(&path) {
            self.entries.push(path);
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.entries
    }

    /// Rename every shippable file to its final name
    ///
    /// Files outside the whitelist, and files whose final name is already
    /// taken by an earlier entry, are skipped and stay where they are.
    pub fn finalize(self, id: &Identifier, rendition: &Rendition, ship_extensions: &[String]) -> Result<ShipList> {
        let mut shipped = Vec::new();
        let mut skipped = Vec::new();
        let mut taken = HashSet::new();

        for path in self.entries {
            let Some(ext) = shippable_extension(&path, ship_extensions) else {
                skipped.push(path);
                continue;
            };

            let name = final_name(id, &ext, rendition);
            if !taken.insert(name.clone()) {
                skipped.push(path);
                continue;
            }

            let target = parent_dir(&path).join(&name);
            info!("post {} = {}", name, path.display());
            if target != path {
                std::fs::rename(&path, &target)?;
            }
            shipped.push(ShippedFile {
                name,
                path: target,
                original: path,
            });
        }

        for path in &skipped {
            info!("skip {}", path.display());
        }

        Ok(ShipList { shipped, skipped })
    }
}

/// Height and video codec tagged onto video container names
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rendition {
    pub height: Option<String>,
    pub codec: Option<String>,
}

impl Rendition {
    fn suffix(&self) -> Option<String> {
        match (&self.height, &self.codec) {
            (Some(h), Some(c)) => Some(format!(".{}.{}", h, c)),
            _ => None,
        }
    }
}

/// `{id}[.{height}.{codec}].{ext}`
pub fn final_name(id: &Identifier, ext: &str, rendition: &Rendition) -> String {
    let suffix = if RENDITION_EXTENSIONS.contains(&ext) {
        rendition.suffix().unwrap_or_default()
    } else {
        String::new()
    };
    format!("{}{}.{}", id, suffix, ext)
}

/// Lowercased extension if it is on the whitelist
pub fn shippable_extension(path: &Path, ship_extensions: &[String]) -> Option<String> {
    let name = file_name_lower(path);
    let ext = COMPOUND_EXTENSIONS
        .iter()
        .find(|c| name.ends_with(&format!(".{}", c)))
        .map(|c| c.to_string())
        .or_else(|| name.rsplit_once('.').map(|(_, e)| e.to_string()))?;
    ship_extensions.contains(&ext).then_some(ext)
}

fn file_name_lower(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_lowercase())
        .unwrap_or_default()
}

fn parent_dir(path: &Path) -> PathBuf {
    match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShippedFile {
    /// Final name, relative to the item directory
    pub name: String,
    pub path: PathBuf,
    /// Where the file was before renaming
    pub original: PathBuf,
}

/// Renamed files ready for upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShipList {
    pub shipped: Vec<ShippedFile>,
    pub skipped: Vec<PathBuf>,
}

impl ShipList {
    /// Final location of a file that was in the set before renaming
    pub fn renamed(&self, original: &Path) -> Option<&Path> {
        self.shipped
            .iter()
            .find(|f| f.original == original)
            .map(|f| f.path.as_path())
    }

    pub fn contains_name(&self, name: &str) -> bool {
        self.shipped.iter().any(|f| f.name == name)
    }

    /// Add a file created under its final name
    pub fn push_final(&mut self, path: PathBuf) {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if !self.contains_name(&name) {
            self.shipped.push(ShippedFile {
                name,
                original: path.clone(),
                path,
            });
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.shipped.iter().map(|f| f.name.as_str()).collect()
    }
}
