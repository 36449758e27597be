use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::probe::ContainerReport;

/// Container family as reported by the container probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContainerFormat {
    Matroska,
    WebM,
    Mpeg4,
    FlashVideo,
    Other(String),
}

impl ContainerFormat {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "matroska" => ContainerFormat::Matroska,
            "webm" => ContainerFormat::WebM,
            "mpeg-4" => ContainerFormat::Mpeg4,
            "flash video" => ContainerFormat::FlashVideo,
            other => ContainerFormat::Other(other.to_string()),
        }
    }
}

/// What the probe says about a media file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerFacts {
    pub format: ContainerFormat,
    pub has_video: bool,
    /// Index already sits in front of the media data
    pub streamable: bool,
}

impl ContainerFacts {
    pub fn from_report(report: &ContainerReport) -> Self {
        Self {
            format: ContainerFormat::from_name(&report.format().unwrap_or_default()),
            has_video: report.has_video(),
            streamable: report.is_streamable(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    /// `None` leaves the current extension alone
    pub extension: Option<&'static str>,
    pub needs_normalization: bool,
}

/// Map probe facts to a canonical extension and the remux decision
pub fn classify(facts: &ContainerFacts) -> Classification {
    let (extension, needs_normalization) = match facts.format {
        ContainerFormat::Matroska => (Some("mkv"), true),
        ContainerFormat::WebM => (Some("webm"), false),
        ContainerFormat::Mpeg4 => {
            let ext = if facts.has_video { "mp4" } else { "m4a" };
            (Some(ext), !facts.streamable)
        }
        ContainerFormat::FlashVideo => (Some("flv"), false),
        ContainerFormat::Other(_) => (None, false),
    };
    Classification {
        extension,
        needs_normalization,
    }
}

/// Path carrying `ext` as its extension; `None` when it already does
pub fn canonical_path(path: &Path, ext: &str) -> Option<PathBuf> {
    let current = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase());
    if current.as_deref() == Some(ext) {
        return None;
    }
    Some(path.with_extension(ext))
}

/// `a.mkv` + `mp4` -> `a.mkv.mp4`
pub fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_os_string();
    name.push(".");
    name.push(ext);
    PathBuf::from(name)
}

/// `dir/a.mkv.mp4` -> `dir/{prefix}a.mkv.mp4`
pub fn prefixed_sibling(path: &Path, prefix: &str) -> PathBuf {
    let mut name = OsString::from(prefix);
    if let Some(file_name) = path.file_name() {
        name.push(file_name);
    }
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(format: &str, has_video: bool, streamable: bool) -> ContainerFacts {
        ContainerFacts {
            format: ContainerFormat::from_name(format),
            has_video,
            streamable,
        }
    }

    #[test]
    fn classification_table() {
        let mkv = classify(&facts("Matroska", true, false));
        assert_eq!(mkv.extension, Some("mkv"));
        assert!(mkv.needs_normalization);

        let webm = classify(&facts("WebM", true, false));
        assert_eq!(webm.extension, Some("webm"));
        assert!(!webm.needs_normalization);

        let m4a = classify(&facts("MPEG-4", false, false));
        assert_eq!(m4a.extension, Some("m4a"));
        assert!(m4a.needs_normalization);

        let mp4 = classify(&facts("mpeg-4", true, true));
        assert_eq!(mp4.extension, Some("mp4"));
        assert!(!mp4.needs_normalization);

        let flv = classify(&facts("Flash Video", true, false));
        assert_eq!(flv.extension, Some("flv"));
        assert!(!flv.needs_normalization);

        let other = classify(&facts("AVI", true, false));
        assert_eq!(other.extension, None);
        assert!(!other.needs_normalization);
    }

    #[test]
    fn canonical_rename_is_stable() {
        for f in [facts("webm", true, false), facts("mpeg-4", true, true)] {
            let first = classify(&f);
            let ext = first.extension.unwrap();
            let renamed = canonical_path(Path::new("/up/clip.bin"), ext).unwrap();
            assert_eq!(renamed, Path::new("/up/clip").with_extension(ext));
            assert_eq!(canonical_path(&renamed, ext), None);

            let again = classify(&f);
            assert_eq!(again, first);
            assert!(!again.needs_normalization);
        }
        assert_eq!(canonical_path(Path::new("/up/CLIP.MKV"), "mkv"), None);
    }

    #[test]
    fn derived_artifact_names() {
        assert_eq!(
            append_extension(Path::new("/up/a.mkv"), "mp4"),
            PathBuf::from("/up/a.mkv.mp4")
        );
        assert_eq!(
            prefixed_sibling(Path::new("/up/a.mkv.mp4"), "mux-"),
            PathBuf::from("/up/mux-a.mkv.mp4")
        );
    }
}
