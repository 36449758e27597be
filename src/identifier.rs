use regex::Regex;
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use crate::error::{Result, UpmuxError};
use crate::metadata::{keys, MetadataBag};

const ID_LEN: usize = 11;

static WATCH_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:youtube\.com/watch\?(?:[^\s]*?&)?v=|youtu\.be/)([\w-]+)").unwrap()
});

static UPLOAD_DIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([\w-]{11})(?:-[0-9]{13})?$").unwrap());

static BRACKETED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[\[({]([\w-]{11})[\])}][^\]\[(){}]+$").unwrap());

/// Canonical content identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identifier(String);

impl Identifier {
    pub fn parse(candidate: &str) -> Option<Self> {
        let valid = candidate.len() == ID_LEN
            && candidate
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then(|| Self(candidate.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard key for the document tree
    pub fn shard(&self) -> char {
        self.0.chars().next().unwrap_or('_')
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdSource {
    Comment,
    Directory,
    Filename,
}

impl IdSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdSource::Comment => "comment",
            IdSource::Directory => "subdir",
            IdSource::Filename => "filename",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: Identifier,
    pub source: IdSource,
    /// Parent directory follows the upload-slot convention
    pub trusted_directory: bool,
}

/// Resolve the identifier for `media`, first match wins:
/// comment URL, parent directory name, bracketed token in the filename
pub fn resolve(bag: &MetadataBag, media: &Path) -> Result<Resolution> {
    let directory_id = media
        .parent()
        .and_then(|p| p.file_name())
        .map(|d| d.to_string_lossy().to_string())
        .and_then(|dir| from_directory(&dir));
    let trusted_directory = directory_id.is_some();

    let found = bag
        .text(keys::COMMENT)
        .and_then(|comment| from_comment(&comment))
        .map(|id| (id, IdSource::Comment))
        .or_else(|| directory_id.map(|id| (id, IdSource::Directory)))
        .or_else(|| {
            media
                .file_name()
                .and_then(|name| from_filename(&name.to_string_lossy()))
                .map(|id| (id, IdSource::Filename))
        });

    match found {
        Some((id, source)) => Ok(Resolution {
            id,
            source,
            trusted_directory,
        }),
        None => Err(UpmuxError::IdentifierUnresolved(media.display().to_string())),
    }
}

pub fn from_comment(comment: &str) -> Option<Identifier> {
    WATCH_URL
        .captures_iter(comment)
        .find_map(|c| Identifier::parse(&c[1]))
}

pub fn from_directory(name: &str) -> Option<Identifier> {
    UPLOAD_DIR
        .captures(name)
        .and_then(|c| Identifier::parse(&c[1]))
}

pub fn from_filename(name: &str) -> Option<Identifier> {
    BRACKETED
        .captures(name)
        .and_then(|c| Identifier::parse(&c[1]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bag_with_comment(comment: &str) -> MetadataBag {
        let mut bag = MetadataBag::new();
        bag.set(keys::COMMENT, comment);
        bag
    }

    #[test]
    fn filename_token_before_extension() {
        let res = resolve(
            &MetadataBag::new(),
            Path::new("/up/misc/Some Title [dQw4w9WgXcQ].mkv"),
        )
        .unwrap();
        assert_eq!(res.id.as_str(), "dQw4w9WgXcQ");
        assert_eq!(res.source, IdSource::Filename);
        assert!(!res.trusted_directory);

        assert_eq!(
            from_filename("title (a-b_c123456).f137.mp4").unwrap().as_str(),
            "a-b_c123456"
        );
        assert!(from_filename("title [short].mp4").is_none());
        assert!(from_filename("[dQw4w9WgXcQ] title [x].mp4").is_none());
    }

    #[test]
    fn comment_beats_directory_and_filename() {
        let bag = bag_with_comment("ripped from https://www.youtube.com/watch?feature=share&v=AAAAAAAAAAA&t=3");
        let res = resolve(
            &bag,
            Path::new("/up/BBBBBBBBBBB-1700000000000/title [CCCCCCCCCCC].webm"),
        )
        .unwrap();
        assert_eq!(res.id.as_str(), "AAAAAAAAAAA");
        assert_eq!(res.source, IdSource::Comment);
        assert!(res.trusted_directory);
    }

    #[test]
    fn directory_beats_filename() {
        let res = resolve(
            &MetadataBag::new(),
            Path::new("/up/BBBBBBBBBBB-1700000000000/title [CCCCCCCCCCC].webm"),
        )
        .unwrap();
        assert_eq!(res.id.as_str(), "BBBBBBBBBBB");
        assert_eq!(res.source, IdSource::Directory);

        let plain = resolve(&MetadataBag::new(), Path::new("/up/BBBBBBBBBBB/video.mp4")).unwrap();
        assert_eq!(plain.source, IdSource::Directory);
        assert!(from_directory("BBBBBBBBBBB-17000").is_none());
    }

    #[test]
    fn short_links_and_invalid_candidates() {
        assert_eq!(
            from_comment("see youtu.be/dQw4w9WgXcQ").unwrap().as_str(),
            "dQw4w9WgXcQ"
        );
        let bag = bag_with_comment("https://youtube.com/watch?v=tooshort");
        let res = resolve(&bag, Path::new("/up/x/clip [dQw4w9WgXcQ].mp4")).unwrap();
        assert_eq!(res.source, IdSource::Filename);
    }

    #[test]
    fn nothing_matches() {
        let err = resolve(&MetadataBag::new(), Path::new("/up/x/clip.mp4")).unwrap_err();
        assert!(matches!(err, UpmuxError::IdentifierUnresolved(_)));
    }
}
