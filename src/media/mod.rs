// Media handling stages
//
// This module groups everything that drives ffmpeg against the upload:
// - Commands: command values and builders for every tool invocation
// - Classify: container format table and canonical extensions
// - Normalize: remux/split fallback chain
// - Thumbnail: attached-picture extraction with a generated fallback

pub mod classify;
pub mod commands;
pub mod normalize;
pub mod thumbnail;

use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

pub use classify::*;
pub use commands::*;
pub use normalize::*;
pub use thumbnail::*;

use crate::error::Result;

/// Delete a derived artifact; a missing file is fine
pub(crate) fn remove_artifact(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
