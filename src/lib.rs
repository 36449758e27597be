//! upmux - post-upload media normalization and archival
//!
//! Takes a freshly uploaded media file, works out which content it belongs
//! to, makes it web-playable, derives a thumbnail and a metadata document,
//! and ships everything to a remote archive.

pub mod cli;
pub mod config;
pub mod document;
pub mod error;
pub mod fileset;
pub mod gate;
pub mod identifier;
pub mod identity;
pub mod logging;
pub mod media;
pub mod metadata;
pub mod notify;
pub mod probe;
pub mod runner;
pub mod upload;
pub mod workflow;
