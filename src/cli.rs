use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log the remote sync instead of running it and keep local files
    #[arg(long)]
    pub dry_run: bool,

    /// Freshly uploaded media file
    pub media: PathBuf,
}
