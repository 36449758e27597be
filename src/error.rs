use thiserror::Error;

#[derive(Error, Debug)]
pub enum UpmuxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Identity store error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Could not determine a content identifier for {0}")]
    IdentifierUnresolved(String),

    #[error("Upload rejected by validation: {0}")]
    ValidationRejected(String),

    #[error("Normalization failed: {0}")]
    NormalizationFailed(String),

    #[error("Extraction failed: {0}")]
    ExtractionFailed(String),

    #[error("Remote sync failed: {0}")]
    SyncFailed(String),

    #[error("Probe error: {0}")]
    Probe(String),

    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("Notification failed: {0}")]
    Notify(String),

    #[error("Lock pool error: {0}")]
    Lock(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File not found: {0}")]
    FileNotFound(String),
}

pub type Result<T> = std::result::Result<T, UpmuxError>;
