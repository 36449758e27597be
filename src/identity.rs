use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::{params, Connection, OptionalExtension};
use sha2::{Digest, Sha256};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{Result, UpmuxError};

const TOKEN_LEN: usize = 24;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS identities (
    address TEXT NOT NULL,
    identity TEXT NOT NULL,
    recorded_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS identities_address ON identities (address, recorded_at);";

/// Maps requester addresses to pseudonymous identities
pub trait IdentityStore {
    /// Most recently recorded identity for `address`
    fn lookup(&self, address: &str) -> Result<Option<String>>;

    fn record(&self, address: &str, identity: &str) -> Result<()>;
}

/// Append-only SQLite identity table
pub struct SqliteIdentityStore {
    path: PathBuf,
}

impl SqliteIdentityStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.execute_batch("PRAGMA busy_timeout = 5000;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(conn)
    }
}

impl IdentityStore for SqliteIdentityStore {
    fn lookup(&self, address: &str) -> Result<Option<String>> {
        let conn = self.connect()?;
        let identity = conn
            .query_row(
                "SELECT identity FROM identities WHERE address = ?1
                 ORDER BY recorded_at DESC, rowid DESC LIMIT 1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(identity)
    }

    fn record(&self, address: &str, identity: &str) -> Result<()> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO identities (address, identity, recorded_at) VALUES (?1, ?2, ?3)",
            params![address, identity, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }
}

/// Secret mixed into derived identities, persisted once and reused
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(String);

impl Salt {
    /// Read the salt file, creating it on first use
    ///
    /// A complete file is moved into place without replacing an existing
    /// one, so racing runs all read back the first salt that landed.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if let Some(existing) = Self::read(path)? {
            return Ok(existing);
        }

        let fresh = Self::generate();
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;
        let mut staging = tempfile::NamedTempFile::new_in(&dir)?;
        staging.write_all(fresh.0.as_bytes())?;
        match staging.persist_noclobber(path) {
            Ok(_) => info!("Created identity salt at {}", path.display()),
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                debug!("Salt at {} was created by another run", path.display());
            }
            Err(e) => return Err(e.error.into()),
        }

        Self::read(path)?
            .ok_or_else(|| UpmuxError::Config(format!("salt file {} is empty", path.display())))
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        match std::fs::read_to_string(path) {
            Ok(text) if !text.trim().is_empty() => Ok(Some(Self(text.trim().to_string()))),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn generate() -> Self {
        let bytes: [u8; 32] = rand::random();
        let mut encoded = STANDARD.encode(bytes);
        encoded.truncate(TOKEN_LEN);
        Self(encoded)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// `ip:` + truncated base64 of sha256(address + salt)
pub fn derive_identity(address: &str, salt: &Salt) -> String {
    let digest = Sha256::digest(format!("{}{}", address, salt.as_str()).as_bytes());
    let mut token = STANDARD.encode(digest);
    token.truncate(TOKEN_LEN);
    format!("ip:{}", token)
}

/// Stable identity for a requester address
pub fn resolve_uploader(store: &dyn IdentityStore, salt: &Salt, address: &str) -> Result<String> {
    if let Some(known) = store.lookup(address)? {
        debug!("Known uploader for {}", address);
        return Ok(known);
    }

    let derived = derive_identity(address, salt);
    store.record(address, &derived)?;
    Ok(derived)
}
