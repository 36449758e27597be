use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{GateConfig, ValidationConfig};
use crate::error::{Result, UpmuxError};
use crate::metadata::MetadataBag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleOutcome {
    Idle,
    /// The uploader kept writing past the timeout; we proceed anyway
    TimedOut,
}

/// Waits until nothing in a directory carries the in-progress suffix
pub struct IdleWatcher<'a> {
    config: &'a GateConfig,
}

impl<'a> IdleWatcher<'a> {
    pub fn new(config: &'a GateConfig) -> Self {
        Self { config }
    }

    pub async fn wait(&self, dir: &Path) -> IdleOutcome {
        let started = Instant::now();
        info!("Waiting for {} to go idle", dir.display());

        loop {
            let mut busy = false;
            for _ in 0..self.config.debounce_polls {
                sleep(self.config.poll_interval()).await;
                if self.has_partial_files(dir) {
                    busy = true;
                    break;
                }
            }

            if !busy {
                debug!("Directory idle after {:?}", started.elapsed());
                return IdleOutcome::Idle;
            }
            if started.elapsed() >= self.config.idle_timeout() {
                warn!(
                    "Directory still busy after {:?}, processing anyway",
                    started.elapsed()
                );
                return IdleOutcome::TimedOut;
            }
        }
    }

    fn has_partial_files(&self, dir: &Path) -> bool {
        WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .any(|e| {
                e.file_name()
                    .to_string_lossy()
                    .ends_with(&self.config.partial_suffix)
            })
    }
}

/// A held processing slot; the lock is released when dropped
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    _file: File,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Fixed set of named advisory locks bounding concurrent runs
pub struct LockPool {
    paths: Vec<PathBuf>,
    retry: std::time::Duration,
}

impl LockPool {
    pub fn new(config: &GateConfig) -> Result<Self> {
        if config.lock_paths.is_empty() {
            return Err(UpmuxError::Config("lock pool needs at least one lock path".to_string()));
        }
        Ok(Self {
            paths: config.lock_paths.clone(),
            retry: config.lock_retry(),
        })
    }

    /// One sweep over the pool; the first free lock wins
    pub fn try_acquire(&self) -> Result<Option<LockGuard>> {
        for path in &self.paths {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(path)
                .map_err(|e| UpmuxError::Lock(format!("cannot open {}: {}", path.display(), e)))?;

            match file.try_lock() {
                Ok(()) => {
                    return Ok(Some(LockGuard {
                        path: path.clone(),
                        _file: file,
                    }));
                }
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Error(e)) => {
                    return Err(UpmuxError::Lock(format!("cannot lock {}: {}", path.display(), e)));
                }
            }
        }
        Ok(None)
    }

    /// Sweep until a lock frees up
    pub async fn acquire(&self) -> Result<LockGuard> {
        info!("Waiting for a processing slot");
        loop {
            if let Some(guard) = self.try_acquire()? {
                info!("Holding processing slot {}", guard.path().display());
                return Ok(guard);
            }
            sleep(self.retry).await;
        }
    }
}

/// Per-directory "already processed" marker
pub struct ProcessedMarker {
    path: PathBuf,
}

impl ProcessedMarker {
    pub fn new(dir: &Path, config: &GateConfig) -> Self {
        Self {
            path: dir.join(&config.processed_marker),
        }
    }

    pub fn is_set(&self) -> bool {
        self.path.exists()
    }

    pub fn set(&self) -> Result<()> {
        std::fs::write(&self.path, b"a")?;
        Ok(())
    }
}

/// Reject uploads whose upstream verdict is not the pass value
pub fn check_verdict(bag: &MetadataBag, config: &ValidationConfig) -> Result<()> {
    if !config.conditional_upload {
        return Ok(());
    }
    match bag.text(&config.verdict_key) {
        Some(verdict) if verdict == config.pass_value => Ok(()),
        Some(verdict) => Err(UpmuxError::ValidationRejected(verdict)),
        None => Err(UpmuxError::ValidationRejected("no verdict".to_string())),
    }
}
