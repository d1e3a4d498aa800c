
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::metrics::{Metrics, MetricsSnapshot};
use crate::core::pending::WorkerContext;
use crate::core::prepare::log_pending_delete_snapshot;
use crate::core::redo::RedoReconstructor;
use crate::core::registry::SharedRegistry;
use crate::core::smgr::FileStorage;
use crate::core::wal::{LogPosition, Wal};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

const LOCK_FILE_NAME: &str = "relstore.lock";
const BASE_DIR_NAME: &str = "base";

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub read_only: bool,
    pub registry_capacity: usize,
    pub file_permissions: u32,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            registry_capacity: DEFAULT_REGISTRY_CAPACITY,
            file_permissions: 0o644,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineInfo {
    pub path: String,
    pub read_only: bool,
    pub registry_live: usize,
    pub wal_end_position: u64,
}

/// Top-level owner of the storage lifecycle machinery: the physical file
/// layer, the log, and the shared pending-delete registry. Opening the
/// engine takes an advisory lock on the directory and runs crash recovery
/// before any worker is handed out.
pub struct StorageEngine {
    storage: Arc<FileStorage>,
    wal: Arc<Wal>,
    registry: Arc<SharedRegistry>,
    metrics: Arc<Metrics>,
    lock_file: File,
    read_only: bool,
    path: PathBuf,
}

impl StorageEngine {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(dir, EngineOptions::default())
    }

    pub fn open_with_options(dir: impl AsRef<Path>, opts: EngineOptions) -> Result<Self> {
        let dir = dir.as_ref();
        let dir_str = dir.to_string_lossy();
        if dir_str.is_empty() {
            return Err(Error::Other("storage directory cannot be empty".to_string()));
        }
        if dir_str.contains("..") {
            return Err(Error::Other("storage directory cannot contain '..'".to_string()));
        }
        std::fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE_NAME);

        #[cfg(unix)]
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .mode(opts.file_permissions)
            .open(&lock_path)?;

        #[cfg(not(unix))]
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)?;

        if opts.read_only {
            fs2::FileExt::try_lock_shared(&lock_file)?;
        } else {
            fs2::FileExt::try_lock_exclusive(&lock_file)?;
        }

        let metrics = Arc::new(Metrics::new());
        let storage = Arc::new(FileStorage::new(dir.join(BASE_DIR_NAME), metrics.clone())?);
        let wal = Arc::new(Wal::open(dir, metrics.clone())?);

        if !opts.read_only {
            run_recovery(&storage, &wal, &metrics)?;
        }

        // a crash wiped any previous registry contents; redo just dealt
        // with whatever they described
        let registry = Arc::new(SharedRegistry::new(opts.registry_capacity));

        Ok(Self {
            storage,
            wal,
            registry,
            metrics,
            lock_file,
            read_only: opts.read_only,
            path: dir.to_path_buf(),
        })
    }

    /// Hand out a per-worker context. Each worker owns its pending list
    /// exclusively; only the registry behind it is shared.
    pub fn worker(&self) -> Result<WorkerContext> {
        if self.read_only {
            return Err(Error::ReadOnly {
                operation: "worker".to_string(),
            });
        }
        Ok(WorkerContext::new(
            self.storage.clone(),
            self.wal.clone(),
            Some(self.registry.clone()),
            self.metrics.clone(),
        ))
    }

    /// Serialize the registry into one flushed log record, for use right
    /// before an external durability point.
    pub fn log_pending_delete_snapshot(&self) -> Result<Option<LogPosition>> {
        log_pending_delete_snapshot(&self.registry, &self.wal, &self.metrics)
    }

    pub fn registry(&self) -> &Arc<SharedRegistry> {
        &self.registry
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    pub fn storage(&self) -> &Arc<FileStorage> {
        &self.storage
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot(self.registry.len() as u64)
    }

    pub fn info(&self) -> EngineInfo {
        EngineInfo {
            path: self.path.display().to_string(),
            read_only: self.read_only,
            registry_live: self.registry.len(),
            wal_end_position: self.wal.end_position(),
        }
    }

    pub fn close(&self) -> Result<()> {
        if !self.read_only {
            self.wal.flush()?;
        }
        Ok(())
    }
}

impl Drop for StorageEngine {
    fn drop(&mut self) {
        let _ = self.close();
        // release the directory so another process can open it
        let _ = FileExt::unlock(&self.lock_file);
    }
}

/// Replay the whole log and drop every relation whose owning transaction
/// never resolved. Runs single-threaded before workers exist.
fn run_recovery(storage: &Arc<FileStorage>, wal: &Arc<Wal>, metrics: &Arc<Metrics>) -> Result<()> {
    let records = wal.read_all()?;
    if records.is_empty() {
        return Ok(());
    }

    info!(records = records.len(), "replaying storage log");
    let mut redo = RedoReconstructor::new(storage.clone(), metrics.clone());
    for (_, xid, record) in &records {
        redo.replay(*xid, record)?;
    }

    let orphans = redo.finalize_orphans();
    info!(orphans, "recovery complete");

    // every record has been consumed; start the log over
    wal.reset()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_rejects_bad_paths() {
        assert!(StorageEngine::open("").is_err());
        assert!(StorageEngine::open("/tmp/../tmp/relstore").is_err());
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = TempDir::new().unwrap();

        let engine = StorageEngine::open(dir.path()).unwrap();
        assert!(StorageEngine::open(dir.path()).is_err());

        drop(engine);
        StorageEngine::open(dir.path()).unwrap();
    }

    #[test]
    fn test_read_only_engines_share_the_lock() {
        let dir = TempDir::new().unwrap();
        // lay down the directory structure first
        drop(StorageEngine::open(dir.path()).unwrap());

        let opts = EngineOptions {
            read_only: true,
            ..EngineOptions::default()
        };
        let a = StorageEngine::open_with_options(dir.path(), opts.clone()).unwrap();
        let _b = StorageEngine::open_with_options(dir.path(), opts).unwrap();

        assert!(a.worker().is_err());
    }

    #[test]
    fn test_fresh_engine_has_empty_state() {
        let dir = TempDir::new().unwrap();
        let engine = StorageEngine::open(dir.path()).unwrap();

        assert!(engine.registry().is_empty());
        assert!(engine.log_pending_delete_snapshot().unwrap().is_none());

        let info = engine.info();
        assert!(!info.read_only);
        assert_eq!(info.registry_live, 0);
    }
}
