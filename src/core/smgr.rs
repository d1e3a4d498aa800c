
use crate::core::buffer_pool::{get_block_buffer, put_block_buffer};
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::metrics::Metrics;
use crate::core::relfile::{ForkNumber, RelFileRef};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Physical storage for relation forks: one file per (relation, fork) under
/// `root/<tablespace>/<database>/`. All operations are idempotent so redo can
/// reapply work whose on-disk effect already happened before a crash:
/// create tolerates an existing empty file, unlink tolerates a missing one.
pub struct FileStorage {
    root: PathBuf,
    metrics: Arc<Metrics>,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>, metrics: Arc<Metrics>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root, metrics })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Segment file path. Session-local relations get a `t` basename prefix
    /// so a restart can recognize and sweep them without consulting any map.
    pub fn path_for(&self, rel: &RelFileRef, fork: ForkNumber) -> PathBuf {
        let base = if rel.is_temp {
            format!("t{}{}", rel.id.relnumber, fork.suffix())
        } else {
            format!("{}{}", rel.id.relnumber, fork.suffix())
        };
        self.root
            .join(rel.id.tablespace.to_string())
            .join(rel.id.database.to_string())
            .join(base)
    }

    /// Create the segment file for one fork.
    ///
    /// An existing file is an error only when it already holds data and we
    /// are not replaying: redo may re-create a file that survived the crash.
    pub fn create(&self, rel: &RelFileRef, fork: ForkNumber, is_redo: bool) -> Result<()> {
        let path = self.path_for(rel, fork);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => {
                file.sync_all()?;
                self.metrics.file_created();
                debug!(rel = %rel, fork = ?fork, "storage file created");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                let len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if is_redo || len == 0 {
                    debug!(rel = %rel, fork = ?fork, "storage file already present");
                    Ok(())
                } else {
                    Err(Error::StorageExists {
                        path: path.display().to_string(),
                    })
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    pub fn exists(&self, rel: &RelFileRef, fork: ForkNumber) -> bool {
        self.path_for(rel, fork).exists()
    }

    /// Remove one fork's file. A missing file silently succeeds; any other
    /// failure is downgraded to a warning, since unlink only runs after the
    /// owning transaction's outcome is already fixed.
    pub fn unlink(&self, rel: &RelFileRef, fork: ForkNumber) {
        let path = self.path_for(rel, fork);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                self.metrics.file_unlinked();
                debug!(rel = %rel, fork = ?fork, "storage file unlinked");
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                self.metrics.io_error();
                warn!(rel = %rel, fork = ?fork, error = %err, "could not unlink storage file");
            }
        }
    }

    /// Batched unlink: every fork of every listed relation, in one call.
    pub fn unlink_all(&self, rels: &[RelFileRef]) {
        for rel in rels {
            for fork in ForkNumber::ALL {
                self.unlink(rel, fork);
            }
        }
    }

    pub fn nblocks(&self, rel: &RelFileRef, fork: ForkNumber) -> Result<BlockNumber> {
        let meta = std::fs::metadata(self.path_for(rel, fork))?;
        Ok(meta.len() / BLOCK_SIZE as u64)
    }

    /// Shrink a fork to `nblocks` blocks. Growing is not this call's job.
    pub fn truncate(&self, rel: &RelFileRef, fork: ForkNumber, nblocks: BlockNumber) -> Result<()> {
        let path = self.path_for(rel, fork);
        let file = OpenOptions::new().write(true).open(&path)?;
        let target = nblocks * BLOCK_SIZE as u64;
        if file.metadata()?.len() > target {
            file.set_len(target)?;
            file.sync_all()?;
            self.metrics.file_truncated();
            debug!(rel = %rel, fork = ?fork, nblocks, "storage file truncated");
        }
        Ok(())
    }

    pub fn read_block(&self, rel: &RelFileRef, fork: ForkNumber, block: BlockNumber, buf: &mut [u8]) -> Result<()> {
        if buf.len() != BLOCK_SIZE {
            return Err(Error::Other("block buffer must be BLOCK_SIZE bytes".to_string()));
        }
        let mut file = File::open(self.path_for(rel, fork))?;
        file.seek(SeekFrom::Start(block * BLOCK_SIZE as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    pub fn write_block(&self, rel: &RelFileRef, fork: ForkNumber, block: BlockNumber, buf: &[u8]) -> Result<()> {
        if buf.len() != BLOCK_SIZE {
            return Err(Error::Other("block buffer must be BLOCK_SIZE bytes".to_string()));
        }
        let mut file = OpenOptions::new().write(true).open(self.path_for(rel, fork))?;
        file.seek(SeekFrom::Start(block * BLOCK_SIZE as u64))?;
        file.write_all(buf)?;
        Ok(())
    }

    /// Append one block at the current end of the fork.
    pub fn extend(&self, rel: &RelFileRef, fork: ForkNumber, buf: &[u8]) -> Result<BlockNumber> {
        if buf.len() != BLOCK_SIZE {
            return Err(Error::Other("block buffer must be BLOCK_SIZE bytes".to_string()));
        }
        let mut file = OpenOptions::new().write(true).open(self.path_for(rel, fork))?;
        let end = file.seek(SeekFrom::End(0))?;
        file.write_all(buf)?;
        Ok(end / BLOCK_SIZE as u64)
    }

    pub fn sync(&self, rel: &RelFileRef, fork: ForkNumber) -> Result<()> {
        let file = File::open(self.path_for(rel, fork))?;
        file.sync_all()?;
        Ok(())
    }

    /// Copy a fork's data block by block through the shared buffer pool.
    /// Returns the number of blocks copied. The destination fork must
    /// already exist; callers decide whether to fsync it afterwards.
    pub fn copy_fork(&self, src: &RelFileRef, dst: &RelFileRef, fork: ForkNumber) -> Result<BlockNumber> {
        let nblocks = self.nblocks(src, fork)?;
        let mut buf = get_block_buffer();

        for block in 0..nblocks {
            if let Err(err) = self.read_block(src, fork, block, &mut buf) {
                put_block_buffer(buf);
                return Err(err);
            }
            if let Err(err) = self.write_block(dst, fork, block, &buf) {
                put_block_buffer(buf);
                return Err(err);
            }
            self.metrics.block_copied();
        }

        put_block_buffer(buf);
        Ok(nblocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::relfile::{RelFileId, StorageKind};
    use tempfile::TempDir;

    fn rel(relnumber: u32) -> RelFileRef {
        RelFileRef::new(RelFileId::new(100, 200, relnumber), false, StorageKind::Standard)
    }

    fn storage(dir: &TempDir) -> FileStorage {
        FileStorage::new(dir.path(), Arc::new(Metrics::new())).unwrap()
    }

    #[test]
    fn test_create_and_exists() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let r = rel(10);

        assert!(!storage.exists(&r, ForkNumber::Main));
        storage.create(&r, ForkNumber::Main, false).unwrap();
        assert!(storage.exists(&r, ForkNumber::Main));
        assert!(!storage.exists(&r, ForkNumber::FreeSpaceMap));
    }

    #[test]
    fn test_create_tolerates_existing_empty_file() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let r = rel(11);

        storage.create(&r, ForkNumber::Main, false).unwrap();
        storage.create(&r, ForkNumber::Main, false).unwrap();
    }

    #[test]
    fn test_create_rejects_existing_file_with_data_unless_redo() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let r = rel(12);

        storage.create(&r, ForkNumber::Main, false).unwrap();
        storage.extend(&r, ForkNumber::Main, &vec![7u8; BLOCK_SIZE]).unwrap();

        assert!(matches!(
            storage.create(&r, ForkNumber::Main, false),
            Err(Error::StorageExists { .. })
        ));
        storage.create(&r, ForkNumber::Main, true).unwrap();
    }

    #[test]
    fn test_unlink_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let r = rel(13);

        storage.create(&r, ForkNumber::Main, false).unwrap();
        storage.unlink(&r, ForkNumber::Main);
        assert!(!storage.exists(&r, ForkNumber::Main));
        // second unlink silently succeeds
        storage.unlink(&r, ForkNumber::Main);
    }

    #[test]
    fn test_unlink_all_removes_every_fork() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let a = rel(14);
        let b = rel(15);

        storage.create(&a, ForkNumber::Main, false).unwrap();
        storage.create(&a, ForkNumber::FreeSpaceMap, false).unwrap();
        storage.create(&b, ForkNumber::Main, false).unwrap();

        storage.unlink_all(&[a, b]);

        assert!(!storage.exists(&a, ForkNumber::Main));
        assert!(!storage.exists(&a, ForkNumber::FreeSpaceMap));
        assert!(!storage.exists(&b, ForkNumber::Main));
    }

    #[test]
    fn test_truncate_shrinks_but_never_grows() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let r = rel(16);

        storage.create(&r, ForkNumber::Main, false).unwrap();
        for i in 0..4u8 {
            storage.extend(&r, ForkNumber::Main, &vec![i; BLOCK_SIZE]).unwrap();
        }
        assert_eq!(storage.nblocks(&r, ForkNumber::Main).unwrap(), 4);

        storage.truncate(&r, ForkNumber::Main, 2).unwrap();
        assert_eq!(storage.nblocks(&r, ForkNumber::Main).unwrap(), 2);

        storage.truncate(&r, ForkNumber::Main, 3).unwrap();
        assert_eq!(storage.nblocks(&r, ForkNumber::Main).unwrap(), 2);
    }

    #[test]
    fn test_copy_fork_copies_contents() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let src = rel(17);
        let dst = rel(18);

        storage.create(&src, ForkNumber::Main, false).unwrap();
        for i in 0..3u8 {
            storage.extend(&src, ForkNumber::Main, &vec![i + 1; BLOCK_SIZE]).unwrap();
        }
        storage.create(&dst, ForkNumber::Main, false).unwrap();

        let copied = storage.copy_fork(&src, &dst, ForkNumber::Main).unwrap();
        assert_eq!(copied, 3);

        let mut buf = vec![0u8; BLOCK_SIZE];
        storage.read_block(&dst, ForkNumber::Main, 2, &mut buf).unwrap();
        assert_eq!(buf[0], 3);
    }

    #[test]
    fn test_temp_relations_use_prefixed_basename() {
        let dir = TempDir::new().unwrap();
        let storage = storage(&dir);
        let temp = RelFileRef::new(RelFileId::new(100, 200, 19), true, StorageKind::Standard);

        let path = storage.path_for(&temp, ForkNumber::Main);
        assert!(path.file_name().unwrap().to_str().unwrap().starts_with('t'));
    }
}
