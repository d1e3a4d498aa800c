
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::metrics::Metrics;
use crate::core::registry::{RegistryHandle, SharedRegistry};
use crate::core::relfile::{ForkNumber, Persistence, RelFileId, RelFileRef, StorageKind, TRUNCATE_ALL};
use crate::core::smgr::FileStorage;
use crate::core::wal::{LogPosition, Wal, WalRecord};
use std::sync::Arc;
use tracing::debug;

/// One create/drop issued in the running transaction. `at_commit` selects
/// the boundary that physically deletes the relation: a created relation is
/// deleted if the transaction aborts, a dropped one if it commits.
#[derive(Debug, Clone, Copy)]
struct PendingDelete {
    rel: RelFileRef,
    at_commit: bool,
    nest_level: u32,
    registry_handle: Option<RegistryHandle>,
}

/// Per-worker storage context: the pending create/drop list for the running
/// transaction plus handles to the shared collaborators. Owned exclusively
/// by one worker; only the registry behind it is shared.
///
/// The surrounding transaction manager drives the lifecycle: it assigns the
/// transaction id, opens/closes subtransaction levels, and fires the
/// commit/abort boundary.
pub struct WorkerContext {
    storage: Arc<FileStorage>,
    wal: Arc<Wal>,
    registry: Option<Arc<SharedRegistry>>,
    metrics: Arc<Metrics>,
    pending: Vec<PendingDelete>,
    nest_level: u32,
    xid: TransactionId,
}

impl WorkerContext {
    pub fn new(
        storage: Arc<FileStorage>,
        wal: Arc<Wal>,
        registry: Option<Arc<SharedRegistry>>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            storage,
            wal,
            registry,
            metrics,
            pending: Vec::new(),
            nest_level: 1,
            xid: INVALID_TRANSACTION_ID,
        }
    }

    pub fn begin_transaction(&mut self, xid: TransactionId) {
        debug_assert!(self.pending.is_empty(), "pending deletes leaked across transactions");
        self.xid = xid;
        self.nest_level = 1;
    }

    pub fn current_xid(&self) -> TransactionId {
        self.xid
    }

    pub fn nest_level(&self) -> u32 {
        self.nest_level
    }

    pub fn begin_subtransaction(&mut self) {
        self.nest_level += 1;
    }

    pub fn storage(&self) -> &Arc<FileStorage> {
        &self.storage
    }

    /// Create physical storage for a relation and schedule it for deletion
    /// if the transaction later aborts.
    ///
    /// For permanent relations the create record is flushed to the log
    /// before the file exists on disk, so a crash can never leave a file
    /// with no matching record; the entry is also mirrored into the shared
    /// registry so redo can find it if we die before resolving.
    pub fn create_storage(
        &mut self,
        id: RelFileId,
        persistence: Persistence,
        kind: StorageKind,
    ) -> Result<RelFileRef> {
        let rel = RelFileRef::new(id, persistence == Persistence::Temporary, kind);

        let mut xid = INVALID_TRANSACTION_ID;
        if persistence == Persistence::Permanent {
            if self.xid == INVALID_TRANSACTION_ID {
                return Err(Error::NoActiveTransaction);
            }
            xid = self.xid;
            self.wal.append_flush(
                xid,
                &WalRecord::Create {
                    rel,
                    fork: ForkNumber::Main,
                },
            )?;
        }

        self.storage.create(&rel, ForkNumber::Main, false)?;

        let registry_handle = match &self.registry {
            Some(registry) if xid != INVALID_TRANSACTION_ID => {
                let handle = registry.add(rel, xid)?;
                self.metrics.registry_add();
                Some(handle)
            }
            _ => None,
        };

        self.pending.push(PendingDelete {
            rel,
            at_commit: false,
            nest_level: self.nest_level,
            registry_handle,
        });

        debug!(rel = %rel, xid, "storage created, delete scheduled at abort");
        Ok(rel)
    }

    /// Schedule unlinking of existing storage at transaction commit. The
    /// file is not touched now; dropping durable storage can never orphan a
    /// file, so no registry mirror is made.
    ///
    /// A relation created earlier in this transaction now sits in the list
    /// twice, once per disposition; whichever boundary fires deletes the
    /// file, and unlink idempotence makes the other entry harmless.
    pub fn drop_storage(&mut self, rel: RelFileRef) {
        self.pending.push(PendingDelete {
            rel,
            at_commit: true,
            nest_level: self.nest_level,
            registry_handle: None,
        });
        debug!(rel = %rel, "storage drop scheduled at commit");
    }

    /// Mark a relation as not to be deleted after all: remove every entry
    /// matching (identity, disposition) without running its action, and
    /// drop its registry mirror. No-op if nothing matches. Used when an
    /// in-flight storage swap must survive a later abort.
    pub fn preserve_storage(&mut self, id: RelFileId, at_commit: bool) {
        let registry = self.registry.clone();
        let metrics = self.metrics.clone();
        self.pending.retain(|entry| {
            if entry.rel.id == id && entry.at_commit == at_commit {
                if let (Some(registry), Some(handle)) = (&registry, entry.registry_handle) {
                    registry.remove(handle);
                    metrics.registry_remove();
                }
                debug!(rel = %entry.rel, at_commit, "pending delete preserved");
                false
            } else {
                true
            }
        });
    }

    /// Physically truncate a relation to `nblocks` blocks. The auxiliary
    /// forks are truncated first; the truncate record is flushed before the
    /// main fork shrinks whenever an auxiliary fork was cut, so replay never
    /// sees a truncated heap with stale map entries.
    pub fn truncate(
        &mut self,
        rel: &RelFileRef,
        nblocks: BlockNumber,
        persistence: Persistence,
    ) -> Result<()> {
        let fsm = self.storage.exists(rel, ForkNumber::FreeSpaceMap);
        if fsm {
            self.storage.truncate(rel, ForkNumber::FreeSpaceMap, nblocks)?;
        }
        let vm = self.storage.exists(rel, ForkNumber::VisibilityMap);
        if vm {
            self.storage.truncate(rel, ForkNumber::VisibilityMap, nblocks)?;
        }

        if persistence == Persistence::Permanent {
            self.wal.append(
                self.xid,
                &WalRecord::Truncate {
                    rel: *rel,
                    nblocks,
                    flags: TRUNCATE_ALL,
                },
            )?;
            if fsm || vm {
                self.wal.flush()?;
            }
        }

        self.storage.truncate(rel, ForkNumber::Main, nblocks)
    }

    /// Copy one fork's data block by block. The destination is synced for
    /// permanent relations (and for the init fork of unlogged ones, which
    /// must survive a crash like permanent data).
    pub fn copy_storage_fork(
        &mut self,
        src: &RelFileRef,
        dst: &RelFileRef,
        fork: ForkNumber,
        persistence: Persistence,
    ) -> Result<BlockNumber> {
        if !self.storage.exists(dst, fork) {
            self.storage.create(dst, fork, false)?;
        }

        let copied = self.storage.copy_fork(src, dst, fork)?;

        let copying_initfork = persistence == Persistence::Unlogged && fork == ForkNumber::Init;
        if persistence == Persistence::Permanent || copying_initfork {
            self.storage.sync(dst, fork)?;
        }

        Ok(copied)
    }

    /// Resolve every entry at or above the current nesting level: unlink
    /// (batched) the ones whose disposition matches the outcome, discard the
    /// rest, and always drop registry mirrors. Unlink failures are warnings
    /// inside the storage layer; the outcome is already fixed by the time
    /// this runs.
    pub fn end_of_transaction(&mut self, is_commit: bool) {
        let level = self.nest_level;
        let mut to_unlink = Vec::new();
        let mut kept = Vec::with_capacity(self.pending.len());

        for entry in self.pending.drain(..) {
            if entry.nest_level < level {
                kept.push(entry);
                continue;
            }
            if entry.at_commit == is_commit {
                to_unlink.push(entry.rel);
            }
            if let (Some(registry), Some(handle)) = (&self.registry, entry.registry_handle) {
                registry.remove(handle);
                self.metrics.registry_remove();
            }
        }
        self.pending = kept;

        if !to_unlink.is_empty() {
            self.storage.unlink_all(&to_unlink);
        }
        if level == 1 {
            self.xid = INVALID_TRANSACTION_ID;
        }
    }

    /// Commit the transaction: flush a commit record carrying the
    /// commit-time delete list, then resolve the pending list.
    pub fn commit(&mut self) -> Result<Option<LogPosition>> {
        let position = if self.xid != INVALID_TRANSACTION_ID {
            let rels = self.get_pending_deletes(true);
            Some(self.wal.append_flush(self.xid, &WalRecord::Commit { rels })?)
        } else {
            None
        };
        self.end_of_transaction(true);
        Ok(position)
    }

    /// Abort the transaction: flush an abort record carrying the abort-time
    /// delete list, then resolve the pending list.
    pub fn abort(&mut self) -> Result<Option<LogPosition>> {
        let position = if self.xid != INVALID_TRANSACTION_ID {
            let rels = self.get_pending_deletes(false);
            Some(self.wal.append_flush(self.xid, &WalRecord::Abort { rels })?)
        } else {
            None
        };
        self.end_of_transaction(false);
        Ok(position)
    }

    /// Subtransaction commit: reassign the closing level's entries to the
    /// parent so they resolve with it, then pop the level.
    pub fn subtransaction_commit(&mut self) {
        debug_assert!(self.nest_level > 1, "no subtransaction to commit");
        let level = self.nest_level;
        for entry in &mut self.pending {
            if entry.nest_level >= level {
                entry.nest_level = level - 1;
            }
        }
        self.nest_level = level.saturating_sub(1).max(1);
    }

    /// Subtransaction abort: this subtransaction can never commit, so its
    /// entries are resolved immediately as aborted, then the level pops.
    pub fn subtransaction_abort(&mut self) {
        debug_assert!(self.nest_level > 1, "no subtransaction to abort");
        self.end_of_transaction(false);
        self.nest_level = self.nest_level.saturating_sub(1).max(1);
    }

    /// Relations scheduled for deletion at the given outcome, at or above
    /// the current nesting level — the list a two-phase prepare writes into
    /// its externally durable state.
    pub fn get_pending_deletes(&self, for_commit: bool) -> Vec<RelFileRef> {
        let level = self.nest_level;
        self.pending
            .iter()
            .filter(|entry| entry.nest_level >= level && entry.at_commit == for_commit)
            .map(|entry| entry.rel)
            .collect()
    }

    /// Discard all in-memory pending state after a successful prepare: the
    /// two-phase state now owns these deletes. Registry mirrors go too; the
    /// prepare record has externalized them.
    pub fn post_prepare_cleanup(&mut self) {
        for entry in self.pending.drain(..) {
            if let (Some(registry), Some(handle)) = (&self.registry, entry.registry_handle) {
                registry.remove(handle);
                self.metrics.registry_remove();
            }
        }
        self.xid = INVALID_TRANSACTION_ID;
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Identities currently mirrored into the shared registry.
    pub fn mirrored_rels(&self) -> Vec<RelFileRef> {
        self.pending
            .iter()
            .filter(|entry| entry.registry_handle.is_some())
            .map(|entry| entry.rel)
            .collect()
    }
}
