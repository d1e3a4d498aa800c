
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::metrics::Metrics;
use crate::core::relfile::{ForkNumber, RelFileRef, TRUNCATE_FSM, TRUNCATE_MAIN, TRUNCATE_VM};
use crate::core::smgr::FileStorage;
use crate::core::wal::WalRecord;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Rebuilds the pending-delete picture during crash recovery. Create and
/// pending-delete-snapshot records accumulate relations per owning
/// transaction, in log order; a resolution record discards that
/// transaction's entry wholesale (its relations were handled by ordinary
/// redo and must not be double-deleted here). Whatever survives replay
/// belongs to transactions whose fate was never recorded — orphans.
///
/// Recovery is single-threaded relative to this subsystem; no locking.
pub struct RedoReconstructor {
    map: HashMap<TransactionId, Vec<RelFileRef>>,
    storage: Arc<FileStorage>,
    metrics: Arc<Metrics>,
}

impl RedoReconstructor {
    pub fn new(storage: Arc<FileStorage>, metrics: Arc<Metrics>) -> Self {
        Self {
            map: HashMap::new(),
            storage,
            metrics,
        }
    }

    /// Remember a relation as pending for `xid`. Ignored for an invalid
    /// transaction id — such a relation was never registry-tracked.
    pub fn replay_add(&mut self, rel: RelFileRef, xid: TransactionId) {
        if xid == INVALID_TRANSACTION_ID {
            return;
        }
        self.map.entry(xid).or_default().push(rel);
        debug!(rel = %rel, xid, "pending delete remembered during redo");
    }

    /// Replay a create record: re-create the file (idempotently, it may
    /// have survived the crash) and remember it as pending.
    pub fn replay_create(&mut self, rel: RelFileRef, fork: ForkNumber, xid: TransactionId) -> Result<()> {
        self.storage.create(&rel, fork, true)?;
        self.replay_add(rel, xid);
        Ok(())
    }

    /// Ingest a pending-delete snapshot payload.
    pub fn replay_pending_delete_record(&mut self, entries: &[(RelFileRef, TransactionId)]) {
        for (rel, xid) in entries {
            self.replay_add(*rel, *xid);
        }
    }

    /// Replay a truncate record against the forks its bitmask selects. The
    /// main fork is re-created if missing, which suggests it was dropped
    /// later in the log; replay as best we can until the drop is seen.
    pub fn replay_truncate(&self, rel: RelFileRef, nblocks: BlockNumber, flags: u8) -> Result<()> {
        self.storage.create(&rel, ForkNumber::Main, true)?;

        if flags & TRUNCATE_MAIN != 0 {
            self.storage.truncate(&rel, ForkNumber::Main, nblocks)?;
        }
        if flags & TRUNCATE_FSM != 0 && self.storage.exists(&rel, ForkNumber::FreeSpaceMap) {
            self.storage.truncate(&rel, ForkNumber::FreeSpaceMap, nblocks)?;
        }
        if flags & TRUNCATE_VM != 0 && self.storage.exists(&rel, ForkNumber::VisibilityMap) {
            self.storage.truncate(&rel, ForkNumber::VisibilityMap, nblocks)?;
        }
        Ok(())
    }

    /// The transaction's fate is known: forget its pending relations
    /// without deleting anything.
    pub fn replay_resolve(&mut self, xid: TransactionId) {
        if xid == INVALID_TRANSACTION_ID {
            return;
        }
        if self.map.remove(&xid).is_some() {
            debug!(xid, "pending deletes discarded during redo, transaction resolved");
        }
    }

    /// Dispatch one log record. Resolution records first unlink the
    /// relations they carry, the same deletes the live path would have
    /// executed, then discard the transaction's reconstruction entry.
    pub fn replay(&mut self, xid: TransactionId, record: &WalRecord) -> Result<()> {
        match record {
            WalRecord::Create { rel, fork } => self.replay_create(*rel, *fork, xid)?,
            WalRecord::PendingDeletes { entries } => self.replay_pending_delete_record(entries),
            WalRecord::Truncate { rel, nblocks, flags } => {
                self.replay_truncate(*rel, *nblocks, *flags)?
            }
            WalRecord::Commit { rels } | WalRecord::Abort { rels } => {
                self.storage.unlink_all(rels);
                self.replay_resolve(xid);
            }
        }
        self.metrics.record_replayed();
        Ok(())
    }

    /// Transactions still unaccounted for.
    pub fn unresolved_count(&self) -> usize {
        self.map.len()
    }

    /// Drop every orphaned relation: per surviving transaction, deduplicate
    /// its list (a create and a later snapshot may both have referenced the
    /// same relation) and issue one batched unlink. Consumes the
    /// reconstruction state; recovery is done with it.
    ///
    /// Dedup is a pairwise scan — the lists are almost always tiny.
    pub fn finalize_orphans(&mut self) -> usize {
        let mut dropped = 0;

        for (xid, rels) in self.map.drain() {
            let mut deduped: Vec<RelFileRef> = Vec::with_capacity(rels.len());
            for rel in rels {
                if deduped.iter().any(|seen| seen.id == rel.id) {
                    debug!(rel = %rel, xid, "duplicate pending delete skipped");
                } else {
                    deduped.push(rel);
                }
            }

            info!(xid, count = deduped.len(), "dropping orphaned relations");
            self.storage.unlink_all(&deduped);
            for _ in &deduped {
                self.metrics.orphan_dropped();
            }
            dropped += deduped.len();
        }

        dropped
    }
}
