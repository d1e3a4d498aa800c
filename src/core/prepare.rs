
use crate::core::constants::INVALID_TRANSACTION_ID;
use crate::core::errors::*;
use crate::core::metrics::Metrics;
use crate::core::registry::SharedRegistry;
use crate::core::wal::{LogPosition, Wal, WalRecord};
use tracing::debug;

/// Dump the shared registry into one pending-delete log record, flushed,
/// immediately before a transaction's outcome becomes externally durable
/// (the two-phase prepare boundary). Produces nothing when the registry is
/// empty.
///
/// Not reentrant: at most one caller runs this per coordination epoch.
pub fn log_pending_delete_snapshot(
    registry: &SharedRegistry,
    wal: &Wal,
    metrics: &Metrics,
) -> Result<Option<LogPosition>> {
    let entries = match registry.snapshot() {
        Some(entries) => entries,
        None => return Ok(None),
    };

    let count = entries.len();
    let position = wal.append_flush(
        INVALID_TRANSACTION_ID,
        &WalRecord::PendingDeletes { entries },
    )?;
    metrics.snapshot_logged();
    debug!(count, position, "pending delete snapshot logged");

    Ok(Some(position))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::DEFAULT_REGISTRY_CAPACITY;
    use crate::core::relfile::{RelFileId, RelFileRef, StorageKind};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn rel(relnumber: u32) -> RelFileRef {
        RelFileRef::new(RelFileId::new(1663, 16384, relnumber), false, StorageKind::Standard)
    }

    #[test]
    fn test_empty_registry_logs_nothing() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new());
        let wal = Wal::open(dir.path(), metrics.clone()).unwrap();
        let registry = SharedRegistry::new(DEFAULT_REGISTRY_CAPACITY);

        let position = log_pending_delete_snapshot(&registry, &wal, &metrics).unwrap();
        assert!(position.is_none());
        assert!(wal.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_snapshot_record_carries_every_live_node() {
        let dir = TempDir::new().unwrap();
        let metrics = Arc::new(Metrics::new());
        let wal = Wal::open(dir.path(), metrics.clone()).unwrap();
        let registry = SharedRegistry::new(DEFAULT_REGISTRY_CAPACITY);

        registry.add(rel(1), 5).unwrap();
        let removed = registry.add(rel(2), 5).unwrap();
        registry.add(rel(3), 6).unwrap();
        registry.remove(removed);

        let position = log_pending_delete_snapshot(&registry, &wal, &metrics).unwrap();
        assert!(position.is_some());

        let records = wal.read_all().unwrap();
        assert_eq!(records.len(), 1);
        match &records[0].2 {
            WalRecord::PendingDeletes { entries } => {
                let mut got: Vec<_> = entries.iter().map(|(r, x)| (r.id.relnumber, *x)).collect();
                got.sort();
                assert_eq!(got, vec![(1, 5), (3, 6)]);
            }
            other => panic!("unexpected record: {:?}", other),
        }
    }
}
