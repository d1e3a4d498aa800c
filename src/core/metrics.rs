use std::sync::atomic::{AtomicU64, Ordering};

/// Counters collected during storage-lifecycle operations.
/// All fields use atomic types for lock-free updates with minimal overhead.
#[derive(Debug, Default)]
pub struct Metrics {
    // Physical storage metrics
    files_created: AtomicU64,
    files_unlinked: AtomicU64,
    files_truncated: AtomicU64,
    blocks_copied: AtomicU64,

    // WAL metrics
    wal_records_written: AtomicU64,
    wal_bytes_written: AtomicU64,
    wal_flushes: AtomicU64,

    // Registry metrics
    registry_adds: AtomicU64,
    registry_removes: AtomicU64,
    snapshots_logged: AtomicU64,

    // Recovery metrics
    records_replayed: AtomicU64,
    orphans_dropped: AtomicU64,

    // Error metrics
    io_errors: AtomicU64,
}

/// Snapshot of metrics at a point in time.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub files_created: u64,
    pub files_unlinked: u64,
    pub files_truncated: u64,
    pub blocks_copied: u64,

    pub wal_records_written: u64,
    pub wal_bytes_written: u64,
    pub wal_flushes: u64,

    pub registry_adds: u64,
    pub registry_removes: u64,
    pub registry_live: u64,
    pub snapshots_logged: u64,

    pub records_replayed: u64,
    pub orphans_dropped: u64,

    pub io_errors: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_created(&self) {
        self.files_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_unlinked(&self) {
        self.files_unlinked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn file_truncated(&self) {
        self.files_truncated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn block_copied(&self) {
        self.blocks_copied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn wal_write(&self, bytes: u64) {
        self.wal_records_written.fetch_add(1, Ordering::Relaxed);
        self.wal_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn wal_flush(&self) {
        self.wal_flushes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registry_add(&self) {
        self.registry_adds.fetch_add(1, Ordering::Relaxed);
    }

    pub fn registry_remove(&self) {
        self.registry_removes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot_logged(&self) {
        self.snapshots_logged.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_replayed(&self) {
        self.records_replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn orphan_dropped(&self) {
        self.orphans_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn io_error(&self) {
        self.io_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn files_unlinked_count(&self) -> u64 {
        self.files_unlinked.load(Ordering::Relaxed)
    }

    pub fn orphans_dropped_count(&self) -> u64 {
        self.orphans_dropped.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self, registry_live: u64) -> MetricsSnapshot {
        MetricsSnapshot {
            files_created: self.files_created.load(Ordering::Relaxed),
            files_unlinked: self.files_unlinked.load(Ordering::Relaxed),
            files_truncated: self.files_truncated.load(Ordering::Relaxed),
            blocks_copied: self.blocks_copied.load(Ordering::Relaxed),

            wal_records_written: self.wal_records_written.load(Ordering::Relaxed),
            wal_bytes_written: self.wal_bytes_written.load(Ordering::Relaxed),
            wal_flushes: self.wal_flushes.load(Ordering::Relaxed),

            registry_adds: self.registry_adds.load(Ordering::Relaxed),
            registry_removes: self.registry_removes.load(Ordering::Relaxed),
            registry_live,
            snapshots_logged: self.snapshots_logged.load(Ordering::Relaxed),

            records_replayed: self.records_replayed.load(Ordering::Relaxed),
            orphans_dropped: self.orphans_dropped.load(Ordering::Relaxed),

            io_errors: self.io_errors.load(Ordering::Relaxed),
        }
    }
}
