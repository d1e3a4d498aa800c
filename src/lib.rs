
pub mod core;

pub use core::engine::{EngineInfo, EngineOptions, StorageEngine};
pub use core::errors::{Error, Result};
pub use core::metrics::MetricsSnapshot;
pub use core::pending::WorkerContext;
pub use core::redo::RedoReconstructor;
pub use core::registry::SharedRegistry;
pub use core::relfile::{ForkNumber, Persistence, RelFileId, RelFileRef, StorageKind};
pub use core::wal::{LogPosition, Wal, WalRecord};
pub use core::{BlockNumber, TransactionId, INVALID_TRANSACTION_ID};
