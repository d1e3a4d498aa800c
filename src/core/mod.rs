
pub mod constants;
pub mod errors;
pub mod relfile;
pub mod buffer_pool;
pub mod smgr;
pub mod registry;
pub mod wal;
pub mod pending;
pub mod prepare;
pub mod redo;
pub mod metrics;
pub mod engine;

pub use constants::*;
pub use engine::{EngineInfo, EngineOptions, StorageEngine};
pub use metrics::{Metrics, MetricsSnapshot};
pub use pending::WorkerContext;
pub use redo::RedoReconstructor;
pub use registry::{RegistryHandle, SharedRegistry};
pub use relfile::{ForkNumber, Persistence, RelFileId, RelFileRef, StorageKind};
pub use smgr::FileStorage;
pub use wal::{LogPosition, Wal, WalRecord};
