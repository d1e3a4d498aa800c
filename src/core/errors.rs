use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("no transaction id assigned, cannot create logged storage")]
    NoActiveTransaction,

    #[error("storage engine is read-only, cannot perform operation: {operation}")]
    ReadOnly { operation: String },

    #[error("storage file already exists with data: {path}")]
    StorageExists { path: String },

    #[error("pending-delete registry is full (capacity: {capacity})")]
    RegistryExhausted { capacity: usize },

    #[error("invalid magic number")]
    InvalidMagic,

    #[error("unsupported version")]
    InvalidVersion,

    #[error("log record checksum verification failed")]
    WalChecksumFail,

    #[error("log file corrupted: {details}")]
    WalCorrupted { details: String },

    #[error("unknown log record kind: {kind}")]
    UnknownRecordKind { kind: u8 },

    #[error("data corruption: {details}")]
    DataCorruption { details: String },

    #[error("lock poisoned: {lock_name} (another thread panicked while holding this lock)")]
    LockPoisoned { lock_name: String },

    #[error("IO error: {0}")]
    Io(String),

    #[error("{0}")]
    Other(String),
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::LockPoisoned {
            lock_name: "unknown".to_string(),
        }
    }
}

impl From<std::array::TryFromSliceError> for Error {
    fn from(_: std::array::TryFromSliceError) -> Self {
        Error::DataCorruption {
            details: "failed to parse binary data".to_string(),
        }
    }
}
