
pub const BLOCK_SIZE: usize = 8192;

pub const VERSION: u32 = 1;

pub const WAL_MAGIC: [u8; 4] = *b"RWAL";

pub const WAL_HEADER_SIZE: usize = 16;

/// len(4) + kind(1) + xid(8) + crc(4)
pub const WAL_FRAME_OVERHEAD: usize = 17;

pub const REL_FILE_REF_SIZE: usize = 14;

pub const PENDING_PAIR_SIZE: usize = REL_FILE_REF_SIZE + 8;

pub const DEFAULT_REGISTRY_CAPACITY: usize = 65_536;

/// Upper bound on a single WAL record payload, to reject garbage lengths
/// when scanning a damaged log tail.
pub const MAX_WAL_PAYLOAD: usize = 16 * 1024 * 1024;

pub type TransactionId = u64;

pub const INVALID_TRANSACTION_ID: TransactionId = 0;

pub type BlockNumber = u64;
