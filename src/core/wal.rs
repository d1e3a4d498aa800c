
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::metrics::Metrics;
use crate::core::relfile::{ForkNumber, RelFileRef};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

const WAL_FILE_NAME: &str = "relstore.wal";

/// Byte offset of a record's start in the log file.
pub type LogPosition = u64;

const KIND_CREATE: u8 = 1;
const KIND_PENDING_DELETES: u8 = 2;
const KIND_TRUNCATE: u8 = 3;
const KIND_COMMIT: u8 = 4;
const KIND_ABORT: u8 = 5;

/// Log record kinds. `Create`, `PendingDeletes` and `Truncate` are produced
/// by the storage layer itself; `Commit`/`Abort` carry the relation list the
/// resolved transaction must unlink, and double as the resolution marker the
/// redo reconstructor keys on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    Create {
        rel: RelFileRef,
        fork: ForkNumber,
    },
    PendingDeletes {
        entries: Vec<(RelFileRef, TransactionId)>,
    },
    Truncate {
        rel: RelFileRef,
        nblocks: BlockNumber,
        flags: u8,
    },
    Commit {
        rels: Vec<RelFileRef>,
    },
    Abort {
        rels: Vec<RelFileRef>,
    },
}

impl WalRecord {
    fn kind(&self) -> u8 {
        match self {
            WalRecord::Create { .. } => KIND_CREATE,
            WalRecord::PendingDeletes { .. } => KIND_PENDING_DELETES,
            WalRecord::Truncate { .. } => KIND_TRUNCATE,
            WalRecord::Commit { .. } => KIND_COMMIT,
            WalRecord::Abort { .. } => KIND_ABORT,
        }
    }

    fn encode_payload(&self, buf: &mut Vec<u8>) {
        match self {
            WalRecord::Create { rel, fork } => {
                rel.encode_into(buf);
                buf.push(fork.as_u8());
            }
            WalRecord::PendingDeletes { entries } => {
                buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
                for (rel, xid) in entries {
                    rel.encode_into(buf);
                    buf.extend_from_slice(&xid.to_le_bytes());
                }
            }
            WalRecord::Truncate { rel, nblocks, flags } => {
                rel.encode_into(buf);
                buf.extend_from_slice(&nblocks.to_le_bytes());
                buf.push(*flags);
            }
            WalRecord::Commit { rels } | WalRecord::Abort { rels } => {
                buf.extend_from_slice(&(rels.len() as u64).to_le_bytes());
                for rel in rels {
                    rel.encode_into(buf);
                }
            }
        }
    }

    fn decode(kind: u8, payload: &[u8]) -> Result<Self> {
        match kind {
            KIND_CREATE => {
                if payload.len() != REL_FILE_REF_SIZE + 1 {
                    return Err(Error::DataCorruption {
                        details: format!("create record payload has {} bytes", payload.len()),
                    });
                }
                Ok(WalRecord::Create {
                    rel: RelFileRef::decode(payload)?,
                    fork: ForkNumber::from_u8(payload[REL_FILE_REF_SIZE])?,
                })
            }
            KIND_PENDING_DELETES => {
                let count = decode_count(payload, PENDING_PAIR_SIZE)?;
                let mut entries = Vec::with_capacity(count);
                for i in 0..count {
                    let off = 8 + i * PENDING_PAIR_SIZE;
                    let rel = RelFileRef::decode(&payload[off..])?;
                    let xid = u64::from_le_bytes(
                        payload[off + REL_FILE_REF_SIZE..off + PENDING_PAIR_SIZE].try_into()?,
                    );
                    entries.push((rel, xid));
                }
                Ok(WalRecord::PendingDeletes { entries })
            }
            KIND_TRUNCATE => {
                if payload.len() != REL_FILE_REF_SIZE + 9 {
                    return Err(Error::DataCorruption {
                        details: format!("truncate record payload has {} bytes", payload.len()),
                    });
                }
                Ok(WalRecord::Truncate {
                    rel: RelFileRef::decode(payload)?,
                    nblocks: u64::from_le_bytes(
                        payload[REL_FILE_REF_SIZE..REL_FILE_REF_SIZE + 8].try_into()?,
                    ),
                    flags: payload[REL_FILE_REF_SIZE + 8],
                })
            }
            KIND_COMMIT | KIND_ABORT => {
                let count = decode_count(payload, REL_FILE_REF_SIZE)?;
                let mut rels = Vec::with_capacity(count);
                for i in 0..count {
                    rels.push(RelFileRef::decode(&payload[8 + i * REL_FILE_REF_SIZE..])?);
                }
                if kind == KIND_COMMIT {
                    Ok(WalRecord::Commit { rels })
                } else {
                    Ok(WalRecord::Abort { rels })
                }
            }
            other => Err(Error::UnknownRecordKind { kind: other }),
        }
    }
}

fn decode_count(payload: &[u8], item_size: usize) -> Result<usize> {
    if payload.len() < 8 {
        return Err(Error::DataCorruption {
            details: "record payload shorter than its count field".to_string(),
        });
    }
    let count = u64::from_le_bytes(payload[0..8].try_into()?) as usize;
    if payload.len() != 8 + count * item_size {
        return Err(Error::DataCorruption {
            details: format!(
                "record count {} does not match payload length {}",
                count,
                payload.len()
            ),
        });
    }
    Ok(count)
}

struct WalInner {
    writer: BufWriter<File>,
    file: File,
    end_position: u64,
}

/// Append-only record log. Frame layout after the 16-byte file header:
/// `[payload_len: u32][kind: u8][xid: u64][payload][crc32]`, all little
/// endian. The crc covers kind, xid and payload.
pub struct Wal {
    inner: Mutex<WalInner>,
    path: PathBuf,
    metrics: Arc<Metrics>,
}

impl Wal {
    pub fn open(dir: &Path, metrics: Arc<Metrics>) -> Result<Self> {
        let path = dir.join(WAL_FILE_NAME);
        let is_new = !path.exists();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;
        let writer_file = file.try_clone()?;
        let mut writer = BufWriter::new(writer_file);

        let end_position = if is_new {
            let mut header = [0u8; WAL_HEADER_SIZE];
            header[0..4].copy_from_slice(&WAL_MAGIC);
            header[4..8].copy_from_slice(&VERSION.to_le_bytes());
            writer.write_all(&header)?;
            writer.flush()?;
            file.sync_all()?;
            WAL_HEADER_SIZE as u64
        } else {
            validate_header(&file)?;
            let end = scan_valid_end(&file)?;
            writer.seek(SeekFrom::Start(end))?;
            end
        };

        Ok(Self {
            inner: Mutex::new(WalInner {
                writer,
                file,
                end_position,
            }),
            path,
            metrics,
        })
    }

    /// Append one record, buffered. Returns the record's start position.
    pub fn append(&self, xid: TransactionId, record: &WalRecord) -> Result<LogPosition> {
        let mut payload = Vec::new();
        record.encode_payload(&mut payload);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[record.kind()]);
        hasher.update(&xid.to_le_bytes());
        hasher.update(&payload);
        let crc = hasher.finalize();

        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned {
            lock_name: "wal.inner".to_string(),
        })?;

        let position = inner.end_position;
        inner.writer.write_all(&(payload.len() as u32).to_le_bytes())?;
        inner.writer.write_all(&[record.kind()])?;
        inner.writer.write_all(&xid.to_le_bytes())?;
        inner.writer.write_all(&payload)?;
        inner.writer.write_all(&crc.to_le_bytes())?;
        inner.end_position += (WAL_FRAME_OVERHEAD + payload.len()) as u64;

        self.metrics
            .wal_write((WAL_FRAME_OVERHEAD + payload.len()) as u64);
        debug!(xid, position, kind = record.kind(), "log record appended");
        Ok(position)
    }

    /// Force everything appended so far to durable storage.
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned {
            lock_name: "wal.inner".to_string(),
        })?;
        inner.writer.flush()?;
        inner.file.sync_all()?;
        self.metrics.wal_flush();
        Ok(())
    }

    /// Append and flush in one step, for records whose durability gates the
    /// operation that follows them.
    pub fn append_flush(&self, xid: TransactionId, record: &WalRecord) -> Result<LogPosition> {
        let position = self.append(xid, record)?;
        self.flush()?;
        Ok(position)
    }

    /// Read every intact record in log order, stopping cleanly at a torn or
    /// corrupt tail.
    pub fn read_all(&self) -> Result<Vec<(LogPosition, TransactionId, WalRecord)>> {
        {
            let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned {
                lock_name: "wal.inner".to_string(),
            })?;
            inner.writer.flush()?;
        }

        let file = File::open(&self.path)?;
        validate_header(&file)?;

        let mut data = Vec::new();
        let mut reader = &file;
        reader.seek(SeekFrom::Start(WAL_HEADER_SIZE as u64))?;
        reader.read_to_end(&mut data)?;

        let mut records = Vec::new();
        let mut off = 0usize;
        while data.len() - off >= WAL_FRAME_OVERHEAD {
            let len = u32::from_le_bytes(data[off..off + 4].try_into()?) as usize;
            if len > MAX_WAL_PAYLOAD || data.len() - off < WAL_FRAME_OVERHEAD + len {
                warn!(position = off, "torn record at log tail, stopping replay scan");
                break;
            }

            let kind = data[off + 4];
            let xid = u64::from_le_bytes(data[off + 5..off + 13].try_into()?);
            let payload = &data[off + 13..off + 13 + len];
            let stored_crc =
                u32::from_le_bytes(data[off + 13 + len..off + 17 + len].try_into()?);

            let mut hasher = crc32fast::Hasher::new();
            hasher.update(&[kind]);
            hasher.update(&xid.to_le_bytes());
            hasher.update(payload);
            if hasher.finalize() != stored_crc {
                warn!(position = off, "log record checksum mismatch, stopping replay scan");
                break;
            }

            match WalRecord::decode(kind, payload) {
                Ok(record) => {
                    records.push((WAL_HEADER_SIZE as u64 + off as u64, xid, record));
                }
                Err(err) => {
                    warn!(position = off, error = %err, "undecodable log record, stopping replay scan");
                    break;
                }
            }
            off += WAL_FRAME_OVERHEAD + len;
        }

        Ok(records)
    }

    /// Discard every record. Used once recovery has consumed the log.
    pub fn reset(&self) -> Result<()> {
        let mut inner = self.inner.lock().map_err(|_| Error::LockPoisoned {
            lock_name: "wal.inner".to_string(),
        })?;
        inner.writer.flush()?;
        inner.file.set_len(WAL_HEADER_SIZE as u64)?;
        inner.file.sync_all()?;
        inner.writer.seek(SeekFrom::Start(WAL_HEADER_SIZE as u64))?;
        inner.end_position = WAL_HEADER_SIZE as u64;
        Ok(())
    }

    pub fn end_position(&self) -> LogPosition {
        self.inner
            .lock()
            .map(|inner| inner.end_position)
            .unwrap_or(WAL_HEADER_SIZE as u64)
    }
}

fn validate_header(file: &File) -> Result<()> {
    let mut header = [0u8; WAL_HEADER_SIZE];
    let mut reader = file;
    reader.seek(SeekFrom::Start(0))?;
    reader.read_exact(&mut header)?;

    if header[0..4] != WAL_MAGIC {
        return Err(Error::InvalidMagic);
    }
    if u32::from_le_bytes(header[4..8].try_into()?) != VERSION {
        return Err(Error::InvalidVersion);
    }
    Ok(())
}

/// Walk the log from the header, validating each frame, and return the byte
/// offset just past the last intact record. Appends resume there, clobbering
/// any torn tail left by a crash mid-write.
fn scan_valid_end(file: &File) -> Result<u64> {
    let mut data = Vec::new();
    let mut reader = file;
    reader.seek(SeekFrom::Start(WAL_HEADER_SIZE as u64))?;
    reader.read_to_end(&mut data)?;

    let mut off = 0usize;
    while data.len() - off >= WAL_FRAME_OVERHEAD {
        let len = u32::from_le_bytes(data[off..off + 4].try_into()?) as usize;
        if len > MAX_WAL_PAYLOAD || data.len() - off < WAL_FRAME_OVERHEAD + len {
            break;
        }

        let kind = data[off + 4];
        let xid_bytes = &data[off + 5..off + 13];
        let payload = &data[off + 13..off + 13 + len];
        let stored_crc = u32::from_le_bytes(data[off + 13 + len..off + 17 + len].try_into()?);

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&[kind]);
        hasher.update(xid_bytes);
        hasher.update(payload);
        if hasher.finalize() != stored_crc {
            break;
        }

        off += WAL_FRAME_OVERHEAD + len;
    }

    Ok(WAL_HEADER_SIZE as u64 + off as u64)
}
