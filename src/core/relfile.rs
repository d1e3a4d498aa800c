
use crate::core::constants::*;
use crate::core::errors::*;
use std::fmt;

/// On-disk identity of a relation: which tablespace and database it lives
/// in, and its file number within them. Immutable once assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelFileId {
    pub tablespace: u32,
    pub database: u32,
    pub relnumber: u32,
}

impl RelFileId {
    pub fn new(tablespace: u32, database: u32, relnumber: u32) -> Self {
        Self {
            tablespace,
            database,
            relnumber,
        }
    }
}

impl fmt::Display for RelFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.tablespace, self.database, self.relnumber)
    }
}

/// Which physical storage implementation backs the relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKind {
    Standard,
    AppendOnly,
}

impl StorageKind {
    pub fn as_u8(self) -> u8 {
        match self {
            StorageKind::Standard => 0,
            StorageKind::AppendOnly => 1,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(StorageKind::Standard),
            1 => Ok(StorageKind::AppendOnly),
            _ => Err(Error::DataCorruption {
                details: format!("invalid storage kind byte: {}", v),
            }),
        }
    }
}

/// Named physical sub-structure of a relation. Only the main fork is
/// created eagerly; the rest appear lazily as their modules need them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForkNumber {
    Main,
    FreeSpaceMap,
    VisibilityMap,
    Init,
}

impl ForkNumber {
    pub const ALL: [ForkNumber; 4] = [
        ForkNumber::Main,
        ForkNumber::FreeSpaceMap,
        ForkNumber::VisibilityMap,
        ForkNumber::Init,
    ];

    /// Filename suffix for this fork.
    pub fn suffix(self) -> &'static str {
        match self {
            ForkNumber::Main => "",
            ForkNumber::FreeSpaceMap => "_fsm",
            ForkNumber::VisibilityMap => "_vm",
            ForkNumber::Init => "_init",
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            ForkNumber::Main => 0,
            ForkNumber::FreeSpaceMap => 1,
            ForkNumber::VisibilityMap => 2,
            ForkNumber::Init => 3,
        }
    }

    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(ForkNumber::Main),
            1 => Ok(ForkNumber::FreeSpaceMap),
            2 => Ok(ForkNumber::VisibilityMap),
            3 => Ok(ForkNumber::Init),
            _ => Err(Error::DataCorruption {
                details: format!("invalid fork number byte: {}", v),
            }),
        }
    }
}

/// Whether the relation must survive a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persistence {
    Permanent,
    Unlogged,
    Temporary,
}

/// Truncate flag bits: which forks a truncate record applies to.
pub const TRUNCATE_MAIN: u8 = 0x01;
pub const TRUNCATE_FSM: u8 = 0x02;
pub const TRUNCATE_VM: u8 = 0x04;
pub const TRUNCATE_ALL: u8 = TRUNCATE_MAIN | TRUNCATE_FSM | TRUNCATE_VM;

/// A relation identity as carried in pending-delete entries, registry nodes
/// and log payloads: the file id plus the session-local flag and the
/// storage-implementation tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelFileRef {
    pub id: RelFileId,
    pub is_temp: bool,
    pub kind: StorageKind,
}

impl RelFileRef {
    pub fn new(id: RelFileId, is_temp: bool, kind: StorageKind) -> Self {
        Self { id, is_temp, kind }
    }

    /// Fixed-width little-endian encoding, REL_FILE_REF_SIZE bytes.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.tablespace.to_le_bytes());
        buf.extend_from_slice(&self.id.database.to_le_bytes());
        buf.extend_from_slice(&self.id.relnumber.to_le_bytes());
        buf.push(self.is_temp as u8);
        buf.push(self.kind.as_u8());
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < REL_FILE_REF_SIZE {
            return Err(Error::DataCorruption {
                details: format!("relation ref truncated: {} bytes", data.len()),
            });
        }

        let id = RelFileId {
            tablespace: u32::from_le_bytes(data[0..4].try_into()?),
            database: u32::from_le_bytes(data[4..8].try_into()?),
            relnumber: u32::from_le_bytes(data[8..12].try_into()?),
        };
        let is_temp = match data[12] {
            0 => false,
            1 => true,
            v => {
                return Err(Error::DataCorruption {
                    details: format!("invalid temp flag byte: {}", v),
                })
            }
        };
        let kind = StorageKind::from_u8(data[13])?;

        Ok(Self { id, is_temp, kind })
    }
}

impl fmt::Display for RelFileRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_temp {
            write!(f, "{} (temp)", self.id)
        } else {
            write!(f, "{}", self.id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rel_file_ref_encoding() {
        let rel = RelFileRef::new(RelFileId::new(1663, 16384, 24576), false, StorageKind::Standard);

        let mut buf = Vec::new();
        rel.encode_into(&mut buf);
        assert_eq!(buf.len(), REL_FILE_REF_SIZE);

        let decoded = RelFileRef::decode(&buf).unwrap();
        assert_eq!(decoded, rel);
    }

    #[test]
    fn test_temp_and_kind_survive_encoding() {
        let rel = RelFileRef::new(RelFileId::new(1, 2, 3), true, StorageKind::AppendOnly);

        let mut buf = Vec::new();
        rel.encode_into(&mut buf);

        let decoded = RelFileRef::decode(&buf).unwrap();
        assert!(decoded.is_temp);
        assert_eq!(decoded.kind, StorageKind::AppendOnly);
    }

    #[test]
    fn test_decode_rejects_truncated_input() {
        let rel = RelFileRef::new(RelFileId::new(1, 2, 3), false, StorageKind::Standard);
        let mut buf = Vec::new();
        rel.encode_into(&mut buf);

        assert!(RelFileRef::decode(&buf[..buf.len() - 1]).is_err());
    }

    #[test]
    fn test_decode_rejects_bad_kind() {
        let rel = RelFileRef::new(RelFileId::new(1, 2, 3), false, StorageKind::Standard);
        let mut buf = Vec::new();
        rel.encode_into(&mut buf);
        buf[13] = 9;

        assert!(RelFileRef::decode(&buf).is_err());
    }

    #[test]
    fn test_fork_suffixes_are_distinct() {
        let mut suffixes: Vec<&str> = ForkNumber::ALL.iter().map(|f| f.suffix()).collect();
        suffixes.sort();
        suffixes.dedup();
        assert_eq!(suffixes.len(), 4);
    }
}
