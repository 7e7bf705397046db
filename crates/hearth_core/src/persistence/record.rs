//! Journal records and the checksummed envelope shared with snapshots.

use crate::error::{CoreError, CoreResult};
use crate::state::Mutation;
use crate::types::{SequenceNumber, TransactionId};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Magic bytes identifying a journal record.
pub const JOURNAL_MAGIC: [u8; 4] = *b"HJNL";

/// Current journal format version.
pub const JOURNAL_VERSION: u16 = 1;

/// Header size: magic (4) + version (2) + type (1) + length (4).
pub(crate) const HEADER_SIZE: usize = 11;

/// CRC size.
pub(crate) const CRC_SIZE: usize = 4;

/// Type of journal record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    /// Start of a committed batch.
    Begin = 1,
    /// One mutation of the batch.
    Apply = 2,
    /// End of the batch; the batch counts only once this is read back.
    Commit = 3,
}

impl RecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Apply),
            3 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A journal record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JournalRecord {
    /// Start of a batch.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
    },
    /// One mutation.
    Apply {
        /// Transaction ID.
        txid: TransactionId,
        /// The mutation.
        mutation: Mutation,
    },
    /// End of a batch.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
    },
}

impl JournalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::Begin { .. } => RecordType::Begin,
            Self::Apply { .. } => RecordType::Apply,
            Self::Commit { .. } => RecordType::Commit,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn txid(&self) -> TransactionId {
        match self {
            Self::Begin { txid } | Self::Apply { txid, .. } | Self::Commit { txid, .. } => *txid,
        }
    }

    /// Encodes the record with its envelope.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        let payload = to_cbor(self)?;
        seal(JOURNAL_MAGIC, JOURNAL_VERSION, self.record_type().as_byte(), &payload)
    }

    /// Decodes a record payload, checking it matches the header type.
    pub fn decode(record_type: RecordType, payload: &[u8]) -> CoreResult<Self> {
        let record: Self = from_cbor(payload)
            .map_err(|e| CoreError::journal_corruption(format!("undecodable record: {e}")))?;
        if record.record_type() != record_type {
            return Err(CoreError::journal_corruption(format!(
                "record header says {record_type:?} but payload is {:?}",
                record.record_type()
            )));
        }
        Ok(record)
    }
}

/// Wraps `payload` as `magic | version | type | len | payload | crc32`.
pub(crate) fn seal(magic: [u8; 4], version: u16, kind: u8, payload: &[u8]) -> CoreResult<Vec<u8>> {
    let len = u32::try_from(payload.len())
        .map_err(|_| CoreError::invalid_operation("record payload too large"))?;

    let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
    data.extend_from_slice(&magic);
    data.extend_from_slice(&version.to_le_bytes());
    data.push(kind);
    data.extend_from_slice(&len.to_le_bytes());
    data.extend_from_slice(payload);

    // CRC32 over everything before it
    let crc = compute_crc32(&data);
    data.extend_from_slice(&crc.to_le_bytes());
    Ok(data)
}

/// Result of reading one envelope from a buffer.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Unsealed<'a> {
    /// A complete, checksummed envelope.
    Record {
        /// The type byte.
        kind: u8,
        /// The payload.
        payload: &'a [u8],
        /// Total bytes consumed.
        len: usize,
    },
    /// Not enough bytes for a full envelope.
    Truncated,
}

/// Reads one envelope from the start of `data`.
///
/// A short buffer is reported as [`Unsealed::Truncated`]; bad magic, a
/// future version or a checksum mismatch are errors.
pub(crate) fn unseal(magic: [u8; 4], version: u16, data: &[u8]) -> CoreResult<Unsealed<'_>> {
    if data.len() < HEADER_SIZE {
        return Ok(Unsealed::Truncated);
    }
    if data[0..4] != magic {
        return Err(CoreError::journal_corruption(format!(
            "invalid magic {:?}",
            &data[0..4]
        )));
    }
    let found = u16::from_le_bytes([data[4], data[5]]);
    if found > version {
        return Err(CoreError::journal_corruption(format!(
            "unsupported version {found}"
        )));
    }
    let kind = data[6];
    let payload_len = u32::from_le_bytes([data[7], data[8], data[9], data[10]]) as usize;
    let total = HEADER_SIZE + payload_len + CRC_SIZE;
    if data.len() < total {
        return Ok(Unsealed::Truncated);
    }

    let payload_end = HEADER_SIZE + payload_len;
    let stored = u32::from_le_bytes([
        data[payload_end],
        data[payload_end + 1],
        data[payload_end + 2],
        data[payload_end + 3],
    ]);
    let computed = compute_crc32(&data[..payload_end]);
    if stored != computed {
        return Err(CoreError::ChecksumMismatch {
            expected: stored,
            actual: computed,
        });
    }

    Ok(Unsealed::Record {
        kind,
        payload: &data[HEADER_SIZE..payload_end],
        len: total,
    })
}

pub(crate) fn to_cbor<T: Serialize>(value: &T) -> CoreResult<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| CoreError::encoding(e.to_string()))?;
    Ok(buf)
}

pub(crate) fn from_cbor<T: DeserializeOwned>(bytes: &[u8]) -> CoreResult<T> {
    ciborium::from_reader(bytes).map_err(|e| CoreError::encoding(e.to_string()))
}

/// Computes CRC32 checksum for data.
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, table built at compile time
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
