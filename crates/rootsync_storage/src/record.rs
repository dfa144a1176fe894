//! Log record framing for [`crate::FileStore`].
//!
//! ```text
//! +-------+------+---------+-----------+------------+-----+-------+-------+
//! | magic | kind | key_len | value_len | header_crc | key | value | crc32 |
//! | "RSLG"|  u8  | u32 LE  |  u32 LE   |   u32 LE   |     |       | u32 LE|
//! +-------+------+---------+-----------+------------+-----+-------+-------+
//! ```
//!
//! The header checksum covers magic, kind and both lengths, so a damaged
//! length is reported as corruption instead of being mistaken for a record
//! that runs past the end of the log. The trailing checksum covers
//! everything before it.

/// Magic bytes opening every record.
pub(crate) const RECORD_MAGIC: [u8; 4] = *b"RSLG";

/// Bytes covered by the header checksum.
const HEADER_BODY: usize = 13;

/// Size of the fixed record header.
pub(crate) const HEADER_SIZE: usize = HEADER_BODY + 4;

/// Size of the trailing checksum.
pub(crate) const CRC_SIZE: usize = 4;

/// A single mutation in the store log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LogRecord {
    /// Key set to value.
    Put {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Key removed.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

/// Why a record could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RecordError {
    /// The buffer ends inside the record.
    Truncated,
    /// The record is complete but invalid.
    Invalid(String),
}

impl LogRecord {
    const PUT: u8 = 1;
    const DELETE: u8 = 2;

    /// Serializes the record including its checksum.
    pub(crate) fn encode(&self) -> Vec<u8> {
        let (kind, key, value): (u8, &[u8], &[u8]) = match self {
            LogRecord::Put { key, value } => (Self::PUT, key, value),
            LogRecord::Delete { key } => (Self::DELETE, key, &[]),
        };

        let mut buf = Vec::with_capacity(HEADER_SIZE + key.len() + value.len() + CRC_SIZE);
        buf.extend_from_slice(&RECORD_MAGIC);
        buf.push(kind);
        buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
        let header_crc = compute_crc32(&buf);
        buf.extend_from_slice(&header_crc.to_le_bytes());
        buf.extend_from_slice(key);
        buf.extend_from_slice(value);
        let crc = compute_crc32(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }

    /// Reads one record from the start of `buf`.
    ///
    /// Returns the record and the number of bytes it occupied.
    /// [`RecordError::Truncated`] is only returned when the bytes present
    /// are a valid prefix of a record, i.e. the record runs to the end of
    /// `buf`.
    pub(crate) fn decode(buf: &[u8]) -> Result<(Self, usize), RecordError> {
        let magic_len = buf.len().min(RECORD_MAGIC.len());
        if buf[..magic_len] != RECORD_MAGIC[..magic_len] {
            return Err(RecordError::Invalid("bad record magic".into()));
        }
        if buf.len() < HEADER_SIZE {
            return Err(RecordError::Truncated);
        }

        let stored_header_crc = read_u32(&buf[HEADER_BODY..HEADER_SIZE]);
        let computed_header_crc = compute_crc32(&buf[..HEADER_BODY]);
        if stored_header_crc != computed_header_crc {
            return Err(RecordError::Invalid(format!(
                "header checksum mismatch: expected {stored_header_crc:#010x}, got {computed_header_crc:#010x}"
            )));
        }

        let kind = buf[4];
        let key_len = read_u32(&buf[5..9]) as usize;
        let value_len = read_u32(&buf[9..13]) as usize;
        let body_end = HEADER_SIZE + key_len + value_len;
        let total = body_end + CRC_SIZE;

        if buf.len() < total {
            return Err(RecordError::Truncated);
        }

        let stored_crc = read_u32(&buf[body_end..total]);
        let computed_crc = compute_crc32(&buf[..body_end]);
        if stored_crc != computed_crc {
            return Err(RecordError::Invalid(format!(
                "checksum mismatch: expected {stored_crc:#010x}, got {computed_crc:#010x}"
            )));
        }

        let key = buf[HEADER_SIZE..HEADER_SIZE + key_len].to_vec();
        let record = match kind {
            Self::PUT => LogRecord::Put {
                key,
                value: buf[HEADER_SIZE + key_len..body_end].to_vec(),
            },
            Self::DELETE => LogRecord::Delete { key },
            other => return Err(RecordError::Invalid(format!("unknown record kind {other}"))),
        };

        Ok((record, total))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

/// CRC32 (IEEE polynomial).
pub(crate) fn compute_crc32(data: &[u8]) -> u32 {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crc32_known_value() {
        assert_eq!(compute_crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn put_and_delete_decode() {
        let put = LogRecord::Put {
            key: b"file/a".to_vec(),
            value: b"body".to_vec(),
        };
        let del = LogRecord::Delete {
            key: b"file/a".to_vec(),
        };

        let mut buf = put.encode();
        let put_len = buf.len();
        buf.extend(del.encode());

        let (first, used) = LogRecord::decode(&buf).unwrap();
        assert_eq!(first, put);
        assert_eq!(used, put_len);
        let (second, _) = LogRecord::decode(&buf[used..]).unwrap();
        assert_eq!(second, del);
    }

    #[test]
    fn truncated_record() {
        let bytes = LogRecord::Delete { key: b"k".to_vec() }.encode();
        assert_eq!(
            LogRecord::decode(&bytes[..bytes.len() - 1]),
            Err(RecordError::Truncated)
        );
    }

    #[test]
    fn truncated_header() {
        let bytes = LogRecord::Delete { key: b"k".to_vec() }.encode();
        for cut in 1..HEADER_SIZE {
            assert_eq!(LogRecord::decode(&bytes[..cut]), Err(RecordError::Truncated));
        }
    }

    #[test]
    fn damaged_length_is_invalid() {
        let mut bytes = LogRecord::Put {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        }
        .encode();
        // High byte of key_len: the record would now claim to run past the end.
        bytes[8] ^= 0x10;
        assert!(matches!(
            LogRecord::decode(&bytes),
            Err(RecordError::Invalid(_))
        ));
    }

    #[test]
    fn bad_magic_is_invalid() {
        let mut bytes = LogRecord::Delete { key: b"k".to_vec() }.encode();
        bytes[0] = b'X';
        assert!(matches!(
            LogRecord::decode(&bytes),
            Err(RecordError::Invalid(_))
        ));
        assert!(matches!(
            LogRecord::decode(&bytes[..2]),
            Err(RecordError::Invalid(_))
        ));
    }

    #[test]
    fn flipped_bit_is_invalid() {
        let mut bytes = LogRecord::Put {
            key: b"k".to_vec(),
            value: b"v".to_vec(),
        }
        .encode();
        bytes[HEADER_SIZE] ^= 0xFF;
        assert!(matches!(
            LogRecord::decode(&bytes),
            Err(RecordError::Invalid(_))
        ));
    }
}
