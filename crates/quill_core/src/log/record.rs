//! Log record types and encoding.
//!
//! ```text
//! PAD1    | 0x01 |
//! PAD2    | 0x02 | n (varint) | n filler bytes |
//! COMMIT  | 0x03 | checksum low (u32 BE) | checksum high (u32 BE) |
//! JUMP    | 0x04 | target offset (varint) |
//! WRITE   | 0x06 | klen (varint) | vlen (varint) | key | value |
//! DELETE  | 0x08 | klen (varint) | key |
//! ```
//!
//! Varints are unsigned LEB128.

use crate::error::{CoreError, CoreResult};
use crate::log::checksum::LogChecksum;

/// Size of an encoded COMMIT record.
pub const COMMIT_RECORD_SIZE: usize = 9;

/// Largest number of bytes a JUMP record plus its alignment padding can add.
pub const MAX_JUMP_OVERHEAD: usize = 17;

/// Bytes written at the end of region 2 when the log wraps: a PAD2 over
/// four filler bytes followed by a JUMP to offset 0.
pub const WRAP_MARKER: [u8; 8] = [
    LogRecordType::Pad2 as u8,
    0x04,
    0,
    0,
    0,
    0,
    LogRecordType::Jump as u8,
    0x00,
];

/// Largest filler run a single PAD2 carries; keeps its length varint to one
/// byte.
const MAX_PAD2_FILL: usize = 127;

/// Type of log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    /// One byte of padding.
    Pad1 = 0x01,
    /// Variable-length padding.
    Pad2 = 0x02,
    /// End of a committed transaction.
    Commit = 0x03,
    /// Continue reading at another offset.
    Jump = 0x04,
    /// Key/value insert.
    Write = 0x06,
    /// Key delete.
    Delete = 0x08,
}

impl LogRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(Self::Pad1),
            0x02 => Some(Self::Pad2),
            0x03 => Some(Self::Commit),
            0x04 => Some(Self::Jump),
            0x06 => Some(Self::Write),
            0x08 => Some(Self::Delete),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// Padding covering `len` bytes in total.
    Pad {
        /// Encoded length of the record.
        len: usize,
    },
    /// Commit with the running checksum.
    Commit {
        /// Checksum of everything up to and including the type byte.
        checksum: LogChecksum,
    },
    /// Jump to `target`.
    Jump {
        /// Offset reading continues at.
        target: u64,
    },
    /// Insert.
    Write {
        /// Key bytes.
        key: Vec<u8>,
        /// Value bytes.
        value: Vec<u8>,
    },
    /// Delete.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
    },
}

impl LogRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Pad { len: 1 } => LogRecordType::Pad1,
            Self::Pad { .. } => LogRecordType::Pad2,
            Self::Commit { .. } => LogRecordType::Commit,
            Self::Jump { .. } => LogRecordType::Jump,
            Self::Write { .. } => LogRecordType::Write,
            Self::Delete { .. } => LogRecordType::Delete,
        }
    }

    /// Decodes one record from the front of `data`.
    ///
    /// Returns the record and the number of bytes it occupied, or `None` if
    /// `data` ends mid-record.
    ///
    /// This is the entry point for readers walking the log outside a write
    /// transaction: recovery tooling and the integration suites use it to
    /// inspect wrap markers, jumps and commits on disk. Follow a
    /// [`LogRecord::Jump`] by continuing at its target; stop at the first
    /// `None` or error.
    pub fn decode(data: &[u8]) -> CoreResult<Option<(Self, usize)>> {
        let Some(&type_byte) = data.first() else {
            return Ok(None);
        };
        let record_type = LogRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::invalid_format(format!("unknown log record type 0x{type_byte:02x}"))
        })?;
        let mut pos = 1;

        let record = match record_type {
            LogRecordType::Pad1 => Self::Pad { len: 1 },
            LogRecordType::Pad2 => {
                let Some(n) = get_varint(data, &mut pos) else {
                    return Ok(None);
                };
                let n = to_len(n)?;
                if data.len() < pos + n {
                    return Ok(None);
                }
                pos += n;
                Self::Pad { len: pos }
            }
            LogRecordType::Commit => {
                if data.len() < COMMIT_RECORD_SIZE {
                    return Ok(None);
                }
                let mut bytes = [0u8; 8];
                bytes.copy_from_slice(&data[1..COMMIT_RECORD_SIZE]);
                pos = COMMIT_RECORD_SIZE;
                Self::Commit {
                    checksum: LogChecksum::from_bytes(bytes),
                }
            }
            LogRecordType::Jump => {
                let Some(target) = get_varint(data, &mut pos) else {
                    return Ok(None);
                };
                Self::Jump { target }
            }
            LogRecordType::Write => {
                let (Some(klen), Some(vlen)) =
                    (get_varint(data, &mut pos), get_varint(data, &mut pos))
                else {
                    return Ok(None);
                };
                let (klen, vlen) = (to_len(klen)?, to_len(vlen)?);
                if data.len() < pos + klen + vlen {
                    return Ok(None);
                }
                let key = data[pos..pos + klen].to_vec();
                let value = data[pos + klen..pos + klen + vlen].to_vec();
                pos += klen + vlen;
                Self::Write { key, value }
            }
            LogRecordType::Delete => {
                let Some(klen) = get_varint(data, &mut pos) else {
                    return Ok(None);
                };
                let klen = to_len(klen)?;
                if data.len() < pos + klen {
                    return Ok(None);
                }
                let key = data[pos..pos + klen].to_vec();
                pos += klen;
                Self::Delete { key }
            }
        };
        Ok(Some((record, pos)))
    }
}

/// Appends a WRITE record.
pub fn encode_write(buf: &mut Vec<u8>, key: &[u8], value: &[u8]) {
    buf.push(LogRecordType::Write.as_byte());
    put_varint(buf, key.len() as u64);
    put_varint(buf, value.len() as u64);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
}

/// Appends a DELETE record.
pub fn encode_delete(buf: &mut Vec<u8>, key: &[u8]) {
    buf.push(LogRecordType::Delete.as_byte());
    put_varint(buf, key.len() as u64);
    buf.extend_from_slice(key);
}

/// Appends a JUMP record.
pub fn encode_jump(buf: &mut Vec<u8>, target: u64) {
    buf.push(LogRecordType::Jump.as_byte());
    put_varint(buf, target);
}

/// Appends exactly `len` bytes of padding records.
pub fn encode_padding(buf: &mut Vec<u8>, mut len: usize) {
    while len > 0 {
        if len == 1 {
            buf.push(LogRecordType::Pad1.as_byte());
            return;
        }
        let fill = (len - 2).min(MAX_PAD2_FILL);
        buf.push(LogRecordType::Pad2.as_byte());
        put_varint(buf, fill as u64);
        buf.resize(buf.len() + fill, 0);
        len -= fill + 2;
    }
}

/// Returns the encoded size of a WRITE record.
#[must_use]
pub fn write_record_size(key: &[u8], value: &[u8]) -> usize {
    1 + varint_len(key.len() as u64) + varint_len(value.len() as u64) + key.len() + value.len()
}

/// Returns the encoded size of a DELETE record.
#[must_use]
pub fn delete_record_size(key: &[u8]) -> usize {
    1 + varint_len(key.len() as u64) + key.len()
}

/// Appends `value` as an unsigned LEB128 varint.
pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

/// Returns the encoded length of `value`.
#[must_use]
pub fn varint_len(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Reads a varint at `*pos`, advancing it. Returns `None` if `data` ends
/// first or the varint overflows 64 bits.
fn get_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        if shift >= 64 {
            return None;
        }
        value |= u64::from(byte & 0x7F) << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
}

fn to_len(n: u64) -> CoreResult<usize> {
    usize::try_from(n).map_err(|_| CoreError::invalid_format("log record length overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn varint_boundaries() {
        for (value, len) in [(0u64, 1usize), (127, 1), (128, 2), (16_383, 2), (16_384, 3)] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            assert_eq!(buf.len(), len);
            assert_eq!(varint_len(value), len);
            let mut pos = 0;
            assert_eq!(get_varint(&buf, &mut pos), Some(value));
            assert_eq!(pos, len);
        }
    }

    #[test]
    fn wrap_marker_decodes_as_pad_then_jump() {
        let (pad, used) = LogRecord::decode(&WRAP_MARKER).unwrap().unwrap();
        assert_eq!(pad, LogRecord::Pad { len: 6 });
        let (jump, rest) = LogRecord::decode(&WRAP_MARKER[used..]).unwrap().unwrap();
        assert_eq!(jump, LogRecord::Jump { target: 0 });
        assert_eq!(used + rest, WRAP_MARKER.len());
    }

    #[test]
    fn write_record_layout() {
        let mut buf = Vec::new();
        encode_write(&mut buf, b"ab", b"xyz");
        assert_eq!(buf, [0x06, 2, 3, b'a', b'b', b'x', b'y', b'z']);
        assert_eq!(buf.len(), write_record_size(b"ab", b"xyz"));
    }

    #[test]
    fn delete_record_layout() {
        let mut buf = Vec::new();
        encode_delete(&mut buf, b"k");
        assert_eq!(buf, [0x08, 1, b'k']);
        assert_eq!(buf.len(), delete_record_size(b"k"));
    }

    #[test]
    fn truncated_record_is_none() {
        let mut buf = Vec::new();
        encode_write(&mut buf, b"key", b"value");
        assert_eq!(LogRecord::decode(&buf[..5]).unwrap(), None);
        assert_eq!(LogRecord::decode(&[]).unwrap(), None);
    }

    #[test]
    fn unknown_type_is_error() {
        assert!(LogRecord::decode(&[0x05]).is_err());
    }

    #[test]
    fn record_type_bytes() {
        assert_eq!(LogRecordType::from_byte(0x03), Some(LogRecordType::Commit));
        assert_eq!(LogRecordType::from_byte(0x00), None);
        assert_eq!(LogRecord::Pad { len: 1 }.record_type(), LogRecordType::Pad1);
        assert_eq!(LogRecord::Pad { len: 9 }.record_type(), LogRecordType::Pad2);
    }

    proptest! {
        #[test]
        fn padding_has_exact_length(len in 0usize..600) {
            let mut buf = Vec::new();
            encode_padding(&mut buf, len);
            prop_assert_eq!(buf.len(), len);

            let mut pos = 0;
            while pos < buf.len() {
                let (record, used) = LogRecord::decode(&buf[pos..]).unwrap().unwrap();
                let is_pad = matches!(record, LogRecord::Pad { .. });
                prop_assert!(is_pad);
                pos += used;
            }
            prop_assert_eq!(pos, len);
        }
    }
}
