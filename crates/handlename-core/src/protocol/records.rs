//! Fixed-size request and response records.
//!
//! # Wire Format
//!
//! All integers are little-endian.
//!
//! ```text
//! request (8 bytes)
//! +----------------+----------------+
//! | process_id u32 | handle u32     |
//! +----------------+----------------+
//!
//! response (12 + 512 bytes)
//! +------------+----------+--------------+---------------------+
//! | status u32 | size u32 | reserved u32 | name buffer [512]   |
//! +------------+----------+--------------+---------------------+
//! ```
//!
//! The name buffer holds the kernel's name record verbatim: a 16-byte
//! counted-string header, the UTF-16LE name, then a 2-byte terminator.
//! Bytes past `size` are zero.

use super::error::{ProtocolError, ProtocolResult};
use super::status::HandleStatus;

/// Size of a request record in bytes.
pub const REQUEST_LEN: usize = 8;

/// Size of the response header (status, size, reserved) in bytes.
pub const RESPONSE_HEADER_LEN: usize = 12;

/// Capacity of the name buffer in bytes.
pub const NAME_BUFFER_LEN: usize = 512;

/// Size of a response record in bytes.
pub const RESPONSE_LEN: usize = RESPONSE_HEADER_LEN + NAME_BUFFER_LEN;

/// Size of the counted-string header that precedes the name characters.
pub const NAME_HEADER_LEN: usize = 16;

/// Smallest name record that carries any payload: the header plus the
/// terminator. Shorter records mean the object has no name.
pub const MIN_NAME_LEN: usize = NAME_HEADER_LEN + 2;

/// A single resolution request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleQuery {
    /// Process that owns the handle.
    pub process_id: u32,
    /// Raw handle value inside that process.
    pub handle_value: u32,
}

impl HandleQuery {
    /// Create a request.
    #[must_use]
    pub const fn new(process_id: u32, handle_value: u32) -> Self {
        Self {
            process_id,
            handle_value,
        }
    }

    /// Encode into a request record.
    #[must_use]
    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut record = [0u8; REQUEST_LEN];
        record[..4].copy_from_slice(&self.process_id.to_le_bytes());
        record[4..].copy_from_slice(&self.handle_value.to_le_bytes());
        record
    }

    /// Decode a request record.
    #[must_use]
    pub fn decode(record: &[u8; REQUEST_LEN]) -> Self {
        Self {
            process_id: read_u32(record, 0),
            handle_value: read_u32(record, 4),
        }
    }
}

/// Result of a resolution, as sent back to the client.
///
/// Only [`HandleStatus::Success`] carries a non-zero size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandleInfo {
    status: HandleStatus,
    name_len: u32,
    name: [u8; NAME_BUFFER_LEN],
}

impl HandleInfo {
    /// A result carrying only a status and no name.
    #[must_use]
    pub const fn failure(status: HandleStatus) -> Self {
        Self {
            status,
            name_len: 0,
            name: [0u8; NAME_BUFFER_LEN],
        }
    }

    /// A successful result holding the first `len` bytes of `buffer`.
    ///
    /// `len` is clamped to the buffer capacity; bytes past it are zeroed.
    #[must_use]
    pub fn resolved(len: usize, buffer: &[u8; NAME_BUFFER_LEN]) -> Self {
        let len = len.min(NAME_BUFFER_LEN);
        let mut name = [0u8; NAME_BUFFER_LEN];
        name[..len].copy_from_slice(&buffer[..len]);
        #[allow(clippy::cast_possible_truncation)] // len <= 512
        let name_len = len as u32;
        Self {
            status: HandleStatus::Success,
            name_len,
            name,
        }
    }

    /// Outcome of the resolution.
    #[must_use]
    pub const fn status(&self) -> HandleStatus {
        self.status
    }

    /// Reported size of the name record in bytes.
    #[must_use]
    pub const fn name_len(&self) -> u32 {
        self.name_len
    }

    /// The raw name record, `name_len` bytes long.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }

    /// Decode the object name from the name record.
    ///
    /// Returns `None` unless the status is [`HandleStatus::Success`].
    /// Invalid UTF-16 is replaced rather than rejected.
    #[must_use]
    pub fn name(&self) -> Option<String> {
        let len = self.name_len as usize;
        if !self.status.is_success() || len < MIN_NAME_LEN {
            return None;
        }
        let units: Vec<u16> = self.name[NAME_HEADER_LEN..len - 2]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        Some(String::from_utf16_lossy(&units))
    }

    /// Encode into a response record.
    #[must_use]
    pub fn encode(&self) -> [u8; RESPONSE_LEN] {
        let mut record = [0u8; RESPONSE_LEN];
        record[..4].copy_from_slice(&self.status.as_u32().to_le_bytes());
        record[4..8].copy_from_slice(&self.name_len.to_le_bytes());
        // bytes 8..12 are reserved and stay zero
        record[RESPONSE_HEADER_LEN..].copy_from_slice(&self.name);
        record
    }

    /// Decode a response record.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownStatus`] for a status outside the
    /// taxonomy and [`ProtocolError::NameTooLong`] when the size exceeds the
    /// buffer.
    pub fn decode(record: &[u8; RESPONSE_LEN]) -> ProtocolResult<Self> {
        let status = HandleStatus::try_from(read_u32(record, 0))?;
        let name_len = read_u32(record, 4);
        if name_len as usize > NAME_BUFFER_LEN {
            return Err(ProtocolError::NameTooLong {
                len: name_len,
                max: NAME_BUFFER_LEN,
            });
        }
        let mut name = [0u8; NAME_BUFFER_LEN];
        name.copy_from_slice(&record[RESPONSE_HEADER_LEN..]);
        Ok(Self {
            status,
            name_len,
            name,
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

/// Build a name record the way the kernel lays it out: a counted-string
/// header followed by the UTF-16LE characters and a terminator.
///
/// The header's pointer field is left zero; clients only read the
/// characters at [`NAME_HEADER_LEN`].
#[must_use]
pub fn encode_name_record(name: &str) -> Vec<u8> {
    let units: Vec<u16> = name.encode_utf16().collect();
    let byte_len = units.len() * 2;
    #[allow(clippy::cast_possible_truncation)] // the kernel caps names at u16 bytes
    let (length, maximum_length) = (byte_len as u16, (byte_len + 2) as u16);
    let mut record = Vec::with_capacity(NAME_HEADER_LEN + byte_len + 2);
    record.extend_from_slice(&length.to_le_bytes());
    record.extend_from_slice(&maximum_length.to_le_bytes());
    record.resize(NAME_HEADER_LEN, 0);
    for unit in units {
        record.extend_from_slice(&unit.to_le_bytes());
    }
    record.extend_from_slice(&[0, 0]);
    record
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn info_for(name: &str) -> HandleInfo {
        let record = encode_name_record(name);
        let mut buffer = [0u8; NAME_BUFFER_LEN];
        buffer[..record.len()].copy_from_slice(&record);
        HandleInfo::resolved(record.len(), &buffer)
    }

    #[test]
    fn test_request_layout_is_little_endian() {
        let record = HandleQuery::new(0x0102_0304, 0x0000_00a8).encode();
        assert_eq!(record, [4, 3, 2, 1, 0xa8, 0, 0, 0]);
    }

    #[test]
    fn test_response_layout() {
        let info = info_for("\\Device\\Serial0");
        let record = info.encode();

        assert_eq!(record.len(), 524);
        assert_eq!(&record[0..4], &[0, 0, 0, 0]); // success
        assert_eq!(
            u32::from_le_bytes([record[4], record[5], record[6], record[7]]),
            info.name_len()
        );
        assert_eq!(&record[8..12], &[0, 0, 0, 0]); // reserved
        assert_eq!(&record[12..12 + info.payload().len()], info.payload());
    }

    #[test]
    fn test_failure_has_no_payload() {
        let info = HandleInfo::failure(HandleStatus::SameProcess);
        assert_eq!(info.name_len(), 0);
        assert!(info.payload().is_empty());
        assert_eq!(info.name(), None);
    }

    #[test]
    fn test_name_decoding() {
        let info = info_for("\\Device\\Serial0");
        assert_eq!(info.name_len() as usize, 16 + 30 + 2);
        assert_eq!(info.name().as_deref(), Some("\\Device\\Serial0"));
    }

    #[test]
    fn test_empty_name_record_is_minimum_length() {
        assert_eq!(encode_name_record("").len(), MIN_NAME_LEN);
        assert_eq!(info_for("").name().as_deref(), Some(""));
    }

    #[test]
    fn test_resolved_zeroes_tail() {
        let buffer = [0xffu8; NAME_BUFFER_LEN];
        let info = HandleInfo::resolved(20, &buffer);
        let record = info.encode();
        assert!(record[RESPONSE_HEADER_LEN + 20..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_decode_rejects_oversized_length() {
        let mut record = HandleInfo::failure(HandleStatus::Success).encode();
        record[4..8].copy_from_slice(&513u32.to_le_bytes());
        assert!(matches!(
            HandleInfo::decode(&record),
            Err(ProtocolError::NameTooLong { len: 513, .. })
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_status() {
        let mut record = HandleInfo::failure(HandleStatus::Success).encode();
        record[0..4].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            HandleInfo::decode(&record),
            Err(ProtocolError::UnknownStatus(99))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// Property: a request survives the wire unchanged.
        #[test]
        fn prop_request_roundtrip(pid in any::<u32>(), handle in any::<u32>()) {
            let query = HandleQuery::new(pid, handle);
            prop_assert_eq!(HandleQuery::decode(&query.encode()), query);
        }

        /// Property: status, size and payload survive the wire unchanged.
        #[test]
        fn prop_response_roundtrip(name in "[a-zA-Z0-9\\\\]{0,200}") {
            let info = info_for(&name);
            let decoded = HandleInfo::decode(&info.encode()).unwrap();
            prop_assert_eq!(decoded.status(), info.status());
            prop_assert_eq!(decoded.name_len(), info.name_len());
            prop_assert_eq!(decoded.payload(), info.payload());
            prop_assert_eq!(decoded.name(), Some(name));
        }
    }
}
