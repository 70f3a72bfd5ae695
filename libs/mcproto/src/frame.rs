//! Request frame construction and response decoding.
//!
//! Every request shares one fixed binary header; all multi-byte fields are
//! little-endian:
//!
//! | Offset | Bytes | Field |
//! |--------|-------|-------|
//! | 0 | 2 | Subheader (`50 00`) |
//! | 2 | 1 | Network number (`00`) |
//! | 3 | 1 | Station number (`FF`) |
//! | 4 | 2 | Destination module I/O (`FF 03`) |
//! | 6 | 1 | Destination module station (`00`) |
//! | 7 | 2 | Request data length (12 read / 14 write) |
//! | 9 | 2 | Monitoring timer (`10 00`) |
//! | 11 | 2 | Command (`01 04` read / `01 14` write) |
//! | 13 | 2 | Subcommand (`00 00`, word units) |
//! | 15 | 3 | Device address, 24-bit |
//! | 18 | 1 | Device code (`A8`, data-register area) |
//! | 19 | 2 | Point count |
//! | 21 | 2 | Data word (write only) |
//!
//! The request data length counts everything after itself, i.e. from the
//! monitoring timer to the end of the frame.
//!
//! Responses open with an 11-byte header whose byte at offset 8 is the
//! completion code (`0x00` = success); the word payload starts at offset 11,
//! two little-endian bytes per point.

use crate::error::{McError, Result};

/// Request subheader bytes.
pub const SUBHEADER: [u8; 2] = [0x50, 0x00];
/// Network number (own network).
pub const NETWORK_NO: u8 = 0x00;
/// Station number (connected station).
pub const STATION_NO: u8 = 0xFF;
/// Destination module I/O number (CPU module).
pub const DEST_MODULE_IO: u16 = 0x03FF;
/// Destination module station number.
pub const DEST_MODULE_STATION: u8 = 0x00;
/// Monitoring timer in 250 ms units.
pub const MONITORING_TIMER: u16 = 0x0010;
/// Batch-read command (words).
pub const CMD_BATCH_READ: u16 = 0x0401;
/// Batch-write command (words).
pub const CMD_BATCH_WRITE: u16 = 0x1401;
/// Subcommand selecting word-unit access.
pub const SUBCMD_WORD_UNITS: u16 = 0x0000;
/// Device code of the data-register area.
pub const DEVICE_CODE: u8 = 0xA8;

/// Request data length field value for a read frame.
const REQUEST_LEN_READ: u16 = 12;
/// Request data length field value for a one-word write frame.
const REQUEST_LEN_WRITE: u16 = 14;

/// Total size of a read request frame.
pub const READ_REQUEST_SIZE: usize = 21;
/// Total size of a one-word write request frame.
pub const WRITE_REQUEST_SIZE: usize = 23;

/// Size of the response header; the completion code lives inside it.
pub const RESPONSE_HEADER_SIZE: usize = 11;
/// Byte offset of the completion code within the response.
pub const COMPLETION_CODE_OFFSET: usize = 8;

/// Maximum points in one batch read; the device rejects larger requests.
pub const MAX_READ_POINTS: u16 = 960;

/// Maximum word address encodable in the 24-bit device address field.
const MAX_DEVICE_ADDRESS: u32 = 0x00FF_FFFF;

fn push_header(frame: &mut Vec<u8>, request_len: u16, command: u16) {
    frame.extend_from_slice(&SUBHEADER);
    frame.push(NETWORK_NO);
    frame.push(STATION_NO);
    frame.extend_from_slice(&DEST_MODULE_IO.to_le_bytes());
    frame.push(DEST_MODULE_STATION);
    frame.extend_from_slice(&request_len.to_le_bytes());
    frame.extend_from_slice(&MONITORING_TIMER.to_le_bytes());
    frame.extend_from_slice(&command.to_le_bytes());
    frame.extend_from_slice(&SUBCMD_WORD_UNITS.to_le_bytes());
}

fn push_device(frame: &mut Vec<u8>, address: u32) {
    let bytes = address.to_le_bytes();
    frame.extend_from_slice(&bytes[..3]);
    frame.push(DEVICE_CODE);
}

fn check_address(address: u32) -> Result<()> {
    if address > MAX_DEVICE_ADDRESS {
        return Err(McError::InvalidRequest(format!(
            "device address {address} exceeds 24-bit range"
        )));
    }
    Ok(())
}

/// Builds a batch-read request for `count` words starting at `start`.
pub fn build_read_request(start: u32, count: u16) -> Result<Vec<u8>> {
    check_address(start)?;
    if count == 0 || count > MAX_READ_POINTS {
        return Err(McError::InvalidRequest(format!(
            "read point count {count} outside 1..={MAX_READ_POINTS}"
        )));
    }

    let mut frame = Vec::with_capacity(READ_REQUEST_SIZE);
    push_header(&mut frame, REQUEST_LEN_READ, CMD_BATCH_READ);
    push_device(&mut frame, start);
    frame.extend_from_slice(&count.to_le_bytes());
    debug_assert_eq!(frame.len(), READ_REQUEST_SIZE);
    Ok(frame)
}

/// Builds a batch-write request for exactly one word.
pub fn build_write_request(address: u32, value: u16) -> Result<Vec<u8>> {
    check_address(address)?;

    let mut frame = Vec::with_capacity(WRITE_REQUEST_SIZE);
    push_header(&mut frame, REQUEST_LEN_WRITE, CMD_BATCH_WRITE);
    push_device(&mut frame, address);
    frame.extend_from_slice(&1u16.to_le_bytes());
    frame.extend_from_slice(&value.to_le_bytes());
    debug_assert_eq!(frame.len(), WRITE_REQUEST_SIZE);
    Ok(frame)
}

/// Expected total length of a read response carrying `count` words.
pub fn read_response_size(count: u16) -> usize {
    RESPONSE_HEADER_SIZE + 2 * usize::from(count)
}

/// Decodes a complete read response into words.
///
/// The completion code is checked before the length so a device-reported
/// error is never misdiagnosed as a truncated frame.
pub fn parse_read_response(raw: &[u8], count: u16) -> Result<Vec<u16>> {
    if raw.len() < RESPONSE_HEADER_SIZE {
        return Err(McError::ShortResponse {
            expected: RESPONSE_HEADER_SIZE,
            actual: raw.len(),
        });
    }

    let code = raw[COMPLETION_CODE_OFFSET];
    if code != 0 {
        return Err(McError::DeviceError { code });
    }

    let expected = read_response_size(count);
    if raw.len() != expected {
        return Err(McError::ShortResponse {
            expected,
            actual: raw.len(),
        });
    }

    let words = raw[RESPONSE_HEADER_SIZE..]
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    Ok(words)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a well-formed response: 11-byte header with the given
    /// completion code, then the payload words.
    fn response(code: u8, words: &[u16]) -> Vec<u8> {
        let mut raw = vec![0u8; RESPONSE_HEADER_SIZE];
        raw[0] = 0xD0; // response subheader, not inspected
        raw[COMPLETION_CODE_OFFSET] = code;
        for w in words {
            raw.extend_from_slice(&w.to_le_bytes());
        }
        raw
    }

    #[test]
    fn read_request_layout() {
        let frame = build_read_request(3115, 2).unwrap();
        assert_eq!(frame.len(), READ_REQUEST_SIZE);
        assert_eq!(&frame[0..2], &[0x50, 0x00]);
        assert_eq!(frame[2], 0x00);
        assert_eq!(frame[3], 0xFF);
        assert_eq!(&frame[4..6], &[0xFF, 0x03]);
        assert_eq!(frame[6], 0x00);
        assert_eq!(&frame[7..9], &[0x0C, 0x00]); // request data length 12
        assert_eq!(&frame[9..11], &[0x10, 0x00]);
        assert_eq!(&frame[11..13], &[0x01, 0x04]); // batch read
        assert_eq!(&frame[13..15], &[0x00, 0x00]);
        // 3115 = 0x000C2B, little-endian over three bytes
        assert_eq!(&frame[15..18], &[0x2B, 0x0C, 0x00]);
        assert_eq!(frame[18], 0xA8);
        assert_eq!(&frame[19..21], &[0x02, 0x00]);
    }

    #[test]
    fn write_request_layout() {
        let frame = build_write_request(100, 0xBEEF).unwrap();
        assert_eq!(frame.len(), WRITE_REQUEST_SIZE);
        assert_eq!(&frame[7..9], &[0x0E, 0x00]); // request data length 14
        assert_eq!(&frame[11..13], &[0x01, 0x14]); // batch write
        assert_eq!(&frame[15..18], &[0x64, 0x00, 0x00]);
        assert_eq!(frame[18], 0xA8);
        assert_eq!(&frame[19..21], &[0x01, 0x00]); // exactly one point
        assert_eq!(&frame[21..23], &[0xEF, 0xBE]); // data, little-endian
    }

    #[test]
    fn write_request_encodes_arbitrary_values_little_endian() {
        for (value, bytes) in [(0u16, [0x00, 0x00]), (1, [0x01, 0x00]), (0x1234, [0x34, 0x12])] {
            let frame = build_write_request(0, value).unwrap();
            assert_eq!(&frame[21..23], &bytes);
        }
    }

    #[test]
    fn read_request_rejects_bad_counts() {
        assert!(build_read_request(0, 0).is_err());
        assert!(build_read_request(0, MAX_READ_POINTS + 1).is_err());
        assert!(build_read_request(0, MAX_READ_POINTS).is_ok());
    }

    #[test]
    fn requests_reject_oversized_addresses() {
        assert!(build_read_request(0x0100_0000, 1).is_err());
        assert!(build_write_request(0x0100_0000, 0).is_err());
        assert!(build_read_request(0x00FF_FFFF, 1).is_ok());
    }

    #[test]
    fn parse_response_success() {
        let raw = response(0x00, &[0x1234, 0x0001, 0xFFFF]);
        let words = parse_read_response(&raw, 3).unwrap();
        assert_eq!(words, vec![0x1234, 0x0001, 0xFFFF]);
    }

    #[test]
    fn parse_response_nonzero_code() {
        let raw = response(0x5B, &[0x1234]);
        match parse_read_response(&raw, 1) {
            Err(McError::DeviceError { code: 0x5B }) => {},
            other => panic!("expected DeviceError, got {other:?}"),
        }
    }

    #[test]
    fn parse_response_short_payload() {
        let raw = response(0x00, &[0x1234]);
        match parse_read_response(&raw, 2) {
            Err(McError::ShortResponse {
                expected: 15,
                actual: 13,
            }) => {},
            other => panic!("expected ShortResponse, got {other:?}"),
        }
    }

    #[test]
    fn parse_response_truncated_header() {
        let raw = vec![0xD0, 0x00, 0x00];
        assert!(matches!(
            parse_read_response(&raw, 1),
            Err(McError::ShortResponse { .. })
        ));
    }

    #[test]
    fn device_error_checked_before_length() {
        // An error response typically carries no payload; the completion
        // code must win over the length mismatch.
        let raw = response(0xC0, &[]);
        assert!(matches!(
            parse_read_response(&raw, 4),
            Err(McError::DeviceError { code: 0xC0 })
        ));
    }
}
