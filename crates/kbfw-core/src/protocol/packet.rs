//! Read request encoding and response decoding.
//!
//! A request is a fixed 64-byte packet:
//!
//! | Offset | Size | Field                          |
//! |--------|------|--------------------------------|
//! | 0      | 1    | opcode major (`0x01`)          |
//! | 1      | 1    | opcode minor (`0x02`)          |
//! | 2      | 2    | CRC-16/XMODEM, little-endian   |
//! | 4      | 4    | start offset, little-endian    |
//! | 8      | 4    | end offset (`start + 63`), LE  |
//! | 12     | 52   | zero padding                   |
//!
//! The checksum covers the whole packet with its own field zeroed, so the
//! packet is built in two passes.

use byteorder::{ByteOrder, LittleEndian};
use thiserror::Error;

use super::constants::*;
use super::crc::checksum;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PacketError {
    #[error("Start offset 0x{start:08X} leaves no room for a 64-byte window")]
    OffsetOverflow { start: u32 },

    #[error("Short response: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },

    #[error("Packet length mismatch: expected {expected}, got {actual}")]
    BadLength { expected: usize, actual: usize },

    #[error("Unknown opcode {major:02X}:{minor:02X}")]
    UnknownOpcode { major: u8, minor: u8 },

    #[error("Checksum mismatch: field 0x{field:04X}, computed 0x{computed:04X}")]
    ChecksumMismatch { field: u16, computed: u16 },

    #[error("End offset 0x{end:08X} does not match start offset 0x{start:08X}")]
    BadWindow { start: u32, end: u32 },
}

/// A read request for one 64-byte window of device memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    start_offset: u32,
}

impl ReadRequest {
    pub const SIZE: usize = PACKET_SIZE;

    /// Highest start offset whose window still fits in 32 bits.
    pub const MAX_START: u32 = u32::MAX - (READ_STRIDE - 1);

    pub fn new(start_offset: u32) -> Result<Self, PacketError> {
        if start_offset > Self::MAX_START {
            return Err(PacketError::OffsetOverflow {
                start: start_offset,
            });
        }
        Ok(Self { start_offset })
    }

    pub fn start_offset(&self) -> u32 {
        self.start_offset
    }

    /// Last byte covered by this request (inclusive).
    pub fn end_offset(&self) -> u32 {
        // Cannot overflow, `new` bounds the start.
        self.start_offset + (READ_STRIDE - 1)
    }

    /// Encode into the on-wire packet.
    pub fn to_bytes(&self) -> [u8; PACKET_SIZE] {
        // Pass 1: everything but the checksum.
        let mut buf = [0u8; PACKET_SIZE];
        buf[OPCODE_OFFSET] = OPCODE_MAJOR_READ;
        buf[OPCODE_OFFSET + 1] = OPCODE_MINOR_READ;
        LittleEndian::write_u16(&mut buf[CHECKSUM_OFFSET..START_OFFSET], 0);
        LittleEndian::write_u32(&mut buf[START_OFFSET..END_OFFSET], self.start_offset);
        LittleEndian::write_u32(&mut buf[END_OFFSET..HEADER_LEN], self.end_offset());

        // Pass 2: checksum over the zero-checksum packet, written back.
        let crc = checksum(&buf);
        LittleEndian::write_u16(&mut buf[CHECKSUM_OFFSET..START_OFFSET], crc);
        buf
    }

    /// Parse and verify an encoded request.
    pub fn from_bytes(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() != PACKET_SIZE {
            return Err(PacketError::BadLength {
                expected: PACKET_SIZE,
                actual: data.len(),
            });
        }

        let (major, minor) = (data[OPCODE_OFFSET], data[OPCODE_OFFSET + 1]);
        if major != OPCODE_MAJOR_READ || minor != OPCODE_MINOR_READ {
            return Err(PacketError::UnknownOpcode { major, minor });
        }

        let field = LittleEndian::read_u16(&data[CHECKSUM_OFFSET..START_OFFSET]);
        let mut zeroed = [0u8; PACKET_SIZE];
        zeroed.copy_from_slice(data);
        zeroed[CHECKSUM_OFFSET..START_OFFSET].fill(0);
        let computed = checksum(&zeroed);
        if field != computed {
            return Err(PacketError::ChecksumMismatch { field, computed });
        }

        let start = LittleEndian::read_u32(&data[START_OFFSET..END_OFFSET]);
        let end = LittleEndian::read_u32(&data[END_OFFSET..HEADER_LEN]);
        let request = Self::new(start)?;
        if request.end_offset() != end {
            return Err(PacketError::BadWindow { start, end });
        }
        Ok(request)
    }
}

/// Encode the read request packet for `start_offset`.
pub fn encode_request(start_offset: u32) -> Result<[u8; PACKET_SIZE], PacketError> {
    Ok(ReadRequest::new(start_offset)?.to_bytes())
}

/// Decode a response packet.
///
/// The payload is opaque and returned unchanged. Anything shorter than a full
/// packet is rejected; trailing bytes past 64 are not part of the packet.
pub fn decode_response(data: &[u8]) -> Result<[u8; PACKET_SIZE], PacketError> {
    if data.len() < PACKET_SIZE {
        return Err(PacketError::ShortResponse {
            expected: PACKET_SIZE,
            actual: data.len(),
        });
    }
    let mut payload = [0u8; PACKET_SIZE];
    payload.copy_from_slice(&data[..PACKET_SIZE]);
    Ok(payload)
}

/// Read the checksum field embedded in an encoded packet.
pub fn crc_field(packet: &[u8; PACKET_SIZE]) -> u16 {
    LittleEndian::read_u16(&packet[CHECKSUM_OFFSET..START_OFFSET])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zero_crc(mut packet: [u8; PACKET_SIZE]) -> [u8; PACKET_SIZE] {
        packet[CHECKSUM_OFFSET..START_OFFSET].fill(0);
        packet
    }

    #[test]
    fn test_firmware_base_packet() {
        let packet = encode_request(FIRMWARE_BASE).unwrap();
        assert_eq!(
            &packet[..HEADER_LEN],
            &[
                0x01, 0x02, 0xDB, 0x9A, 0x00, 0x2C, 0x00, 0x00, 0x3F, 0x2C, 0x00, 0x00
            ]
        );
        assert!(packet[HEADER_LEN..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_offset_zero_packet() {
        let packet = encode_request(0).unwrap();
        assert_eq!(crc_field(&packet), 0xE7B8);
        assert_eq!(LittleEndian::read_u32(&packet[END_OFFSET..HEADER_LEN]), 63);
    }

    #[test]
    fn test_crc_field_matches_zeroed_checksum() {
        for start in [0u32, 1, 0x40, 0x2800, 0x2C00, 0x0001_2345, ReadRequest::MAX_START] {
            let packet = encode_request(start).unwrap();
            assert_eq!(crc_field(&packet), checksum(&zero_crc(packet)), "start={start:#X}");
        }
    }

    #[test]
    fn test_end_offset() {
        for start in [0u32, 0x2C00, 0xFFFF_0000, ReadRequest::MAX_START] {
            let packet = encode_request(start).unwrap();
            let end = LittleEndian::read_u32(&packet[END_OFFSET..HEADER_LEN]);
            assert_eq!(end, start + 63);
        }
        assert_eq!(ReadRequest::new(ReadRequest::MAX_START).unwrap().end_offset(), u32::MAX);
    }

    #[test]
    fn test_offset_overflow_rejected() {
        assert_eq!(
            encode_request(ReadRequest::MAX_START + 1),
            Err(PacketError::OffsetOverflow {
                start: ReadRequest::MAX_START + 1
            })
        );
        assert!(encode_request(u32::MAX).is_err());
    }

    #[test]
    fn test_parse_request() {
        let packet = encode_request(0x2C40).unwrap();
        let request = ReadRequest::from_bytes(&packet).unwrap();
        assert_eq!(request.start_offset(), 0x2C40);
    }

    #[test]
    fn test_parse_rejects_corruption() {
        let mut packet = encode_request(0x2C40).unwrap();
        packet[20] = 0xFF;
        assert!(matches!(
            ReadRequest::from_bytes(&packet),
            Err(PacketError::ChecksumMismatch { .. })
        ));

        let mut packet = encode_request(0x2C40).unwrap();
        packet[0] = 0x07;
        assert!(matches!(
            ReadRequest::from_bytes(&packet),
            Err(PacketError::UnknownOpcode { major: 0x07, .. })
        ));

        assert!(matches!(
            ReadRequest::from_bytes(&packet[..32]),
            Err(PacketError::BadLength { actual: 32, .. })
        ));
    }

    #[test]
    fn test_decode_response_passthrough() {
        let data: Vec<u8> = (0..64u8).collect();
        assert_eq!(decode_response(&data).unwrap().as_slice(), data.as_slice());
    }

    #[test]
    fn test_decode_short_response() {
        assert_eq!(
            decode_response(&[0u8; 10]),
            Err(PacketError::ShortResponse {
                expected: 64,
                actual: 10
            })
        );
    }
}
