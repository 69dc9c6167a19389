//! CRC-16/XMODEM.
//!
//! Polynomial 0x1021, initial value 0, no reflection, no final XOR.

use ::crc::{CRC_16_XMODEM, Crc};

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Compute the CRC-16/XMODEM checksum of `buf`.
pub fn checksum(buf: &[u8]) -> u16 {
    XMODEM.checksum(buf)
}
