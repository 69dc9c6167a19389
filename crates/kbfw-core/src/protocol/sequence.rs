//! Offset sequencing over a memory region in 64-byte windows.

use super::constants::READ_STRIDE;
use super::packet::{PacketError, ReadRequest};

/// Ascending start offsets `base, base + 64, ...` for a fixed packet count.
///
/// Plain value type: cloning it or calling [`sequence`] again with the same
/// arguments restarts from `base`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetSequence {
    base: u32,
    packet_count: u32,
    next: u32,
}

/// Build the offset sequence covering `packet_count` windows from `base`.
pub fn sequence(base: u32, packet_count: u32) -> OffsetSequence {
    OffsetSequence {
        base,
        packet_count,
        next: 0,
    }
}

impl OffsetSequence {
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    /// Total bytes covered by the region.
    pub fn byte_len(&self) -> u64 {
        self.packet_count as u64 * READ_STRIDE as u64
    }

    /// Last byte covered by the final window, `None` for an empty region or
    /// one that runs past the 32-bit address space.
    pub fn last_end(&self) -> Option<u32> {
        if self.packet_count == 0 {
            return None;
        }
        let end = self.base as u64 + self.byte_len() - 1;
        u32::try_from(end).ok()
    }

    /// Check that every window in the region can be encoded.
    pub fn validate(&self) -> Result<(), PacketError> {
        if self.packet_count == 0 {
            return Ok(());
        }
        let last_start = self.base as u64 + (self.packet_count as u64 - 1) * READ_STRIDE as u64;
        match u32::try_from(last_start) {
            Ok(start) => ReadRequest::new(start).map(|_| ()),
            Err(_) => Err(PacketError::OffsetOverflow { start: u32::MAX }),
        }
    }
}

impl Iterator for OffsetSequence {
    type Item = u32;

    fn next(&mut self) -> Option<u32> {
        if self.next >= self.packet_count {
            return None;
        }
        let offset = (self.base as u64 + self.next as u64 * READ_STRIDE as u64) as u32;
        self.next += 1;
        Some(offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.packet_count - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for OffsetSequence {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_terms() {
        let offsets: Vec<u32> = sequence(0x2C00, 4).collect();
        assert_eq!(offsets, vec![0x2C00, 0x2C40, 0x2C80, 0x2CC0]);
    }

    #[test]
    fn test_sequence_properties() {
        let offsets: Vec<u32> = sequence(0x2C00, 1100).collect();
        assert_eq!(offsets.len(), 1100);
        assert_eq!(offsets[0], 0x2C00);
        assert!(offsets.windows(2).all(|w| w[1] - w[0] == 64));
    }

    #[test]
    fn test_empty_sequence() {
        let mut seq = sequence(0x2800, 0);
        assert_eq!(seq.len(), 0);
        assert_eq!(seq.next(), None);
        assert_eq!(seq.last_end(), None);
        assert!(seq.validate().is_ok());
    }

    #[test]
    fn test_restartable() {
        let seq = sequence(0x2800, 10);
        let first: Vec<u32> = seq.clone().collect();
        let second: Vec<u32> = seq.collect();
        assert_eq!(first, second);
        assert_eq!(first, sequence(0x2800, 10).collect::<Vec<_>>());
    }

    #[test]
    fn test_exact_size() {
        let mut seq = sequence(0, 3);
        assert_eq!(seq.len(), 3);
        seq.next();
        assert_eq!(seq.len(), 2);
    }

    #[test]
    fn test_region_bounds() {
        let seq = sequence(0x2C00, 1100);
        assert_eq!(seq.byte_len(), 70400);
        assert_eq!(seq.last_end(), Some(0x2C00 + 70400 - 1));
        assert!(seq.validate().is_ok());

        let top = sequence(u32::MAX - 127, 2);
        assert_eq!(top.last_end(), Some(u32::MAX));
        assert!(top.validate().is_ok());

        let past = sequence(u32::MAX - 127, 3);
        assert_eq!(past.last_end(), None);
        assert!(past.validate().is_err());
    }
}
