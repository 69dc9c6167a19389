//! Dump buffer: the bytes read back from a device region.

use std::path::Path;

use crate::protocol::PACKET_SIZE;

/// Responses concatenated in request order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpBuffer {
    base: u32,
    data: Vec<u8>,
}

impl DumpBuffer {
    pub(crate) fn with_capacity(base: u32, packet_count: usize) -> Self {
        Self {
            base,
            data: Vec::with_capacity(packet_count * PACKET_SIZE),
        }
    }

    pub(crate) fn push_packet(&mut self, packet: &[u8; PACKET_SIZE]) {
        self.data.extend_from_slice(packet);
    }

    /// Device offset of the first byte.
    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn packet_count(&self) -> usize {
        self.data.len() / PACKET_SIZE
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Responses in request order, paired with their start offsets.
    pub fn packets(&self) -> impl Iterator<Item = (u32, &[u8])> + '_ {
        self.data
            .chunks(PACKET_SIZE)
            .enumerate()
            .map(move |(i, chunk)| (self.base.wrapping_add((i * PACKET_SIZE) as u32), chunk))
    }

    /// Write the raw bytes to a file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        std::fs::write(path, &self.data)
    }

    /// Classic 16-bytes-per-line hex view, addressed by device offset.
    pub fn hexdump(&self) -> String {
        let mut out = String::with_capacity(self.data.len() * 4);
        for (i, line) in self.data.chunks(16).enumerate() {
            let addr = self.base.wrapping_add((i * 16) as u32);
            out.push_str(&format!("{:08x}  ", addr));
            for col in 0..16 {
                match line.get(col) {
                    Some(b) => out.push_str(&format!("{:02x} ", b)),
                    None => out.push_str("   "),
                }
                if col == 7 {
                    out.push(' ');
                }
            }
            out.push_str(" |");
            out.extend(line.iter().map(|&b| {
                if b.is_ascii_graphic() || b == b' ' {
                    b as char
                } else {
                    '.'
                }
            }));
            out.push_str("|\n");
        }
        out
    }
}

impl AsRef<[u8]> for DumpBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}
