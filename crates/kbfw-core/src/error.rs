//! Errors surfaced by an extraction.

use thiserror::Error;

use crate::protocol::PacketError;
use crate::session::SessionState;
use crate::transport::TransportError;

/// Why an extraction stopped. Every variant is terminal; nothing is retried.
#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Device not found: VID={vendor_id:04X} PID={product_id:04X}")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    #[error("Device enumeration failed: {0}")]
    Enumeration(#[source] TransportError),

    #[error("Failed to open device {vendor_id:04X}:{product_id:04X}: {source}")]
    DeviceOpen {
        vendor_id: u16,
        product_id: u16,
        #[source]
        source: TransportError,
    },

    #[error("Failed to claim interface {interface}: {source}")]
    InterfaceClaim {
        interface: u8,
        #[source]
        source: TransportError,
    },

    #[error("Write of request at 0x{offset:08X} failed: {source}")]
    TransferWrite {
        offset: u32,
        #[source]
        source: TransportError,
    },

    #[error("Read of response for 0x{offset:08X} failed: {source}")]
    TransferRead {
        offset: u32,
        #[source]
        source: TransportError,
    },

    #[error("Region of {packet_count} packets from 0x{base:08X} does not fit in 32-bit offsets")]
    InvalidRegion {
        base: u32,
        packet_count: u32,
        #[source]
        source: PacketError,
    },

    #[error("Operation not allowed in session state {state}")]
    InvalidState { state: SessionState },
}

impl ExtractionError {
    /// The device is simply absent (unplugged, wrong IDs), as opposed to a
    /// transport failure.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExtractionError::DeviceNotFound { .. })
    }
}
