//! Protocol constants for the keyboard memory read exchange.

// ============================================================================
// Device Identification
// ============================================================================

/// Cooler Master Technology Inc. Vendor ID
pub const COOLER_MASTER_VENDOR_ID: u16 = 0x2516;

/// Keyboard Product ID in normal (non-bootloader) mode
pub const KEYBOARD_NORMAL_PRODUCT_ID: u16 = 0x002E;

/// Vendor-defined HID interface carrying the command endpoints
pub const KEYBOARD_INTERFACE_ID: u8 = 0x01;

// ============================================================================
// Endpoints
// ============================================================================

/// Interrupt OUT endpoint number (requests, host -> device)
pub const REQUEST_ENDPOINT: u8 = 4;

/// Interrupt IN endpoint number (responses, device -> host)
pub const RESPONSE_ENDPOINT: u8 = 3;

/// Direction bit of an IN endpoint address
pub const ENDPOINT_DIR_IN: u8 = 0x80;

// ============================================================================
// Packet Layout
// ============================================================================

/// Size of every request and response packet.
pub const PACKET_SIZE: usize = 64;

/// Bytes covered by a single read request.
pub const READ_STRIDE: u32 = PACKET_SIZE as u32;

pub const OPCODE_MAJOR_READ: u8 = 0x01;
pub const OPCODE_MINOR_READ: u8 = 0x02;

pub const OPCODE_OFFSET: usize = 0;
pub const CHECKSUM_OFFSET: usize = 2;
pub const START_OFFSET: usize = 4;
pub const END_OFFSET: usize = 8;
/// First byte of zero padding.
pub const HEADER_LEN: usize = 12;

// ============================================================================
// Memory Regions
// ============================================================================

/// Start of the firmware region.
pub const FIRMWARE_BASE: u32 = 0x2C00;
/// Packets needed to read the whole firmware region (70400 bytes).
pub const FIRMWARE_PACKET_COUNT: u32 = 1100;

/// Start of the version-info region.
pub const VERSION_BASE: u32 = 0x2800;
pub const VERSION_PACKET_COUNT: u32 = 10;

// ============================================================================
// Timing
// ============================================================================

/// Default per-transfer timeout.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;
