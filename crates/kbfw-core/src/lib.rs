//! kbfw-core: memory extraction for keyboards speaking the 64-byte
//! read-request protocol over HID interrupt endpoints.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, CRC-16/XMODEM, request packets, offset sequencing
//! - **Transport**: USB communication abstraction (nusb, mock)
//! - **Device**: Matching enumerated devices by VID/PID
//! - **Session**: Open/claim/stream state machine with a scoped interface claim
//! - **Events**: Observer pattern for UI decoupling
//! - **Extract**: Configuration and the single `extract` entry point
//!
//! # Example
//!
//! ```no_run
//! use kbfw_core::extract::{ExtractConfig, extract_device};
//!
//! let dump = extract_device(&ExtractConfig::version()).expect("extraction failed");
//! println!("{}", dump.hexdump());
//! ```

pub mod device;
pub mod dump;
pub mod error;
pub mod events;
pub mod extract;
pub mod protocol;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use device::{find_by_vendor, find_device};
pub use dump::DumpBuffer;
pub use error::ExtractionError;
pub use events::{ExtractEvent, ExtractObserver, NullObserver, PacketDirection, TracingObserver};
pub use extract::{ExtractConfig, extract, extract_device, extract_with};
pub use protocol::{PacketError, ReadRequest, checksum, decode_response, encode_request, sequence};
pub use session::{ClaimedInterface, SessionState, TransferSession};
pub use transport::{
    DeviceDescriptor, DeviceHandle, MockBus, MockDevice, NusbBus, TransportError, UsbBus,
};
