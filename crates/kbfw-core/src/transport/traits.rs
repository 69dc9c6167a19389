//! USB Transport layer abstraction.
//!
//! Defines the `UsbBus` and `DeviceHandle` traits for USB communication,
//! allowing different implementations (nusb, mock, etc.).

use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Device enumeration failed: {0}")]
    EnumerationFailed(String),

    #[error("Failed to open device: {0}")]
    OpenFailed(String),

    #[error("Failed to claim interface {interface}: {message}")]
    ClaimInterfaceFailed { interface: u8, message: String },

    #[error("Interface {interface} is not claimed")]
    NotClaimed { interface: u8 },

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Short write: {actual} of {expected} bytes accepted")]
    ShortWrite { expected: usize, actual: usize },

    #[error("Short read: {actual} of {expected} bytes received")]
    ShortRead { expected: usize, actual: usize },

    #[error("Device disconnected")]
    Disconnected,

    #[error("Timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// An enumerated USB device.
///
/// `info` is the backend's own handle to the device and is only ever passed
/// back to the [`UsbBus`] that produced it.
#[derive(Clone)]
pub struct DeviceDescriptor<I> {
    pub vendor_id: u16,
    pub product_id: u16,
    pub bus_id: String,
    pub address: u8,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub info: I,
}

impl<I> fmt::Debug for DeviceDescriptor<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceDescriptor")
            .field("vendor_id", &format_args!("{:04X}", self.vendor_id))
            .field("product_id", &format_args!("{:04X}", self.product_id))
            .field("bus_id", &self.bus_id)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl<I> fmt::Display for DeviceDescriptor<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Bus {} Device {:03}: ID {:04x}:{:04x}",
            self.bus_id, self.address, self.vendor_id, self.product_id
        )?;
        if let Some(manufacturer) = &self.manufacturer {
            write!(f, " {}", manufacturer)?;
        }
        if let Some(product) = &self.product {
            write!(f, " {}", product)?;
        }
        Ok(())
    }
}

/// Enumeration and open half of a USB stack.
pub trait UsbBus {
    /// Backend handle carried inside each descriptor.
    type Info;
    /// Open device connection.
    type Handle: DeviceHandle;

    /// List the devices currently attached, in bus enumeration order.
    fn devices(&self) -> Result<Vec<DeviceDescriptor<Self::Info>>, TransportError>;

    /// Open a connection to an enumerated device.
    fn open(
        &self,
        descriptor: &DeviceDescriptor<Self::Info>,
    ) -> Result<Self::Handle, TransportError>;
}

/// Open device connection.
///
/// Endpoint arguments are endpoint numbers without the direction bit.
/// Dropping the handle closes the connection and releases any claims.
pub trait DeviceHandle {
    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    /// Write `data` to an interrupt OUT endpoint, returning bytes accepted.
    fn interrupt_write(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Read up to `len` bytes from an interrupt IN endpoint.
    fn interrupt_read(
        &mut self,
        endpoint: u8,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;
}
