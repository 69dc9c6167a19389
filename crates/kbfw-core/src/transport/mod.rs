//! Transport layer module.

pub mod mock;
pub mod nusb;
pub mod traits;

pub use mock::{MockBus, MockDevice, MockHandle, MockLog};
pub use nusb::{NusbBus, NusbHandle};
pub use traits::{DeviceDescriptor, DeviceHandle, TransportError, UsbBus};
