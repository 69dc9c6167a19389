//! nusb-based USB transport implementation.
//!
//! Key nusb 0.2 API patterns:
//! - `list_devices().wait()` for device enumeration
//! - `device_info.open().wait()` to open device
//! - `device.claim_interface(n).wait()` to claim interface; dropping the
//!   `Interface` releases it
//! - `interface.endpoint::<Interrupt, Out>(addr)` to get endpoint
//! - endpoint `.submit(buf)` / `.wait_next_complete(timeout)` for I/O

use std::time::Duration;

use nusb::transfer::{Buffer, In, Interrupt, Out, TransferError};
use nusb::{Device, DeviceInfo, Interface, MaybeFuture, list_devices};
use tracing::{debug, info, instrument, warn};

use super::traits::{DeviceDescriptor, DeviceHandle, TransportError, UsbBus};
use crate::protocol::constants::ENDPOINT_DIR_IN;

/// The host USB stack, via nusb.
#[derive(Debug, Clone, Default)]
pub struct NusbBus {
    /// Detach a bound kernel driver (usually usbhid) before claiming.
    pub detach_kernel_driver: bool,
}

impl NusbBus {
    pub fn new(detach_kernel_driver: bool) -> Self {
        Self {
            detach_kernel_driver,
        }
    }
}

impl UsbBus for NusbBus {
    type Info = DeviceInfo;
    type Handle = NusbHandle;

    fn devices(&self) -> Result<Vec<DeviceDescriptor<DeviceInfo>>, TransportError> {
        let devices = list_devices()
            .wait()
            .map_err(|e| TransportError::EnumerationFailed(e.to_string()))?;

        Ok(devices
            .map(|info| DeviceDescriptor {
                vendor_id: info.vendor_id(),
                product_id: info.product_id(),
                bus_id: info.bus_id().to_string(),
                address: info.device_address(),
                manufacturer: info.manufacturer_string().map(str::to_string),
                product: info.product_string().map(str::to_string),
                info,
            })
            .collect())
    }

    #[instrument(level = "info", skip(self, descriptor), fields(vid = format!("{:04X}", descriptor.vendor_id), pid = format!("{:04X}", descriptor.product_id)))]
    fn open(&self, descriptor: &DeviceDescriptor<DeviceInfo>) -> Result<NusbHandle, TransportError> {
        let device = descriptor
            .info
            .open()
            .wait()
            .map_err(|e| TransportError::OpenFailed(e.to_string()))?;

        info!(bus = %descriptor.bus_id, address = descriptor.address, "Device opened");

        Ok(NusbHandle {
            device,
            claimed: None,
            detach_kernel_driver: self.detach_kernel_driver,
        })
    }
}

/// An open nusb device with at most one claimed interface.
pub struct NusbHandle {
    device: Device,
    claimed: Option<(u8, Interface)>,
    detach_kernel_driver: bool,
}

impl NusbHandle {
    fn interface(&self) -> Result<&Interface, TransportError> {
        match &self.claimed {
            Some((_, interface)) => Ok(interface),
            None => Err(TransportError::NotClaimed { interface: 0 }),
        }
    }
}

fn timed_out(timeout: Duration) -> TransportError {
    TransportError::Timeout {
        timeout_ms: timeout.as_millis() as u64,
    }
}

impl DeviceHandle for NusbHandle {
    #[instrument(skip(self))]
    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        if let Some((held, _)) = &self.claimed {
            return Err(TransportError::ClaimInterfaceFailed {
                interface,
                message: format!("interface {} already claimed on this handle", held),
            });
        }
        let claim = if self.detach_kernel_driver {
            self.device.detach_and_claim_interface(interface).wait()
        } else {
            self.device.claim_interface(interface).wait()
        };
        let claimed = claim.map_err(|e| TransportError::ClaimInterfaceFailed {
            interface,
            message: e.to_string(),
        })?;

        debug!(interface, "Interface claimed");
        self.claimed = Some((interface, claimed));
        Ok(())
    }

    #[instrument(skip(self))]
    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        match self.claimed.take() {
            Some((number, claimed)) if number == interface => {
                drop(claimed);
                debug!(interface, "Interface released");
                Ok(())
            }
            other => {
                self.claimed = other;
                Err(TransportError::NotClaimed { interface })
            }
        }
    }

    #[instrument(skip(self, data), fields(len = data.len()))]
    fn interrupt_write(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        let mut ep = self
            .interface()?
            .endpoint::<Interrupt, Out>(endpoint & !ENDPOINT_DIR_IN)
            .map_err(|e| TransportError::WriteFailed(e.to_string()))?;

        ep.submit(Buffer::from(data.to_vec()));
        let Some(completion) = ep.wait_next_complete(timeout) else {
            ep.cancel_all();
            warn!(endpoint, "Interrupt write timed out");
            return Err(timed_out(timeout));
        };

        match completion.status {
            Ok(()) => {
                debug!(bytes_written = completion.actual_len, "Write complete");
                Ok(completion.actual_len)
            }
            Err(TransferError::Disconnected) => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::WriteFailed(e.to_string())),
        }
    }

    #[instrument(skip(self))]
    fn interrupt_read(
        &mut self,
        endpoint: u8,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        let mut ep = self
            .interface()?
            .endpoint::<Interrupt, In>(endpoint | ENDPOINT_DIR_IN)
            .map_err(|e| TransportError::ReadFailed(e.to_string()))?;

        let mut buf = Buffer::new(len);
        buf.set_requested_len(len);
        ep.submit(buf);
        let Some(completion) = ep.wait_next_complete(timeout) else {
            ep.cancel_all();
            warn!(endpoint, "Interrupt read timed out");
            return Err(timed_out(timeout));
        };

        match completion.status {
            Ok(()) => {
                let mut data = completion.buffer.to_vec();
                data.truncate(completion.actual_len);
                debug!(bytes_read = data.len(), "Read complete");
                Ok(data)
            }
            Err(TransferError::Disconnected) => Err(TransportError::Disconnected),
            Err(e) => Err(TransportError::ReadFailed(e.to_string())),
        }
    }
}
