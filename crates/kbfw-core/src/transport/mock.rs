//! Mock USB transport for testing.
//!
//! A `MockBus` holds simulated devices. Each device answers valid read
//! requests with a deterministic memory image and can be scripted to fail
//! at a given request.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::traits::{DeviceDescriptor, DeviceHandle, TransportError, UsbBus};
use crate::protocol::{PACKET_SIZE, REQUEST_ENDPOINT, RESPONSE_ENDPOINT, ReadRequest};

/// Everything a simulated device observed.
#[derive(Debug, Default, Clone)]
pub struct MockLog {
    /// Number of successful opens.
    pub opens: usize,
    /// Number of handles dropped (closed).
    pub closes: usize,
    /// Interfaces claimed, in order.
    pub claims: Vec<u8>,
    /// Interfaces released, in order (including release on close).
    pub releases: Vec<u8>,
    /// Captured writes.
    pub writes: Vec<Vec<u8>>,
    /// Number of reads attempted.
    pub reads: usize,
}

/// A simulated device and its failure script.
///
/// Request numbers are 1-based and count interrupt writes.
#[derive(Debug, Clone)]
pub struct MockDevice {
    vid: u16,
    pid: u16,
    fail_open: bool,
    fail_claim: bool,
    fail_write_on: Option<usize>,
    timeout_write_on: Option<usize>,
    short_write_on: Option<usize>,
    fail_read_on: Option<usize>,
    short_read_on: Option<usize>,
    log: Arc<Mutex<MockLog>>,
}

impl MockDevice {
    pub fn new(vid: u16, pid: u16) -> Self {
        Self {
            vid,
            pid,
            fail_open: false,
            fail_claim: false,
            fail_write_on: None,
            timeout_write_on: None,
            short_write_on: None,
            fail_read_on: None,
            short_read_on: None,
            log: Arc::new(Mutex::new(MockLog::default())),
        }
    }

    /// Simulated memory contents at `address`.
    pub fn memory_byte(address: u32) -> u8 {
        (address as u8) ^ ((address >> 8) as u8)
    }

    /// The response the device produces for a request at `start`.
    pub fn response_for(start: u32) -> Vec<u8> {
        (0..PACKET_SIZE as u32)
            .map(|i| Self::memory_byte(start.wrapping_add(i)))
            .collect()
    }

    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn fail_claim(mut self) -> Self {
        self.fail_claim = true;
        self
    }

    /// Fail the nth write with a transfer error.
    pub fn fail_write_on(mut self, request: usize) -> Self {
        self.fail_write_on = Some(request);
        self
    }

    /// Time out the nth write without accepting it.
    pub fn timeout_write_on(mut self, request: usize) -> Self {
        self.timeout_write_on = Some(request);
        self
    }

    /// Accept only half of the nth write.
    pub fn short_write_on(mut self, request: usize) -> Self {
        self.short_write_on = Some(request);
        self
    }

    /// Time out the read following the nth write.
    pub fn fail_read_on(mut self, request: usize) -> Self {
        self.fail_read_on = Some(request);
        self
    }

    /// Return a truncated response to the nth request.
    pub fn short_read_on(mut self, request: usize) -> Self {
        self.short_read_on = Some(request);
        self
    }

    /// Snapshot of what the device observed so far.
    pub fn log(&self) -> MockLog {
        self.log.lock().unwrap().clone()
    }
}

/// Simulated USB bus.
#[derive(Debug, Default, Clone)]
pub struct MockBus {
    devices: Vec<MockDevice>,
}

impl MockBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, device: MockDevice) -> Self {
        self.devices.push(device);
        self
    }

    /// Total opens across every device on the bus.
    pub fn total_opens(&self) -> usize {
        self.devices.iter().map(|d| d.log().opens).sum()
    }
}

impl UsbBus for MockBus {
    type Info = usize;
    type Handle = MockHandle;

    fn devices(&self) -> Result<Vec<DeviceDescriptor<usize>>, TransportError> {
        Ok(self
            .devices
            .iter()
            .enumerate()
            .map(|(index, device)| DeviceDescriptor {
                vendor_id: device.vid,
                product_id: device.pid,
                bus_id: "mock".to_string(),
                address: index as u8 + 1,
                manufacturer: None,
                product: None,
                info: index,
            })
            .collect())
    }

    fn open(&self, descriptor: &DeviceDescriptor<usize>) -> Result<MockHandle, TransportError> {
        let device = self
            .devices
            .get(descriptor.info)
            .ok_or_else(|| TransportError::OpenFailed("no such device".into()))?;
        if device.fail_open {
            return Err(TransportError::OpenFailed("Access denied".into()));
        }
        device.log.lock().unwrap().opens += 1;
        Ok(MockHandle {
            device: device.clone(),
            claimed: None,
            pending: VecDeque::new(),
            requests: 0,
        })
    }
}

/// Open connection to a [`MockDevice`].
pub struct MockHandle {
    device: MockDevice,
    claimed: Option<u8>,
    pending: VecDeque<Vec<u8>>,
    requests: usize,
}

impl MockHandle {
    fn check_claimed(&self) -> Result<(), TransportError> {
        match self.claimed {
            Some(_) => Ok(()),
            None => Err(TransportError::NotClaimed { interface: 0 }),
        }
    }
}

impl DeviceHandle for MockHandle {
    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        if self.device.fail_claim || self.claimed.is_some() {
            return Err(TransportError::ClaimInterfaceFailed {
                interface,
                message: "Resource busy".into(),
            });
        }
        self.claimed = Some(interface);
        self.device.log.lock().unwrap().claims.push(interface);
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        if self.claimed != Some(interface) {
            return Err(TransportError::NotClaimed { interface });
        }
        self.claimed = None;
        self.device.log.lock().unwrap().releases.push(interface);
        Ok(())
    }

    fn interrupt_write(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError> {
        self.check_claimed()?;
        if endpoint != REQUEST_ENDPOINT {
            return Err(TransportError::WriteFailed(format!(
                "no OUT endpoint {endpoint}"
            )));
        }

        self.requests += 1;
        if self.device.fail_write_on == Some(self.requests) {
            return Err(TransportError::WriteFailed("Pipe error".into()));
        }
        if self.device.timeout_write_on == Some(self.requests) {
            return Err(TransportError::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        self.device.log.lock().unwrap().writes.push(data.to_vec());
        if self.device.short_write_on == Some(self.requests) {
            return Ok(data.len() / 2);
        }

        // The device ignores anything it cannot parse.
        if let Ok(request) = ReadRequest::from_bytes(data) {
            let mut response = MockDevice::response_for(request.start_offset());
            if self.device.short_read_on == Some(self.requests) {
                response.truncate(PACKET_SIZE / 2);
            }
            if self.device.fail_read_on != Some(self.requests) {
                self.pending.push_back(response);
            }
        }
        Ok(data.len())
    }

    fn interrupt_read(
        &mut self,
        endpoint: u8,
        len: usize,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.check_claimed()?;
        if endpoint != RESPONSE_ENDPOINT {
            return Err(TransportError::ReadFailed(format!(
                "no IN endpoint {endpoint}"
            )));
        }
        self.device.log.lock().unwrap().reads += 1;
        let mut data = self.pending.pop_front().ok_or(TransportError::Timeout {
            timeout_ms: timeout.as_millis() as u64,
        })?;
        data.truncate(len);
        Ok(data)
    }
}

impl Drop for MockHandle {
    fn drop(&mut self) {
        let mut log = self.device.log.lock().unwrap();
        if let Some(interface) = self.claimed.take() {
            log.releases.push(interface);
        }
        log.closes += 1;
    }
}
