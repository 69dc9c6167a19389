//! Transfer session - drives one device through a read of a memory region.
//!
//! Lifecycle: `Unopened -> Opened -> InterfaceClaimed -> Streaming -> Closed`,
//! with `Failed` reachable from any non-terminal state. The interface claim
//! is held by a [`ClaimedInterface`] guard and released when the guard drops,
//! whichever way the stream ends.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::dump::DumpBuffer;
use crate::error::ExtractionError;
use crate::events::{ExtractEvent, ExtractObserver, PacketDirection};
use crate::protocol::{OffsetSequence, PACKET_SIZE, decode_response, encode_request};
use crate::transport::{DeviceDescriptor, DeviceHandle, TransportError, UsbBus};

/// State of a [`TransferSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Unopened,
    Opened,
    InterfaceClaimed,
    Streaming,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Failed)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unopened => write!(f, "UNOPENED"),
            SessionState::Opened => write!(f, "OPENED"),
            SessionState::InterfaceClaimed => write!(f, "INTERFACE_CLAIMED"),
            SessionState::Streaming => write!(f, "STREAMING"),
            SessionState::Closed => write!(f, "CLOSED"),
            SessionState::Failed => write!(f, "FAILED"),
        }
    }
}

/// An open device connection.
pub struct TransferSession<'o, H: DeviceHandle> {
    handle: Option<H>,
    claimed: Option<u8>,
    state: SessionState,
    observer: &'o dyn ExtractObserver,
}

impl<'o, H: DeviceHandle> TransferSession<'o, H> {
    /// Open a connection to `descriptor`.
    #[instrument(level = "debug", skip_all, fields(vid = format!("{:04X}", descriptor.vendor_id), pid = format!("{:04X}", descriptor.product_id)))]
    pub fn open<B>(
        bus: &B,
        descriptor: &DeviceDescriptor<B::Info>,
        observer: &'o dyn ExtractObserver,
    ) -> Result<Self, ExtractionError>
    where
        B: UsbBus<Handle = H>,
    {
        match bus.open(descriptor) {
            Ok(handle) => {
                let mut session = Self {
                    handle: Some(handle),
                    claimed: None,
                    state: SessionState::Unopened,
                    observer,
                };
                session.transition(SessionState::Opened);
                Ok(session)
            }
            Err(source) => {
                let err = ExtractionError::DeviceOpen {
                    vendor_id: descriptor.vendor_id,
                    product_id: descriptor.product_id,
                    source,
                };
                observer.on_event(&ExtractEvent::PhaseChanged {
                    from: SessionState::Unopened,
                    to: SessionState::Failed,
                });
                observer.on_event(&ExtractEvent::Error {
                    message: err.to_string(),
                });
                Err(err)
            }
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Claim `interface` for the lifetime of the returned guard.
    #[instrument(level = "debug", skip(self))]
    pub fn claim(&mut self, interface: u8) -> Result<ClaimedInterface<'_, 'o, H>, ExtractionError> {
        if self.state != SessionState::Opened {
            return Err(ExtractionError::InvalidState { state: self.state });
        }
        let handle = self
            .handle
            .as_mut()
            .ok_or(ExtractionError::InvalidState { state: self.state })?;

        if let Err(source) = handle.claim_interface(interface) {
            let err = ExtractionError::InterfaceClaim { interface, source };
            self.fail(&err);
            return Err(err);
        }

        self.claimed = Some(interface);
        self.transition(SessionState::InterfaceClaimed);
        Ok(ClaimedInterface {
            session: self,
            interface,
        })
    }

    /// Release any held claim and close the device. Safe to call repeatedly.
    pub fn close(&mut self) {
        self.release_claim();
        if self.handle.take().is_some() {
            debug!("Device closed");
        }
        if !self.state.is_terminal() {
            self.transition(SessionState::Closed);
        }
    }

    fn release_claim(&mut self) {
        let Some(interface) = self.claimed.take() else {
            return;
        };
        if let Some(handle) = self.handle.as_mut() {
            match handle.release_interface(interface) {
                Ok(()) => debug!(interface, "Interface released"),
                Err(e) => warn!(interface, error = %e, "Failed to release interface"),
            }
        }
        if matches!(
            self.state,
            SessionState::InterfaceClaimed | SessionState::Streaming
        ) {
            self.transition(SessionState::Opened);
        }
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        self.state = to;
        self.observer
            .on_event(&ExtractEvent::PhaseChanged { from, to });
    }

    fn fail(&mut self, err: &ExtractionError) {
        self.transition(SessionState::Failed);
        self.observer.on_event(&ExtractEvent::Error {
            message: err.to_string(),
        });
    }

    /// One request/response exchange.
    fn transfer_one(
        &mut self,
        out_endpoint: u8,
        in_endpoint: u8,
        offset: u32,
        timeout: Duration,
    ) -> Result<[u8; PACKET_SIZE], ExtractionError> {
        let handle = self
            .handle
            .as_mut()
            .ok_or(ExtractionError::InvalidState { state: self.state })?;

        let request = encode_request(offset).map_err(|source| ExtractionError::InvalidRegion {
            base: offset,
            packet_count: 1,
            source,
        })?;

        let written = handle
            .interrupt_write(out_endpoint, &request, timeout)
            .map_err(|source| ExtractionError::TransferWrite { offset, source })?;
        if written != PACKET_SIZE {
            return Err(ExtractionError::TransferWrite {
                offset,
                source: TransportError::ShortWrite {
                    expected: PACKET_SIZE,
                    actual: written,
                },
            });
        }
        self.observer.on_event(&ExtractEvent::Packet {
            direction: PacketDirection::Tx,
            offset,
            length: written,
        });

        let data = handle
            .interrupt_read(in_endpoint, PACKET_SIZE, timeout)
            .map_err(|source| ExtractionError::TransferRead { offset, source })?;
        let payload = decode_response(&data).map_err(|_| ExtractionError::TransferRead {
            offset,
            source: TransportError::ShortRead {
                expected: PACKET_SIZE,
                actual: data.len(),
            },
        })?;
        self.observer.on_event(&ExtractEvent::Packet {
            direction: PacketDirection::Rx,
            offset,
            length: data.len(),
        });

        Ok(payload)
    }
}

impl<H: DeviceHandle> Drop for TransferSession<'_, H> {
    fn drop(&mut self) {
        self.close();
    }
}

/// Guard over a claimed interface. Dropping it releases the claim.
pub struct ClaimedInterface<'s, 'o, H: DeviceHandle> {
    session: &'s mut TransferSession<'o, H>,
    interface: u8,
}

impl<H: DeviceHandle> ClaimedInterface<'_, '_, H> {
    pub fn interface(&self) -> u8 {
        self.interface
    }

    pub fn state(&self) -> SessionState {
        self.session.state
    }

    /// Read every window in `offsets`, in order, one exchange at a time.
    ///
    /// Any failure discards what was read so far and leaves the session
    /// `Failed`.
    #[instrument(level = "info", skip(self, offsets), fields(base = format!("0x{:08X}", offsets.base()), packets = offsets.packet_count()))]
    pub fn stream(
        &mut self,
        out_endpoint: u8,
        in_endpoint: u8,
        offsets: OffsetSequence,
        timeout: Duration,
    ) -> Result<DumpBuffer, ExtractionError> {
        let session = &mut *self.session;
        if session.state != SessionState::InterfaceClaimed {
            return Err(ExtractionError::InvalidState {
                state: session.state,
            });
        }
        if let Err(source) = offsets.validate() {
            let err = ExtractionError::InvalidRegion {
                base: offsets.base(),
                packet_count: offsets.packet_count(),
                source,
            };
            session.fail(&err);
            return Err(err);
        }

        session.transition(SessionState::Streaming);
        let total = offsets.len() as u64;
        let mut dump = DumpBuffer::with_capacity(offsets.base(), offsets.len());

        for (i, offset) in offsets.enumerate() {
            match session.transfer_one(out_endpoint, in_endpoint, offset, timeout) {
                Ok(packet) => dump.push_packet(&packet),
                Err(err) => {
                    warn!(offset = %format!("0x{:08X}", offset), packets_read = i, error = %err, "Stream aborted");
                    session.fail(&err);
                    return Err(err);
                }
            }
            session.observer.on_event(&ExtractEvent::Progress {
                current: i as u64 + 1,
                total,
            });
        }

        session.transition(SessionState::InterfaceClaimed);
        info!(bytes = dump.len(), "Region read");
        Ok(dump)
    }
}

impl<H: DeviceHandle> Drop for ClaimedInterface<'_, '_, H> {
    fn drop(&mut self) {
        self.session.release_claim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NullObserver, RecordingObserver};
    use crate::protocol::{REQUEST_ENDPOINT, RESPONSE_ENDPOINT, sequence};
    use crate::transport::{MockBus, MockDevice};

    const TIMEOUT: Duration = Duration::from_millis(50);

    fn bus_with(device: MockDevice) -> (MockBus, DeviceDescriptor<usize>) {
        let bus = MockBus::new().with_device(device);
        let descriptor = bus.devices().unwrap().remove(0);
        (bus, descriptor)
    }

    #[test]
    fn test_stream_success_releases_claim() {
        let device = MockDevice::new(0x2516, 0x002E);
        let (bus, descriptor) = bus_with(device.clone());

        let mut session = TransferSession::open(&bus, &descriptor, &NullObserver).unwrap();
        assert_eq!(session.state(), SessionState::Opened);
        {
            let mut claimed = session.claim(1).unwrap();
            assert_eq!(claimed.state(), SessionState::InterfaceClaimed);
            let dump = claimed
                .stream(REQUEST_ENDPOINT, RESPONSE_ENDPOINT, sequence(0x2800, 10), TIMEOUT)
                .unwrap();
            assert_eq!(dump.len(), 640);
            assert_eq!(&dump.as_bytes()[64..128], MockDevice::response_for(0x2840).as_slice());
            assert_eq!(device.log().releases, Vec::<u8>::new());
        }
        assert_eq!(device.log().releases, vec![1]);
        assert_eq!(session.state(), SessionState::Opened);

        session.close();
        assert_eq!(session.state(), SessionState::Closed);
        session.close();
        assert_eq!(session.state(), SessionState::Closed);

        let log = device.log();
        assert_eq!(log.closes, 1);
        assert_eq!(log.releases, vec![1]);
    }

    #[test]
    fn test_stream_failure_releases_claim() {
        let device = MockDevice::new(0x2516, 0x002E).fail_read_on(3);
        let (bus, descriptor) = bus_with(device.clone());

        let mut session = TransferSession::open(&bus, &descriptor, &NullObserver).unwrap();
        let result = session
            .claim(1)
            .unwrap()
            .stream(REQUEST_ENDPOINT, RESPONSE_ENDPOINT, sequence(0, 8), TIMEOUT);

        assert!(matches!(
            result,
            Err(ExtractionError::TransferRead {
                offset: 0x80,
                source: TransportError::Timeout { .. }
            })
        ));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(device.log().releases, vec![1]);
        assert_eq!(device.log().writes.len(), 3);

        // Failed is terminal
        session.close();
        assert_eq!(session.state(), SessionState::Failed);
        assert!(session.claim(1).is_err());
    }

    #[test]
    fn test_write_timeout_fails_session() {
        let device = MockDevice::new(0x2516, 0x002E).timeout_write_on(2);
        let (bus, descriptor) = bus_with(device.clone());

        let mut session = TransferSession::open(&bus, &descriptor, &NullObserver).unwrap();
        let result = session
            .claim(1)
            .unwrap()
            .stream(REQUEST_ENDPOINT, RESPONSE_ENDPOINT, sequence(0x2C00, 4), TIMEOUT);

        assert!(matches!(
            result,
            Err(ExtractionError::TransferWrite {
                offset: 0x2C40,
                source: TransportError::Timeout { timeout_ms: 50 }
            })
        ));
        assert_eq!(session.state(), SessionState::Failed);

        let log = device.log();
        assert_eq!(log.writes.len(), 1);
        assert_eq!(log.reads, 1);
        assert_eq!(log.releases, vec![1]);
    }

    #[test]
    fn test_short_write_is_write_error() {
        let (bus, descriptor) = bus_with(MockDevice::new(0x2516, 0x002E).short_write_on(1));
        let mut session = TransferSession::open(&bus, &descriptor, &NullObserver).unwrap();
        let result = session
            .claim(1)
            .unwrap()
            .stream(REQUEST_ENDPOINT, RESPONSE_ENDPOINT, sequence(0, 2), TIMEOUT);
        assert!(matches!(
            result,
            Err(ExtractionError::TransferWrite {
                offset: 0,
                source: TransportError::ShortWrite {
                    expected: 64,
                    actual: 32
                }
            })
        ));
    }

    #[test]
    fn test_short_read_is_read_error() {
        let (bus, descriptor) = bus_with(MockDevice::new(0x2516, 0x002E).short_read_on(2));
        let mut session = TransferSession::open(&bus, &descriptor, &NullObserver).unwrap();
        let result = session
            .claim(1)
            .unwrap()
            .stream(REQUEST_ENDPOINT, RESPONSE_ENDPOINT, sequence(0x100, 4), TIMEOUT);
        assert!(matches!(
            result,
            Err(ExtractionError::TransferRead {
                offset: 0x140,
                source: TransportError::ShortRead {
                    expected: 64,
                    actual: 32
                }
            })
        ));
    }

    #[test]
    fn test_claim_failure() {
        let device = MockDevice::new(0x2516, 0x002E).fail_claim();
        let (bus, descriptor) = bus_with(device.clone());
        let mut session = TransferSession::open(&bus, &descriptor, &NullObserver).unwrap();
        assert!(matches!(
            session.claim(1),
            Err(ExtractionError::InterfaceClaim { interface: 1, .. })
        ));
        assert_eq!(session.state(), SessionState::Failed);
        drop(session);
        assert!(device.log().releases.is_empty());
        assert_eq!(device.log().closes, 1);
    }

    #[test]
    fn test_open_failure() {
        let (bus, descriptor) = bus_with(MockDevice::new(0x2516, 0x002E).fail_open());
        let result = TransferSession::open(&bus, &descriptor, &NullObserver);
        assert!(matches!(result, Err(ExtractionError::DeviceOpen { .. })));
    }

    #[test]
    fn test_invalid_region_rejected_before_transfer() {
        let device = MockDevice::new(0x2516, 0x002E);
        let (bus, descriptor) = bus_with(device.clone());
        let mut session = TransferSession::open(&bus, &descriptor, &NullObserver).unwrap();
        let result = session.claim(1).unwrap().stream(
            REQUEST_ENDPOINT,
            RESPONSE_ENDPOINT,
            sequence(u32::MAX - 63, 2),
            TIMEOUT,
        );
        assert!(matches!(result, Err(ExtractionError::InvalidRegion { .. })));
        assert!(device.log().writes.is_empty());
    }

    #[test]
    fn test_state_events() {
        let (bus, descriptor) = bus_with(MockDevice::new(0x2516, 0x002E));
        let observer = RecordingObserver::new();
        {
            let mut session = TransferSession::open(&bus, &descriptor, &observer).unwrap();
            session
                .claim(1)
                .unwrap()
                .stream(REQUEST_ENDPOINT, RESPONSE_ENDPOINT, sequence(0, 1), TIMEOUT)
                .unwrap();
        }

        let states: Vec<SessionState> = observer
            .events()
            .iter()
            .filter_map(|e| match e {
                ExtractEvent::PhaseChanged { to, .. } => Some(*to),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Opened,
                SessionState::InterfaceClaimed,
                SessionState::Streaming,
                SessionState::InterfaceClaimed,
                SessionState::Opened,
                SessionState::Closed,
            ]
        );
    }
}
