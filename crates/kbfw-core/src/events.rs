//! Event system for UI decoupling.
//!
//! Allows the CLI (or any other front end) to follow an extraction without
//! tight coupling to the core logic.

use std::fmt;

use crate::session::SessionState;

/// Events emitted during an extraction.
#[derive(Debug, Clone)]
pub enum ExtractEvent {
    /// Target device matched on the bus.
    DeviceFound {
        vid: u16,
        pid: u16,
        bus_id: String,
        address: u8,
    },
    /// Session moved between states.
    PhaseChanged { from: SessionState, to: SessionState },
    /// Progress update, in packets.
    Progress { current: u64, total: u64 },
    /// USB packet sent/received.
    Packet {
        direction: PacketDirection,
        offset: u32,
        length: usize,
    },
    /// Extraction failed.
    Error { message: String },
    /// Region fully read.
    Complete { bytes: usize },
}

/// USB packet direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDirection {
    Tx, // Transmit (Host -> Device)
    Rx, // Receive (Device -> Host)
}

impl fmt::Display for PacketDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PacketDirection::Tx => write!(f, "TX"),
            PacketDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Observer trait for receiving extraction events.
pub trait ExtractObserver {
    fn on_event(&self, event: &ExtractEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl ExtractObserver for NullObserver {
    fn on_event(&self, _event: &ExtractEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl ExtractObserver for TracingObserver {
    fn on_event(&self, event: &ExtractEvent) {
        match event {
            ExtractEvent::DeviceFound {
                vid,
                pid,
                bus_id,
                address,
            } => {
                tracing::info!(
                    vid = %format!("{:04X}", vid),
                    pid = %format!("{:04X}", pid),
                    bus = %bus_id,
                    address = address,
                    "Device found"
                );
            }
            ExtractEvent::PhaseChanged { from, to } => {
                tracing::debug!(from = %from, to = %to, "Session state changed");
            }
            ExtractEvent::Progress { current, total } => {
                let pct = if *total > 0 {
                    (*current * 100) / *total
                } else {
                    0
                };
                tracing::debug!(progress = %format!("{}%", pct), current, total, "Progress");
            }
            ExtractEvent::Packet {
                direction,
                offset,
                length,
            } => {
                tracing::trace!(
                    dir = %direction,
                    offset = %format!("0x{:08X}", offset),
                    len = length,
                    "USB Packet"
                );
            }
            ExtractEvent::Error { message } => {
                tracing::error!("Extraction failed: {}", message);
            }
            ExtractEvent::Complete { bytes } => {
                tracing::info!(bytes, "Extraction complete");
            }
        }
    }
}

/// Observer that keeps every event, for tests and post-mortems.
#[derive(Default)]
pub struct RecordingObserver {
    events: std::sync::Mutex<Vec<ExtractEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ExtractEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ExtractObserver for RecordingObserver {
    fn on_event(&self, event: &ExtractEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
