//! Extraction entry point and its configuration.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::device::find_device;
use crate::dump::DumpBuffer;
use crate::error::ExtractionError;
use crate::events::{ExtractEvent, ExtractObserver, TracingObserver};
use crate::protocol::constants::*;
use crate::protocol::sequence;
use crate::session::TransferSession;
use crate::transport::{NusbBus, UsbBus};

/// What to read, and from which device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Target vendor ID.
    pub vendor_id: u16,
    /// Target product ID.
    pub product_id: u16,
    /// Interface carrying the command endpoints.
    pub interface_id: u8,
    /// Interrupt OUT endpoint number for requests.
    pub out_endpoint: u8,
    /// Interrupt IN endpoint number for responses.
    pub in_endpoint: u8,
    /// First device offset to read.
    pub base_offset: u32,
    /// Number of 64-byte windows to read.
    pub packet_count: u32,
    /// Per-transfer timeout in milliseconds.
    pub timeout_ms: u64,
    /// Detach a bound kernel driver before claiming the interface.
    pub detach_kernel_driver: bool,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self::firmware()
    }
}

impl ExtractConfig {
    /// Full firmware region of the reference keyboard.
    pub fn firmware() -> Self {
        Self {
            vendor_id: COOLER_MASTER_VENDOR_ID,
            product_id: KEYBOARD_NORMAL_PRODUCT_ID,
            interface_id: KEYBOARD_INTERFACE_ID,
            out_endpoint: REQUEST_ENDPOINT,
            in_endpoint: RESPONSE_ENDPOINT,
            base_offset: FIRMWARE_BASE,
            packet_count: FIRMWARE_PACKET_COUNT,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            detach_kernel_driver: true,
        }
    }

    /// Short version-info region of the reference keyboard.
    pub fn version() -> Self {
        Self {
            base_offset: VERSION_BASE,
            packet_count: VERSION_PACKET_COUNT,
            ..Self::firmware()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Bytes the dump will hold once complete.
    pub fn dump_len(&self) -> u64 {
        sequence(self.base_offset, self.packet_count).byte_len()
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ExtractConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// Read the configured region, logging progress through tracing.
pub fn extract<B: UsbBus>(bus: &B, config: &ExtractConfig) -> Result<DumpBuffer, ExtractionError> {
    extract_with(bus, config, &TracingObserver)
}

/// Read the configured region from the host USB stack.
pub fn extract_device(config: &ExtractConfig) -> Result<DumpBuffer, ExtractionError> {
    extract(&NusbBus::new(config.detach_kernel_driver), config)
}

/// Read the configured region, reporting to `observer`.
///
/// Either the whole region comes back or an error does; a failed transfer
/// never yields a partial dump.
#[instrument(skip_all, fields(vid = format!("{:04X}", config.vendor_id), pid = format!("{:04X}", config.product_id)))]
pub fn extract_with<B: UsbBus>(
    bus: &B,
    config: &ExtractConfig,
    observer: &dyn ExtractObserver,
) -> Result<DumpBuffer, ExtractionError> {
    let offsets = sequence(config.base_offset, config.packet_count);
    offsets
        .validate()
        .map_err(|source| ExtractionError::InvalidRegion {
            base: config.base_offset,
            packet_count: config.packet_count,
            source,
        })?;

    let devices = bus.devices().map_err(ExtractionError::Enumeration)?;
    let descriptor = find_device(devices, config.vendor_id, config.product_id).ok_or(
        ExtractionError::DeviceNotFound {
            vendor_id: config.vendor_id,
            product_id: config.product_id,
        },
    )?;
    observer.on_event(&ExtractEvent::DeviceFound {
        vid: descriptor.vendor_id,
        pid: descriptor.product_id,
        bus_id: descriptor.bus_id.clone(),
        address: descriptor.address,
    });

    info!(
        base = %format!("0x{:08X}", config.base_offset),
        packets = config.packet_count,
        interface = config.interface_id,
        "Reading region"
    );

    let mut session = TransferSession::open(bus, &descriptor, observer)?;
    let dump = session.claim(config.interface_id)?.stream(
        config.out_endpoint,
        config.in_endpoint,
        offsets,
        config.timeout(),
    )?;
    session.close();

    observer.on_event(&ExtractEvent::Complete { bytes: dump.len() });
    Ok(dump)
}
