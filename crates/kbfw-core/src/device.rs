//! Device matching over an enumerated device list.

use tracing::debug;

use crate::transport::DeviceDescriptor;

/// First device whose VID/PID pair matches exactly, in enumeration order.
pub fn find_device<I>(
    devices: impl IntoIterator<Item = DeviceDescriptor<I>>,
    vendor_id: u16,
    product_id: u16,
) -> Option<DeviceDescriptor<I>> {
    let found = devices
        .into_iter()
        .find(|d| d.vendor_id == vendor_id && d.product_id == product_id);
    if found.is_none() {
        debug!(
            vid = %format!("{:04X}", vendor_id),
            pid = %format!("{:04X}", product_id),
            "No matching device"
        );
    }
    found
}

/// Every device from one vendor, useful to discover a product ID.
pub fn find_by_vendor<I>(
    devices: impl IntoIterator<Item = DeviceDescriptor<I>>,
    vendor_id: u16,
) -> Vec<DeviceDescriptor<I>> {
    devices
        .into_iter()
        .filter(|d| d.vendor_id == vendor_id)
        .collect()
}
