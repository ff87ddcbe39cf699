//! Common types for transport layer

use serde::Serialize;

/// Device identification information
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransportDeviceInfo {
    /// USB Vendor ID
    pub vid: u16,
    /// USB Product ID
    pub pid: u16,
    /// Platform device path (hidraw node on Linux)
    pub device_path: String,
    /// Serial number if available
    pub serial: Option<String>,
    /// Product name if available
    pub product_name: Option<String>,
    /// Manufacturer name if available
    pub manufacturer: Option<String>,
    /// Whether the serial number carries the Vial marker
    pub is_vial: bool,
}

impl TransportDeviceInfo {
    /// Human readable name, falling back to VID:PID
    pub fn display_name(&self) -> String {
        match (&self.manufacturer, &self.product_name) {
            (Some(m), Some(p)) if !p.starts_with(m.as_str()) => format!("{m} {p}"),
            (_, Some(p)) => p.clone(),
            _ => format!("{:04X}:{:04X}", self.vid, self.pid),
        }
    }
}

/// Discovered device that can be opened
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    /// Device information
    pub info: TransportDeviceInfo,
}

/// Narrows discovery to a specific keyboard when several are attached
#[derive(Debug, Clone, Default)]
pub struct DeviceFilter {
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub path: Option<String>,
    pub serial: Option<String>,
}

impl DeviceFilter {
    /// Check whether a device passes every configured constraint
    pub fn matches(&self, info: &TransportDeviceInfo) -> bool {
        self.vid.map_or(true, |v| v == info.vid)
            && self.pid.map_or(true, |p| p == info.pid)
            && self.path.as_deref().map_or(true, |p| p == info.device_path)
            && self
                .serial
                .as_deref()
                .map_or(true, |s| info.serial.as_deref() == Some(s))
    }

    pub fn is_empty(&self) -> bool {
        self.vid.is_none() && self.pid.is_none() && self.path.is_none() && self.serial.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> TransportDeviceInfo {
        TransportDeviceInfo {
            vid: 0x4653,
            pid: 0x0001,
            device_path: "/dev/hidraw3".into(),
            serial: Some("vial:f64c2b3c".into()),
            product_name: Some("Corne".into()),
            manufacturer: Some("foostan".into()),
            is_vial: true,
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = DeviceFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&info()));
    }

    #[test]
    fn test_filter_by_vid_pid() {
        let filter = DeviceFilter {
            vid: Some(0x4653),
            pid: Some(0x0002),
            ..Default::default()
        };
        assert!(!filter.matches(&info()));

        let filter = DeviceFilter {
            vid: Some(0x4653),
            path: Some("/dev/hidraw3".into()),
            ..Default::default()
        };
        assert!(filter.matches(&info()));
    }

    #[test]
    fn test_display_name() {
        assert_eq!(info().display_name(), "foostan Corne");
        let bare = TransportDeviceInfo {
            vid: 0xFEED,
            pid: 0x1234,
            ..Default::default()
        };
        assert_eq!(bare.display_name(), "FEED:1234");
    }
}
