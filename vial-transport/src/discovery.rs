//! Device discovery for VIA/Vial keyboards

use hidapi::HidApi;
use tracing::{debug, info};

use crate::error::TransportError;
use crate::hid::HidTransport;
use crate::protocol::{device, timing};
use crate::types::{DeviceFilter, DiscoveredDevice, TransportDeviceInfo};

/// HID device discovery for raw HID keyboards
pub struct HidDiscovery {
    filter: DeviceFilter,
    timeout_ms: i32,
}

impl Default for HidDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl HidDiscovery {
    /// Create a discovery instance that accepts any raw HID keyboard
    pub fn new() -> Self {
        Self {
            filter: DeviceFilter::default(),
            timeout_ms: timing::DEFAULT_TIMEOUT_MS,
        }
    }

    /// Restrict discovery to devices matching `filter`
    pub fn with_filter(mut self, filter: DeviceFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Read timeout for transports opened by this instance
    pub fn with_timeout(mut self, timeout_ms: i32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Check if this is the VIA raw HID interface (usage 0x61, page 0xFF60)
    fn is_raw_hid_interface(device_info: &hidapi::DeviceInfo) -> bool {
        device_info.usage_page() == device::USAGE_PAGE && device_info.usage() == device::USAGE
    }

    fn describe(device_info: &hidapi::DeviceInfo) -> TransportDeviceInfo {
        let serial = device_info.serial_number().map(|s| s.to_string());
        let is_vial = serial
            .as_deref()
            .is_some_and(|s| s.contains(device::VIAL_SERIAL_MAGIC));
        TransportDeviceInfo {
            vid: device_info.vendor_id(),
            pid: device_info.product_id(),
            device_path: device_info.path().to_string_lossy().to_string(),
            serial,
            product_name: device_info.product_string().map(|s| s.to_string()),
            manufacturer: device_info.manufacturer_string().map(|s| s.to_string()),
            is_vial,
        }
    }

    /// List attached raw HID keyboards. No side effects.
    pub fn list_devices(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        let api = HidApi::new()?;
        let mut devices: Vec<DiscoveredDevice> = Vec::new();

        for device_info in api.device_list() {
            if !Self::is_raw_hid_interface(device_info) {
                continue;
            }
            let info = Self::describe(device_info);
            if !self.filter.matches(&info) {
                continue;
            }
            // Some backends report the same interface once per top-level collection
            if devices
                .iter()
                .any(|d| d.info.device_path == info.device_path)
            {
                continue;
            }

            debug!(
                "Found device: VID={:04X} PID={:04X} vial={} path={}",
                info.vid, info.pid, info.is_vial, info.device_path
            );
            devices.push(DiscoveredDevice { info });
        }

        Ok(devices)
    }

    /// Open a specific device
    pub fn open_device(&self, device: &DiscoveredDevice) -> Result<HidTransport, TransportError> {
        let api = HidApi::new()?;
        let path = std::ffi::CString::new(device.info.device_path.clone())
            .map_err(|e| TransportError::HidError(e.to_string()))?;
        info!(
            "Opening {} ({:04X}:{:04X})",
            device.info.display_name(),
            device.info.vid,
            device.info.pid
        );
        HidTransport::open(
            || api.open_path(&path),
            device.info.clone(),
            self.timeout_ms,
        )
    }

    /// Open the first discovered device.
    ///
    /// Zero matching devices is reported as [`TransportError::DeviceNotFound`],
    /// distinct from a failure to open a device that does exist.
    pub fn open_first(&self) -> Result<HidTransport, TransportError> {
        let devices = self.list_devices()?;
        let first = devices.first().ok_or_else(|| {
            let scope = if self.filter.is_empty() {
                "no VIA/Vial keyboard attached".to_string()
            } else {
                "no keyboard matches the device filter".to_string()
            };
            TransportError::DeviceNotFound(scope)
        })?;
        if devices.len() > 1 {
            debug!(
                "{} devices found, using {}",
                devices.len(),
                first.info.device_path
            );
        }
        self.open_device(first)
    }
}
