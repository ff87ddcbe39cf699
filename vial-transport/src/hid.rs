//! HID transport implementation for the raw HID interface

use std::sync::atomic::{AtomicBool, Ordering};

use hidapi::HidDevice;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::TransportError;
use crate::protocol::{timing, RESPONSE_SIZE};
use crate::types::TransportDeviceInfo;
use crate::Transport;

/// Set while a [`HidTransport`] owns a device handle
static HANDLE_OPEN: AtomicBool = AtomicBool::new(false);

/// HID transport for a keyboard's raw HID interface
///
/// Writes 33-byte output reports and performs a blocking read for the
/// 32-byte reply. Only one instance may exist per process; the handle is
/// released by [`Transport::close`] or on drop, whichever comes first.
pub struct HidTransport {
    device: Mutex<Option<HidDevice>>,
    info: TransportDeviceInfo,
    timeout_ms: i32,
}

impl HidTransport {
    /// Claim the process-wide handle slot and wrap an opened device
    pub(crate) fn open(
        open: impl FnOnce() -> Result<HidDevice, hidapi::HidError>,
        info: TransportDeviceInfo,
        timeout_ms: i32,
    ) -> Result<Self, TransportError> {
        if HANDLE_OPEN.swap(true, Ordering::SeqCst) {
            return Err(TransportError::AlreadyOpen);
        }
        let device = match open() {
            Ok(device) => device,
            Err(e) => {
                HANDLE_OPEN.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        };
        debug!("Opened {} at {}", info.display_name(), info.device_path);
        Ok(Self {
            device: Mutex::new(Some(device)),
            info,
            timeout_ms,
        })
    }

    /// Read timeout applied to every response
    pub fn timeout_ms(&self) -> i32 {
        self.timeout_ms
    }

    /// Discard input reports left over from an earlier exchange
    fn drain_stale(device: &HidDevice) -> Result<(), TransportError> {
        let mut buf = [0u8; RESPONSE_SIZE];
        for _ in 0..timing::MAX_STALE_REPORTS {
            if device.read_timeout(&mut buf, 0)? == 0 {
                break;
            }
            debug!("Discarded stale report: {:02X?}", &buf[..8]);
        }
        Ok(())
    }
}

impl Transport for HidTransport {
    fn write_report(&self, report: &[u8]) -> Result<(), TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or(TransportError::Disconnected)?;
        Self::drain_stale(device)?;
        let written = device.write(report)?;
        if written < report.len() {
            debug!("Short write: {} of {} bytes", written, report.len());
            return Err(TransportError::HidError(format!(
                "short write ({written} of {} bytes)",
                report.len()
            )));
        }
        Ok(())
    }

    fn read_report(&self) -> Result<Vec<u8>, TransportError> {
        let guard = self.device.lock();
        let device = guard.as_ref().ok_or(TransportError::Disconnected)?;
        let mut buf = vec![0u8; RESPONSE_SIZE];
        let n = device.read_timeout(&mut buf, self.timeout_ms)?;
        if n == 0 {
            return Err(TransportError::Timeout(self.timeout_ms));
        }
        if n < RESPONSE_SIZE {
            return Err(TransportError::ShortResponse {
                expected: RESPONSE_SIZE,
                got: n,
            });
        }
        Ok(buf)
    }

    fn device_info(&self) -> &TransportDeviceInfo {
        &self.info
    }

    fn is_open(&self) -> bool {
        self.device.lock().is_some()
    }

    fn close(&self) -> Result<(), TransportError> {
        if self.device.lock().take().is_some() {
            HANDLE_OPEN.store(false, Ordering::SeqCst);
            debug!("Closed {}", self.info.device_path);
        }
        Ok(())
    }
}

impl Drop for HidTransport {
    fn drop(&mut self) {
        // close() never fails; it only releases the handle slot
        let _ = self.close();
    }
}
