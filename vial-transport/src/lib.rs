//! Transport layer for VIA/Vial keyboard communication
//!
//! Provides raw HID device discovery, a fixed-size request/response framing
//! and checked decoding helpers for the replies. All exchanges are strictly
//! sequential: one report out, one blocking read back.

pub mod error;
pub mod protocol;
pub mod types;

mod discovery;
mod hid;

pub use discovery::HidDiscovery;
pub use error::TransportError;
pub use hid::HidTransport;
pub use protocol::Response;
pub use types::{DeviceFilter, DiscoveredDevice, TransportDeviceInfo};

use std::sync::Arc;

use tracing::debug;

/// The core transport trait - all backends implement this
pub trait Transport: Send + Sync {
    /// Write one complete output report (report ID included)
    fn write_report(&self, report: &[u8]) -> Result<(), TransportError>;

    /// Blocking read of one input report
    fn read_report(&self) -> Result<Vec<u8>, TransportError>;

    /// Get device information
    fn device_info(&self) -> &TransportDeviceInfo;

    /// Check if the handle is still held
    fn is_open(&self) -> bool;

    /// Release the handle. Safe to call more than once.
    fn close(&self) -> Result<(), TransportError>;

    /// Device keeps writes in RAM only (nothing reaches EEPROM)
    fn is_volatile(&self) -> bool {
        false
    }

    /// Send a command and wait for its response
    ///
    /// # Arguments
    /// * `cmd` - Command byte
    /// * `data` - Command arguments (without command byte)
    ///
    /// # Returns
    /// The 32-byte response report
    fn query_command(&self, cmd: u8, data: &[u8]) -> Result<Response, TransportError> {
        let report = protocol::build_command(cmd, data)?;
        debug!(
            "Sending 0x{:02X} ({}): {:02X?}",
            cmd,
            protocol::cmd::name(cmd),
            &report[1..2 + data.len().min(8)]
        );
        self.write_report(&report)?;
        let raw = self.read_report()?;
        if raw.len() < protocol::RESPONSE_SIZE {
            return Err(TransportError::ShortResponse {
                expected: protocol::RESPONSE_SIZE,
                got: raw.len(),
            });
        }
        debug!("Response: {:02X?}", &raw[..8]);
        Ok(Response::new(raw))
    }
}

/// Type alias for a shared transport
pub type BoxedTransport = Arc<dyn Transport>;
