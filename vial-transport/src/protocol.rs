//! Protocol constants and framing for VIA/Vial raw HID communication

use crate::error::TransportError;

/// Outgoing report size: report ID + 32 byte raw HID report
pub const REPORT_SIZE: usize = 33;

/// Incoming report size (hidapi strips the report ID)
pub const RESPONSE_SIZE: usize = 32;

/// Bytes available for arguments after the report ID and command byte
pub const MAX_ARGS: usize = REPORT_SIZE - 2;

/// Largest chunk for paged buffer reads/writes (`RESPONSE_SIZE` minus 4-byte header)
pub const BUFFER_CHUNK_SIZE: usize = 28;

/// Raw HID interface identification
pub mod device {
    /// VIA/Vial raw HID usage page
    pub const USAGE_PAGE: u16 = 0xFF60;
    /// VIA/Vial raw HID usage
    pub const USAGE: u16 = 0x61;
    /// Marker Vial firmware puts in the USB serial number
    pub const VIAL_SERIAL_MAGIC: &str = "vial:f64c2b3c";
}

/// Timing constants
pub mod timing {
    /// Default blocking read timeout
    pub const DEFAULT_TIMEOUT_MS: i32 = 1000;
    /// Upper bound on stale reports drained before a request
    pub const MAX_STALE_REPORTS: usize = 8;
}

/// VIA command bytes (`id_*` in QMK's via.h)
pub mod cmd {
    pub const GET_PROTOCOL_VERSION: u8 = 0x01;
    pub const GET_KEYBOARD_VALUE: u8 = 0x02;
    pub const SET_KEYBOARD_VALUE: u8 = 0x03;
    pub const DYNAMIC_KEYMAP_GET_KEYCODE: u8 = 0x04;
    pub const DYNAMIC_KEYMAP_SET_KEYCODE: u8 = 0x05;
    pub const DYNAMIC_KEYMAP_RESET: u8 = 0x06;
    pub const CUSTOM_SET_VALUE: u8 = 0x07;
    pub const CUSTOM_GET_VALUE: u8 = 0x08;
    pub const CUSTOM_SAVE: u8 = 0x09;
    pub const EEPROM_RESET: u8 = 0x0A;
    pub const BOOTLOADER_JUMP: u8 = 0x0B;
    pub const MACRO_GET_COUNT: u8 = 0x0C;
    pub const MACRO_GET_BUFFER_SIZE: u8 = 0x0D;
    pub const MACRO_GET_BUFFER: u8 = 0x0E;
    pub const MACRO_SET_BUFFER: u8 = 0x0F;
    pub const MACRO_RESET: u8 = 0x10;
    pub const GET_LAYER_COUNT: u8 = 0x11;
    pub const KEYMAP_GET_BUFFER: u8 = 0x12;
    pub const KEYMAP_SET_BUFFER: u8 = 0x13;
    pub const GET_ENCODER: u8 = 0x14;
    pub const SET_ENCODER: u8 = 0x15;
    pub const VIAL_PREFIX: u8 = 0xFE;
    /// Firmware answers unknown (or refused) commands with this byte
    pub const UNHANDLED: u8 = 0xFF;

    /// Get human-readable name for command byte
    pub fn name(cmd: u8) -> &'static str {
        match cmd {
            GET_PROTOCOL_VERSION => "GET_PROTOCOL_VERSION",
            GET_KEYBOARD_VALUE => "GET_KEYBOARD_VALUE",
            SET_KEYBOARD_VALUE => "SET_KEYBOARD_VALUE",
            DYNAMIC_KEYMAP_GET_KEYCODE => "DYNAMIC_KEYMAP_GET_KEYCODE",
            DYNAMIC_KEYMAP_SET_KEYCODE => "DYNAMIC_KEYMAP_SET_KEYCODE",
            DYNAMIC_KEYMAP_RESET => "DYNAMIC_KEYMAP_RESET",
            CUSTOM_SET_VALUE => "CUSTOM_SET_VALUE",
            CUSTOM_GET_VALUE => "CUSTOM_GET_VALUE",
            CUSTOM_SAVE => "CUSTOM_SAVE",
            EEPROM_RESET => "EEPROM_RESET",
            BOOTLOADER_JUMP => "BOOTLOADER_JUMP",
            MACRO_GET_COUNT => "MACRO_GET_COUNT",
            MACRO_GET_BUFFER_SIZE => "MACRO_GET_BUFFER_SIZE",
            MACRO_GET_BUFFER => "MACRO_GET_BUFFER",
            MACRO_SET_BUFFER => "MACRO_SET_BUFFER",
            MACRO_RESET => "MACRO_RESET",
            GET_LAYER_COUNT => "GET_LAYER_COUNT",
            KEYMAP_GET_BUFFER => "KEYMAP_GET_BUFFER",
            KEYMAP_SET_BUFFER => "KEYMAP_SET_BUFFER",
            GET_ENCODER => "GET_ENCODER",
            SET_ENCODER => "SET_ENCODER",
            VIAL_PREFIX => "VIAL_PREFIX",
            UNHANDLED => "UNHANDLED",
            _ => "UNKNOWN",
        }
    }
}

/// Sub-ids for GET/SET_KEYBOARD_VALUE
pub mod keyboard_value {
    pub const UPTIME: u8 = 0x01;
    pub const LAYOUT_OPTIONS: u8 = 0x02;
    pub const SWITCH_MATRIX_STATE: u8 = 0x03;
    pub const FIRMWARE_VERSION: u8 = 0x04;
}

/// Vial sub-commands, sent after [`cmd::VIAL_PREFIX`]
pub mod vial {
    pub const GET_KEYBOARD_ID: u8 = 0x00;
    pub const GET_SIZE: u8 = 0x01;
    pub const GET_DEFINITION: u8 = 0x02;
    pub const GET_ENCODER: u8 = 0x03;
    pub const SET_ENCODER: u8 = 0x04;
    pub const GET_UNLOCK_STATUS: u8 = 0x05;
    pub const UNLOCK_START: u8 = 0x06;
    pub const UNLOCK_POLL: u8 = 0x07;
    pub const LOCK: u8 = 0x08;
    pub const QMK_SETTINGS_QUERY: u8 = 0x09;
    pub const QMK_SETTINGS_GET: u8 = 0x0A;
    pub const QMK_SETTINGS_SET: u8 = 0x0B;
    pub const QMK_SETTINGS_RESET: u8 = 0x0C;
    pub const DYNAMIC_ENTRY_OP: u8 = 0x0D;

    /// Size of one definition page
    pub const DEFINITION_PAGE_SIZE: usize = 32;

    /// Get human-readable name for a Vial sub-command
    pub fn name(sub: u8) -> &'static str {
        match sub {
            GET_KEYBOARD_ID => "GET_KEYBOARD_ID",
            GET_SIZE => "GET_SIZE",
            GET_DEFINITION => "GET_DEFINITION",
            GET_ENCODER => "GET_ENCODER",
            SET_ENCODER => "SET_ENCODER",
            GET_UNLOCK_STATUS => "GET_UNLOCK_STATUS",
            UNLOCK_START => "UNLOCK_START",
            UNLOCK_POLL => "UNLOCK_POLL",
            LOCK => "LOCK",
            QMK_SETTINGS_QUERY => "QMK_SETTINGS_QUERY",
            QMK_SETTINGS_GET => "QMK_SETTINGS_GET",
            QMK_SETTINGS_SET => "QMK_SETTINGS_SET",
            QMK_SETTINGS_RESET => "QMK_SETTINGS_RESET",
            DYNAMIC_ENTRY_OP => "DYNAMIC_ENTRY_OP",
            _ => "UNKNOWN",
        }
    }
}

/// Dynamic entry operations, sent after [`vial::DYNAMIC_ENTRY_OP`]
pub mod dynamic {
    pub const GET_NUMBER_OF_ENTRIES: u8 = 0x00;
    pub const TAP_DANCE_GET: u8 = 0x01;
    pub const TAP_DANCE_SET: u8 = 0x02;
    pub const COMBO_GET: u8 = 0x03;
    pub const COMBO_SET: u8 = 0x04;
    pub const KEY_OVERRIDE_GET: u8 = 0x05;
    pub const KEY_OVERRIDE_SET: u8 = 0x06;

    /// Status byte for a successful entry get/set
    pub const STATUS_OK: u8 = 0x00;
}

/// Build a complete output report: `[report_id=0, cmd, data.., zero padding]`
pub fn build_command(cmd: u8, data: &[u8]) -> Result<Vec<u8>, TransportError> {
    if data.len() > MAX_ARGS {
        return Err(TransportError::PayloadTooLarge {
            len: data.len(),
            max: MAX_ARGS,
        });
    }
    let mut buf = vec![0u8; REPORT_SIZE];
    buf[0] = 0; // Report ID
    buf[1] = cmd;
    buf[2..2 + data.len()].copy_from_slice(data);
    Ok(buf)
}

/// A raw response report with checked accessors.
///
/// Every accessor fails with [`TransportError::ShortResponse`] when the
/// requested range runs past the end of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    data: Vec<u8>,
}

impl Response {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn need(&self, end: usize) -> Result<(), TransportError> {
        if end > self.data.len() {
            return Err(TransportError::ShortResponse {
                expected: end,
                got: self.data.len(),
            });
        }
        Ok(())
    }

    pub fn u8_at(&self, offset: usize) -> Result<u8, TransportError> {
        self.need(offset + 1)?;
        Ok(self.data[offset])
    }

    pub fn bytes(&self, offset: usize, len: usize) -> Result<&[u8], TransportError> {
        self.need(offset + len)?;
        Ok(&self.data[offset..offset + len])
    }

    pub fn u16_be(&self, offset: usize) -> Result<u16, TransportError> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn u16_le(&self, offset: usize) -> Result<u16, TransportError> {
        let b = self.bytes(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_be(&self, offset: usize) -> Result<u32, TransportError> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u32_le(&self, offset: usize) -> Result<u32, TransportError> {
        let b = self.bytes(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Little-endian value of `width` bytes (1..=4)
    pub fn uint_le(&self, offset: usize, width: usize) -> Result<u32, TransportError> {
        let b = self.bytes(offset, width.min(4))?;
        Ok(b.iter()
            .rev()
            .fold(0u32, |acc, &byte| (acc << 8) | byte as u32))
    }

    /// `count` consecutive big-endian u16 values
    pub fn u16_be_array(&self, offset: usize, count: usize) -> Result<Vec<u16>, TransportError> {
        let b = self.bytes(offset, count * 2)?;
        Ok(b.chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect())
    }

    /// `count` consecutive little-endian u16 values
    pub fn u16_le_array(&self, offset: usize, count: usize) -> Result<Vec<u16>, TransportError> {
        let b = self.bytes(offset, count * 2)?;
        Ok(b.chunks_exact(2)
            .map(|c| u16::from_le_bytes([c[0], c[1]]))
            .collect())
    }

    /// NUL-terminated string within `len` bytes
    pub fn string(&self, offset: usize, len: usize) -> Result<String, TransportError> {
        let b = self.bytes(offset, len)?;
        let end = b.iter().position(|&c| c == 0).unwrap_or(b.len());
        Ok(String::from_utf8_lossy(&b[..end]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_command_layout() {
        let buf = build_command(cmd::DYNAMIC_KEYMAP_SET_KEYCODE, &[1, 2, 3, 0x00, 0x04]).unwrap();
        assert_eq!(buf.len(), REPORT_SIZE);
        assert_eq!(buf[0], 0); // Report ID
        assert_eq!(buf[1], 0x05);
        assert_eq!(&buf[2..7], &[1, 2, 3, 0x00, 0x04]);
        assert!(buf[7..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_build_command_rejects_oversized_payload() {
        let data = [0u8; MAX_ARGS + 1];
        let err = build_command(cmd::VIAL_PREFIX, &data).unwrap_err();
        assert!(matches!(
            err,
            TransportError::PayloadTooLarge { len: 32, max: 31 }
        ));
        assert!(build_command(cmd::VIAL_PREFIX, &data[..MAX_ARGS]).is_ok());
    }

    #[test]
    fn test_response_integer_decoding() {
        let resp = Response::new(vec![0x01, 0x00, 0x09, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(resp.u8_at(0).unwrap(), 0x01);
        assert_eq!(resp.u16_be(1).unwrap(), 9);
        assert_eq!(resp.u16_le(1).unwrap(), 0x0900);
        assert_eq!(resp.u32_le(3).unwrap(), 0x1234_5678);
        assert_eq!(resp.u32_be(3).unwrap(), 0x7856_3412);
        assert_eq!(resp.uint_le(3, 2).unwrap(), 0x5678);
        assert_eq!(resp.uint_le(3, 1).unwrap(), 0x78);
    }

    #[test]
    fn test_response_arrays_and_strings() {
        let resp = Response::new(vec![0x00, 0x04, 0x00, 0x29, b'h', b'i', 0, b'x']);
        assert_eq!(resp.u16_be_array(0, 2).unwrap(), vec![0x0004, 0x0029]);
        assert_eq!(resp.u16_le_array(0, 2).unwrap(), vec![0x0400, 0x2900]);
        assert_eq!(resp.string(4, 4).unwrap(), "hi");
    }

    #[test]
    fn test_short_response_is_transport_error() {
        let resp = Response::new(vec![0x0C]);
        match resp.u16_be(1) {
            Err(TransportError::ShortResponse { expected, got }) => {
                assert_eq!(expected, 3);
                assert_eq!(got, 1);
            }
            other => panic!("expected ShortResponse, got {other:?}"),
        }
    }

    #[test]
    fn test_command_names() {
        assert_eq!(cmd::name(cmd::MACRO_GET_BUFFER), "MACRO_GET_BUFFER");
        assert_eq!(vial::name(vial::DYNAMIC_ENTRY_OP), "DYNAMIC_ENTRY_OP");
        assert_eq!(cmd::name(0x42), "UNKNOWN");
    }
}
