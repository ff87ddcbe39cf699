//! Protocol client and feature codecs for Vial/VIA keyboards
//!
//! [`KeyboardInterface`] maps each logical operation onto its VIA or Vial
//! command and decodes the reply. [`kbinfo::KbInfo`] aggregates those calls
//! into one snapshot of the board, and [`slots`] implements list/get/add/
//! edit/delete over the slot-addressed features.

pub mod combo;
pub mod definition;
pub mod error;
pub mod kbinfo;
pub mod key_override;
pub mod keycode;
pub mod keymap;
pub mod macros;
pub mod qmk_settings;
pub mod slots;
pub mod tap_dance;

#[cfg(any(test, feature = "simulator"))]
pub mod simulator;

mod tokens;

pub use combo::Combo;
pub use definition::KeyboardDefinition;
pub use error::{CodecError, KeyboardError};
pub use kbinfo::{Feature, KbInfo, LoadOptions};
pub use key_override::KeyOverride;
pub use keycode::{KeyCode, KeyNames, QmkKeycodes};
pub use keymap::{Geometry, Keymap};
pub use macros::{Macro, MacroAction};
pub use qmk_settings::{SettingField, SettingsMap, SettingsSchema};
pub use tap_dance::TapDance;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, warn};
use vial_transport::protocol::{cmd, dynamic, keyboard_value, vial, Response, BUFFER_CHUNK_SIZE};
use vial_transport::{Transport, TransportDeviceInfo};

/// First Vial protocol with dynamic entries (tap dance, combo, key override)
pub const VIAL_PROTOCOL_DYNAMIC: u32 = 4;

/// First Vial protocol with QMK settings
pub const VIAL_PROTOCOL_QMK_SETTINGS: u32 = 4;

/// Sanity limit for the compressed definition size
const MAX_DEFINITION_SIZE: u32 = 1024 * 1024;

/// Vial identity block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KeyboardId {
    pub vial_protocol: u32,
    pub uid: u64,
}

/// Dynamic-entry capacities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct DynamicCounts {
    pub tap_dance: u8,
    pub combo: u8,
    pub key_override: u8,
}

/// Vial security lock state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnlockStatus {
    pub unlocked: bool,
    pub in_progress: bool,
    /// Matrix positions (row, col) that must be held to unlock
    pub keys: Vec<(u8, u8)>,
}

/// Progress of an unlock in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UnlockPoll {
    pub unlocked: bool,
    pub in_progress: bool,
    pub remaining: u8,
}

/// Result of a save request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveOutcome {
    /// Firmware commits each write to EEPROM itself
    AutoPersisted,
    /// No persistent storage; changes are lost at power-off
    Unavailable,
}

/// Protocol client over any [`Transport`]
pub struct KeyboardInterface {
    transport: Arc<dyn Transport>,
}

impl KeyboardInterface {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Get the underlying transport
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn device_info(&self) -> &TransportDeviceInfo {
        self.transport.device_info()
    }

    /// Release the device handle
    pub fn close(&self) -> Result<(), KeyboardError> {
        Ok(self.transport.close()?)
    }

    /// VIA command: the reply must echo the command byte
    fn via_query(&self, command: u8, data: &[u8]) -> Result<Response, KeyboardError> {
        let resp = self.transport.query_command(command, data)?;
        let echo = resp.u8_at(0)?;
        if echo == command {
            return Ok(resp);
        }
        if echo == cmd::UNHANDLED {
            return Err(KeyboardError::Unhandled(command));
        }
        Err(KeyboardError::UnexpectedResponse(format!(
            "{} answered with 0x{echo:02X}",
            cmd::name(command)
        )))
    }

    /// Vial sub-command: replies carry data from byte 0, no echo
    fn vial_query(&self, sub: u8, data: &[u8]) -> Result<Response, KeyboardError> {
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(sub);
        payload.extend_from_slice(data);
        debug!("Vial {}", vial::name(sub));
        Ok(self.transport.query_command(cmd::VIAL_PREFIX, &payload)?)
    }

    fn dynamic_query(&self, op: u8, data: &[u8]) -> Result<Response, KeyboardError> {
        let mut payload = Vec::with_capacity(data.len() + 1);
        payload.push(op);
        payload.extend_from_slice(data);
        self.vial_query(vial::DYNAMIC_ENTRY_OP, &payload)
    }

    fn check_status(resp: &Response, what: &str) -> Result<(), KeyboardError> {
        match resp.u8_at(0)? {
            dynamic::STATUS_OK => Ok(()),
            status => Err(KeyboardError::UnexpectedResponse(format!(
                "{what} failed with status 0x{status:02X}"
            ))),
        }
    }

    /// Paged read of a VIA buffer (`offset_hi, offset_lo, size` requests).
    /// `done` can end the read early once enough data has arrived.
    fn read_buffer(
        &self,
        command: u8,
        len: usize,
        done: impl Fn(&[u8]) -> bool,
    ) -> Result<Vec<u8>, KeyboardError> {
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            let offset = buffer_offset(out.len())?;
            let size = (len - out.len()).min(BUFFER_CHUNK_SIZE);
            let [hi, lo] = offset.to_be_bytes();
            let resp = self.via_query(command, &[hi, lo, size as u8])?;
            out.extend_from_slice(resp.bytes(4, size)?);
            if done(&out) {
                break;
            }
        }
        Ok(out)
    }

    fn write_buffer(&self, command: u8, start: usize, data: &[u8]) -> Result<(), KeyboardError> {
        for (i, chunk) in data.chunks(BUFFER_CHUNK_SIZE).enumerate() {
            let [hi, lo] = buffer_offset(start + i * BUFFER_CHUNK_SIZE)?.to_be_bytes();
            let mut payload = Vec::with_capacity(3 + chunk.len());
            payload.extend_from_slice(&[hi, lo, chunk.len() as u8]);
            payload.extend_from_slice(chunk);
            self.via_query(command, &payload)?;
        }
        Ok(())
    }

    // === Identity ===

    /// Get VIA protocol version
    pub fn get_protocol_version(&self) -> Result<u16, KeyboardError> {
        let resp = self.via_query(cmd::GET_PROTOCOL_VERSION, &[])?;
        Ok(resp.u16_be(1)?)
    }

    /// Get Vial protocol version and keyboard UID
    pub fn get_keyboard_id(&self) -> Result<KeyboardId, KeyboardError> {
        let resp = self.vial_query(vial::GET_KEYBOARD_ID, &[])?;
        let uid = resp.bytes(4, 8)?;
        Ok(KeyboardId {
            vial_protocol: resp.u32_le(0)?,
            uid: u64::from_le_bytes([
                uid[0], uid[1], uid[2], uid[3], uid[4], uid[5], uid[6], uid[7],
            ]),
        })
    }

    /// Fetch the compressed keyboard definition
    pub fn get_definition_raw(&self) -> Result<Vec<u8>, KeyboardError> {
        let size = self.vial_query(vial::GET_SIZE, &[])?.u32_le(0)?;
        if size == 0 || size > MAX_DEFINITION_SIZE {
            return Err(KeyboardError::UnexpectedResponse(format!(
                "implausible definition size {size}"
            )));
        }
        let size = size as usize;
        let mut blob = Vec::with_capacity(size);
        let mut page: u32 = 0;
        while blob.len() < size {
            let resp = self.vial_query(vial::GET_DEFINITION, &page.to_le_bytes())?;
            blob.extend_from_slice(resp.bytes(0, vial::DEFINITION_PAGE_SIZE)?);
            page += 1;
        }
        blob.truncate(size);
        debug!("Definition: {} bytes in {} pages", size, page);
        Ok(blob)
    }

    /// Fetch and decode the keyboard definition
    pub fn get_definition(&self) -> Result<KeyboardDefinition, KeyboardError> {
        Ok(KeyboardDefinition::decode(&self.get_definition_raw()?)?)
    }

    /// Get the packed layout-options word
    pub fn get_layout_options(&self) -> Result<u32, KeyboardError> {
        let resp = self.via_query(cmd::GET_KEYBOARD_VALUE, &[keyboard_value::LAYOUT_OPTIONS])?;
        Ok(resp.u32_be(2)?)
    }

    pub fn set_layout_options(&self, value: u32) -> Result<(), KeyboardError> {
        let mut payload = vec![keyboard_value::LAYOUT_OPTIONS];
        payload.extend_from_slice(&value.to_be_bytes());
        self.via_query(cmd::SET_KEYBOARD_VALUE, &payload)?;
        Ok(())
    }

    // === Keymap ===

    pub fn get_layer_count(&self) -> Result<u8, KeyboardError> {
        Ok(self.via_query(cmd::GET_LAYER_COUNT, &[])?.u8_at(1)?)
    }

    pub fn get_keycode(&self, layer: u8, row: u8, col: u8) -> Result<KeyCode, KeyboardError> {
        let resp = self.via_query(cmd::DYNAMIC_KEYMAP_GET_KEYCODE, &[layer, row, col])?;
        Ok(resp.u16_be(4)?)
    }

    pub fn set_keycode(
        &self,
        layer: u8,
        row: u8,
        col: u8,
        code: KeyCode,
    ) -> Result<(), KeyboardError> {
        let [hi, lo] = code.to_be_bytes();
        self.via_query(cmd::DYNAMIC_KEYMAP_SET_KEYCODE, &[layer, row, col, hi, lo])?;
        Ok(())
    }

    /// Read the whole dynamic keymap
    pub fn read_keymap(&self, geometry: Geometry) -> Result<Keymap, KeyboardError> {
        let buf = self.read_buffer(cmd::KEYMAP_GET_BUFFER, geometry.buffer_len(), |_| false)?;
        Ok(Keymap::decode(geometry, &buf))
    }

    /// Bulk-write one layer
    pub fn write_keymap_layer(
        &self,
        geometry: Geometry,
        layer: usize,
        codes: &[KeyCode],
    ) -> Result<(), KeyboardError> {
        geometry.check_layer(layer)?;
        if codes.len() != geometry.keys_per_layer() {
            return Err(KeyboardError::InvalidParameter(format!(
                "layer {layer} needs {} key codes, got {}",
                geometry.keys_per_layer(),
                codes.len()
            )));
        }
        let start = geometry.buffer_offset(layer, 0, 0);
        self.write_buffer(cmd::KEYMAP_SET_BUFFER, start, &Keymap::encode_layer(codes))
    }

    // === Macros ===

    pub fn get_macro_count(&self) -> Result<u8, KeyboardError> {
        Ok(self.via_query(cmd::MACRO_GET_COUNT, &[])?.u8_at(1)?)
    }

    pub fn get_macro_buffer_size(&self) -> Result<u16, KeyboardError> {
        Ok(self.via_query(cmd::MACRO_GET_BUFFER_SIZE, &[])?.u16_be(1)?)
    }

    /// Read the macro buffer, stopping once `count` terminators were seen
    pub fn read_macro_buffer(&self, size: usize, count: usize) -> Result<Vec<u8>, KeyboardError> {
        self.read_buffer(cmd::MACRO_GET_BUFFER, size, |data| {
            data.iter().filter(|&&b| b == 0).count() >= count
        })
    }

    pub fn write_macro_buffer(&self, data: &[u8]) -> Result<(), KeyboardError> {
        debug!("Writing {} byte macro buffer", data.len());
        self.write_buffer(cmd::MACRO_SET_BUFFER, 0, data)
    }

    /// Clear every macro
    pub fn reset_macros(&self) -> Result<(), KeyboardError> {
        self.via_query(cmd::MACRO_RESET, &[])?;
        Ok(())
    }

    // === Dynamic entries ===

    pub fn get_dynamic_counts(&self) -> Result<DynamicCounts, KeyboardError> {
        let resp = self.dynamic_query(dynamic::GET_NUMBER_OF_ENTRIES, &[])?;
        Ok(DynamicCounts {
            tap_dance: resp.u8_at(0)?,
            combo: resp.u8_at(1)?,
            key_override: resp.u8_at(2)?,
        })
    }

    fn get_entry(&self, op: u8, index: u8, size: usize) -> Result<Vec<u8>, KeyboardError> {
        let resp = self.dynamic_query(op, &[index])?;
        Self::check_status(&resp, "entry get")?;
        Ok(resp.bytes(1, size)?.to_vec())
    }

    fn set_entry(&self, op: u8, index: u8, record: &[u8]) -> Result<(), KeyboardError> {
        let mut payload = vec![index];
        payload.extend_from_slice(record);
        let resp = self.dynamic_query(op, &payload)?;
        Self::check_status(&resp, "entry set")
    }

    pub fn get_tap_dance(&self, index: u8) -> Result<TapDance, KeyboardError> {
        let bytes = self.get_entry(
            dynamic::TAP_DANCE_GET,
            index,
            tap_dance::TAP_DANCE_ENTRY_SIZE,
        )?;
        TapDance::from_bytes(&bytes).ok_or_else(|| short_record("tap dance"))
    }

    pub fn set_tap_dance(&self, index: u8, td: &TapDance) -> Result<(), KeyboardError> {
        self.set_entry(dynamic::TAP_DANCE_SET, index, &td.to_bytes())
    }

    pub fn get_combo(&self, index: u8) -> Result<Combo, KeyboardError> {
        let bytes = self.get_entry(dynamic::COMBO_GET, index, combo::COMBO_ENTRY_SIZE)?;
        Combo::from_bytes(&bytes).ok_or_else(|| short_record("combo"))
    }

    pub fn set_combo(&self, index: u8, combo: &Combo) -> Result<(), KeyboardError> {
        self.set_entry(dynamic::COMBO_SET, index, &combo.to_bytes())
    }

    pub fn get_key_override(&self, index: u8) -> Result<KeyOverride, KeyboardError> {
        let bytes = self.get_entry(
            dynamic::KEY_OVERRIDE_GET,
            index,
            key_override::KEY_OVERRIDE_ENTRY_SIZE,
        )?;
        KeyOverride::from_bytes(&bytes).ok_or_else(|| short_record("key override"))
    }

    pub fn set_key_override(&self, index: u8, ko: &KeyOverride) -> Result<(), KeyboardError> {
        self.set_entry(dynamic::KEY_OVERRIDE_SET, index, &ko.to_bytes())
    }

    // === QMK settings ===

    /// List the QSIDs the firmware supports
    pub fn query_qmk_settings(&self) -> Result<Vec<u16>, KeyboardError> {
        let mut supported = Vec::new();
        let mut cursor: u16 = 0;
        loop {
            // the firmware answers with QSIDs strictly greater than the cursor
            let resp = self.vial_query(vial::QMK_SETTINGS_QUERY, &cursor.to_le_bytes())?;
            let ids = resp.u16_le_array(0, resp.len() / 2)?;
            let mut finished = false;
            let before = cursor;
            for qsid in ids {
                if qsid == 0xFFFF {
                    finished = true;
                    break;
                }
                supported.push(qsid);
                cursor = cursor.max(qsid);
            }
            if finished || cursor == before {
                break;
            }
        }
        supported.sort_unstable();
        supported.dedup();
        Ok(supported)
    }

    /// Raw value of one QSID (`width` bytes, little-endian)
    pub fn get_qmk_setting(&self, qsid: u16, width: u8) -> Result<u32, KeyboardError> {
        let resp = self.vial_query(vial::QMK_SETTINGS_GET, &qsid.to_le_bytes())?;
        if resp.u8_at(0)? != 0 {
            return Err(KeyboardError::InvalidParameter(format!(
                "QSID {qsid} rejected by firmware"
            )));
        }
        Ok(resp.uint_le(1, width as usize)?)
    }

    pub fn set_qmk_setting(&self, qsid: u16, width: u8, value: u32) -> Result<(), KeyboardError> {
        let mut payload = qsid.to_le_bytes().to_vec();
        payload.extend_from_slice(&value.to_le_bytes()[..(width as usize).min(4)]);
        let resp = self.vial_query(vial::QMK_SETTINGS_SET, &payload)?;
        if resp.u8_at(0)? != 0 {
            return Err(KeyboardError::InvalidParameter(format!(
                "QSID {qsid} rejected value {value}"
            )));
        }
        Ok(())
    }

    /// Restore firmware defaults for every QMK setting
    pub fn reset_qmk_settings(&self) -> Result<(), KeyboardError> {
        self.vial_query(vial::QMK_SETTINGS_RESET, &[])?;
        Ok(())
    }

    // === Security lock ===

    pub fn get_unlock_status(&self) -> Result<UnlockStatus, KeyboardError> {
        let resp = self.vial_query(vial::GET_UNLOCK_STATUS, &[])?;
        let keys = resp
            .bytes(2, resp.len().saturating_sub(2))?
            .chunks_exact(2)
            .filter(|pair| pair[0] != 0xFF && pair[1] != 0xFF)
            .map(|pair| (pair[0], pair[1]))
            .collect();
        Ok(UnlockStatus {
            unlocked: resp.u8_at(0)? == 1,
            in_progress: resp.u8_at(1)? == 1,
            keys,
        })
    }

    pub fn unlock_start(&self) -> Result<(), KeyboardError> {
        self.vial_query(vial::UNLOCK_START, &[])?;
        Ok(())
    }

    pub fn unlock_poll(&self) -> Result<UnlockPoll, KeyboardError> {
        let resp = self.vial_query(vial::UNLOCK_POLL, &[])?;
        Ok(UnlockPoll {
            unlocked: resp.u8_at(0)? == 1,
            in_progress: resp.u8_at(1)? == 1,
            remaining: resp.u8_at(2)?,
        })
    }

    pub fn lock(&self) -> Result<(), KeyboardError> {
        self.vial_query(vial::LOCK, &[])?;
        Ok(())
    }

    /// Fail with [`KeyboardError::Locked`] unless the board is unlocked
    pub fn require_unlocked(&self) -> Result<(), KeyboardError> {
        if self.get_unlock_status()?.unlocked {
            Ok(())
        } else {
            Err(KeyboardError::Locked)
        }
    }

    // === Persistence ===

    /// Persist pushed changes for `feature`.
    ///
    /// Vial commits every set to EEPROM as it arrives, so there is no save
    /// command to send; this only reports whether the writes will survive.
    pub fn save(&self, feature: Feature) -> SaveOutcome {
        if self.transport.is_volatile() {
            warn!("{feature} changes are held in RAM only and will be lost at power-off");
            SaveOutcome::Unavailable
        } else {
            debug!("{feature} changes persisted by firmware");
            SaveOutcome::AutoPersisted
        }
    }
}

fn buffer_offset(offset: usize) -> Result<u16, KeyboardError> {
    u16::try_from(offset).map_err(|_| {
        KeyboardError::InvalidParameter(format!("buffer offset {offset} exceeds 16 bits"))
    })
}

fn short_record(what: &str) -> KeyboardError {
    KeyboardError::UnexpectedResponse(format!("truncated {what} record"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulator::{SimulatedKeyboard, SimulatorConfig};

    fn keyboard() -> (Arc<SimulatedKeyboard>, KeyboardInterface) {
        let sim = Arc::new(SimulatedKeyboard::new(SimulatorConfig::default()));
        let kb = KeyboardInterface::new(sim.clone());
        (sim, kb)
    }

    #[test]
    fn test_identity() {
        let (_sim, kb) = keyboard();
        assert_eq!(kb.get_protocol_version().unwrap(), 9);
        let id = kb.get_keyboard_id().unwrap();
        assert_eq!(id.vial_protocol, 6);
        let def = kb.get_definition().unwrap();
        assert_eq!(def.matrix.rows, 2);
        assert_eq!(def.matrix.cols, 3);
    }

    #[test]
    fn test_keycode_get_set() {
        let (_sim, kb) = keyboard();
        kb.set_keycode(1, 1, 2, 0x5221).unwrap();
        assert_eq!(kb.get_keycode(1, 1, 2).unwrap(), 0x5221);
        let geometry = Geometry {
            rows: 2,
            cols: 3,
            layers: kb.get_layer_count().unwrap() as usize,
        };
        let keymap = kb.read_keymap(geometry).unwrap();
        assert_eq!(keymap.get(1, 1, 2).unwrap(), 0x5221);
    }

    #[test]
    fn test_layer_bulk_write() {
        let (_sim, kb) = keyboard();
        let geometry = Geometry {
            rows: 2,
            cols: 3,
            layers: 4,
        };
        let codes = [0x04, 0x05, 0x06, 0x07, 0x08, 0x09];
        kb.write_keymap_layer(geometry, 2, &codes).unwrap();
        assert_eq!(kb.read_keymap(geometry).unwrap().layer(2).unwrap(), &codes);
        assert!(kb.write_keymap_layer(geometry, 2, &codes[..5]).is_err());
    }

    #[test]
    fn test_unhandled_command_classified() {
        let (sim, kb) = keyboard();
        sim.set_unhandled(cmd::MACRO_GET_COUNT);
        assert!(matches!(
            kb.get_macro_count(),
            Err(KeyboardError::Unhandled(cmd::MACRO_GET_COUNT))
        ));
    }

    #[test]
    fn test_dynamic_entries() {
        let (_sim, kb) = keyboard();
        let counts = kb.get_dynamic_counts().unwrap();
        assert_eq!(counts.combo, 8);
        let combo = Combo {
            triggers: [0x04, 0x16, 0, 0],
            output: 0x07,
        };
        kb.set_combo(3, &combo).unwrap();
        assert_eq!(kb.get_combo(3).unwrap(), combo);
        assert!(kb.get_combo(counts.combo).is_err());
    }

    #[test]
    fn test_settings_round_trip() {
        let (_sim, kb) = keyboard();
        let supported = kb.query_qmk_settings().unwrap();
        assert!(supported.contains(&7));
        kb.set_qmk_setting(7, 2, 175).unwrap();
        assert_eq!(kb.get_qmk_setting(7, 2).unwrap(), 175);
        kb.reset_qmk_settings().unwrap();
        assert_eq!(kb.get_qmk_setting(7, 2).unwrap(), 200);
    }

    #[test]
    fn test_unlock_flow() {
        let (sim, kb) = keyboard();
        sim.set_locked(true);
        assert!(matches!(kb.require_unlocked(), Err(KeyboardError::Locked)));
        let status = kb.get_unlock_status().unwrap();
        assert!(!status.unlocked);
        assert_eq!(status.keys, vec![(0, 0), (0, 2)]);
        kb.unlock_start().unwrap();
        let mut poll = kb.unlock_poll().unwrap();
        while !poll.unlocked {
            poll = kb.unlock_poll().unwrap();
        }
        assert!(kb.require_unlocked().is_ok());
        kb.lock().unwrap();
        assert!(kb.require_unlocked().is_err());
    }

    #[test]
    fn test_save_reports_volatility() {
        let (sim, kb) = keyboard();
        assert_eq!(kb.save(Feature::Combos), SaveOutcome::AutoPersisted);
        sim.set_volatile(true);
        assert_eq!(kb.save(Feature::Combos), SaveOutcome::Unavailable);
    }
}
