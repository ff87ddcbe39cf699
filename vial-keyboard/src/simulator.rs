//! In-process Vial firmware for tests
//!
//! [`SimulatedKeyboard`] implements [`Transport`] by answering each output
//! report the way Vial-QMK does: VIA commands echo their id, Vial
//! sub-commands reply from byte 0, unknown commands come back as 0xFF.
//! Knobs let tests lock the board, drop features, mark it volatile or
//! unplug it mid-session.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use serde_json::json;
use tracing::warn;
use vial_transport::protocol::{cmd, dynamic, keyboard_value, vial, RESPONSE_SIZE};
use vial_transport::{Transport, TransportDeviceInfo, TransportError};

use crate::qmk_settings::SettingsSchema;

/// Firmware shape for a simulated board
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub name: String,
    pub rows: u8,
    pub cols: u8,
    pub layers: u8,
    pub via_protocol: u16,
    pub vial_protocol: u32,
    pub macro_count: u8,
    pub macro_buffer_size: u16,
    pub tap_dance_count: u8,
    pub combo_count: u8,
    pub key_override_count: u8,
    pub qmk_settings: bool,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            name: "Simulated 6-key".to_string(),
            rows: 2,
            cols: 3,
            layers: 4,
            via_protocol: 9,
            vial_protocol: 6,
            macro_count: 16,
            macro_buffer_size: 512,
            tap_dance_count: 8,
            combo_count: 8,
            key_override_count: 8,
            qmk_settings: true,
        }
    }
}

const RECORD_SIZE: usize = 10;
const UNLOCK_HOLD_POLLS: u8 = 3;
const UNLOCK_KEYS: [(u8, u8); 2] = [(0, 0), (0, 2)];

struct Settings {
    widths: BTreeMap<u16, u8>,
    values: BTreeMap<u16, u32>,
}

impl Settings {
    fn defaults() -> Self {
        let schema = SettingsSchema::builtin();
        let mut widths = BTreeMap::new();
        for field in schema.fields() {
            widths.insert(field.qsid, field.width);
        }
        let mut values: BTreeMap<u16, u32> = widths.keys().map(|&q| (q, 0)).collect();
        values.insert(2, 50); // combo_term
        values.insert(7, 200); // tapping_term
        values.insert(20, 5); // tapping_toggle
        Self { widths, values }
    }
}

struct State {
    keymap: Vec<u16>,
    layout_options: u32,
    macro_buffer: Vec<u8>,
    tap_dances: Vec<[u8; RECORD_SIZE]>,
    combos: Vec<[u8; RECORD_SIZE]>,
    key_overrides: Vec<[u8; RECORD_SIZE]>,
    settings: Settings,
    locked: bool,
    unlock_in_progress: bool,
    unlock_remaining: u8,
    unhandled: HashSet<u8>,
    pending: Option<Vec<u8>>,
}

/// Simulated Vial keyboard speaking the raw HID protocol
pub struct SimulatedKeyboard {
    config: SimulatorConfig,
    info: TransportDeviceInfo,
    definition: Vec<u8>,
    state: Mutex<State>,
    open: AtomicBool,
    volatile: AtomicBool,
    unplugged: AtomicBool,
    reports: AtomicUsize,
}

impl SimulatedKeyboard {
    pub fn new(config: SimulatorConfig) -> Self {
        let keys = config.rows as usize * config.cols as usize;
        let mut keymap = vec![0x0001u16; config.layers as usize * keys];
        for (i, code) in keymap.iter_mut().take(keys).enumerate() {
            *code = 0x04 + i as u16;
        }

        let definition_json = json!({
            "name": config.name,
            "vendorId": "0xFEED",
            "productId": "0x0001",
            "matrix": {"rows": config.rows, "cols": config.cols},
            "layouts": {"labels": ["Split Space"]},
            "customKeycodes": [{"name": "CK_SIM", "title": "Simulator key"}],
        })
        .to_string();
        let mut definition = Vec::new();
        if let Err(e) = lzma_rs::lzma_compress(&mut definition_json.as_bytes(), &mut definition) {
            warn!("Simulator could not compress its definition: {e}");
        }

        let state = State {
            keymap,
            layout_options: 0,
            macro_buffer: vec![0; config.macro_buffer_size as usize],
            tap_dances: vec![[0; RECORD_SIZE]; config.tap_dance_count as usize],
            combos: vec![[0; RECORD_SIZE]; config.combo_count as usize],
            key_overrides: vec![[0; RECORD_SIZE]; config.key_override_count as usize],
            settings: Settings::defaults(),
            locked: false,
            unlock_in_progress: false,
            unlock_remaining: 0,
            unhandled: HashSet::new(),
            pending: None,
        };

        let info = TransportDeviceInfo {
            vid: 0xFEED,
            pid: 0x0001,
            device_path: "sim:0".to_string(),
            serial: Some("vial:f64c2b3c".to_string()),
            product_name: Some(config.name.clone()),
            manufacturer: Some("Simulator".to_string()),
            is_vial: true,
        };

        Self {
            config,
            info,
            definition,
            state: Mutex::new(state),
            open: AtomicBool::new(true),
            volatile: AtomicBool::new(false),
            unplugged: AtomicBool::new(false),
            reports: AtomicUsize::new(0),
        }
    }

    /// Engage or release the Vial security lock
    pub fn set_locked(&self, locked: bool) {
        let mut state = self.state.lock();
        state.locked = locked;
        state.unlock_in_progress = false;
    }

    /// Report writes as RAM-only
    pub fn set_volatile(&self, volatile: bool) {
        self.volatile.store(volatile, Ordering::SeqCst);
    }

    /// Answer `command` with the unhandled marker from now on
    pub fn set_unhandled(&self, command: u8) {
        self.state.lock().unhandled.insert(command);
    }

    /// Accept traffic again after `close`, keeping all firmware state
    pub fn reopen(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Every further exchange fails as if the cable were pulled
    pub fn unplug(&self) {
        self.unplugged.store(true, Ordering::SeqCst);
    }

    /// Output reports received so far
    pub fn reports_sent(&self) -> usize {
        self.reports.load(Ordering::SeqCst)
    }

    pub fn keycode(&self, layer: usize, row: usize, col: usize) -> u16 {
        let keys = self.config.rows as usize * self.config.cols as usize;
        self.state.lock().keymap[layer * keys + row * self.config.cols as usize + col]
    }

    pub fn macro_buffer(&self) -> Vec<u8> {
        self.state.lock().macro_buffer.clone()
    }

    pub fn combo_record(&self, index: usize) -> Vec<u8> {
        self.state.lock().combos[index].to_vec()
    }

    pub fn tap_dance_record(&self, index: usize) -> Vec<u8> {
        self.state.lock().tap_dances[index].to_vec()
    }

    pub fn key_override_record(&self, index: usize) -> Vec<u8> {
        self.state.lock().key_overrides[index].to_vec()
    }

    pub fn setting(&self, qsid: u16) -> Option<u32> {
        self.state.lock().settings.values.get(&qsid).copied()
    }

    fn dynamic_supported(&self) -> bool {
        self.config.vial_protocol >= crate::VIAL_PROTOCOL_DYNAMIC
    }

    fn settings_supported(&self) -> bool {
        self.config.qmk_settings && self.config.vial_protocol >= crate::VIAL_PROTOCOL_QMK_SETTINGS
    }

    /// Firmware dispatch: `req` is the 32-byte report after the report id
    fn handle(&self, state: &mut State, req: &[u8]) -> Vec<u8> {
        let mut resp = req.to_vec();
        resp.resize(RESPONSE_SIZE, 0);
        let command = req[0];
        let unhandled = |mut resp: Vec<u8>| {
            resp[0] = cmd::UNHANDLED;
            resp
        };
        if state.unhandled.contains(&command) {
            return unhandled(resp);
        }

        match command {
            cmd::GET_PROTOCOL_VERSION => {
                resp[1..3].copy_from_slice(&self.config.via_protocol.to_be_bytes());
            }
            cmd::GET_KEYBOARD_VALUE if req[1] == keyboard_value::LAYOUT_OPTIONS => {
                resp[2..6].copy_from_slice(&state.layout_options.to_be_bytes());
            }
            cmd::SET_KEYBOARD_VALUE if req[1] == keyboard_value::LAYOUT_OPTIONS => {
                state.layout_options = u32::from_be_bytes([req[2], req[3], req[4], req[5]]);
            }
            cmd::DYNAMIC_KEYMAP_GET_KEYCODE => {
                let code = self.key_index(req[1], req[2], req[3]).map_or(0, |i| state.keymap[i]);
                resp[4..6].copy_from_slice(&code.to_be_bytes());
            }
            cmd::DYNAMIC_KEYMAP_SET_KEYCODE => {
                if let Some(i) = self.key_index(req[1], req[2], req[3]) {
                    state.keymap[i] = u16::from_be_bytes([req[4], req[5]]);
                }
            }
            cmd::MACRO_GET_COUNT => resp[1] = self.config.macro_count,
            cmd::MACRO_GET_BUFFER_SIZE => {
                resp[1..3].copy_from_slice(&self.config.macro_buffer_size.to_be_bytes());
            }
            cmd::MACRO_GET_BUFFER => {
                let (offset, size) = (u16::from_be_bytes([req[1], req[2]]) as usize, req[3] as usize);
                for i in 0..size.min(28) {
                    resp[4 + i] = state.macro_buffer.get(offset + i).copied().unwrap_or(0);
                }
            }
            cmd::MACRO_SET_BUFFER => {
                if state.locked {
                    return unhandled(resp);
                }
                let (offset, size) = (u16::from_be_bytes([req[1], req[2]]) as usize, req[3] as usize);
                for i in 0..size.min(28) {
                    if let Some(b) = state.macro_buffer.get_mut(offset + i) {
                        *b = req[4 + i];
                    }
                }
            }
            cmd::MACRO_RESET => state.macro_buffer.iter_mut().for_each(|b| *b = 0),
            cmd::GET_LAYER_COUNT => resp[1] = self.config.layers,
            cmd::KEYMAP_GET_BUFFER => {
                let (offset, size) = (u16::from_be_bytes([req[1], req[2]]) as usize, req[3] as usize);
                for i in 0..size.min(28) {
                    let byte_index = offset + i;
                    let code = state.keymap.get(byte_index / 2).copied().unwrap_or(0);
                    resp[4 + i] = code.to_be_bytes()[byte_index % 2];
                }
            }
            cmd::KEYMAP_SET_BUFFER => {
                let (offset, size) = (u16::from_be_bytes([req[1], req[2]]) as usize, req[3] as usize);
                for i in 0..size.min(28) {
                    let byte_index = offset + i;
                    if let Some(code) = state.keymap.get_mut(byte_index / 2) {
                        let mut bytes = code.to_be_bytes();
                        bytes[byte_index % 2] = req[4 + i];
                        *code = u16::from_be_bytes(bytes);
                    }
                }
            }
            cmd::VIAL_PREFIX => return self.handle_vial(state, &req[1..]),
            _ => return unhandled(resp),
        }
        resp
    }

    fn handle_vial(&self, state: &mut State, req: &[u8]) -> Vec<u8> {
        let mut resp = vec![0u8; RESPONSE_SIZE];
        let unsupported = || vec![0xFFu8; RESPONSE_SIZE];
        let u16_at = |i: usize| u16::from_le_bytes([req[i], req[i + 1]]);

        match req[0] {
            vial::GET_KEYBOARD_ID => {
                resp[0..4].copy_from_slice(&self.config.vial_protocol.to_le_bytes());
                resp[4..12].copy_from_slice(&0x5EED_CAFE_F00D_0001u64.to_le_bytes());
            }
            vial::GET_SIZE => {
                resp[0..4].copy_from_slice(&(self.definition.len() as u32).to_le_bytes());
            }
            vial::GET_DEFINITION => {
                let page = u32::from_le_bytes([req[1], req[2], req[3], req[4]]) as usize;
                let start = page * vial::DEFINITION_PAGE_SIZE;
                for (i, slot) in resp.iter_mut().enumerate() {
                    *slot = self.definition.get(start + i).copied().unwrap_or(0);
                }
            }
            vial::GET_UNLOCK_STATUS => {
                resp[0] = u8::from(!state.locked);
                resp[1] = u8::from(state.unlock_in_progress);
                resp[2..].iter_mut().for_each(|b| *b = 0xFF);
                for (i, (row, col)) in UNLOCK_KEYS.iter().enumerate() {
                    resp[2 + i * 2] = *row;
                    resp[3 + i * 2] = *col;
                }
            }
            vial::UNLOCK_START => {
                state.unlock_in_progress = true;
                state.unlock_remaining = UNLOCK_HOLD_POLLS;
            }
            vial::UNLOCK_POLL => {
                if state.unlock_in_progress {
                    state.unlock_remaining = state.unlock_remaining.saturating_sub(1);
                    if state.unlock_remaining == 0 {
                        state.locked = false;
                        state.unlock_in_progress = false;
                    }
                }
                resp[0] = u8::from(!state.locked);
                resp[1] = u8::from(state.unlock_in_progress);
                resp[2] = state.unlock_remaining;
            }
            vial::LOCK => {
                state.locked = true;
                state.unlock_in_progress = false;
            }
            vial::QMK_SETTINGS_QUERY => {
                if !self.settings_supported() {
                    return unsupported();
                }
                let after = u16_at(1);
                let mut ids = state
                    .settings
                    .widths
                    .keys()
                    .copied()
                    .filter(|&q| q > after)
                    .chain(std::iter::repeat(0xFFFF));
                for chunk in resp.chunks_exact_mut(2) {
                    let qsid = ids.next().unwrap_or(0xFFFF);
                    chunk.copy_from_slice(&qsid.to_le_bytes());
                }
            }
            vial::QMK_SETTINGS_GET => {
                if !self.settings_supported() {
                    return unsupported();
                }
                let qsid = u16_at(1);
                match state.settings.values.get(&qsid) {
                    Some(value) => resp[1..5].copy_from_slice(&value.to_le_bytes()),
                    None => resp[0] = 1,
                }
            }
            vial::QMK_SETTINGS_SET => {
                if !self.settings_supported() {
                    return unsupported();
                }
                let qsid = u16_at(1);
                match state.settings.widths.get(&qsid) {
                    Some(&width) => {
                        let mut raw = [0u8; 4];
                        raw[..width as usize].copy_from_slice(&req[3..3 + width as usize]);
                        state.settings.values.insert(qsid, u32::from_le_bytes(raw));
                    }
                    None => resp[0] = 1,
                }
            }
            vial::QMK_SETTINGS_RESET => {
                if !self.settings_supported() {
                    return unsupported();
                }
                state.settings = Settings::defaults();
            }
            vial::DYNAMIC_ENTRY_OP => {
                if !self.dynamic_supported() {
                    return unsupported();
                }
                return Self::handle_dynamic(state, &req[1..]);
            }
            _ => return unsupported(),
        }
        resp
    }

    fn handle_dynamic(state: &mut State, req: &[u8]) -> Vec<u8> {
        let mut resp = vec![0u8; RESPONSE_SIZE];
        let op = req[0];
        if op == dynamic::GET_NUMBER_OF_ENTRIES {
            resp[0] = state.tap_dances.len() as u8;
            resp[1] = state.combos.len() as u8;
            resp[2] = state.key_overrides.len() as u8;
            return resp;
        }

        let table = match op {
            dynamic::TAP_DANCE_GET | dynamic::TAP_DANCE_SET => &mut state.tap_dances,
            dynamic::COMBO_GET | dynamic::COMBO_SET => &mut state.combos,
            dynamic::KEY_OVERRIDE_GET | dynamic::KEY_OVERRIDE_SET => &mut state.key_overrides,
            _ => return vec![0xFF; RESPONSE_SIZE],
        };
        let is_get = matches!(
            op,
            dynamic::TAP_DANCE_GET | dynamic::COMBO_GET | dynamic::KEY_OVERRIDE_GET
        );
        let Some(record) = table.get_mut(req[1] as usize) else {
            resp[0] = 1;
            return resp;
        };
        if is_get {
            resp[1..1 + RECORD_SIZE].copy_from_slice(record);
        } else {
            record.copy_from_slice(&req[2..2 + RECORD_SIZE]);
        }
        resp
    }

    fn key_index(&self, layer: u8, row: u8, col: u8) -> Option<usize> {
        let c = &self.config;
        (layer < c.layers && row < c.rows && col < c.cols).then(|| {
            (layer as usize * c.rows as usize + row as usize) * c.cols as usize + col as usize
        })
    }
}

impl Transport for SimulatedKeyboard {
    fn write_report(&self, report: &[u8]) -> Result<(), TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        if self.unplugged.load(Ordering::SeqCst) {
            return Err(TransportError::HidError("device unplugged".to_string()));
        }
        self.reports.fetch_add(1, Ordering::SeqCst);
        let mut req = report.get(1..).unwrap_or(&[]).to_vec();
        req.resize(RESPONSE_SIZE, 0);
        let mut state = self.state.lock();
        let resp = self.handle(&mut state, &req);
        state.pending = Some(resp);
        Ok(())
    }

    fn read_report(&self) -> Result<Vec<u8>, TransportError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected);
        }
        self.state
            .lock()
            .pending
            .take()
            .ok_or(TransportError::Timeout(0))
    }

    fn device_info(&self) -> &TransportDeviceInfo {
        &self.info
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    fn close(&self) -> Result<(), TransportError> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_volatile(&self) -> bool {
        self.volatile.load(Ordering::SeqCst)
    }
}
