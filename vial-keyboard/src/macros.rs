//! Macro action lists and the dynamic macro buffer codec
//!
//! # Definition syntax
//!
//! ```text
//! DELAY(50),TAP(KC_A),TEXT(Hi)
//! DOWN(KC_LSFT),TAP(KC_1),UP(KC_LSFT)
//! ```
//!
//! Action names are case-insensitive. Segments are split on commas outside
//! parentheses, so `TEXT(a,b)` is one action.
//!
//! # Buffer format
//!
//! The firmware stores `macro_count` macros back to back, each terminated by
//! a NUL. Vial protocol 2+ escapes actions with [`SS_QMK_PREFIX`]; earlier
//! firmware uses the bare tap/down/up codes and has no delays.

use tracing::warn;

use crate::error::CodecError;
use crate::keycode::{KeyCode, KeyNames, KC_NO};
use crate::tokens::{split_call, split_top_level};

pub const SS_QMK_PREFIX: u8 = 0x01;
pub const SS_TAP_CODE: u8 = 0x01;
pub const SS_DOWN_CODE: u8 = 0x02;
pub const SS_UP_CODE: u8 = 0x03;
pub const SS_DELAY_CODE: u8 = 0x04;
pub const VIAL_MACRO_EXT_TAP: u8 = 0x05;
pub const VIAL_MACRO_EXT_DOWN: u8 = 0x06;
pub const VIAL_MACRO_EXT_UP: u8 = 0x07;

/// Longest delay the two-byte delay encoding can carry
pub const MAX_DELAY_MS: u32 = 254 * 255 + 254;

/// First Vial protocol with delays and 16-bit key codes in macros
pub const VIAL_PROTOCOL_EXT_MACROS: u32 = 2;

/// One step of a macro
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MacroAction {
    Tap(KeyCode),
    Down(KeyCode),
    Up(KeyCode),
    Delay(u32),
    Text(String),
}

impl MacroAction {
    /// Render as definition syntax, e.g. `TAP(KC_A)`
    pub fn describe(&self, names: &dyn KeyNames) -> String {
        match self {
            Self::Tap(k) => format!("TAP({})", names.stringify(*k)),
            Self::Down(k) => format!("DOWN({})", names.stringify(*k)),
            Self::Up(k) => format!("UP({})", names.stringify(*k)),
            Self::Delay(ms) => format!("DELAY({ms})"),
            Self::Text(s) => format!("TEXT({s})"),
        }
    }
}

/// A macro slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macro {
    pub id: usize,
    pub actions: Vec<MacroAction>,
}

impl Macro {
    pub fn new(id: usize, actions: Vec<MacroAction>) -> Self {
        Self { id, actions }
    }

    /// The canonical deleted/unused state
    pub fn empty(id: usize) -> Self {
        Self {
            id,
            actions: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn describe(&self, names: &dyn KeyNames) -> String {
        self.actions
            .iter()
            .map(|a| a.describe(names))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Parse a macro definition. Any invalid segment fails the whole string.
pub fn parse_actions(s: &str, names: &dyn KeyNames) -> Result<Vec<MacroAction>, CodecError> {
    if s.trim().is_empty() {
        return Err(CodecError::Empty);
    }
    split_top_level(s)
        .into_iter()
        .map(|segment| parse_action(segment, names))
        .collect()
}

fn parse_action(segment: &str, names: &dyn KeyNames) -> Result<MacroAction, CodecError> {
    let (name, arg) =
        split_call(segment).ok_or_else(|| CodecError::InvalidToken(segment.to_string()))?;
    let key = |arg: &str| -> Result<KeyCode, CodecError> {
        let code = names.parse(arg)?;
        if code == KC_NO {
            return Err(CodecError::InvalidKey(arg.trim().to_string()));
        }
        Ok(code)
    };
    match name.as_str() {
        "TAP" => Ok(MacroAction::Tap(key(arg)?)),
        "DOWN" => Ok(MacroAction::Down(key(arg)?)),
        "UP" => Ok(MacroAction::Up(key(arg)?)),
        "DELAY" => {
            let ms: u32 = arg
                .trim()
                .parse()
                .map_err(|_| CodecError::InvalidDelay(arg.trim().to_string()))?;
            if ms > MAX_DELAY_MS {
                return Err(CodecError::InvalidDelay(arg.trim().to_string()));
            }
            Ok(MacroAction::Delay(ms))
        }
        "TEXT" => {
            if arg.is_empty() {
                return Err(CodecError::InvalidToken(segment.to_string()));
            }
            if !arg.chars().all(is_sendable) {
                return Err(CodecError::UnencodableText(arg.to_string()));
            }
            Ok(MacroAction::Text(arg.to_string()))
        }
        _ => Err(CodecError::InvalidToken(segment.to_string())),
    }
}

/// Characters a macro can type: printable ASCII plus tab and newline
fn is_sendable(c: char) -> bool {
    matches!(c, ' '..='~' | '\n' | '\t')
}

/// Encode one macro's actions (without the terminating NUL)
pub fn encode_actions(actions: &[MacroAction], vial_protocol: u32) -> Result<Vec<u8>, CodecError> {
    let extended = vial_protocol >= VIAL_PROTOCOL_EXT_MACROS;
    let mut out = Vec::new();
    for action in actions {
        let (code, key) = match action {
            MacroAction::Text(s) => {
                if !s.chars().all(is_sendable) {
                    return Err(CodecError::UnencodableText(s.clone()));
                }
                out.extend_from_slice(s.as_bytes());
                continue;
            }
            MacroAction::Delay(ms) => {
                if !extended {
                    return Err(CodecError::UnencodableKey(format!("DELAY({ms})")));
                }
                if *ms > MAX_DELAY_MS {
                    return Err(CodecError::InvalidDelay(ms.to_string()));
                }
                out.extend_from_slice(&[
                    SS_QMK_PREFIX,
                    SS_DELAY_CODE,
                    (ms % 255 + 1) as u8,
                    (ms / 255 + 1) as u8,
                ]);
                continue;
            }
            MacroAction::Tap(k) => (SS_TAP_CODE, *k),
            MacroAction::Down(k) => (SS_DOWN_CODE, *k),
            MacroAction::Up(k) => (SS_UP_CODE, *k),
        };

        if key == KC_NO {
            return Err(CodecError::InvalidKey("KC_NO".to_string()));
        }
        if key <= 0xFF {
            if extended {
                out.push(SS_QMK_PREFIX);
            }
            out.extend_from_slice(&[code, key as u8]);
        } else if extended && key < 0xFF01 {
            // the firmware reads 0xFFnn as nn << 8, which keeps NUL out of the low byte
            let wire = if key & 0xFF == 0 { 0xFF00 | (key >> 8) } else { key };
            out.push(SS_QMK_PREFIX);
            out.push(code + (VIAL_MACRO_EXT_TAP - SS_TAP_CODE));
            out.extend_from_slice(&wire.to_le_bytes());
        } else {
            return Err(CodecError::UnencodableKey(format!("0x{key:04X}")));
        }
    }
    Ok(out)
}

/// Decode one macro's bytes (between NULs)
pub fn decode_actions(bytes: &[u8], vial_protocol: u32) -> Result<Vec<MacroAction>, CodecError> {
    let extended = vial_protocol >= VIAL_PROTOCOL_EXT_MACROS;
    let mut actions = Vec::new();
    let mut text = String::new();
    let truncated = || CodecError::InvalidToken(format!("truncated macro data {bytes:02X?}"));
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let is_action = if extended {
            b == SS_QMK_PREFIX
        } else {
            matches!(b, SS_TAP_CODE | SS_DOWN_CODE | SS_UP_CODE)
        };
        if !is_action {
            text.push(b as char);
            i += 1;
            continue;
        }
        if !text.is_empty() {
            actions.push(MacroAction::Text(std::mem::take(&mut text)));
        }

        let (tag, body) = if extended {
            let tag = *bytes.get(i + 1).ok_or_else(truncated)?;
            (tag, i + 2)
        } else {
            (b, i + 1)
        };
        match tag {
            SS_TAP_CODE | SS_DOWN_CODE | SS_UP_CODE => {
                let key = *bytes.get(body).ok_or_else(truncated)? as KeyCode;
                actions.push(key_action(tag, key));
                i = body + 1;
            }
            SS_DELAY_CODE if extended => {
                let raw = bytes.get(body..body + 2).ok_or_else(truncated)?;
                let ms = (raw[0] as u32).saturating_sub(1) + (raw[1] as u32).saturating_sub(1) * 255;
                actions.push(MacroAction::Delay(ms));
                i = body + 2;
            }
            VIAL_MACRO_EXT_TAP | VIAL_MACRO_EXT_DOWN | VIAL_MACRO_EXT_UP if extended => {
                let raw = bytes.get(body..body + 2).ok_or_else(truncated)?;
                let mut key = u16::from_le_bytes([raw[0], raw[1]]);
                if key > 0xFF00 {
                    key = (key & 0xFF) << 8;
                }
                actions.push(key_action(tag - (VIAL_MACRO_EXT_TAP - SS_TAP_CODE), key));
                i = body + 2;
            }
            other => {
                return Err(CodecError::InvalidToken(format!(
                    "unknown macro action 0x{other:02X}"
                )))
            }
        }
    }
    if !text.is_empty() {
        actions.push(MacroAction::Text(text));
    }
    Ok(actions)
}

fn key_action(tag: u8, key: KeyCode) -> MacroAction {
    match tag {
        SS_DOWN_CODE => MacroAction::Down(key),
        SS_UP_CODE => MacroAction::Up(key),
        _ => MacroAction::Tap(key),
    }
}

/// Serialize a full macro table. `macros` may be shorter than `count`; the
/// missing slots are written empty.
pub fn encode_buffer(
    macros: &[Macro],
    count: usize,
    vial_protocol: u32,
    capacity: usize,
) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    for id in 0..count {
        if let Some(m) = macros.get(id) {
            out.extend(encode_actions(&m.actions, vial_protocol)?);
        }
        out.push(0);
    }
    if out.len() > capacity {
        return Err(CodecError::MacroBufferOverflow {
            needed: out.len(),
            capacity,
        });
    }
    Ok(out)
}

/// Split a macro buffer into exactly `count` macros.
///
/// A macro whose bytes cannot be decoded is logged and returned empty so the
/// slot can be rewritten.
pub fn decode_buffer(buf: &[u8], count: usize, vial_protocol: u32) -> Vec<Macro> {
    let mut pieces = buf.split(|&b| b == 0);
    (0..count)
        .map(|id| {
            let bytes = pieces.next().unwrap_or(&[]);
            match decode_actions(bytes, vial_protocol) {
                Ok(actions) => Macro::new(id, actions),
                Err(e) => {
                    warn!("Macro {id} is unreadable ({e}); treating it as empty");
                    Macro::empty(id)
                }
            }
        })
        .collect()
}
