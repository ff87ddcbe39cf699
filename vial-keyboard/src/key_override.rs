//! Key-override records
//!
//! Definition syntax (comma-separated, any order):
//!
//! ```text
//! TRIGGER(KC_BSPC), REPLACEMENT(KC_DEL), TRIGGER_MODS(LSFT),
//! LAYERS(0|2), SUPPRESSED_MODS(LSFT), OPTIONS(ONE_MOD), DISABLED
//! ```
//!
//! `LAYERS(ALL)` (the default) is the 0xFFFF mask. Omitted modifier masks
//! are 0; omitted options default to "activate on trigger down, on required
//! mod down and on negative mod up".

use std::fmt;

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::CodecError;
use crate::keycode::{KeyCode, KeyNames, KC_NO};
use crate::tokens::{split_call, split_top_level};

/// Option bits (`ko_option_t` in QMK)
pub mod options {
    pub const ACTIVATION_TRIGGER_DOWN: u8 = 0x01;
    pub const ACTIVATION_REQUIRED_MOD_DOWN: u8 = 0x02;
    pub const ACTIVATION_NEGATIVE_MOD_UP: u8 = 0x04;
    pub const ONE_MOD: u8 = 0x08;
    pub const NO_REREGISTER_TRIGGER: u8 = 0x10;
    pub const NO_UNREGISTER_ON_OTHER_KEY_DOWN: u8 = 0x20;
    pub const ENABLED: u8 = 0x80;

    pub const DEFAULT_ACTIVATION: u8 =
        ACTIVATION_TRIGGER_DOWN | ACTIVATION_REQUIRED_MOD_DOWN | ACTIVATION_NEGATIVE_MOD_UP;

    pub(crate) const NAMES: &[(&str, u8)] = &[
        ("TRIGGER_DOWN", ACTIVATION_TRIGGER_DOWN),
        ("REQUIRED_MOD_DOWN", ACTIVATION_REQUIRED_MOD_DOWN),
        ("NEGATIVE_MOD_UP", ACTIVATION_NEGATIVE_MOD_UP),
        ("ONE_MOD", ONE_MOD),
        ("NO_REREGISTER_TRIGGER", NO_REREGISTER_TRIGGER),
        ("NO_UNREGISTER_ON_OTHER_KEY_DOWN", NO_UNREGISTER_ON_OTHER_KEY_DOWN),
    ];
}

/// Eight-bit modifier masks used by key overrides (one bit per modifier)
pub mod mods {
    pub(crate) const NAMES: &[(&str, u8)] = &[
        ("LCTL", 0x01),
        ("LSFT", 0x02),
        ("LALT", 0x04),
        ("LGUI", 0x08),
        ("RCTL", 0x10),
        ("RSFT", 0x20),
        ("RALT", 0x40),
        ("RGUI", 0x80),
    ];
}

pub const ALL_LAYERS: u16 = 0xFFFF;

/// Dynamic-entry wire record, `<HHHBBBB>`
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct KeyOverrideEntry {
    pub trigger: U16,
    pub replacement: U16,
    pub layers: U16,
    pub trigger_mods: u8,
    pub negative_mod_mask: u8,
    pub suppressed_mods: u8,
    pub options: u8,
}

pub const KEY_OVERRIDE_ENTRY_SIZE: usize = std::mem::size_of::<KeyOverrideEntry>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyOverride {
    pub trigger: KeyCode,
    pub replacement: KeyCode,
    pub layers: u16,
    pub trigger_mods: u8,
    pub negative_mods: u8,
    pub suppressed_mods: u8,
    pub options: u8,
}

impl KeyOverride {
    /// Zeroed record, the deleted state
    pub fn empty() -> Self {
        Self::default()
    }

    /// No keys assigned.
    ///
    /// Options, masks and the enabled bit are ignored: firmware never fires
    /// an override without keys, so such a slot is free for `add`.
    pub fn is_empty(&self) -> bool {
        self.trigger == KC_NO && self.replacement == KC_NO
    }

    pub fn enabled(&self) -> bool {
        self.options & options::ENABLED != 0
    }

    /// Parse a definition; `TRIGGER` and `REPLACEMENT` are required
    pub fn parse(s: &str, names: &dyn KeyNames) -> Result<Self, CodecError> {
        if s.trim().is_empty() {
            return Err(CodecError::Empty);
        }

        let mut trigger = None;
        let mut replacement = None;
        let mut layers = None;
        let mut trigger_mods = None;
        let mut negative_mods = None;
        let mut suppressed_mods = None;
        let mut activation = None;
        let mut enabled = None;

        for token in split_top_level(s) {
            let upper = token.to_ascii_uppercase();
            if upper == "ENABLED" || upper == "DISABLED" {
                set_once(&mut enabled, upper == "ENABLED", token)?;
                continue;
            }
            let (name, arg) =
                split_call(token).ok_or_else(|| CodecError::InvalidToken(token.to_string()))?;
            match name.as_str() {
                "TRIGGER" => set_once(&mut trigger, names.parse(arg)?, token)?,
                "REPLACEMENT" => set_once(&mut replacement, names.parse(arg)?, token)?,
                "LAYERS" => set_once(&mut layers, parse_layers(arg)?, token)?,
                "TRIGGER_MODS" => set_once(&mut trigger_mods, parse_mods(arg)?, token)?,
                "NEGATIVE_MODS" => set_once(&mut negative_mods, parse_mods(arg)?, token)?,
                "SUPPRESSED_MODS" => set_once(&mut suppressed_mods, parse_mods(arg)?, token)?,
                "OPTIONS" => set_once(&mut activation, parse_options(arg)?, token)?,
                _ => return Err(CodecError::InvalidToken(token.to_string())),
            }
        }

        let trigger =
            trigger.ok_or_else(|| CodecError::InvalidToken(format!("{s} (missing TRIGGER)")))?;
        let replacement = replacement
            .ok_or_else(|| CodecError::InvalidToken(format!("{s} (missing REPLACEMENT)")))?;
        let mut opts = activation.unwrap_or(options::DEFAULT_ACTIVATION);
        if enabled.unwrap_or(true) {
            opts |= options::ENABLED;
        }

        Ok(Self {
            trigger,
            replacement,
            layers: layers.unwrap_or(ALL_LAYERS),
            trigger_mods: trigger_mods.unwrap_or(0),
            negative_mods: negative_mods.unwrap_or(0),
            suppressed_mods: suppressed_mods.unwrap_or(0),
            options: opts,
        })
    }

    pub fn describe(&self, names: &dyn KeyNames) -> String {
        let mut parts = vec![
            format!("TRIGGER({})", names.stringify(self.trigger)),
            format!("REPLACEMENT({})", names.stringify(self.replacement)),
            format!("LAYERS({})", LayerMask(self.layers)),
        ];
        for (label, mask) in [
            ("TRIGGER_MODS", self.trigger_mods),
            ("NEGATIVE_MODS", self.negative_mods),
            ("SUPPRESSED_MODS", self.suppressed_mods),
        ] {
            if mask != 0 {
                parts.push(format!("{label}({})", describe_mask(mods::NAMES, mask)));
            }
        }
        let activation = self.options & !options::ENABLED;
        if activation != 0 {
            parts.push(format!(
                "OPTIONS({})",
                describe_mask(options::NAMES, activation)
            ));
        }
        parts.push(if self.enabled() { "ENABLED" } else { "DISABLED" }.to_string());
        parts.join(", ")
    }

    pub fn to_wire(&self) -> KeyOverrideEntry {
        KeyOverrideEntry {
            trigger: U16::new(self.trigger),
            replacement: U16::new(self.replacement),
            layers: U16::new(self.layers),
            trigger_mods: self.trigger_mods,
            negative_mod_mask: self.negative_mods,
            suppressed_mods: self.suppressed_mods,
            options: self.options,
        }
    }

    pub fn from_wire(entry: &KeyOverrideEntry) -> Self {
        Self {
            trigger: entry.trigger.get(),
            replacement: entry.replacement.get(),
            layers: entry.layers.get(),
            trigger_mods: entry.trigger_mods,
            negative_mods: entry.negative_mod_mask,
            suppressed_mods: entry.suppressed_mods,
            options: entry.options,
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (entry, _) = KeyOverrideEntry::read_from_prefix(bytes).ok()?;
        Some(Self::from_wire(&entry))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_wire().as_bytes().to_vec()
    }
}

fn set_once<T>(slot: &mut Option<T>, value: T, token: &str) -> Result<(), CodecError> {
    if slot.is_some() {
        return Err(CodecError::DuplicateToken(token.to_string()));
    }
    *slot = Some(value);
    Ok(())
}

/// `ALL`, or layer numbers 0-15 joined by `|`
fn parse_layers(arg: &str) -> Result<u16, CodecError> {
    let arg = arg.trim();
    if arg.eq_ignore_ascii_case("ALL") {
        return Ok(ALL_LAYERS);
    }
    if arg.eq_ignore_ascii_case("NONE") {
        return Ok(0);
    }
    let mut mask = 0u16;
    for part in arg.split('|') {
        let layer: u8 = part
            .trim()
            .parse()
            .ok()
            .filter(|&l| l < 16)
            .ok_or_else(|| CodecError::InvalidToken(format!("LAYERS({arg})")))?;
        mask |= 1 << layer;
    }
    Ok(mask)
}

fn parse_mask(arg: &str, table: &[(&str, u8)], label: &str) -> Result<u8, CodecError> {
    let arg = arg.trim();
    if arg.is_empty() || arg.eq_ignore_ascii_case("NONE") {
        return Ok(0);
    }
    let mut mask = 0u8;
    for part in arg.split('|') {
        let part = part.trim().to_ascii_uppercase();
        let (_, bit) = table
            .iter()
            .find(|(name, _)| *name == part)
            .ok_or_else(|| CodecError::InvalidToken(format!("{label}({arg})")))?;
        mask |= bit;
    }
    Ok(mask)
}

fn parse_mods(arg: &str) -> Result<u8, CodecError> {
    parse_mask(arg, mods::NAMES, "MODS")
}

fn parse_options(arg: &str) -> Result<u8, CodecError> {
    parse_mask(arg, options::NAMES, "OPTIONS")
}

fn describe_mask(table: &[(&str, u8)], mask: u8) -> String {
    table
        .iter()
        .filter(|(_, bit)| mask & bit != 0)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join("|")
}

/// Layer bitmask display: `ALL` or `0|2|5`
pub struct LayerMask(pub u16);

impl fmt::Display for LayerMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == ALL_LAYERS {
            return write!(f, "ALL");
        }
        let layers: Vec<String> = (0..16)
            .filter(|l| self.0 & (1 << l) != 0)
            .map(|l| l.to_string())
            .collect();
        if layers.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", layers.join("|"))
        }
    }
}
