//! Combo records
//!
//! A combo is four trigger keys (unused positions hold `KC_NO`) and one
//! output key. The combo term is a global QMK setting, not part of the record.
//!
//! Definition syntax: `KC_A+KC_S KC_D` (triggers joined by `+`, whitespace,
//! output key).

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::CodecError;
use crate::keycode::{KeyCode, KeyNames, KC_NO};

/// Trigger positions per combo (firmware limit)
pub const COMBO_TRIGGERS: usize = 4;

/// Dynamic-entry wire record, `<HHHHH>`
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ComboEntry {
    pub triggers: [U16; COMBO_TRIGGERS],
    pub output: U16,
}

/// Size of [`ComboEntry`] on the wire
pub const COMBO_ENTRY_SIZE: usize = std::mem::size_of::<ComboEntry>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Combo {
    pub triggers: [KeyCode; COMBO_TRIGGERS],
    pub output: KeyCode,
}

impl Combo {
    /// All-`KC_NO`, the deleted state
    pub fn empty() -> Self {
        Self::default()
    }

    /// No first trigger, or no output.
    ///
    /// Firmware reads triggers up to the first `KC_NO`, so a record whose
    /// first position is `KC_NO` never fires whatever follows it.
    pub fn is_empty(&self) -> bool {
        self.triggers[0] == KC_NO || self.output == KC_NO
    }

    /// Trigger keys the firmware sees, in slot order
    pub fn trigger_keys(&self) -> impl Iterator<Item = KeyCode> + '_ {
        self.triggers.iter().copied().take_while(|&k| k != KC_NO)
    }

    /// Parse `KC_A+KC_S KC_D`
    pub fn parse(s: &str, names: &dyn KeyNames) -> Result<Self, CodecError> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let [trigger_group, output] = parts.as_slice() else {
            return Err(CodecError::InvalidToken(s.trim().to_string()));
        };

        let trigger_names: Vec<&str> = trigger_group.split('+').collect();
        if trigger_names.len() > COMBO_TRIGGERS {
            return Err(CodecError::TooManyTriggers(trigger_group.to_string()));
        }
        let mut triggers = [KC_NO; COMBO_TRIGGERS];
        for (slot, name) in triggers.iter_mut().zip(&trigger_names) {
            if name.is_empty() {
                return Err(CodecError::InvalidToken(trigger_group.to_string()));
            }
            *slot = names.parse(name)?;
        }
        if triggers.iter().all(|&k| k == KC_NO) {
            return Err(CodecError::NoTriggers(trigger_group.to_string()));
        }
        // KC_NO ends the trigger list on the keyboard
        if let Some(name) = trigger_names
            .iter()
            .zip(&triggers)
            .find_map(|(name, &k)| (k == KC_NO).then_some(name))
        {
            return Err(CodecError::InvalidToken(name.to_string()));
        }

        Ok(Self {
            triggers,
            output: names.parse(output)?,
        })
    }

    /// Render as definition syntax
    pub fn describe(&self, names: &dyn KeyNames) -> String {
        let triggers: Vec<String> = self.trigger_keys().map(|k| names.stringify(k)).collect();
        format!("{} {}", triggers.join("+"), names.stringify(self.output))
    }

    /// Wire form `[t1, t2, t3, t4, output]`
    pub fn to_wire(&self) -> ComboEntry {
        ComboEntry {
            triggers: self.triggers.map(U16::new),
            output: U16::new(self.output),
        }
    }

    pub fn from_wire(entry: &ComboEntry) -> Self {
        Self {
            triggers: entry.triggers.map(|k| k.get()),
            output: entry.output.get(),
        }
    }

    /// Decode from the start of a response payload
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (entry, _) = ComboEntry::read_from_prefix(bytes).ok()?;
        Some(Self::from_wire(&entry))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_wire().as_bytes().to_vec()
    }
}
