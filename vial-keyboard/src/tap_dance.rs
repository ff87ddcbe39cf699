//! Tap-dance records
//!
//! Definition syntax: comma-separated `TAP(k)`, `HOLD(k)`, `DOUBLE(k)`,
//! `TAPHOLD(k)` and `TERM(ms)` in any order, e.g.
//! `TAP(KC_A),HOLD(KC_LCTL),TERM(180)`.

use zerocopy::byteorder::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::CodecError;
use crate::keycode::{KeyCode, KeyNames, KC_NO};
use crate::tokens::{split_call, split_top_level};

/// Tapping term used when a definition does not set one
pub const DEFAULT_TAPPING_TERM: u16 = 200;

/// Dynamic-entry wire record, `<HHHHH>`
#[derive(Debug, Clone, Copy, IntoBytes, FromBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct TapDanceEntry {
    pub on_tap: U16,
    pub on_hold: U16,
    pub on_double_tap: U16,
    pub on_tap_hold: U16,
    pub tapping_term: U16,
}

pub const TAP_DANCE_ENTRY_SIZE: usize = std::mem::size_of::<TapDanceEntry>();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TapDance {
    pub tap: KeyCode,
    pub hold: KeyCode,
    pub double_tap: KeyCode,
    pub tap_hold: KeyCode,
    pub tapping_term: u16,
}

impl TapDance {
    /// All keys `KC_NO`, term 0
    pub fn empty() -> Self {
        Self::default()
    }

    /// No key action assigned; the term alone does not count
    pub fn is_empty(&self) -> bool {
        [self.tap, self.hold, self.double_tap, self.tap_hold]
            .iter()
            .all(|&k| k == KC_NO)
    }

    /// Parse a definition. An empty string yields the cleared record.
    pub fn parse(s: &str, names: &dyn KeyNames) -> Result<Self, CodecError> {
        if s.trim().is_empty() {
            return Ok(Self::empty());
        }

        let mut tap = None;
        let mut hold = None;
        let mut double_tap = None;
        let mut tap_hold = None;
        let mut term = None;

        for token in split_top_level(s) {
            let (name, arg) =
                split_call(token).ok_or_else(|| CodecError::InvalidToken(token.to_string()))?;
            let slot = match name.as_str() {
                "TAP" => &mut tap,
                "HOLD" => &mut hold,
                "DOUBLE" => &mut double_tap,
                "TAPHOLD" => &mut tap_hold,
                "TERM" => {
                    if term.is_some() {
                        return Err(CodecError::DuplicateToken(token.to_string()));
                    }
                    let ms: u16 = arg
                        .trim()
                        .parse()
                        .map_err(|_| CodecError::InvalidDelay(arg.trim().to_string()))?;
                    term = Some(ms);
                    continue;
                }
                _ => return Err(CodecError::InvalidToken(token.to_string())),
            };
            if slot.is_some() {
                return Err(CodecError::DuplicateToken(token.to_string()));
            }
            *slot = Some(names.parse(arg)?);
        }

        let record = Self {
            tap: tap.unwrap_or(KC_NO),
            hold: hold.unwrap_or(KC_NO),
            double_tap: double_tap.unwrap_or(KC_NO),
            tap_hold: tap_hold.unwrap_or(KC_NO),
            tapping_term: term.unwrap_or(DEFAULT_TAPPING_TERM),
        };
        if record.is_empty() {
            return Err(CodecError::MissingKeyAction(s.trim().to_string()));
        }
        Ok(record)
    }

    /// Render assigned actions plus the term
    pub fn describe(&self, names: &dyn KeyNames) -> String {
        let mut parts: Vec<String> = [
            ("TAP", self.tap),
            ("HOLD", self.hold),
            ("DOUBLE", self.double_tap),
            ("TAPHOLD", self.tap_hold),
        ]
        .iter()
        .filter(|(_, k)| *k != KC_NO)
        .map(|(name, k)| format!("{name}({})", names.stringify(*k)))
        .collect();
        parts.push(format!("TERM({})", self.tapping_term));
        parts.join(", ")
    }

    pub fn to_wire(&self) -> TapDanceEntry {
        TapDanceEntry {
            on_tap: U16::new(self.tap),
            on_hold: U16::new(self.hold),
            on_double_tap: U16::new(self.double_tap),
            on_tap_hold: U16::new(self.tap_hold),
            tapping_term: U16::new(self.tapping_term),
        }
    }

    pub fn from_wire(entry: &TapDanceEntry) -> Self {
        Self {
            tap: entry.on_tap.get(),
            hold: entry.on_hold.get(),
            double_tap: entry.on_double_tap.get(),
            tap_hold: entry.on_tap_hold.get(),
            tapping_term: entry.tapping_term.get(),
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (entry, _) = TapDanceEntry::read_from_prefix(bytes).ok()?;
        Some(Self::from_wire(&entry))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_wire().as_bytes().to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycode::QmkKeycodes;

    fn names() -> &'static QmkKeycodes {
        QmkKeycodes::builtin()
    }

    #[test]
    fn test_parse_any_order_with_default_term() {
        let td = TapDance::parse("HOLD(KC_LCTL), TAP(KC_A)", names()).unwrap();
        assert_eq!(td.tap, 0x04);
        assert_eq!(td.hold, 0xE0);
        assert_eq!(td.double_tap, KC_NO);
        assert_eq!(td.tapping_term, DEFAULT_TAPPING_TERM);

        let td = TapDance::parse("term(150),double(KC_ESC)", names()).unwrap();
        assert_eq!(td.double_tap, 0x29);
        assert_eq!(td.tapping_term, 150);
    }

    #[test]
    fn test_empty_string_clears() {
        let td = TapDance::parse("", names()).unwrap();
        assert_eq!(td, TapDance::empty());
        assert!(td.is_empty());
    }

    #[test]
    fn test_term_only_is_rejected() {
        assert!(matches!(
            TapDance::parse("TERM(100)", names()),
            Err(CodecError::MissingKeyAction(_))
        ));
    }

    #[test]
    fn test_invalid_and_duplicate_tokens() {
        assert_eq!(
            TapDance::parse("TAP(KC_A),SPIN(KC_B)", names()),
            Err(CodecError::InvalidToken("SPIN(KC_B)".into()))
        );
        assert_eq!(
            TapDance::parse("TAP(KC_A),TAP(KC_B)", names()),
            Err(CodecError::DuplicateToken("TAP(KC_B)".into()))
        );
        assert!(matches!(
            TapDance::parse("TAP(KC_A),TERM(fast)", names()),
            Err(CodecError::InvalidDelay(_))
        ));
        assert_eq!(
            TapDance::parse("TAP(KC_QQ)", names()),
            Err(CodecError::InvalidKey("KC_QQ".into()))
        );
    }

    #[test]
    fn test_deleted_record_wire_form() {
        assert_eq!(TapDance::empty().to_bytes(), vec![0u8; TAP_DANCE_ENTRY_SIZE]);
        let td = TapDance::from_bytes(&[0u8; 10]).unwrap();
        assert!(td.is_empty());
        assert_eq!(td.tapping_term, 0);
    }

    #[test]
    fn test_wire_layout_and_describe() {
        let td = TapDance::parse("TAP(KC_A),TAPHOLD(MO(1)),TERM(300)", names()).unwrap();
        assert_eq!(
            td.to_bytes(),
            vec![0x04, 0x00, 0x00, 0x00, 0x00, 0x00, 0x21, 0x52, 0x2C, 0x01]
        );
        assert_eq!(td.describe(names()), "TAP(KC_A), TAPHOLD(MO(1)), TERM(300)");
    }
}
