//! QMK key-code names
//!
//! Key codes are 16-bit values. [`KeyNames`] is the lookup seam the rest of
//! the crate uses; [`QmkKeycodes`] is the built-in table covering basic HID
//! usages, modifier wrappers, mod-tap/layer-tap, layer switching, tap-dance
//! and macro keys. Codes without a symbolic name stringify as `0xNNNN`, which
//! `parse` accepts, so every code round-trips.

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::CodecError;

/// A 16-bit QMK key code
pub type KeyCode = u16;

/// "No key assigned"
pub const KC_NO: KeyCode = 0x0000;
/// Fall through to the next active layer
pub const KC_TRNS: KeyCode = 0x0001;

/// Bidirectional key name table
pub trait KeyNames: Send + Sync {
    /// Resolve a key name (or `0xNNNN` literal) to its code
    fn parse(&self, name: &str) -> Result<KeyCode, CodecError>;

    /// Canonical name for a code
    fn stringify(&self, code: KeyCode) -> String;
}

/// QMK keycode ranges (keycode table v6, used by Vial protocol 6+)
pub mod ranges {
    pub const QK_MODS: u16 = 0x0100;
    pub const QK_MODS_MAX: u16 = 0x1FFF;
    pub const QK_MOD_TAP: u16 = 0x2000;
    pub const QK_MOD_TAP_MAX: u16 = 0x3FFF;
    pub const QK_LAYER_TAP: u16 = 0x4000;
    pub const QK_LAYER_TAP_MAX: u16 = 0x4FFF;
    pub const QK_TO: u16 = 0x5200;
    pub const QK_MOMENTARY: u16 = 0x5220;
    pub const QK_DEF_LAYER: u16 = 0x5240;
    pub const QK_TOGGLE_LAYER: u16 = 0x5260;
    pub const QK_ONE_SHOT_LAYER: u16 = 0x5280;
    pub const QK_ONE_SHOT_MOD: u16 = 0x52A0;
    pub const QK_LAYER_TAP_TOGGLE: u16 = 0x52C0;
    pub const QK_TAP_DANCE: u16 = 0x5700;
    pub const QK_MACRO: u16 = 0x7700;
    pub const QK_KB: u16 = 0x7E00;
}

/// Five-bit modifier encoding used inside key codes (bit 4 = right hand)
pub mod mod5 {
    pub const CTRL: u8 = 0x01;
    pub const SHIFT: u8 = 0x02;
    pub const ALT: u8 = 0x04;
    pub const GUI: u8 = 0x08;
    pub const RIGHT: u8 = 0x10;
}

/// (code, canonical name, aliases)
const NAMED: &[(u16, &str, &[&str])] = &[
    (0x00, "KC_NO", &["XXXXXXX"]),
    (0x01, "KC_TRNS", &["KC_TRANSPARENT", "_______"]),
    (0x28, "KC_ENT", &["KC_ENTER"]),
    (0x29, "KC_ESC", &["KC_ESCAPE"]),
    (0x2A, "KC_BSPC", &["KC_BACKSPACE"]),
    (0x2B, "KC_TAB", &[]),
    (0x2C, "KC_SPC", &["KC_SPACE"]),
    (0x2D, "KC_MINS", &["KC_MINUS"]),
    (0x2E, "KC_EQL", &["KC_EQUAL"]),
    (0x2F, "KC_LBRC", &["KC_LEFT_BRACKET"]),
    (0x30, "KC_RBRC", &["KC_RIGHT_BRACKET"]),
    (0x31, "KC_BSLS", &["KC_BACKSLASH"]),
    (0x32, "KC_NUHS", &["KC_NONUS_HASH"]),
    (0x33, "KC_SCLN", &["KC_SEMICOLON"]),
    (0x34, "KC_QUOT", &["KC_QUOTE"]),
    (0x35, "KC_GRV", &["KC_GRAVE"]),
    (0x36, "KC_COMM", &["KC_COMMA"]),
    (0x37, "KC_DOT", &[]),
    (0x38, "KC_SLSH", &["KC_SLASH"]),
    (0x39, "KC_CAPS", &["KC_CAPS_LOCK"]),
    (0x46, "KC_PSCR", &["KC_PRINT_SCREEN"]),
    (0x47, "KC_SCRL", &["KC_SCROLL_LOCK"]),
    (0x48, "KC_PAUS", &["KC_PAUSE"]),
    (0x49, "KC_INS", &["KC_INSERT"]),
    (0x4A, "KC_HOME", &[]),
    (0x4B, "KC_PGUP", &["KC_PAGE_UP"]),
    (0x4C, "KC_DEL", &["KC_DELETE"]),
    (0x4D, "KC_END", &[]),
    (0x4E, "KC_PGDN", &["KC_PAGE_DOWN"]),
    (0x4F, "KC_RGHT", &["KC_RIGHT"]),
    (0x50, "KC_LEFT", &[]),
    (0x51, "KC_DOWN", &[]),
    (0x52, "KC_UP", &[]),
    (0x53, "KC_NUM", &["KC_NUM_LOCK"]),
    (0x54, "KC_PSLS", &["KC_KP_SLASH"]),
    (0x55, "KC_PAST", &["KC_KP_ASTERISK"]),
    (0x56, "KC_PMNS", &["KC_KP_MINUS"]),
    (0x57, "KC_PPLS", &["KC_KP_PLUS"]),
    (0x58, "KC_PENT", &["KC_KP_ENTER"]),
    (0x62, "KC_P0", &["KC_KP_0"]),
    (0x63, "KC_PDOT", &["KC_KP_DOT"]),
    (0x64, "KC_NUBS", &["KC_NONUS_BACKSLASH"]),
    (0x65, "KC_APP", &["KC_APPLICATION"]),
    (0x66, "KC_KB_POWER", &[]),
    (0x67, "KC_PEQL", &["KC_KP_EQUAL"]),
    (0x74, "KC_EXEC", &["KC_EXECUTE"]),
    (0x75, "KC_HELP", &[]),
    (0x76, "KC_MENU", &[]),
    (0x77, "KC_SLCT", &["KC_SELECT"]),
    (0x78, "KC_STOP", &[]),
    (0x79, "KC_AGIN", &["KC_AGAIN"]),
    (0x7A, "KC_UNDO", &[]),
    (0x7B, "KC_CUT", &[]),
    (0x7C, "KC_COPY", &[]),
    (0x7D, "KC_PSTE", &["KC_PASTE"]),
    (0x7E, "KC_FIND", &[]),
    (0x7F, "KC_KB_MUTE", &[]),
    (0x80, "KC_KB_VOLUME_UP", &[]),
    (0x81, "KC_KB_VOLUME_DOWN", &[]),
    (0x85, "KC_PCMM", &["KC_KP_COMMA"]),
    (0xA5, "KC_PWR", &["KC_SYSTEM_POWER"]),
    (0xA6, "KC_SLEP", &["KC_SYSTEM_SLEEP"]),
    (0xA7, "KC_WAKE", &["KC_SYSTEM_WAKE"]),
    (0xA8, "KC_MUTE", &["KC_AUDIO_MUTE"]),
    (0xA9, "KC_VOLU", &["KC_AUDIO_VOL_UP"]),
    (0xAA, "KC_VOLD", &["KC_AUDIO_VOL_DOWN"]),
    (0xAB, "KC_MNXT", &["KC_MEDIA_NEXT_TRACK"]),
    (0xAC, "KC_MPRV", &["KC_MEDIA_PREV_TRACK"]),
    (0xAD, "KC_MSTP", &["KC_MEDIA_STOP"]),
    (0xAE, "KC_MPLY", &["KC_MEDIA_PLAY_PAUSE"]),
    (0xAF, "KC_MSEL", &["KC_MEDIA_SELECT"]),
    (0xB0, "KC_EJCT", &["KC_MEDIA_EJECT"]),
    (0xB1, "KC_MAIL", &[]),
    (0xB2, "KC_CALC", &["KC_CALCULATOR"]),
    (0xB3, "KC_MYCM", &["KC_MY_COMPUTER"]),
    (0xB4, "KC_WSCH", &["KC_WWW_SEARCH"]),
    (0xB5, "KC_WHOM", &["KC_WWW_HOME"]),
    (0xB6, "KC_WBAK", &["KC_WWW_BACK"]),
    (0xB7, "KC_WFWD", &["KC_WWW_FORWARD"]),
    (0xB8, "KC_WSTP", &["KC_WWW_STOP"]),
    (0xB9, "KC_WREF", &["KC_WWW_REFRESH"]),
    (0xBA, "KC_WFAV", &["KC_WWW_FAVORITES"]),
    (0xBB, "KC_MFFD", &["KC_MEDIA_FAST_FORWARD"]),
    (0xBC, "KC_MRWD", &["KC_MEDIA_REWIND"]),
    (0xBD, "KC_BRIU", &["KC_BRIGHTNESS_UP"]),
    (0xBE, "KC_BRID", &["KC_BRIGHTNESS_DOWN"]),
    (0xCD, "KC_MS_U", &["KC_MS_UP"]),
    (0xCE, "KC_MS_D", &["KC_MS_DOWN"]),
    (0xCF, "KC_MS_L", &["KC_MS_LEFT"]),
    (0xD0, "KC_MS_R", &["KC_MS_RIGHT"]),
    (0xD9, "KC_WH_U", &["KC_MS_WH_UP"]),
    (0xDA, "KC_WH_D", &["KC_MS_WH_DOWN"]),
    (0xDB, "KC_WH_L", &["KC_MS_WH_LEFT"]),
    (0xDC, "KC_WH_R", &["KC_MS_WH_RIGHT"]),
    (0xDD, "KC_ACL0", &["KC_MS_ACCEL0"]),
    (0xDE, "KC_ACL1", &["KC_MS_ACCEL1"]),
    (0xDF, "KC_ACL2", &["KC_MS_ACCEL2"]),
    (0xE0, "KC_LCTL", &["KC_LEFT_CTRL"]),
    (0xE1, "KC_LSFT", &["KC_LEFT_SHIFT"]),
    (0xE2, "KC_LALT", &["KC_LEFT_ALT", "KC_LOPT"]),
    (0xE3, "KC_LGUI", &["KC_LEFT_GUI", "KC_LCMD", "KC_LWIN"]),
    (0xE4, "KC_RCTL", &["KC_RIGHT_CTRL"]),
    (0xE5, "KC_RSFT", &["KC_RIGHT_SHIFT"]),
    (0xE6, "KC_RALT", &["KC_RIGHT_ALT", "KC_ROPT", "KC_ALGR"]),
    (0xE7, "KC_RGUI", &["KC_RIGHT_GUI", "KC_RCMD", "KC_RWIN"]),
    (0x7C00, "QK_BOOT", &["QK_BOOTLOADER", "RESET"]),
    (0x7C01, "QK_RBT", &["QK_REBOOT"]),
    (0x7C02, "DB_TOGG", &["QK_DEBUG_TOGGLE"]),
    (0x7C03, "EE_CLR", &["QK_CLEAR_EEPROM"]),
    (0x7C16, "QK_GESC", &["QK_GRAVE_ESCAPE", "KC_GESC"]),
    (0x7C73, "CW_TOGG", &["QK_CAPS_WORD_TOGGLE"]),
];

/// Shifted symbols, accepted on input only (they stringify as `LSFT(..)`)
const SHIFTED_ALIASES: &[(&str, u16)] = &[
    ("KC_TILD", 0x35),
    ("KC_EXLM", 0x1E),
    ("KC_AT", 0x1F),
    ("KC_HASH", 0x20),
    ("KC_DLR", 0x21),
    ("KC_PERC", 0x22),
    ("KC_CIRC", 0x23),
    ("KC_AMPR", 0x24),
    ("KC_ASTR", 0x25),
    ("KC_LPRN", 0x26),
    ("KC_RPRN", 0x27),
    ("KC_UNDS", 0x2D),
    ("KC_PLUS", 0x2E),
    ("KC_LCBR", 0x2F),
    ("KC_RCBR", 0x30),
    ("KC_PIPE", 0x31),
    ("KC_COLN", 0x33),
    ("KC_DQUO", 0x34),
    ("KC_LABK", 0x36),
    ("KC_RABK", 0x37),
    ("KC_QUES", 0x38),
];

/// Layer functions that take a single layer number: (name, base, max layer)
const LAYER_FNS: &[(&str, u16, u16)] = &[
    ("TO", ranges::QK_TO, 31),
    ("MO", ranges::QK_MOMENTARY, 31),
    ("DF", ranges::QK_DEF_LAYER, 31),
    ("TG", ranges::QK_TOGGLE_LAYER, 31),
    ("OSL", ranges::QK_ONE_SHOT_LAYER, 31),
    ("TT", ranges::QK_LAYER_TAP_TOGGLE, 31),
];

/// Modifier wrapper functions and the five-bit mask each applies
const MOD_FNS: &[(&str, u8)] = &[
    ("LCTL", mod5::CTRL),
    ("LSFT", mod5::SHIFT),
    ("LALT", mod5::ALT),
    ("LOPT", mod5::ALT),
    ("LGUI", mod5::GUI),
    ("LCMD", mod5::GUI),
    ("LWIN", mod5::GUI),
    ("RCTL", mod5::RIGHT | mod5::CTRL),
    ("RSFT", mod5::RIGHT | mod5::SHIFT),
    ("RALT", mod5::RIGHT | mod5::ALT),
    ("ROPT", mod5::RIGHT | mod5::ALT),
    ("ALGR", mod5::RIGHT | mod5::ALT),
    ("RGUI", mod5::RIGHT | mod5::GUI),
    ("RCMD", mod5::RIGHT | mod5::GUI),
    ("RWIN", mod5::RIGHT | mod5::GUI),
];

/// `MOD_*` constants accepted by `MT()` and `OSM()`
const MOD_MASKS: &[(&str, u8)] = &[
    ("MOD_LCTL", 0x01),
    ("MOD_LSFT", 0x02),
    ("MOD_LALT", 0x04),
    ("MOD_LGUI", 0x08),
    ("MOD_RCTL", 0x11),
    ("MOD_RSFT", 0x12),
    ("MOD_RALT", 0x14),
    ("MOD_RGUI", 0x18),
    ("MOD_MEH", 0x07),
    ("MOD_HYPR", 0x0F),
];

/// Built-in QMK key name table
#[derive(Debug, Clone)]
pub struct QmkKeycodes {
    by_name: HashMap<String, KeyCode>,
    by_code: HashMap<KeyCode, String>,
}

impl Default for QmkKeycodes {
    fn default() -> Self {
        Self::new()
    }
}

impl QmkKeycodes {
    pub fn new() -> Self {
        let mut table = Self {
            by_name: HashMap::new(),
            by_code: HashMap::new(),
        };

        for (i, letter) in ('A'..='Z').enumerate() {
            table.insert(0x04 + i as u16, &format!("KC_{letter}"), &[]);
        }
        for n in 1..=9u16 {
            table.insert(0x1D + n, &format!("KC_{n}"), &[]);
            table.insert(0x58 + n, &format!("KC_P{n}"), &[&format!("KC_KP_{n}")]);
        }
        table.insert(0x27, "KC_0", &[]);
        for n in 1..=12u16 {
            table.insert(0x39 + n, &format!("KC_F{n}"), &[]);
            table.insert(0x67 + n, &format!("KC_F{}", n + 12), &[]);
        }
        for n in 1..=9u16 {
            table.insert(0x86 + n, &format!("KC_INT{n}"), &[&format!("KC_INTERNATIONAL_{n}")]);
            table.insert(0x8F + n, &format!("KC_LNG{n}"), &[&format!("KC_LANGUAGE_{n}")]);
        }
        for n in 1..=8u16 {
            table.insert(0xD0 + n, &format!("KC_BTN{n}"), &[&format!("KC_MS_BTN{n}")]);
        }
        for n in 0..16u16 {
            table.insert(ranges::QK_KB + n, &format!("USER{n:02}"), &[]);
        }
        for &(code, name, aliases) in NAMED {
            table.insert(code, name, aliases);
        }
        for &(alias, base) in SHIFTED_ALIASES {
            table
                .by_name
                .insert(alias.to_string(), ((mod5::SHIFT as u16) << 8) | base);
        }
        table
    }

    /// Shared instance of the built-in table
    pub fn builtin() -> &'static QmkKeycodes {
        static TABLE: OnceLock<QmkKeycodes> = OnceLock::new();
        TABLE.get_or_init(QmkKeycodes::new)
    }

    /// Register keyboard-specific names (from the definition's
    /// `customKeycodes`) for the `USERnn` range.
    pub fn with_custom_keycodes(mut self, names: &[String]) -> Self {
        for (i, name) in names.iter().enumerate().take(64) {
            let code = ranges::QK_KB + i as u16;
            self.by_name.insert(name.to_ascii_uppercase(), code);
            self.by_code.insert(code, name.to_ascii_uppercase());
        }
        self
    }

    fn insert(&mut self, code: KeyCode, name: &str, aliases: &[&str]) {
        self.by_code.insert(code, name.to_string());
        self.by_name.insert(name.to_string(), code);
        for alias in aliases {
            self.by_name.insert(alias.to_string(), code);
        }
    }

    fn parse_normalized(&self, s: &str) -> Option<KeyCode> {
        if let Some(hex) = s.strip_prefix("0X") {
            return u16::from_str_radix(hex, 16).ok();
        }
        if let Some(&code) = self.by_name.get(s) {
            return Some(code);
        }
        if let Some(n) = s.strip_prefix('M').and_then(|n| n.parse::<u8>().ok()) {
            return Some(ranges::QK_MACRO | n as u16);
        }

        let (func, args) = split_call(s)?;
        if let Some(&(_, base, max)) = LAYER_FNS.iter().find(|(name, _, _)| *name == func) {
            let layer: u16 = args.parse().ok()?;
            return (layer <= max).then_some(base | layer);
        }
        if let Some(&(_, bits)) = MOD_FNS.iter().find(|(name, _)| *name == func) {
            let inner = self.parse_normalized(args)?;
            return apply_mods(inner, bits);
        }
        match func {
            "TD" => {
                let n: u8 = args.parse().ok()?;
                Some(ranges::QK_TAP_DANCE | n as u16)
            }
            "OSM" => {
                let mods = parse_mod_mask(args)?;
                Some(ranges::QK_ONE_SHOT_MOD | mods as u16)
            }
            "LT" => {
                let (layer, key) = args.split_once(',')?;
                let layer: u16 = layer.parse().ok()?;
                let key = self.parse_normalized(key)?;
                (layer <= 15 && key <= 0xFF).then_some(ranges::QK_LAYER_TAP | (layer << 8) | key)
            }
            "MT" => {
                let (mods, key) = args.split_once(',')?;
                let mods = parse_mod_mask(mods)?;
                let key = self.parse_normalized(key)?;
                (key <= 0xFF).then_some(ranges::QK_MOD_TAP | ((mods as u16) << 8) | key)
            }
            _ => None,
        }
    }
}

impl KeyNames for QmkKeycodes {
    fn parse(&self, name: &str) -> Result<KeyCode, CodecError> {
        let normalized: String = name
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();
        if normalized.is_empty() {
            return Err(CodecError::InvalidKey(name.to_string()));
        }
        self.parse_normalized(&normalized)
            .ok_or_else(|| CodecError::InvalidKey(name.trim().to_string()))
    }

    fn stringify(&self, code: KeyCode) -> String {
        if let Some(name) = self.by_code.get(&code) {
            return name.clone();
        }
        let hex = || format!("0x{code:04X}");
        match code {
            ranges::QK_MODS..=ranges::QK_MODS_MAX => {
                let mods = ((code >> 8) & 0x1F) as u8;
                if mods & 0x0F == 0 {
                    return hex();
                }
                let mut out = self.stringify(code & 0xFF);
                // innermost wrapper first, so CTL ends up outermost
                for (bit, left, right) in [
                    (mod5::GUI, "LGUI", "RGUI"),
                    (mod5::ALT, "LALT", "RALT"),
                    (mod5::SHIFT, "LSFT", "RSFT"),
                    (mod5::CTRL, "LCTL", "RCTL"),
                ] {
                    if mods & bit != 0 {
                        let name = if mods & mod5::RIGHT != 0 { right } else { left };
                        out = format!("{name}({out})");
                    }
                }
                out
            }
            ranges::QK_MOD_TAP..=ranges::QK_MOD_TAP_MAX => {
                let mods = ((code >> 8) & 0x1F) as u8;
                match mod_mask_name(mods) {
                    Some(mods) => format!("MT({mods},{})", self.stringify(code & 0xFF)),
                    None => hex(),
                }
            }
            ranges::QK_LAYER_TAP..=ranges::QK_LAYER_TAP_MAX => {
                format!("LT({},{})", (code >> 8) & 0x0F, self.stringify(code & 0xFF))
            }
            0x5200..=0x52DF => {
                let base = code & 0xFFE0;
                let arg = code & 0x1F;
                if base == ranges::QK_ONE_SHOT_MOD {
                    return match mod_mask_name(arg as u8) {
                        Some(mods) => format!("OSM({mods})"),
                        None => hex(),
                    };
                }
                LAYER_FNS
                    .iter()
                    .find(|(_, b, _)| *b == base)
                    .map(|(name, _, _)| format!("{name}({arg})"))
                    .unwrap_or_else(hex)
            }
            0x5700..=0x57FF => format!("TD({})", code & 0xFF),
            0x7700..=0x77FF => format!("M{}", code & 0xFF),
            _ => hex(),
        }
    }
}

/// Split `FUNC(ARGS)` into its parts
fn split_call(s: &str) -> Option<(&str, &str)> {
    let open = s.find('(')?;
    let inner = s[open + 1..].strip_suffix(')')?;
    Some((&s[..open], inner))
}

/// Apply a modifier wrapper to a basic or already-wrapped key code
fn apply_mods(inner: KeyCode, bits: u8) -> Option<KeyCode> {
    if inner > ranges::QK_MODS_MAX {
        return None;
    }
    let existing = ((inner >> 8) & 0x1F) as u8;
    if existing != 0 && (existing & mod5::RIGHT) != (bits & mod5::RIGHT) {
        // QMK cannot mix left and right modifiers in one code
        return None;
    }
    Some(inner | ((bits as u16) << 8))
}

/// Parse `MOD_LCTL|MOD_LSFT` into a five-bit mask
fn parse_mod_mask(s: &str) -> Option<u8> {
    let mut mask = 0u8;
    for part in s.split('|') {
        let (_, bits) = MOD_MASKS.iter().find(|(name, _)| *name == part)?;
        if mask != 0 && (mask & mod5::RIGHT) != (bits & mod5::RIGHT) {
            return None;
        }
        mask |= bits;
    }
    Some(mask)
}

fn mod_mask_name(mods: u8) -> Option<String> {
    if mods & 0x0F == 0 {
        return None;
    }
    let side = if mods & mod5::RIGHT != 0 { 'R' } else { 'L' };
    let parts: Vec<String> = [
        (mod5::CTRL, "CTL"),
        (mod5::SHIFT, "SFT"),
        (mod5::ALT, "ALT"),
        (mod5::GUI, "GUI"),
    ]
    .iter()
    .filter(|(bit, _)| mods & bit != 0)
    .map(|(_, name)| format!("MOD_{side}{name}"))
    .collect();
    Some(parts.join("|"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> &'static QmkKeycodes {
        QmkKeycodes::builtin()
    }

    #[test]
    fn test_basic_keys() {
        assert_eq!(names().parse("KC_A").unwrap(), 0x04);
        assert_eq!(names().parse("kc_z").unwrap(), 0x1D);
        assert_eq!(names().parse("KC_0").unwrap(), 0x27);
        assert_eq!(names().parse("KC_F13").unwrap(), 0x68);
        assert_eq!(names().parse("KC_NO").unwrap(), KC_NO);
        assert_eq!(names().stringify(0x2C), "KC_SPC");
    }

    #[test]
    fn test_aliases_stringify_to_canonical() {
        let code = names().parse("KC_ENTER").unwrap();
        assert_eq!(names().stringify(code), "KC_ENT");
        let code = names().parse("KC_EXLM").unwrap();
        assert_eq!(names().stringify(code), "LSFT(KC_1)");
        let code = names().parse("_______").unwrap();
        assert_eq!(names().stringify(code), "KC_TRNS");
    }

    #[test]
    fn test_unknown_name_is_invalid_key() {
        let err = names().parse("KC_NOPE").unwrap_err();
        assert_eq!(err, CodecError::InvalidKey("KC_NOPE".into()));
        assert_eq!(err.to_string(), "invalid key: \"KC_NOPE\"");
        assert!(names().parse("").is_err());
        assert!(names().parse("MO(99)").is_err());
    }

    #[test]
    fn test_function_forms() {
        assert_eq!(names().parse("MO(1)").unwrap(), 0x5221);
        assert_eq!(names().parse("TG(3)").unwrap(), 0x5263);
        assert_eq!(names().parse("LT(2, KC_SPC)").unwrap(), 0x422C);
        assert_eq!(names().parse("MT(MOD_LCTL|MOD_LSFT,KC_A)").unwrap(), 0x2304);
        assert_eq!(names().parse("TD(5)").unwrap(), 0x5705);
        assert_eq!(names().parse("M12").unwrap(), 0x770C);
        assert_eq!(names().parse("LCTL(LSFT(KC_A))").unwrap(), 0x0304);
        assert_eq!(names().parse("RALT(KC_E)").unwrap(), 0x1408);
        assert_eq!(names().parse("OSM(MOD_LSFT)").unwrap(), 0x52A2);
    }

    #[test]
    fn test_mixed_hand_modifiers_rejected() {
        assert!(names().parse("LCTL(RSFT(KC_A))").is_err());
        assert!(names().parse("MT(MOD_LCTL|MOD_RSFT,KC_A)").is_err());
    }

    #[test]
    fn test_hex_literal_fallback() {
        assert_eq!(names().stringify(0x5100), "0x5100");
        assert_eq!(names().parse("0x5100").unwrap(), 0x5100);
    }

    #[test]
    fn test_every_code_round_trips() {
        for code in 0..=u16::MAX {
            let name = names().stringify(code);
            assert_eq!(
                names().parse(&name).unwrap(),
                code,
                "{name} did not round-trip"
            );
        }
    }

    #[test]
    fn test_custom_keycodes() {
        let table = QmkKeycodes::new().with_custom_keycodes(&["CK_RGB_TOG".to_string()]);
        assert_eq!(table.parse("CK_RGB_TOG").unwrap(), 0x7E00);
        assert_eq!(table.stringify(0x7E00), "CK_RGB_TOG");
        assert_eq!(table.stringify(0x7E01), "USER01");
    }
}
