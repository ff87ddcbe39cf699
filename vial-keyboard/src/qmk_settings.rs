//! QMK settings schema and value maps
//!
//! The firmware addresses settings by QSID. A single QSID holds either one
//! integer of `width` bytes or a set of boolean flags packed into it; the
//! [`SettingsSchema`] names each value (or flag) and records how to unpack it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// One named setting value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingField {
    pub name: String,
    pub qsid: u16,
    /// Width of the QSID's value in bytes (1, 2 or 4)
    pub width: u8,
    /// Flag position inside the QSID's value, for boolean settings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bit: Option<u8>,
}

impl SettingField {
    fn value(name: &str, qsid: u16, width: u8) -> Self {
        Self {
            name: name.to_string(),
            qsid,
            width,
            bit: None,
        }
    }

    fn flag(name: &str, qsid: u16, width: u8, bit: u8) -> Self {
        Self {
            name: name.to_string(),
            qsid,
            width,
            bit: Some(bit),
        }
    }

    pub fn is_flag(&self) -> bool {
        self.bit.is_some()
    }

    fn max_value(&self) -> u32 {
        match (self.bit, self.width) {
            (Some(_), _) => 1,
            (None, w) if w >= 4 => u32::MAX,
            (None, w) => (1u32 << (w as u32 * 8)) - 1,
        }
    }

    /// This field's value out of the raw QSID value
    pub fn extract(&self, raw: u32) -> u32 {
        match self.bit {
            Some(bit) => (raw >> bit) & 1,
            None => raw & self.max_value(),
        }
    }

    /// Raw QSID value with this field replaced by `value`
    pub fn apply(&self, raw: u32, value: u32) -> u32 {
        match self.bit {
            Some(bit) if value != 0 => raw | (1 << bit),
            Some(bit) => raw & !(1 << bit),
            None => value,
        }
    }

    /// Parse a user-supplied value: numbers, or on/off words for flags
    pub fn parse_value(&self, s: &str) -> Result<u32, CodecError> {
        let s = s.trim();
        let invalid = || CodecError::InvalidToken(format!("{}={s}", self.name));
        let value = match s.to_ascii_lowercase().as_str() {
            "true" | "on" | "yes" if self.is_flag() => 1,
            "false" | "off" | "no" if self.is_flag() => 0,
            other => match other.strip_prefix("0x") {
                Some(hex) => u32::from_str_radix(hex, 16).map_err(|_| invalid())?,
                None => other.parse().map_err(|_| invalid())?,
            },
        };
        if value > self.max_value() {
            return Err(invalid());
        }
        Ok(value)
    }
}

/// Name/QSID side table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsSchema {
    fields: Vec<SettingField>,
}

impl Default for SettingsSchema {
    fn default() -> Self {
        Self::builtin()
    }
}

impl SettingsSchema {
    pub fn new(fields: Vec<SettingField>) -> Self {
        Self { fields }
    }

    /// Settings defined by current Vial-QMK
    pub fn builtin() -> Self {
        use SettingField as F;
        let mut fields = vec![
            F::flag("grave_esc_alt_override", 1, 1, 0),
            F::flag("grave_esc_ctrl_override", 1, 1, 1),
            F::flag("grave_esc_gui_override", 1, 1, 2),
            F::flag("grave_esc_shift_override", 1, 1, 3),
            F::value("combo_term", 2, 2),
            F::flag("auto_shift_enabled", 3, 1, 0),
            F::flag("auto_shift_modifiers", 3, 1, 1),
            F::flag("auto_shift_no_special", 3, 1, 2),
            F::flag("auto_shift_no_numeric", 3, 1, 3),
            F::flag("auto_shift_no_alpha", 3, 1, 4),
            F::flag("auto_shift_repeat", 3, 1, 5),
            F::flag("auto_shift_no_auto_repeat", 3, 1, 6),
            F::value("auto_shift_timeout", 4, 2),
            F::value("oneshot_tap_toggle", 5, 1),
            F::value("oneshot_timeout", 6, 2),
            F::value("tapping_term", 7, 2),
            F::flag("permissive_hold", 8, 1, 0),
            F::flag("hold_on_other_key_press", 8, 1, 1),
            F::flag("tapping_force_hold", 8, 1, 2),
            F::flag("retro_tapping", 8, 1, 3),
        ];
        let mousekeys = [
            "mousekey_delay",
            "mousekey_interval",
            "mousekey_move_delta",
            "mousekey_max_speed",
            "mousekey_time_to_max",
            "mousekey_wheel_delay",
            "mousekey_wheel_interval",
            "mousekey_wheel_max_speed",
            "mousekey_wheel_time_to_max",
        ];
        for (i, name) in mousekeys.iter().enumerate() {
            fields.push(F::value(name, 9 + i as u16, 2));
        }
        fields.extend([
            F::value("tap_code_delay", 18, 2),
            F::value("tap_hold_caps_delay", 19, 2),
            F::value("tapping_toggle", 20, 1),
        ]);
        let magic = [
            "magic_swap_control_capslock",
            "magic_capslock_to_control",
            "magic_swap_lalt_lgui",
            "magic_swap_ralt_rgui",
            "magic_no_gui",
            "magic_swap_grave_esc",
            "magic_swap_backslash_backspace",
            "magic_host_nkro",
            "magic_swap_lctl_lgui",
            "magic_swap_rctl_rgui",
            "magic_oneshot_enable",
            "magic_swap_escape_capslock",
            "magic_autocorrect_enable",
        ];
        for (bit, name) in magic.iter().enumerate() {
            fields.push(F::flag(name, 21, 4, bit as u8));
        }
        fields.push(F::value("quick_tap_term", 22, 2));
        Self { fields }
    }

    /// Schema file: `{"fields": [{"name": .., "qsid": .., "width": .., "bit": ..}]}`
    pub fn from_json(json: &str) -> Result<Self, CodecError> {
        let schema: Self =
            serde_json::from_str(json).map_err(|e| CodecError::Definition(e.to_string()))?;
        if let Some(f) = schema
            .fields
            .iter()
            .find(|f| !matches!(f.width, 1 | 2 | 4) || f.bit.is_some_and(|b| b >= f.width * 8))
        {
            return Err(CodecError::Definition(format!(
                "setting {} has an invalid width/bit",
                f.name
            )));
        }
        Ok(schema)
    }

    pub fn fields(&self) -> &[SettingField] {
        &self.fields
    }

    pub fn by_name(&self, name: &str) -> Option<&SettingField> {
        self.fields
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name.trim()))
    }

    /// Fields stored in one QSID
    pub fn by_qsid(&self, qsid: u16) -> impl Iterator<Item = &SettingField> {
        self.fields.iter().filter(move |f| f.qsid == qsid)
    }

    /// Byte width of a QSID's value, if the schema knows it
    pub fn width(&self, qsid: u16) -> Option<u8> {
        self.by_qsid(qsid).map(|f| f.width).max()
    }

    /// Resolve a setting name, or a numeric QSID, to the fields it covers
    pub fn lookup(&self, key: &str) -> Result<Vec<&SettingField>, CodecError> {
        if let Some(field) = self.by_name(key) {
            return Ok(vec![field]);
        }
        let fields: Vec<_> = key
            .trim()
            .parse::<u16>()
            .map(|qsid| self.by_qsid(qsid).collect())
            .unwrap_or_default();
        if fields.is_empty() {
            return Err(CodecError::InvalidToken(key.trim().to_string()));
        }
        Ok(fields)
    }
}

/// How a [`SettingsMap`] is keyed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Addressing {
    /// Keys are decimal QSIDs holding raw (packed) values
    Qsid,
    /// Keys are setting names holding per-field values
    Name,
}

/// Setting values as they appear in snapshot files or device reads
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsMap {
    entries: BTreeMap<String, u32>,
}

impl SettingsMap {
    /// Raw values read from the device
    pub fn from_qsids(values: &BTreeMap<u16, u32>) -> Self {
        Self {
            entries: values.iter().map(|(q, v)| (q.to_string(), *v)).collect(),
        }
    }

    pub fn from_entries(entries: BTreeMap<String, u32>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// QSID addressing only when every key is numeric
    pub fn addressing(&self) -> Addressing {
        if !self.entries.is_empty() && self.entries.keys().all(|k| k.parse::<u16>().is_ok()) {
            Addressing::Qsid
        } else {
            Addressing::Name
        }
    }

    /// Value of one field under either addressing mode
    pub fn get(&self, field: &SettingField) -> Option<u32> {
        match self.addressing() {
            Addressing::Qsid => self
                .entries
                .get(&field.qsid.to_string())
                .map(|raw| field.extract(*raw)),
            Addressing::Name => self
                .entries
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(&field.name))
                .map(|(_, v)| *v),
        }
    }

    /// Translate into raw per-QSID values to write.
    ///
    /// Name-keyed flags are merged into `current` so sibling flags in the
    /// same QSID keep their device values.
    pub fn to_qsid_values(
        &self,
        schema: &SettingsSchema,
        current: &BTreeMap<u16, u32>,
    ) -> Result<BTreeMap<u16, u32>, CodecError> {
        let mut out = BTreeMap::new();
        match self.addressing() {
            Addressing::Qsid => {
                for (key, value) in &self.entries {
                    let qsid: u16 = key
                        .parse()
                        .map_err(|_| CodecError::InvalidToken(key.clone()))?;
                    out.insert(qsid, *value);
                }
            }
            Addressing::Name => {
                for (name, value) in &self.entries {
                    let field = schema
                        .by_name(name)
                        .ok_or_else(|| CodecError::InvalidToken(name.clone()))?;
                    if *value > field.max_value() {
                        return Err(CodecError::InvalidToken(format!("{name}={value}")));
                    }
                    let base = out
                        .get(&field.qsid)
                        .or_else(|| current.get(&field.qsid))
                        .copied()
                        .unwrap_or(0);
                    out.insert(field.qsid, field.apply(base, *value));
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let schema = SettingsSchema::builtin();
        let tt = schema.by_name("TAPPING_TERM").unwrap();
        assert_eq!((tt.qsid, tt.width, tt.bit), (7, 2, None));
        assert_eq!(schema.width(21), Some(4));
        assert_eq!(schema.by_qsid(8).count(), 4);
        assert_eq!(schema.lookup("8").unwrap().len(), 4);
        assert!(schema.lookup("no_such_setting").is_err());
    }

    #[test]
    fn test_flag_extract_and_apply() {
        let schema = SettingsSchema::builtin();
        let retro = schema.by_name("retro_tapping").unwrap();
        assert_eq!(retro.extract(0b1000), 1);
        assert_eq!(retro.apply(0b0001, 1), 0b1001);
        assert_eq!(retro.apply(0b1001, 0), 0b0001);
    }

    #[test]
    fn test_parse_value_limits() {
        let schema = SettingsSchema::builtin();
        let toggle = schema.by_name("tapping_toggle").unwrap();
        assert_eq!(toggle.parse_value("5").unwrap(), 5);
        assert!(toggle.parse_value("256").is_err());
        let flag = schema.by_name("permissive_hold").unwrap();
        assert_eq!(flag.parse_value("on").unwrap(), 1);
        assert!(flag.parse_value("2").is_err());
        let term = schema.by_name("tapping_term").unwrap();
        assert_eq!(term.parse_value("0xC8").unwrap(), 200);
        assert!(term.parse_value("fast").is_err());
    }

    #[test]
    fn test_addressing_detection() {
        let device = SettingsMap::from_qsids(&BTreeMap::from([(7, 180), (8, 0b0101)]));
        assert_eq!(device.addressing(), Addressing::Qsid);

        let named = SettingsMap::from_entries(BTreeMap::from([
            ("tapping_term".to_string(), 180),
            ("hold_on_other_key_press".to_string(), 1),
        ]));
        assert_eq!(named.addressing(), Addressing::Name);

        let schema = SettingsSchema::builtin();
        let term = schema.by_name("tapping_term").unwrap();
        let permissive = schema.by_name("permissive_hold").unwrap();
        assert_eq!(device.get(term), Some(180));
        assert_eq!(named.get(term), Some(180));
        assert_eq!(device.get(permissive), Some(1));
        assert_eq!(named.get(permissive), None);
    }

    #[test]
    fn test_name_keyed_values_merge_flags() {
        let schema = SettingsSchema::builtin();
        let named = SettingsMap::from_entries(BTreeMap::from([
            ("tapping_term".to_string(), 180),
            ("retro_tapping".to_string(), 1),
            ("permissive_hold".to_string(), 0),
        ]));
        let current = BTreeMap::from([(8, 0b0011)]);
        let values = named.to_qsid_values(&schema, &current).unwrap();
        assert_eq!(values, BTreeMap::from([(7, 180), (8, 0b1010)]));
    }

    #[test]
    fn test_unknown_name_rejected() {
        let schema = SettingsSchema::builtin();
        let named = SettingsMap::from_entries(BTreeMap::from([("warp_speed".to_string(), 1)]));
        assert_eq!(
            named.to_qsid_values(&schema, &BTreeMap::new()),
            Err(CodecError::InvalidToken("warp_speed".into()))
        );
    }

    #[test]
    fn test_schema_json_override() {
        let json = r#"{"fields":[{"name":"custom_term","qsid":40,"width":2},
                                  {"name":"custom_flag","qsid":41,"width":1,"bit":3}]}"#;
        let schema = SettingsSchema::from_json(json).unwrap();
        assert_eq!(schema.fields().len(), 2);
        assert_eq!(schema.by_name("custom_flag").unwrap().bit, Some(3));
        let bad = r#"{"fields":[{"name":"x","qsid":1,"width":1,"bit":9}]}"#;
        assert!(SettingsSchema::from_json(bad).is_err());
    }
}
