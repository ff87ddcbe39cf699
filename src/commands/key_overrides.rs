//! Key-override syntax: `TRIGGER(KC_BSPC), REPLACEMENT(KC_DEL), TRIGGER_MODS(LSFT), LAYERS(0|1)`

use serde_json::{json, Value};
use vial_keyboard::key_override::LayerMask;
use vial_keyboard::keycode::KeyNames;
use vial_keyboard::slots::KeyOverrides;
use vial_keyboard::{CodecError, KeyOverride};

use super::slots::SlotSyntax;

impl SlotSyntax for KeyOverrides {
    fn parse(text: &str, names: &dyn KeyNames) -> Result<KeyOverride, CodecError> {
        KeyOverride::parse(text, names)
    }

    fn describe(record: &KeyOverride, names: &dyn KeyNames) -> String {
        record.describe(names)
    }

    fn to_json(record: &KeyOverride, names: &dyn KeyNames) -> Value {
        json!({
            "trigger": names.stringify(record.trigger),
            "replacement": names.stringify(record.replacement),
            "layers": LayerMask(record.layers).to_string(),
            "trigger_mods": record.trigger_mods,
            "negative_mods": record.negative_mods,
            "suppressed_mods": record.suppressed_mods,
            "options": record.options,
            "enabled": record.enabled(),
        })
    }
}
