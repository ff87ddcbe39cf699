//! Combo syntax: `KC_A+KC_S KC_D`

use serde_json::{json, Value};
use vial_keyboard::keycode::KeyNames;
use vial_keyboard::slots::Combos;
use vial_keyboard::{CodecError, Combo};

use super::slots::SlotSyntax;

impl SlotSyntax for Combos {
    fn parse(text: &str, names: &dyn KeyNames) -> Result<Combo, CodecError> {
        Combo::parse(text, names)
    }

    fn describe(record: &Combo, names: &dyn KeyNames) -> String {
        record.describe(names)
    }

    fn to_json(record: &Combo, names: &dyn KeyNames) -> Value {
        let triggers: Vec<String> = record.trigger_keys().map(|k| names.stringify(k)).collect();
        json!({
            "triggers": triggers,
            "output": names.stringify(record.output),
        })
    }
}
