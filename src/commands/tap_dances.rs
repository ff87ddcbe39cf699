//! Tap-dance syntax: `TAP(KC_A), HOLD(KC_LCTL), DOUBLE(KC_ESC), TAPHOLD(KC_B), TERM(200)`

use serde_json::{json, Value};
use vial_keyboard::keycode::{KeyNames, KC_NO};
use vial_keyboard::slots::TapDances;
use vial_keyboard::{CodecError, TapDance};

use super::slots::SlotSyntax;

impl SlotSyntax for TapDances {
    fn parse(text: &str, names: &dyn KeyNames) -> Result<TapDance, CodecError> {
        TapDance::parse(text, names)
    }

    fn describe(record: &TapDance, names: &dyn KeyNames) -> String {
        record.describe(names)
    }

    fn to_json(record: &TapDance, names: &dyn KeyNames) -> Value {
        let key = |k| (k != KC_NO).then(|| names.stringify(k));
        json!({
            "tap": key(record.tap),
            "hold": key(record.hold),
            "double_tap": key(record.double_tap),
            "tap_hold": key(record.tap_hold),
            "tapping_term": record.tapping_term,
        })
    }
}
