//! Macro syntax: `TAP(KC_A), DELAY(50), TEXT(hello)`

use serde_json::{json, Value};
use vial_keyboard::keycode::KeyNames;
use vial_keyboard::macros::parse_actions;
use vial_keyboard::slots::Macros;
use vial_keyboard::{CodecError, Macro, MacroAction};

use super::slots::SlotSyntax;

impl SlotSyntax for Macros {
    /// The id is assigned when the macro is stored
    fn parse(text: &str, names: &dyn KeyNames) -> Result<Macro, CodecError> {
        Ok(Macro::new(0, parse_actions(text, names)?))
    }

    fn describe(record: &Macro, names: &dyn KeyNames) -> String {
        record.describe(names)
    }

    fn to_json(record: &Macro, names: &dyn KeyNames) -> Value {
        let actions: Vec<Value> = record
            .actions
            .iter()
            .map(|action| match action {
                MacroAction::Tap(k) => json!({ "tap": names.stringify(*k) }),
                MacroAction::Down(k) => json!({ "down": names.stringify(*k) }),
                MacroAction::Up(k) => json!({ "up": names.stringify(*k) }),
                MacroAction::Delay(ms) => json!({ "delay": ms }),
                MacroAction::Text(s) => json!({ "text": s }),
            })
            .collect();
        json!({ "actions": actions })
    }
}
