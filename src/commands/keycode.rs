//! Offline key name lookup.

use std::fmt::Write;

use serde::Serialize;
use vial_keyboard::keycode::KeyNames;
use vial_keyboard::QmkKeycodes;

use super::Context;

#[derive(Serialize)]
struct Lookup {
    input: String,
    code: String,
    name: String,
}

/// Translate a name to its code, or a code to its canonical name.
///
/// Uses the built-in table only; custom keycodes need the keyboard.
pub fn lookup(ctx: &mut Context, key: &str) -> anyhow::Result<()> {
    let names = QmkKeycodes::builtin();
    let code = names.parse(key)?;
    let result = Lookup {
        input: key.trim().to_string(),
        code: format!("0x{code:04X}"),
        name: names.stringify(code),
    };
    ctx.out
        .emit(&result, |out| writeln!(out, "{} = {}", result.name, result.code))
}
