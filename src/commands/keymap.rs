//! Keymap command handlers.

use std::fmt::Write;

use anyhow::anyhow;
use serde::Serialize;
use vial_keyboard::keycode::KeyNames;
use vial_keyboard::{CodecError, Feature, KeyCode, LoadOptions};

use super::{report_save, with_keyboard, Context, Parsed};
use crate::cli::KeymapCommands;

fn parse_key(text: &str, names: &dyn KeyNames) -> Result<KeyCode, CodecError> {
    names.parse(text)
}

fn matrix_index(what: &str, value: usize) -> anyhow::Result<u8> {
    u8::try_from(value).map_err(|_| anyhow!("{what} {value} does not fit in a keymap request"))
}

#[derive(Serialize)]
struct KeyReport {
    layer: usize,
    row: usize,
    col: usize,
    code: String,
    key: String,
}

#[derive(Serialize)]
struct LayerReport {
    layer: usize,
    rows: Vec<Vec<String>>,
}

pub fn run(ctx: &mut Context, cmd: KeymapCommands) -> anyhow::Result<()> {
    match cmd {
        KeymapCommands::Show { layer } => show(ctx, layer),
        KeymapCommands::Get { layer, row, col } => get(ctx, layer, row, col),
        KeymapCommands::Set {
            layer,
            row,
            col,
            key,
        } => set(ctx, layer, row, col, &key),
    }
}

/// Print every layer, or just one
fn show(ctx: &mut Context, only: Option<usize>) -> anyhow::Result<()> {
    with_keyboard(ctx, LoadOptions::none().with(Feature::Keymap), |ctx, _kb, info| {
        let names = info.key_names();
        let keymap = info.keymap()?;
        let layers: Vec<usize> = match only {
            Some(layer) => {
                keymap.geometry().check_layer(layer)?;
                vec![layer]
            }
            None => (0..keymap.geometry().layers).collect(),
        };

        let mut reports = Vec::with_capacity(layers.len());
        for layer in layers {
            let rows = keymap
                .rows(layer)?
                .iter()
                .map(|row| row.iter().map(|&code| names.stringify(code)).collect())
                .collect();
            reports.push(LayerReport { layer, rows });
        }

        ctx.out.emit(&reports, |out| {
            for report in &reports {
                writeln!(out, "Layer {}:", report.layer)?;
                let width = report
                    .rows
                    .iter()
                    .flatten()
                    .map(String::len)
                    .max()
                    .unwrap_or(0);
                for row in &report.rows {
                    let cells: Vec<String> =
                        row.iter().map(|name| format!("{name:<width$}")).collect();
                    writeln!(out, "  {}", cells.join(" ").trim_end())?;
                }
            }
            Ok(())
        })
    })
}

/// Read one key without fetching the whole keymap
fn get(ctx: &mut Context, layer: usize, row: usize, col: usize) -> anyhow::Result<()> {
    with_keyboard(ctx, LoadOptions::none(), |ctx, kb, info| {
        let geometry = info.geometry()?;
        geometry.check_layer(layer)?;
        geometry.index(row, col)?;
        let code = kb.get_keycode(
            matrix_index("layer", layer)?,
            matrix_index("row", row)?,
            matrix_index("column", col)?,
        )?;
        let report = KeyReport {
            layer,
            row,
            col,
            code: format!("0x{code:04X}"),
            key: info.key_names().stringify(code),
        };
        ctx.out.emit(&report, |out| {
            writeln!(
                out,
                "Layer {layer} [{row},{col}]: {} ({})",
                report.key, report.code
            )
        })
    })
}

/// Assign one key
fn set(ctx: &mut Context, layer: usize, row: usize, col: usize, key: &str) -> anyhow::Result<()> {
    let parsed = Parsed::offline(key, parse_key)?;
    with_keyboard(ctx, LoadOptions::none(), |ctx, kb, info| {
        let names = info.key_names();
        let code = parsed.resolve(&names, parse_key)?;
        let geometry = info.geometry()?;
        geometry.check_layer(layer)?;
        geometry.index(row, col)?;

        kb.set_keycode(
            matrix_index("layer", layer)?,
            matrix_index("row", row)?,
            matrix_index("column", col)?,
            code,
        )?;
        if let Ok(keymap) = info.keymap_mut() {
            keymap.set(layer, row, col, code)?;
        }
        let outcome = kb.save(Feature::Keymap);
        report_save(
            &mut ctx.out,
            &format!(
                "Layer {layer} [{row},{col}] set to {}",
                names.stringify(code)
            ),
            outcome,
        )
    })
}
