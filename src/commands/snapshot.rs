//! .svl export/import handlers.

use std::fmt::Write;
use std::path::Path;

use anyhow::Context as _;
use vial_keyboard::LoadOptions;

use super::{with_keyboard, Context};
use crate::svl::{ImportReport, Snapshot};

/// Write a snapshot of everything the keyboard supports
pub fn export(ctx: &mut Context, file: Option<&Path>) -> anyhow::Result<()> {
    with_keyboard(ctx, LoadOptions::all(), |ctx, kb, info| {
        let snapshot = Snapshot::capture(info, kb.device_info())?;
        match file {
            Some(path) => {
                let json = snapshot.to_json()?;
                std::fs::write(path, json + "\n")
                    .with_context(|| format!("writing {}", path.display()))?;
                ctx.out
                    .message(&format!("Exported {} to {}", info.name, path.display()))
            }
            // The snapshot is JSON whatever --format says
            None => ctx.out.emit(&snapshot, |out| {
                let json = serde_json::to_string_pretty(&snapshot).map_err(|_| std::fmt::Error)?;
                writeln!(out, "{json}")
            }),
        }
    })
}

fn summarize(report: &ImportReport, out: &mut String) -> std::fmt::Result {
    if report.layout_options {
        writeln!(out, "  layout options")?;
    }
    let lines: [(&str, usize); 6] = [
        ("keymap layers", report.keymap_layers.len()),
        ("macros", report.macros.len()),
        ("combos", report.combos.len()),
        ("tap dances", report.tap_dances.len()),
        ("key overrides", report.key_overrides.len()),
        ("QMK settings", report.qmk_settings.len()),
    ];
    for (what, n) in lines {
        if n > 0 {
            writeln!(out, "  {n} {what}")?;
        }
    }
    Ok(())
}

/// Restore a snapshot. The file is parsed before the keyboard is opened and
/// checked against it before anything is written.
pub fn import(ctx: &mut Context, file: &Path, dry_run: bool) -> anyhow::Result<()> {
    let json =
        std::fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))?;
    let snapshot =
        Snapshot::from_json(&json).with_context(|| format!("loading {}", file.display()))?;

    with_keyboard(ctx, LoadOptions::all(), |ctx, kb, info| {
        let plan = snapshot.plan(info, &ctx.schema)?;

        if dry_run {
            let contents = plan.contents();
            return ctx.out.emit(&contents, |out| {
                writeln!(out, "{} is valid for {}; would import:", file.display(), info.name)?;
                summarize(&contents, out)
            });
        }

        let report = plan.apply(kb, info)?;
        ctx.out.emit(&report, |out| {
            if report.is_empty() {
                return writeln!(out, "Keyboard already matches {}", file.display());
            }
            writeln!(out, "Imported {}; changed:", file.display())?;
            summarize(&report, out)
        })
    })
}
