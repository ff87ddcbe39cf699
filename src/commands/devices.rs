//! Device listing.

use std::fmt::Write;

use anyhow::Context as _;

use super::Context;

/// List attached keyboards without opening any of them
pub fn list(ctx: &mut Context) -> anyhow::Result<()> {
    let devices = ctx.devices.list().context("enumerating HID devices")?;
    let infos: Vec<_> = devices.iter().map(|d| &d.info).collect();

    ctx.out.emit(&infos, |out| {
        if infos.is_empty() {
            return writeln!(out, "No VIA/Vial keyboards found");
        }
        writeln!(out, "Found {} keyboard(s):", infos.len())?;
        for info in &infos {
            let kind = if info.is_vial { "Vial" } else { "VIA" };
            write!(
                out,
                "  {:04X}:{:04X}  {:<4}  {}  ({})",
                info.vid,
                info.pid,
                kind,
                info.display_name(),
                info.device_path
            )?;
            if let Some(serial) = &info.serial {
                write!(out, "  serial={serial}")?;
            }
            writeln!(out)?;
        }
        Ok(())
    })
}
