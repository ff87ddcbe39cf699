//! Identity, capabilities and layout options.

use std::fmt::Write;

use serde::Serialize;
use vial_keyboard::definition::LayoutChoice;
use vial_keyboard::kbinfo::Capabilities;
use vial_keyboard::{Feature, KbInfo, LoadOptions};

use super::{report_save, with_keyboard, Context};

#[derive(Serialize)]
struct InfoReport<'a> {
    name: &'a str,
    vid: u16,
    pid: u16,
    via_protocol: u16,
    vial_protocol: Option<u32>,
    uid: Option<String>,
    layout_options: Option<u32>,
    layout: Vec<LayoutChoice>,
    capabilities: &'a Capabilities,
}

fn capability_line(info: &KbInfo, feature: Feature) -> String {
    let caps = &info.capabilities;
    let detail = match feature {
        Feature::Keymap => caps
            .keymap
            .map(|g| format!("{} layers, {}x{} matrix", g.layers, g.rows, g.cols)),
        Feature::Macros => caps
            .macros
            .map(|m| format!("{} slots, {} byte buffer", m.count, m.buffer_size)),
        Feature::QmkSettings => caps
            .qmk_settings
            .as_ref()
            .map(|q| format!("{} settings", q.len())),
        _ => caps.slot_count(feature).map(|n| format!("{n} slots")),
    };
    format!(
        "{feature}: {}",
        detail.unwrap_or_else(|| "not supported".to_string())
    )
}

/// Print identity and what the firmware supports
pub fn info(ctx: &mut Context) -> anyhow::Result<()> {
    with_keyboard(ctx, LoadOptions::none(), |ctx, kb, info| {
        let info: &KbInfo = info;
        let dev = kb.device_info();
        let report = InfoReport {
            name: &info.name,
            vid: dev.vid,
            pid: dev.pid,
            via_protocol: info.via_protocol,
            vial_protocol: info.vial_protocol,
            uid: info.uid.map(|uid| format!("{uid:016X}")),
            layout_options: info.layout_options,
            layout: info.layout_choices()?,
            capabilities: &info.capabilities,
        };
        ctx.out.emit(&report, |out| {
            writeln!(out, "Keyboard:      {}", report.name)?;
            writeln!(out, "USB:           {:04X}:{:04X}", report.vid, report.pid)?;
            writeln!(out, "VIA protocol:  {}", report.via_protocol)?;
            match report.vial_protocol {
                Some(v) => writeln!(out, "Vial protocol: {v}")?,
                None => writeln!(out, "Vial protocol: none (VIA only)")?,
            }
            if let Some(uid) = &report.uid {
                writeln!(out, "Keyboard UID:  {uid}")?;
            }
            writeln!(out, "\nFeatures:")?;
            for feature in Feature::ALL {
                writeln!(out, "  {}", capability_line(info, feature))?;
            }
            if !report.layout.is_empty() {
                writeln!(out, "\nLayout options:")?;
                for choice in &report.layout {
                    writeln!(out, "  {}: {}", choice.option, choice.choice)?;
                }
            }
            Ok(())
        })
    })
}

/// Show the layout options word, or replace it
pub fn layout(ctx: &mut Context, set: Option<u32>) -> anyhow::Result<()> {
    with_keyboard(ctx, LoadOptions::none(), |ctx, kb, info| {
        if let Some(value) = set {
            kb.set_layout_options(value)?;
            info.layout_options = Some(value);
            let outcome = kb.save(Feature::Keymap);
            return report_save(
                &mut ctx.out,
                &format!("Layout options set to {value}"),
                outcome,
            );
        }

        let Some(value) = info.layout_options else {
            return ctx.out.message("Keyboard has no layout options");
        };
        let choices = info.layout_choices()?;
        ctx.out.emit(
            &serde_json::json!({ "layout_options": value, "layout": choices }),
            |out| {
                writeln!(out, "Layout options: {value} (0x{value:08X})")?;
                for choice in &choices {
                    writeln!(out, "  {}: {}", choice.option, choice.choice)?;
                }
                Ok(())
            },
        )
    })
}
