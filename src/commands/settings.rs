//! QMK settings command handlers.

use std::fmt::Write;

use anyhow::{anyhow, bail};
use serde::Serialize;
use vial_keyboard::{Feature, KbInfo, LoadOptions, SettingField, SettingsSchema};

use super::{report_save, with_keyboard, Context};
use crate::cli::SettingsCommands;

#[derive(Serialize)]
struct SettingValue {
    name: String,
    qsid: u16,
    value: u32,
}

/// What `settings set` will write, resolved before the keyboard is opened
enum Target {
    /// One named value or flag, merged into the QSID's current raw value
    Field(SettingField, u32),
    /// A whole QSID, written as given
    Raw { qsid: u16, width: u8, value: u32 },
}

impl Target {
    fn resolve(schema: &SettingsSchema, key: &str, value: &str) -> anyhow::Result<Self> {
        if let Some(field) = schema.by_name(key) {
            let parsed = field.parse_value(value)?;
            return Ok(Target::Field(field.clone(), parsed));
        }
        let fields = schema.lookup(key)?;
        let qsid = fields[0].qsid;
        let width = schema.width(qsid).unwrap_or(fields[0].width);
        let raw = SettingField {
            name: qsid.to_string(),
            qsid,
            width,
            bit: None,
        };
        Ok(Target::Raw {
            qsid,
            width,
            value: raw.parse_value(value)?,
        })
    }

    fn qsid(&self) -> u16 {
        match self {
            Target::Field(field, _) => field.qsid,
            Target::Raw { qsid, .. } => *qsid,
        }
    }
}

fn require_supported(info: &KbInfo, qsid: u16, key: &str) -> anyhow::Result<()> {
    info.require(Feature::QmkSettings)?;
    if !info.qmk_settings()?.contains_key(&qsid) {
        bail!("setting {key} (QSID {qsid}) is not supported by this keyboard");
    }
    Ok(())
}

/// Values of every schema field the keyboard reported
fn known_values(schema: &SettingsSchema, info: &KbInfo) -> anyhow::Result<Vec<SettingValue>> {
    let raw = info.qmk_settings()?;
    Ok(schema
        .fields()
        .iter()
        .filter_map(|field| {
            raw.get(&field.qsid).map(|&value| SettingValue {
                name: field.name.clone(),
                qsid: field.qsid,
                value: field.extract(value),
            })
        })
        .collect())
}

pub fn run(ctx: &mut Context, cmd: SettingsCommands) -> anyhow::Result<()> {
    let load = LoadOptions::none().with(Feature::QmkSettings);
    match cmd {
        SettingsCommands::List => with_keyboard(ctx, load, |ctx, _kb, info| {
            info.require(Feature::QmkSettings)?;
            let values = known_values(&ctx.schema, info)?;
            let unnamed: Vec<u16> = info
                .capabilities
                .qmk_settings
                .iter()
                .flatten()
                .copied()
                .filter(|&qsid| ctx.schema.by_qsid(qsid).next().is_none())
                .collect();
            ctx.out.emit(&values, |out| {
                let width = values.iter().map(|v| v.name.len()).max().unwrap_or(0);
                for v in &values {
                    writeln!(out, "{:<width$}  {:>5}  (QSID {})", v.name, v.value, v.qsid)?;
                }
                if !unnamed.is_empty() {
                    let list: Vec<String> = unnamed.iter().map(u16::to_string).collect();
                    writeln!(out, "Unnamed QSIDs: {}", list.join(", "))?;
                }
                Ok(())
            })
        }),

        SettingsCommands::Get { name } => {
            // Unknown names fail before the keyboard is opened
            let fields: Vec<SettingField> =
                ctx.schema.lookup(&name)?.into_iter().cloned().collect();
            with_keyboard(ctx, load, |ctx, _kb, info| {
                require_supported(info, fields[0].qsid, &name)?;
                let raw = info.qmk_settings()?;
                let values: Vec<SettingValue> = fields
                    .iter()
                    .map(|field| SettingValue {
                        name: field.name.clone(),
                        qsid: field.qsid,
                        value: raw.get(&field.qsid).map_or(0, |&r| field.extract(r)),
                    })
                    .collect();
                ctx.out.emit(&values, |out| {
                    for v in &values {
                        writeln!(out, "{} = {}", v.name, v.value)?;
                    }
                    Ok(())
                })
            })
        }

        SettingsCommands::Set { name, value } => {
            let target = Target::resolve(&ctx.schema, &name, &value)?;
            with_keyboard(ctx, load, |ctx, kb, info| {
                let qsid = target.qsid();
                require_supported(info, qsid, &name)?;
                let current = info
                    .qmk_settings()?
                    .get(&qsid)
                    .copied()
                    .ok_or_else(|| anyhow!("QSID {qsid} was not read from the keyboard"))?;
                let (width, raw, shown) = match &target {
                    Target::Field(field, v) => (field.width, field.apply(current, *v), *v),
                    Target::Raw { width, value, .. } => (*width, *value, *value),
                };
                kb.set_qmk_setting(qsid, width, raw)?;
                info.qmk_settings_mut()?.insert(qsid, raw);
                let outcome = kb.save(Feature::QmkSettings);
                report_save(&mut ctx.out, &format!("{name} set to {shown}"), outcome)
            })
        }

        SettingsCommands::Reset => with_keyboard(ctx, LoadOptions::none(), |ctx, kb, info| {
            info.require(Feature::QmkSettings)?;
            kb.reset_qmk_settings()?;
            let outcome = kb.save(Feature::QmkSettings);
            report_save(&mut ctx.out, "QMK settings reset to defaults", outcome)
        }),
    }
}
