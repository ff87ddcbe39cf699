//! list/get/add/edit/delete for macros, combos, tap dances and key overrides.

use std::fmt::Write;

use serde::Serialize;
use serde_json::Value;
use vial_keyboard::keycode::KeyNames;
use vial_keyboard::slots::{self, SlotFeature};
use vial_keyboard::{CodecError, LoadOptions};

use super::{report_save, with_keyboard, Context, Parsed};
use crate::cli::SlotCommands;

/// Text syntax of a slot feature
pub trait SlotSyntax: SlotFeature {
    fn parse(text: &str, names: &dyn KeyNames) -> Result<Self::Record, CodecError>;

    /// Definition string that `parse` accepts back
    fn describe(record: &Self::Record, names: &dyn KeyNames) -> String;

    /// Structured form for `--format json`
    fn to_json(record: &Self::Record, names: &dyn KeyNames) -> Value;

    /// Snapshot form; an empty string stands for an empty slot
    fn parse_or_empty(
        text: &str,
        id: usize,
        names: &dyn KeyNames,
    ) -> Result<Self::Record, CodecError> {
        if text.trim().is_empty() {
            Ok(Self::empty(id))
        } else {
            Self::parse(text, names)
        }
    }
}

#[derive(Serialize)]
struct SlotEntry {
    id: usize,
    definition: String,
    #[serde(flatten)]
    record: Value,
}

#[derive(Serialize)]
struct SlotList {
    feature: String,
    capacity: usize,
    used: usize,
    entries: Vec<SlotEntry>,
}

fn entry<F: SlotSyntax>(id: usize, record: &F::Record, names: &dyn KeyNames) -> SlotEntry {
    SlotEntry {
        id,
        definition: F::describe(record, names),
        record: F::to_json(record, names),
    }
}

pub fn run<F: SlotSyntax>(ctx: &mut Context, cmd: SlotCommands) -> anyhow::Result<()> {
    let load = LoadOptions::none().with(F::FEATURE);
    match cmd {
        SlotCommands::List => with_keyboard(ctx, load, |ctx, _kb, info| {
            let names = info.key_names();
            let capacity = slots::capacity::<F>(info)?;
            let entries: Vec<SlotEntry> = slots::list::<F>(info)?
                .into_iter()
                .map(|(id, record)| entry::<F>(id, record, &names))
                .collect();
            let listing = SlotList {
                feature: F::FEATURE.to_string(),
                capacity,
                used: entries.len(),
                entries,
            };
            ctx.out.emit(&listing, |out| {
                if listing.entries.is_empty() {
                    return writeln!(out, "No {} configured ({capacity} slots)", F::FEATURE);
                }
                for e in &listing.entries {
                    writeln!(out, "{:>3}: {}", e.id, e.definition)?;
                }
                writeln!(out, "{} of {capacity} slots in use", listing.used)
            })
        }),

        SlotCommands::Get { id } => with_keyboard(ctx, load, |ctx, _kb, info| {
            let names = info.key_names();
            let e = entry::<F>(id, slots::get::<F>(info, id)?, &names);
            ctx.out
                .emit(&e, |out| writeln!(out, "{} {}: {}", F::FEATURE, e.id, e.definition))
        }),

        SlotCommands::Add { definition } => {
            let parsed = Parsed::offline(&definition, F::parse)?;
            with_keyboard(ctx, load, |ctx, kb, info| {
                let record = parsed.resolve(&info.key_names(), F::parse)?;
                let (id, outcome) = slots::add::<F>(kb, info, record)?;
                report_save(&mut ctx.out, &format!("Added {} {id}", F::FEATURE), outcome)
            })
        }

        SlotCommands::Edit { id, definition } => {
            let parsed = Parsed::offline(&definition, F::parse)?;
            with_keyboard(ctx, load, |ctx, kb, info| {
                let record = parsed.resolve(&info.key_names(), F::parse)?;
                let outcome = slots::edit::<F>(kb, info, id, record)?;
                report_save(&mut ctx.out, &format!("Updated {} {id}", F::FEATURE), outcome)
            })
        }

        SlotCommands::Delete { id } => with_keyboard(ctx, load, |ctx, kb, info| {
            let outcome = slots::delete::<F>(kb, info, id)?;
            report_save(&mut ctx.out, &format!("Deleted {} {id}", F::FEATURE), outcome)
        }),
    }
}
