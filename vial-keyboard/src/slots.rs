//! Slot-addressed feature operations
//!
//! Macros, combos, tap dances and key overrides all live in fixed tables
//! whose size the firmware declares. Deleting writes the canonical empty
//! record into a slot; nothing is ever removed, so ids stay stable and a
//! freed slot is the first candidate for the next `add`.
//!
//! Every mutating operation works on a [`KbInfo`] that has loaded the
//! feature, updates the local copy, pushes it and reports the
//! [`SaveOutcome`].

use tracing::{debug, info};

use crate::error::KeyboardError;
use crate::kbinfo::{Feature, KbInfo};
use crate::macros::{self, Macro};
use crate::{Combo, KeyOverride, KeyboardInterface, SaveOutcome, TapDance};

/// A fixed-capacity table of records on the keyboard
pub trait SlotFeature {
    type Record: Clone + PartialEq;

    const FEATURE: Feature;

    /// `push` sends the whole table regardless of the id it is given
    const WHOLE_TABLE: bool = false;

    fn slots(info: &KbInfo) -> Option<&Vec<Self::Record>>;

    fn slots_mut(info: &mut KbInfo) -> Option<&mut Vec<Self::Record>>;

    fn is_empty(record: &Self::Record) -> bool;

    /// Canonical empty record for slot `id`
    fn empty(id: usize) -> Self::Record;

    /// Bind a freshly parsed record to slot `id`
    fn assign(_record: &mut Self::Record, _id: usize) {}

    /// Send slot `id` of the local table to the keyboard
    fn push(kb: &KeyboardInterface, info: &KbInfo, id: usize) -> Result<(), KeyboardError>;
}

pub struct Macros;
pub struct Combos;
pub struct TapDances;
pub struct KeyOverrides;

fn loaded_record<'a, T>(
    slots: Option<&'a Vec<T>>,
    feature: Feature,
    id: usize,
) -> Result<&'a T, KeyboardError> {
    slots
        .ok_or(KeyboardError::NotLoaded(feature))?
        .get(id)
        .ok_or(KeyboardError::NotFound { feature, id })
}

fn slot_index(id: usize) -> Result<u8, KeyboardError> {
    u8::try_from(id)
        .map_err(|_| KeyboardError::InvalidParameter(format!("slot {id} exceeds 8 bits")))
}

impl SlotFeature for Macros {
    type Record = Macro;
    const FEATURE: Feature = Feature::Macros;
    const WHOLE_TABLE: bool = true;

    fn slots(info: &KbInfo) -> Option<&Vec<Macro>> {
        info.macros.as_ref()
    }

    fn slots_mut(info: &mut KbInfo) -> Option<&mut Vec<Macro>> {
        info.macros.as_mut()
    }

    fn is_empty(record: &Macro) -> bool {
        record.is_empty()
    }

    fn empty(id: usize) -> Macro {
        Macro::empty(id)
    }

    fn assign(record: &mut Macro, id: usize) {
        record.id = id;
    }

    /// Macros share one buffer, so the whole table goes out at once
    fn push(kb: &KeyboardInterface, info: &KbInfo, _id: usize) -> Result<(), KeyboardError> {
        let capacity = info
            .capabilities
            .macros
            .ok_or(KeyboardError::NotSupported(Feature::Macros))?;
        let table = info
            .macros
            .as_ref()
            .ok_or(KeyboardError::NotLoaded(Feature::Macros))?;
        let buf = macros::encode_buffer(
            table,
            capacity.count,
            info.vial_protocol.unwrap_or(0),
            capacity.buffer_size,
        )?;
        kb.require_unlocked()?;
        kb.write_macro_buffer(&buf)
    }
}

impl SlotFeature for Combos {
    type Record = Combo;
    const FEATURE: Feature = Feature::Combos;

    fn slots(info: &KbInfo) -> Option<&Vec<Combo>> {
        info.combos.as_ref()
    }

    fn slots_mut(info: &mut KbInfo) -> Option<&mut Vec<Combo>> {
        info.combos.as_mut()
    }

    fn is_empty(record: &Combo) -> bool {
        record.is_empty()
    }

    fn empty(_id: usize) -> Combo {
        Combo::empty()
    }

    fn push(kb: &KeyboardInterface, info: &KbInfo, id: usize) -> Result<(), KeyboardError> {
        let record = loaded_record(info.combos.as_ref(), Self::FEATURE, id)?;
        kb.set_combo(slot_index(id)?, record)
    }
}

impl SlotFeature for TapDances {
    type Record = TapDance;
    const FEATURE: Feature = Feature::TapDances;

    fn slots(info: &KbInfo) -> Option<&Vec<TapDance>> {
        info.tap_dances.as_ref()
    }

    fn slots_mut(info: &mut KbInfo) -> Option<&mut Vec<TapDance>> {
        info.tap_dances.as_mut()
    }

    fn is_empty(record: &TapDance) -> bool {
        record.is_empty()
    }

    fn empty(_id: usize) -> TapDance {
        TapDance::empty()
    }

    fn push(kb: &KeyboardInterface, info: &KbInfo, id: usize) -> Result<(), KeyboardError> {
        let record = loaded_record(info.tap_dances.as_ref(), Self::FEATURE, id)?;
        kb.set_tap_dance(slot_index(id)?, record)
    }
}

impl SlotFeature for KeyOverrides {
    type Record = KeyOverride;
    const FEATURE: Feature = Feature::KeyOverrides;

    fn slots(info: &KbInfo) -> Option<&Vec<KeyOverride>> {
        info.key_overrides.as_ref()
    }

    fn slots_mut(info: &mut KbInfo) -> Option<&mut Vec<KeyOverride>> {
        info.key_overrides.as_mut()
    }

    fn is_empty(record: &KeyOverride) -> bool {
        record.is_empty()
    }

    fn empty(_id: usize) -> KeyOverride {
        KeyOverride::empty()
    }

    fn push(kb: &KeyboardInterface, info: &KbInfo, id: usize) -> Result<(), KeyboardError> {
        let record = loaded_record(info.key_overrides.as_ref(), Self::FEATURE, id)?;
        kb.set_key_override(slot_index(id)?, record)
    }
}

/// Declared slot count, or `NotSupported`
pub fn capacity<F: SlotFeature>(info: &KbInfo) -> Result<usize, KeyboardError> {
    info.capabilities
        .slot_count(F::FEATURE)
        .ok_or(KeyboardError::NotSupported(F::FEATURE))
}

/// The loaded table, padded with empty records up to capacity
fn table<F: SlotFeature>(info: &mut KbInfo) -> Result<&mut Vec<F::Record>, KeyboardError> {
    let capacity = capacity::<F>(info)?;
    let slots = F::slots_mut(info).ok_or(KeyboardError::NotLoaded(F::FEATURE))?;
    while slots.len() < capacity {
        let id = slots.len();
        slots.push(F::empty(id));
    }
    Ok(slots)
}

fn check_id<F: SlotFeature>(info: &KbInfo, id: usize) -> Result<usize, KeyboardError> {
    let capacity = capacity::<F>(info)?;
    if id >= capacity {
        return Err(KeyboardError::OutOfRange {
            feature: F::FEATURE,
            id,
            capacity,
        });
    }
    Ok(capacity)
}

/// Configured (non-empty) slots in id order
pub fn list<F: SlotFeature>(info: &KbInfo) -> Result<Vec<(usize, &F::Record)>, KeyboardError> {
    let capacity = capacity::<F>(info)?;
    let slots = F::slots(info).ok_or(KeyboardError::NotLoaded(F::FEATURE))?;
    Ok(slots
        .iter()
        .take(capacity)
        .enumerate()
        .filter(|(_, record)| !F::is_empty(record))
        .collect())
}

/// Configured slot `id`. An empty slot is `NotFound`.
pub fn get<F: SlotFeature>(info: &KbInfo, id: usize) -> Result<&F::Record, KeyboardError> {
    check_id::<F>(info, id)?;
    let slots = F::slots(info).ok_or(KeyboardError::NotLoaded(F::FEATURE))?;
    slots
        .get(id)
        .filter(|record| !F::is_empty(record))
        .ok_or(KeyboardError::NotFound {
            feature: F::FEATURE,
            id,
        })
}

/// First empty slot, if any
pub fn first_free<F: SlotFeature>(info: &KbInfo) -> Result<Option<usize>, KeyboardError> {
    let capacity = capacity::<F>(info)?;
    let slots = F::slots(info).ok_or(KeyboardError::NotLoaded(F::FEATURE))?;
    Ok((0..capacity).find(|&id| slots.get(id).map_or(true, |r| F::is_empty(r))))
}

fn reject_empty<F: SlotFeature>(record: &F::Record) -> Result<(), KeyboardError> {
    if F::is_empty(record) {
        return Err(KeyboardError::InvalidParameter(format!(
            "refusing to store an empty {}; use delete instead",
            F::FEATURE
        )));
    }
    Ok(())
}

/// Write `record` into slot `id`, push it and report persistence.
///
/// The local table is restored when the push fails, so `info` keeps
/// mirroring the keyboard.
fn store<F: SlotFeature>(
    kb: &KeyboardInterface,
    info: &mut KbInfo,
    id: usize,
    mut record: F::Record,
) -> Result<SaveOutcome, KeyboardError> {
    F::assign(&mut record, id);
    let previous = std::mem::replace(&mut table::<F>(info)?[id], record);
    if let Err(e) = F::push(kb, info, id) {
        table::<F>(info)?[id] = previous;
        return Err(e);
    }
    Ok(kb.save(F::FEATURE))
}

/// Store `record` in the first empty slot
pub fn add<F: SlotFeature>(
    kb: &KeyboardInterface,
    info: &mut KbInfo,
    record: F::Record,
) -> Result<(usize, SaveOutcome), KeyboardError> {
    reject_empty::<F>(&record)?;
    let capacity = capacity::<F>(info)?;
    let Some(id) = first_free::<F>(info)? else {
        return Err(KeyboardError::NoFreeSlot {
            feature: F::FEATURE,
            capacity,
            used: list::<F>(info)?.len(),
        });
    };
    debug!("Adding {} in slot {id}", F::FEATURE);
    let outcome = store::<F>(kb, info, id, record)?;
    info!("Added {} {id}", F::FEATURE);
    Ok((id, outcome))
}

/// Replace configured slot `id`
pub fn edit<F: SlotFeature>(
    kb: &KeyboardInterface,
    info: &mut KbInfo,
    id: usize,
    record: F::Record,
) -> Result<SaveOutcome, KeyboardError> {
    reject_empty::<F>(&record)?;
    get::<F>(info, id)?;
    let outcome = store::<F>(kb, info, id, record)?;
    info!("Updated {} {id}", F::FEATURE);
    Ok(outcome)
}

/// Clear configured slot `id`
pub fn delete<F: SlotFeature>(
    kb: &KeyboardInterface,
    info: &mut KbInfo,
    id: usize,
) -> Result<SaveOutcome, KeyboardError> {
    get::<F>(info, id)?;
    let outcome = store::<F>(kb, info, id, F::empty(id))?;
    info!("Deleted {} {id}", F::FEATURE);
    Ok(outcome)
}

/// Make the whole table match `records`, pushing only what differs.
///
/// Slots past the end of `records` become empty. Returns the ids that
/// changed. A failed push leaves the local copy of the failing slot (or
/// the whole macro table) as it was; slots pushed before it stay written.
pub fn replace_all<F: SlotFeature>(
    kb: &KeyboardInterface,
    info: &mut KbInfo,
    mut records: Vec<F::Record>,
) -> Result<(Vec<usize>, SaveOutcome), KeyboardError> {
    let capacity = capacity::<F>(info)?;
    if records.len() > capacity {
        return Err(KeyboardError::OutOfRange {
            feature: F::FEATURE,
            id: records.len() - 1,
            capacity,
        });
    }
    while records.len() < capacity {
        records.push(F::empty(records.len()));
    }
    for (id, record) in records.iter_mut().enumerate() {
        F::assign(record, id);
    }

    let current = table::<F>(info)?;
    let changed: Vec<usize> = (0..capacity)
        .filter(|&id| {
            let (old, new) = (&current[id], &records[id]);
            old != new && !(F::is_empty(old) && F::is_empty(new))
        })
        .collect();
    if changed.is_empty() {
        debug!("{} table unchanged", F::FEATURE);
        return Ok((changed, kb.save(F::FEATURE)));
    }

    if F::WHOLE_TABLE {
        let previous = std::mem::replace(current, records);
        if let Err(e) = F::push(kb, info, 0) {
            *table::<F>(info)? = previous;
            return Err(e);
        }
    } else {
        for &id in &changed {
            let record = records[id].clone();
            let previous = std::mem::replace(&mut table::<F>(info)?[id], record);
            if let Err(e) = F::push(kb, info, id) {
                table::<F>(info)?[id] = previous;
                return Err(e);
            }
        }
    }
    info!("Replaced {} {} slot(s)", changed.len(), F::FEATURE);
    Ok((changed, kb.save(F::FEATURE)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keycode::QmkKeycodes;
    use crate::simulator::{SimulatedKeyboard, SimulatorConfig};
    use crate::LoadOptions;
    use std::sync::Arc;

    fn loaded(feature: Feature) -> (Arc<SimulatedKeyboard>, KeyboardInterface, KbInfo) {
        let sim = Arc::new(SimulatedKeyboard::new(SimulatorConfig::default()));
        let kb = KeyboardInterface::new(sim.clone());
        let mut info = KbInfo::init(&kb).unwrap();
        info.load(&kb, &LoadOptions::none().with(feature)).unwrap();
        (sim, kb, info)
    }

    fn combo(s: &str) -> Combo {
        Combo::parse(s, QmkKeycodes::builtin()).unwrap()
    }

    #[test]
    fn test_add_is_first_fit() {
        let (_sim, kb, mut info) = loaded(Feature::Combos);
        assert_eq!(add::<Combos>(&kb, &mut info, combo("KC_A+KC_S KC_D")).unwrap().0, 0);
        assert_eq!(add::<Combos>(&kb, &mut info, combo("KC_J+KC_K KC_ESC")).unwrap().0, 1);
        assert_eq!(add::<Combos>(&kb, &mut info, combo("KC_Q+KC_W KC_TAB")).unwrap().0, 2);
        delete::<Combos>(&kb, &mut info, 1).unwrap();
        assert_eq!(add::<Combos>(&kb, &mut info, combo("KC_Z+KC_X KC_C")).unwrap().0, 1);
    }

    #[test]
    fn test_empty_slot_vs_out_of_range() {
        let (_sim, kb, mut info) = loaded(Feature::Combos);
        assert!(matches!(
            get::<Combos>(&info, 3),
            Err(KeyboardError::NotFound { id: 3, .. })
        ));
        assert!(matches!(
            delete::<Combos>(&kb, &mut info, 8),
            Err(KeyboardError::OutOfRange { capacity: 8, .. })
        ));
        assert!(matches!(
            edit::<Combos>(&kb, &mut info, 7, combo("KC_A+KC_B KC_C")),
            Err(KeyboardError::NotFound { .. })
        ));
    }

    #[test]
    fn test_full_table_reports_usage() {
        let sim = Arc::new(SimulatedKeyboard::new(SimulatorConfig {
            combo_count: 2,
            ..SimulatorConfig::default()
        }));
        let kb = KeyboardInterface::new(sim);
        let mut info = KbInfo::init(&kb).unwrap();
        info.load(&kb, &LoadOptions::none().with(Feature::Combos))
            .unwrap();
        add::<Combos>(&kb, &mut info, combo("KC_A+KC_S KC_D")).unwrap();
        add::<Combos>(&kb, &mut info, combo("KC_J+KC_K KC_L")).unwrap();
        assert!(matches!(
            add::<Combos>(&kb, &mut info, combo("KC_U+KC_I KC_O")),
            Err(KeyboardError::NoFreeSlot {
                capacity: 2,
                used: 2,
                ..
            })
        ));
    }

    #[test]
    fn test_unloaded_table_is_rejected() {
        let (_sim, kb, mut info) = loaded(Feature::Keymap);
        assert!(matches!(
            add::<Combos>(&kb, &mut info, combo("KC_A+KC_S KC_D")),
            Err(KeyboardError::NotLoaded(Feature::Combos))
        ));
    }

    #[test]
    fn test_failed_push_restores_local_table() {
        let (sim, kb, mut info) = loaded(Feature::Macros);
        sim.set_locked(true);
        let actions = macros::parse_actions("TAP(KC_A)", QmkKeycodes::builtin()).unwrap();
        assert!(matches!(
            add::<Macros>(&kb, &mut info, Macro::new(0, actions)),
            Err(KeyboardError::Locked)
        ));
        assert!(list::<Macros>(&info).unwrap().is_empty());
    }

    #[test]
    fn test_empty_record_is_not_stored() {
        let (_sim, kb, mut info) = loaded(Feature::TapDances);
        assert!(matches!(
            add::<TapDances>(&kb, &mut info, TapDance::empty()),
            Err(KeyboardError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_replace_all_pushes_only_changes() {
        let (sim, kb, mut info) = loaded(Feature::Combos);
        add::<Combos>(&kb, &mut info, combo("KC_A+KC_S KC_D")).unwrap();
        let before = sim.reports_sent();

        let records = vec![combo("KC_A+KC_S KC_D"), Combo::empty(), combo("KC_J+KC_K KC_L")];
        let (changed, _) = replace_all::<Combos>(&kb, &mut info, records).unwrap();
        assert_eq!(changed, vec![2]);
        assert_eq!(sim.reports_sent(), before + 1);
        assert_eq!(list::<Combos>(&info).unwrap().len(), 2);
    }

    #[test]
    fn test_replace_all_rejects_overflow() {
        let (_sim, kb, mut info) = loaded(Feature::Combos);
        let records = vec![combo("KC_A+KC_S KC_D"); 9];
        assert!(matches!(
            replace_all::<Combos>(&kb, &mut info, records),
            Err(KeyboardError::OutOfRange { id: 8, capacity: 8, .. })
        ));
        assert!(list::<Combos>(&info).unwrap().is_empty());
    }

    #[test]
    fn test_replace_all_macros_in_one_write() {
        let (sim, kb, mut info) = loaded(Feature::Macros);
        let names = QmkKeycodes::builtin();
        let records = vec![
            Macro::new(0, macros::parse_actions("TAP(KC_A)", names).unwrap()),
            Macro::new(0, macros::parse_actions("TEXT(ok)", names).unwrap()),
        ];
        let (changed, _) = replace_all::<Macros>(&kb, &mut info, records).unwrap();
        assert_eq!(changed, vec![0, 1]);
        assert_eq!(get::<Macros>(&info, 1).unwrap().id, 1);
        assert_eq!(&sim.macro_buffer()[..4], &[0x01, 0x01, 0x04, 0x00]);
    }
}
