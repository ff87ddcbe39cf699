//! `.svl` keyboard snapshots
//!
//! A snapshot is a JSON document holding everything the CLI can change:
//! keymap, macros, combos, tap dances, key overrides, QMK settings and the
//! layout options word. Key codes are stored by name, slot features as the
//! same definition strings the slot commands accept (an empty string is an
//! empty slot), and settings as raw values keyed by QSID. Settings keyed by
//! name are accepted on import as well.
//!
//! Import is planned first: every entry is parsed and checked against the
//! keyboard before the first write, so a bad file changes nothing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use vial_keyboard::keycode::KeyNames;
use vial_keyboard::macros::encode_buffer;
use vial_keyboard::slots::{self, Combos, KeyOverrides, Macros, TapDances};
use vial_keyboard::{
    CodecError, Feature, KbInfo, KeyCode, KeyboardError, KeyboardInterface, SaveOutcome,
    SettingsMap, SettingsSchema,
};
use vial_transport::TransportDeviceInfo;

use crate::commands::slots::SlotSyntax;

pub const SNAPSHOT_VERSION: u32 = 1;

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("invalid snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot version {0} is not supported (expected {expected})", expected = SNAPSHOT_VERSION)]
    UnsupportedVersion(u32),

    #[error("snapshot has {file} keymap layers but the keyboard has {device}")]
    TooManyLayers { file: usize, device: usize },

    #[error("keymap layer {layer} is {found} but the keyboard matrix is {expected}")]
    Geometry {
        layer: usize,
        found: String,
        expected: String,
    },

    #[error("keymap layer {layer} [{row},{col}]: {source}")]
    Key {
        layer: usize,
        row: usize,
        col: usize,
        source: CodecError,
    },

    #[error("snapshot has {0} entries but the keyboard does not support them")]
    Unsupported(Feature),

    #[error("{feature} {id} in the snapshot does not fit ({capacity} slots on this keyboard)")]
    Capacity {
        feature: Feature,
        id: usize,
        capacity: usize,
    },

    #[error("{feature} {id}: {source}")]
    Entry {
        feature: Feature,
        id: usize,
        source: CodecError,
    },

    #[error("macros: {0}")]
    Macros(CodecError),

    #[error("QMK settings: {0}")]
    Settings(CodecError),
}

/// Where the snapshot came from. Informational; never checked strictly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub name: String,
    pub vid: u16,
    pub pid: u16,
    pub via_protocol: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vial_protocol: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_options: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub device_info: DeviceInfo,
    /// layer -> row -> col key names
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keymap: Option<Vec<Vec<Vec<String>>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub macros: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub combos: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tap_dances: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_overrides: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qmk_settings: Option<SettingsMap>,
}

/// Every slot up to capacity, empty ones as ""
fn capture_slots<F: SlotSyntax>(info: &KbInfo, names: &dyn KeyNames) -> Option<Vec<String>> {
    let capacity = info.capabilities.slot_count(F::FEATURE)?;
    let table = F::slots(info)?;
    Some(
        (0..capacity)
            .map(|id| match table.get(id) {
                Some(record) if !F::is_empty(record) => F::describe(record, names),
                _ => String::new(),
            })
            .collect(),
    )
}

/// Parse a snapshot slot list into a full table for this keyboard
fn plan_slots<F: SlotSyntax>(
    entries: Option<&Vec<String>>,
    info: &KbInfo,
    names: &dyn KeyNames,
) -> Result<Option<Vec<F::Record>>, SnapshotError> {
    let Some(entries) = entries else {
        return Ok(None);
    };
    let configured = entries.iter().any(|e| !e.trim().is_empty());
    let Some(capacity) = info.capabilities.slot_count(F::FEATURE) else {
        if configured {
            return Err(SnapshotError::Unsupported(F::FEATURE));
        }
        debug!("Skipping empty {} list: not supported", F::FEATURE);
        return Ok(None);
    };

    let mut records = Vec::with_capacity(capacity);
    for (id, text) in entries.iter().enumerate() {
        if id >= capacity {
            if !text.trim().is_empty() {
                return Err(SnapshotError::Capacity {
                    feature: F::FEATURE,
                    id,
                    capacity,
                });
            }
            continue;
        }
        let record = F::parse_or_empty(text, id, names).map_err(|source| {
            SnapshotError::Entry {
                feature: F::FEATURE,
                id,
                source,
            }
        })?;
        records.push(record);
    }
    Ok(Some(records))
}

impl Snapshot {
    /// Snapshot of a keyboard whose features have been loaded
    pub fn capture(info: &KbInfo, device: &TransportDeviceInfo) -> Result<Self, KeyboardError> {
        let names = info.key_names();

        let keymap = match &info.keymap {
            Some(keymap) => Some(
                (0..keymap.geometry().layers)
                    .map(|layer| -> Result<Vec<Vec<String>>, KeyboardError> {
                        Ok(keymap
                            .rows(layer)?
                            .iter()
                            .map(|row| row.iter().map(|&code| names.stringify(code)).collect())
                            .collect())
                    })
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        Ok(Self {
            version: SNAPSHOT_VERSION,
            device_info: DeviceInfo {
                name: info.name.clone(),
                vid: device.vid,
                pid: device.pid,
                via_protocol: info.via_protocol,
                vial_protocol: info.vial_protocol,
                uid: info.uid.map(|uid| format!("{uid:016X}")),
                layout_options: info.layout_options,
            },
            keymap,
            macros: capture_slots::<Macros>(info, &names),
            combos: capture_slots::<Combos>(info, &names),
            tap_dances: capture_slots::<TapDances>(info, &names),
            key_overrides: capture_slots::<KeyOverrides>(info, &names),
            qmk_settings: info.qmk_settings.as_ref().map(SettingsMap::from_qsids),
        })
    }

    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        let snapshot: Self = serde_json::from_str(json)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::UnsupportedVersion(snapshot.version));
        }
        Ok(snapshot)
    }

    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Resolve and check every entry against the keyboard. Nothing is written.
    pub fn plan(&self, info: &KbInfo, schema: &SettingsSchema) -> Result<ImportPlan, SnapshotError> {
        if !self.device_info.name.is_empty() && self.device_info.name != info.name {
            warn!(
                "Snapshot was taken from \"{}\", importing into \"{}\"",
                self.device_info.name, info.name
            );
        }
        let names = info.key_names();

        let layout_options = match (self.device_info.layout_options, info.layout_options) {
            (Some(wanted), Some(current)) if wanted != current => Some(wanted),
            _ => None,
        };

        let mut keymap = Vec::new();
        if let Some(layers) = &self.keymap {
            let geometry = info
                .capabilities
                .keymap
                .ok_or(SnapshotError::Unsupported(Feature::Keymap))?;
            if layers.len() > geometry.layers {
                return Err(SnapshotError::TooManyLayers {
                    file: layers.len(),
                    device: geometry.layers,
                });
            }
            for (layer, rows) in layers.iter().enumerate() {
                if rows.len() != geometry.rows || rows.iter().any(|r| r.len() != geometry.cols) {
                    let widest = rows.iter().map(Vec::len).max().unwrap_or(0);
                    return Err(SnapshotError::Geometry {
                        layer,
                        found: format!("{}x{widest}", rows.len()),
                        expected: format!("{}x{}", geometry.rows, geometry.cols),
                    });
                }
                let mut codes = Vec::with_capacity(geometry.keys_per_layer());
                for (row, keys) in rows.iter().enumerate() {
                    for (col, key) in keys.iter().enumerate() {
                        let code = names.parse(key).map_err(|source| SnapshotError::Key {
                            layer,
                            row,
                            col,
                            source,
                        })?;
                        codes.push(code);
                    }
                }
                keymap.push((layer, codes));
            }
        }

        let macros = plan_slots::<Macros>(self.macros.as_ref(), info, &names)?;
        if let (Some(table), Some(cap)) = (&macros, info.capabilities.macros) {
            encode_buffer(
                table,
                cap.count,
                info.vial_protocol.unwrap_or(0),
                cap.buffer_size,
            )
            .map_err(SnapshotError::Macros)?;
        }

        let qmk_settings = match &self.qmk_settings {
            Some(map) if !map.is_empty() => {
                let supported = info
                    .capabilities
                    .qmk_settings
                    .as_ref()
                    .ok_or(SnapshotError::Unsupported(Feature::QmkSettings))?;
                let current = info.qmk_settings.clone().unwrap_or_default();
                let values = map
                    .to_qsid_values(schema, &current)
                    .map_err(SnapshotError::Settings)?;
                let mut planned = BTreeMap::new();
                for (qsid, value) in values {
                    match schema.width(qsid) {
                        Some(width) if supported.contains(&qsid) => {
                            planned.insert(qsid, (width, value));
                        }
                        _ => warn!("Skipping QSID {qsid}: not supported by this keyboard"),
                    }
                }
                Some(planned)
            }
            _ => None,
        };

        Ok(ImportPlan {
            layout_options,
            keymap,
            macros,
            combos: plan_slots::<Combos>(self.combos.as_ref(), info, &names)?,
            tap_dances: plan_slots::<TapDances>(self.tap_dances.as_ref(), info, &names)?,
            key_overrides: plan_slots::<KeyOverrides>(self.key_overrides.as_ref(), info, &names)?,
            qmk_settings,
        })
    }
}

/// A validated import, ready to write
#[derive(Debug, Clone)]
pub struct ImportPlan {
    layout_options: Option<u32>,
    keymap: Vec<(usize, Vec<KeyCode>)>,
    macros: Option<Vec<vial_keyboard::Macro>>,
    combos: Option<Vec<vial_keyboard::Combo>>,
    tap_dances: Option<Vec<vial_keyboard::TapDance>>,
    key_overrides: Option<Vec<vial_keyboard::KeyOverride>>,
    /// QSID -> (width, raw value)
    qmk_settings: Option<BTreeMap<u16, (u8, u32)>>,
}

/// What an import contains, or what it changed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub layout_options: bool,
    pub keymap_layers: Vec<usize>,
    pub macros: Vec<usize>,
    pub combos: Vec<usize>,
    pub tap_dances: Vec<usize>,
    pub key_overrides: Vec<usize>,
    pub qmk_settings: Vec<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub save: Option<SaveOutcome>,
}

impl ImportReport {
    pub fn is_empty(&self) -> bool {
        !self.layout_options
            && self.keymap_layers.is_empty()
            && self.macros.is_empty()
            && self.combos.is_empty()
            && self.tap_dances.is_empty()
            && self.key_overrides.is_empty()
            && self.qmk_settings.is_empty()
    }
}

fn apply_slots<F: SlotSyntax>(
    kb: &KeyboardInterface,
    info: &mut KbInfo,
    records: Option<Vec<F::Record>>,
    outcome: &mut Option<SaveOutcome>,
) -> Result<Vec<usize>, KeyboardError> {
    let Some(records) = records else {
        return Ok(Vec::new());
    };
    let (changed, saved) = slots::replace_all::<F>(kb, info, records)?;
    if !changed.is_empty() {
        *outcome = Some(saved);
    }
    Ok(changed)
}

impl ImportPlan {
    /// Everything the plan covers, without comparing against the keyboard
    pub fn contents(&self) -> ImportReport {
        let ids = |n: Option<usize>| (0..n.unwrap_or(0)).collect::<Vec<_>>();
        ImportReport {
            layout_options: self.layout_options.is_some(),
            keymap_layers: self.keymap.iter().map(|(layer, _)| *layer).collect(),
            macros: ids(self.macros.as_ref().map(Vec::len)),
            combos: ids(self.combos.as_ref().map(Vec::len)),
            tap_dances: ids(self.tap_dances.as_ref().map(Vec::len)),
            key_overrides: ids(self.key_overrides.as_ref().map(Vec::len)),
            qmk_settings: self
                .qmk_settings
                .iter()
                .flat_map(|m| m.keys().copied())
                .collect(),
            save: None,
        }
    }

    /// Write what differs from the keyboard's current state.
    ///
    /// `info` must have loaded every feature the plan touches.
    pub fn apply(
        self,
        kb: &KeyboardInterface,
        info: &mut KbInfo,
    ) -> Result<ImportReport, KeyboardError> {
        let mut report = ImportReport::default();
        let mut outcome = None;

        if self.macros.is_some() {
            kb.require_unlocked()?;
        }

        if let Some(value) = self.layout_options {
            kb.set_layout_options(value)?;
            info.layout_options = Some(value);
            report.layout_options = true;
            outcome = Some(kb.save(Feature::Keymap));
        }

        if !self.keymap.is_empty() {
            let geometry = info.geometry()?;
            for (layer, codes) in &self.keymap {
                let keymap = info.keymap_mut()?;
                if keymap.layer(*layer)? == codes.as_slice() {
                    continue;
                }
                kb.write_keymap_layer(geometry, *layer, codes)?;
                for (i, &code) in codes.iter().enumerate() {
                    keymap.set(*layer, i / geometry.cols, i % geometry.cols, code)?;
                }
                report.keymap_layers.push(*layer);
            }
            if !report.keymap_layers.is_empty() {
                outcome = Some(kb.save(Feature::Keymap));
            }
        }

        report.macros = apply_slots::<Macros>(kb, info, self.macros, &mut outcome)?;
        report.combos = apply_slots::<Combos>(kb, info, self.combos, &mut outcome)?;
        report.tap_dances = apply_slots::<TapDances>(kb, info, self.tap_dances, &mut outcome)?;
        report.key_overrides =
            apply_slots::<KeyOverrides>(kb, info, self.key_overrides, &mut outcome)?;

        if let Some(settings) = self.qmk_settings {
            for (qsid, (width, value)) in settings {
                let current = info.qmk_settings()?.get(&qsid).copied();
                if current == Some(value) {
                    continue;
                }
                kb.set_qmk_setting(qsid, width, value)?;
                info.qmk_settings_mut()?.insert(qsid, value);
                report.qmk_settings.push(qsid);
            }
            if !report.qmk_settings.is_empty() {
                outcome = Some(kb.save(Feature::QmkSettings));
            }
        }

        report.save = outcome;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use vial_keyboard::simulator::{SimulatedKeyboard, SimulatorConfig};
    use vial_keyboard::LoadOptions;

    fn loaded(config: SimulatorConfig) -> (Arc<SimulatedKeyboard>, KeyboardInterface, KbInfo) {
        let sim = Arc::new(SimulatedKeyboard::new(config));
        let kb = KeyboardInterface::new(sim.clone());
        let mut info = KbInfo::init(&kb).unwrap();
        info.load(&kb, &LoadOptions::all()).unwrap();
        (sim, kb, info)
    }

    fn capture(info: &KbInfo, kb: &KeyboardInterface) -> Snapshot {
        Snapshot::capture(info, kb.device_info()).unwrap()
    }

    #[test]
    fn test_capture_shape() {
        let (_sim, kb, info) = loaded(SimulatorConfig::default());
        let snap = capture(&info, &kb);
        let geometry = info.geometry().unwrap();

        let keymap = snap.keymap.as_ref().unwrap();
        assert_eq!(keymap.len(), geometry.layers);
        assert_eq!(keymap[0].len(), geometry.rows);
        assert_eq!(keymap[0][0][0], "KC_A");
        assert_eq!(snap.macros.as_ref().unwrap().len(), info.macro_count().unwrap());
        assert!(snap.combos.as_ref().unwrap().iter().all(String::is_empty));
        assert_eq!(snap.device_info.vid, 0xFEED);
    }

    #[test]
    fn test_unchanged_import_writes_nothing() {
        let (sim, kb, mut info) = loaded(SimulatorConfig::default());
        let snap = capture(&info, &kb);
        let before = sim.reports_sent();

        let plan = snap.plan(&info, &SettingsSchema::builtin()).unwrap();
        let report = plan.apply(&kb, &mut info).unwrap();
        assert!(report.is_empty(), "{report:?}");
        // only the unlock check for macros
        assert_eq!(sim.reports_sent(), before + 1);
    }

    #[test]
    fn test_bad_entry_is_rejected_before_writes() {
        let (sim, _kb, info) = loaded(SimulatorConfig::default());
        let mut snap = Snapshot {
            combos: Some(vec!["KC_A+KC_S KC_D".into(), "KC_NOPE KC_X".into()]),
            ..Snapshot::default()
        };
        snap.version = SNAPSHOT_VERSION;
        let before = sim.reports_sent();
        let err = snap.plan(&info, &SettingsSchema::builtin()).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::Entry {
                feature: Feature::Combos,
                id: 1,
                ..
            }
        ));
        assert_eq!(sim.reports_sent(), before);
    }

    #[test]
    fn test_wrong_matrix_is_rejected() {
        let (_sim, _kb, info) = loaded(SimulatorConfig::default());
        let snap = Snapshot {
            keymap: Some(vec![vec![vec!["KC_A".to_string()]]]),
            ..Snapshot::default()
        };
        assert!(matches!(
            snap.plan(&info, &SettingsSchema::builtin()),
            Err(SnapshotError::Geometry { layer: 0, .. })
        ));
    }

    #[test]
    fn test_entries_past_capacity() {
        let (_sim, _kb, info) = loaded(SimulatorConfig::default());
        let mut combos = vec![String::new(); 8];
        combos.push(String::new());
        let snap = Snapshot {
            combos: Some(combos.clone()),
            ..Snapshot::default()
        };
        assert!(snap.plan(&info, &SettingsSchema::builtin()).is_ok());

        combos.push("KC_A+KC_S KC_D".to_string());
        let snap = Snapshot {
            combos: Some(combos),
            ..Snapshot::default()
        };
        assert!(matches!(
            snap.plan(&info, &SettingsSchema::builtin()),
            Err(SnapshotError::Capacity { id: 9, capacity: 8, .. })
        ));
    }

    #[test]
    fn test_unsupported_feature_with_data() {
        let (_sim, _kb, info) = loaded(SimulatorConfig {
            vial_protocol: 3,
            ..SimulatorConfig::default()
        });
        let snap = Snapshot {
            tap_dances: Some(vec!["TAP(KC_A)".to_string()]),
            ..Snapshot::default()
        };
        assert!(matches!(
            snap.plan(&info, &SettingsSchema::builtin()),
            Err(SnapshotError::Unsupported(Feature::TapDances))
        ));
    }

    #[test]
    fn test_macro_overflow_caught_in_plan() {
        let (_sim, _kb, info) = loaded(SimulatorConfig {
            macro_buffer_size: 24,
            ..SimulatorConfig::default()
        });
        let snap = Snapshot {
            macros: Some(vec!["TEXT(this text is far too long for the buffer)".to_string()]),
            ..Snapshot::default()
        };
        assert!(matches!(
            snap.plan(&info, &SettingsSchema::builtin()),
            Err(SnapshotError::Macros(CodecError::MacroBufferOverflow { .. }))
        ));
    }

    #[test]
    fn test_version_checked() {
        assert!(matches!(
            Snapshot::from_json(r#"{"version": 7}"#),
            Err(SnapshotError::UnsupportedVersion(7))
        ));
        let snap = Snapshot::from_json("{}").unwrap();
        assert_eq!(snap.version, SNAPSHOT_VERSION);
    }

    #[test]
    fn test_newer_version_message() {
        let err = Snapshot::from_json(r#"{"version": 2}"#).unwrap_err();
        assert!(matches!(err, SnapshotError::UnsupportedVersion(2)));
        assert_eq!(
            err.to_string(),
            "snapshot version 2 is not supported (expected 1)"
        );
        assert!(matches!(
            Snapshot::from_json("{not json"),
            Err(SnapshotError::Json(_))
        ));
    }
}
