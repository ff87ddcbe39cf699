//! Aggregated keyboard description
//!
//! A [`KbInfo`] is built once per session. [`KbInfo::init`] negotiates
//! what the firmware offers (identity, geometry, per-feature capacities)
//! without bulk reads; [`KbInfo::load`] then fetches the collections a
//! command asked for. Features the firmware lacks stay `None` and are
//! reported through [`KeyboardError::NotSupported`].

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::Serialize;
use tracing::{debug, info};

use crate::definition::KeyboardDefinition;
use crate::error::KeyboardError;
use crate::keycode::QmkKeycodes;
use crate::keymap::{Geometry, Keymap};
use crate::macros::{self, Macro};
use crate::qmk_settings::SettingsSchema;
use crate::{
    Combo, KeyOverride, KeyboardInterface, TapDance, VIAL_PROTOCOL_DYNAMIC,
    VIAL_PROTOCOL_QMK_SETTINGS,
};

/// Configurable keyboard features
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    Keymap,
    Macros,
    Combos,
    TapDances,
    KeyOverrides,
    QmkSettings,
}

impl Feature {
    pub const ALL: [Feature; 6] = [
        Feature::Keymap,
        Feature::Macros,
        Feature::Combos,
        Feature::TapDances,
        Feature::KeyOverrides,
        Feature::QmkSettings,
    ];
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Feature::Keymap => "keymap",
            Feature::Macros => "macro",
            Feature::Combos => "combo",
            Feature::TapDances => "tap dance",
            Feature::KeyOverrides => "key override",
            Feature::QmkSettings => "QMK settings",
        };
        f.write_str(name)
    }
}

/// Where a [`KbInfo`] is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Created,
    Initialized,
    Loaded,
}

/// Macro storage limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MacroCapacity {
    pub count: usize,
    pub buffer_size: usize,
}

/// What the firmware supports, as negotiated by [`KbInfo::init`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub keymap: Option<Geometry>,
    pub macros: Option<MacroCapacity>,
    pub combos: Option<usize>,
    pub tap_dances: Option<usize>,
    pub key_overrides: Option<usize>,
    /// Supported QSIDs
    pub qmk_settings: Option<Vec<u16>>,
}

impl Capabilities {
    pub fn supports(&self, feature: Feature) -> bool {
        match feature {
            Feature::Keymap => self.keymap.is_some(),
            Feature::Macros => self.macros.is_some(),
            Feature::Combos => self.combos.is_some(),
            Feature::TapDances => self.tap_dances.is_some(),
            Feature::KeyOverrides => self.key_overrides.is_some(),
            Feature::QmkSettings => self.qmk_settings.is_some(),
        }
    }

    /// Device-declared slot count for slot-addressed features
    pub fn slot_count(&self, feature: Feature) -> Option<usize> {
        match feature {
            Feature::Macros => self.macros.map(|m| m.count),
            Feature::Combos => self.combos,
            Feature::TapDances => self.tap_dances,
            Feature::KeyOverrides => self.key_overrides,
            Feature::Keymap | Feature::QmkSettings => None,
        }
    }
}

/// Which collections [`KbInfo::load`] fetches
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    features: BTreeSet<Feature>,
    schema: SettingsSchema,
}

impl LoadOptions {
    /// Load nothing beyond what `init` gathered
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self {
            features: Feature::ALL.into_iter().collect(),
            schema: SettingsSchema::default(),
        }
    }

    pub fn with(mut self, feature: Feature) -> Self {
        self.features.insert(feature);
        self
    }

    /// Schema used to size QMK setting reads
    pub fn with_schema(mut self, schema: SettingsSchema) -> Self {
        self.schema = schema;
        self
    }

    pub fn wants(&self, feature: Feature) -> bool {
        self.features.contains(&feature)
    }
}

/// Per-session keyboard snapshot
#[derive(Debug, Clone)]
pub struct KbInfo {
    state: LoadState,
    pub name: String,
    pub via_protocol: u16,
    pub vial_protocol: Option<u32>,
    pub uid: Option<u64>,
    pub layout_options: Option<u32>,
    pub definition: Option<KeyboardDefinition>,
    pub capabilities: Capabilities,
    pub keymap: Option<Keymap>,
    pub macros: Option<Vec<Macro>>,
    pub combos: Option<Vec<Combo>>,
    pub tap_dances: Option<Vec<TapDance>>,
    pub key_overrides: Option<Vec<KeyOverride>>,
    /// Raw values by QSID
    pub qmk_settings: Option<BTreeMap<u16, u32>>,
}

impl Default for KbInfo {
    fn default() -> Self {
        Self::new()
    }
}

/// Treat the firmware's "unhandled" answer as an absent capability
fn optional<T>(result: Result<T, KeyboardError>) -> Result<Option<T>, KeyboardError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(KeyboardError::Unhandled(command)) => {
            debug!("Command 0x{command:02X} not implemented by firmware");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

impl KbInfo {
    /// Empty snapshot in the `Created` state
    pub fn new() -> Self {
        Self {
            state: LoadState::Created,
            name: String::new(),
            via_protocol: 0,
            vial_protocol: None,
            uid: None,
            layout_options: None,
            definition: None,
            capabilities: Capabilities::default(),
            keymap: None,
            macros: None,
            combos: None,
            tap_dances: None,
            key_overrides: None,
            qmk_settings: None,
        }
    }

    /// Identity and capability negotiation, no bulk data
    pub fn init(kb: &KeyboardInterface) -> Result<Self, KeyboardError> {
        let mut info = Self::new();
        info.via_protocol = kb.get_protocol_version()?;
        info.name = kb.device_info().display_name();

        if kb.device_info().is_vial {
            let id = kb.get_keyboard_id()?;
            info.vial_protocol = Some(id.vial_protocol);
            info.uid = Some(id.uid);
            let definition = kb.get_definition()?;
            if let Some(name) = &definition.name {
                info.name = name.clone();
            }
            info.definition = Some(definition);
        }
        let vial_protocol = info.vial_protocol.unwrap_or(0);

        let layers = optional(kb.get_layer_count())?.unwrap_or(0) as usize;
        if let Some(matrix) = info.definition.as_ref().map(|d| d.matrix) {
            if matrix.rows > 0 && matrix.cols > 0 && layers > 0 {
                info.capabilities.keymap = Some(Geometry {
                    rows: matrix.rows,
                    cols: matrix.cols,
                    layers,
                });
            }
        }
        info.layout_options = optional(kb.get_layout_options())?;

        let macro_count = optional(kb.get_macro_count())?.unwrap_or(0) as usize;
        if macro_count > 0 {
            let buffer_size = optional(kb.get_macro_buffer_size())?.unwrap_or(0) as usize;
            if buffer_size > 0 {
                info.capabilities.macros = Some(MacroCapacity {
                    count: macro_count,
                    buffer_size,
                });
            }
        }

        if vial_protocol >= VIAL_PROTOCOL_DYNAMIC {
            let counts = kb.get_dynamic_counts()?;
            let nonzero = |n: u8| (n > 0).then_some(n as usize);
            info.capabilities.tap_dances = nonzero(counts.tap_dance);
            info.capabilities.combos = nonzero(counts.combo);
            info.capabilities.key_overrides = nonzero(counts.key_override);
        }
        if vial_protocol >= VIAL_PROTOCOL_QMK_SETTINGS {
            let supported = kb.query_qmk_settings()?;
            if !supported.is_empty() {
                info.capabilities.qmk_settings = Some(supported);
            }
        }

        for feature in Feature::ALL {
            if !info.capabilities.supports(feature) {
                info!("{feature} not available on this firmware");
            }
        }
        debug!("Capabilities: {:?}", info.capabilities);
        info.state = LoadState::Initialized;
        Ok(info)
    }

    /// Fetch the requested collections. Unsupported features are skipped.
    pub fn load(
        &mut self,
        kb: &KeyboardInterface,
        options: &LoadOptions,
    ) -> Result<(), KeyboardError> {
        if self.state == LoadState::Created {
            return Err(KeyboardError::InvalidParameter(
                "keyboard info must be initialized before loading".into(),
            ));
        }
        let caps = self.capabilities.clone();

        if let (true, Some(geometry)) = (options.wants(Feature::Keymap), caps.keymap) {
            self.keymap = Some(kb.read_keymap(geometry)?);
        }
        if let (true, Some(cap)) = (options.wants(Feature::Macros), caps.macros) {
            let buf = kb.read_macro_buffer(cap.buffer_size, cap.count)?;
            self.macros = Some(macros::decode_buffer(
                &buf,
                cap.count,
                self.vial_protocol.unwrap_or(0),
            ));
        }
        if let (true, Some(count)) = (options.wants(Feature::Combos), caps.combos) {
            self.combos = Some(
                (0..count)
                    .map(|i| kb.get_combo(i as u8))
                    .collect::<Result<_, _>>()?,
            );
        }
        if let (true, Some(count)) = (options.wants(Feature::TapDances), caps.tap_dances) {
            self.tap_dances = Some(
                (0..count)
                    .map(|i| kb.get_tap_dance(i as u8))
                    .collect::<Result<_, _>>()?,
            );
        }
        if let (true, Some(count)) = (options.wants(Feature::KeyOverrides), caps.key_overrides) {
            self.key_overrides = Some(
                (0..count)
                    .map(|i| kb.get_key_override(i as u8))
                    .collect::<Result<_, _>>()?,
            );
        }
        if let (true, Some(qsids)) = (options.wants(Feature::QmkSettings), &caps.qmk_settings) {
            let mut values = BTreeMap::new();
            for &qsid in qsids {
                match options.schema.width(qsid) {
                    Some(width) => {
                        values.insert(qsid, kb.get_qmk_setting(qsid, width)?);
                    }
                    None => debug!("Skipping QSID {qsid}: not in settings schema"),
                }
            }
            self.qmk_settings = Some(values);
        }

        self.state = LoadState::Loaded;
        Ok(())
    }

    pub fn state(&self) -> LoadState {
        self.state
    }

    /// Fail with `NotSupported` when the firmware lacks `feature`
    pub fn require(&self, feature: Feature) -> Result<(), KeyboardError> {
        if self.capabilities.supports(feature) {
            Ok(())
        } else {
            Err(KeyboardError::NotSupported(feature))
        }
    }

    pub fn geometry(&self) -> Result<Geometry, KeyboardError> {
        self.capabilities
            .keymap
            .ok_or(KeyboardError::NotSupported(Feature::Keymap))
    }

    pub fn rows(&self) -> Option<usize> {
        self.capabilities.keymap.map(|g| g.rows)
    }

    pub fn cols(&self) -> Option<usize> {
        self.capabilities.keymap.map(|g| g.cols)
    }

    pub fn layers(&self) -> Option<usize> {
        self.capabilities.keymap.map(|g| g.layers)
    }

    pub fn macro_count(&self) -> Option<usize> {
        self.capabilities.slot_count(Feature::Macros)
    }

    pub fn combo_count(&self) -> Option<usize> {
        self.capabilities.combos
    }

    pub fn tap_dance_count(&self) -> Option<usize> {
        self.capabilities.tap_dances
    }

    pub fn key_override_count(&self) -> Option<usize> {
        self.capabilities.key_overrides
    }

    /// Loaded keymap, or why there is none
    pub fn keymap(&self) -> Result<&Keymap, KeyboardError> {
        self.require(Feature::Keymap)?;
        self.keymap
            .as_ref()
            .ok_or(KeyboardError::NotLoaded(Feature::Keymap))
    }

    pub fn keymap_mut(&mut self) -> Result<&mut Keymap, KeyboardError> {
        self.require(Feature::Keymap)?;
        self.keymap
            .as_mut()
            .ok_or(KeyboardError::NotLoaded(Feature::Keymap))
    }

    /// Loaded QMK setting values by QSID
    pub fn qmk_settings(&self) -> Result<&BTreeMap<u16, u32>, KeyboardError> {
        self.require(Feature::QmkSettings)?;
        self.qmk_settings
            .as_ref()
            .ok_or(KeyboardError::NotLoaded(Feature::QmkSettings))
    }

    pub fn qmk_settings_mut(&mut self) -> Result<&mut BTreeMap<u16, u32>, KeyboardError> {
        self.require(Feature::QmkSettings)?;
        self.qmk_settings
            .as_mut()
            .ok_or(KeyboardError::NotLoaded(Feature::QmkSettings))
    }

    /// Key names for this board: the QMK table plus its custom keycodes
    pub fn key_names(&self) -> QmkKeycodes {
        let custom = self
            .definition
            .as_ref()
            .map(KeyboardDefinition::custom_keycode_names)
            .unwrap_or_default();
        QmkKeycodes::new().with_custom_keycodes(&custom)
    }

    /// Decoded layout options, when the definition labels them
    pub fn layout_choices(&self) -> Result<Vec<crate::definition::LayoutChoice>, KeyboardError> {
        match (&self.definition, self.layout_options) {
            (Some(def), Some(value)) => Ok(def.layout_choices(value)?),
            _ => Ok(Vec::new()),
        }
    }
}
