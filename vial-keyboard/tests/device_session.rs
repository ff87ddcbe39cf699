//! Whole-session tests: capability negotiation, keymap and settings edits.
//!
//! Simulator-backed tests run by default. The hardware test needs a Vial
//! keyboard plugged in:
//! cargo test -p vial-keyboard --test device_session -- --ignored --nocapture

use std::collections::BTreeMap;
use std::sync::Arc;

use vial_keyboard::keycode::KeyNames;
use vial_keyboard::simulator::{SimulatedKeyboard, SimulatorConfig};
use vial_keyboard::{
    Feature, KbInfo, KeyboardError, KeyboardInterface, LoadOptions, SettingsMap, SettingsSchema,
};
use vial_transport::{HidDiscovery, Transport};

fn keyboard(config: SimulatorConfig) -> (Arc<SimulatedKeyboard>, KeyboardInterface) {
    let sim = Arc::new(SimulatedKeyboard::new(config));
    let kb = KeyboardInterface::new(sim.clone());
    (sim, kb)
}

#[test]
fn init_reads_no_bulk_data() {
    let (sim, kb) = keyboard(SimulatorConfig::default());
    let info = KbInfo::init(&kb).unwrap();
    let after_init = sim.reports_sent();

    let mut loaded = info.clone();
    loaded.load(&kb, &LoadOptions::all()).unwrap();
    // bulk tables cost far more exchanges than negotiation
    assert!(sim.reports_sent() > after_init * 2);
    assert!(info.keymap.is_none() && info.macros.is_none());
    assert_eq!(loaded.keymap().unwrap().layers().len(), 4);
}

#[test]
fn every_feature_reports_support_uniformly() {
    let (_sim, kb) = keyboard(SimulatorConfig {
        vial_protocol: 3,
        macro_count: 0,
        ..SimulatorConfig::default()
    });
    let mut info = KbInfo::init(&kb).unwrap();
    info.load(&kb, &LoadOptions::all()).unwrap();

    assert!(info.require(Feature::Keymap).is_ok());
    for feature in [
        Feature::Macros,
        Feature::Combos,
        Feature::TapDances,
        Feature::KeyOverrides,
        Feature::QmkSettings,
    ] {
        assert!(
            matches!(info.require(feature), Err(KeyboardError::NotSupported(f)) if f == feature),
            "{feature} should be unsupported"
        );
    }
}

#[test]
fn keymap_single_key_edit() {
    let (sim, kb) = keyboard(SimulatorConfig::default());
    let mut info = KbInfo::init(&kb).unwrap();
    info.load(&kb, &LoadOptions::none().with(Feature::Keymap))
        .unwrap();
    let names = info.key_names();

    let code = names.parse("LT(1, KC_SPC)").unwrap();
    kb.set_keycode(0, 1, 2, code).unwrap();
    info.keymap_mut().unwrap().set(0, 1, 2, code).unwrap();

    assert_eq!(sim.keycode(0, 1, 2), code);
    assert_eq!(names.stringify(sim.keycode(0, 1, 2)), "LT(1,KC_SPC)");
    assert_eq!(
        kb.read_keymap(info.geometry().unwrap()).unwrap(),
        *info.keymap().unwrap()
    );
}

#[test]
fn keymap_layer_bulk_write() {
    let (sim, kb) = keyboard(SimulatorConfig::default());
    let info = KbInfo::init(&kb).unwrap();
    let geometry = info.geometry().unwrap();
    let codes: Vec<u16> = (0..geometry.keys_per_layer() as u16).map(|i| 0x1E + i).collect();
    kb.write_keymap_layer(geometry, 3, &codes).unwrap();
    assert_eq!(sim.keycode(3, 0, 0), 0x1E);
    assert_eq!(sim.keycode(3, 1, 2), 0x23);
    assert!(matches!(
        kb.write_keymap_layer(geometry, 4, &codes),
        Err(KeyboardError::InvalidParameter(_))
    ));
}

#[test]
fn settings_by_name_keep_sibling_flags() {
    let (sim, kb) = keyboard(SimulatorConfig::default());
    let mut info = KbInfo::init(&kb).unwrap();
    info.load(&kb, &LoadOptions::none().with(Feature::QmkSettings))
        .unwrap();
    let schema = SettingsSchema::builtin();

    // permissive_hold lives in QSID 8 next to three other flags
    kb.set_qmk_setting(8, 1, 0b1000).unwrap();
    info.qmk_settings_mut().unwrap().insert(8, 0b1000);

    let mut requested = BTreeMap::new();
    requested.insert("permissive_hold".to_string(), 1);
    requested.insert("tapping_term".to_string(), 180);
    let writes = SettingsMap::from_entries(requested)
        .to_qsid_values(&schema, info.qmk_settings().unwrap())
        .unwrap();
    for (qsid, value) in &writes {
        let width = schema.width(*qsid).unwrap();
        kb.set_qmk_setting(*qsid, width, *value).unwrap();
    }

    assert_eq!(sim.setting(8), Some(0b1001));
    assert_eq!(sim.setting(7), Some(180));
    assert_eq!(sim.setting(2), Some(50));
}

#[test]
fn unknown_setting_is_rejected_before_any_write() {
    let (sim, kb) = keyboard(SimulatorConfig::default());
    let mut info = KbInfo::init(&kb).unwrap();
    info.load(&kb, &LoadOptions::none().with(Feature::QmkSettings))
        .unwrap();
    let before = sim.reports_sent();

    let mut requested = BTreeMap::new();
    requested.insert("tapping_term".to_string(), 180);
    requested.insert("warp_speed".to_string(), 9);
    let result = SettingsMap::from_entries(requested)
        .to_qsid_values(&SettingsSchema::builtin(), info.qmk_settings().unwrap());

    assert!(result.is_err());
    assert_eq!(sim.reports_sent(), before);
    assert_eq!(sim.setting(7), Some(200));
}

#[test]
fn closed_transport_refuses_traffic() {
    let (sim, kb) = keyboard(SimulatorConfig::default());
    kb.close().unwrap();
    assert!(!sim.is_open());
    assert!(matches!(
        kb.get_protocol_version(),
        Err(KeyboardError::Transport(_))
    ));
    // closing twice is harmless
    kb.close().unwrap();
}

/// Negotiate and load everything from a real keyboard, read-only
#[test]
#[ignore] // requires hardware
fn hardware_snapshot() {
    let transport = HidDiscovery::new()
        .open_first()
        .expect("No Vial keyboard found; plug one in");
    let kb = KeyboardInterface::new(Arc::new(transport));
    let mut info = KbInfo::init(&kb).unwrap();
    info.load(&kb, &LoadOptions::all()).unwrap();

    println!("{} (VIA {}, Vial {:?})", info.name, info.via_protocol, info.vial_protocol);
    println!("{:#?}", info.capabilities);
    kb.close().unwrap();
}
