//! Command-layer tests against the simulated keyboard.
//!
//! Each test parses a real command line and dispatches it through
//! `vialctl::run`, with the device source swapped for a simulator.

use std::sync::Arc;

use clap::Parser;
use serde_json::Value;
use vial_keyboard::simulator::{SimulatedKeyboard, SimulatorConfig};
use vial_keyboard::SettingsSchema;
use vial_transport::{DiscoveredDevice, Transport, TransportError};
use vialctl::cli::Cli;
use vialctl::{Context, DeviceSource, Output, OutputFormat};

struct SimSource(Arc<SimulatedKeyboard>);

impl DeviceSource for SimSource {
    fn list(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        Ok(vec![DiscoveredDevice {
            info: self.0.device_info().clone(),
        }])
    }

    fn open(&self) -> Result<Arc<dyn Transport>, TransportError> {
        self.0.reopen();
        Ok(self.0.clone())
    }
}

fn context(config: SimulatorConfig) -> (Arc<SimulatedKeyboard>, Context) {
    let sim = Arc::new(SimulatedKeyboard::new(config));
    let ctx = Context::new(
        Box::new(SimSource(sim.clone())),
        SettingsSchema::builtin(),
        Output::new(OutputFormat::Text, None),
    );
    (sim, ctx)
}

/// Run one command line and return what it rendered
fn exec(ctx: &mut Context, args: &[&str]) -> anyhow::Result<String> {
    let cli = Cli::try_parse_from(std::iter::once("vialctl").chain(args.iter().copied()))?;
    ctx.out = Output::new(cli.format.unwrap_or_default(), None);
    vialctl::run(ctx, cli.command)?;
    Ok(ctx.out.contents().to_string())
}

fn exec_json(ctx: &mut Context, args: &[&str]) -> Value {
    let mut args = args.to_vec();
    args.extend(["--format", "json"]);
    let out = exec(ctx, &args).unwrap();
    serde_json::from_str(&out).unwrap()
}

#[test]
fn combo_lifecycle() {
    let (sim, mut ctx) = context(SimulatorConfig::default());

    let added = exec_json(&mut ctx, &["combo", "add", "KC_A+KC_S KC_D"]);
    assert_eq!(added["status"], "Added combo 0");
    assert_eq!(added["save"], "auto_persisted");
    assert_eq!(sim.combo_record(0)[..4], [0x04, 0x00, 0x16, 0x00]);

    let listed = exec_json(&mut ctx, &["combo", "list"]);
    assert_eq!(listed["capacity"], 8);
    assert_eq!(listed["used"], 1);
    assert_eq!(listed["entries"][0]["definition"], "KC_A+KC_S KC_D");
    assert_eq!(listed["entries"][0]["output"], "KC_D");

    let text = exec(&mut ctx, &["combo", "get", "0"]).unwrap();
    assert_eq!(text, "combo 0: KC_A+KC_S KC_D\n");

    exec(&mut ctx, &["combo", "delete", "0"]).unwrap();
    let err = exec(&mut ctx, &["combo", "get", "0"]).unwrap_err();
    assert_eq!(err.to_string(), "combo 0 not found (slot is empty)");
}

#[test]
fn out_of_range_id() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    let err = exec(&mut ctx, &["macro", "delete", "99"]).unwrap_err();
    assert_eq!(err.to_string(), "macro 99 is out of range (valid ids: 0-15)");

    let err = exec(&mut ctx, &["macro", "get", "99"]).unwrap_err();
    assert_eq!(err.to_string(), "macro 99 is out of range (valid ids: 0-15)");
    let err = exec(&mut ctx, &["macro", "get", "16"]).unwrap_err();
    assert_eq!(err.to_string(), "macro 16 is out of range (valid ids: 0-15)");
    assert!(!sim.is_open());
}

#[test]
fn unused_id_in_range_is_not_found() {
    let (_sim, mut ctx) = context(SimulatorConfig::default());
    let err = exec(&mut ctx, &["macro", "get", "15"]).unwrap_err();
    assert_eq!(err.to_string(), "macro 15 not found (slot is empty)");
    let err = exec(&mut ctx, &["macro", "edit", "15", "TAP(KC_A)"]).unwrap_err();
    assert_eq!(err.to_string(), "macro 15 not found (slot is empty)");
}

#[test]
fn combo_with_kc_no_trigger_rejected() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    let err = exec(&mut ctx, &["combo", "add", "KC_NO+KC_A KC_D"]).unwrap_err();
    assert!(err.to_string().contains("KC_NO"), "{err}");
    assert_eq!(sim.reports_sent(), 0);
}

#[test]
fn invalid_definition_fails_before_device_io() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    let err = exec(&mut ctx, &["combo", "add", "KC_A+KC_B+KC_C+KC_D+KC_E KC_F"]).unwrap_err();
    assert!(err.to_string().contains("too many trigger keys"), "{err}");

    let err = exec(&mut ctx, &["macro", "add", "TAP(KC_A), BOGUS(1)"]).unwrap_err();
    assert!(err.to_string().contains("BOGUS"), "{err}");
    assert_eq!(sim.reports_sent(), 0);
}

#[test]
fn board_keycode_resolved_after_open() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    exec(&mut ctx, &["tap-dance", "add", "TAP(CK_SIM), HOLD(KC_LCTL)"]).unwrap();
    assert_eq!(sim.tap_dance_record(0)[..2], [0x00, 0x7E]);

    let text = exec(&mut ctx, &["tap-dance", "list"]).unwrap();
    assert!(text.contains("CK_SIM"), "{text}");
}

#[test]
fn keyboard_closed_after_failure() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    assert!(exec(&mut ctx, &["key-override", "get", "3"]).is_err());
    assert!(!sim.is_open());
}

#[test]
fn unsupported_feature_message() {
    let (_sim, mut ctx) = context(SimulatorConfig {
        combo_count: 0,
        ..SimulatorConfig::default()
    });
    let err = exec(&mut ctx, &["combo", "list"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "combo support is not available in this keyboard's firmware"
    );
}

#[test]
fn volatile_keyboard_reports_unsaved() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    sim.set_volatile(true);
    let added = exec_json(&mut ctx, &["key-override", "add", "TRIGGER(KC_BSPC), REPLACEMENT(KC_DEL), TRIGGER_MODS(LSFT)"]);
    assert_eq!(added["save"], "unavailable");
}

/// Shared sink for log lines written during one test
#[derive(Clone, Default)]
struct LogBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn volatile_keyboard_warns_once() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    sim.set_volatile(true);

    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let out = tracing::subscriber::with_default(subscriber, || {
        exec(&mut ctx, &["key-override", "add", "TRIGGER(KC_BSPC), REPLACEMENT(KC_DEL)"])
    })
    .unwrap();

    assert_eq!(out, "Added key override 0\n");
    let logs = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
    assert_eq!(logs.matches("lost at power-off").count(), 1, "{logs}");
    assert!(logs.contains("key override changes are held in RAM only"), "{logs}");
}

#[test]
fn keymap_set_and_get() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    exec(&mut ctx, &["keymap", "set", "0", "1", "2", "LT(1, KC_SPC)"]).unwrap();
    assert_eq!(sim.keycode(0, 1, 2), 0x412C);

    let key = exec_json(&mut ctx, &["keymap", "get", "0", "1", "2"]);
    assert_eq!(key["key"], "LT(1,KC_SPC)");
    assert_eq!(key["code"], "0x412C");

    let err = exec(&mut ctx, &["keymap", "set", "0", "2", "0", "KC_A"]).unwrap_err();
    assert!(err.to_string().contains("outside the 2x3 matrix"), "{err}");
}

#[test]
fn keymap_show_one_layer() {
    let (_sim, mut ctx) = context(SimulatorConfig::default());
    let layers = exec_json(&mut ctx, &["keymap", "show", "--layer", "0"]);
    assert_eq!(layers[0]["layer"], 0);
    assert_eq!(layers[0]["rows"][0][0], "KC_A");
    assert_eq!(layers[0]["rows"][1][2], "KC_F");
}

#[test]
fn settings_by_name() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    exec(&mut ctx, &["settings", "set", "tapping_term", "180"]).unwrap();
    assert_eq!(sim.setting(7), Some(180));

    exec(&mut ctx, &["settings", "set", "permissive_hold", "on"]).unwrap();
    exec(&mut ctx, &["settings", "set", "retro_tapping", "on"]).unwrap();
    assert_eq!(sim.setting(8), Some(0b1001));

    let values = exec_json(&mut ctx, &["settings", "get", "combo_term"]);
    assert_eq!(values[0]["value"], 50);

    let before = sim.reports_sent();
    assert!(exec(&mut ctx, &["settings", "set", "no_such_setting", "1"]).is_err());
    assert_eq!(sim.reports_sent(), before);
}

#[test]
fn unlock_then_edit_macros() {
    let (sim, mut ctx) = context(SimulatorConfig::default());
    sim.set_locked(true);
    let err = exec(&mut ctx, &["macro", "add", "TEXT(hi)"]).unwrap_err();
    assert!(err.to_string().contains("locked"), "{err}");

    exec(&mut ctx, &["unlock", "--timeout", "5"]).unwrap();
    let status = exec_json(&mut ctx, &["lock-status"]);
    assert_eq!(status["unlocked"], true);

    exec(&mut ctx, &["macro", "add", "TEXT(hi)"]).unwrap();
    assert_eq!(&sim.macro_buffer()[..3], b"hi\0");

    exec(&mut ctx, &["lock"]).unwrap();
    let status = exec_json(&mut ctx, &["lock-status"]);
    assert_eq!(status["unlocked"], false);
}

#[test]
fn export_then_import_into_another_keyboard() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("board.svl");
    let file_arg = file.to_str().unwrap();

    let (_src, mut ctx) = context(SimulatorConfig::default());
    exec(&mut ctx, &["keymap", "set", "1", "0", "0", "KC_ESC"]).unwrap();
    exec(&mut ctx, &["combo", "add", "KC_J+KC_K KC_ESC"]).unwrap();
    exec(&mut ctx, &["settings", "set", "tapping_term", "175"]).unwrap();
    exec(&mut ctx, &["export", file_arg]).unwrap();

    let (dst, mut ctx) = context(SimulatorConfig::default());
    let dry = exec_json(&mut ctx, &["import", file_arg, "--dry-run"]);
    assert_eq!(dry["combos"].as_array().unwrap().len(), 8);
    assert_eq!(dst.keycode(1, 0, 0), 0x0001);
    assert_eq!(dst.combo_record(0), vec![0; 10]);

    let report = exec_json(&mut ctx, &["import", file_arg]);
    assert_eq!(report["keymap_layers"], serde_json::json!([1]));
    assert_eq!(report["combos"], serde_json::json!([0]));
    assert_eq!(report["qmk_settings"], serde_json::json!([7]));
    assert_eq!(dst.keycode(1, 0, 0), 0x0029);
    assert_eq!(dst.setting(7), Some(175));

    let again = exec(&mut ctx, &["import", file_arg]).unwrap();
    assert!(again.starts_with("Keyboard already matches"), "{again}");
}

#[test]
fn import_rejects_bad_file_without_writes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("bad.svl");
    std::fs::write(
        &file,
        r#"{"version": 1, "combos": ["KC_A+KC_S KC_D", "KC_NOPE KC_X"]}"#,
    )
    .unwrap();

    let (sim, mut ctx) = context(SimulatorConfig::default());
    let err = exec(&mut ctx, &["import", file.to_str().unwrap()]).unwrap_err();
    assert!(err.to_string().contains("combo 1"), "{err}");
    assert_eq!(sim.combo_record(0), vec![0; 10]);
}

#[test]
fn info_and_devices() {
    let (_sim, mut ctx) = context(SimulatorConfig::default());
    let text = exec(&mut ctx, &["info"]).unwrap();
    assert!(text.contains("Keyboard:      Simulated 6-key"), "{text}");
    assert!(text.contains("combo: 8 slots"), "{text}");
    assert!(text.contains("Split Space: off"), "{text}");

    let devices = exec_json(&mut ctx, &["devices"]);
    assert_eq!(devices[0]["device_path"], "sim:0");
    assert_eq!(devices[0]["is_vial"], true);
}

#[test]
fn layout_option_roundtrip() {
    let (_sim, mut ctx) = context(SimulatorConfig::default());
    exec(&mut ctx, &["layout", "--set", "1"]).unwrap();
    let layout = exec_json(&mut ctx, &["layout"]);
    assert_eq!(layout["layout_options"], 1);
    assert_eq!(layout["layout"][0]["choice"], "on");
}
