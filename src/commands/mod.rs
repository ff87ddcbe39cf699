//! Command handlers for the CLI application.
//!
//! This module organizes command handlers by category:
//! - `devices`: device listing
//! - `info`: identity, capabilities, layout options
//! - `keymap`: keymap show/get/set
//! - `slots`: list/get/add/edit/delete shared by the slot features, with
//!   `macros`, `combos`, `tap_dances` and `key_overrides` supplying the
//!   per-feature syntax
//! - `settings`: QMK settings
//! - `snapshot`: .svl export/import
//! - `security`: Vial lock/unlock
//! - `keycode`: offline key name lookup
//!
//! Every handler receives a [`Context`]; the keyboard is only reachable
//! through [`with_keyboard`], which guarantees the handle is closed.

pub mod combos;
pub mod devices;
pub mod info;
pub mod key_overrides;
pub mod keycode;
pub mod keymap;
pub mod macros;
pub mod security;
pub mod settings;
pub mod slots;
pub mod snapshot;
pub mod tap_dances;

use std::sync::Arc;

use anyhow::Context as _;
use tracing::{debug, warn};
use vial_keyboard::keycode::KeyNames;
use vial_keyboard::{
    CodecError, KbInfo, KeyboardInterface, LoadOptions, QmkKeycodes, SaveOutcome, SettingsSchema,
};
use vial_transport::{DeviceFilter, DiscoveredDevice, HidDiscovery, Transport, TransportError};

use crate::cli::Commands;
use crate::output::Output;

/// Where keyboards come from
pub trait DeviceSource {
    fn list(&self) -> Result<Vec<DiscoveredDevice>, TransportError>;

    /// Open the keyboard selected by the user's filter
    fn open(&self) -> Result<Arc<dyn Transport>, TransportError>;
}

/// Real keyboards over hidapi
pub struct HidSource {
    discovery: HidDiscovery,
}

impl HidSource {
    pub fn new(filter: DeviceFilter, timeout_ms: Option<i32>) -> Self {
        let mut discovery = HidDiscovery::new().with_filter(filter);
        if let Some(ms) = timeout_ms {
            discovery = discovery.with_timeout(ms);
        }
        Self { discovery }
    }
}

impl DeviceSource for HidSource {
    fn list(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        self.discovery.list_devices()
    }

    fn open(&self) -> Result<Arc<dyn Transport>, TransportError> {
        Ok(Arc::new(self.discovery.open_first()?))
    }
}

/// Everything a command needs, passed explicitly
pub struct Context {
    pub devices: Box<dyn DeviceSource>,
    pub schema: SettingsSchema,
    pub out: Output,
}

impl Context {
    pub fn new(devices: Box<dyn DeviceSource>, schema: SettingsSchema, out: Output) -> Self {
        Self {
            devices,
            schema,
            out,
        }
    }
}

/// Closes the keyboard when dropped, on success, error or panic alike
struct Session {
    kb: KeyboardInterface,
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(e) = self.kb.close() {
            warn!("Failed to close keyboard: {e}");
        }
        debug!("Keyboard closed");
    }
}

/// Open the keyboard, negotiate, load what `load` asks for and run `f`.
///
/// This is the only way commands touch the device.
pub fn with_keyboard<T, F>(ctx: &mut Context, load: LoadOptions, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&mut Context, &KeyboardInterface, &mut KbInfo) -> anyhow::Result<T>,
{
    let transport = ctx.devices.open().context("opening keyboard")?;
    let session = Session {
        kb: KeyboardInterface::new(transport),
    };
    let mut info = KbInfo::init(&session.kb).context("reading keyboard capabilities")?;
    let load = load.with_schema(ctx.schema.clone());
    info.load(&session.kb, &load)
        .context("reading keyboard configuration")?;
    f(ctx, &session.kb, &mut info)
}

/// A definition parsed before the keyboard is opened.
///
/// Syntax errors fail immediately. A key name the built-in table does not
/// know may still be one of the board's custom keycodes, so that case is
/// parsed again once the definition has been read.
pub enum Parsed<T> {
    Ready(T),
    NeedsBoardNames(String),
}

pub type ParseFn<T> = fn(&str, &dyn KeyNames) -> Result<T, CodecError>;

impl<T> Parsed<T> {
    pub fn offline(text: &str, parse: ParseFn<T>) -> Result<Self, CodecError> {
        match parse(text, QmkKeycodes::builtin()) {
            Ok(record) => Ok(Parsed::Ready(record)),
            Err(CodecError::InvalidKey(key)) => {
                debug!("{key} is not a built-in key name; resolving with the keyboard's names");
                Ok(Parsed::NeedsBoardNames(text.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    pub fn resolve(self, names: &dyn KeyNames, parse: ParseFn<T>) -> Result<T, CodecError> {
        match self {
            Parsed::Ready(record) => Ok(record),
            Parsed::NeedsBoardNames(text) => parse(&text, names),
        }
    }
}

/// Report a save outcome. A volatile keyboard is not a failure;
/// `KeyboardInterface::save` has already logged the warning.
pub fn report_save(out: &mut Output, what: &str, outcome: SaveOutcome) -> anyhow::Result<()> {
    out.emit(
        &serde_json::json!({ "status": what, "save": outcome }),
        |buf| {
            use std::fmt::Write;
            writeln!(buf, "{what}")
        },
    )
}

/// Dispatch a parsed command
pub fn run(ctx: &mut Context, command: Commands) -> anyhow::Result<()> {
    use crate::cli::Commands as C;
    use vial_keyboard::slots::{Combos, KeyOverrides, Macros, TapDances};

    match command {
        C::Devices => devices::list(ctx),
        C::Info => info::info(ctx),
        C::Layout { set } => info::layout(ctx, set),
        C::Keymap(cmd) => keymap::run(ctx, cmd),
        C::Macro(cmd) => slots::run::<Macros>(ctx, cmd),
        C::Combo(cmd) => slots::run::<Combos>(ctx, cmd),
        C::TapDance(cmd) => slots::run::<TapDances>(ctx, cmd),
        C::KeyOverride(cmd) => slots::run::<KeyOverrides>(ctx, cmd),
        C::Settings(cmd) => settings::run(ctx, cmd),
        C::Export { file } => snapshot::export(ctx, file.as_deref()),
        C::Import { file, dry_run } => snapshot::import(ctx, &file, dry_run),
        C::LockStatus => security::status(ctx),
        C::Unlock { timeout } => security::unlock(ctx, timeout),
        C::Lock => security::lock(ctx),
        C::Keycode { key } => keycode::lookup(ctx, &key),
    }
}
