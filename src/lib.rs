//! vialctl: configure Vial/VIA QMK keyboards over raw HID
//!
//! The binary is a thin wrapper; everything it does is reachable from here
//! so commands can be driven against a simulated keyboard in tests.

pub mod cli;
pub mod commands;
pub mod config;
pub mod output;
pub mod svl;

pub use commands::{run, Context, DeviceSource, HidSource};
pub use output::{Output, OutputFormat};
