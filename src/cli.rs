// CLI definitions using clap

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::parse_u16;
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "vialctl")]
#[command(author, version, about = "Configure Vial/VIA QMK keyboards over raw HID")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file path (default: ~/.config/vialctl/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More logging (-v debug, -vv trace); RUST_LOG overrides
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Output format
    #[arg(long, global = true, value_enum)]
    pub format: Option<OutputFormat>,

    /// Write command output to a file instead of stdout
    #[arg(long, global = true, value_name = "FILE")]
    pub output_file: Option<PathBuf>,

    #[command(flatten)]
    pub device: DeviceArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Which keyboard to talk to when several are attached
#[derive(Args, Debug, Default, Clone)]
pub struct DeviceArgs {
    /// USB vendor id (e.g. 0x4653)
    #[arg(long, global = true, value_parser = parse_u16)]
    pub vid: Option<u16>,

    /// USB product id
    #[arg(long, global = true, value_parser = parse_u16)]
    pub pid: Option<u16>,

    /// hidraw device path
    #[arg(long, global = true)]
    pub path: Option<String>,

    /// USB serial number
    #[arg(long, global = true)]
    pub serial: Option<String>,

    /// Response timeout in milliseconds
    #[arg(long, global = true)]
    pub timeout_ms: Option<i32>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List attached VIA/Vial keyboards
    #[command(visible_alias = "ls")]
    Devices,

    /// Show identity and supported features
    #[command(visible_aliases = ["version", "ver"])]
    Info,

    /// Show or change the layout options word
    Layout {
        /// New layout options value
        #[arg(long)]
        set: Option<u32>,
    },

    /// Keymap commands
    #[command(subcommand, visible_alias = "km")]
    Keymap(KeymapCommands),

    /// Macro slots, e.g. "DELAY(50), TAP(KC_A), TEXT(Hi)"
    #[command(subcommand, visible_alias = "m")]
    Macro(SlotCommands),

    /// Combo slots, e.g. "KC_A+KC_S KC_D"
    #[command(subcommand, visible_alias = "c")]
    Combo(SlotCommands),

    /// Tap-dance slots, e.g. "TAP(KC_A), HOLD(KC_LCTL), TERM(175)"
    #[command(subcommand, visible_alias = "td")]
    TapDance(SlotCommands),

    /// Key-override slots, e.g. "TRIGGER(KC_BSPC), REPLACEMENT(KC_DEL), TRIGGER_MODS(LSFT)"
    #[command(subcommand, visible_alias = "ko")]
    KeyOverride(SlotCommands),

    /// QMK settings
    #[command(subcommand, visible_alias = "qmk")]
    Settings(SettingsCommands),

    /// Save the keyboard configuration to a .svl file
    Export {
        /// Destination file (stdout when omitted)
        file: Option<PathBuf>,
    },

    /// Restore a keyboard configuration from a .svl file
    Import {
        file: PathBuf,

        /// Validate the file against the keyboard without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the Vial security lock state
    LockStatus,

    /// Unlock the keyboard (hold the unlock keys when asked)
    Unlock {
        /// Give up after this many seconds
        #[arg(long, default_value = "30")]
        timeout: u64,
    },

    /// Engage the Vial security lock
    Lock,

    /// Translate a key name to its code or a code to its name
    #[command(visible_alias = "kc")]
    Keycode {
        /// Key name (KC_A, LT(1,KC_SPC)) or code (0x0004)
        key: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum KeymapCommands {
    /// Print the keymap
    Show {
        /// Only this layer
        #[arg(short, long)]
        layer: Option<usize>,
    },

    /// Print one key
    Get {
        layer: usize,
        row: usize,
        col: usize,
    },

    /// Assign one key
    Set {
        layer: usize,
        row: usize,
        col: usize,
        /// Key name or code
        key: String,
    },
}

#[derive(Subcommand, Debug)]
pub enum SlotCommands {
    /// List configured slots
    #[command(visible_alias = "ls")]
    List,

    /// Show one slot
    Get { id: usize },

    /// Store a definition in the first free slot
    Add { definition: String },

    /// Replace the definition in a configured slot
    Edit { id: usize, definition: String },

    /// Clear a slot
    #[command(visible_aliases = ["rm", "del"])]
    Delete { id: usize },
}

#[derive(Subcommand, Debug)]
pub enum SettingsCommands {
    /// List supported settings and their values
    #[command(visible_alias = "ls")]
    List,

    /// Show one setting (name or QSID)
    Get { name: String },

    /// Change one setting (name or QSID)
    Set { name: String, value: String },

    /// Restore firmware defaults
    Reset,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_slot_command() {
        let cli = Cli::try_parse_from(["vialctl", "combo", "add", "KC_A+KC_S KC_D"]).unwrap();
        match cli.command {
            Commands::Combo(SlotCommands::Add { definition }) => {
                assert_eq!(definition, "KC_A+KC_S KC_D")
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "vialctl", "macro", "list", "--format", "json", "--vid", "0xFEED", "-vv",
        ])
        .unwrap();
        assert_eq!(cli.format, Some(OutputFormat::Json));
        assert_eq!(cli.device.vid, Some(0xFEED));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn test_negative_id_rejected() {
        assert!(Cli::try_parse_from(["vialctl", "tap-dance", "get", "-1"]).is_err());
    }
}
