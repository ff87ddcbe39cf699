//! Optional user configuration
//!
//! Read from `~/.config/vialctl/config.toml` unless `--config` points
//! elsewhere. Every key is optional and command-line flags win.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::debug;
use vial_keyboard::SettingsSchema;
use vial_transport::DeviceFilter;

use crate::output::OutputFormat;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DeviceConfig {
    /// Vendor id, as an integer or a `"0xFEED"` string
    #[serde(deserialize_with = "de_hex_u16", skip_serializing_if = "Option::is_none")]
    pub vid: Option<u16>,
    #[serde(deserialize_with = "de_hex_u16", skip_serializing_if = "Option::is_none")]
    pub pid: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<OutputFormat>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsConfig {
    /// JSON file replacing the built-in QMK settings table
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub device: DeviceConfig,
    pub output: OutputConfig,
    pub settings: SettingsConfig,
}

fn de_hex_u16<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u16),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(v) => Ok(Some(v)),
        Raw::Text(s) => parse_u16(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

/// Decimal or `0x`-prefixed hexadecimal
pub fn parse_u16(s: &str) -> Result<u16, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| format!("invalid 16-bit id: {s}"))
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("vialctl")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn device_filter(&self) -> DeviceFilter {
        DeviceFilter {
            vid: self.device.vid,
            pid: self.device.pid,
            path: self.device.path.clone(),
            serial: self.device.serial.clone(),
        }
    }

    /// The configured settings schema, or the built-in one
    pub fn settings_schema(&self) -> anyhow::Result<SettingsSchema> {
        let Some(path) = &self.settings.schema else {
            return Ok(SettingsSchema::builtin());
        };
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings schema {}", path.display()))?;
        SettingsSchema::from_json(&json)
            .with_context(|| format!("parsing settings schema {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.device_filter().is_empty());
    }

    #[test]
    fn test_full_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[device]
vid = "0x4653"
pid = 1
serial = "vial:f64c2b3c"
timeout_ms = 2500

[output]
format = "json"
"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.device.vid, Some(0x4653));
        assert_eq!(config.device.pid, Some(1));
        assert_eq!(config.device.timeout_ms, Some(2500));
        assert_eq!(config.output.format, Some(OutputFormat::Json));
        assert_eq!(
            config.device_filter().serial.as_deref(),
            Some("vial:f64c2b3c")
        );
    }

    #[test]
    fn test_unknown_key_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[device]\nvendor = 1\n").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_schema_override() {
        let dir = tempfile::tempdir().unwrap();
        let schema = dir.path().join("schema.json");
        std::fs::write(
            &schema,
            r#"{"fields": [{"name": "tapping_term", "qsid": 7, "width": 2}]}"#,
        )
        .unwrap();
        let config = Config {
            settings: SettingsConfig {
                schema: Some(schema),
            },
            ..Config::default()
        };
        let loaded = config.settings_schema().unwrap();
        assert_eq!(loaded.fields().len(), 1);
        assert_eq!(loaded.width(7), Some(2));
    }

    #[test]
    fn test_parse_u16() {
        assert_eq!(parse_u16("0xFEED"), Ok(0xFEED));
        assert_eq!(parse_u16("4653"), Ok(4653));
        assert!(parse_u16("0x1FFFF").is_err());
    }
}
