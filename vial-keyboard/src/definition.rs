//! Vial keyboard definition
//!
//! Vial firmware embeds its `keyboard.json` as an LZMA ("alone" format)
//! stream, fetched page by page. Only the parts a configuration client
//! needs are deserialized: name, matrix size, layout options and custom
//! keycodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Matrix {
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomKeycode {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default, rename = "shortName")]
    pub short_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Layouts {
    /// Either `"Name"` (on/off option) or `["Name", "Choice A", "Choice B", ..]`
    #[serde(default)]
    pub labels: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyboardDefinition {
    #[serde(default)]
    pub name: Option<String>,
    pub matrix: Matrix,
    #[serde(default)]
    pub layouts: Layouts,
    #[serde(default, rename = "customKeycodes")]
    pub custom_keycodes: Vec<CustomKeycode>,
}

/// A decoded layout option
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutChoice {
    pub option: String,
    pub choice: String,
}

impl KeyboardDefinition {
    /// Decompress and parse the raw definition blob
    pub fn decode(compressed: &[u8]) -> Result<Self, CodecError> {
        let mut json = Vec::new();
        lzma_rs::lzma_decompress(&mut &compressed[..], &mut json)
            .map_err(|e| CodecError::Definition(format!("decompression failed: {e:?}")))?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(json).map_err(|e| CodecError::Definition(e.to_string()))
    }

    pub fn custom_keycode_names(&self) -> Vec<String> {
        self.custom_keycodes.iter().map(|k| k.name.clone()).collect()
    }

    /// Unpack the layout-options word.
    ///
    /// Options are packed back to front: the last label occupies the lowest
    /// bits. An on/off option takes one bit, a choice of `n` takes enough bits
    /// to hold `n - 1`. Labels that need more than the word's 32 bits are a
    /// definition error.
    pub fn layout_choices(&self, mut value: u32) -> Result<Vec<LayoutChoice>, CodecError> {
        let mut out = Vec::new();
        let mut used = 0u32;
        for label in self.layouts.labels.iter().rev() {
            let (option, choices) = match label {
                Value::String(name) => (name.clone(), vec!["off".to_string(), "on".to_string()]),
                Value::Array(items) => {
                    let mut names = items.iter().filter_map(|v| v.as_str().map(str::to_string));
                    let Some(option) = names.next() else { continue };
                    (option, names.collect())
                }
                _ => continue,
            };
            let bits = choice_bits(choices.len());
            used += bits;
            if used > u32::BITS {
                return Err(CodecError::Definition(format!(
                    "layout option \"{option}\" does not fit in the 32-bit options word"
                )));
            }
            let mask = 1u32.checked_shl(bits).map_or(u32::MAX, |m| m - 1);
            let index = (value & mask) as usize;
            value = value.checked_shr(bits).unwrap_or(0);
            out.push(LayoutChoice {
                option,
                choice: choices
                    .get(index)
                    .cloned()
                    .unwrap_or_else(|| index.to_string()),
            });
        }
        out.reverse();
        Ok(out)
    }
}

fn choice_bits(choices: usize) -> u32 {
    let max = choices.saturating_sub(1).max(1) as u32;
    u32::BITS - max.leading_zeros()
}
