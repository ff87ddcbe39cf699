//! Output formatting for command results
//!
//! Commands render into an [`Output`] buffer in either text or JSON form.
//! The buffer is flushed once at the end, to stdout or to `--output-file`,
//! so a failing command never leaves half a document behind.

use std::fmt::Write as _;
use std::path::PathBuf;

use anyhow::Context;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Rendered command output
#[derive(Debug)]
pub struct Output {
    format: OutputFormat,
    destination: Option<PathBuf>,
    buf: String,
}

impl Output {
    pub fn new(format: OutputFormat, destination: Option<PathBuf>) -> Self {
        Self {
            format,
            destination,
            buf: String::new(),
        }
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Emit `value` as pretty JSON, or the text produced by `text`
    pub fn emit<T, F>(&mut self, value: &T, text: F) -> anyhow::Result<()>
    where
        T: Serialize + ?Sized,
        F: FnOnce(&mut String) -> std::fmt::Result,
    {
        match self.format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(value).context("serializing output")?;
                self.buf.push_str(&json);
                self.buf.push('\n');
            }
            OutputFormat::Text => text(&mut self.buf).context("formatting output")?,
        }
        Ok(())
    }

    /// A one-line status message (`{"status": ..}` in JSON)
    pub fn message(&mut self, msg: &str) -> anyhow::Result<()> {
        self.emit(&serde_json::json!({ "status": msg }), |out| writeln!(out, "{msg}"))
    }

    /// Everything rendered so far
    pub fn contents(&self) -> &str {
        &self.buf
    }

    /// Write the rendered output to its destination
    pub fn flush(&mut self) -> anyhow::Result<()> {
        let buf = std::mem::take(&mut self.buf);
        match &self.destination {
            Some(path) => std::fs::write(path, buf)
                .with_context(|| format!("writing {}", path.display()))?,
            None => print!("{buf}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Row {
        id: usize,
        name: &'static str,
    }

    #[test]
    fn test_text_and_json_forms() {
        let row = Row { id: 3, name: "combo" };

        let mut text = Output::new(OutputFormat::Text, None);
        text.emit(&row, |out| writeln!(out, "{}: {}", row.id, row.name))
            .unwrap();
        assert_eq!(text.contents(), "3: combo\n");

        let mut json = Output::new(OutputFormat::Json, None);
        json.emit(&row, |out| writeln!(out, "unused")).unwrap();
        let value: serde_json::Value = serde_json::from_str(json.contents()).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["name"], "combo");
    }

    #[test]
    fn test_flush_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.json");
        let mut out = Output::new(OutputFormat::Json, Some(path.clone()));
        out.message("ok").unwrap();
        out.flush().unwrap();
        let written = std::fs::read_to_string(path).unwrap();
        assert!(written.contains("\"status\": \"ok\""));
        assert!(out.contents().is_empty());
    }
}
