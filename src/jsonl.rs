//! JSON Lines back to plain log lines, with field names picked by frequency.

use crate::error::{Error, Result};
use crate::reader::open_at;
use ahash::AHashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::Path;

pub const DEFAULT_FIELD_SAMPLE_LINES: usize = 50;

pub const TIMESTAMP_CANDIDATES: &[&str] =
    &["timestamp", "time", "ts", "@timestamp", "datetime", "date", "created_at", "logged_at"];
pub const LEVEL_CANDIDATES: &[&str] = &["level", "severity", "log_level", "loglevel", "lvl", "type"];
pub const MESSAGE_CANDIDATES: &[&str] = &["message", "msg", "text", "body", "description", "error", "log"];

/// Keys of the JSON objects in the first `max_lines` lines, most frequent
/// first, ties by name. Blank and non-object lines still count toward
/// `max_lines`.
pub fn detect_fields(path: &Path, max_lines: usize) -> Result<Vec<String>> {
    let mut counts: AHashMap<String, usize> = AHashMap::new();
    for raw in open_at(path, 0, 0)?.take(max_lines) {
        let raw = raw.map_err(|e| Error::file(path, "read", e))?;
        if raw.text.trim().is_empty() {
            continue;
        }
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(&raw.text) {
            for key in obj.keys() {
                *counts.entry(key.clone()).or_default() += 1;
            }
        }
    }
    let mut fields: Vec<(String, usize)> = counts.into_iter().collect();
    fields.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    Ok(fields.into_iter().map(|(k, _)| k).collect())
}

/// First of `candidates` present in `fields`, in candidate order.
pub fn pick_best(fields: &[String], candidates: &[&str]) -> Option<String> {
    candidates.iter().find(|c| fields.iter().any(|f| f.as_str() == **c)).map(|c| c.to_string())
}

/// Which keys make up an output line, in order: timestamp, `[LEVEL]`,
/// message, then `key=value` for each extra field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FieldSelection {
    pub timestamp: Option<String>,
    pub level: Option<String>,
    pub message: Option<String>,
    pub extra: Vec<String>,
}

impl FieldSelection {
    /// The best candidate for each role, with no extra fields.
    pub fn recommended(fields: &[String]) -> Self {
        Self {
            timestamp: pick_best(fields, TIMESTAMP_CANDIDATES),
            level: pick_best(fields, LEVEL_CANDIDATES),
            message: pick_best(fields, MESSAGE_CANDIDATES),
            extra: Vec::new(),
        }
    }

    /// Every detected field not already used for a role.
    pub fn unused<'f>(&self, fields: &'f [String]) -> Vec<&'f String> {
        let used = [&self.timestamp, &self.level, &self.message];
        fields.iter().filter(|f| !used.iter().any(|u| u.as_deref() == Some(f.as_str()))).collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConversionSummary {
    pub lines_written: usize,
    /// Lines that were not JSON objects, copied unchanged.
    pub lines_passed_through: usize,
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn field<'o>(obj: &'o Map<String, Value>, name: &Option<String>) -> Option<&'o Value> {
    name.as_deref().and_then(|n| obj.get(n))
}

/// Render one object as a log line according to `selection`.
pub fn render_line(obj: &Map<String, Value>, selection: &FieldSelection) -> String {
    let mut parts = Vec::new();
    if let Some(v) = field(obj, &selection.timestamp) {
        parts.push(scalar_text(v));
    }
    if let Some(v) = field(obj, &selection.level) {
        parts.push(format!("[{}]", scalar_text(v).to_uppercase()));
    }
    if let Some(v) = field(obj, &selection.message) {
        parts.push(scalar_text(v));
    }
    for name in &selection.extra {
        if let Some(v) = obj.get(name) {
            parts.push(format!("{name}={}", scalar_text(v)));
        }
    }
    parts.join(" ")
}

/// Stream `path` line by line, writing one log line per JSON object. Blank
/// lines are dropped; anything else that is not a JSON object is copied as is.
pub fn convert_jsonl_to_log<W: Write>(path: &Path, selection: &FieldSelection, writer: &mut W) -> Result<ConversionSummary> {
    let mut summary = ConversionSummary::default();
    for raw in open_at(path, 0, 0)? {
        let raw = raw.map_err(|e| Error::file(path, "read", e))?;
        if raw.text.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&raw.text) {
            Ok(Value::Object(obj)) => {
                writeln!(writer, "{}", render_line(&obj, selection)).map_err(Error::Output)?;
                summary.lines_written += 1;
            }
            _ => {
                writeln!(writer, "{}", raw.text).map_err(Error::Output)?;
                summary.lines_passed_through += 1;
            }
        }
    }
    writer.flush().map_err(Error::Output)?;
    tracing::info!(
        path = %path.display(),
        written = summary.lines_written,
        passed_through = summary.lines_passed_through,
        "converted from JSON Lines"
    );
    Ok(summary)
}
