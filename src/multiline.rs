//! Grouping of physical lines into log entries, and JSON Lines export.

use crate::detect::{DetectedFormat, FileDates, TimestampMatch};
use crate::error::{Error, Result};
use crate::reader::open_at;
use chrono::SecondsFormat;
use serde::Serialize;
use std::io::Write;
use std::path::Path;

pub const DEFAULT_MAX_MULTILINE_SIZE: usize = 1000;
const TRUNCATION_MARKER: &str = "\n[... truncated ...]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum MessageMode {
    /// First line with the timestamp and surrounding separators removed.
    #[default]
    FirstLineMinusTimestamp,
    FirstLineAsIs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JsonlOptions {
    pub message_mode: MessageMode,
    /// Lines kept per entry; the rest are replaced by a truncation marker.
    pub max_multiline_size: usize,
}

impl Default for JsonlOptions {
    fn default() -> Self {
        Self { message_mode: MessageMode::default(), max_multiline_size: DEFAULT_MAX_MULTILINE_SIZE }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogJsonEntry {
    pub timestamp: Option<String>,
    pub message: String,
    pub text: String,
}

struct Pending {
    entry: LogJsonEntry,
    line_count: usize,
    truncated: bool,
}

/// Folds lines into entries: a line carrying a timestamp starts a new entry,
/// anything else continues the current one.
pub struct EntryGrouper<'a> {
    format: &'a DetectedFormat,
    dates: &'a FileDates,
    options: JsonlOptions,
    current: Option<Pending>,
}

fn extract_message(line: &str, m: &TimestampMatch, mode: MessageMode) -> String {
    if mode == MessageMode::FirstLineAsIs {
        return line.to_string();
    }
    let mut stripped = String::with_capacity(line.len());
    stripped.push_str(&line[..m.start]);
    stripped.push_str(&line[m.end..]);
    let is_sep = |c: char| c.is_whitespace() || matches!(c, '-' | '|' | ':');
    let message = stripped.trim_matches(is_sep);
    if message.is_empty() {
        line.to_string()
    } else {
        message.to_string()
    }
}

impl<'a> EntryGrouper<'a> {
    pub fn new(format: &'a DetectedFormat, dates: &'a FileDates, options: JsonlOptions) -> Self {
        Self { format, dates, options, current: None }
    }

    /// Feed one line; returns the previous entry when `line` starts a new one.
    pub fn push(&mut self, line: &str) -> Option<LogJsonEntry> {
        if let Some(m) = self.format.match_line(line, self.dates) {
            let entry = LogJsonEntry {
                timestamp: Some(m.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
                message: extract_message(line, &m, self.options.message_mode),
                text: line.to_string(),
            };
            let done = self.current.take().map(|p| p.entry);
            self.current = Some(Pending { entry, line_count: 1, truncated: false });
            return done;
        }

        match self.current.as_mut() {
            Some(p) if p.line_count >= self.options.max_multiline_size => {
                if !p.truncated {
                    p.entry.text.push_str(TRUNCATION_MARKER);
                    p.truncated = true;
                }
            }
            Some(p) => {
                p.entry.text.push('\n');
                p.entry.text.push_str(line);
                p.line_count += 1;
            }
            None => {
                let entry = LogJsonEntry { timestamp: None, message: line.to_string(), text: line.to_string() };
                self.current = Some(Pending { entry, line_count: 1, truncated: false });
            }
        }
        None
    }

    pub fn finish(&mut self) -> Option<LogJsonEntry> {
        self.current.take().map(|p| p.entry)
    }
}

/// Stream `path` and write one JSON object per entry to `writer`. Returns the
/// number of entries written.
pub fn convert_to_jsonl<W: Write>(
    path: &Path,
    format: &DetectedFormat,
    dates: &FileDates,
    writer: &mut W,
    options: JsonlOptions,
) -> Result<usize> {
    let mut grouper = EntryGrouper::new(format, dates, options);
    let mut written = 0usize;
    let mut emit = |entry: LogJsonEntry, writer: &mut W| -> Result<()> {
        serde_json::to_writer(&mut *writer, &entry).map_err(|e| Error::Output(e.into()))?;
        writer.write_all(b"\n").map_err(Error::Output)?;
        written += 1;
        Ok(())
    };

    for raw in open_at(path, 0, 0)? {
        let raw = raw.map_err(|e| Error::file(path, "read", e))?;
        if let Some(entry) = grouper.push(&raw.text) {
            emit(entry, writer)?;
        }
    }
    if let Some(entry) = grouper.finish() {
        emit(entry, writer)?;
    }
    writer.flush().map_err(Error::Output)?;
    tracing::info!(path = %path.display(), entries = written, "converted to JSON Lines");
    Ok(written)
}
