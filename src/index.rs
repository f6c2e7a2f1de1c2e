//! Sparse byte-offset line index and the seek-based reads built on it.
//!
//! The index records every `step`-th line with its byte offset and parsed
//! timestamp. It lets range reads, time lookups and gap refinement seek close
//! to their target instead of streaming a multi-gigabyte file from the start.

use crate::detect::{DetectedFormat, FileDates};
use crate::error::{Error, Result};
use crate::reader::{open_at, open_window, LineCursor};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;

pub const DEFAULT_INDEX_STEP: usize = 1000;
/// Files with fewer lines than this are re-indexed with [`SMALL_FILE_STEP`].
pub const SMALL_FILE_LINES: usize = 10_000;
pub const SMALL_FILE_STEP: usize = 10;

const INHERIT_LOOKBACK: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IndexEntry {
    pub line: usize,
    pub byte: u64,
    pub timestamp: Option<DateTime<Utc>>,
}

/// An index entry known to carry a timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedEntry {
    pub line: usize,
    pub byte: u64,
    pub timestamp: DateTime<Utc>,
}

/// Sparse sample of a file. `offsets` is ascending by line and by byte;
/// timestamps need not be monotonic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LineIndex {
    pub offsets: Vec<IndexEntry>,
    pub total_lines: usize,
    pub total_bytes: u64,
    pub step: usize,
}

impl LineIndex {
    pub fn timestamped(&self) -> Vec<TimedEntry> {
        self.offsets
            .iter()
            .filter_map(|e| e.timestamp.map(|timestamp| TimedEntry { line: e.line, byte: e.byte, timestamp }))
            .collect()
    }

    /// Line number and byte offset of the last indexed entry at or before `line`.
    pub fn seek_point(&self, line: usize) -> (usize, u64) {
        let idx = self.offsets.partition_point(|e| e.line <= line);
        match idx {
            0 => (0, 0),
            _ => (self.offsets[idx - 1].line, self.offsets[idx - 1].byte),
        }
    }

    /// Position in `offsets` of the entry recorded for exactly `line`.
    pub fn position_of(&self, line: usize) -> Option<usize> {
        self.offsets.binary_search_by_key(&line, |e| e.line).ok()
    }
}

/// Stream `path` once, recording every `step`-th line.
pub fn build_line_index(path: &Path, format: &DetectedFormat, dates: &FileDates, step: usize) -> Result<LineIndex> {
    let step = step.max(1);
    let mut cursor = open_at(path, 0, 0)?;
    let mut offsets = Vec::new();
    for raw in cursor.by_ref() {
        let raw = raw.map_err(|e| Error::file(path, "read", e))?;
        if raw.number % step == 0 {
            let timestamp = format.match_line(&raw.text, dates).map(|m| m.timestamp);
            offsets.push(IndexEntry { line: raw.number, byte: raw.byte, timestamp });
        }
    }
    let (total_lines, total_bytes) = cursor.position();
    tracing::debug!(
        path = %path.display(),
        total_lines,
        entries = offsets.len(),
        step,
        "line index built"
    );
    Ok(LineIndex { offsets, total_lines, total_bytes, step })
}

fn cursor_for(path: &Path, start_line: usize, index: Option<&LineIndex>) -> Result<LineCursor<std::io::BufReader<std::fs::File>>> {
    let (line, byte) = index.map(|i| i.seek_point(start_line)).unwrap_or((0, 0));
    open_window(path, line, byte)
}

/// Lines `start_line..=end_line`, seeking via `index` when given.
pub fn read_line_range(path: &Path, start_line: usize, end_line: usize, index: Option<&LineIndex>) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    if start_line > end_line {
        return Ok(lines);
    }
    for raw in cursor_for(path, start_line, index)? {
        let raw = raw.map_err(|e| Error::file(path, "read", e))?;
        if raw.number > end_line {
            break;
        }
        if raw.number >= start_line {
            lines.push(raw.text);
        }
    }
    Ok(lines)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JumpResult {
    pub line: usize,
    pub timestamp: DateTime<Utc>,
    pub line_text: String,
}

fn distance_ms(a: DateTime<Utc>, b: DateTime<Utc>) -> i64 {
    (a - b).num_milliseconds().abs()
}

/// Find the line whose timestamp is closest to `target`.
///
/// Binary search over the timestamped index entries narrows the search to one
/// entry; the lines between its neighbours are then re-read and scanned, since
/// the true nearest line is usually not an indexed one. Targets outside the
/// file's range resolve to the nearest boundary line. `None` only when the
/// index has no timestamps at all.
pub fn jump_to_timestamp(
    path: &Path,
    target: DateTime<Utc>,
    format: &DetectedFormat,
    dates: &FileDates,
    index: &LineIndex,
) -> Result<Option<JumpResult>> {
    let indexed = index.timestamped();
    if indexed.is_empty() {
        return Ok(None);
    }

    let (mut lo, mut hi) = (0isize, indexed.len() as isize - 1);
    let mut best_idx = 0usize;
    let mut best_diff = i64::MAX;
    while lo <= hi {
        let mid = ((lo + hi) / 2) as usize;
        let ts = indexed[mid].timestamp;
        let diff = distance_ms(ts, target);
        if diff < best_diff {
            best_diff = diff;
            best_idx = mid;
        }
        if ts < target {
            lo = mid as isize + 1;
        } else if ts > target {
            hi = mid as isize - 1;
        } else {
            break;
        }
    }

    let step = index.step.max(1);
    let chunk_start = match best_idx {
        0 => indexed[0].line.saturating_sub(step),
        i => indexed[i - 1].line,
    };
    let chunk_end = match indexed.get(best_idx + 1) {
        Some(next) => next.line,
        None => (indexed[best_idx].line + step).min(index.total_lines.saturating_sub(1)),
    };
    let lines = read_line_range(path, chunk_start, chunk_end, Some(index))?;

    let mut closest_line = indexed[best_idx].line;
    let mut closest_ts = indexed[best_idx].timestamp;
    let mut closest_diff = best_diff;
    let mut closest_text: Option<&str> = None;
    for (i, text) in lines.iter().enumerate() {
        let Some(ts) = format.match_line(text, dates).map(|m| m.timestamp) else {
            continue;
        };
        let diff = distance_ms(ts, target);
        if diff < closest_diff {
            closest_diff = diff;
            closest_line = chunk_start + i;
            closest_ts = ts;
            closest_text = Some(text.as_str());
        }
    }

    let line_text = closest_text
        .or_else(|| lines.get(closest_line - chunk_start).map(String::as_str))
        .or_else(|| lines.first().map(String::as_str))
        .unwrap_or_default()
        .to_string();

    Ok(Some(JumpResult { line: closest_line, timestamp: closest_ts, line_text }))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineTimestamp {
    pub line: usize,
    pub timestamp: DateTime<Utc>,
    pub text: String,
}

/// Timestamps for lines `start_line..=end_line`. Continuation lines inherit the
/// previous parsed timestamp; a few lines before the range seed it. Lines with
/// nothing to inherit are left out.
pub fn timestamps_for_range(
    path: &Path,
    start_line: usize,
    end_line: usize,
    format: &DetectedFormat,
    dates: &FileDates,
    index: Option<&LineIndex>,
) -> Result<Vec<LineTimestamp>> {
    let mut out = Vec::new();
    if start_line > end_line {
        return Ok(out);
    }
    let lookback = start_line.saturating_sub(INHERIT_LOOKBACK);
    let mut last_ts: Option<DateTime<Utc>> = None;
    for raw in cursor_for(path, lookback, index)? {
        let raw = raw.map_err(|e| Error::file(path, "read", e))?;
        if raw.number > end_line {
            break;
        }
        if raw.number < lookback {
            continue;
        }
        if let Some(m) = format.match_line(&raw.text, dates) {
            last_ts = Some(m.timestamp);
        }
        if raw.number < start_line {
            continue;
        }
        if let Some(timestamp) = last_ts {
            out.push(LineTimestamp { line: raw.number, timestamp, text: raw.text });
        }
    }
    Ok(out)
}

/// All lines whose (own or inherited) timestamp lies in `[from, to]`. Only the
/// part of the file the index says can hold such times is read, widened by one
/// index step on each side.
pub fn filter_lines_by_time_range(
    path: &Path,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    format: &DetectedFormat,
    dates: &FileDates,
    index: &LineIndex,
) -> Result<Vec<LineTimestamp>> {
    let indexed = index.timestamped();
    if indexed.is_empty() {
        return Ok(Vec::new());
    }
    let last = indexed.len() - 1;

    // First entry whose successor is not before `from`.
    let mut start_idx = 0;
    while start_idx < last && indexed[start_idx + 1].timestamp < from {
        start_idx += 1;
    }
    // Last entry whose predecessor is not after `to`.
    let mut end_idx = last;
    while end_idx > 0 && indexed[end_idx - 1].timestamp > to {
        end_idx -= 1;
    }

    let start_idx = start_idx.saturating_sub(1);
    let end_idx = (end_idx + 1).min(last);
    let range_start = indexed[start_idx].line;
    let range_end = match indexed.get(end_idx + 1) {
        Some(next) => next.line,
        None => index.total_lines.saturating_sub(1),
    };

    let lines = timestamps_for_range(path, range_start, range_end, format, dates, Some(index))?;
    Ok(lines.into_iter().filter(|lt| lt.timestamp >= from && lt.timestamp <= to).collect())
}
