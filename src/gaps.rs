use crate::detect::{DetectedFormat, FileDates};
use crate::error::{Error, Result};
use crate::heap::BoundedMinHeap;
use crate::index::{LineIndex, TimedEntry};
use crate::reader::open_window;
use chrono::{DateTime, SecondsFormat, Utc};
use itertools::Itertools;
use rayon::prelude::*;
use serde::Serialize;
use std::path::Path;

pub const DEFAULT_TOP_N: usize = 10;

/// Time between one timestamped record and the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapRecord {
    pub line: usize,
    pub timestamp: DateTime<Utc>,
    pub next_timestamp: DateTime<Utc>,
    pub duration_ms: i64,
    /// Empty until refinement reads the line from disk.
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TopGapsResult {
    pub gaps: Vec<GapRecord>,
    pub total_records: usize,
    pub log_span_ms: i64,
}

/// Gaps between adjacent entries. Non-positive durations (duplicate or
/// out-of-order timestamps) are dropped.
pub(crate) fn positive_gaps(entries: &[TimedEntry]) -> impl Iterator<Item = GapRecord> + '_ {
    entries.iter().tuple_windows().filter_map(|(curr, next)| {
        let duration_ms = (next.timestamp - curr.timestamp).num_milliseconds();
        (duration_ms > 0).then(|| GapRecord {
            line: curr.line,
            timestamp: curr.timestamp,
            next_timestamp: next.timestamp,
            duration_ms,
            text: String::new(),
        })
    })
}

fn gap_duration(gap: &GapRecord) -> i64 {
    gap.duration_ms
}

/// Approximate top-N gaps from the in-memory index, largest first.
pub fn find_top_gaps_from_index(index: &LineIndex, top_n: usize) -> TopGapsResult {
    let entries = index.timestamped();
    if entries.len() < 2 {
        return TopGapsResult { gaps: Vec::new(), total_records: entries.len(), log_span_ms: 0 };
    }
    let log_span_ms = (entries[entries.len() - 1].timestamp - entries[0].timestamp).num_milliseconds();

    let mut heap = BoundedMinHeap::new(top_n, gap_duration);
    for gap in positive_gaps(&entries) {
        heap.push(gap);
    }
    TopGapsResult { gaps: heap.into_sorted_desc(), total_records: entries.len(), log_span_ms }
}

/// Re-read the lines between `approx.line` and the next indexed line, looking
/// for a larger gap than the index saw, and fill in the record's line text.
pub fn refine_largest_gap(
    path: &Path,
    approx: &GapRecord,
    index: &LineIndex,
    format: &DetectedFormat,
    dates: &FileDates,
) -> Result<GapRecord> {
    let step = index.step.max(1);
    let (seek_line, seek_byte, end_line) = match index.position_of(approx.line) {
        Some(pos) => {
            let entry = &index.offsets[pos];
            let end = index.offsets.get(pos + 1).map(|e| e.line).unwrap_or(approx.line + step);
            (entry.line, entry.byte, end)
        }
        None => {
            let (line, byte) = index.seek_point(approx.line);
            (line, byte, approx.line + step)
        }
    };

    let mut best = approx.clone();
    let mut prev: Option<(usize, DateTime<Utc>, String)> = None;
    for raw in open_window(path, seek_line, seek_byte)? {
        let raw = raw.map_err(|e| Error::file(path, "read", e))?;
        if raw.number > end_line {
            break;
        }
        if raw.number < approx.line {
            continue;
        }
        let Some(ts) = format.match_line(&raw.text, dates).map(|m| m.timestamp) else {
            continue;
        };
        if let Some((prev_line, prev_ts, prev_text)) = prev.as_ref() {
            let duration_ms = (ts - *prev_ts).num_milliseconds();
            if duration_ms > best.duration_ms {
                best = GapRecord {
                    line: *prev_line,
                    timestamp: *prev_ts,
                    next_timestamp: ts,
                    duration_ms,
                    text: prev_text.clone(),
                };
            }
        }
        if raw.number == approx.line && best.text.is_empty() {
            best.text = raw.text.clone();
        }
        prev = Some((raw.number, ts, raw.text));
    }

    if best.text.is_empty() {
        if let Some((_, _, text)) = prev {
            best.text = text;
        }
    }
    Ok(best)
}

/// Worker count for refining `candidates` gaps: never more than the CPUs.
pub(crate) fn refine_threads(candidates: usize) -> usize {
    candidates.min(num_cpus::get()).max(1)
}

/// Refine every gap concurrently, one bounded read per gap, on a pool of at
/// most one worker per CPU. Output order matches input order.
pub(crate) fn refine_all(
    path: &Path,
    gaps: &[GapRecord],
    index: &LineIndex,
    format: &DetectedFormat,
    dates: &FileDates,
) -> Result<Vec<GapRecord>> {
    if gaps.is_empty() {
        return Ok(Vec::new());
    }
    let pool = rayon::ThreadPoolBuilder::new().num_threads(refine_threads(gaps.len())).build()?;
    pool.install(|| {
        gaps.par_iter()
            .map(|gap| refine_largest_gap(path, gap, index, format, dates))
            .collect::<Result<Vec<_>>>()
    })
}

/// Top-N slowest records with line-level precision: approximate candidates
/// from the index, each refined concurrently with its own bounded read.
pub fn find_slowest_records(
    path: &Path,
    index: &LineIndex,
    format: &DetectedFormat,
    dates: &FileDates,
    top_n: usize,
) -> Result<TopGapsResult> {
    let approx = find_top_gaps_from_index(index, top_n);
    if approx.gaps.is_empty() {
        return Ok(approx);
    }

    let mut refined = refine_all(path, &approx.gaps, index, format, dates)?;
    refined.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));

    tracing::info!(
        path = %path.display(),
        candidates = refined.len(),
        largest_ms = refined.first().map(|g| g.duration_ms).unwrap_or(0),
        "slowest records refined"
    );
    Ok(TopGapsResult { gaps: refined, total_records: approx.total_records, log_span_ms: approx.log_span_ms })
}

pub fn format_duration(ms: i64) -> String {
    if ms < 1_000 {
        return format!("{ms}ms");
    }
    if ms < 60_000 {
        return format!("{:.2}s", ms as f64 / 1000.0);
    }
    if ms < 3_600_000 {
        let min = ms / 60_000;
        let sec = (ms % 60_000) as f64 / 1000.0;
        return format!("{min}m {sec:.1}s");
    }
    let hrs = ms / 3_600_000;
    let min = (ms % 3_600_000) / 60_000;
    format!("{hrs}h {min}m")
}

pub fn format_gap_record(gap: &GapRecord) -> String {
    format!(
        "Line {}: {} gap ({} -> {})\n  >> {}",
        gap.line + 1,
        format_duration(gap.duration_ms),
        gap.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        gap.next_timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
        gap.text
    )
}
