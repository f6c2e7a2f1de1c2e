//! Grouping of lines that differ only in their timestamp and variable values.

use crate::detect::{DetectedFormat, FileDates};
use crate::error::{Error, Result};
use crate::masking::normalize_line;
use crate::reader::{open_at, LineCursor};
use ahash::AHashMap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::io::{self, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

pub const DEFAULT_SIMILAR_TOP_N: usize = 20;
/// Files smaller than this are always streamed.
pub const DEFAULT_EXTERNAL_MIN_BYTES: u64 = 8 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SimilarLineRecord {
    pub pattern: String,
    pub count: usize,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
    /// First line that produced this pattern.
    pub example_line: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimilarLinesResult {
    pub lines: Vec<SimilarLineRecord>,
    pub total_lines_analyzed: usize,
    /// Pattern count before truncation to `top_n`.
    pub total_unique_patterns: usize,
}

#[derive(Debug, Clone)]
pub struct SimilarLinesOptions {
    pub top_n: usize,
    /// Let an external `rg` process pre-filter large files.
    pub use_external_search: bool,
    pub external_min_bytes: u64,
    pub search_command: String,
}

impl Default for SimilarLinesOptions {
    fn default() -> Self {
        Self {
            top_n: DEFAULT_SIMILAR_TOP_N,
            use_external_search: true,
            external_min_bytes: DEFAULT_EXTERNAL_MIN_BYTES,
            search_command: "rg".to_string(),
        }
    }
}

struct Group {
    ordinal: usize,
    count: usize,
    first: DateTime<Utc>,
    last: DateTime<Utc>,
    example: String,
}

#[derive(Default)]
struct Accumulator {
    groups: AHashMap<String, Group>,
    analyzed: usize,
}

impl Accumulator {
    fn add(&mut self, line: String, format: &DetectedFormat, dates: &FileDates) {
        let Some(m) = format.match_line(&line, dates) else {
            return;
        };
        self.analyzed += 1;
        let key = normalize_line(&line, Some(&m));
        let next_ordinal = self.groups.len();
        let group = self.groups.entry(key).or_insert_with(|| Group {
            ordinal: next_ordinal,
            count: 0,
            first: m.timestamp,
            last: m.timestamp,
            example: line,
        });
        group.count += 1;
        group.first = group.first.min(m.timestamp);
        group.last = group.last.max(m.timestamp);
    }

    fn finish(self, top_n: usize) -> SimilarLinesResult {
        let total_unique_patterns = self.groups.len();
        let mut groups: Vec<(String, Group)> = self.groups.into_iter().collect();
        groups.sort_by(|a, b| b.1.count.cmp(&a.1.count).then(a.1.ordinal.cmp(&b.1.ordinal)));
        let lines = groups
            .into_iter()
            .take(top_n)
            .map(|(pattern, g)| SimilarLineRecord {
                pattern,
                count: g.count,
                first_timestamp: g.first,
                last_timestamp: g.last,
                example_line: g.example,
            })
            .collect();
        SimilarLinesResult { lines, total_lines_analyzed: self.analyzed, total_unique_patterns }
    }

    fn consume<R: io::BufRead>(
        &mut self,
        cursor: LineCursor<R>,
        format: &DetectedFormat,
        dates: &FileDates,
    ) -> io::Result<()> {
        for raw in cursor {
            self.add(raw?.text, format, dates);
        }
        Ok(())
    }
}

pub fn find_top_similar_lines(
    path: &Path,
    format: &DetectedFormat,
    dates: &FileDates,
    top_n: usize,
) -> Result<SimilarLinesResult> {
    let opts = SimilarLinesOptions { top_n, ..Default::default() };
    find_top_similar_lines_with(path, format, dates, &opts)
}

/// Count timestamped lines per normalized pattern, most frequent first. Equal
/// counts keep the order in which patterns first appear in the file.
pub fn find_top_similar_lines_with(
    path: &Path,
    format: &DetectedFormat,
    dates: &FileDates,
    opts: &SimilarLinesOptions,
) -> Result<SimilarLinesResult> {
    let size = std::fs::metadata(path).map_err(|e| Error::file(path, "stat", e))?.len();

    if opts.use_external_search && size >= opts.external_min_bytes {
        match external_scan(path, format, dates, &opts.search_command) {
            Ok(acc) => {
                tracing::debug!(path = %path.display(), "similar lines via external search");
                return Ok(acc.finish(opts.top_n));
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    command = %opts.search_command,
                    error = %e,
                    "external search unavailable, streaming instead"
                );
            }
        }
    }

    let mut acc = Accumulator::default();
    acc.consume(open_at(path, 0, 0)?, format, dates)
        .map_err(|e| Error::file(path, "read", e))?;
    let result = acc.finish(opts.top_n);
    tracing::info!(
        path = %path.display(),
        analyzed = result.total_lines_analyzed,
        patterns = result.total_unique_patterns,
        "similar lines grouped"
    );
    Ok(result)
}

fn external_scan(path: &Path, format: &DetectedFormat, dates: &FileDates, command: &str) -> io::Result<Accumulator> {
    let version = Command::new(command)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if !version.success() {
        return Err(io::Error::new(io::ErrorKind::Other, format!("{command} --version failed")));
    }

    let source = format.regex.as_str();
    let pattern = source.strip_prefix('^').unwrap_or(source);
    let mut child = Command::new(command)
        .args(["--no-heading", "--no-filename", "--no-line-number", "--color", "never", "--text"])
        .arg("--regexp")
        .arg(pattern)
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no stdout from search process"))?;
    let mut acc = Accumulator::default();
    // rg prints matching lines verbatim; every one is re-checked by `add`.
    let scanned = acc.consume(LineCursor::new(BufReader::new(stdout), 0, 0), format, dates);
    let status = child.wait()?;
    scanned?;
    // Exit code 1 means no line matched.
    match status.code() {
        Some(0 | 1) => Ok(acc),
        code => Err(io::Error::new(io::ErrorKind::Other, format!("{command} exited with {code:?}"))),
    }
}
