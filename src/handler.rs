use crate::config::Settings;
use crate::detect::{detect_timestamp_format, format_display_string, DetectedFormat, DetectionResult, FileDates, DEFAULT_MAX_SAMPLE};
use crate::error::Result;
use crate::gaps::{find_slowest_records, TopGapsResult};
use crate::index::{
    build_line_index, filter_lines_by_time_range, jump_to_timestamp, read_line_range, JumpResult, LineIndex,
    LineTimestamp, SMALL_FILE_LINES, SMALL_FILE_STEP,
};
use crate::reader::{file_dates, read_sample_lines};
use crate::similar::{find_top_similar_lines, SimilarLinesResult};
use crate::stats::{chunk_stats_report, ChunkStatsReport};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

/// One log file with its detected format and sparse index.
///
/// Nothing is read until [`initialize`](Self::initialize). Operations that
/// need a timestamp format return empty results when none was found.
#[derive(Debug)]
pub struct LogFileHandler {
    path: PathBuf,
    dates: FileDates,
    settings: Settings,
    use_fallback: bool,
    detection: Option<DetectionResult>,
    format: Option<DetectedFormat>,
    index: Option<LineIndex>,
}

impl LogFileHandler {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dates = file_dates(&path)?;
        Ok(Self {
            path,
            dates,
            settings: Settings::default(),
            use_fallback: false,
            detection: None,
            format: None,
            index: None,
        })
    }

    /// Like [`open`](Self::open), with the configured regex and format used
    /// whenever auto-detection is off or finds nothing.
    pub fn with_settings(path: impl AsRef<Path>, settings: Settings) -> Result<Self> {
        let mut handler = Self::open(path)?;
        handler.settings = settings;
        handler.use_fallback = true;
        Ok(handler)
    }

    pub fn initialize(&mut self) -> Result<()> {
        let detection = if self.settings.auto_detect {
            let lines = read_sample_lines(&self.path, DEFAULT_MAX_SAMPLE)?;
            Some(detect_timestamp_format(&lines, &self.dates, DEFAULT_MAX_SAMPLE))
        } else {
            None
        };

        let mut format = detection.as_ref().and_then(|d| d.format.clone().filter(|_| d.detected));
        if format.is_none() && self.use_fallback {
            tracing::debug!(path = %self.path.display(), regex = %self.settings.log_date_regex, "using configured timestamp format");
            format = Some(self.settings.fallback_format()?);
        }

        let index = match format.as_ref() {
            Some(fmt) => {
                let step = self.settings.index_step.max(1);
                let mut index = build_line_index(&self.path, fmt, &self.dates, step)?;
                if index.total_lines < SMALL_FILE_LINES && step > SMALL_FILE_STEP {
                    index = build_line_index(&self.path, fmt, &self.dates, SMALL_FILE_STEP)?;
                }
                Some(index)
            }
            None => None,
        };

        tracing::info!(
            path = %self.path.display(),
            pattern = format.as_ref().map(|f| f.pattern.as_str()).unwrap_or("none"),
            total_lines = index.as_ref().map(|i| i.total_lines).unwrap_or(0),
            "log file initialized"
        );
        self.detection = detection;
        self.format = format;
        self.index = index;
        Ok(())
    }

    /// Re-read file metadata and rebuild detection and index. Index references
    /// taken before this call describe the old file contents.
    pub fn refresh(&mut self) -> Result<()> {
        self.dates = file_dates(&self.path)?;
        self.detection = None;
        self.format = None;
        self.index = None;
        self.initialize()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn file_dates(&self) -> &FileDates {
        &self.dates
    }

    pub fn detection(&self) -> Option<&DetectionResult> {
        self.detection.as_ref()
    }

    pub fn format(&self) -> Option<&DetectedFormat> {
        self.format.as_ref()
    }

    pub fn index(&self) -> Option<&LineIndex> {
        self.index.as_ref()
    }

    pub fn total_lines(&self) -> usize {
        self.index.as_ref().map(|i| i.total_lines).unwrap_or(0)
    }

    pub fn display_string(&self) -> String {
        match (&self.detection, &self.format) {
            (Some(d), _) if d.detected => format_display_string(d),
            (_, Some(f)) => format!("{} (configured)", f.regex.as_str()),
            _ => "No timestamp format detected".to_string(),
        }
    }

    fn ready(&self) -> Option<(&DetectedFormat, &LineIndex)> {
        Some((self.format.as_ref()?, self.index.as_ref()?))
    }

    /// Nearest line to `target`; `None` without a format or index.
    pub fn jump(&self, target: DateTime<Utc>) -> Result<Option<JumpResult>> {
        match self.ready() {
            Some((format, index)) => jump_to_timestamp(&self.path, target, format, &self.dates, index),
            None => Ok(None),
        }
    }

    /// Lines `start_line..=end_line`, seeking through the index when built.
    pub fn range(&self, start_line: usize, end_line: usize) -> Result<Vec<String>> {
        read_line_range(&self.path, start_line, end_line, self.index.as_ref())
    }

    /// Lines whose own or inherited timestamp falls in `from..=to`.
    pub fn filter_by_time(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<LineTimestamp>> {
        match self.ready() {
            Some((format, index)) => filter_lines_by_time_range(&self.path, from, to, format, &self.dates, index),
            None => Ok(Vec::new()),
        }
    }

    /// Top `top_n` gaps, refined to line precision.
    pub fn slowest_records(&self, top_n: usize) -> Result<TopGapsResult> {
        match self.ready() {
            Some((format, index)) => find_slowest_records(&self.path, index, format, &self.dates, top_n),
            None => Ok(TopGapsResult::default()),
        }
    }

    /// Chunk statistics and outliers; `None` with fewer than two index gaps.
    pub fn chunk_report(&self, multiplier: f64) -> Result<Option<ChunkStatsReport>> {
        match self.ready() {
            Some((format, index)) => chunk_stats_report(&self.path, index, format, &self.dates, multiplier),
            None => Ok(None),
        }
    }

    /// Most frequent normalized line patterns.
    pub fn similar_lines(&self, top_n: usize) -> Result<SimilarLinesResult> {
        match self.format.as_ref() {
            Some(format) => find_top_similar_lines(&self.path, format, &self.dates, top_n),
            None => Ok(SimilarLinesResult::default()),
        }
    }
}
