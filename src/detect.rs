use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Serialize, Serializer};

/// Number of sample lines considered when detecting a format.
pub const DEFAULT_MAX_SAMPLE: usize = 100;
/// Characters of a line (after the level token) that a timestamp may occupy.
pub const PREFIX_LEN: usize = 60;

const MIN_PREFIX_DIGITS: usize = 6;
const MS_PER_DAY: f64 = 86_400_000.0;

/// Creation and modification instants of a log file, used as a plausibility
/// window for timestamp candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileDates {
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Grammar {
    IsoT,
    IsoSpace,
    IsoDate,
    DaySlash,
    MonthSlash,
    DayDot,
    YearSlash,
    DayMonthName,
    MonthNameDayYear,
    Syslog,
    EpochSeconds,
    EpochMillis,
    EpochMicros,
    TimeOnly,
    Custom { chrono_format: String },
}

struct CandidateFormat {
    pattern: &'static str,
    regex: Regex,
    grammar: Grammar,
}

const FRACTION: &str = r"(?:[.,](\d{1,6}))?";

// Ordered by specificity. Ties in ranking keep this order.
static CANDIDATE_FORMATS: Lazy<Vec<CandidateFormat>> = Lazy::new(|| {
    let time = format!(r"(\d{{2}}):(\d{{2}}):(\d{{2}}){FRACTION}");
    let table: Vec<(&'static str, String, Grammar)> = vec![
        (
            "yyyy-MM-ddTHH:mm:ss.SSS",
            format!(r"^(\d{{4}})-(\d{{2}})-(\d{{2}})T{time}(Z|[+-]\d{{2}}:?\d{{2}})?"),
            Grammar::IsoT,
        ),
        (
            "yyyy-MM-dd HH:mm:ss.SSS",
            format!(r"^(\d{{4}})-(\d{{2}})-(\d{{2}})\s+{time}(?:\s*([+-]\d{{2}}:?\d{{2}}))?"),
            Grammar::IsoSpace,
        ),
        ("yyyy-MM-dd", r"^(\d{4})-(\d{2})-(\d{2})(?:\s|$|[,\]\[|])".to_string(), Grammar::IsoDate),
        ("dd/MM/yyyy HH:mm:ss", format!(r"^(\d{{2}})/(\d{{2}})/(\d{{4}})\s+{time}"), Grammar::DaySlash),
        ("MM/dd/yyyy HH:mm:ss", format!(r"^(\d{{2}})/(\d{{2}})/(\d{{4}})\s+{time}"), Grammar::MonthSlash),
        ("dd.MM.yyyy HH:mm:ss", format!(r"^(\d{{2}})\.(\d{{2}})\.(\d{{4}})\s+{time}"), Grammar::DayDot),
        ("yyyy/MM/dd HH:mm:ss", format!(r"^(\d{{4}})/(\d{{2}})/(\d{{2}})\s+{time}"), Grammar::YearSlash),
        (
            "dd-MMM-yyyy HH:mm:ss",
            format!(r"^(\d{{1,2}})-([A-Za-z]{{3}})-(\d{{4}})\s+{time}"),
            Grammar::DayMonthName,
        ),
        (
            "MMM dd, yyyy HH:mm:ss",
            format!(r"^([A-Za-z]{{3}})\s+(\d{{1,2}}),?\s+(\d{{4}})\s+{time}"),
            Grammar::MonthNameDayYear,
        ),
        ("MMM dd HH:mm:ss", r"^([A-Za-z]{3})\s+(\d{1,2})\s+(\d{2}):(\d{2}):(\d{2})".to_string(), Grammar::Syslog),
        ("epoch_s", r"^(\d{10})\b".to_string(), Grammar::EpochSeconds),
        ("epoch_ms", r"^(\d{13})\b".to_string(), Grammar::EpochMillis),
        ("epoch_us", r"^(\d{16})\b".to_string(), Grammar::EpochMicros),
        ("HH:mm:ss.SSS", format!(r"^{time}"), Grammar::TimeOnly),
    ];
    table
        .into_iter()
        .map(|(pattern, re, grammar)| CandidateFormat {
            pattern,
            regex: Regex::new(&re).unwrap(),
            grammar,
        })
        .collect()
});

static RE_LEVEL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*[\[(<]?(?:TRACE|DEBUG|INFO|WARNING|WARN|ERROR|FATAL|SEVERE|NOTICE)[\]>)]?\s*").unwrap()
});

/// A timestamp grammar chosen for one file. Read-only once built; shared by
/// the index, gap finder and analyzers.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedFormat {
    pub pattern: String,
    #[serde(serialize_with = "serialize_regex")]
    pub regex: Regex,
    pub group_index: usize,
    #[serde(skip)]
    grammar: Grammar,
    pub score: f64,
}

fn serialize_regex<S: Serializer>(re: &Regex, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_str(re.as_str())
}

/// Where a timestamp sits inside a raw line, in byte offsets of that line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampMatch {
    pub start: usize,
    pub end: usize,
    pub timestamp: DateTime<Utc>,
}

impl DetectedFormat {
    /// Build a format from a catalog entry by its pattern name, e.g.
    /// `"yyyy-MM-dd HH:mm:ss.SSS"` or `"epoch_ms"`.
    pub fn from_catalog(pattern: &str) -> Option<Self> {
        CANDIDATE_FORMATS
            .iter()
            .find(|c| c.pattern == pattern)
            .map(|c| Self::from_candidate(c, 0.0))
    }

    /// A user-configured grammar: `regex` locates the timestamp anywhere in the
    /// line and `chrono_format` parses the matched text.
    pub fn custom(regex: &str, chrono_format: &str) -> Result<Self> {
        let compiled = Regex::new(regex).map_err(|source| Error::InvalidPattern {
            pattern: regex.to_string(),
            source,
        })?;
        Ok(Self {
            pattern: "custom".to_string(),
            regex: compiled,
            group_index: 0,
            grammar: Grammar::Custom { chrono_format: chrono_format.to_string() },
            score: 0.0,
        })
    }

    fn from_candidate(c: &CandidateFormat, score: f64) -> Self {
        Self {
            pattern: c.pattern.to_string(),
            regex: c.regex.clone(),
            group_index: 1,
            grammar: c.grammar.clone(),
            score,
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self.grammar, Grammar::Custom { .. })
    }

    /// Parse text previously matched by this format's regex.
    pub fn parse(&self, matched: &str, dates: &FileDates) -> Option<DateTime<Utc>> {
        let caps = self.regex.captures(matched)?;
        self.grammar.parse(&caps, dates)
    }

    /// Locate and parse the timestamp of a raw line.
    pub fn match_line(&self, line: &str, dates: &FileDates) -> Option<TimestampMatch> {
        let (offset, haystack) = if self.is_custom() {
            (0, line)
        } else {
            candidate_prefix(line, PREFIX_LEN)
        };
        let caps = self.regex.captures(haystack)?;
        let whole = caps.get(0)?;
        let timestamp = self.grammar.parse(&caps, dates)?;
        Some(TimestampMatch {
            start: offset + whole.start(),
            end: offset + whole.end(),
            timestamp,
        })
    }
}

/// Parse the timestamp of one line with an already detected format.
pub fn parse_line_timestamp(line: &str, format: &DetectedFormat, dates: &FileDates) -> Option<DateTime<Utc>> {
    format.match_line(line, dates).map(|m| m.timestamp)
}

/// Strip a leading level token and cut to `max_len` characters. Returns the
/// byte offset of the returned slice inside `line`.
pub fn candidate_prefix(line: &str, max_len: usize) -> (usize, &str) {
    let offset = RE_LEVEL_PREFIX.find(line).map(|m| m.end()).unwrap_or(0);
    let rest = &line[offset..];
    let cut = rest.char_indices().nth(max_len).map(|(i, _)| i).unwrap_or(rest.len());
    (offset, &rest[..cut])
}

impl Grammar {
    fn parse(&self, caps: &Captures, dates: &FileDates) -> Option<DateTime<Utc>> {
        match self {
            Grammar::IsoT | Grammar::IsoSpace => {
                let ndt = civil(num(caps, 1)?, num(caps, 2)?, num(caps, 3)?, caps, 4)?;
                match caps.get(8) {
                    Some(tz) => {
                        let offset = parse_offset(tz.as_str())?;
                        offset.from_local_datetime(&ndt).single().map(|dt| dt.with_timezone(&Utc))
                    }
                    None => Some(Utc.from_utc_datetime(&ndt)),
                }
            }
            Grammar::IsoDate => {
                let date = NaiveDate::from_ymd_opt(num(caps, 1)?, num(caps, 2)?, num(caps, 3)?)?;
                Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
            }
            Grammar::DaySlash | Grammar::DayDot => {
                utc(civil(num(caps, 3)?, num(caps, 2)?, num(caps, 1)?, caps, 4)?)
            }
            Grammar::MonthSlash => utc(civil(num(caps, 3)?, num(caps, 1)?, num(caps, 2)?, caps, 4)?),
            Grammar::YearSlash => utc(civil(num(caps, 1)?, num(caps, 2)?, num(caps, 3)?, caps, 4)?),
            Grammar::DayMonthName => {
                let month = month_from_name(caps.get(2)?.as_str())?;
                utc(civil(num(caps, 3)?, month, num(caps, 1)?, caps, 4)?)
            }
            Grammar::MonthNameDayYear => {
                let month = month_from_name(caps.get(1)?.as_str())?;
                utc(civil(num(caps, 3)?, month, num(caps, 2)?, caps, 4)?)
            }
            Grammar::Syslog => {
                let month = month_from_name(caps.get(1)?.as_str())?;
                let day: u32 = num(caps, 2)?;
                let (h, m, s): (u32, u32, u32) = (num(caps, 3)?, num(caps, 4)?, num(caps, 5)?);
                let mut years = vec![dates.created_at.year(), dates.modified_at.year()];
                years.dedup();
                let mut best: Option<(f64, DateTime<Utc>)> = None;
                for year in years {
                    let Some(ndt) = NaiveDate::from_ymd_opt(year, month, day).and_then(|d| d.and_hms_opt(h, m, s))
                    else {
                        continue;
                    };
                    let candidate = Utc.from_utc_datetime(&ndt);
                    let score = score_date_in_range(candidate, dates);
                    if best.map_or(true, |(b, _)| score > b) {
                        best = Some((score, candidate));
                    }
                }
                best.map(|(_, dt)| dt)
            }
            Grammar::EpochSeconds => epoch(num::<i64>(caps, 1)?, 1),
            Grammar::EpochMillis => epoch(num::<i64>(caps, 1)?, 1_000),
            Grammar::EpochMicros => epoch(num::<i64>(caps, 1)?, 1_000_000),
            Grammar::TimeOnly => {
                let time = chrono::NaiveTime::from_hms_nano_opt(
                    num(caps, 1)?,
                    num(caps, 2)?,
                    num(caps, 3)?,
                    fraction_nanos(caps, 4),
                )?;
                let on_created = Utc.from_utc_datetime(&dates.created_at.date_naive().and_time(time));
                if on_created > dates.modified_at + Duration::days(1) {
                    return Some(Utc.from_utc_datetime(&dates.modified_at.date_naive().and_time(time)));
                }
                Some(on_created)
            }
            Grammar::Custom { chrono_format } => {
                let text = caps.get(0)?.as_str().trim();
                if let Ok(ndt) = NaiveDateTime::parse_from_str(text, chrono_format) {
                    return Some(Utc.from_utc_datetime(&ndt));
                }
                if let Ok(dt) = DateTime::parse_from_str(text, chrono_format) {
                    return Some(dt.with_timezone(&Utc));
                }
                let date = NaiveDate::parse_from_str(text, chrono_format).ok()?;
                Some(Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?))
            }
        }
    }
}

fn num<T: std::str::FromStr>(caps: &Captures, i: usize) -> Option<T> {
    caps.get(i)?.as_str().parse().ok()
}

fn fraction_nanos(caps: &Captures, i: usize) -> u32 {
    match caps.get(i) {
        Some(m) => {
            let digits = m.as_str();
            let value: u32 = digits.parse().unwrap_or(0);
            value * 10u32.pow(9 - digits.len() as u32)
        }
        None => 0,
    }
}

/// Date parts plus `HH`, `mm`, `ss` and fraction captured from `first_time` on.
fn civil(year: i32, month: u32, day: u32, caps: &Captures, first_time: usize) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_nano_opt(
        num(caps, first_time)?,
        num(caps, first_time + 1)?,
        num(caps, first_time + 2)?,
        fraction_nanos(caps, first_time + 3),
    )
}

fn utc(ndt: NaiveDateTime) -> Option<DateTime<Utc>> {
    Some(Utc.from_utc_datetime(&ndt))
}

fn parse_offset(tz: &str) -> Option<FixedOffset> {
    let tz = tz.trim();
    if tz == "Z" {
        return FixedOffset::east_opt(0);
    }
    let sign = if tz.starts_with('-') { -1 } else { 1 };
    let digits: String = tz[1..].chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() != 4 {
        return None;
    }
    let hours: i32 = digits[..2].parse().ok()?;
    let minutes: i32 = digits[2..].parse().ok()?;
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}

fn month_from_name(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = ["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"];
    let key = name.get(..3)?.to_ascii_lowercase();
    MONTHS.iter().position(|m| *m == key).map(|i| i as u32 + 1)
}

fn epoch(value: i64, units_per_second: i64) -> Option<DateTime<Utc>> {
    let secs = value.div_euclid(units_per_second);
    let nanos = value.rem_euclid(units_per_second) * (1_000_000_000 / units_per_second);
    let dt = DateTime::from_timestamp(secs, nanos as u32)?;
    (2000..=2100).contains(&dt.year()).then_some(dt)
}

/// Plausibility of `parsed` against the file's lifetime: 1.0 inside
/// `[created - 1 day, modified + 1 hour]`, decaying with distance outside it
/// and 0 beyond two years.
pub fn score_date_in_range(parsed: DateTime<Utc>, dates: &FileDates) -> f64 {
    let range_start = dates.created_at - Duration::days(1);
    let range_end = dates.modified_at + Duration::hours(1);
    if parsed >= range_start && parsed <= range_end {
        return 1.0;
    }
    let dist = if parsed < range_start { range_start - parsed } else { parsed - range_end };
    let dist_days = dist.num_milliseconds() as f64 / MS_PER_DAY;
    if dist_days > 365.0 * 2.0 {
        return 0.0;
    }
    1.0 / (1.0 + dist_days)
}

/// How closely the first and last parsed dates line up with file creation
/// and modification.
fn score_timestamp_span(parsed: &[DateTime<Utc>], dates: &FileDates) -> f64 {
    let (Some(first), Some(last)) = (parsed.first(), parsed.last()) else {
        return 0.0;
    };
    let start_days = (*first - dates.created_at).num_milliseconds().abs() as f64 / MS_PER_DAY;
    let end_days = (*last - dates.modified_at).num_milliseconds().abs() as f64 / MS_PER_DAY;
    (1.0 / (1.0 + start_days) + 1.0 / (1.0 + end_days)) / 2.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub detected: bool,
    pub format: Option<DetectedFormat>,
    pub sample_parsed: Vec<DateTime<Utc>>,
    pub lines_scanned: usize,
    pub match_rate: f64,
    pub file_range: Option<TimeRange>,
}

impl DetectionResult {
    fn not_detected(lines_scanned: usize) -> Self {
        Self {
            detected: false,
            format: None,
            sample_parsed: Vec::new(),
            lines_scanned,
            match_rate: 0.0,
            file_range: None,
        }
    }
}

struct Tally<'a> {
    candidate: &'a CandidateFormat,
    total_score: f64,
    match_count: usize,
    in_range_count: usize,
    parsed: Vec<DateTime<Utc>>,
}

/// Infer the timestamp grammar of a sample of lines, scoring every catalog
/// entry against the file's creation/modification window.
pub fn detect_timestamp_format<S: AsRef<str>>(lines: &[S], dates: &FileDates, max_sample: usize) -> DetectionResult {
    let max_sample = max_sample.max(1);
    let stride = (lines.len() / max_sample).max(1);
    let sample: Vec<&str> = lines
        .iter()
        .step_by(stride)
        .map(|l| l.as_ref())
        .filter(|l| !l.trim().is_empty())
        .take(max_sample)
        .collect();

    let candidates: Vec<&str> = sample
        .iter()
        .map(|l| candidate_prefix(l, PREFIX_LEN).1)
        .filter(|p| p.chars().filter(|c| c.is_ascii_digit()).count() >= MIN_PREFIX_DIGITS)
        .collect();

    if candidates.is_empty() {
        tracing::debug!(sampled = sample.len(), "no timestamp-like prefixes in sample");
        return DetectionResult::not_detected(sample.len());
    }

    let mut tallies: Vec<Tally> = CANDIDATE_FORMATS
        .iter()
        .map(|candidate| Tally { candidate, total_score: 0.0, match_count: 0, in_range_count: 0, parsed: Vec::new() })
        .collect();

    for prefix in &candidates {
        for tally in tallies.iter_mut() {
            let Some(caps) = tally.candidate.regex.captures(prefix) else {
                continue;
            };
            let Some(parsed) = tally.candidate.grammar.parse(&caps, dates) else {
                continue;
            };
            let s = score_date_in_range(parsed, dates);
            if s > 0.0 {
                tally.total_score += s;
                tally.match_count += 1;
                if s >= 1.0 {
                    tally.in_range_count += 1;
                }
                tally.parsed.push(parsed);
            }
        }
    }

    tallies.sort_by(|a, b| {
        b.in_range_count
            .cmp(&a.in_range_count)
            .then(b.match_count.cmp(&a.match_count))
            .then(b.total_score.total_cmp(&a.total_score))
    });

    let best = &tallies[0];
    if best.match_count == 0 {
        return DetectionResult::not_detected(sample.len());
    }

    let mono_ratio = if best.parsed.len() > 1 {
        let non_decreasing = best.parsed.windows(2).filter(|w| w[1] >= w[0]).count();
        non_decreasing as f64 / (best.parsed.len() - 1) as f64
    } else {
        1.0
    };
    let span_score = score_timestamp_span(&best.parsed, dates);
    let match_rate = best.match_count as f64 / candidates.len() as f64;
    let in_range_rate = best.in_range_count as f64 / best.match_count.max(1) as f64;
    let confidence = best.total_score
        * match_rate
        * (0.3 + 0.35 * mono_ratio + 0.35 * in_range_rate)
        * (0.7 + 0.3 * span_score);

    let file_range = match (best.parsed.iter().min(), best.parsed.iter().max()) {
        (Some(from), Some(to)) => Some(TimeRange { from: *from, to: *to }),
        _ => None,
    };

    tracing::debug!(
        pattern = best.candidate.pattern,
        matches = best.match_count,
        in_range = best.in_range_count,
        confidence,
        "timestamp format detected"
    );

    DetectionResult {
        detected: true,
        format: Some(DetectedFormat::from_candidate(best.candidate, confidence)),
        sample_parsed: best.parsed.clone(),
        lines_scanned: sample.len(),
        match_rate,
        file_range,
    }
}

pub fn format_display_string(result: &DetectionResult) -> String {
    let Some(format) = result.format.as_ref().filter(|_| result.detected) else {
        return "No timestamp format detected".to_string();
    };
    let range = result
        .file_range
        .map(|r| format!(" | range: {} -> {}", r.from.to_rfc3339(), r.to.to_rfc3339()))
        .unwrap_or_default();
    format!(
        "{} - match: {:.1}%, confidence: {:.3}{}",
        format.pattern,
        result.match_rate * 100.0,
        format.score,
        range
    )
}
