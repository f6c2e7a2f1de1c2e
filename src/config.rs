use crate::detect::DetectedFormat;
use crate::error::{Error, Result};
use crate::gaps::DEFAULT_TOP_N;
use crate::index::DEFAULT_INDEX_STEP;
use crate::similar::DEFAULT_SIMILAR_TOP_N;
use crate::stats::DEFAULT_OUTLIER_MULTIPLIER;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_DATE_REGEX: &str = r"\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}";
pub const DEFAULT_DATE_FORMAT: &str = "yyyy-MM-dd HH:mm:ss";

/// Host-supplied settings. Every key is optional; an empty document yields
/// the defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_detect: bool,
    /// Fallback regex locating the timestamp anywhere in a line.
    pub log_date_regex: String,
    /// Fallback format in `yyyy-MM-dd HH:mm:ss` token style.
    pub log_date_format: String,
    pub index_step: usize,
    pub similar_top_n: usize,
    pub gap_top_n: usize,
    pub outlier_multiplier: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_detect: true,
            log_date_regex: DEFAULT_DATE_REGEX.to_string(),
            log_date_format: DEFAULT_DATE_FORMAT.to_string(),
            index_step: DEFAULT_INDEX_STEP,
            similar_top_n: DEFAULT_SIMILAR_TOP_N,
            gap_top_n: DEFAULT_TOP_N,
            outlier_multiplier: DEFAULT_OUTLIER_MULTIPLIER,
        }
    }
}

impl Settings {
    pub fn from_json_str(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::file(path, "read", e))?;
        Self::from_json_str(&text)
    }

    /// The configured regex and format as a `custom` detected format.
    pub fn fallback_format(&self) -> Result<DetectedFormat> {
        DetectedFormat::custom(&self.log_date_regex, &to_chrono_format(&self.log_date_format))
    }
}

/// Translate `yyyy-MM-dd HH:mm:ss.SSS` style tokens to a chrono format string.
/// Text in single quotes is copied literally.
pub fn to_chrono_format(pattern: &str) -> String {
    let chars: Vec<char> = pattern.chars().collect();
    let mut out = String::with_capacity(pattern.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c == '\'' {
            i += 1;
            while i < chars.len() && chars[i] != '\'' {
                push_literal(&mut out, chars[i]);
                i += 1;
            }
            i += 1;
            continue;
        }
        let mut run = 1;
        while i + run < chars.len() && chars[i + run] == c {
            run += 1;
        }
        // `.SSS` becomes `%.3f`.
        if c == '.' && run == 1 && chars.get(i + 1) == Some(&'S') {
            let frac = chars[i + 1..].iter().take_while(|&&x| x == 'S').count();
            out.push_str(&format!("%.{frac}f"));
            i += 1 + frac;
            continue;
        }
        match token(c, run) {
            Some(chrono_token) => out.push_str(chrono_token),
            None => (0..run).for_each(|_| push_literal(&mut out, c)),
        }
        i += run;
    }
    out
}

fn token(c: char, run: usize) -> Option<&'static str> {
    Some(match (c, run) {
        ('y', 4) => "%Y",
        ('y', 2) => "%y",
        ('M', 1 | 2) => "%m",
        ('M', 3) => "%b",
        ('M', 4) => "%B",
        ('d', 1 | 2) => "%d",
        ('H', 1 | 2) => "%H",
        ('h', 1 | 2) => "%I",
        ('m', 1 | 2) => "%M",
        ('s', 1 | 2) => "%S",
        ('S', 3) => "%3f",
        ('S', 6) => "%6f",
        ('a', 1) => "%p",
        ('Z', 1 | 2) => "%:z",
        _ => return None,
    })
}

fn push_literal(out: &mut String, c: char) {
    if c == '%' {
        out.push_str("%%");
    } else {
        out.push(c);
    }
}
