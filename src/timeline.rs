use crate::detect::{DetectedFormat, FileDates};
use crate::error::{Error, Result};
use crate::reader::open_at;
use chrono::{DateTime, Datelike, Duration, TimeZone, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationUnit {
    Second,
    Minute,
    Hour,
    Day,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimelineBucket {
    pub start: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub unit: AggregationUnit,
    pub buckets: Vec<TimelineBucket>,
}

/// Coarsest unit that still gives a handful of buckets over `[first, last]`.
pub fn choose_unit(first: DateTime<Utc>, last: DateTime<Utc>) -> AggregationUnit {
    let span = last - first;
    if span > Duration::days(365) {
        AggregationUnit::Year
    } else if span > Duration::days(30) {
        AggregationUnit::Month
    } else if span > Duration::days(2) {
        AggregationUnit::Day
    } else if span > Duration::hours(2) {
        AggregationUnit::Hour
    } else if span > Duration::minutes(2) {
        AggregationUnit::Minute
    } else {
        AggregationUnit::Second
    }
}

fn floor_time(t: DateTime<Utc>, unit: AggregationUnit) -> DateTime<Utc> {
    let secs = match unit {
        AggregationUnit::Second => 1,
        AggregationUnit::Minute => 60,
        AggregationUnit::Hour => 3_600,
        AggregationUnit::Day => 86_400,
        AggregationUnit::Month => {
            return Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0).single().unwrap_or(t);
        }
        AggregationUnit::Year => {
            return Utc.with_ymd_and_hms(t.year(), 1, 1, 0, 0, 0).single().unwrap_or(t);
        }
    };
    let ts = t.timestamp();
    DateTime::from_timestamp(ts - ts.rem_euclid(secs), 0).unwrap_or(t)
}

/// Count instants per bucket, buckets in ascending order. Input need not be
/// sorted.
pub fn build_timeline(timestamps: &[DateTime<Utc>]) -> Timeline {
    let (Some(first), Some(last)) = (timestamps.iter().min(), timestamps.iter().max()) else {
        return Timeline { unit: AggregationUnit::Second, buckets: Vec::new() };
    };
    let unit = choose_unit(*first, *last);
    let mut counts: BTreeMap<DateTime<Utc>, usize> = BTreeMap::new();
    for t in timestamps {
        *counts.entry(floor_time(*t, unit)).or_insert(0) += 1;
    }
    Timeline {
        unit,
        buckets: counts.into_iter().map(|(start, count)| TimelineBucket { start, count }).collect(),
    }
}

pub fn timeline_from_file(path: &Path, format: &DetectedFormat, dates: &FileDates) -> Result<Timeline> {
    let mut timestamps = Vec::new();
    for raw in open_at(path, 0, 0)? {
        let raw = raw.map_err(|e| Error::file(path, "read", e))?;
        if let Some(m) = format.match_line(&raw.text, dates) {
            timestamps.push(m.timestamp);
        }
    }
    let timeline = build_timeline(&timestamps);
    tracing::debug!(path = %path.display(), unit = ?timeline.unit, buckets = timeline.buckets.len(), "timeline built");
    Ok(timeline)
}
