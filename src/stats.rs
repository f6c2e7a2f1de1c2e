//! Duration statistics over the gaps between indexed records.

use crate::config::Settings;
use crate::detect::{DetectedFormat, FileDates};
use crate::error::Result;
use crate::gaps::{positive_gaps, refine_all, GapRecord};
use crate::handler::LogFileHandler;
use crate::index::LineIndex;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_OUTLIER_MULTIPLIER: f64 = 1.5;
/// Outliers refined and returned by a chunk report.
pub const REPORT_OUTLIER_LIMIT: usize = 20;
const MIN_OUTLIER_GAPS: usize = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DescriptiveStats {
    pub count: usize,
    pub mean: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
    pub std_dev: f64,
    pub skewness: f64,
    /// Excess kurtosis (0 for a normal distribution).
    pub kurtosis: f64,
}

/// Linear-interpolated percentile of an ascending slice, `p` in `0..=100`.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        n => {
            let rank = (p / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Every positive gap between adjacent timestamped index entries, in file order.
pub fn extract_all_gaps_from_index(index: &LineIndex) -> Vec<GapRecord> {
    positive_gaps(&index.timestamped()).collect()
}

pub fn compute_descriptive_stats(durations: &[f64]) -> DescriptiveStats {
    if durations.is_empty() {
        return DescriptiveStats::default();
    }
    let mut sorted = durations.to_vec();
    sorted.sort_by(f64::total_cmp);

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = sorted.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();

    let (skewness, kurtosis) = if std_dev > 0.0 {
        let z = |x: &f64| (x - mean) / std_dev;
        let skew = sorted.iter().map(|x| z(x).powi(3)).sum::<f64>() / n;
        let kurt = sorted.iter().map(|x| z(x).powi(4)).sum::<f64>() / n - 3.0;
        (skew, kurt)
    } else {
        (0.0, 0.0)
    };

    DescriptiveStats {
        count: sorted.len(),
        mean,
        median: percentile(&sorted, 50.0),
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        p90: percentile(&sorted, 90.0),
        p95: percentile(&sorted, 95.0),
        p99: percentile(&sorted, 99.0),
        std_dev,
        skewness,
        kurtosis,
    }
}

/// Tukey fences: gaps outside `[Q1 - m*IQR, Q3 + m*IQR]`, largest first.
/// Fewer than four gaps, or a zero IQR, yields nothing.
pub fn detect_outliers(gaps: &[GapRecord], multiplier: f64) -> Vec<GapRecord> {
    if gaps.len() < MIN_OUTLIER_GAPS {
        return Vec::new();
    }
    let mut sorted: Vec<f64> = gaps.iter().map(|g| g.duration_ms as f64).collect();
    sorted.sort_by(f64::total_cmp);
    let q1 = percentile(&sorted, 25.0);
    let q3 = percentile(&sorted, 75.0);
    let iqr = q3 - q1;
    if iqr == 0.0 {
        return Vec::new();
    }
    let lower = q1 - multiplier * iqr;
    let upper = q3 + multiplier * iqr;

    let mut out: Vec<GapRecord> = gaps
        .iter()
        .filter(|g| {
            let d = g.duration_ms as f64;
            d < lower || d > upper
        })
        .cloned()
        .collect();
    out.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));
    out
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkStatsReport {
    pub stats: DescriptiveStats,
    pub min_chunk: GapRecord,
    pub max_chunk: GapRecord,
    /// Largest outliers, refined against the file.
    pub outliers: Vec<GapRecord>,
    /// Number of outliers before truncation.
    pub outlier_count: usize,
    pub all_durations: Vec<f64>,
}

/// Full duration report for one file: distribution statistics, the shortest
/// and longest chunks and the IQR outliers, with those records refined to
/// exact line text. `None` with fewer than two gaps.
pub fn chunk_stats_report(
    path: &Path,
    index: &LineIndex,
    format: &DetectedFormat,
    dates: &FileDates,
    multiplier: f64,
) -> Result<Option<ChunkStatsReport>> {
    let gaps = extract_all_gaps_from_index(index);
    if gaps.len() < 2 {
        return Ok(None);
    }
    let all_durations: Vec<f64> = gaps.iter().map(|g| g.duration_ms as f64).collect();
    let stats = compute_descriptive_stats(&all_durations);

    // First occurrence wins on ties.
    let mut min_idx = 0;
    let mut max_idx = 0;
    for (i, gap) in gaps.iter().enumerate() {
        if gap.duration_ms < gaps[min_idx].duration_ms {
            min_idx = i;
        }
        if gap.duration_ms > gaps[max_idx].duration_ms {
            max_idx = i;
        }
    }

    let outliers = detect_outliers(&gaps, multiplier);
    let outlier_count = outliers.len();

    let mut candidates = vec![gaps[min_idx].clone(), gaps[max_idx].clone()];
    candidates.extend(outliers.into_iter().take(REPORT_OUTLIER_LIMIT));
    let mut refined = refine_all(path, &candidates, index, format, dates)?.into_iter();
    let (Some(min_chunk), Some(max_chunk)) = (refined.next(), refined.next()) else {
        return Ok(None);
    };
    let mut outliers: Vec<GapRecord> = refined.collect();
    outliers.sort_by(|a, b| b.duration_ms.cmp(&a.duration_ms));

    tracing::info!(
        path = %path.display(),
        gaps = gaps.len(),
        outliers = outlier_count,
        "chunk statistics computed"
    );
    Ok(Some(ChunkStatsReport { stats, min_chunk, max_chunk, outliers, outlier_count, all_durations }))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileComparison {
    pub path: PathBuf,
    pub stats: DescriptiveStats,
    pub outlier_count: usize,
    /// Standard deviation as a percentage of the mean.
    pub coefficient_of_variation: f64,
    pub error: Option<String>,
}

impl FileComparison {
    fn failed(path: &Path, error: String) -> Self {
        Self {
            path: path.to_path_buf(),
            stats: DescriptiveStats::default(),
            outlier_count: 0,
            coefficient_of_variation: 0.0,
            error: Some(error),
        }
    }
}

/// Side-by-side duration statistics for several files. A file that cannot be
/// read or has no detectable timestamps gets an `error` entry instead of
/// aborting the comparison. With `settings`, every file uses them (including
/// the configured fallback format and outlier multiplier).
pub fn compare_files<P: AsRef<Path>>(paths: &[P], settings: Option<&Settings>) -> Vec<FileComparison> {
    paths
        .iter()
        .map(|p| {
            let path = p.as_ref();
            match compare_one(path, settings) {
                Ok(cmp) => cmp,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "comparison skipped file");
                    FileComparison::failed(path, e.to_string())
                }
            }
        })
        .collect()
}

fn compare_one(path: &Path, settings: Option<&Settings>) -> Result<FileComparison> {
    let mut handler = match settings {
        Some(settings) => LogFileHandler::with_settings(path, settings.clone())?,
        None => LogFileHandler::open(path)?,
    };
    handler.initialize()?;
    let Some(index) = handler.index().filter(|_| handler.format().is_some()) else {
        return Ok(FileComparison::failed(path, "no timestamp format detected".to_string()));
    };

    let gaps = extract_all_gaps_from_index(index);
    let durations: Vec<f64> = gaps.iter().map(|g| g.duration_ms as f64).collect();
    let stats = compute_descriptive_stats(&durations);
    let coefficient_of_variation = if stats.mean > 0.0 { stats.std_dev / stats.mean * 100.0 } else { 0.0 };

    Ok(FileComparison {
        path: path.to_path_buf(),
        stats,
        outlier_count: detect_outliers(&gaps, handler.settings().outlier_multiplier).len(),
        coefficient_of_variation,
        error: None,
    })
}
