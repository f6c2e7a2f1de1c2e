use chrono::{TimeZone, Utc};
use logseek::detect::{DetectedFormat, FileDates};
use logseek::similar::{find_top_similar_lines, find_top_similar_lines_with, SimilarLinesOptions};
use std::io::Write;
use tempfile::NamedTempFile;

fn dates() -> FileDates {
    FileDates {
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        modified_at: Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap(),
    }
}

fn iso_space() -> DetectedFormat {
    DetectedFormat::from_catalog("yyyy-MM-dd HH:mm:ss.SSS").unwrap()
}

fn write_log(content: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn users_logging_in_form_one_pattern() {
    let f = write_log(
        "2026-01-15 10:00:00 User 123 logged in\n\
         2026-01-15 10:00:01 User 456 logged in\n\
         2026-01-15 10:00:02 User 789 logged in\n",
    );
    let result = find_top_similar_lines(f.path(), &iso_space(), &dates(), 20).unwrap();
    assert_eq!(result.total_lines_analyzed, 3);
    assert_eq!(result.total_unique_patterns, 1);
    assert_eq!(result.lines.len(), 1);
    let rec = &result.lines[0];
    assert_eq!(rec.pattern, "User # logged in");
    assert_eq!(rec.count, 3);
    assert_eq!(rec.example_line, "2026-01-15 10:00:00 User 123 logged in");
    assert_eq!(rec.first_timestamp, Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
    assert_eq!(rec.last_timestamp, Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 2).unwrap());
}

const MIXED: &str = "\
2026-01-15 10:00:05 cache miss key=17
2026-01-15 10:00:01 connect from 10.1.2.3
    continuation without timestamp
2026-01-15 10:00:02 cache miss key=18
2026-01-15 10:00:03 free 0x7ffe12 bytes
2026-01-15 10:00:04 connect from 192.168.0.9
2026-01-15 10:00:00 cache miss key=19
2026-01-15 10:00:06 free 0xdead bytes
2026-01-15 10:00:07 shutdown
";

#[test]
fn counts_rank_patterns_and_ties_keep_file_order() {
    let f = write_log(MIXED);
    let result = find_top_similar_lines(f.path(), &iso_space(), &dates(), 20).unwrap();
    assert_eq!(result.total_lines_analyzed, 8);
    let ranked: Vec<(&str, usize)> = result.lines.iter().map(|r| (r.pattern.as_str(), r.count)).collect();
    assert_eq!(
        ranked,
        vec![
            ("cache miss key=#", 3),
            ("connect from #.#.#.#", 2),
            ("free 0x# bytes", 2),
            ("shutdown", 1),
        ]
    );
    let cache = &result.lines[0];
    assert_eq!(cache.first_timestamp, Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap());
    assert_eq!(cache.last_timestamp, Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 5).unwrap());
}

#[test]
fn truncation_keeps_the_full_pattern_count() {
    let f = write_log(MIXED);
    let result = find_top_similar_lines(f.path(), &iso_space(), &dates(), 2).unwrap();
    assert_eq!(result.lines.len(), 2);
    assert_eq!(result.total_unique_patterns, 4);
}

#[test]
fn identical_lines_form_a_single_pattern() {
    let f = write_log(&"2026-01-15 10:00:00 heartbeat ok\n".repeat(25));
    let result = find_top_similar_lines(f.path(), &iso_space(), &dates(), 20).unwrap();
    assert_eq!(result.lines.len(), 1);
    assert_eq!(result.lines[0].count, result.total_lines_analyzed);
}

#[test]
fn empty_file_has_no_patterns() {
    let f = write_log("");
    let result = find_top_similar_lines(f.path(), &iso_space(), &dates(), 20).unwrap();
    assert!(result.lines.is_empty());
    assert_eq!(result.total_lines_analyzed, 0);
    assert_eq!(result.total_unique_patterns, 0);
}

#[test]
fn unavailable_search_tool_falls_back_to_streaming() {
    let f = write_log(MIXED);
    let streamed = find_top_similar_lines_with(
        f.path(),
        &iso_space(),
        &dates(),
        &SimilarLinesOptions { use_external_search: false, ..Default::default() },
    )
    .unwrap();
    let fallback = find_top_similar_lines_with(
        f.path(),
        &iso_space(),
        &dates(),
        &SimilarLinesOptions {
            external_min_bytes: 0,
            search_command: "logseek-no-such-search-tool".to_string(),
            ..Default::default()
        },
    )
    .unwrap();
    assert_eq!(streamed, fallback);
}

#[test]
fn external_search_matches_streaming_when_present() {
    // Passes either way: without rg the call falls back to streaming.
    let f = write_log(MIXED);
    let streamed = find_top_similar_lines_with(
        f.path(),
        &iso_space(),
        &dates(),
        &SimilarLinesOptions { use_external_search: false, ..Default::default() },
    )
    .unwrap();
    let external = find_top_similar_lines_with(
        f.path(),
        &iso_space(),
        &dates(),
        &SimilarLinesOptions { external_min_bytes: 0, ..Default::default() },
    )
    .unwrap();
    assert_eq!(streamed, external);
}

#[test]
fn missing_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let err = find_top_similar_lines(&dir.path().join("nope.log"), &iso_space(), &dates(), 5).unwrap_err();
    assert!(err.is_not_found());
}
