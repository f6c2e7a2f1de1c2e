use chrono::{DateTime, Duration, TimeZone, Utc};
use logseek::detect::{DetectedFormat, FileDates};
use logseek::index::{build_line_index, filter_lines_by_time_range, jump_to_timestamp, read_line_range, timestamps_for_range};
use std::io::Write;
use tempfile::NamedTempFile;

fn dates() -> FileDates {
    FileDates {
        created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        modified_at: Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap(),
    }
}

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap()
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

/// `n` lines one second apart starting at `base()`.
fn second_ticks(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| format!("{} INFO tick {i}", (base() + Duration::seconds(i as i64)).format("%Y-%m-%d %H:%M:%S")))
        .collect()
}

#[test]
fn index_records_every_step_with_exact_offsets() {
    let lines = second_ticks(25);
    let f = write_log(&(lines.join("\n") + "\n"));
    let index = build_line_index(f.path(), &iso_space(), &dates(), 10).unwrap();

    assert_eq!(index.total_lines, 25);
    assert_eq!(index.total_bytes, std::fs::metadata(f.path()).unwrap().len());
    let indexed: Vec<usize> = index.offsets.iter().map(|e| e.line).collect();
    assert_eq!(indexed, vec![0, 10, 20]);

    let expected_byte: u64 = lines[..10].iter().map(|l| l.len() as u64 + 1).sum();
    assert_eq!(index.offsets[1].byte, expected_byte);
    assert_eq!(index.offsets[2].timestamp, Some(base() + Duration::seconds(20)));
}

#[test]
fn crlf_terminators_count_toward_offsets() {
    let lines = second_ticks(4);
    let f = write_log(&(lines.join("\r\n") + "\r\n"));
    let index = build_line_index(f.path(), &iso_space(), &dates(), 2).unwrap();
    assert_eq!(index.offsets[1].line, 2);
    assert_eq!(index.offsets[1].byte, (lines[0].len() + lines[1].len() + 4) as u64);

    let read = read_line_range(f.path(), 2, 3, Some(&index)).unwrap();
    assert_eq!(read, vec![lines[2].clone(), lines[3].clone()]);
}

#[test]
fn reindexing_is_idempotent() {
    let f = write_log(&second_ticks(57).join("\n"));
    let a = build_line_index(f.path(), &iso_space(), &dates(), 5).unwrap();
    let b = build_line_index(f.path(), &iso_space(), &dates(), 5).unwrap();
    assert_eq!(a, b);
}

#[test]
fn empty_file_gives_empty_index() {
    let f = write_log("");
    let index = build_line_index(f.path(), &iso_space(), &dates(), 10).unwrap();
    assert_eq!(index.total_lines, 0);
    assert!(index.offsets.is_empty());
    assert!(jump_to_timestamp(f.path(), base(), &iso_space(), &dates(), &index).unwrap().is_none());
}

#[test]
fn missing_file_is_a_file_access_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone.log");
    let err = build_line_index(&missing, &iso_space(), &dates(), 10).unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert!(read_line_range(&missing, 0, 5, None).unwrap_err().is_not_found());
}

#[test]
fn range_reads_agree_with_and_without_index() {
    let lines = second_ticks(100);
    let f = write_log(&lines.join("\n"));
    let index = build_line_index(f.path(), &iso_space(), &dates(), 10).unwrap();

    let seeked = read_line_range(f.path(), 37, 52, Some(&index)).unwrap();
    let streamed = read_line_range(f.path(), 37, 52, None).unwrap();
    assert_eq!(seeked, streamed);
    assert_eq!(seeked.len(), 16);
    assert_eq!(seeked[0], lines[37]);

    assert_eq!(read_line_range(f.path(), 95, 500, Some(&index)).unwrap().len(), 5);
    assert!(read_line_range(f.path(), 10, 5, Some(&index)).unwrap().is_empty());
}

#[test]
fn jump_finds_the_nearest_unindexed_line() {
    let lines = second_ticks(100);
    let f = write_log(&lines.join("\n"));
    let index = build_line_index(f.path(), &iso_space(), &dates(), 10).unwrap();

    let target = base() + Duration::milliseconds(37_200);
    let hit = jump_to_timestamp(f.path(), target, &iso_space(), &dates(), &index).unwrap().unwrap();
    assert_eq!(hit.line, 37);
    assert_eq!(hit.timestamp, base() + Duration::seconds(37));
    assert_eq!(hit.line_text, lines[37]);
}

#[test]
fn jump_outside_the_file_lands_on_a_boundary() {
    let lines = second_ticks(100);
    let f = write_log(&lines.join("\n"));
    let index = build_line_index(f.path(), &iso_space(), &dates(), 10).unwrap();

    let before = jump_to_timestamp(f.path(), base() - Duration::hours(1), &iso_space(), &dates(), &index).unwrap().unwrap();
    assert_eq!(before.line, 0);
    let after = jump_to_timestamp(f.path(), base() + Duration::hours(1), &iso_space(), &dates(), &index).unwrap().unwrap();
    assert_eq!(after.line, 99);
    assert_eq!(after.line_text, lines[99]);
}

#[test]
fn filter_returns_lines_inside_the_window() {
    let f = write_log(&second_ticks(100).join("\n"));
    let index = build_line_index(f.path(), &iso_space(), &dates(), 10).unwrap();
    let from = base() + Duration::seconds(25);
    let to = base() + Duration::seconds(40);

    let hits = filter_lines_by_time_range(f.path(), from, to, &iso_space(), &dates(), &index).unwrap();
    let numbers: Vec<usize> = hits.iter().map(|h| h.line).collect();
    assert_eq!(numbers, (25..=40).collect::<Vec<_>>());
    assert!(hits.iter().all(|h| h.timestamp >= from && h.timestamp <= to));
}

#[test]
fn continuation_lines_inherit_the_previous_timestamp() {
    let content = "\
2026-01-15 10:00:00 ERROR request failed
java.lang.IllegalStateException: boom
    at com.example.Handler.run(Handler.java:42)
2026-01-15 10:00:05 INFO recovered
";
    let f = write_log(content);
    let stamped = timestamps_for_range(f.path(), 1, 3, &iso_space(), &dates(), None).unwrap();
    assert_eq!(stamped.len(), 3);
    assert_eq!(stamped[0].timestamp, base());
    assert_eq!(stamped[1].timestamp, base());
    assert_eq!(stamped[1].text, "    at com.example.Handler.run(Handler.java:42)");
    assert_eq!(stamped[2].timestamp, base() + Duration::seconds(5));

    let index = build_line_index(f.path(), &iso_space(), &dates(), 1).unwrap();
    let window = filter_lines_by_time_range(f.path(), base(), base(), &iso_space(), &dates(), &index).unwrap();
    assert_eq!(window.len(), 3);
}
