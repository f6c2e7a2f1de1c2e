use chrono::{DateTime, Duration, DurationRound, Utc};
use logseek::cache::{FormatCache, FormatDetection};
use logseek::config::Settings;
use logseek::handler::LogFileHandler;
use std::io::Write;
use tempfile::NamedTempFile;

fn start() -> DateTime<Utc> {
    (Utc::now() - Duration::hours(2)).duration_trunc(Duration::seconds(1)).unwrap()
}

fn ticks(from: DateTime<Utc>, n: usize, fmt: &str) -> String {
    (0..n)
        .map(|i| format!("{} INFO tick {i}\n", (from + Duration::seconds(i as i64)).format(fmt)))
        .collect()
}

fn write_log(content: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn initialize_detects_and_indexes_small_files_densely() {
    let t = start();
    let f = write_log(&ticks(t, 250, "%Y-%m-%d %H:%M:%S"));
    let mut handler = LogFileHandler::open(f.path()).unwrap();
    assert!(handler.format().is_none());
    handler.initialize().unwrap();

    assert_eq!(handler.format().unwrap().pattern, "yyyy-MM-dd HH:mm:ss.SSS");
    assert!(handler.detection().unwrap().detected);
    assert_eq!(handler.total_lines(), 250);
    let index = handler.index().unwrap();
    assert_eq!(index.step, 10);
    assert_eq!(index.offsets.len(), 25);
    assert!(handler.display_string().starts_with("yyyy-MM-dd HH:mm:ss.SSS - match: 100.0%"));
}

#[test]
fn handler_operations_use_the_index() {
    let t = start();
    let f = write_log(&ticks(t, 250, "%Y-%m-%d %H:%M:%S"));
    let mut handler = LogFileHandler::open(f.path()).unwrap();
    handler.initialize().unwrap();

    let hit = handler.jump(t + Duration::seconds(123)).unwrap().unwrap();
    assert_eq!(hit.line, 123);
    assert!(hit.line_text.ends_with("tick 123"));

    let range = handler.range(200, 202).unwrap();
    assert_eq!(range.len(), 3);
    assert!(range[0].ends_with("tick 200"));

    let window = handler.filter_by_time(t + Duration::seconds(10), t + Duration::seconds(19)).unwrap();
    assert_eq!(window.len(), 10);

    let slow = handler.slowest_records(5).unwrap();
    assert_eq!(slow.gaps.len(), 5);
    assert!(slow.gaps.iter().all(|g| g.duration_ms == 10_000));

    let similar = handler.similar_lines(3).unwrap();
    assert_eq!(similar.lines[0].pattern, "INFO tick #");
    assert_eq!(similar.lines[0].count, 250);
}

#[test]
fn refresh_picks_up_appended_lines() {
    let t = start();
    let mut f = write_log(&ticks(t, 40, "%Y-%m-%d %H:%M:%S"));
    let mut handler = LogFileHandler::open(f.path()).unwrap();
    handler.initialize().unwrap();
    assert_eq!(handler.total_lines(), 40);

    f.write_all(ticks(t + Duration::seconds(40), 20, "%Y-%m-%d %H:%M:%S").as_bytes()).unwrap();
    f.flush().unwrap();
    handler.refresh().unwrap();
    assert_eq!(handler.total_lines(), 60);
    assert_eq!(handler.index().unwrap().offsets.len(), 6);
}

#[test]
fn configured_format_applies_when_detection_is_off() {
    let t = start();
    let f = write_log(&ticks(t, 30, "app %d|%m|%Y %H:%M:%S"));
    let settings = Settings {
        auto_detect: false,
        log_date_regex: r"\d{2}\|\d{2}\|\d{4} \d{2}:\d{2}:\d{2}".to_string(),
        log_date_format: "dd|MM|yyyy HH:mm:ss".to_string(),
        ..Settings::default()
    };
    let mut handler = LogFileHandler::with_settings(f.path(), settings).unwrap();
    handler.initialize().unwrap();

    assert!(handler.detection().is_none());
    let format = handler.format().unwrap();
    assert!(format.is_custom());
    let hit = handler.jump(t + Duration::seconds(17)).unwrap().unwrap();
    assert_eq!(hit.line, 17);
    assert_eq!(hit.timestamp, t + Duration::seconds(17));
}

#[test]
fn files_without_timestamps_give_empty_results() {
    let f = write_log("alpha\nbeta\ngamma\n");
    let mut handler = LogFileHandler::open(f.path()).unwrap();
    handler.initialize().unwrap();

    assert!(handler.format().is_none());
    assert!(handler.index().is_none());
    assert_eq!(handler.display_string(), "No timestamp format detected");
    assert!(handler.jump(Utc::now()).unwrap().is_none());
    assert!(handler.slowest_records(10).unwrap().gaps.is_empty());
    assert!(handler.chunk_report(1.5).unwrap().is_none());
    assert_eq!(handler.range(1, 2).unwrap(), vec!["beta".to_string(), "gamma".to_string()]);
}

#[test]
fn opening_a_missing_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let err = LogFileHandler::open(dir.path().join("missing.log")).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn cache_serves_entries_until_invalidated() {
    let t = start();
    let f = write_log(&ticks(t, 12, "%Y-%m-%d %H:%M:%S"));
    let mut cache = FormatCache::new();
    assert!(cache.get(f.path()).is_none());

    let detected = cache.get_or_detect(f.path(), &Settings::default()).unwrap();
    assert!(detected.detected);
    assert_eq!(detected.total_lines, 12);
    assert_eq!(cache.len(), 1);

    let hit = cache.get(f.path()).unwrap();
    assert_eq!(hit.format.unwrap().pattern, "yyyy-MM-dd HH:mm:ss.SSS");

    cache.invalidate(f.path());
    assert!(cache.get(f.path()).is_none());

    cache.put(f.path(), FormatDetection { format: None, detected: false, total_lines: 0 });
    cache.invalidate_all();
    assert!(cache.is_empty());
}

#[test]
fn cache_entries_expire() {
    let f = write_log("");
    let mut cache = FormatCache::with_ttl(std::time::Duration::ZERO);
    cache.put(f.path(), FormatDetection { format: None, detected: false, total_lines: 0 });
    assert!(cache.get(f.path()).is_none());
    assert!(cache.is_empty());
}
