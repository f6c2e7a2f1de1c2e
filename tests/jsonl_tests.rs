use logseek::jsonl::{
    convert_jsonl_to_log, detect_fields, pick_best, render_line, FieldSelection, DEFAULT_FIELD_SAMPLE_LINES,
    LEVEL_CANDIDATES, MESSAGE_CANDIDATES, TIMESTAMP_CANDIDATES,
};
use serde_json::{json, Value};
use std::io::Write;
use tempfile::NamedTempFile;

fn write_jsonl(content: &str) -> NamedTempFile {
    let mut f = NamedTempFile::new().unwrap();
    f.write_all(content.as_bytes()).unwrap();
    f.flush().unwrap();
    f
}

fn names(fields: &[&str]) -> Vec<String> {
    fields.iter().map(|s| s.to_string()).collect()
}

#[test]
fn fields_are_ordered_by_frequency_then_name() {
    let f = write_jsonl(concat!(
        "{\"ts\": \"2026-01-15T10:00:00Z\", \"msg\": \"a\", \"level\": \"info\"}\n",
        "\n",
        "not json at all\n",
        "{\"ts\": \"2026-01-15T10:00:01Z\", \"msg\": \"b\", \"user\": \"ann\"}\n",
        "[1, 2, 3]\n",
        "{\"ts\": \"2026-01-15T10:00:02Z\", \"msg\": \"c\", \"level\": \"warn\", \"code\": 7}\n",
    ));
    let fields = detect_fields(f.path(), DEFAULT_FIELD_SAMPLE_LINES).unwrap();
    assert_eq!(fields, names(&["msg", "ts", "level", "code", "user"]));
}

#[test]
fn field_detection_reads_only_the_first_lines() {
    let f = write_jsonl("{\"a\": 1}\n{\"a\": 2}\n{\"late\": true}\n");
    assert_eq!(detect_fields(f.path(), 2).unwrap(), names(&["a"]));
    assert!(detect_fields(write_jsonl("plain text\n").path(), 50).unwrap().is_empty());
}

#[test]
fn best_candidate_follows_candidate_order() {
    let fields = names(&["time", "message", "@timestamp", "severity", "msg"]);
    assert_eq!(pick_best(&fields, TIMESTAMP_CANDIDATES).as_deref(), Some("time"));
    assert_eq!(pick_best(&fields, LEVEL_CANDIDATES).as_deref(), Some("severity"));
    assert_eq!(pick_best(&fields, MESSAGE_CANDIDATES).as_deref(), Some("message"));
    assert_eq!(pick_best(&names(&["id"]), LEVEL_CANDIDATES), None);

    let selection = FieldSelection::recommended(&fields);
    assert_eq!(selection.timestamp.as_deref(), Some("time"));
    let other: Vec<&str> = selection.unused(&fields).into_iter().map(String::as_str).collect();
    assert_eq!(other, vec!["@timestamp", "msg"]);
}

#[test]
fn lines_render_in_role_order() {
    let obj = json!({
        "time": "2026-01-15 10:00:00",
        "lvl": "warn",
        "msg": "disk almost full",
        "pct": 93,
        "tags": ["disk", "ops"],
        "ctx": {"host": "db1"}
    });
    let Value::Object(obj) = obj else { unreachable!() };
    let selection = FieldSelection {
        timestamp: Some("time".into()),
        level: Some("lvl".into()),
        message: Some("msg".into()),
        extra: names(&["pct", "missing", "tags", "ctx"]),
    };
    assert_eq!(
        render_line(&obj, &selection),
        r#"2026-01-15 10:00:00 [WARN] disk almost full pct=93 tags=["disk","ops"] ctx={"host":"db1"}"#
    );

    let message_only = FieldSelection { message: Some("msg".into()), ..FieldSelection::default() };
    assert_eq!(render_line(&obj, &message_only), "disk almost full");
}

#[test]
fn file_converts_with_pass_through() {
    let f = write_jsonl(concat!(
        "{\"timestamp\": \"2026-01-15T10:00:00Z\", \"level\": \"error\", \"message\": \"boom\"}\n",
        "   \n",
        "--- rotated ---\n",
        "{\"timestamp\": \"2026-01-15T10:00:05Z\", \"level\": \"info\", \"message\": \"ok\", \"id\": 4}\n",
    ));
    let fields = detect_fields(f.path(), DEFAULT_FIELD_SAMPLE_LINES).unwrap();
    let mut selection = FieldSelection::recommended(&fields);
    selection.extra = names(&["id"]);

    let mut out = Vec::new();
    let summary = convert_jsonl_to_log(f.path(), &selection, &mut out).unwrap();
    assert_eq!(summary.lines_written, 2);
    assert_eq!(summary.lines_passed_through, 1);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "2026-01-15T10:00:00Z [ERROR] boom\n--- rotated ---\n2026-01-15T10:00:05Z [INFO] ok id=4\n"
    );
}

#[test]
fn missing_input_is_a_file_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.jsonl");
    assert!(detect_fields(&path, 10).unwrap_err().is_not_found());
    let mut out = Vec::new();
    assert!(convert_jsonl_to_log(&path, &FieldSelection::default(), &mut out).unwrap_err().is_not_found());
}
