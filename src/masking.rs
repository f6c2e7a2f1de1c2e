use crate::detect::TimestampMatch;
use once_cell::sync::Lazy;
use regex::Regex;

static RE_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b\d+\b").unwrap());

static RE_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap());

// Matches anything shaped like a dotted quad, not only valid addresses.
static RE_IPV4: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\.\d+\.\d+\.\d+").unwrap());

/// Collapse the variable parts of a message: standalone numbers, hex literals
/// and dotted quads become placeholders. Lines differing only in those parts
/// normalize to the same key.
pub fn mask_variables(text: &str) -> String {
    let s = RE_INT.replace_all(text, "#");
    let s = RE_HEX.replace_all(&s, "0x#");
    let s = RE_IPV4.replace_all(&s, "#.#.#.#");
    s.trim().to_string()
}

/// Remove the matched timestamp from `line`, then mask what is left.
pub fn normalize_line(line: &str, timestamp: Option<&TimestampMatch>) -> String {
    match timestamp {
        Some(m) if m.end <= line.len() && line.is_char_boundary(m.start) && line.is_char_boundary(m.end) => {
            let mut stripped = String::with_capacity(line.len());
            stripped.push_str(&line[..m.start]);
            stripped.push_str(&line[m.end..]);
            mask_variables(&stripped)
        }
        _ => mask_variables(line),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn masks_numbers_hex_and_addresses() {
        assert_eq!(mask_variables("User 123 logged in"), "User # logged in");
        assert_eq!(mask_variables("ptr 0xdeadBEEF freed"), "ptr 0x# freed");
        assert_eq!(mask_variables("from 10.0.0.254 port 8080"), "from #.#.#.# port #");
    }

    #[test]
    fn keeps_digits_inside_words() {
        assert_eq!(mask_variables("worker-7a retry v2"), "worker-7a retry v2");
        assert_eq!(mask_variables("job_42 done"), "job_42 done");
    }

    #[test]
    fn strips_timestamp_span_before_masking() {
        let line = "2026-01-15 10:30:45 User 123 logged in";
        let m = TimestampMatch {
            start: 0,
            end: 19,
            timestamp: Utc.with_ymd_and_hms(2026, 1, 15, 10, 30, 45).unwrap(),
        };
        assert_eq!(normalize_line(line, Some(&m)), "User # logged in");
        assert_eq!(normalize_line(line, None), "#-#-# #:#:# User # logged in");
    }
}
