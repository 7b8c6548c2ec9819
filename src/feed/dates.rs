use chrono::{DateTime, NaiveDateTime};

/// Timestamp formats encountered in the wild, tried in order. The split is
/// whether the pattern carries its own numeric offset or is interpreted as
/// UTC directly.
enum DateFormat {
    /// Parsed with `DateTime::parse_from_str` (offset in the string).
    WithOffset(&'static str),
    /// Parsed with `NaiveDateTime::parse_from_str` and pinned to UTC.
    AssumeUtc(&'static str),
}

/// Ordered candidate list. Order matters: the permissive minute-precision
/// variant at the end would happily mis-parse strings the stricter patterns
/// handle correctly.
const FORMATS: &[DateFormat] = &[
    // RFC-822 style with numeric offset: "Mon, 02 Jan 2006 15:04:05 +0000"
    DateFormat::WithOffset("%a, %d %b %Y %H:%M:%S %z"),
    // ISO-8601 with numeric offset: "2006-01-02T15:04:05+0100"
    DateFormat::WithOffset("%Y-%m-%dT%H:%M:%S%z"),
    // ISO-8601 with literal UTC marker: "2021-09-20T20:40:59Z"
    DateFormat::AssumeUtc("%Y-%m-%dT%H:%M:%SZ"),
    // ISO-8601 with milliseconds: "2006-01-02T15:04:05.000+0100"
    DateFormat::WithOffset("%Y-%m-%dT%H:%M:%S%.3f%z"),
    // Space-separated date-time with offset: "2006-01-02 15:04:05 +0100"
    DateFormat::WithOffset("%Y-%m-%d %H:%M:%S %z"),
    // Deliberately permissive minute-precision ISO variant
    DateFormat::AssumeUtc("%Y-%m-%dT%H:%M"),
];

/// Parses a free-form feed timestamp into epoch milliseconds.
///
/// Tries each known format in order and returns the first success, or
/// `None` when nothing matches. `None` is the only failure signal — the
/// stored sentinel of 0 is applied exactly once, at post assembly, so a
/// zero timestamp in the store always means "unparseable", never a parse
/// of the epoch itself.
///
/// chrono parses `%a`/`%b` names in English regardless of the process
/// locale, which is what feed dates require: an RFC-822 date must parse
/// identically on every machine.
pub fn parse_date(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    for format in FORMATS {
        match format {
            DateFormat::WithOffset(pattern) => {
                if let Ok(dt) = DateTime::parse_from_str(raw, pattern) {
                    return Some(dt.timestamp_millis());
                }
            }
            DateFormat::AssumeUtc(pattern) => {
                if let Ok(dt) = NaiveDateTime::parse_from_str(raw, pattern) {
                    return Some(dt.and_utc().timestamp_millis());
                }
            }
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rfc822_with_numeric_offset() {
        // 2006-01-02T15:04:05Z
        assert_eq!(
            parse_date("Mon, 02 Jan 2006 15:04:05 +0000"),
            Some(1136214245000)
        );
    }

    #[test]
    fn test_rfc822_nonzero_offset() {
        // One hour behind UTC
        assert_eq!(
            parse_date("Mon, 02 Jan 2006 15:04:05 -0100"),
            Some(1136214245000 + 3_600_000)
        );
    }

    #[test]
    fn test_iso_with_literal_utc_marker() {
        assert_eq!(parse_date("2021-09-20T20:40:59Z"), Some(1632170459000));
    }

    #[test]
    fn test_iso_with_numeric_offset() {
        assert_eq!(parse_date("2021-09-20T20:40:59+0000"), Some(1632170459000));
        assert_eq!(parse_date("2021-09-20T20:40:59+02:00"), Some(1632163259000));
    }

    #[test]
    fn test_iso_with_milliseconds() {
        assert_eq!(
            parse_date("2021-09-20T20:40:59.500+0000"),
            Some(1632170459500)
        );
    }

    #[test]
    fn test_space_separated_with_offset() {
        assert_eq!(parse_date("2021-09-20 20:40:59 +0000"), Some(1632170459000));
    }

    #[test]
    fn test_permissive_minute_precision() {
        assert_eq!(parse_date("2021-09-20T20:40"), Some(1632170400000));
    }

    #[test]
    fn test_unparseable_returns_none() {
        assert_eq!(parse_date("not a date"), None);
        assert_eq!(parse_date(""), None);
        assert_eq!(parse_date("   "), None);
        assert_eq!(parse_date("20/09/2021"), None);
    }

    #[test]
    fn test_surrounding_whitespace_tolerated() {
        assert_eq!(parse_date("  2021-09-20T20:40:59Z\n"), Some(1632170459000));
    }
}
