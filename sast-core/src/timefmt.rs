//! SQLite datetime string helpers.
//!
//! Grounded on `original_source/config.py`'s `getTimeSTR`, `str2Datetime`,
//! `IsIntervalWarn`, and `spanTimeforSTR` — the schema stores timestamps as
//! `"%Y-%m-%d %H:%M:%S"` text, so every table read/write in `store` goes
//! through these.

use chrono::{Duration as ChronoDuration, Local, LocalResult, NaiveDateTime, TimeZone};

pub const SQL_DATETIME_FMT: &str = "%Y-%m-%d %H:%M:%S";

pub fn now_str() -> String {
    Local::now().format(SQL_DATETIME_FMT).to_string()
}

pub fn to_sql_str(dt: NaiveDateTime) -> String {
    dt.format(SQL_DATETIME_FMT).to_string()
}

pub fn parse_sql_str(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, SQL_DATETIME_FMT).ok()
}

/// True once at least `interval` has elapsed since `last`.
pub fn is_interval_elapsed(last: NaiveDateTime, interval: ChronoDuration) -> bool {
    Local::now().naive_local() - last >= interval
}

/// Same check starting from a SQL datetime string; malformed input reads as
/// "not yet elapsed" rather than panicking, matching the original's
/// except-and-return-False fallback.
pub fn is_interval_elapsed_str(last: &str, interval: ChronoDuration) -> bool {
    match parse_sql_str(last) {
        Some(dt) => is_interval_elapsed(dt, interval),
        None => false,
    }
}

pub fn span_since(last: NaiveDateTime) -> ChronoDuration {
    Local::now().naive_local() - last
}

/// Converts a stored `history`/`latest` timestamp (always wall-clock local
/// time, per `toTimespan` in `original_source/config.py`) to Unix seconds.
/// Every row in this schema is written with `now_str()`/`to_sql_str`, i.e.
/// local time, so interpreting it as UTC would shift the emitted epoch by
/// the host's offset. Ambiguous/skipped local times (DST fold/gap) resolve
/// to the earlier of the two candidates rather than panicking.
pub fn to_unix_local(dt: NaiveDateTime) -> i64 {
    match Local.from_local_datetime(&dt) {
        LocalResult::Single(t) => t.timestamp(),
        LocalResult::Ambiguous(earliest, _) => earliest.timestamp(),
        LocalResult::None => dt.and_utc().timestamp(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sql_string_round_trips() {
        let s = now_str();
        let dt = parse_sql_str(&s).unwrap();
        assert_eq!(to_sql_str(dt), s);
    }

    #[test]
    fn interval_elapsed_true_for_old_timestamp() {
        let old = Local::now().naive_local() - ChronoDuration::minutes(10);
        assert!(is_interval_elapsed(old, ChronoDuration::minutes(5)));
    }

    #[test]
    fn interval_elapsed_false_for_recent_timestamp() {
        let recent = Local::now().naive_local() - ChronoDuration::seconds(5);
        assert!(!is_interval_elapsed(recent, ChronoDuration::minutes(5)));
    }

    #[test]
    fn interval_elapsed_str_false_on_malformed_input() {
        assert!(!is_interval_elapsed_str("not-a-date", ChronoDuration::minutes(5)));
    }
}
