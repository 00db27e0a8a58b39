//! # Time Specifications
//!
//! Users select snapshots with a short text: an ordinal (`last`,
//! `previous`, `first`, `-2`), a date prefix (`2012-04` picks the latest
//! April 2012 snapshot) or an age descriptor (`2 weeks ago`, `yesterday`).

use crate::error::{BackupError, Result};
use chrono::{Duration, NaiveDateTime};

/// Format of snapshot directory names.
pub const NAME_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Parse an age descriptor into a limit datetime: a snapshot is selected
/// when it is strictly older than the limit.
///
/// Hours count in seconds from `now`; day-based units are anchored at
/// midnight today. Months and years are approximated as 31 and 365 days.
pub fn limit(timespec: &str, now: NaiveDateTime) -> Result<NaiveDateTime> {
    let midnight = now.date().and_hms_opt(0, 0, 0).ok_or_else(|| {
        BackupError::Config(format!("cannot anchor time specification: {timespec:?}"))
    })?;
    if timespec.ends_with("ago") {
        let mut words = timespec.split_whitespace();
        let (amount, unit) = match (words.next(), words.next(), words.next(), words.next()) {
            (Some(amount), Some(unit), Some("ago"), None) => (amount, unit),
            _ => {
                return Err(BackupError::Config(format!(
                    "do not recognize time specification: {timespec:?}"
                )))
            }
        };
        let amount: i64 = amount.parse().map_err(|_| {
            BackupError::Config(format!("bad amount in time specification: {timespec:?}"))
        })?;
        let limit = match unit {
            "hour" | "hours" => return Ok(now - Duration::seconds(3600 * amount)),
            "day" | "days" => midnight - Duration::days(amount - 1),
            "week" | "weeks" => midnight - Duration::days(7 * amount - 1),
            // months and years are approximations, not calendar arithmetic
            "month" | "months" => midnight - Duration::days(31 * amount - 1),
            "year" | "years" => midnight - Duration::days(365 * amount - 1),
            _ => {
                return Err(BackupError::Config(format!(
                    "do not recognize unit (2nd word) in: {timespec:?}"
                )))
            }
        };
        Ok(limit)
    } else if timespec == "yesterday" {
        Ok(midnight)
    } else {
        Err(BackupError::Config(format!(
            "do not recognize time specification: {timespec:?}"
        )))
    }
}

/// Pick a snapshot name from a sorted list of complete snapshot names.
pub fn select<'a>(backups: &'a [String], timespec: Option<&str>) -> Result<&'a str> {
    select_at(backups, timespec, chrono::Local::now().naive_local())
}

/// As [`select`], with an explicit notion of "now" for deterministic tests.
pub fn select_at<'a>(
    backups: &'a [String],
    timespec: Option<&str>,
    now: NaiveDateTime,
) -> Result<&'a str> {
    let not_found = || {
        BackupError::NotFound(format!(
            "no backup found matching {:?}",
            timespec.unwrap_or("last")
        ))
    };
    match timespec {
        None | Some("last") => backups.last().map(String::as_str).ok_or_else(not_found),
        Some("previous") => {
            if backups.len() >= 2 {
                Ok(&backups[backups.len() - 2])
            } else {
                Err(not_found())
            }
        }
        Some("first") => backups.first().map(String::as_str).ok_or_else(not_found),
        Some(spec) if spec.starts_with('-') => {
            let n: i64 = spec.parse().map_err(|_| not_found())?;
            let len = backups.len() as i64;
            if -len < n && n < 0 {
                Ok(&backups[(len + n) as usize])
            } else {
                Err(not_found())
            }
        }
        Some(spec) => {
            // by absolute date: just compare strings, latest prefix match wins
            if let Some(name) = backups.iter().rev().find(|name| name.starts_with(spec)) {
                return Ok(name);
            }
            // by age: latest snapshot strictly older than the limit
            let limit = limit(spec, now).map_err(|_| not_found())?;
            backups
                .iter()
                .rev()
                .find(|name| {
                    NaiveDateTime::parse_from_str(name, NAME_FORMAT)
                        .map(|t| t < limit)
                        .unwrap_or(false)
                })
                .map(String::as_str)
                .ok_or_else(not_found)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    #[test]
    fn limits_match_the_reference_behavior() {
        let today = at(2012, 4, 1, 16, 55);
        assert_eq!(limit("1 hour ago", today).unwrap(), at(2012, 4, 1, 15, 55));
        assert_eq!(limit("yesterday", today).unwrap(), at(2012, 4, 1, 0, 0));
        assert_eq!(limit("1 day ago", today).unwrap(), at(2012, 4, 1, 0, 0));
        assert_eq!(limit("2 days ago", today).unwrap(), at(2012, 3, 31, 0, 0));
        assert_eq!(limit("2 weeks ago", today).unwrap(), at(2012, 3, 19, 0, 0));
        assert_eq!(limit("1 month ago", today).unwrap(), at(2012, 3, 2, 0, 0));
        assert_eq!(limit("1 year ago", today).unwrap(), at(2011, 4, 3, 0, 0));
    }

    #[test]
    fn bad_specs_are_rejected() {
        let today = at(2012, 4, 1, 16, 55);
        assert!(limit("1 fortnight ago", today).is_err());
        assert!(limit("soon", today).is_err());
        assert!(limit("x days ago", today).is_err());
    }

    fn corpus() -> Vec<String> {
        [
            "2012-01-15_120000",
            "2012-04-01_090000",
            "2012-04-14_100000",
            "2012-09-02_080000",
            "2012-09-20_180000",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect()
    }

    #[test]
    fn ordinal_selection() {
        let backups = corpus();
        let now = at(2012, 9, 30, 12, 0);
        assert_eq!(
            select_at(&backups, None, now).unwrap(),
            "2012-09-20_180000"
        );
        assert_eq!(
            select_at(&backups, Some("last"), now).unwrap(),
            "2012-09-20_180000"
        );
        assert_eq!(
            select_at(&backups, Some("previous"), now).unwrap(),
            "2012-09-02_080000"
        );
        assert_eq!(
            select_at(&backups, Some("first"), now).unwrap(),
            "2012-01-15_120000"
        );
        assert_eq!(
            select_at(&backups, Some("-2"), now).unwrap(),
            "2012-09-02_080000"
        );
        assert!(select_at(&backups, Some("-5"), now).is_err());
        assert!(select_at(&backups, Some("-6"), now).is_err());
    }

    #[test]
    fn prefix_selects_latest_match() {
        let backups = corpus();
        let now = at(2012, 9, 30, 12, 0);
        assert_eq!(
            select_at(&backups, Some("2012-04"), now).unwrap(),
            "2012-04-14_100000"
        );
        assert_eq!(
            select_at(&backups, Some("2012-09-02"), now).unwrap(),
            "2012-09-02_080000"
        );
    }

    #[test]
    fn age_selects_latest_older_than_limit() {
        let backups = corpus();
        let now = at(2012, 9, 30, 12, 0);
        // limit = 2012-09-24 → latest strictly older is 2012-09-20
        assert_eq!(
            select_at(&backups, Some("1 week ago"), now).unwrap(),
            "2012-09-20_180000"
        );
        // limit = 2012-04-29 → latest older is 2012-04-14
        assert_eq!(
            select_at(&backups, Some("5 months ago"), now).unwrap(),
            "2012-04-14_100000"
        );
    }

    #[test]
    fn no_match_is_not_found() {
        let backups = corpus();
        let now = at(2012, 9, 30, 12, 0);
        assert!(select_at(&backups, Some("2013"), now).is_err());
        assert!(select_at(&[], None, now).is_err());
    }
}
