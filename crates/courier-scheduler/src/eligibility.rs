use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

/// Whether a document should be delivered in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Eligibility {
    /// Invoice date is today: send it.
    Due,
    /// Invoice date is in the future: leave the file for a later run.
    NotDueYet,
    /// Invoice date has passed: record as skipped and relocate unsent.
    Stale,
}

/// Due if and only if `invoice_date == today`.
pub fn evaluate(invoice_date: NaiveDate, today: NaiveDate) -> Eligibility {
    match invoice_date.cmp(&today) {
        std::cmp::Ordering::Equal => Eligibility::Due,
        std::cmp::Ordering::Greater => Eligibility::NotDueYet,
        std::cmp::Ordering::Less => Eligibility::Stale,
    }
}

/// The calendar date of `now` in `tz`.
pub fn today_in(tz: Tz, now: DateTime<Utc>) -> NaiveDate {
    now.with_timezone(&tz).date_naive()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn today_yesterday_tomorrow() {
        let today = d(2025, 12, 15);
        assert_eq!(evaluate(today, today), Eligibility::Due);
        assert_eq!(evaluate(d(2025, 12, 14), today), Eligibility::Stale);
        assert_eq!(evaluate(d(2025, 12, 16), today), Eligibility::NotDueYet);
    }

    #[test]
    fn today_follows_the_configured_zone() {
        // 23:30 UTC on the 14th is already the 15th in Berlin.
        let now = Utc.with_ymd_and_hms(2025, 12, 14, 23, 30, 0).unwrap();
        assert_eq!(today_in(chrono_tz::Europe::Berlin, now), d(2025, 12, 15));
        assert_eq!(today_in(chrono_tz::UTC, now), d(2025, 12, 14));
    }
}
