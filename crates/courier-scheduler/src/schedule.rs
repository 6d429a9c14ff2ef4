use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use courier_core::config::ScheduleConfig;

use crate::error::{Result, SchedulerError};

/// How far a DST gap can push a wall-clock time forward.
const MAX_GAP_MINUTES: i64 = 180;

/// Fire once a day at `hour:minute` wall-clock time in `tz`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub hour: u8,
    pub minute: u8,
    pub tz: Tz,
}

impl DailySchedule {
    pub fn new(hour: u8, minute: u8, tz: Tz) -> Result<Self> {
        if hour > 23 || minute > 59 {
            return Err(SchedulerError::InvalidSchedule(format!(
                "{hour:02}:{minute:02} is not a time of day"
            )));
        }
        Ok(Self { hour, minute, tz })
    }

    /// From the `[schedule]` section. An unparseable time falls back to the
    /// default; an unknown zone is an error.
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        let (hour, minute) = config.send_time();
        Self::new(hour, minute, config.time_zone()?)
    }

    /// The instant this schedule fires on local date `date`.
    ///
    /// Nonexistent local times (spring-forward gap) move to the first valid
    /// minute after them; ambiguous ones (fall-back) take the earlier instant.
    pub fn occurrence_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let naive = date.and_hms_opt(self.hour as u32, self.minute as u32, 0)?;
        (0..=MAX_GAP_MINUTES).find_map(|shift| {
            self.tz
                .from_local_datetime(&(naive + Duration::minutes(shift)))
                .earliest()
                .map(|t| t.with_timezone(&Utc))
        })
    }

    /// The first occurrence strictly after `from`.
    pub fn next_after(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let local_today = from.with_timezone(&self.tz).date_naive();
        (0..=2)
            .filter_map(|offset| local_today.checked_add_signed(Duration::days(offset)))
            .filter_map(|date| self.occurrence_on(date))
            .find(|t| *t > from)
    }
}

impl std::fmt::Display for DailySchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "daily at {:02}:{:02} {}", self.hour, self.minute, self.tz)
    }
}
