//! The export window: the full calendar day preceding the run, in the billing
//! service's local time (UTC+6).

use anyhow::Context;
use chrono::{DateTime, Days, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};
use std::fmt::{Display, Formatter};

/// Offset of the billing service's wall clock from UTC.
pub const EXPORT_UTC_OFFSET_HOURS: i64 = 6;

const PARAM_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive range `[date 00:00:00, date 23:59:59]` in UTC+6 wall-clock time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExportWindow {
    pub date: NaiveDate,
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ExportWindow {
    /// Computes the window covering the day before `now`, as seen in UTC+6.
    pub fn previous_day(now: DateTime<Utc>) -> anyhow::Result<ExportWindow> {
        let local_now = now.naive_utc() + TimeDelta::hours(EXPORT_UTC_OFFSET_HOURS);
        let yesterday = local_now
            .date()
            .checked_sub_days(Days::new(1))
            .with_context(|| format!("Cannot compute the day before {}", local_now))?;

        Self::for_date(yesterday)
    }

    /// The window covering the given calendar day.
    pub fn for_date(date: NaiveDate) -> anyhow::Result<ExportWindow> {
        let end_of_day =
            NaiveTime::from_hms_opt(23, 59, 59).context("Invalid end of day time")?;

        Ok(ExportWindow {
            date,
            start: date.and_time(NaiveTime::MIN),
            end: date.and_time(end_of_day),
        })
    }

    /// Lower bound as expected by the billing service (`YYYY-MM-DD HH:MM:SS`).
    pub fn from_param(&self) -> String {
        self.start.format(PARAM_FORMAT).to_string()
    }

    /// Upper bound as expected by the billing service (`YYYY-MM-DD HH:MM:SS`).
    pub fn to_param(&self) -> String {
        self.end.format(PARAM_FORMAT).to_string()
    }

    /// The day as used in archive keys (`YYYY-MM-DD`).
    pub fn date_key(&self) -> String {
        self.date.format(DATE_FORMAT).to_string()
    }
}

impl Display for ExportWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} - {}", self.from_param(), self.to_param())
    }
}

/// Parses a `YYYY-MM-DD` date as accepted on the command line.
pub fn parse_date(value: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}
