//! Calendar decomposition of event timestamps.
//!
//! All fields are computed in UTC with ISO-8601 week numbering. Weekday is
//! counted from Monday = 0. Both loaders go through [`decompose`], the staged
//! loader by way of the `time_part` SQL function.

use crate::model::TimeDim;
use chrono::{DateTime, Datelike, Timelike, Utc};

pub fn instant(epoch_ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(epoch_ms)
}

/// Returns `None` when the instant is outside the representable calendar range.
pub fn decompose(epoch_ms: i64) -> Option<TimeDim> {
    let at = instant(epoch_ms)?;
    Some(TimeDim {
        start_time: epoch_ms,
        hour: at.hour(),
        day: at.day(),
        week: at.iso_week().week(),
        month: at.month(),
        year: at.year(),
        weekday: at.weekday().num_days_from_monday(),
    })
}

/// Named calendar fields, as accepted by the `time_part` SQL function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePart {
    Hour,
    Day,
    Week,
    Month,
    Year,
    Weekday,
}

impl TimePart {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hour" => Some(TimePart::Hour),
            "day" => Some(TimePart::Day),
            "week" => Some(TimePart::Week),
            "month" => Some(TimePart::Month),
            "year" => Some(TimePart::Year),
            "weekday" => Some(TimePart::Weekday),
            _ => None,
        }
    }

    pub fn of(&self, time: &TimeDim) -> i64 {
        match self {
            TimePart::Hour => time.hour as i64,
            TimePart::Day => time.day as i64,
            TimePart::Week => time.week as i64,
            TimePart::Month => time.month as i64,
            TimePart::Year => time.year as i64,
            TimePart::Weekday => time.weekday as i64,
        }
    }
}
