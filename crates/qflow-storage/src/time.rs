//! Time Helpers
//!
//! The archive keys everything on `i64` nanoseconds since the Unix epoch and
//! names files by UTC calendar time. These helpers convert between the two.
//! Naive values are always interpreted as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};

/// Date component of archive directories: `YYYYMMDD`
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Queue time component of archive filenames: `YYYYMMDD-HHMMSSZ`
pub const ARCHIVE_TIME_FORMAT: &str = "%Y%m%d-%H%M%SZ";

/// Anything that names a point in time
pub trait IntoTimestamp {
    /// Nanoseconds since the Unix epoch
    fn into_timestamp(self) -> i64;
}

impl IntoTimestamp for i64 {
    fn into_timestamp(self) -> i64 {
        self
    }
}

impl IntoTimestamp for DateTime<Utc> {
    fn into_timestamp(self) -> i64 {
        // Saturates outside the ~584 year nanosecond range
        self.timestamp_nanos_opt().unwrap_or_else(|| {
            if self.timestamp() < 0 {
                i64::MIN
            } else {
                i64::MAX
            }
        })
    }
}

impl IntoTimestamp for NaiveDateTime {
    fn into_timestamp(self) -> i64 {
        Utc.from_utc_datetime(&self).into_timestamp()
    }
}

impl IntoTimestamp for NaiveDate {
    fn into_timestamp(self) -> i64 {
        self.and_time(NaiveTime::MIN).into_timestamp()
    }
}

pub fn datetime_from_nanos(timestamp: i64) -> DateTime<Utc> {
    Utc.timestamp_nanos(timestamp)
}

/// UTC calendar date containing `timestamp`
pub fn date_of(timestamp: i64) -> NaiveDate {
    datetime_from_nanos(timestamp).date_naive()
}

/// Midnight UTC at the start of the day containing `timestamp`
pub fn floor_to_day(timestamp: i64) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date_of(timestamp).and_time(NaiveTime::MIN))
}

/// `YYYYMMDD`
pub fn date_str(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// `YYYYMMDD-HHMMSSZ`
pub fn archive_time_str(time: DateTime<Utc>) -> String {
    time.format(ARCHIVE_TIME_FORMAT).to_string()
}
