//! Device epoch descriptor.
//!
//! The device counts time from a configurable calendar instant and
//! publishes that instant as a 9-byte descriptor under tag
//! [`EPOCH_DESCRIPTOR_TAG`]:
//!
//! | Byte | Field                                 |
//! |------|---------------------------------------|
//! | 0    | century (`year / 100`)                |
//! | 1    | year within century (0-99)            |
//! | 2    | month (1-12)                          |
//! | 3    | day of month                          |
//! | 4    | hours (0-23)                          |
//! | 5    | minutes (0-59)                        |
//! | 6    | seconds (0-59)                        |
//! | 7-8  | milliseconds, big-endian (0-999)      |
//!
//! The epoch is not time-zone aware and is interpreted as UTC.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::Serialize;
use std::fmt;
use timesync_common::{SyncError, SyncResult};

/// Descriptor tag carrying the device epoch.
pub const EPOCH_DESCRIPTOR_TAG: u8 = 130;

/// Length of the epoch descriptor payload in bytes.
pub const EPOCH_DESCRIPTOR_LEN: usize = 9;

/// Calendar instant from which the device tick counter is offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct Epoch(NaiveDateTime);

impl Epoch {
    /// The Unix epoch, used by firmware that never publishes its own.
    pub fn unix() -> Self {
        Self(DateTime::<Utc>::UNIX_EPOCH.naive_utc())
    }

    /// Wrap an existing calendar instant.
    pub fn from_datetime(datetime: NaiveDateTime) -> Self {
        Self(datetime)
    }

    /// The calendar instant of this epoch.
    pub fn datetime(&self) -> NaiveDateTime {
        self.0
    }

    /// Calendar time `timestamp` seconds after this epoch.
    ///
    /// Returns `None` if the result does not fit the calendar range.
    #[allow(clippy::cast_possible_truncation)]
    pub fn at(&self, timestamp: f64) -> Option<NaiveDateTime> {
        if !timestamp.is_finite() {
            return None;
        }
        let micros = (timestamp * 1_000_000.0).round() as i64;
        self.0.checked_add_signed(TimeDelta::microseconds(micros))
    }
}

impl Default for Epoch {
    fn default() -> Self {
        Self::unix()
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.6f"))
    }
}

/// Parse the 9-byte epoch descriptor payload.
///
/// Every field is range-checked before the calendar value is built.
///
/// # Errors
///
/// Returns [`SyncError::MalformedEpoch`] if the payload is not exactly
/// [`EPOCH_DESCRIPTOR_LEN`] bytes or any field is out of range.
pub fn parse_epoch(bytes: &[u8]) -> SyncResult<Epoch> {
    let raw: [u8; EPOCH_DESCRIPTOR_LEN] = bytes.try_into().map_err(|_| {
        SyncError::MalformedEpoch(format!(
            "expected {EPOCH_DESCRIPTOR_LEN} bytes, got {}",
            bytes.len()
        ))
    })?;
    let [century, year, month, day, hour, minute, second, millis_high, millis_low] = raw;

    check_range("year", year, 0, 99)?;
    check_range("month", month, 1, 12)?;
    check_range("hour", hour, 0, 23)?;
    check_range("minute", minute, 0, 59)?;
    check_range("second", second, 0, 59)?;

    let full_year = i32::from(century) * 100 + i32::from(year);
    check_range("day", day, 1, days_in_month(full_year, month))?;

    let millis = u16::from_be_bytes([millis_high, millis_low]);
    if millis > 999 {
        return Err(SyncError::MalformedEpoch(format!(
            "millisecond field {millis} out of range 0..=999"
        )));
    }

    NaiveDate::from_ymd_opt(full_year, u32::from(month), u32::from(day))
        .and_then(|date| {
            date.and_hms_micro_opt(
                u32::from(hour),
                u32::from(minute),
                u32::from(second),
                u32::from(millis) * 1000,
            )
        })
        .map(Epoch)
        .ok_or_else(|| {
            SyncError::MalformedEpoch(format!(
                "{full_year:04}-{month:02}-{day:02} {hour:02}:{minute:02}:{second:02} is not representable"
            ))
        })
}

fn check_range(field: &str, value: u8, min: u8, max: u8) -> SyncResult<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(SyncError::MalformedEpoch(format!(
            "{field} {value} out of range {min}..={max}"
        )))
    }
}

fn days_in_month(year: i32, month: u8) -> u8 {
    match month {
        4 | 6 | 9 | 11 => 30,
        2 if is_leap_year(year) => 29,
        2 => 28,
        _ => 31,
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_new_year_2024() {
        let epoch = parse_epoch(&[20, 24, 1, 1, 0, 0, 0, 0, 0]).unwrap();
        let dt = epoch.datetime();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 1);
        assert_eq!((dt.hour(), dt.minute(), dt.second()), (0, 0, 0));
        assert_eq!(dt.nanosecond(), 0);
    }

    #[test]
    fn test_parse_all_fields() {
        // 1999-12-31 23:59:58.250
        let epoch = parse_epoch(&[19, 99, 12, 31, 23, 59, 58, 0x00, 0xFA]).unwrap();
        assert_eq!(epoch.to_string(), "1999-12-31 23:59:58.250000");
        assert_eq!(epoch.datetime().nanosecond(), 250_000_000);
    }

    #[test]
    fn test_unix_epoch_descriptor() {
        let epoch = parse_epoch(&[19, 70, 1, 1, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(epoch, Epoch::unix());
        assert_eq!(Epoch::default(), Epoch::unix());
    }

    #[test]
    fn test_month_13_rejected() {
        let err = parse_epoch(&[20, 24, 13, 1, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, SyncError::MalformedEpoch(ref msg) if msg.contains("month")));
    }

    #[test]
    fn test_month_zero_rejected() {
        assert!(parse_epoch(&[20, 24, 0, 1, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_day_checked_against_month() {
        assert!(parse_epoch(&[20, 23, 2, 29, 0, 0, 0, 0, 0]).is_err());
        assert!(parse_epoch(&[20, 24, 2, 29, 0, 0, 0, 0, 0]).is_ok());
        assert!(parse_epoch(&[21, 0, 2, 29, 0, 0, 0, 0, 0]).is_err());
        assert!(parse_epoch(&[20, 0, 2, 29, 0, 0, 0, 0, 0]).is_ok());
        assert!(parse_epoch(&[20, 24, 4, 31, 0, 0, 0, 0, 0]).is_err());
        assert!(parse_epoch(&[20, 24, 1, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_time_fields_rejected() {
        assert!(parse_epoch(&[20, 24, 1, 1, 24, 0, 0, 0, 0]).is_err());
        assert!(parse_epoch(&[20, 24, 1, 1, 0, 60, 0, 0, 0]).is_err());
        assert!(parse_epoch(&[20, 24, 1, 1, 0, 0, 60, 0, 0]).is_err());
        // 1000 ms
        assert!(parse_epoch(&[20, 24, 1, 1, 0, 0, 0, 0x03, 0xE8]).is_err());
        assert!(parse_epoch(&[20, 100, 1, 1, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_wrong_length_rejected() {
        assert!(matches!(
            parse_epoch(&[20, 24, 1, 1, 0, 0, 0, 0]),
            Err(SyncError::MalformedEpoch(_))
        ));
        assert!(parse_epoch(&[20, 24, 1, 1, 0, 0, 0, 0, 0, 0]).is_err());
        assert!(parse_epoch(&[]).is_err());
    }

    #[test]
    fn test_epoch_at_adds_fractional_seconds() {
        let epoch = parse_epoch(&[20, 24, 1, 1, 0, 0, 0, 0, 0]).unwrap();
        let dt = epoch.at(86_400.5).unwrap();
        assert_eq!(dt.day(), 2);
        assert_eq!(dt.nanosecond(), 500_000_000);
    }

    #[test]
    fn test_epoch_at_rejects_nan() {
        assert!(Epoch::unix().at(f64::NAN).is_none());
    }
}
