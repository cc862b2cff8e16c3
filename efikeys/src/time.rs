// SPDX-License-Identifier: Apache-2.0
// Copyright 2026 Efikeys Authors

use byteorder::{ByteOrder, LittleEndian};
use chrono::{DateTime, Datelike, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Format accepted for explicit timestamps
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Value of `time_zone` meaning local time with no offset information
pub const EFI_UNSPECIFIED_TIMEZONE: i16 = 0x07FF;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimeError {
    /// Not enough bytes for an EFI_TIME
    #[error("EFI_TIME needs {expected} bytes, got {got}")]
    Length { expected: usize, got: usize },

    /// Could not parse the timestamp string
    #[error("invalid timestamp '{0}', expected YYYY-MM-DD HH:MM:SS")]
    Parse(String),
}

/// EFI_TIME as laid out in authenticated variables and flash headers
///
/// Year u16, Month u8, Day u8, Hour u8, Minute u8, Second u8, pad u8,
/// Nanosecond u32, TimeZone i16, Daylight u8, pad u8, all little-endian.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub struct EfiTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub nanosecond: u32,
    pub time_zone: i16,
    pub daylight: u8,
}

impl EfiTime {
    pub const SIZE: usize = 16;

    /// The current UTC time, truncated to the second
    pub fn now() -> Self {
        Self::from_datetime(&Utc::now())
    }

    /// Convert a UTC date and time.
    ///
    /// Nanosecond, time zone and daylight fields are left zero, which is
    /// what firmware expects in the timestamp of a time-based
    /// authenticated write.
    pub fn from_datetime(dt: &DateTime<Utc>) -> Self {
        Self {
            // chrono years before 0 or after 65535 cannot come out of a
            // real clock
            year: u16::try_from(dt.year()).unwrap_or_default(),
            month: dt.month() as u8,
            day: dt.day() as u8,
            hour: dt.hour() as u8,
            minute: dt.minute() as u8,
            second: dt.second() as u8,
            nanosecond: 0,
            time_zone: 0,
            daylight: 0,
        }
    }

    /// Parse a `YYYY-MM-DD HH:MM:SS` string, interpreted as UTC
    pub fn parse(text: &str) -> Result<Self, TimeError> {
        let naive =
            NaiveDateTime::parse_from_str(text.trim(), TIMESTAMP_FORMAT)
                .map_err(|_| TimeError::Parse(text.to_string()))?;
        Ok(Self::from_datetime(&naive.and_utc()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TimeError> {
        if bytes.len() < Self::SIZE {
            return Err(TimeError::Length {
                expected: Self::SIZE,
                got: bytes.len(),
            });
        }

        Ok(Self {
            year: LittleEndian::read_u16(&bytes[0..2]),
            month: bytes[2],
            day: bytes[3],
            hour: bytes[4],
            minute: bytes[5],
            second: bytes[6],
            nanosecond: LittleEndian::read_u32(&bytes[8..12]),
            time_zone: LittleEndian::read_i16(&bytes[12..14]),
            daylight: bytes[14],
        })
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut out = [0u8; Self::SIZE];
        LittleEndian::write_u16(&mut out[0..2], self.year);
        out[2] = self.month;
        out[3] = self.day;
        out[4] = self.hour;
        out[5] = self.minute;
        out[6] = self.second;
        LittleEndian::write_u32(&mut out[8..12], self.nanosecond);
        LittleEndian::write_i16(&mut out[12..14], self.time_zone);
        out[14] = self.daylight;
        out
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::default()
    }

    /// Whether this timestamp is strictly later than `other`
    ///
    /// Time zone and daylight fields are not taken into account.
    pub fn is_after(&self, other: &EfiTime) -> bool {
        self.sort_key() > other.sort_key()
    }

    fn sort_key(&self) -> (u16, u8, u8, u8, u8, u8, u32) {
        (
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.nanosecond,
        )
    }
}

const_assert_eq!(EfiTime::SIZE, 16);

impl fmt::Display for EfiTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_layout() {
        let t = EfiTime {
            year: 2024,
            month: 2,
            day: 29,
            hour: 13,
            minute: 45,
            second: 7,
            nanosecond: 0x01020304,
            time_zone: -60,
            daylight: 1,
        };
        let bytes = t.to_bytes();
        assert_eq!(
            bytes,
            [
                0xe8, 0x07, 2, 29, 13, 45, 7, 0, 0x04, 0x03, 0x02, 0x01,
                0xc4, 0xff, 1, 0
            ]
        );
        assert_eq!(EfiTime::from_bytes(&bytes), Ok(t));
    }

    #[test]
    fn test_from_bytes_short() {
        assert_eq!(
            EfiTime::from_bytes(&[0u8; 10]),
            Err(TimeError::Length {
                expected: 16,
                got: 10
            })
        );
    }

    #[test]
    fn test_month_is_one_based() {
        let dt = Utc.with_ymd_and_hms(2025, 1, 31, 23, 59, 58).unwrap(); //#[allow_ci]
        let t = EfiTime::from_datetime(&dt);
        assert_eq!(t.year, 2025);
        assert_eq!(t.month, 1);
        assert_eq!(t.day, 31);
        assert_eq!(t.second, 58);
        assert_eq!(t.nanosecond, 0);
        assert_eq!(t.time_zone, 0);
    }

    #[test]
    fn test_parse() {
        let t = EfiTime::parse("2024-06-01 08:30:00").unwrap(); //#[allow_ci]
        assert_eq!(t.to_string(), "2024-06-01 08:30:00");
        assert!(EfiTime::parse("yesterday").is_err());
        assert!(EfiTime::parse("2024-13-01 00:00:00").is_err());
    }

    #[test]
    fn test_ordering() {
        let earlier = EfiTime::parse("2024-06-01 08:30:00").unwrap(); //#[allow_ci]
        let later = EfiTime::parse("2024-06-01 08:30:01").unwrap(); //#[allow_ci]
        assert!(later.is_after(&earlier));
        assert!(!earlier.is_after(&later));
        assert!(!later.is_after(&later));
        assert!(EfiTime::default().is_zero());
        assert!(!later.is_zero());
    }
}
