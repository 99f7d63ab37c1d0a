//! Creation dates stored in directory entries.
//!
//! Entries carry a day, a month and a year offset from 1900, one byte each.
//! The current date comes from the host clock, converted from the Unix
//! timestamp in UTC.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Calendar date as stored on disk
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Date {
    pub day: u8,
    pub month: u8,
    /// Years since 1900
    pub year: u8,
}

impl Date {
    pub const fn new(day: u8, month: u8, year: u8) -> Self {
        Self { day, month, year }
    }

    /// Today's date according to the host clock.
    pub fn today() -> Self {
        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self::from_unix(timestamp)
    }

    /// Convert a Unix timestamp (seconds, UTC) to a date.
    pub fn from_unix(timestamp: u64) -> Self {
        let mut days = (timestamp / 86400) as i64;

        let mut year = 1970i32;
        loop {
            let days_in_year = if is_leap_year(year) { 366 } else { 365 };
            if days < days_in_year {
                break;
            }
            days -= days_in_year;
            year += 1;
        }

        let days_in_months: [i64; 12] = if is_leap_year(year) {
            [31, 29, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
        } else {
            [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31]
        };

        let mut month = 12u8;
        for (i, &dim) in days_in_months.iter().enumerate() {
            if days < dim {
                month = (i + 1) as u8;
                break;
            }
            days -= dim;
        }

        // The on-disk year is a single byte
        let year = (year - 1900).clamp(0, u8::MAX as i32) as u8;

        Self {
            day: (days + 1) as u8,
            month,
            year,
        }
    }

    /// Full four-digit year.
    pub fn full_year(&self) -> u16 {
        1900 + self.year as u16
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}-{:02}-{:04}", self.day, self.month, self.full_year())
    }
}

fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}
