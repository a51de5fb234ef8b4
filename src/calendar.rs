//! Process-wide calendar table.
//!
//! Converts compact day numbers (days since the unix epoch, the payload of
//! `Date32` columns) to unix seconds and to the month/day projections used by
//! legacy part names. The table is immutable after process init and shared by
//! every writer invocation.

use chrono::{Datelike, Days, NaiveDate};
use once_cell::sync::Lazy;

/// Shared calendar instance.
pub(crate) static CALENDAR: Lazy<Calendar> = Lazy::new(Calendar::new);

/// Calendar math over day numbers relative to the unix epoch.
pub struct Calendar {
    epoch: NaiveDate,
}

impl Calendar {
    fn new() -> Self {
        Self {
            epoch: NaiveDate::from_ymd_opt(1970, 1, 1).expect("unix epoch is a valid date"),
        }
    }

    fn date(&self, day_num: i32) -> NaiveDate {
        if day_num >= 0 {
            self.epoch + Days::new(day_num as u64)
        } else {
            self.epoch - Days::new(day_num.unsigned_abs() as u64)
        }
    }

    /// Midnight of the given day, in unix seconds.
    pub fn from_day_num(&self, day_num: i32) -> i64 {
        self.date(day_num)
            .and_hms_opt(0, 0, 0)
            .expect("midnight is a valid time")
            .and_utc()
            .timestamp()
    }

    /// `YYYYMM` projection of a day number.
    pub fn to_num_yyyymm(&self, day_num: i32) -> u32 {
        let date = self.date(day_num);
        date.year() as u32 * 100 + date.month()
    }

    /// `YYYYMMDD` projection of a day number.
    pub fn to_num_yyyymmdd(&self, day_num: i32) -> u32 {
        let date = self.date(day_num);
        date.year() as u32 * 10000 + date.month() * 100 + date.day()
    }
}

#[cfg(test)]
mod tests {
    use super::CALENDAR;

    #[test]
    fn epoch_day_projections() {
        assert_eq!(CALENDAR.from_day_num(0), 0);
        assert_eq!(CALENDAR.to_num_yyyymm(0), 197001);
        assert_eq!(CALENDAR.to_num_yyyymmdd(0), 19700101);
    }

    #[test]
    fn leap_and_month_boundaries() {
        // 2024-01-31 is day 19753, 2024-02-01 is day 19754.
        assert_eq!(CALENDAR.to_num_yyyymmdd(19753), 20240131);
        assert_eq!(CALENDAR.to_num_yyyymmdd(19754), 20240201);
        assert_ne!(CALENDAR.to_num_yyyymm(19753), CALENDAR.to_num_yyyymm(19754));
        assert_eq!(CALENDAR.from_day_num(19754), 19754 * 86400);
    }
}
