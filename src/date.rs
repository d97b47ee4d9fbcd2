//! Date encodings used in module NVMEM.
//!
//! Calibration dates are stored as nine ASCII digits `YYWWDHHMM`, production dates as four digits
//! `YWWD`. Weeks are counted from the first Sunday of the year like `strftime("%U")` and weekdays
//! start at Sunday. Both are stored one-based, so week 0 is written as `01` and Sunday as `1`.

use chrono::{Datelike, Days, NaiveDate, NaiveDateTime, Timelike};

pub(crate) const CAL_DATE_LENGTH: usize = 9;
pub(crate) const PRODUCTION_DATE_LENGTH: usize = 4;

/// Drops seconds and everything below, the resolution of a stored calibration date.
pub fn truncate_to_minute(timestamp: NaiveDateTime) -> NaiveDateTime {
    timestamp
        .with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .unwrap_or(timestamp)
}

/// Zero-based week of the year, weeks starting on Sunday. Days before the first Sunday are week 0.
pub(crate) fn week_from_sunday(date: NaiveDate) -> u32 {
    (date.ordinal0() + 7 - date.weekday().num_days_from_sunday()) / 7
}

/// Key used to decide whether two calibrations were written in the same calendar week.
pub(crate) fn calendar_week(timestamp: NaiveDateTime) -> (i32, u32) {
    (timestamp.year(), week_from_sunday(timestamp.date()))
}

pub fn encode_cal_date(timestamp: NaiveDateTime) -> [u8; CAL_DATE_LENGTH] {
    let date = timestamp.date();
    let fields = [
        (timestamp.year().rem_euclid(100) as u32, 2),
        (week_from_sunday(date) + 1, 2),
        (date.weekday().num_days_from_sunday() + 1, 1),
        (timestamp.hour(), 2),
        (timestamp.minute(), 2),
    ];

    let mut raw = [b'0'; CAL_DATE_LENGTH];
    let mut pos = 0;
    for (value, width) in fields {
        let mut value = value;
        for i in (0..width).rev() {
            raw[pos + i] = b'0' + (value % 10) as u8;
            value /= 10;
        }
        pos += width;
    }
    raw
}

/// Returns `None` for anything that is not a valid date, including erased (all ones) fields.
pub fn decode_cal_date(raw: &[u8]) -> Option<NaiveDateTime> {
    if raw.len() != CAL_DATE_LENGTH {
        return None;
    }

    let year = 2000 + digits(&raw[0..2])? as i32;
    let week = digits(&raw[2..4])?.checked_sub(1)?;
    let weekday = digits(&raw[4..5])?.checked_sub(1)?;
    let hour = digits(&raw[5..7])?;
    let minute = digits(&raw[7..9])?;

    date_from_week(year, week, weekday)?.and_hms_opt(hour, minute, 0)
}

/// The production date only carries the last digit of the year. It is placed in the current
/// decade unless that would be in the future.
pub fn decode_production_date(raw: &[u8], now: NaiveDateTime) -> Option<NaiveDate> {
    if raw.len() != PRODUCTION_DATE_LENGTH {
        return None;
    }

    let year_digit = digits(&raw[0..1])? as i32;
    let week = digits(&raw[1..3])?.checked_sub(1)?;
    let weekday = digits(&raw[3..4])?.checked_sub(1)?;

    let decade = now.year() - now.year().rem_euclid(10);
    let date = date_from_week(decade + year_digit, week, weekday)?;
    if date > now.date() {
        date_from_week(decade - 10 + year_digit, week, weekday)
    } else {
        Some(date)
    }
}

fn digits(raw: &[u8]) -> Option<u32> {
    raw.iter().try_fold(0u32, |acc, &c| {
        c.is_ascii_digit().then(|| acc * 10 + (c - b'0') as u32)
    })
}

/// Inverse of [`week_from_sunday`]. Days of week 0 before January 1st fall into the previous year.
fn date_from_week(year: i32, week: u32, weekday: u32) -> Option<NaiveDate> {
    if week > 53 || weekday > 6 {
        return None;
    }

    let jan1 = NaiveDate::from_yo_opt(year, 1)?;
    let first = jan1.weekday().num_days_from_sunday() as i64;
    let week0_length = (7 - first) % 7;
    let day = if week == 0 {
        weekday as i64 - first
    } else {
        week0_length + 7 * (week as i64 - 1) + weekday as i64
    };

    if day >= 0 {
        jan1.checked_add_days(Days::new(day as u64))
    } else {
        jan1.checked_sub_days(Days::new(day.unsigned_abs()))
    }
}
