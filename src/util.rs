//! Wall-clock bucketing and scheduling helpers.
//!
//! Everything here operates on UTC. The only non-UTC code in the crate is
//! [`format_beijing`], which is a presentation projection and never feeds
//! back into storage.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Timelike, Utc};

/// Truncate a timestamp down to the start of its hour.
pub fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp() - t.timestamp().rem_euclid(3600);
    DateTime::from_timestamp(secs, 0).unwrap_or(t)
}

/// Truncate a timestamp down to 00:00 UTC of its day.
pub fn truncate_to_day(t: DateTime<Utc>) -> DateTime<Utc> {
    let secs = t.timestamp() - t.timestamp().rem_euclid(86_400);
    DateTime::from_timestamp(secs, 0).unwrap_or(t)
}

/// Truncate a timestamp down to 00:00 UTC of the first day of its month.
pub fn truncate_to_month(t: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(t.year(), t.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(t)
}

/// Start of the month preceding the one containing `t`.
pub fn previous_month_start(t: DateTime<Utc>) -> DateTime<Utc> {
    let (year, month) = if t.month() == 1 {
        (t.year() - 1, 12)
    } else {
        (t.year(), t.month() - 1)
    };
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0)
        .single()
        .unwrap_or(t)
}

/// `t` minus `months` calendar months, clamping the day-of-month to the
/// target month's length (e.g. Mar 31 minus one month lands on Feb 28/29).
pub fn months_back(t: DateTime<Utc>, months: u32) -> DateTime<Utc> {
    let total = t.year() * 12 + t.month0() as i32 - months as i32;
    let year = total.div_euclid(12);
    let month = total.rem_euclid(12) as u32 + 1;
    let day = t.day().min(days_in_month(year, month));

    Utc.with_ymd_and_hms(year, month, day, t.hour(), t.minute(), t.second())
        .single()
        .unwrap_or(t)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|d| d.pred_opt())
        .map(|d| d.day())
        .unwrap_or(28)
}

/// The next instant strictly after `now` that is aligned to a multiple of
/// `interval` since the Unix epoch.
pub fn align_to_next(now: DateTime<Utc>, interval: Duration) -> DateTime<Utc> {
    let step = interval.num_milliseconds().max(1);
    let ms = now.timestamp_millis();
    let next = (ms.div_euclid(step) + 1) * step;
    DateTime::from_timestamp_millis(next).unwrap_or(now + interval)
}

/// The next 02:00 UTC at or after `now` (today if still ahead, else tomorrow).
pub fn next_daily_at_two_utc(now: DateTime<Utc>) -> DateTime<Utc> {
    let today_two = truncate_to_day(now) + Duration::hours(2);
    if today_two > now {
        today_two
    } else {
        today_two + Duration::days(1)
    }
}

/// Render a stored UTC timestamp in Beijing local time (UTC+8).
///
/// Display-only companion formatting; canonical values stay RFC3339 UTC.
pub fn format_beijing(t: DateTime<Utc>) -> String {
    let beijing = FixedOffset::east_opt(8 * 3600).expect("fixed offset in range");
    t.with_timezone(&beijing)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}
