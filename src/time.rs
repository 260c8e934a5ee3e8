//! Reconstruction of FAA partial timestamps.
//!
//! The wire rarely carries a complete instant. Text products use
//! `ddhhmm`/`ddhh` strings, APDU headers carry at best month+day+hour+minute
//! and sometimes only hour+minute, and report years come as one or two
//! digits. Everything here lifts those fragments to absolute UTC instants
//! using an anchor (normally the packet receive time) and a
//! nearest-candidate search across the unit wraparound.

use chrono::{
    DateTime,
    Datelike,
    Days,
    NaiveDate,
    TimeZone,
    Utc,
};

#[derive(Clone, Debug, thiserror::Error)]
pub enum TimeError {
    #[error("time string too short: {input:?}")]
    TooShort { input: String },

    #[error("non-numeric time field: {input:?}")]
    NotNumeric { input: String },

    #[error("no day {day} within 10 days of {anchor}")]
    DayOutOfRange { day: u32, anchor: NaiveDate },

    #[error("invalid calendar date {year}-{month:02}-{day:02}")]
    InvalidDate { year: i32, month: u32, day: u32 },

    #[error("invalid time of day {hour:02}:{minute:02}")]
    InvalidTimeOfDay { hour: u32, minute: u32 },
}

fn field(input: &str, range: std::ops::Range<usize>) -> Result<u32, TimeError> {
    let slice = input.get(range).ok_or_else(|| {
        TimeError::TooShort {
            input: input.to_owned(),
        }
    })?;
    slice.parse().map_err(|_| {
        TimeError::NotNumeric {
            input: input.to_owned(),
        }
    })
}

fn instant(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> Result<DateTime<Utc>, TimeError> {
    // Forecast end times use hour 24 for midnight of the next day.
    let (date, hour) = if hour == 24 {
        let date = NaiveDate::from_ymd_opt(year, month, day)
            .ok_or(TimeError::InvalidDate { year, month, day })?;
        (
            date.checked_add_days(Days::new(1))
                .ok_or(TimeError::InvalidDate { year, month, day })?,
            0,
        )
    }
    else {
        (
            NaiveDate::from_ymd_opt(year, month, day)
                .ok_or(TimeError::InvalidDate { year, month, day })?,
            hour,
        )
    };

    let time = date
        .and_hms_opt(hour, minute, 0)
        .ok_or(TimeError::InvalidTimeOfDay { hour, minute })?;
    Ok(Utc.from_utc_datetime(&time))
}

/// Lift an FAA `ddhhmm` (or forecast-style `ddhh`) string to an instant
/// near the anchor.
///
/// Searches outward one day at a time, up to 10 days in both directions,
/// for a date whose day-of-month matches. Calendar arithmetic takes care of
/// month and year boundaries.
pub fn day_hour_min(anchor: DateTime<Utc>, faa: &str) -> Result<DateTime<Utc>, TimeError> {
    let day = field(faa, 0..2)?;
    let hour = field(faa, 2..4)?;
    let minute = if faa.len() >= 6 { field(faa, 4..6)? } else { 0 };

    let anchor_date = anchor.date_naive();
    if anchor_date.day() == day {
        return instant(anchor_date.year(), anchor_date.month(), day, hour, minute);
    }

    let mut forward = anchor_date;
    let mut backward = anchor_date;
    for _ in 0..10 {
        forward = forward
            .checked_add_days(Days::new(1))
            .ok_or(TimeError::DayOutOfRange { day, anchor: anchor_date })?;
        if forward.day() == day {
            return instant(forward.year(), forward.month(), day, hour, minute);
        }

        backward = backward
            .checked_sub_days(Days::new(1))
            .ok_or(TimeError::DayOutOfRange { day, anchor: anchor_date })?;
        if backward.day() == day {
            return instant(backward.year(), backward.month(), day, hour, minute);
        }
    }

    Err(TimeError::DayOutOfRange {
        day,
        anchor: anchor_date,
    })
}

/// Complete a month+day+hour+minute fragment by choosing the year
/// (anchor−1, anchor, anchor+1) that lands closest to the anchor. Used for
/// APDU applicability times around new year.
pub fn referenced_month_day(
    anchor: DateTime<Utc>,
    month: u32,
    day: u32,
    hour: u32,
    minute: u32,
) -> Result<DateTime<Utc>, TimeError> {
    let anchor_year = anchor.year();

    let mut best: Option<DateTime<Utc>> = None;
    for year in [anchor_year - 1, anchor_year, anchor_year + 1] {
        // Feb 29 can fail to exist in a neighboring year. Skip those
        // candidates rather than failing the fragment.
        let Ok(candidate) = instant(year, month, day, hour, minute)
        else {
            continue;
        };

        let replace = match best {
            None => true,
            Some(current) => {
                (candidate - anchor).abs() < (current - anchor).abs()
            }
        };
        if replace {
            best = Some(candidate);
        }
    }

    best.ok_or(TimeError::InvalidDate {
        year: anchor_year,
        month,
        day,
    })
}

/// Complete a bare hour+minute against the anchor by trying the anchor's
/// day and its two neighbors, keeping the closest. Ties between past and
/// future are broken by `favor_past` (observations look back, product
/// availability looks back too; forecasts look forward).
pub fn from_hour_minute(
    anchor: DateTime<Utc>,
    hour: u32,
    minute: u32,
    favor_past: bool,
) -> Result<DateTime<Utc>, TimeError> {
    let date = anchor.date_naive();
    let same_day = instant(date.year(), date.month(), date.day(), hour, minute)?;
    let next_day = same_day + chrono::Duration::days(1);
    let prev_day = same_day - chrono::Duration::days(1);

    let d_same = (same_day - anchor).abs();
    let d_next = (next_day - anchor).abs();
    let d_prev = (prev_day - anchor).abs();

    let mut winner = same_day;
    let minimum = d_same.min(d_next).min(d_prev);
    if minimum == d_next {
        winner = next_day;
    }
    else if minimum == d_prev {
        winner = prev_day;
    }

    if winner != same_day && d_next == d_prev {
        winner = if favor_past { prev_day } else { next_day };
    }

    Ok(winner)
}

/// Expand an FAA single-digit year. Values up to 4 years ahead of the
/// current year read as future, the rest as past.
pub fn single_digit_year(current_year: i32, digit: u32) -> i32 {
    let current_digit = current_year.rem_euclid(10);
    let diff = digit as i32 - current_digit;

    if (0..5).contains(&diff) {
        current_year + diff
    }
    else if diff <= -6 {
        current_year + diff + 10
    }
    else if diff < 0 {
        current_year + diff
    }
    else {
        current_year - (10 - diff)
    }
}

/// Expand an FAA double-digit year. Values up to 49 years ahead read as
/// future, the rest as past.
pub fn double_digit_year(current_year: i32, value: u32) -> i32 {
    let current_digits = current_year.rem_euclid(100);
    let diff = value as i32 - current_digits;

    if (0..50).contains(&diff) {
        current_year + diff
    }
    else if diff <= -60 {
        current_year + diff + 100
    }
    else if diff < 0 {
        current_year + diff
    }
    else {
        current_year - (100 - diff)
    }
}

/// Parse a NOTAM `yymmddhhmm` activity time.
pub fn notam_time(current_year: i32, faa: &str) -> Result<DateTime<Utc>, TimeError> {
    let year = double_digit_year(current_year, field(faa, 0..2)?);
    let month = field(faa, 2..4)?;
    let day = field(faa, 4..6)?;
    let hour = field(faa, 6..8)?;
    let minute = field(faa, 8..10)?;

    instant(year, month, day, hour, minute)
}

#[cfg(test)]
mod tests {
    use chrono::{
        TimeZone,
        Utc,
    };

    use crate::time::{
        day_hour_min,
        double_digit_year,
        from_hour_minute,
        notam_time,
        referenced_month_day,
        single_digit_year,
    };

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn it_resolves_a_same_day_observation() {
        let anchor = utc(2021, 5, 14, 7, 18);
        assert_eq!(day_hour_min(anchor, "140715").unwrap(), utc(2021, 5, 14, 7, 15));
    }

    #[test]
    fn it_resolves_across_a_month_boundary() {
        let anchor = utc(2021, 6, 1, 0, 10);
        assert_eq!(day_hour_min(anchor, "312350").unwrap(), utc(2021, 5, 31, 23, 50));
    }

    #[test]
    fn it_resolves_across_a_year_boundary() {
        let anchor = utc(2022, 1, 1, 0, 5);
        assert_eq!(day_hour_min(anchor, "312358").unwrap(), utc(2021, 12, 31, 23, 58));
    }

    #[test]
    fn it_rolls_hour_24_to_the_next_day() {
        let anchor = utc(2021, 5, 14, 7, 18);
        assert_eq!(day_hour_min(anchor, "1424").unwrap(), utc(2021, 5, 15, 0, 0));
    }

    #[test]
    fn it_rejects_days_too_far_out() {
        let anchor = utc(2021, 5, 15, 0, 0);
        assert!(day_hour_min(anchor, "290000").is_err());
    }

    #[test]
    fn it_picks_the_year_nearest_the_reference() {
        let anchor = utc(2022, 1, 2, 1, 0);
        let resolved = referenced_month_day(anchor, 12, 30, 18, 0).unwrap();
        assert_eq!(resolved, utc(2021, 12, 30, 18, 0));

        let anchor = utc(2021, 12, 30, 23, 0);
        let resolved = referenced_month_day(anchor, 1, 2, 6, 0).unwrap();
        assert_eq!(resolved, utc(2022, 1, 2, 6, 0));
    }

    #[test]
    fn it_picks_the_nearest_day_for_bare_hours() {
        let anchor = utc(2021, 5, 14, 0, 10);
        assert_eq!(
            from_hour_minute(anchor, 23, 50, true).unwrap(),
            utc(2021, 5, 13, 23, 50)
        );
        assert_eq!(
            from_hour_minute(anchor, 0, 30, true).unwrap(),
            utc(2021, 5, 14, 0, 30)
        );
    }

    #[test]
    fn it_breaks_hour_ties_toward_the_past_when_asked() {
        let anchor = utc(2021, 5, 14, 12, 0);
        assert_eq!(
            from_hour_minute(anchor, 0, 0, true).unwrap(),
            utc(2021, 5, 14, 0, 0)
        );
    }

    #[test]
    fn it_expands_short_years() {
        assert_eq!(single_digit_year(2019, 9), 2019);
        assert_eq!(single_digit_year(2019, 6), 2016);
        assert_eq!(single_digit_year(2019, 1), 2021);

        assert_eq!(double_digit_year(2019, 19), 2019);
        assert_eq!(double_digit_year(2019, 10), 2010);
        assert_eq!(double_digit_year(2019, 30), 2030);
        assert_eq!(double_digit_year(2099, 2), 2102);
    }

    #[test]
    fn it_parses_notam_times() {
        assert_eq!(
            notam_time(2020, "2009211945").unwrap(),
            utc(2020, 9, 21, 19, 45)
        );
    }
}
