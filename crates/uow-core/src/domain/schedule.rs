//! Recurrence expressions and next-run computation.
//!
//! Grammar (case-insensitive, whitespace-insensitive):
//! - `every [N] second(s)|minute(s)|hour(s)|day(s)|week(s)` (also `sec`, `min`)
//! - `hourly`, `daily`, `weekly`
//! - `at HH:MM [am|pm] [every day]`, `every day at HH:MM`
//! - `every <weekday> at HH:MM`, `on <weekday> at HH:MM`
//!
//! Intervals are aligned to the Unix epoch in UTC, wall-clock times are UTC.
//! `next_after` is a pure function of the expression and the reference time.

use chrono::{DateTime, Datelike, Duration, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::ValidationError;

const SECOND_MS: u64 = 1_000;
const MINUTE_MS: u64 = 60 * SECOND_MS;
const HOUR_MS: u64 = 60 * MINUTE_MS;
const DAY_MS: u64 = 24 * HOUR_MS;
const WEEK_MS: u64 = 7 * DAY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Recurrence {
    Every { period_ms: u64 },
    DailyAt(NaiveTime),
    WeeklyAt(Weekday, NaiveTime),
}

/// A parsed recurrence expression. Serializes as the original text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule {
    expression: String,
    recurrence: Recurrence,
}

impl Schedule {
    pub fn parse(expression: &str) -> Result<Self, ValidationError> {
        let normalized = expression
            .split_whitespace()
            .map(str::to_ascii_lowercase)
            .collect::<Vec<_>>();
        let tokens: Vec<&str> = normalized.iter().map(String::as_str).collect();

        let recurrence = parse_tokens(&tokens)
            .ok_or_else(|| ValidationError::InvalidSchedule(expression.to_string()))?;
        Ok(Self {
            expression: expression.trim().to_string(),
            recurrence,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// The first occurrence strictly after `reference_ms` (epoch ms).
    pub fn next_after(&self, reference_ms: i64) -> i64 {
        match self.recurrence {
            Recurrence::Every { period_ms } => {
                let period = i64::try_from(period_ms).unwrap_or(i64::MAX);
                reference_ms
                    .div_euclid(period)
                    .saturating_add(1)
                    .saturating_mul(period)
            }
            Recurrence::DailyAt(time) => next_wall_clock(reference_ms, time, None),
            Recurrence::WeeklyAt(day, time) => next_wall_clock(reference_ms, time, Some(day)),
        }
    }

    /// The next `count` occurrences after `reference_ms`.
    pub fn upcoming(&self, reference_ms: i64, count: usize) -> Vec<i64> {
        let mut out = Vec::with_capacity(count);
        let mut cursor = reference_ms;
        for _ in 0..count {
            cursor = self.next_after(cursor);
            out.push(cursor);
        }
        out
    }
}

impl FromStr for Schedule {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Schedule {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Schedule> for String {
    fn from(value: Schedule) -> Self {
        value.expression
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

fn parse_tokens(tokens: &[&str]) -> Option<Recurrence> {
    match tokens {
        ["hourly"] => every(1, HOUR_MS),
        ["daily"] => every(1, DAY_MS),
        ["weekly"] => every(1, WEEK_MS),
        ["every", unit] => every(1, unit_ms(unit)?),
        ["every", n, unit] => every(n.parse().ok()?, unit_ms(unit)?),
        ["every", "day", "at", rest @ ..] => Some(Recurrence::DailyAt(parse_time(rest)?)),
        ["every", day, "at", rest @ ..] | ["on", day, "at", rest @ ..] => {
            Some(Recurrence::WeeklyAt(parse_weekday(day)?, parse_time(rest)?))
        }
        ["at", rest @ ..] => {
            let rest = match rest {
                [time @ .., "every", "day"] => time,
                other => other,
            };
            Some(Recurrence::DailyAt(parse_time(rest)?))
        }
        _ => None,
    }
}

fn every(n: u64, unit_ms: u64) -> Option<Recurrence> {
    if n == 0 {
        return None;
    }
    Some(Recurrence::Every {
        period_ms: n.checked_mul(unit_ms)?,
    })
}

fn unit_ms(unit: &str) -> Option<u64> {
    let ms = match unit {
        "second" | "seconds" | "sec" | "secs" => SECOND_MS,
        "minute" | "minutes" | "min" | "mins" => MINUTE_MS,
        "hour" | "hours" => HOUR_MS,
        "day" | "days" => DAY_MS,
        "week" | "weeks" => WEEK_MS,
        _ => return None,
    };
    Some(ms)
}

fn parse_weekday(day: &str) -> Option<Weekday> {
    let weekday = match day {
        "mon" | "monday" | "mondays" => Weekday::Mon,
        "tue" | "tues" | "tuesday" | "tuesdays" => Weekday::Tue,
        "wed" | "weds" | "wednesday" | "wednesdays" => Weekday::Wed,
        "thu" | "thur" | "thurs" | "thursday" | "thursdays" => Weekday::Thu,
        "fri" | "friday" | "fridays" => Weekday::Fri,
        "sat" | "saturday" | "saturdays" => Weekday::Sat,
        "sun" | "sunday" | "sundays" => Weekday::Sun,
        _ => return None,
    };
    Some(weekday)
}

/// `10:15`, `10:15 am`, `10:15pm`, `7 pm`.
fn parse_time(tokens: &[&str]) -> Option<NaiveTime> {
    let joined = tokens.concat();
    let (clock, meridiem) = if let Some(c) = joined.strip_suffix("am") {
        (c, Some(false))
    } else if let Some(c) = joined.strip_suffix("pm") {
        (c, Some(true))
    } else {
        (joined.as_str(), None)
    };

    let (hour, minute) = match clock.split_once(':') {
        Some((h, m)) => (h.parse::<u32>().ok()?, m.parse::<u32>().ok()?),
        None => (clock.parse::<u32>().ok()?, 0),
    };

    let hour = match meridiem {
        None => hour,
        Some(_) if hour == 0 || hour > 12 => return None,
        Some(false) => hour % 12,
        Some(true) => hour % 12 + 12,
    };
    NaiveTime::from_hms_opt(hour, minute, 0)
}

fn next_wall_clock(reference_ms: i64, time: NaiveTime, weekday: Option<Weekday>) -> i64 {
    let Some(reference) = DateTime::from_timestamp_millis(reference_ms) else {
        return reference_ms.saturating_add(1);
    };
    let date = reference.date_naive();
    let (offset_days, step_days) = match weekday {
        Some(day) => {
            let ahead = i64::from(day.num_days_from_monday())
                - i64::from(date.weekday().num_days_from_monday());
            (ahead.rem_euclid(7), 7)
        }
        None => (0, 1),
    };

    let mut candidate = (date + Duration::days(offset_days)).and_time(time).and_utc();
    if candidate.timestamp_millis() <= reference_ms {
        candidate += Duration::days(step_days);
    }
    candidate.timestamp_millis()
}
