//! Cron - 5 フィールドの cron 式: `MIN HOUR DOM MON DOW`
//!
//! Each field accepts `*`, `N`, `A-B`, `*/S`, `A-B/S`, `N/S` and comma lists
//! of those. Months and weekdays also accept three-letter names (`jan`,
//! `mon`). Weekday `0` and `7` both mean Sunday. The usual macros
//! (`@hourly`, `@daily`, `@weekly`, `@monthly`, `@yearly`) are expanded
//! before parsing.
//!
//! When both day-of-month and day-of-week are restricted a day matches if
//! *either* does, as in classic cron.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;

/// Days searched by `next_after` before giving up (five years).
const SEARCH_HORIZON_DAYS: i64 = 5 * 366;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    #[error("expected 5 fields (MIN HOUR DOM MON DOW), got {0}")]
    FieldCount(usize),

    #[error("unknown macro {0:?}")]
    UnknownMacro(String),

    #[error("invalid {field} field: {value:?}")]
    Malformed { field: &'static str, value: String },

    #[error("{field} value {value} outside {min}-{max}")]
    OutOfRange {
        field: &'static str,
        value: u32,
        min: u32,
        max: u32,
    },

    #[error("{field} step must be positive")]
    ZeroStep { field: &'static str },
}

#[derive(Debug, Clone, Copy)]
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
}

const MINUTE: FieldSpec = FieldSpec { name: "minute", min: 0, max: 59, names: &[] };
const HOUR: FieldSpec = FieldSpec { name: "hour", min: 0, max: 23, names: &[] };
const DAY_OF_MONTH: FieldSpec = FieldSpec { name: "day-of-month", min: 1, max: 31, names: &[] };
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: &["jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec"],
};
const DAY_OF_WEEK: FieldSpec = FieldSpec {
    name: "day-of-week",
    min: 0,
    max: 7,
    names: &["sun", "mon", "tue", "wed", "thu", "fri", "sat"],
};

/// A parsed schedule. Each field is a bitmask of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    source: String,
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self, CronError> {
        let trimmed = expression.trim();
        let expanded = if trimmed.starts_with('@') {
            expand_macro(trimmed)?
        } else {
            trimmed
        };

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = fields[..] else {
            return Err(CronError::FieldCount(fields.len()));
        };

        let mut days_of_week = parse_field(dow, DAY_OF_WEEK)?;
        // 7 is an alias for Sunday.
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            source: trimmed.to_string(),
            minutes: parse_field(minute, MINUTE)?,
            hours: parse_field(hour, HOUR)?,
            days_of_month: parse_field(dom, DAY_OF_MONTH)?,
            months: parse_field(month, MONTH)?,
            days_of_week,
            dom_restricted: !dom.starts_with('*'),
            dow_restricted: !dow.starts_with('*'),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// First whole minute strictly after `after` that matches, or `None` if
    /// nothing matches within five years (e.g. `0 0 31 2 *`).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let start = after.with_second(0)?.with_nanosecond(0)? + Duration::minutes(1);
        let first_day = start.date_naive();
        let first_minute = start.hour() * 60 + start.minute();

        for offset in 0..=SEARCH_HORIZON_DAYS {
            let day = first_day.checked_add_signed(Duration::days(offset))?;
            if !self.matches_day(day) {
                continue;
            }
            let floor = if offset == 0 { first_minute } else { 0 };
            if let Some((hour, minute)) = self.first_time_from(floor) {
                return day.and_hms_opt(hour, minute, 0).map(|t| t.and_utc());
            }
        }
        None
    }

    fn matches_day(&self, day: NaiveDate) -> bool {
        if !has(self.months, day.month()) {
            return false;
        }
        let dom = has(self.days_of_month, day.day());
        let dow = has(self.days_of_week, day.weekday().num_days_from_sunday());
        if self.dom_restricted && self.dow_restricted {
            dom || dow
        } else {
            dom && dow
        }
    }

    /// Earliest allowed `(hour, minute)` at or after minute-of-day `floor`.
    fn first_time_from(&self, floor: u32) -> Option<(u32, u32)> {
        (floor / 60..24)
            .filter(|hour| has(self.hours, *hour))
            .find_map(|hour| {
                let from = if hour == floor / 60 { floor % 60 } else { 0 };
                (from..60)
                    .find(|minute| has(self.minutes, *minute))
                    .map(|minute| (hour, minute))
            })
    }
}

impl FromStr for CronSchedule {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

fn has(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn expand_macro(name: &str) -> Result<&'static str, CronError> {
    match name.to_ascii_lowercase().as_str() {
        "@yearly" | "@annually" => Ok("0 0 1 1 *"),
        "@monthly" => Ok("0 0 1 * *"),
        "@weekly" => Ok("0 0 * * 0"),
        "@daily" | "@midnight" => Ok("0 0 * * *"),
        "@hourly" => Ok("0 * * * *"),
        _ => Err(CronError::UnknownMacro(name.to_string())),
    }
}

fn parse_field(raw: &str, spec: FieldSpec) -> Result<u64, CronError> {
    let mut mask = 0u64;
    for item in raw.split(',') {
        mask |= parse_item(item, spec)?;
    }
    Ok(mask)
}

fn parse_item(item: &str, spec: FieldSpec) -> Result<u64, CronError> {
    let malformed = || CronError::Malformed {
        field: spec.name,
        value: item.to_string(),
    };

    let (range, step) = match item.split_once('/') {
        Some((range, step)) => {
            let step: u32 = step.parse().map_err(|_| malformed())?;
            if step == 0 {
                return Err(CronError::ZeroStep { field: spec.name });
            }
            (range, Some(step))
        }
        None => (item, None),
    };

    let (low, high) = if range == "*" {
        (spec.min, spec.max)
    } else if let Some((a, b)) = range.split_once('-') {
        (parse_value(a, spec)?, parse_value(b, spec)?)
    } else {
        let value = parse_value(range, spec)?;
        // `N/S` runs from N to the end of the field.
        (value, if step.is_some() { spec.max } else { value })
    };
    if low > high {
        return Err(malformed());
    }

    let step = step.unwrap_or(1) as usize;
    Ok((low..=high).step_by(step).fold(0, |mask, v| mask | (1u64 << v)))
}

fn parse_value(raw: &str, spec: FieldSpec) -> Result<u32, CronError> {
    let value = match raw.parse::<u32>() {
        Ok(value) => value,
        Err(_) => {
            let lower = raw.to_ascii_lowercase();
            let index = spec
                .names
                .iter()
                .position(|name| *name == lower)
                .ok_or_else(|| CronError::Malformed {
                    field: spec.name,
                    value: raw.to_string(),
                })?;
            // Names start at the field minimum: jan=1, sun=0.
            index as u32 + spec.min
        }
    };
    if value < spec.min || value > spec.max {
        return Err(CronError::OutOfRange {
            field: spec.name,
            value,
            min: spec.min,
            max: spec.max,
        });
    }
    Ok(value)
}
