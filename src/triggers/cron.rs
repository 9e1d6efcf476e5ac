//! Quartz-style cron trigger.
//!
//! Expressions carry six or seven whitespace-separated fields:
//! `second minute hour day-of-month month day-of-week [year]`, with ranges
//! (`5-9`), lists (`5,7,9`), steps (`*/3`, `10/20`, `mon/3`), wildcards,
//! `?` for the two day fields, named weekdays (`Sun`..`Sat`, `1=Sun`),
//! named months (`Jan`..`Dec`), and the `@yearly`/`@monthly`/`@weekly`/
//! `@daily`/`@hourly` macros. Day-of-month and day-of-week may not both be
//! constrained.
//!
//! Evaluation finds the smallest instant strictly after the previous fire
//! time, on the wall clock of the trigger's location. A wildcard field
//! strictly finer than the finest constrained field is pinned to its
//! minimum, so `* 5 22-23 * * Sun` fires at second 0 of 22:05 and 23:05,
//! not on every second of those minutes.
//! Nonexistent local times in a spring-forward gap are skipped; ambiguous
//! fall-back times resolve to the earlier instant.

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{Trigger, CRON_TRIGGER_TYPE};
use crate::error::{Error, Result};

const MIN_YEAR: u32 = 1970;
const MAX_YEAR: u32 = 2199;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

const MACROS: [(&str, &str); 5] = [
    ("@yearly", "0 0 0 1 1 ?"),
    ("@monthly", "0 0 0 1 * ?"),
    ("@weekly", "0 0 0 ? * 1"),
    ("@daily", "0 0 0 * * ?"),
    ("@hourly", "0 0 * * * ?"),
];

/// A trigger firing on a cron expression, evaluated in a fixed location.
pub struct CronTrigger {
    expression: String,
    location: Tz,
    schedule: CronSchedule,
}

impl CronTrigger {
    /// Parses `expression` and evaluates it in UTC.
    pub fn new(expression: &str) -> Result<Self> {
        Self::with_location(expression, Tz::UTC)
    }

    /// Parses `expression` and evaluates it on the wall clock of `location`.
    pub fn with_location(expression: &str, location: Tz) -> Result<Self> {
        let schedule = CronSchedule::parse(expression)?;
        Ok(Self {
            expression: expression.to_string(),
            location,
            schedule,
        })
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn location(&self) -> Tz {
        self.location
    }
}

#[derive(Serialize, Deserialize)]
struct CronTriggerData {
    expression: String,
    location: Tz,
}

impl Trigger for CronTrigger {
    fn trigger_type(&self) -> &'static str {
        CRON_TRIGGER_TYPE
    }

    fn next_fire_time(&mut self, prev: DateTime<Utc>) -> Result<DateTime<Utc>> {
        self.schedule.next_after(prev, self.location)
    }

    fn serialize(&self) -> Result<String> {
        serde_json::to_string(&CronTriggerData {
            expression: self.expression.clone(),
            location: self.location,
        })
        .map_err(Error::from)
    }
}

pub(super) fn deserialize(data: &str) -> Result<Box<dyn Trigger>> {
    let data: CronTriggerData = serde_json::from_str(data)?;
    Ok(Box::new(CronTrigger::with_location(
        &data.expression,
        data.location,
    )?))
}

/// A parsed expression with every field resolved to its matching values.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CronSchedule {
    seconds: Vec<u32>,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    /// Days 1-31; `None` when the day is governed by the weekday or free.
    days_of_month: Option<Vec<u32>>,
    months: Vec<u32>,
    /// Days since Sunday (0-6); `None` when unconstrained.
    days_of_week: Option<Vec<u32>>,
    /// `None` when the expression has no year field or a wildcard one.
    years: Option<Vec<u32>>,
}

impl CronSchedule {
    fn parse(expression: &str) -> Result<Self> {
        let trimmed = expression.trim();
        let expanded = MACROS
            .iter()
            .find(|(name, _)| trimmed.eq_ignore_ascii_case(name))
            .map(|(_, expr)| *expr)
            .unwrap_or(trimmed);

        let fields: Vec<&str> = expanded.split_whitespace().collect();
        if fields.len() != 6 && fields.len() != 7 {
            return Err(Error::validation(format!(
                "cron expression must have 6 or 7 fields, got {}: '{expression}'",
                fields.len()
            )));
        }

        let mut seconds = parse_field(fields[0], 0, 59, None, false)?;
        let mut minutes = parse_field(fields[1], 0, 59, None, false)?;
        let mut hours = parse_field(fields[2], 0, 23, None, false)?;
        let mut days_of_month = parse_field(fields[3], 1, 31, None, true)?;
        let months = parse_field(fields[4], 1, 12, Some(&MONTH_NAMES), false)?;
        let days_of_week = parse_field(fields[5], 1, 7, Some(&DAY_NAMES), true)?;
        let years = if fields.len() == 7 {
            parse_field(fields[6], MIN_YEAR, MAX_YEAR, None, false)?
        } else {
            None
        };

        if days_of_month.is_some() && days_of_week.is_some() {
            return Err(Error::validation(
                "day-of-month and day-of-week may not both be set; use '?' or '*' for one",
            ));
        }

        // Pin wildcard fields finer than the finest constrained field to
        // their minimum, so "* 5 22-23 * * Sun" fires twice per Sunday
        // rather than on every second of those minutes.
        let day_constrained = days_of_month.is_some() || days_of_week.is_some();
        let finest = [
            seconds.is_some(),
            minutes.is_some(),
            hours.is_some(),
            day_constrained,
            months.is_some(),
            years.is_some(),
        ]
        .iter()
        .position(|set| *set);

        if let Some(finest) = finest {
            if finest > 0 && seconds.is_none() {
                seconds = Some(vec![0]);
            }
            if finest > 1 && minutes.is_none() {
                minutes = Some(vec![0]);
            }
            if finest > 2 && hours.is_none() {
                hours = Some(vec![0]);
            }
            if finest > 3 && !day_constrained {
                days_of_month = Some(vec![1]);
            }
        }

        Ok(CronSchedule {
            seconds: seconds.unwrap_or_else(|| (0..=59).collect()),
            minutes: minutes.unwrap_or_else(|| (0..=59).collect()),
            hours: hours.unwrap_or_else(|| (0..=23).collect()),
            days_of_month,
            months: months.unwrap_or_else(|| (1..=12).collect()),
            days_of_week: days_of_week.map(|days| days.iter().map(|d| d - 1).collect()),
            years,
        })
    }

    /// Smallest instant strictly after `prev` matching the schedule on the
    /// wall clock of `location`.
    fn next_after(&self, prev: DateTime<Utc>, location: Tz) -> Result<DateTime<Utc>> {
        let local = prev.with_timezone(&location);
        let mut candidate = local
            .naive_local()
            .with_nanosecond(0)
            .expect("zero is a valid nanosecond")
            + Duration::seconds(1);

        let max_year = self
            .years
            .as_ref()
            .and_then(|years| years.last().copied())
            .unwrap_or(MAX_YEAR);

        loop {
            if candidate.year() < 0 || candidate.year() as u32 > max_year {
                return Err(Error::TriggerExpired(format!(
                    "cron trigger has no fire times before year {max_year}"
                )));
            }

            if self.date_matches(candidate.date()) {
                if let Some(time) = self.next_time_on(candidate.time()) {
                    let wall = candidate.date().and_time(time);
                    match location.from_local_datetime(&wall) {
                        LocalResult::Single(resolved) => return Ok(resolved.with_timezone(&Utc)),
                        // Fall back repeats a wall-clock hour: fire on the
                        // earlier of the two instants.
                        LocalResult::Ambiguous(earlier, _) => {
                            return Ok(earlier.with_timezone(&Utc))
                        }
                        // Spring forward removed this wall-clock time.
                        LocalResult::None => {
                            candidate = wall + Duration::seconds(1);
                            continue;
                        }
                    }
                }
            }

            candidate = match candidate.date().succ_opt() {
                Some(next_day) => next_day.and_time(NaiveTime::MIN),
                None => {
                    return Err(Error::TriggerExpired(
                        "cron trigger ran out of representable dates".to_string(),
                    ))
                }
            };
        }
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        if let Some(years) = &self.years {
            if !years.contains(&(date.year() as u32)) {
                return false;
            }
        }
        if !self.months.contains(&date.month()) {
            return false;
        }
        if let Some(days_of_week) = &self.days_of_week {
            return days_of_week.contains(&date.weekday().num_days_from_sunday());
        }
        if let Some(days_of_month) = &self.days_of_month {
            return days_of_month.contains(&date.day());
        }
        true
    }

    /// Smallest matching time of day at or after `from`, if today has one.
    fn next_time_on(&self, from: NaiveTime) -> Option<NaiveTime> {
        let (from_hour, from_minute, from_second) = (from.hour(), from.minute(), from.second());

        for &hour in &self.hours {
            if hour < from_hour {
                continue;
            }
            if hour > from_hour {
                return make_time(hour, self.minutes[0], self.seconds[0]);
            }
            for &minute in &self.minutes {
                if minute < from_minute {
                    continue;
                }
                if minute > from_minute {
                    return make_time(hour, minute, self.seconds[0]);
                }
                for &second in &self.seconds {
                    if second < from_second {
                        continue;
                    }
                    return make_time(hour, minute, second);
                }
            }
        }
        None
    }
}

fn make_time(hour: u32, minute: u32, second: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(hour, minute, second)
}

/// Parses a single cron field into its sorted value set.
///
/// Returns `None` for a wildcard (`*`, or `?` where permitted); the caller
/// decides whether that means "every value" or a pinned minimum.
fn parse_field(
    raw: &str,
    min: u32,
    max: u32,
    names: Option<&[&str]>,
    allow_unspecified: bool,
) -> Result<Option<Vec<u32>>> {
    if raw == "*" {
        return Ok(None);
    }
    if raw == "?" {
        if allow_unspecified {
            return Ok(None);
        }
        return Err(Error::validation(format!(
            "'?' is only valid in the day-of-month and day-of-week fields, found '{raw}'"
        )));
    }

    let mut values = BTreeSet::new();
    for part in raw.split(',') {
        if part.is_empty() {
            return Err(Error::validation(format!("empty entry in cron field '{raw}'")));
        }

        let (base, step) = match part.split_once('/') {
            Some((base, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| Error::validation(format!("invalid cron step '{part}'")))?;
                if step == 0 {
                    return Err(Error::validation(format!("cron step must be positive: '{part}'")));
                }
                (base, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = if base == "*" {
            (min, max)
        } else if let Some((low, high)) = base.split_once('-') {
            (
                field_value(low, min, max, names)?,
                field_value(high, min, max, names)?,
            )
        } else {
            let value = field_value(base, min, max, names)?;
            match step {
                // "10/20" means every 20th value starting at 10.
                Some(_) => (value, max),
                None => (value, value),
            }
        };

        if start > end {
            return Err(Error::validation(format!(
                "cron range start exceeds end in '{part}'"
            )));
        }

        let mut value = start;
        while value <= end {
            values.insert(value);
            match value.checked_add(step.unwrap_or(1)) {
                Some(next) => value = next,
                None => break,
            }
        }
    }

    if values.is_empty() {
        return Err(Error::validation(format!("cron field '{raw}' matches no values")));
    }
    Ok(Some(values.into_iter().collect()))
}

fn field_value(raw: &str, min: u32, max: u32, names: Option<&[&str]>) -> Result<u32> {
    let value = match raw.parse::<u32>() {
        Ok(value) => value,
        Err(_) => {
            let lowered = raw.to_ascii_lowercase();
            let index = names
                .and_then(|names| names.iter().position(|name| *name == lowered))
                .ok_or_else(|| Error::validation(format!("invalid cron field value '{raw}'")))?;
            index as u32 + min
        }
    };
    if value < min || value > max {
        return Err(Error::validation(format!(
            "cron field value {value} out of range {min}-{max}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triggers::TriggerRegistry;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn start() -> DateTime<Utc> {
        utc(2019, 4, 15, 18, 0, 0)
    }

    fn iterate(mut prev: DateTime<Utc>, trigger: &mut CronTrigger, iterations: usize) -> DateTime<Utc> {
        for _ in 0..iterations {
            prev = trigger.next_fire_time(prev).unwrap();
        }
        prev
    }

    #[test]
    fn seconds_step_with_day_range() {
        let mut trigger = CronTrigger::new("10/20 15 14 5-10 * ? *").unwrap();
        assert_eq!(
            iterate(start(), &mut trigger, 1000),
            utc(2023, 12, 8, 14, 15, 10)
        );
    }

    #[test]
    fn minute_list_with_hour_range() {
        let mut trigger = CronTrigger::new("* 5,7,9 14-16 * * ? *").unwrap();
        assert_eq!(
            iterate(start(), &mut trigger, 1000),
            utc(2019, 8, 5, 14, 5, 0)
        );
    }

    #[test]
    fn full_wildcard_fires_every_second() {
        let mut trigger = CronTrigger::new("* * * * * ? *").unwrap();
        assert_eq!(
            iterate(start(), &mut trigger, 1000),
            utc(2019, 4, 15, 18, 16, 40)
        );
    }

    #[test]
    fn hour_step_with_weekday_step() {
        let mut trigger = CronTrigger::new("* * 14/2 * * mon/3 *").unwrap();
        assert_eq!(
            iterate(start(), &mut trigger, 1000),
            utc(2021, 3, 15, 18, 0, 0)
        );
    }

    #[test]
    fn minute_range_with_numeric_weekday_range() {
        let mut trigger = CronTrigger::new("* 5-9 14/2 * * 1-3 *").unwrap();
        assert_eq!(
            iterate(start(), &mut trigger, 1000),
            utc(2019, 7, 16, 16, 9, 0)
        );
    }

    #[test]
    fn concrete_day_of_month_and_day_of_week_is_rejected() {
        assert!(CronTrigger::new("0 5,7 14 1 * Sun *").is_err());
    }

    #[test]
    fn dst_transition_preserves_wall_clock() {
        let new_york: Tz = "America/New_York".parse().unwrap();
        let mut trigger = CronTrigger::with_location("* 5 22-23 * * Sun *", new_york).unwrap();

        let prev = new_york
            .with_ymd_and_hms(2019, 4, 15, 18, 0, 0)
            .unwrap()
            .with_timezone(&Utc);

        // Two fires per Sunday (22:05 and 23:05 local), across both the
        // November fall-back and the March spring-forward.
        assert_eq!(
            iterate(prev, &mut trigger, 100),
            utc(2020, 3, 30, 3, 5, 0)
        );
    }

    #[test]
    fn named_and_numeric_weekdays() {
        let days_of_week = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];
        let expected = [
            utc(2019, 4, 21, 0, 0, 0),
            utc(2019, 4, 22, 0, 0, 0),
            utc(2019, 4, 23, 0, 0, 0),
            utc(2019, 4, 24, 0, 0, 0),
            utc(2019, 4, 18, 0, 0, 0),
            utc(2019, 4, 19, 0, 0, 0),
            utc(2019, 4, 20, 0, 0, 0),
        ];
        let prev = utc(2019, 4, 17, 18, 0, 0);

        for (i, day) in days_of_week.iter().enumerate() {
            let mut named = CronTrigger::new(&format!("0 0 0 * * {day}")).unwrap();
            assert_eq!(named.next_fire_time(prev).unwrap(), expected[i], "{day}");

            let mut numeric = CronTrigger::new(&format!("0 0 0 * * {}", i + 1)).unwrap();
            assert_eq!(numeric.next_fire_time(prev).unwrap(), expected[i], "{}", i + 1);
        }
    }

    #[test]
    fn yearly_macro() {
        let mut trigger = CronTrigger::new("@yearly").unwrap();
        assert_eq!(iterate(start(), &mut trigger, 100), utc(2119, 1, 1, 0, 0, 0));
    }

    #[test]
    fn monthly_macro() {
        let mut trigger = CronTrigger::new("@monthly").unwrap();
        assert_eq!(iterate(start(), &mut trigger, 100), utc(2027, 8, 1, 0, 0, 0));
    }

    #[test]
    fn weekly_macro() {
        let mut trigger = CronTrigger::new("@weekly").unwrap();
        assert_eq!(iterate(start(), &mut trigger, 100), utc(2021, 3, 14, 0, 0, 0));
    }

    #[test]
    fn daily_macro() {
        let mut trigger = CronTrigger::new("@daily").unwrap();
        assert_eq!(iterate(start(), &mut trigger, 1000), utc(2022, 1, 9, 0, 0, 0));
    }

    #[test]
    fn hourly_macro() {
        let mut trigger = CronTrigger::new("@hourly").unwrap();
        assert_eq!(
            iterate(start(), &mut trigger, 1000),
            utc(2019, 5, 27, 10, 0, 0)
        );
    }

    #[test]
    fn exhausted_year_field_reports_expiry() {
        let mut trigger = CronTrigger::new("0 0 12 1 1 ? 2018").unwrap();
        assert!(matches!(
            trigger.next_fire_time(start()),
            Err(Error::TriggerExpired(_))
        ));
    }

    #[test]
    fn round_trips_through_the_registry() {
        let registry = TriggerRegistry::new();
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        let trigger = CronTrigger::with_location("0 30 9 * * Mon-Fri", tokyo).unwrap();

        let data = trigger.serialize().unwrap();
        let mut restored = registry.load(CRON_TRIGGER_TYPE, &data).unwrap();

        let mut fresh = CronTrigger::with_location("0 30 9 * * Mon-Fri", tokyo).unwrap();
        let prev = start();
        assert_eq!(
            restored.next_fire_time(prev).unwrap(),
            fresh.next_fire_time(prev).unwrap()
        );
    }

    #[test]
    fn malformed_expressions_are_rejected() {
        for expression in [
            "",
            "* * *",
            "60 * * * * ?",
            "* * 24 * * ?",
            "* * * 0 * ?",
            "* * * * 13 ?",
            "* * * * * 8",
            "* * * * * Mun",
            "? * * * * *",
            "*/0 * * * * ?",
            "9-5 * * * * ?",
        ] {
            assert!(CronTrigger::new(expression).is_err(), "{expression}");
        }
    }
}
