//! Cron Translator: turns a schedule's kind and anchor time into a concrete
//! cron trigger, a readable description, and next-occurrence lookups.
//!
//! Expressions use the six-field grammar of the `cron` crate
//! (`sec min hour day-of-month month day-of-week`). Five-field custom
//! expressions are read as classic cron: they get a leading `0` seconds
//! field and their numeric weekdays (0 or 7 = Sunday) become names.

use std::str::FromStr;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};

use crate::error::{Result, SchedulerError};
use crate::types::{ScheduleKind, ScheduleRecord, TriggerInfo};

/// A schedule definition resolved into the calendar fields it fires on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleSpec {
    Daily { hour: u32, minute: u32 },
    Weekly { weekday: Weekday, hour: u32, minute: u32 },
    /// Months without `day` are skipped, never shifted to a nearby day.
    Monthly { day: u32, hour: u32, minute: u32 },
    Custom { expression: String },
}

impl ScheduleSpec {
    /// Resolve a spec from raw parts. `kind` is parsed here so that unknown
    /// values from the store surface as [`SchedulerError::InvalidSchedule`].
    pub fn from_parts(
        kind: &str,
        anchor: DateTime<Utc>,
        custom_expression: Option<&str>,
    ) -> Result<Self> {
        let kind = ScheduleKind::from_str(kind)?;
        let (hour, minute) = (anchor.hour(), anchor.minute());

        let spec = match kind {
            ScheduleKind::Daily => ScheduleSpec::Daily { hour, minute },
            ScheduleKind::Weekly => ScheduleSpec::Weekly {
                weekday: anchor.weekday(),
                hour,
                minute,
            },
            ScheduleKind::Monthly => ScheduleSpec::Monthly {
                day: anchor.day(),
                hour,
                minute,
            },
            ScheduleKind::Custom => {
                let expression = custom_expression
                    .map(str::trim)
                    .filter(|e| !e.is_empty())
                    .ok_or_else(|| {
                        SchedulerError::InvalidSchedule(
                            "custom schedule requires a cron expression".to_string(),
                        )
                    })?;
                ScheduleSpec::Custom {
                    expression: expression.to_string(),
                }
            }
        };
        Ok(spec)
    }

    pub fn from_record(record: &ScheduleRecord) -> Result<Self> {
        Self::from_parts(
            &record.schedule_kind,
            record.anchor_time,
            record.custom_expression.as_deref(),
        )
    }

    /// The six-field expression handed to the timer.
    pub fn expression(&self) -> Result<String> {
        match self {
            ScheduleSpec::Daily { hour, minute } => Ok(format!("0 {minute} {hour} * * *")),
            ScheduleSpec::Weekly {
                weekday,
                hour,
                minute,
            } => Ok(format!("0 {minute} {hour} * * {}", cron_weekday(*weekday))),
            ScheduleSpec::Monthly { day, hour, minute } => {
                Ok(format!("0 {minute} {hour} {day} * *"))
            }
            ScheduleSpec::Custom { expression } => normalize_custom(expression),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ScheduleSpec::Daily { hour, minute } => {
                format!("Every day at {hour:02}:{minute:02} UTC")
            }
            ScheduleSpec::Weekly {
                weekday,
                hour,
                minute,
            } => format!(
                "Every {} at {hour:02}:{minute:02} UTC",
                weekday_name(*weekday)
            ),
            ScheduleSpec::Monthly { day, hour, minute } if *day > 28 => format!(
                "On day {day} of every month at {hour:02}:{minute:02} UTC \
                 (skipped in months without day {day})"
            ),
            ScheduleSpec::Monthly { day, hour, minute } => {
                format!("On day {day} of every month at {hour:02}:{minute:02} UTC")
            }
            ScheduleSpec::Custom { expression } => format!("Custom schedule: {expression}"),
        }
    }
}

/// A validated, ready-to-arm trigger.
#[derive(Debug, Clone)]
pub struct CronTrigger {
    spec: ScheduleSpec,
    expression: String,
    schedule: cron::Schedule,
}

impl CronTrigger {
    pub fn new(spec: ScheduleSpec) -> Result<Self> {
        let expression = spec.expression()?;
        let schedule = parse(&expression)?;
        Ok(Self {
            spec,
            expression,
            schedule,
        })
    }

    pub fn spec(&self) -> &ScheduleSpec {
        &self.spec
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn description(&self) -> String {
        self.spec.describe()
    }

    /// First occurrence strictly after `after`, or `None` if the expression
    /// never fires again (e.g. a pinned year in the past).
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    pub fn info(&self, now: DateTime<Utc>) -> TriggerInfo {
        TriggerInfo {
            expression: self.expression.clone(),
            description: self.description(),
            next_run: self.next_after(now),
        }
    }
}

/// Translate a persisted record into a trigger.
///
/// Deterministic: the same record snapshot always yields the same expression.
pub fn translate(record: &ScheduleRecord) -> Result<CronTrigger> {
    CronTrigger::new(ScheduleSpec::from_record(record)?)
}

/// Check a definition at create/update time, before it reaches the store.
pub fn validate(
    kind: ScheduleKind,
    anchor: DateTime<Utc>,
    custom_expression: Option<&str>,
) -> Result<CronTrigger> {
    CronTrigger::new(ScheduleSpec::from_parts(
        &kind.to_string(),
        anchor,
        custom_expression,
    )?)
}

fn normalize_custom(expression: &str) -> Result<String> {
    let fields: Vec<&str> = expression.split_whitespace().collect();
    match fields.len() {
        5 => {
            let weekdays = classic_weekdays(fields[4])?;
            Ok(format!("0 {} {weekdays}", fields[..4].join(" ")))
        }
        6 | 7 => Ok(fields.join(" ")),
        n => Err(SchedulerError::InvalidSchedule(format!(
            "cron expression must have 5, 6 or 7 fields, got {n}: {expression}"
        ))),
    }
}

const CLASSIC_WEEKDAYS: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Rewrite a classic day-of-week field into names. The `cron` crate counts
/// 1 = Sunday, classic cron counts 0 (or 7) = Sunday.
fn classic_weekdays(field: &str) -> Result<String> {
    let parts = field
        .split(',')
        .map(|part| classic_weekday_part(part, field))
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join(","))
}

fn classic_weekday_part(part: &str, field: &str) -> Result<String> {
    let invalid =
        || SchedulerError::InvalidSchedule(format!("invalid day-of-week field: {field}"));
    let numeric = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    let day = |s: &str| {
        s.parse::<usize>()
            .ok()
            .filter(|d| *d <= 7)
            .ok_or_else(invalid)
    };

    let (base, step) = match part.split_once('/') {
        Some((base, step)) => {
            let step = step.parse::<usize>().ok().filter(|s| *s > 0);
            (base, Some(step.ok_or_else(invalid)?))
        }
        None => (part, None),
    };

    let (first, last) = match (base.split_once('-'), step) {
        (None, None) if base == "*" => return Ok(base.to_string()),
        (None, Some(_)) if base == "*" => (0, 6),
        (None, None) if numeric(base) => (day(base)?, day(base)?),
        (None, Some(_)) if numeric(base) => {
            let first = day(base)?;
            (first, first.max(6))
        }
        (Some((a, b)), _) if numeric(a) && numeric(b) => (day(a)?, day(b)?),
        // names and `?` already mean the same thing to both grammars
        _ => return Ok(part.to_string()),
    };
    if first > last {
        return Err(invalid());
    }

    let mut days: Vec<usize> = (first..=last)
        .step_by(step.unwrap_or(1))
        .map(|d| d % 7)
        .collect();
    days.sort_unstable();
    days.dedup();
    Ok(days
        .into_iter()
        .map(|d| CLASSIC_WEEKDAYS[d])
        .collect::<Vec<_>>()
        .join(","))
}

fn parse(expression: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(expression).map_err(|e| {
        SchedulerError::InvalidSchedule(format!("invalid cron expression '{expression}': {e}"))
    })
}

fn cron_weekday(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Mon",
        Weekday::Tue => "Tue",
        Weekday::Wed => "Wed",
        Weekday::Thu => "Thu",
        Weekday::Fri => "Fri",
        Weekday::Sat => "Sat",
        Weekday::Sun => "Sun",
    }
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
