//! `Schedule`: how often a `PolledQuery` should be re-evaluated by the
//! server. A schedule is a non-empty list of entries,
//! each either a plain interval in seconds or a calendar spec restricting
//! which minutes/hours/days/months/weekdays it fires on, in a given
//! timezone.
//!
//! Validated client-side before it's ever sent, the same way
//! `PreparedQuery` checks parameter types client-side: better to fail fast
//! with a local [`Error::ScheduleError`] than to round-trip a malformed
//! schedule to the server only to get a remote error back.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static TIMEZONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z]+(_[A-Za-z]+)*(/[A-Za-z]+(_[A-Za-z]+)*)*$").unwrap());

/// One calendar field's domain, used to bounds-check its entries.
#[derive(Debug, Clone, Copy)]
struct FieldDomain {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTES: FieldDomain = FieldDomain { name: "minutes", min: 0, max: 59 };
const HOURS: FieldDomain = FieldDomain { name: "hours", min: 0, max: 23 };
const DAYS: FieldDomain = FieldDomain { name: "days", min: 1, max: 31 };
const MONTHS: FieldDomain = FieldDomain { name: "months", min: 1, max: 12 };
const WEEKDAYS: FieldDomain = FieldDomain { name: "weekdays", min: 0, max: 6 };

/// A calendar restriction: each field is either `"*"` (unrestricted) or a
/// comma-separated list of values/hyphen-ranges within the field's domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarSpec {
    #[serde(default = "wildcard")]
    pub minutes: String,
    #[serde(default = "wildcard")]
    pub hours: String,
    #[serde(default = "wildcard")]
    pub days: String,
    #[serde(default = "wildcard")]
    pub months: String,
    #[serde(default = "wildcard")]
    pub weekdays: String,
    pub timezone: String,
}

fn wildcard() -> String {
    "*".to_owned()
}

impl CalendarSpec {
    /// A calendar spec that fires every minute, in `timezone`.
    pub fn every_minute(timezone: impl Into<String>) -> Self {
        CalendarSpec {
            minutes: wildcard(),
            hours: wildcard(),
            days: wildcard(),
            months: wildcard(),
            weekdays: wildcard(),
            timezone: timezone.into(),
        }
    }

    fn validate(&self) -> Result<()> {
        validate_field(MINUTES, &self.minutes)?;
        validate_field(HOURS, &self.hours)?;
        validate_field(DAYS, &self.days)?;
        validate_field(MONTHS, &self.months)?;
        validate_field(WEEKDAYS, &self.weekdays)?;
        if !TIMEZONE_RE.is_match(&self.timezone) {
            return Err(Error::ScheduleError(format!(
                "timezone `{}` is not a valid Olson-style identifier",
                self.timezone
            )));
        }
        Ok(())
    }
}

fn validate_field(domain: FieldDomain, value: &str) -> Result<()> {
    if value == "*" {
        return Ok(());
    }
    if value.is_empty() {
        return Err(Error::ScheduleError(format!("`{}` field is empty", domain.name)));
    }
    for term in value.split(',') {
        match term.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_in_domain(domain, lo)?;
                let hi = parse_in_domain(domain, hi)?;
                if lo > hi {
                    return Err(Error::ScheduleError(format!(
                        "`{}` range `{term}` has start greater than end",
                        domain.name
                    )));
                }
            }
            None => {
                parse_in_domain(domain, term)?;
            }
        }
    }
    Ok(())
}

fn parse_in_domain(domain: FieldDomain, token: &str) -> Result<u32> {
    let value: u32 = token.trim().parse().map_err(|_| {
        Error::ScheduleError(format!("`{}` term `{token}` is not an integer", domain.name))
    })?;
    if value < domain.min || value > domain.max {
        return Err(Error::ScheduleError(format!(
            "`{}` term `{token}` is out of range [{}, {}]",
            domain.name, domain.min, domain.max
        )));
    }
    Ok(value)
}

/// One entry in a [`Schedule`]: either a plain interval or a calendar
/// restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleEntry {
    /// Re-evaluate every `n` seconds; `n` must be positive.
    IntervalSeconds(u64),
    /// Re-evaluate on this calendar restriction.
    Calendar(CalendarSpec),
}

impl ScheduleEntry {
    fn validate(&self) -> Result<()> {
        match self {
            ScheduleEntry::IntervalSeconds(0) => {
                Err(Error::ScheduleError("interval must be a positive number of seconds".into()))
            }
            ScheduleEntry::IntervalSeconds(_) => Ok(()),
            ScheduleEntry::Calendar(spec) => spec.validate(),
        }
    }
}

/// A non-empty list of [`ScheduleEntry`] values. A `PolledQuery` fires when
/// any entry matches (the entries are ORed together).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule(Vec<ScheduleEntry>);

impl Schedule {
    /// Builds and validates a schedule from its entries. Fails if the list
    /// is empty or any entry is malformed.
    pub fn new(entries: Vec<ScheduleEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(Error::ScheduleError("schedule must contain at least one entry".into()));
        }
        for entry in &entries {
            entry.validate()?;
        }
        Ok(Schedule(entries))
    }

    /// A schedule that fires every `seconds` seconds.
    pub fn every(seconds: u64) -> Result<Self> {
        Schedule::new(vec![ScheduleEntry::IntervalSeconds(seconds)])
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_schedule_is_rejected() {
        assert!(Schedule::new(vec![]).is_err());
    }

    #[test]
    fn zero_interval_is_rejected() {
        assert!(Schedule::new(vec![ScheduleEntry::IntervalSeconds(0)]).is_err());
    }

    #[test]
    fn positive_interval_is_accepted() {
        assert!(Schedule::every(30).is_ok());
    }

    #[test]
    fn calendar_with_valid_ranges_is_accepted() {
        let spec = CalendarSpec {
            minutes: "0,15,30,45".into(),
            hours: "9-17".into(),
            days: "*".into(),
            months: "*".into(),
            weekdays: "1-5".into(),
            timezone: "America/New_York".into(),
        };
        assert!(Schedule::new(vec![ScheduleEntry::Calendar(spec)]).is_ok());
    }

    #[test]
    fn calendar_field_out_of_domain_is_rejected() {
        let spec = CalendarSpec::every_minute("UTC");
        let mut spec = spec;
        spec.hours = "24".into();
        assert!(Schedule::new(vec![ScheduleEntry::Calendar(spec)]).is_err());
    }

    #[test]
    fn backwards_range_is_rejected() {
        let mut spec = CalendarSpec::every_minute("UTC");
        spec.days = "20-5".into();
        assert!(Schedule::new(vec![ScheduleEntry::Calendar(spec)]).is_err());
    }

    #[test]
    fn malformed_timezone_is_rejected() {
        let mut spec = CalendarSpec::every_minute("not a timezone!");
        spec.timezone = "not a timezone!".into();
        assert!(Schedule::new(vec![ScheduleEntry::Calendar(spec)]).is_err());
    }
}
