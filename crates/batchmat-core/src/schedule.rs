//! Schedule expressions for time-triggered jobs.
//!
//! Accepts `cron(m h dom mon dow year)`, `rate(n unit)` and bare five-field
//! cron (`0 10 * * *`), and always stores the EventBridge form.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

#[derive(Parser)]
#[grammar = "schedule.pest"]
struct ScheduleParser;

const EVENTBRIDGE_CRON_FIELDS: usize = 6;
const UNIX_CRON_FIELDS: usize = 5;
const DAY_OF_MONTH: usize = 2;
const DAY_OF_WEEK: usize = 4;

/// Canonical EventBridge schedule (`cron(...)` or `rate(...)`).
///
/// Only constructed through [`Schedule::parse`], so deserialized manifests are
/// validated and normalised too.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Schedule(String);

impl Schedule {
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let pairs = ScheduleParser::parse(Rule::schedule, input)
            .map_err(|e| Error::invalid_schedule(input, format!("parse error: {}", e)))?;

        for pair in pairs {
            if pair.as_rule() != Rule::schedule {
                continue;
            }
            for inner_pair in pair.into_inner() {
                return match inner_pair.as_rule() {
                    Rule::cron_expr => parse_cron_expr(input, inner_pair),
                    Rule::rate_expr => parse_rate_expr(input, inner_pair),
                    Rule::cron_fields => parse_unix_cron(input, inner_pair),
                    _ => Err(Error::invalid_schedule(input, "unknown schedule form")),
                };
            }
        }

        Err(Error::invalid_schedule(input, "empty schedule expression"))
    }

    pub fn expression(&self) -> &str {
        &self.0
    }
}

impl FromStr for Schedule {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Schedule {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Schedule> for String {
    fn from(schedule: Schedule) -> Self {
        schedule.0
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn parse_cron_expr(input: &str, pair: Pair<Rule>) -> Result<Schedule> {
    let fields = pair
        .into_inner()
        .find(|p| p.as_rule() == Rule::cron_fields)
        .map(collect_fields)
        .ok_or_else(|| Error::invalid_schedule(input, "missing cron fields"))?;

    if fields.len() != EVENTBRIDGE_CRON_FIELDS {
        return Err(Error::invalid_schedule(
            input,
            format!("cron() takes {} fields, got {}", EVENTBRIDGE_CRON_FIELDS, fields.len()),
        ));
    }
    let (dom, dow) = (fields[DAY_OF_MONTH].as_str(), fields[DAY_OF_WEEK].as_str());
    if (dom == "?") == (dow == "?") {
        return Err(Error::invalid_schedule(
            input,
            "exactly one of day-of-month and day-of-week must be '?'",
        ));
    }
    Ok(cron_schedule(&fields))
}

fn parse_unix_cron(input: &str, pair: Pair<Rule>) -> Result<Schedule> {
    let mut fields = collect_fields(pair);
    if fields.len() != UNIX_CRON_FIELDS {
        return Err(Error::invalid_schedule(
            input,
            format!("bare cron takes {} fields, got {}", UNIX_CRON_FIELDS, fields.len()),
        ));
    }
    if fields.iter().any(|f| f == "?") {
        return Err(Error::invalid_schedule(input, "'?' is only valid inside cron()"));
    }

    if fields[DAY_OF_WEEK] == "*" {
        fields[DAY_OF_WEEK] = "?".to_string();
    } else if fields[DAY_OF_MONTH] == "*" {
        fields[DAY_OF_MONTH] = "?".to_string();
    } else {
        return Err(Error::invalid_schedule(
            input,
            "cannot restrict both day-of-month and day-of-week",
        ));
    }
    fields.push("*".to_string());
    Ok(cron_schedule(&fields))
}

fn parse_rate_expr(input: &str, pair: Pair<Rule>) -> Result<Schedule> {
    let mut value = None;
    let mut unit = None;
    for inner_pair in pair.into_inner() {
        match inner_pair.as_rule() {
            Rule::rate_value => {
                value = Some(inner_pair.as_str().parse::<u32>().map_err(|e| {
                    Error::invalid_schedule(input, format!("bad rate value: {}", e))
                })?);
            }
            Rule::rate_unit => unit = Some(inner_pair.as_str()),
            _ => {}
        }
    }

    let value = value.ok_or_else(|| Error::invalid_schedule(input, "missing rate value"))?;
    let unit = unit.ok_or_else(|| Error::invalid_schedule(input, "missing rate unit"))?;
    if value == 0 {
        return Err(Error::invalid_schedule(input, "rate must be positive"));
    }
    let singular = !unit.ends_with('s');
    if singular != (value == 1) {
        return Err(Error::invalid_schedule(
            input,
            "use a singular unit for a value of 1 and a plural unit otherwise",
        ));
    }
    Ok(Schedule(format!("rate({} {})", value, unit)))
}

fn collect_fields(pair: Pair<Rule>) -> Vec<String> {
    pair.into_inner()
        .filter(|p| p.as_rule() == Rule::cron_field)
        .map(|p| p.as_str().to_string())
        .collect()
}

fn cron_schedule(fields: &[String]) -> Schedule {
    Schedule(format!("cron({})", fields.join(" ")))
}
