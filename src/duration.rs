//! Delay and duration grammar.
//!
//! Delays are either absolute timestamps or compact natural-language
//! durations like `"1w2d3h4m5s"`. Durations stringify back through
//! [`stringify_duration`] so a numeric TTL round-trips as `"90s"` → 90
//! seconds.

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d+w)?(\d+d)?(\d+h)?(\d+m)?(\d+s)?$").expect("duration pattern is valid")
});

const SECONDS_PER_WEEK: i64 = 604_800;
const SECONDS_PER_DAY: i64 = 86_400;
const SECONDS_PER_HOUR: i64 = 3_600;
const SECONDS_PER_MINUTE: i64 = 60;

/// A delay as accepted on the wire: an absolute timestamp or an expression
/// handled by [`parse_delay`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelayValue {
    Timestamp(DateTime<Utc>),
    Expression(String),
}

/// Resolve a delay against the current time. Absolute times in the past and
/// expressions that match neither a date nor the duration grammar yield no
/// delay.
pub fn parse_delay(value: &DelayValue) -> Option<DateTime<Utc>> {
    parse_delay_at(Utc::now(), value)
}

/// [`parse_delay`] against an explicit `now`.
pub fn parse_delay_at(now: DateTime<Utc>, value: &DelayValue) -> Option<DateTime<Utc>> {
    match value {
        DelayValue::Timestamp(at) => future_or_none(now, *at),
        DelayValue::Expression(text) => {
            if text.is_empty() {
                return None;
            }
            match DateTime::parse_from_rfc3339(text) {
                Ok(at) => future_or_none(now, at.with_timezone(&Utc)),
                Err(_) => parse_natural_language_duration_at(now, text),
            }
        }
    }
}

fn future_or_none(now: DateTime<Utc>, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if at <= now {
        None
    } else {
        Some(at)
    }
}

/// Parse a compact duration such as `"1w2d3h4m5s"` added onto the current
/// time. Returns `None` when no component matches.
pub fn parse_natural_language_duration(text: &str) -> Option<DateTime<Utc>> {
    parse_natural_language_duration_at(Utc::now(), text)
}

/// [`parse_natural_language_duration`] against an explicit `now`.
pub fn parse_natural_language_duration_at(
    now: DateTime<Utc>,
    text: &str,
) -> Option<DateTime<Utc>> {
    let captures = DURATION_RE.captures(text)?;

    let mut seconds = 0i64;
    let mut matched = false;
    for (group, unit_seconds) in [
        (1, SECONDS_PER_WEEK),
        (2, SECONDS_PER_DAY),
        (3, SECONDS_PER_HOUR),
        (4, SECONDS_PER_MINUTE),
        (5, 1),
    ] {
        if let Some(component) = captures.get(group) {
            let digits = &component.as_str()[..component.as_str().len() - 1];
            let magnitude: i64 = digits.parse().ok()?;
            seconds += magnitude * unit_seconds;
            matched = true;
        }
    }

    if matched {
        Some(now + Duration::seconds(seconds))
    } else {
        None
    }
}

/// Render a positive number of seconds in the compact duration grammar,
/// omitting zero components: `5415` → `"1h30m15s"`. Non-positive input
/// yields `None`.
pub fn stringify_duration(seconds: i64) -> Option<String> {
    if seconds <= 0 {
        return None;
    }

    let weeks = seconds / SECONDS_PER_WEEK;
    let days = (seconds % SECONDS_PER_WEEK) / SECONDS_PER_DAY;
    let hours = (seconds % SECONDS_PER_DAY) / SECONDS_PER_HOUR;
    let minutes = (seconds % SECONDS_PER_HOUR) / SECONDS_PER_MINUTE;
    let rest = seconds % SECONDS_PER_MINUTE;

    let mut out = String::new();
    for (magnitude, unit) in [
        (weeks, 'w'),
        (days, 'd'),
        (hours, 'h'),
        (minutes, 'm'),
        (rest, 's'),
    ] {
        if magnitude > 0 {
            out.push_str(&magnitude.to_string());
            out.push(unit);
        }
    }
    Some(out)
}
