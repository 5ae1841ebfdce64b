//! Temporal expression parsing and proximity scoring.
//!
//! Parsing is a heuristic: a handful of relative forms ("3 days ago",
//! "yesterday", "last month") tried first, then a fixed list of absolute date
//! formats. Months count as 30 days and years as 365; this is an
//! approximation, not calendar arithmetic. Nothing here returns an error:
//! unparseable input yields `None` and missing instants score a neutral 0.5.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta};
use regex::Regex;
use serde::Serialize;

/// Score returned when either side of a comparison has no instant.
pub const NEUTRAL_PROXIMITY: f64 = 0.5;

/// Substrings that signal a question cares about time.
const TEMPORAL_KEYWORDS: &[&str] = &[
    "when", "what time", "what date", "ago", "last", "first", "before", "after", "during",
    "recent", "earlier", "later", "date", "time", "year", "month", "day", "week",
];

/// Date-only formats, tried in order after the relative forms.
const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d/%m/%Y", "%B %d, %Y", "%b %d, %Y"];

/// Date-time formats, tried after the date-only ones. The second is the
/// session stamp used by LoCoMo-style conversation logs.
const DATETIME_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%I:%M %p on %d %B, %Y"];

#[derive(Debug, Clone, Copy)]
enum Unit {
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl Unit {
    fn delta(self, n: i64) -> Option<TimeDelta> {
        match self {
            Self::Seconds => TimeDelta::try_seconds(n),
            Self::Minutes => TimeDelta::try_minutes(n),
            Self::Hours => TimeDelta::try_hours(n),
            Self::Days => TimeDelta::try_days(n),
            Self::Weeks => TimeDelta::try_weeks(n),
            Self::Months => TimeDelta::try_days(n.checked_mul(30)?),
            Self::Years => TimeDelta::try_days(n.checked_mul(365)?),
        }
    }
}

static COUNTED_AGO: LazyLock<Vec<(Regex, Unit)>> = LazyLock::new(|| {
    [
        (r"(\d+)\s*(?:seconds?|secs?)\s*ago", Unit::Seconds),
        (r"(\d+)\s*(?:minutes?|mins?)\s*ago", Unit::Minutes),
        (r"(\d+)\s*(?:hours?|hrs?)\s*ago", Unit::Hours),
        (r"(\d+)\s*days?\s*ago", Unit::Days),
        (r"(\d+)\s*weeks?\s*ago", Unit::Weeks),
        (r"(\d+)\s*months?\s*ago", Unit::Months),
        (r"(\d+)\s*years?\s*ago", Unit::Years),
    ]
    .into_iter()
    .map(|(pattern, unit)| (Regex::new(pattern).expect("valid temporal pattern"), unit))
    .collect()
});

static NAMED_OFFSETS: LazyLock<Vec<(Regex, TimeDelta)>> = LazyLock::new(|| {
    [
        (r"yesterday", TimeDelta::days(1)),
        (r"today", TimeDelta::zero()),
        (r"last\s+week", TimeDelta::weeks(1)),
        (r"last\s+month", TimeDelta::days(30)),
        (r"last\s+year", TimeDelta::days(365)),
    ]
    .into_iter()
    .map(|(pattern, delta)| (Regex::new(pattern).expect("valid temporal pattern"), delta))
    .collect()
});

/// How a query expresses time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemporalKind {
    /// A concrete instant was parsed out of the query.
    Relative,
    /// Temporal keywords are present but nothing parsed.
    Absolute,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TemporalInfo {
    pub has_temporal: bool,
    pub parsed_instant: Option<NaiveDateTime>,
    pub kind: Option<TemporalKind>,
}

/// Strategy for turning text into an instant. The heuristic parser is the
/// default; a stronger parser can be dropped in without touching callers.
pub trait TemporalParser: Send + Sync {
    fn parse(&self, text: &str, reference: NaiveDateTime) -> Option<NaiveDateTime>;

    fn extract_info(&self, query: &str, reference: NaiveDateTime) -> TemporalInfo {
        let lower = query.to_lowercase();
        let has_temporal = TEMPORAL_KEYWORDS.iter().any(|kw| lower.contains(kw));
        let parsed_instant = self.parse(query, reference);
        let kind = match (parsed_instant, has_temporal) {
            (Some(_), _) => Some(TemporalKind::Relative),
            (None, true) => Some(TemporalKind::Absolute),
            (None, false) => None,
        };
        TemporalInfo {
            has_temporal,
            parsed_instant,
            kind,
        }
    }
}

/// Regex and strptime-style heuristic parser.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicTemporalParser;

impl TemporalParser for HeuristicTemporalParser {
    fn parse(&self, text: &str, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        parse_temporal_expression(text, reference)
    }
}

/// Parse a relative or absolute time expression against `reference`.
pub fn parse_temporal_expression(text: &str, reference: NaiveDateTime) -> Option<NaiveDateTime> {
    let lower = text.to_lowercase();

    for (pattern, unit) in COUNTED_AGO.iter() {
        let Some(caps) = pattern.captures(&lower) else {
            continue;
        };
        let resolved = caps[1]
            .parse::<i64>()
            .ok()
            .and_then(|n| unit.delta(n))
            .and_then(|delta| reference.checked_sub_signed(delta));
        if resolved.is_some() {
            return resolved;
        }
    }

    for (pattern, delta) in NAMED_OFFSETS.iter() {
        if pattern.is_match(&lower) {
            if let Some(instant) = reference.checked_sub_signed(*delta) {
                return Some(instant);
            }
        }
    }

    parse_absolute(text.trim())
}

fn parse_absolute(text: &str) -> Option<NaiveDateTime> {
    for fmt in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(text, fmt) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(instant) = NaiveDateTime::parse_from_str(text, fmt) {
            return Some(instant);
        }
    }
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.naive_utc())
}

/// Temporal info for a query using the heuristic parser.
pub fn extract_temporal_info(query: &str, reference: NaiveDateTime) -> TemporalInfo {
    HeuristicTemporalParser.extract_info(query, reference)
}

/// Closeness of two instants in `[0.1, 1.0]`, or 0.5 if either is missing.
///
/// Piecewise-linear in the day distance: 1.0→0.7 over the first week,
/// 0.7→0.4 up to 30 days, 0.4→0.1 up to a year, then a flat 0.1 floor.
pub fn proximity(memory: Option<NaiveDateTime>, query: Option<NaiveDateTime>) -> f64 {
    let (Some(memory), Some(query)) = (memory, query) else {
        return NEUTRAL_PROXIMITY;
    };

    let days = (memory - query).num_milliseconds().abs() as f64 / 86_400_000.0;

    if days == 0.0 {
        1.0
    } else if days <= 7.0 {
        1.0 - (days / 7.0) * 0.3
    } else if days <= 30.0 {
        0.7 - ((days - 7.0) / 23.0) * 0.3
    } else if days <= 365.0 {
        0.4 - ((days - 30.0) / 335.0) * 0.3
    } else {
        (0.1 - (days - 365.0) / 3650.0).max(0.1)
    }
}
