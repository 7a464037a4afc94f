//! Temporal markers attached to remembered facts
//!
//! Markers are bracketed annotations such as `[recorded:2025-01-30]` or
//! `[scheduled:2025-03-15 to 2025-03-25]`. Dates may be given to day, month
//! or year precision.

use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};

use crate::error::{Error, Result};

/// Marker keywords understood by the memory format
pub const MARKER_KEYWORDS: [&str; 7] = [
    "recorded",
    "since",
    "until",
    "on",
    "scheduled",
    "as_of",
    "expires",
];

/// A calendar date at day, month or year precision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerDate {
    Day(NaiveDate),
    Month { year: i32, month: u32 },
    Year(i32),
}

impl MarkerDate {
    /// Parse `YYYY-MM-DD`, `YYYY-MM` or `YYYY`
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let invalid = || Error::invalid_input(format!("invalid marker date: {:?}", raw));

        let parts: Vec<&str> = raw.split('-').collect();
        let year = parts
            .first()
            .filter(|p| p.len() == 4 && p.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|p| p.parse::<i32>().ok())
            .ok_or_else(invalid)?;

        match parts.len() {
            1 => Ok(Self::Year(year)),
            2 => {
                let month = parse_two_digits(parts[1]).ok_or_else(invalid)?;
                if !(1..=12).contains(&month) {
                    return Err(invalid());
                }
                Ok(Self::Month { year, month })
            }
            3 => {
                let month = parse_two_digits(parts[1]).ok_or_else(invalid)?;
                let day = parse_two_digits(parts[2]).ok_or_else(invalid)?;
                NaiveDate::from_ymd_opt(year, month, day)
                    .map(Self::Day)
                    .ok_or_else(invalid)
            }
            _ => Err(invalid()),
        }
    }

    /// Day-precision date for a point in time
    pub fn today(now: DateTime<Utc>) -> Self {
        Self::Day(now.date_naive())
    }

    /// First calendar day covered by this date
    pub fn start(&self) -> NaiveDate {
        match *self {
            Self::Day(d) => d,
            Self::Month { year, month } => {
                NaiveDate::from_ymd_opt(year, month, 1).unwrap_or(NaiveDate::MIN)
            }
            Self::Year(year) => NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN),
        }
    }
}

fn parse_two_digits(part: &str) -> Option<u32> {
    if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    part.parse().ok()
}

impl fmt::Display for MarkerDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Day(d) => write!(f, "{:04}-{:02}-{:02}", d.year(), d.month(), d.day()),
            Self::Month { year, month } => write!(f, "{:04}-{:02}", year, month),
            Self::Year(year) => write!(f, "{:04}", year),
        }
    }
}

/// A single temporal annotation on a fact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemporalMarker {
    /// When the fact was told to the system
    Recorded(MarkerDate),
    /// When something started
    Since(MarkerDate),
    /// When something ended or will end
    Until(MarkerDate),
    /// A specific date
    On(MarkerDate),
    /// A future event, optionally spanning a range
    Scheduled {
        start: MarkerDate,
        end: Option<MarkerDate>,
    },
    /// Information true at a specific time
    AsOf(MarkerDate),
    /// When the information becomes outdated
    Expires(MarkerDate),
}

impl TemporalMarker {
    /// `[recorded:<today>]` for a point in time
    pub fn recorded(now: DateTime<Utc>) -> Self {
        Self::Recorded(MarkerDate::today(now))
    }

    /// Parse a bracketed marker such as `[since:2024-01]`
    pub fn parse(raw: &str) -> Result<Self> {
        let inner = raw
            .trim()
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .ok_or_else(|| Error::invalid_input(format!("marker must be bracketed: {:?}", raw)))?;

        let (keyword, value) = inner
            .split_once(':')
            .ok_or_else(|| Error::invalid_input(format!("marker missing ':' in {:?}", raw)))?;

        let marker = match keyword.trim() {
            "recorded" => Self::Recorded(MarkerDate::parse(value)?),
            "since" => Self::Since(MarkerDate::parse(value)?),
            "until" => Self::Until(MarkerDate::parse(value)?),
            "on" => Self::On(MarkerDate::parse(value)?),
            "as_of" => Self::AsOf(MarkerDate::parse(value)?),
            "expires" => Self::Expires(MarkerDate::parse(value)?),
            "scheduled" => match value.split_once(" to ") {
                Some((start, end)) => {
                    let start = MarkerDate::parse(start)?;
                    let end = MarkerDate::parse(end)?;
                    if end.start() < start.start() {
                        return Err(Error::invalid_input(format!(
                            "scheduled range ends before it starts: {:?}",
                            raw
                        )));
                    }
                    Self::Scheduled {
                        start,
                        end: Some(end),
                    }
                }
                None => Self::Scheduled {
                    start: MarkerDate::parse(value)?,
                    end: None,
                },
            },
            other => {
                return Err(Error::invalid_input(format!(
                    "unknown marker keyword: {:?}",
                    other
                )))
            }
        };

        Ok(marker)
    }

    /// The marker keyword, e.g. `as_of`
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Recorded(_) => "recorded",
            Self::Since(_) => "since",
            Self::Until(_) => "until",
            Self::On(_) => "on",
            Self::Scheduled { .. } => "scheduled",
            Self::AsOf(_) => "as_of",
            Self::Expires(_) => "expires",
        }
    }
}

impl fmt::Display for TemporalMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recorded(d)
            | Self::Since(d)
            | Self::Until(d)
            | Self::On(d)
            | Self::AsOf(d)
            | Self::Expires(d) => write!(f, "[{}:{}]", self.keyword(), d),
            Self::Scheduled { start, end: None } => write!(f, "[scheduled:{}]", start),
            Self::Scheduled {
                start,
                end: Some(end),
            } => write!(f, "[scheduled:{} to {}]", start, end),
        }
    }
}

/// Result of scanning one bracketed marker in memory text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkerScan {
    Valid(TemporalMarker),
    Malformed { raw: String, reason: String },
}

/// Find every marker-looking bracket in `text`.
///
/// Only brackets whose keyword is in [`MARKER_KEYWORDS`] are reported; other
/// bracketed text is treated as prose.
pub fn scan_markers(text: &str) -> Vec<MarkerScan> {
    let mut found = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find('[') {
        let after = &rest[open..];
        let Some(close) = after.find(']') else {
            break;
        };
        let candidate = &after[..=close];
        let inner = &candidate[1..candidate.len() - 1];

        let keyword = inner.split_once(':').map(|(k, _)| k.trim());
        if keyword.is_some_and(|k| MARKER_KEYWORDS.contains(&k)) {
            found.push(match TemporalMarker::parse(candidate) {
                Ok(marker) => MarkerScan::Valid(marker),
                Err(e) => MarkerScan::Malformed {
                    raw: candidate.to_string(),
                    reason: e.to_string(),
                },
            });
        }

        rest = &after[1..];
    }

    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn day(y: i32, m: u32, d: u32) -> MarkerDate {
        MarkerDate::Day(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn parses_each_precision() {
        assert_eq!(MarkerDate::parse("2025-01-30").unwrap(), day(2025, 1, 30));
        assert_eq!(
            MarkerDate::parse("2024-09").unwrap(),
            MarkerDate::Month {
                year: 2024,
                month: 9
            }
        );
        assert_eq!(MarkerDate::parse("2020").unwrap(), MarkerDate::Year(2020));
    }

    #[test]
    fn rejects_bad_dates() {
        for raw in ["2025-13", "2025-02-30", "25-01-01", "2025-1-01", "soon", ""] {
            assert!(MarkerDate::parse(raw).is_err(), "{raw} should fail");
        }
    }

    #[test]
    fn year_must_be_four_digits() {
        for raw in ["+202", "-202", "+202-01", " +20-01-01", "20_5"] {
            assert!(MarkerDate::parse(raw).is_err(), "{raw} should fail");
        }
        assert!(TemporalMarker::parse("[since:+202]").is_err());
    }

    #[test]
    fn parses_and_renders_markers() {
        for raw in [
            "[recorded:2025-01-30]",
            "[since:2023-06-01]",
            "[until:2025-06]",
            "[on:2020-05-15]",
            "[scheduled:2025-03-15 to 2025-03-25]",
            "[scheduled:2025-07]",
            "[as_of:2025-01-30]",
            "[expires:2025]",
        ] {
            let marker = TemporalMarker::parse(raw).unwrap();
            assert_eq!(marker.to_string(), raw);
        }
    }

    #[test]
    fn scheduled_range_must_be_ordered() {
        assert!(TemporalMarker::parse("[scheduled:2025-03-25 to 2025-03-15]").is_err());
    }

    #[test]
    fn recorded_uses_utc_day() {
        let now = Utc.with_ymd_and_hms(2025, 1, 30, 23, 59, 0).unwrap();
        assert_eq!(
            TemporalMarker::recorded(now).to_string(),
            "[recorded:2025-01-30]"
        );
    }

    #[test]
    fn scan_reports_valid_and_malformed() {
        let text = "I work at Google [recorded:2025-01-30][since:2023-06-01]. \
                    I'm [mostly] vegetarian [since:last week]";
        let scans = scan_markers(text);

        assert_eq!(scans.len(), 3);
        assert_eq!(scans[0], MarkerScan::Valid(TemporalMarker::Recorded(day(2025, 1, 30))));
        assert_eq!(scans[1], MarkerScan::Valid(TemporalMarker::Since(day(2023, 6, 1))));
        assert!(matches!(&scans[2], MarkerScan::Malformed { raw, .. } if raw == "[since:last week]"));
    }

    #[test]
    fn scan_ignores_unclosed_brackets() {
        assert!(scan_markers("I have a dog [recorded:2024-01-01").is_empty());
    }
}
