//! Timerange algebra
//!
//! Two wire syntaxes are accepted, both half-open:
//!
//! - Compact: `[S_E)` where `S`/`E` are `seconds:subseconds` with the
//!   subsecond part scaled as nanoseconds. A missing end means +infinity and
//!   a single timestamp is a point interval.
//! - Standard: `[S,E)` where `S`/`E` are `MM:SS.mmm` or `HH:MM:SS.mmm`.
//!
//! Strict parsing returns a [`TimeRangeError`]; the lenient entry point
//! preserves the legacy fallback of `(0, 0)` with a warning and is what the
//! object-key derivation uses.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Minute-and-second timestamp: `MM:SS.mmm` (minutes may exceed 59)
static STANDARD_MS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d{1,2}(?:\.\d+)?)$").expect("valid regex"));

/// Hour timestamp: `HH:MM:SS.mmm`
static STANDARD_HMS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+):(\d{1,2}):(\d{1,2}(?:\.\d+)?)$").expect("valid regex"));

/// Timerange parse failure
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeRangeError {
    #[error("Invalid timerange format: {0}")]
    Format(String),

    #[error("Invalid timestamp '{timestamp}' in timerange '{timerange}'")]
    Timestamp { timerange: String, timestamp: String },

    #[error("Timerange start {start} is after end {end}")]
    Inverted { start: f64, end: f64 },
}

/// Half-open time interval `[start, end)` in seconds.
///
/// `end` may be `f64::INFINITY` (open-ended range). A point interval has
/// `start == end`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    /// Point interval at `at`
    pub fn point(at: f64) -> Self {
        Self {
            start: at,
            end: at,
        }
    }

    /// Open-ended range from `start`
    pub fn from_start(start: f64) -> Self {
        Self {
            start,
            end: f64::INFINITY,
        }
    }

    /// Strict parse of either wire syntax.
    pub fn parse(input: &str) -> Result<Self, TimeRangeError> {
        let clean = input.trim_matches(['[', ']', '(', ')']);
        if clean.is_empty() {
            return Err(TimeRangeError::Format(input.to_string()));
        }

        let range = if let Some((start_str, end_str)) = clean.split_once('_') {
            let start = if start_str.is_empty() {
                0.0
            } else {
                parse_compact_timestamp(start_str)
                    .ok_or_else(|| timestamp_error(input, start_str))?
            };
            let end = if end_str.is_empty() {
                f64::INFINITY
            } else {
                parse_compact_timestamp(end_str).ok_or_else(|| timestamp_error(input, end_str))?
            };
            Self { start, end }
        } else if let Some((start_str, end_str)) = clean.split_once(',') {
            let start = if start_str.is_empty() {
                0.0
            } else {
                parse_standard_timestamp(start_str)
                    .ok_or_else(|| timestamp_error(input, start_str))?
            };
            let end = if end_str.is_empty() {
                f64::INFINITY
            } else {
                parse_standard_timestamp(end_str).ok_or_else(|| timestamp_error(input, end_str))?
            };
            Self { start, end }
        } else {
            let at =
                parse_compact_timestamp(clean).ok_or_else(|| timestamp_error(input, clean))?;
            Self::point(at)
        };

        if range.start > range.end {
            return Err(TimeRangeError::Inverted {
                start: range.start,
                end: range.end,
            });
        }
        Ok(range)
    }

    /// Lenient parse: malformed input yields `(0, 0)` with a warning.
    pub fn parse_lenient(input: &str) -> Self {
        match Self::parse(input) {
            Ok(range) => range,
            Err(e) => {
                tracing::warn!(timerange = %input, error = %e, "Failed to parse timerange");
                Self::new(0.0, 0.0)
            }
        }
    }

    /// `a` overlaps `b` iff `a.start < b.end && a.end > b.start`
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }

    /// `self` contains `other` iff the bounds of `other` fall within `self`
    pub fn contains(&self, other: &Self) -> bool {
        self.start <= other.start && self.end >= other.end
    }

    /// Duration in seconds; infinite for open-ended ranges
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Calendar components `(year, month, day)` of the start instant,
    /// interpreted as a Unix timestamp. `None` when the start is not
    /// representable (callers fall back to the current date).
    pub fn start_date_components(&self) -> Option<(i32, u32, u32)> {
        use chrono::Datelike;

        if !self.start.is_finite() || self.start < 0.0 {
            return None;
        }
        let secs = self.start.trunc() as i64;
        let nanos = ((self.start - self.start.trunc()) * 1e9).round() as u32;
        let dt = chrono::DateTime::from_timestamp(secs, nanos)?;
        Some((dt.year(), dt.month(), dt.day()))
    }
}

impl fmt::Display for TimeRange {
    /// Renders the compact form: `[S_E)`, `[S_)` for open-ended ranges and
    /// `[S)` for point intervals.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.end.is_infinite() {
            write!(f, "[{}_)", format_compact_timestamp(self.start))
        } else if self.start == self.end {
            write!(f, "[{})", format_compact_timestamp(self.start))
        } else {
            write!(
                f,
                "[{}_{})",
                format_compact_timestamp(self.start),
                format_compact_timestamp(self.end)
            )
        }
    }
}

fn timestamp_error(timerange: &str, timestamp: &str) -> TimeRangeError {
    TimeRangeError::Timestamp {
        timerange: timerange.to_string(),
        timestamp: timestamp.to_string(),
    }
}

/// Parse `seconds:subseconds` where subseconds are nanoseconds.
fn parse_compact_timestamp(input: &str) -> Option<f64> {
    let (secs, subsecs) = input.split_once(':')?;
    let secs: u64 = secs.parse().ok()?;
    let subsecs: u64 = if subsecs.is_empty() {
        0
    } else {
        subsecs.parse().ok()?
    };
    Some(secs as f64 + subsecs as f64 / 1_000_000_000.0)
}

/// Parse `MM:SS.mmm` or `HH:MM:SS.mmm` into seconds.
fn parse_standard_timestamp(input: &str) -> Option<f64> {
    if let Some(caps) = STANDARD_HMS.captures(input) {
        let hours: f64 = caps[1].parse().ok()?;
        let minutes: f64 = caps[2].parse().ok()?;
        let seconds: f64 = caps[3].parse().ok()?;
        return Some(hours * 3_600.0 + minutes * 60.0 + seconds);
    }
    if let Some(caps) = STANDARD_MS.captures(input) {
        let minutes: f64 = caps[1].parse().ok()?;
        let seconds: f64 = caps[2].parse().ok()?;
        return Some(minutes * 60.0 + seconds);
    }
    None
}

/// Render a compact `seconds:nanoseconds` timestamp.
fn format_compact_timestamp(seconds: f64) -> String {
    let whole = seconds.trunc() as u64;
    let nanos = ((seconds - seconds.trunc()) * 1e9).round() as u64;
    format!("{}:{}", whole, nanos)
}

/// Generate a standard-form timerange starting at zero.
///
/// `[00:00:00.000,MM:SS.mmm)` for the given duration; used for storage
/// allocation defaults.
pub fn default_timerange(duration_seconds: u64) -> String {
    timerange_from_duration(0, duration_seconds)
}

/// Generate a standard-form timerange from a start offset and duration.
pub fn timerange_from_duration(start_seconds: u64, duration_seconds: u64) -> String {
    let fmt = |total: u64| -> String {
        format!("{:02}:{:02}.000", total / 60, total % 60)
    };
    let start = if start_seconds == 0 {
        "00:00:00.000".to_string()
    } else {
        fmt(start_seconds)
    };
    format!("[{},{})", start, fmt(start_seconds + duration_seconds))
}

/// Whether two timerange strings overlap; unparseable input is non-overlapping.
pub fn timeranges_overlap(a: &str, b: &str) -> bool {
    TimeRange::parse_lenient(a).overlaps(&TimeRange::parse_lenient(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_compact_range() {
        let range = TimeRange::parse("[0:0_10:0)").unwrap();
        assert_eq!(range.start, 0.0);
        assert_eq!(range.end, 10.0);
    }

    #[test]
    fn parse_compact_with_subseconds() {
        let range = TimeRange::parse("[1:500000000_2:0)").unwrap();
        assert_eq!(range.start, 1.5);
        assert_eq!(range.end, 2.0);
    }

    #[test]
    fn parse_compact_open_end_is_infinite() {
        let range = TimeRange::parse("[5:0_)").unwrap();
        assert_eq!(range.start, 5.0);
        assert!(range.end.is_infinite());
    }

    #[test]
    fn parse_single_timestamp_is_point() {
        let range = TimeRange::parse("[3:0)").unwrap();
        assert_eq!(range.start, 3.0);
        assert_eq!(range.end, 3.0);
    }

    #[test]
    fn parse_standard_range() {
        let range = TimeRange::parse("[00:00:00.000,05:00.000)").unwrap();
        assert_eq!(range.start, 0.0);
        assert_eq!(range.end, 300.0);
    }

    #[test]
    fn parse_standard_hms() {
        let range = TimeRange::parse("[01:00:00.000,01:30:00.000)").unwrap();
        assert_eq!(range.start, 3_600.0);
        assert_eq!(range.end, 5_400.0);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(TimeRange::parse("not a range").is_err());
        assert!(TimeRange::parse("").is_err());
        assert!(TimeRange::parse("[abc_def)").is_err());
    }

    #[test]
    fn parse_rejects_inverted() {
        assert!(matches!(
            TimeRange::parse("[10:0_5:0)"),
            Err(TimeRangeError::Inverted { .. })
        ));
    }

    #[test]
    fn lenient_parse_falls_back_to_zero() {
        let range = TimeRange::parse_lenient("garbage");
        assert_eq!(range, TimeRange::new(0.0, 0.0));
    }

    #[test]
    fn overlap_rules() {
        let base = TimeRange::parse("[0:0_5:0)").unwrap();
        assert!(base.overlaps(&TimeRange::parse("[3:0_8:0)").unwrap()));
        assert!(!base.overlaps(&TimeRange::parse("[6:0_10:0)").unwrap()));
        // Half-open: touching ranges do not overlap
        assert!(!base.overlaps(&TimeRange::parse("[5:0_10:0)").unwrap()));
    }

    #[test]
    fn overlap_with_infinite_end() {
        let open = TimeRange::parse("[5:0_)").unwrap();
        assert!(open.overlaps(&TimeRange::parse("[100:0_200:0)").unwrap()));
        assert!(!open.overlaps(&TimeRange::parse("[0:0_5:0)").unwrap()));
    }

    #[test]
    fn overlap_across_both_syntaxes() {
        assert!(timeranges_overlap("[00:00:00.000,05:00.000)", "[4:0_8:0)"));
        assert!(!timeranges_overlap("[0:0_5:0)", "[6:0_7:0)"));
    }

    #[test]
    fn containment_rules() {
        let outer = TimeRange::parse("[0:0_10:0)").unwrap();
        assert!(outer.contains(&TimeRange::parse("[2:0_8:0)").unwrap()));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&TimeRange::parse("[5:0_12:0)").unwrap()));
    }

    #[test]
    fn compact_render_round_trips() {
        for input in ["[0:0_10:0)", "[5:0_)", "[3:0)"] {
            let range = TimeRange::parse(input).unwrap();
            let reparsed = TimeRange::parse(&range.to_string()).unwrap();
            assert_eq!(range.start, reparsed.start, "start of {}", input);
            assert_eq!(range.end, reparsed.end, "end of {}", input);
        }
    }

    #[test]
    fn date_components_from_epoch_start() {
        // 2024-01-01 00:00:00 UTC
        let range = TimeRange::new(1_704_067_200.0, 1_704_067_210.0);
        assert_eq!(range.start_date_components(), Some((2024, 1, 1)));
    }

    #[test]
    fn date_components_unavailable_for_negative_start() {
        let range = TimeRange::new(-5.0, 0.0);
        assert_eq!(range.start_date_components(), None);
    }

    #[test]
    fn generators_produce_standard_form() {
        assert_eq!(default_timerange(300), "[00:00:00.000,05:00.000)");
        assert_eq!(default_timerange(60), "[00:00:00.000,01:00.000)");
        assert_eq!(timerange_from_duration(300, 300), "[05:00.000,10:00.000)");
    }

    #[test]
    fn generated_timerange_parses_back() {
        let range = TimeRange::parse(&default_timerange(300)).unwrap();
        assert_eq!(range.start, 0.0);
        assert_eq!(range.end, 300.0);
    }

    #[test]
    fn duration_accessor() {
        assert_eq!(TimeRange::parse("[0:0_10:0)").unwrap().duration(), 10.0);
        assert!(TimeRange::parse("[0:0_)").unwrap().duration().is_infinite());
    }
}
