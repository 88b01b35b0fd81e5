//! Sampling-interval estimation and per-row time cells.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use snapstat_runner::CommandSpec;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::Time;
use tracing::{debug, warn};

use crate::range::TimeRange;
use crate::source::TextSource;

/// Assumed sampling interval when it cannot be measured.
pub const DEFAULT_INTERVAL_SECS: u64 = 600;

/// Measured intervals at or above this are not believed.
const MAX_INTERVAL_SECS: i64 = 3600;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

const CLOCK_24: &[BorrowedFormatItem<'static>] = format_description!("[hour]:[minute]:[second]");
const CLOCK_12: &[BorrowedFormatItem<'static>] = format_description!(
    "[hour repr:12]:[minute]:[second] [period case_sensitive:false]"
);

static TIMESTAMP_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{2}:\d{2}:\d{2}").expect("static pattern"));

/// Parse `HH:MM:SS`, or `hh:MM:SS AM` when a meridiem is present.
pub fn parse_time_of_day(text: &str) -> Option<Time> {
    let text = text.trim();
    let upper = text.to_ascii_uppercase();
    if upper.contains("AM") || upper.contains("PM") {
        Time::parse(text, CLOCK_12).ok()
    } else {
        Time::parse(text, CLOCK_24).ok()
    }
}

/// Estimate the interval from `sar -q` output.
///
/// Uses the first two lines that start with a timestamp. Anything other
/// than a positive gap under an hour yields [`DEFAULT_INTERVAL_SECS`].
pub fn estimate_interval(text: &str) -> u64 {
    let stamps: Vec<Option<Time>> = text
        .lines()
        .filter(|l| TIMESTAMP_LINE.is_match(l))
        .take(2)
        .map(|l| {
            let mut tokens = l.split_whitespace();
            let clock = tokens.next().unwrap_or_default();
            match tokens.next() {
                Some(m) if m.eq_ignore_ascii_case("AM") || m.eq_ignore_ascii_case("PM") => {
                    parse_time_of_day(&format!("{clock} {m}"))
                }
                _ => parse_time_of_day(clock),
            }
        })
        .collect();

    let &[Some(first), Some(second)] = stamps.as_slice() else {
        return DEFAULT_INTERVAL_SECS;
    };
    let gap = (second - first).whole_seconds();
    if gap > 0 && gap < MAX_INTERVAL_SECS {
        gap as u64
    } else {
        DEFAULT_INTERVAL_SECS
    }
}

/// Run `sar -q` once and estimate the interval; failures fall back to the
/// default.
pub fn probe_interval(source: &impl TextSource, sar: &str) -> u64 {
    let spec = CommandSpec::new(sar)
        .arg("-q")
        .env("LC_ALL", "C")
        .merge_stderr();
    match source.direct(&spec, PROBE_TIMEOUT) {
        Ok(text) => {
            let secs = estimate_interval(&text);
            debug!(secs, "Estimated sar interval");
            secs
        }
        Err(e) => {
            warn!(error = %e, default = DEFAULT_INTERVAL_SECS, "Could not probe sar interval");
            DEFAULT_INTERVAL_SECS
        }
    }
}

/// Range each row represents: from the previous row's time to this one, or
/// one minute long for the first row.
///
/// An unparseable time yields an all-zero range and the next row is treated
/// as first again.
pub fn derive_intervals<'a>(times: impl IntoIterator<Item = &'a str>) -> Vec<TimeRange> {
    let mut previous: Option<Time> = None;
    times
        .into_iter()
        .map(|t| {
            let current = parse_time_of_day(t);
            let range = match (previous, current) {
                (_, None) => TimeRange::clamped(0, 0, 0, 0),
                (Some(start), Some(end)) => span(start, end),
                (None, Some(start)) => span(start, start + time::Duration::minutes(1)),
            };
            previous = current;
            range
        })
        .collect()
}

fn span(start: Time, end: Time) -> TimeRange {
    TimeRange {
        start_hour: start.hour(),
        start_min: start.minute(),
        end_hour: end.hour(),
        end_min: end.minute(),
    }
}
