//! Locating the daily `sar` log files.
//!
//! Distributions disagree on both the directory (`/var/log/sa` or
//! `/var/log/sysstat`) and the day suffix (`sa03` or `sa20250903`). The first
//! existing candidate fixes both for the whole request.

use std::path::Path;

use serde::Serialize;
use snapstat_core::{SnapstatError, SnapstatResult};
use time::Date;
use tracing::debug;

/// Path prefixes; the day suffix is appended directly.
pub const SAR_LOG_PREFIXES: [&str; 2] = ["/var/log/sa/sa", "/var/log/sysstat/sa"];

/// How log files are suffixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DateStyle {
    /// Day of month, `03`.
    Short,
    /// `20250903`.
    Long,
}

impl DateStyle {
    pub fn suffix(self, date: Date) -> String {
        match self {
            DateStyle::Short => format!("{:02}", date.day()),
            DateStyle::Long => format!(
                "{:04}{:02}{:02}",
                date.year(),
                u8::from(date.month()),
                date.day()
            ),
        }
    }
}

/// Resolved log convention plus the two days being read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SarLogLocation {
    pub prefix: String,
    pub style: DateStyle,
    pub today: Date,
    pub yesterday: Date,
}

impl SarLogLocation {
    pub fn today_suffix(&self) -> String {
        self.style.suffix(self.today)
    }

    pub fn yesterday_suffix(&self) -> String {
        self.style.suffix(self.yesterday)
    }

    pub fn today_path(&self) -> String {
        format!("{}{}", self.prefix, self.today_suffix())
    }

    pub fn yesterday_path(&self) -> String {
        format!("{}{}", self.prefix, self.yesterday_suffix())
    }
}

/// The day before `today`; the first representable day stays put.
pub fn previous_day(today: Date) -> Date {
    today.previous_day().unwrap_or(today)
}

/// Probe the known prefixes for a log of `today` or the day before.
///
/// Candidates per prefix, in order: yesterday short, today short, yesterday
/// long, today long.
pub fn resolve_log_location(
    today: Date,
    exists: impl Fn(&Path) -> bool,
) -> SnapstatResult<SarLogLocation> {
    let yesterday = previous_day(today);
    let candidates = [
        (DateStyle::Short, yesterday),
        (DateStyle::Short, today),
        (DateStyle::Long, yesterday),
        (DateStyle::Long, today),
    ];

    for prefix in SAR_LOG_PREFIXES {
        for (style, day) in candidates {
            let path = format!("{prefix}{}", style.suffix(day));
            if exists(Path::new(&path)) {
                debug!(path, ?style, "Found sar log");
                return Ok(SarLogLocation {
                    prefix: prefix.to_string(),
                    style,
                    today,
                    yesterday,
                });
            }
        }
    }

    Err(SnapstatError::missing_dependency(
        "sar log files",
        format!(
            "no log for {} or {} under {}",
            DateStyle::Long.suffix(yesterday),
            DateStyle::Long.suffix(today),
            SAR_LOG_PREFIXES.join(" or ")
        ),
    ))
}
