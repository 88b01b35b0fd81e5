//! Caller-supplied time range for the snapshot report.

use serde::Serialize;

/// Start and end time-of-day, minute resolution.
///
/// Always within range: hours 0-23, minutes 0-59.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start_hour: u8,
    pub start_min: u8,
    pub end_hour: u8,
    pub end_min: u8,
}

impl Default for TimeRange {
    /// The whole day, 00:00 to 23:59.
    fn default() -> Self {
        Self {
            start_hour: 0,
            start_min: 0,
            end_hour: 23,
            end_min: 59,
        }
    }
}

impl TimeRange {
    /// Build a range from untrusted integers, clamping each field.
    pub fn clamped(start_hour: i64, start_min: i64, end_hour: i64, end_min: i64) -> Self {
        Self {
            start_hour: clamp(start_hour, 23),
            start_min: clamp(start_min, 59),
            end_hour: clamp(end_hour, 23),
            end_min: clamp(end_min, 59),
        }
    }

    /// `HH:MM` for the snapshot tool's start argument.
    pub fn start_arg(&self) -> String {
        format!("{:02}:{:02}", self.start_hour, self.start_min)
    }

    /// `HH:MM` for the snapshot tool's end argument.
    pub fn end_arg(&self) -> String {
        format!("{:02}:{:02}", self.end_hour, self.end_min)
    }

    /// Cache tag for the snapshot report over this range.
    pub fn cache_tag(&self) -> String {
        format!(
            "sys_snap_{}_{}_{}_{}",
            self.start_hour, self.start_min, self.end_hour, self.end_min
        )
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

fn clamp(value: i64, max: u8) -> u8 {
    value.clamp(0, i64::from(max)) as u8
}
