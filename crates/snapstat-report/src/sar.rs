//! Trailing-24-hour activity report assembled from two daily `sar` logs.

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use snapstat_core::{ErrorKind, SnapstatError, SnapstatResult};
use snapstat_runner::CommandSpec;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

use crate::activity::{merge_tables, parse_category, ActivityCategory, ActivityTable};
use crate::interval::{derive_intervals, probe_interval};
use crate::logpath::{resolve_log_location, SarLogLocation};
use crate::range::TimeRange;
use crate::source::TextSource;

/// Default activity-reporting executable.
pub const DEFAULT_SAR: &str = "sar";

/// Yesterday's log no longer changes.
pub const YESTERDAY_TTL: Duration = Duration::from_secs(24 * 3600);

/// Shown when the queue report has no usable rows.
pub const NO_DATA_MESSAGE: &str = "Could not get sar data";

/// One displayed row and the range its time cell selects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub values: Vec<String>,
    pub interval: TimeRange,
}

/// Merged queue + paging report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityReport {
    pub columns: Vec<String>,
    pub rows: Vec<ActivityEntry>,
    pub interval_seconds: u64,
    pub log: SarLogLocation,
}

/// Text of both windows of one category.
#[derive(Debug, Default)]
pub struct FetchedBlocks {
    pub blocks: Vec<String>,
    /// First fetch error that retrying cannot fix (sar missing or not
    /// executable).
    pub setup_error: Option<SnapstatError>,
}

/// Fetches both categories for one request.
pub struct ActivityReporter<'a, S> {
    source: &'a S,
    sar: String,
    location: SarLogLocation,
    now: OffsetDateTime,
    interval_seconds: u64,
}

impl<'a, S: TextSource> ActivityReporter<'a, S> {
    pub fn new(
        source: &'a S,
        sar: impl Into<String>,
        location: SarLogLocation,
        now: OffsetDateTime,
        interval_seconds: u64,
    ) -> Self {
        Self {
            source,
            sar: sar.into(),
            location,
            now,
            interval_seconds,
        }
    }

    fn clock(&self) -> String {
        format!(
            "{:02}:{:02}:{:02}",
            self.now.hour(),
            self.now.minute(),
            self.now.second()
        )
    }

    /// Cache tag for yesterday's window.
    pub fn yesterday_tag(&self, category: ActivityCategory) -> String {
        format!(
            "{}_yesterday_{}",
            category.tag_stem(),
            self.location.yesterday_suffix()
        )
    }

    /// Cache tag for today's window, bucketed to ten minutes.
    pub fn today_tag(&self, category: ActivityCategory) -> String {
        format!(
            "{}_today_{}_h{:02}_m{}",
            category.tag_stem(),
            self.location.today_suffix(),
            self.now.hour(),
            self.now.minute() / 10 * 10
        )
    }

    /// `sar <flag> -f <log> <bound> <now>`.
    pub fn command(&self, category: ActivityCategory, log: &str, bound: &str) -> CommandSpec {
        let clock = self.clock();
        CommandSpec::new(&self.sar)
            .args([category.flag(), "-f", log, bound, clock.as_str()])
            .env("LC_ALL", "C")
    }

    /// Yesterday from now until midnight, then today up to now.
    ///
    /// A failed fetch contributes an empty block. Configuration errors are
    /// also kept so the caller can report them instead of "no data".
    pub fn fetch_blocks(&self, category: ActivityCategory) -> FetchedBlocks {
        let fetches = [
            (
                self.yesterday_tag(category),
                self.command(category, &self.location.yesterday_path(), "-s"),
                YESTERDAY_TTL,
            ),
            (
                self.today_tag(category),
                self.command(category, &self.location.today_path(), "-e"),
                Duration::from_secs(self.interval_seconds),
            ),
        ];

        let mut fetched = FetchedBlocks::default();
        for (tag, spec, ttl) in fetches {
            match self.source.cached(&tag, &spec, ttl) {
                Ok(text) => fetched.blocks.push(text),
                Err(e) => {
                    warn!(tag, error = %e, "sar fetch failed");
                    if e.kind() == ErrorKind::Configuration && fetched.setup_error.is_none() {
                        fetched.setup_error = Some(e);
                    }
                    fetched.blocks.push(String::new());
                }
            }
        }
        fetched
    }

    /// Parsed table for `category`.
    ///
    /// An empty table caused by a configuration error returns that error.
    pub fn table(&self, category: ActivityCategory) -> SnapstatResult<ActivityTable> {
        let fetched = self.fetch_blocks(category);
        let table = parse_category(&fetched.blocks, category);
        if table.is_empty() {
            if let Some(e) = fetched.setup_error {
                return Err(e);
            }
        }
        if !table.header_found {
            debug!(?category, "No sar header found, using default columns");
        }
        Ok(table)
    }

    /// Queue rows with paging columns merged in.
    ///
    /// Without queue rows the report is [`SnapstatError::Unavailable`], or
    /// the configuration error that emptied it. Paging is not fetched at all
    /// in that case.
    pub fn report(&self) -> SnapstatResult<ActivityReport> {
        let queue = self.table(ActivityCategory::Queue)?;
        if queue.is_empty() {
            return Err(SnapstatError::unavailable(NO_DATA_MESSAGE));
        }
        let paging = self.table(ActivityCategory::Paging).unwrap_or_default();
        let merged = merge_tables(&queue, &paging);
        info!(rows = merged.rows.len(), "Assembled activity report");

        let intervals = derive_intervals(merged.rows.iter().map(|r| r.time()));
        let rows = merged
            .rows
            .into_iter()
            .zip(intervals)
            .map(|(row, interval)| ActivityEntry {
                values: row.values,
                interval,
            })
            .collect();

        Ok(ActivityReport {
            columns: merged.columns,
            rows,
            interval_seconds: self.interval_seconds,
            log: self.location.clone(),
        })
    }
}

/// Resolve the logs, probe the interval, and build the report for `now`.
pub fn activity_report(
    source: &impl TextSource,
    sar: &str,
    now: OffsetDateTime,
    exists: impl Fn(&Path) -> bool,
) -> SnapstatResult<ActivityReport> {
    let location = resolve_log_location(now.date(), exists)?;
    let interval = probe_interval(source, sar);
    ActivityReporter::new(source, sar, location, now, interval).report()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logpath::DateStyle;
    use crate::source::fixture::FixtureSource;
    use time::macros::{date, datetime};

    const NOW: OffsetDateTime = datetime!(2025-09-03 14:47:12 UTC);

    fn location() -> SarLogLocation {
        SarLogLocation {
            prefix: "/var/log/sa/sa".into(),
            style: DateStyle::Short,
            today: date!(2025 - 09 - 03),
            yesterday: date!(2025 - 09 - 02),
        }
    }

    const Q_YESTERDAY: &str = "\
14:40:01      runq-sz  plist-sz   ldavg-1   ldavg-5  ldavg-15   blocked
14:50:01            1       412      0.22      0.31      0.35         0
";
    const Q_TODAY: &str = "\
00:00:01      runq-sz  plist-sz   ldavg-1   ldavg-5  ldavg-15   blocked
00:10:01            2       415      0.40      0.35      0.30         1
";
    const B_TODAY: &str = "\
00:00:01     pgpgin/s pgpgout/s   fault/s  majflt/s  pgfree/s pgscank/s pgscand/s pgsteal/s    %vmeff
00:10:01         0.52     41.07    812.33      0.01    395.20      0.00      0.00      0.00      0.00
";

    #[test]
    fn tags_follow_day_and_bucket() {
        let source = FixtureSource::default();
        let reporter = ActivityReporter::new(&source, "sar", location(), NOW, 600);
        assert_eq!(reporter.yesterday_tag(ActivityCategory::Queue), "sarq_yesterday_02");
        assert_eq!(reporter.today_tag(ActivityCategory::Paging), "sarB_today_03_h14_m40");
    }

    #[test]
    fn commands_bound_by_current_time() {
        let source = FixtureSource::default();
        let reporter = ActivityReporter::new(&source, "sar", location(), NOW, 600);
        let spec = reporter.command(ActivityCategory::Queue, "/var/log/sa/sa02", "-s");
        assert_eq!(spec.to_string(), "sar -q -f /var/log/sa/sa02 -s 14:47:12");
        assert_eq!(spec.get_envs(), [("LC_ALL".to_string(), "C".to_string())]);
    }

    #[test]
    fn report_merges_and_derives_intervals() {
        let source = FixtureSource::default()
            .answer("sar -q -f /var/log/sa/sa02 -s 14:47:12", Q_YESTERDAY)
            .answer("sar -q -f /var/log/sa/sa03 -e 14:47:12", Q_TODAY)
            .answer("sar -B -f /var/log/sa/sa03 -e 14:47:12", B_TODAY);
        let reporter = ActivityReporter::new(&source, "sar", location(), NOW, 600);

        let report = reporter.report().unwrap();
        assert_eq!(report.columns.len(), 11);
        assert_eq!(report.rows.len(), 2);

        let first = &report.rows[0];
        assert_eq!(first.values[0], "14:50:01");
        assert!(first.values[7..].iter().all(String::is_empty));
        assert_eq!(first.interval, TimeRange::clamped(14, 50, 14, 51));

        let second = &report.rows[1];
        assert_eq!(second.values[0], "00:10:01");
        assert_eq!(second.values[7], "0.52");
        assert_eq!(second.interval, TimeRange::clamped(14, 50, 0, 10));

        let tags = source.tags.lock().unwrap();
        let ttls: Vec<u64> = tags.iter().map(|(_, ttl)| ttl.as_secs()).collect();
        assert_eq!(ttls, [86_400, 600, 86_400, 600]);
    }

    #[test]
    fn no_queue_rows_is_unavailable_and_skips_paging() {
        let source = FixtureSource::default()
            .answer("sar -B -f /var/log/sa/sa03 -e 14:47:12", B_TODAY);
        let reporter = ActivityReporter::new(&source, "sar", location(), NOW, 600);

        let err = reporter.report().unwrap_err();
        assert_eq!(err.to_string(), NO_DATA_MESSAGE);
        assert!(err.is_transient());
        assert_eq!(source.tags.lock().unwrap().len(), 2);
    }

    #[test]
    fn missing_sar_is_a_configuration_error() {
        let source = FixtureSource::default().without_program("/opt/sysstat/bin/sar");
        let reporter =
            ActivityReporter::new(&source, "/opt/sysstat/bin/sar", location(), NOW, 600);

        let err = reporter.report().unwrap_err();
        assert!(matches!(err, SnapstatError::NotFoundCommand { .. }));
        assert_eq!(err.kind(), ErrorKind::Configuration);
        // paging is never fetched without queue rows
        assert!(source
            .commands
            .lock()
            .unwrap()
            .iter()
            .all(|c| c.get_args()[0] == "-q"));
    }

    #[test]
    fn empty_window_degrades_without_setup_error() {
        let source = FixtureSource::default()
            .answer("sar -q -f /var/log/sa/sa03 -e 14:47:12", Q_TODAY)
            .answer("sar -B -f /var/log/sa/sa03 -e 14:47:12", B_TODAY);
        let reporter = ActivityReporter::new(&source, "sar", location(), NOW, 600);

        let fetched = reporter.fetch_blocks(ActivityCategory::Queue);
        assert!(fetched.setup_error.is_none());
        assert_eq!(fetched.blocks[0], "");

        let report = reporter.report().unwrap();
        assert_eq!(report.rows.len(), 1);
    }

    #[test]
    fn missing_logs_stop_before_any_command() {
        let source = FixtureSource::default();
        let err = activity_report(&source, "sar", NOW, |_| false).unwrap_err();
        assert!(matches!(err, SnapstatError::MissingDependency { .. }));
        assert!(source.commands.lock().unwrap().is_empty());
    }
}
