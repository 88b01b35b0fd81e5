//! snapstat-report: Turning sys-snap and sar text into structured reports.
//!
//! This crate provides:
//! - The per-user snapshot parser ([`parse_snapshot`]) and chart series
//! - Locating, probing and starting the snapshot tool ([`SysSnap`])
//! - `sar` queue and paging parsing and the timestamp merge ([`merge_tables`])
//! - Daily log discovery ([`resolve_log_location`]) and interval estimation
//! - Time-cell ranges for each activity row ([`derive_intervals`])
//! - Per-section outcomes for the presentation layer ([`PanelReport`])
//!
//! All command output comes through [`TextSource`], which the keyed cache
//! implements. Parsers never fail; missing data is reported per section.
//!
//! # Example
//!
//! ```no_run
//! use snapstat_cache::{CacheConfig, KeyedCache, SystemClock};
//! use snapstat_report::{SysSnap, TimeRange};
//! use snapstat_runner::SystemRunner;
//!
//! let cache = KeyedCache::new(
//!     CacheConfig::new("/root/tmp/imh-snap-stat"),
//!     SystemRunner::default(),
//!     SystemClock,
//! )
//! .unwrap();
//!
//! let tool = SysSnap::locate(None).unwrap();
//! let report = tool.report(&cache, &TimeRange::clamped(9, 0, 10, 0)).unwrap();
//! for user in report.users() {
//!     println!("{} cpu={:?}", user.user, user.cpu_score);
//! }
//! ```

pub mod activity;
pub mod interval;
pub mod logpath;
pub mod panel;
pub mod range;
pub mod sar;
pub mod snapshot;
pub mod source;
pub mod sys_snap;

pub use activity::{
    merge_tables, parse_category, ActivityCategory, ActivityRow, ActivityTable, MERGE_COLUMNS,
};
pub use interval::{derive_intervals, estimate_interval, probe_interval, DEFAULT_INTERVAL_SECS};
pub use logpath::{resolve_log_location, DateStyle, SarLogLocation};
pub use panel::{build_panel, PanelReport, PanelRequest, Section, SnapshotView};
pub use range::TimeRange;
pub use sar::{
    activity_report, ActivityEntry, ActivityReport, ActivityReporter, FetchedBlocks, DEFAULT_SAR,
};
pub use snapshot::{clean_process_name, parse_snapshot, PieSlice, SnapshotReport, UserSnapshot};
pub use source::TextSource;
pub use sys_snap::{find_sys_snap, format_elapsed, parse_status, SnapStatus, SysSnap};

/// Current local time, or UTC when the local offset cannot be determined.
pub fn local_now() -> time::OffsetDateTime {
    time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc())
}
