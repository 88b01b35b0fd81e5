//! Per-section outcomes handed to the presentation layer.

use std::path::{Path, PathBuf};

use serde::Serialize;
use snapstat_core::{ErrorKind, SnapstatError, SnapstatResult};
use time::OffsetDateTime;
use tracing::warn;

use crate::range::TimeRange;
use crate::sar::{activity_report, ActivityReport};
use crate::snapshot::{PieSlice, SnapshotReport};
use crate::source::TextSource;
use crate::sys_snap::{display_window, DisplayWindow, SnapStatus, SysSnap};

/// Either data or a message explaining why there is none.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Section<T> {
    Ready { data: T },
    Failed { kind: ErrorKind, message: String },
}

impl<T> Section<T> {
    pub fn failed(err: &SnapstatError) -> Self {
        Section::Failed {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, Section::Ready { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Section::Ready { data } => Some(data),
            Section::Failed { .. } => None,
        }
    }
}

impl<T> From<SnapstatResult<T>> for Section<T> {
    fn from(result: SnapstatResult<T>) -> Self {
        match result {
            Ok(data) => Section::Ready { data },
            Err(e) => Section::failed(&e),
        }
    }
}

/// Parsed snapshot plus what is needed to chart and title it.
#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    pub range: TimeRange,
    pub window: DisplayWindow,
    pub report: SnapshotReport,
    pub cpu_series: Vec<PieSlice>,
    pub memory_series: Vec<PieSlice>,
}

impl SnapshotView {
    pub fn new(report: SnapshotReport, range: TimeRange, window: DisplayWindow) -> Self {
        Self {
            cpu_series: report.cpu_series(),
            memory_series: report.memory_series(),
            range,
            window,
            report,
        }
    }
}

/// Everything one page shows.
#[derive(Debug, Clone, Serialize)]
pub struct PanelReport {
    pub status: Section<SnapStatus>,
    pub snapshot: Section<SnapshotView>,
    pub activity: Section<ActivityReport>,
}

/// Inputs for [`build_panel`].
#[derive(Debug, Clone)]
pub struct PanelRequest {
    pub sys_snap: Option<PathBuf>,
    pub sar: String,
    pub range: TimeRange,
    pub now: OffsetDateTime,
}

/// Snapshot for `range`, titled using `status`.
pub fn snapshot_view(
    source: &impl TextSource,
    tool: &SysSnap,
    status: &SnapStatus,
    range: TimeRange,
    now: OffsetDateTime,
) -> SnapstatResult<SnapshotView> {
    let report = tool.report(source, &range)?;
    Ok(SnapshotView::new(report, range, display_window(status, &range, now)))
}

/// Assemble all sections. A failing section never blocks the others.
pub fn build_panel(source: &impl TextSource, request: &PanelRequest) -> PanelReport {
    build_panel_with(source, request, |p| p.exists())
}

pub(crate) fn build_panel_with(
    source: &impl TextSource,
    request: &PanelRequest,
    log_exists: impl Fn(&Path) -> bool,
) -> PanelReport {
    let (status, snapshot) = match SysSnap::locate(request.sys_snap.as_deref()) {
        Ok(tool) => {
            let status = tool.status(source);
            let known = status
                .as_ref()
                .ok()
                .cloned()
                .unwrap_or_else(SnapStatus::not_running);
            let snapshot = snapshot_view(source, &tool, &known, request.range, request.now);
            (Section::from(status), Section::from(snapshot))
        }
        Err(e) => (Section::failed(&e), Section::failed(&e)),
    };

    let activity = Section::from(activity_report(
        source,
        &request.sar,
        request.now,
        log_exists,
    ));

    for (name, failure) in [
        ("status", failure_message(&status)),
        ("snapshot", failure_message(&snapshot)),
        ("activity", failure_message(&activity)),
    ] {
        if let Some(message) = failure {
            warn!(section = name, reason = message, "Panel section unavailable");
        }
    }

    PanelReport {
        status,
        snapshot,
        activity,
    }
}

fn failure_message<T>(section: &Section<T>) -> Option<&str> {
    match section {
        Section::Failed { message, .. } => Some(message),
        Section::Ready { .. } => None,
    }
}
