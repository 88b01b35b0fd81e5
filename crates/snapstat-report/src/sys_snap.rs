//! The per-user sampling tool (`sys-snap.pl`): discovery, status, start and
//! the verbose report request.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::Serialize;
use snapstat_core::{SnapstatError, SnapstatResult};
use snapstat_runner::CommandSpec;
use time::macros::format_description;
use time::OffsetDateTime;
use tracing::{debug, info};

use crate::range::TimeRange;
use crate::snapshot::{parse_snapshot, SnapshotReport};
use crate::source::TextSource;

/// Executable name searched on `PATH`.
pub const SYS_SNAP_NAME: &str = "sys-snap.pl";

/// Locations tried when the tool is not on `PATH`.
pub const FALLBACK_PATHS: [&str; 4] = [
    "/opt/imh-sys-snap/bin/sys-snap.pl",
    "/root/sys-snap.pl",
    "/usr/local/bin/sys-snap.pl",
    "/usr/bin/sys-snap.pl",
];

pub const CHECK_TIMEOUT: Duration = Duration::from_secs(3);
pub const START_TIMEOUT: Duration = Duration::from_secs(5);
pub const ELAPSED_TIMEOUT: Duration = Duration::from_secs(3);

/// Freshness window of a cached report.
pub const REPORT_TTL: Duration = Duration::from_secs(60);

/// Shown when the report comes back empty or cannot be produced.
pub const NO_OUTPUT_MESSAGE: &str =
    "Could not get output from sys-snap. Check time range and try again.";

const DAY_SECONDS: u64 = 86_400;

static RUNNING_PID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Sys-snap is running, PID:\s*'(\d+)'").expect("static pattern")
});

/// Locate the tool.
///
/// An explicit path is used as given. Otherwise `PATH` is searched, then
/// [`FALLBACK_PATHS`] in order; the first executable file wins.
pub fn find_sys_snap(explicit: Option<&Path>) -> SnapstatResult<PathBuf> {
    let fallbacks: Vec<PathBuf> = FALLBACK_PATHS.iter().map(PathBuf::from).collect();
    resolve_tool(
        explicit,
        || which::which(SYS_SNAP_NAME).ok(),
        &fallbacks,
        is_executable_file,
    )
}

fn resolve_tool(
    explicit: Option<&Path>,
    search_path: impl FnOnce() -> Option<PathBuf>,
    fallbacks: &[PathBuf],
    usable: impl Fn(&Path) -> bool,
) -> SnapstatResult<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }

    if let Some(found) = search_path().filter(|p| usable(p)) {
        debug!(path = %found.display(), "Found sys-snap on PATH");
        return Ok(found);
    }

    if let Some(found) = fallbacks.iter().find(|p| usable(p)) {
        debug!(path = %found.display(), "Found sys-snap in fallback location");
        return Ok(found.clone());
    }

    let searched: Vec<String> = fallbacks
        .iter()
        .filter_map(|p| p.parent())
        .map(|d| format!("{}/", d.display()))
        .collect();
    Err(SnapstatError::missing_dependency(
        SYS_SNAP_NAME,
        format!(
            "install sys-snap and put {SYS_SNAP_NAME} on PATH or in one of: {}",
            searched.join(", ")
        ),
    ))
}

#[cfg(unix)]
fn is_executable_file(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable_file(path: &Path) -> bool {
    path.is_file()
}

/// Whether the tool is sampling, and for how long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapStatus {
    pub running: bool,
    pub pid: Option<u32>,
    pub elapsed_seconds: Option<u64>,
    /// [`format_elapsed`] of `elapsed_seconds`.
    pub elapsed: Option<String>,
}

impl SnapStatus {
    pub fn not_running() -> Self {
        Self {
            running: false,
            pid: None,
            elapsed_seconds: None,
            elapsed: None,
        }
    }

    fn with_elapsed(mut self, seconds: Option<u64>) -> Self {
        self.elapsed_seconds = seconds;
        self.elapsed = seconds.map(format_elapsed);
        self
    }
}

/// Interpret `--check` output.
pub fn parse_status(text: &str) -> SnapStatus {
    match RUNNING_PID
        .captures(text)
        .and_then(|c| c[1].parse::<u32>().ok())
    {
        Some(pid) => SnapStatus {
            running: true,
            pid: Some(pid),
            elapsed_seconds: None,
            elapsed: None,
        },
        None => SnapStatus::not_running(),
    }
}

/// `1d, 2h, 3m`. Days are omitted when zero; hours are omitted when days and
/// hours are both zero. Minutes are always shown.
pub fn format_elapsed(seconds: u64) -> String {
    let days = seconds / DAY_SECONDS;
    let hours = (seconds % DAY_SECONDS) / 3600;
    let mins = (seconds % 3600) / 60;

    let mut parts = Vec::with_capacity(3);
    if days > 0 {
        parts.push(format!("{days}d"));
    }
    if hours > 0 || days > 0 {
        parts.push(format!("{hours}h"));
    }
    parts.push(format!("{mins}m"));
    parts.join(", ")
}

/// Accept only an all-digit answer from `ps -o etimes=`.
pub fn parse_etimes(text: &str) -> Option<u64> {
    let trimmed = text.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}

/// Window shown above the snapshot report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DisplayWindow {
    pub start: String,
    pub end: String,
}

/// Heading window for the report.
///
/// While the tool has been running for less than a day the window covers
/// its actual run time ending at `now`; past a day it is the whole day.
/// Otherwise it is the requested range.
pub fn display_window(status: &SnapStatus, range: &TimeRange, now: OffsetDateTime) -> DisplayWindow {
    match status.elapsed_seconds {
        Some(elapsed) if status.running && elapsed < DAY_SECONDS => {
            let started = now - time::Duration::seconds(elapsed as i64);
            DisplayWindow {
                start: hh_mm(started),
                end: hh_mm(now),
            }
        }
        Some(_) if status.running => DisplayWindow {
            start: "00:00".to_string(),
            end: "23:59".to_string(),
        },
        _ => DisplayWindow {
            start: range.start_arg(),
            end: range.end_arg(),
        },
    }
}

fn hh_mm(at: OffsetDateTime) -> String {
    at.format(format_description!("[hour]:[minute]"))
        .unwrap_or_else(|_| format!("{:02}:{:02}", at.hour(), at.minute()))
}

/// The tool at a resolved path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysSnap {
    path: PathBuf,
}

impl SysSnap {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Resolve with [`find_sys_snap`].
    pub fn locate(explicit: Option<&Path>) -> SnapstatResult<Self> {
        find_sys_snap(explicit).map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn command(&self) -> CommandSpec {
        CommandSpec::new(self.path.to_string_lossy()).merge_stderr()
    }

    pub fn check_spec(&self) -> CommandSpec {
        self.command().arg("--check")
    }

    /// `--start`, answering its confirmation prompt.
    pub fn start_spec(&self) -> CommandSpec {
        self.command().arg("--start").stdin("y\n")
    }

    pub fn print_spec(&self, range: &TimeRange) -> CommandSpec {
        self.command()
            .arg("--print")
            .arg(range.start_arg())
            .arg(range.end_arg())
            .arg("-v")
    }

    /// Probe `--check`, then read the run time of a running tool.
    pub fn status(&self, source: &impl TextSource) -> SnapstatResult<SnapStatus> {
        let text = source.direct(&self.check_spec(), CHECK_TIMEOUT)?;
        let status = parse_status(&text);
        let Some(pid) = status.pid else {
            return Ok(status);
        };

        let ps = CommandSpec::new("ps").args(["-p", &pid.to_string(), "-o", "etimes="]);
        let elapsed = match source.direct(&ps, ELAPSED_TIMEOUT) {
            Ok(out) => parse_etimes(&out),
            Err(e) => {
                debug!(pid, error = %e, "Could not read sys-snap run time");
                None
            }
        };
        Ok(status.with_elapsed(elapsed))
    }

    /// Start sampling; returns the tool's own output verbatim.
    pub fn start(&self, source: &impl TextSource) -> SnapstatResult<String> {
        info!(path = %self.path.display(), "Starting sys-snap");
        source.direct(&self.start_spec(), START_TIMEOUT)
    }

    /// Cached verbose report for `range`, parsed.
    ///
    /// Empty output and timeouts surface as [`SnapstatError::Unavailable`]
    /// with [`NO_OUTPUT_MESSAGE`]; lock contention is passed through.
    pub fn report(
        &self,
        source: &impl TextSource,
        range: &TimeRange,
    ) -> SnapstatResult<SnapshotReport> {
        let text = source
            .cached(&range.cache_tag(), &self.print_spec(range), REPORT_TTL)
            .map_err(|e| match e {
                SnapstatError::EmptyOutput { .. } | SnapstatError::Timeout => {
                    SnapstatError::unavailable(NO_OUTPUT_MESSAGE)
                }
                other => other,
            })?;
        Ok(parse_snapshot(&text))
    }
}
