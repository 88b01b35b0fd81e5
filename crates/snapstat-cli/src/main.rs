use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use snapstat_cache::{CacheConfig, KeyedCache, SystemClock};
use snapstat_core::schema::{
    ACTIVITY_REPORT_V1, PANEL_REPORT_V1, SNAPSHOT_REPORT_V1, SNAP_STATUS_V1, SWEEP_RESULT_V1,
};
use snapstat_core::{ErrorKind, SnapstatError};
use snapstat_report::panel::snapshot_view;
use snapstat_report::{
    activity_report, build_panel, clean_process_name, local_now, probe_interval, ActivityReport,
    PanelReport, PanelRequest, SnapStatus, SnapshotView, SysSnap, TimeRange, DEFAULT_SAR,
};
use snapstat_runner::SystemRunner;
use time::OffsetDateTime;
use tracing::{info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Default cache directory for command output.
const DEFAULT_CACHE_DIR: &str = "/root/tmp/imh-snap-stat";

/// Per-user CPU/memory snapshots and sar activity for one server.
#[derive(Parser, Debug)]
#[command(name = "snapstat", version, about, long_about = None)]
struct Cli {
    /// The format for log output.
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    /// The minimum log level to display.
    #[arg(long, value_name = "LEVEL", default_value = "info")]
    log_level: tracing::Level,

    /// Directory holding cached command output.
    #[arg(long, value_name = "DIR", env = "SNAPSTAT_CACHE_DIR", default_value = DEFAULT_CACHE_DIR)]
    cache_dir: PathBuf,

    /// Path to sys-snap.pl (default: search PATH and common locations).
    #[arg(long, value_name = "PATH", env = "SNAPSTAT_SYS_SNAP")]
    sys_snap: Option<PathBuf>,

    /// sar executable.
    #[arg(long, value_name = "PATH", env = "SNAPSTAT_SAR", default_value = DEFAULT_SAR)]
    sar: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show whether sys-snap is running and for how long.
    Status(OutputArgs),

    /// Start sys-snap and print what it says.
    Start,

    /// Per-user CPU and memory scores for a time range.
    ///
    /// Output is JSON by default for automation, or table format for human
    /// consumption.
    Snapshot(SnapshotArgs),

    /// Trailing 24 hours of sar load average and paging statistics.
    ///
    /// Each row carries the time range that selects its sample in
    /// `snapstat snapshot`.
    Activity(OutputArgs),

    /// Print the estimated sar sampling interval in seconds.
    Interval,

    /// Delete expired cache entries.
    Sweep(SweepArgs),

    /// Status, snapshot and activity as one JSON document.
    Panel(RangeArgs),
}

#[derive(Args, Debug)]
struct OutputArgs {
    /// Output as JSON (default for automation).
    #[arg(long)]
    json: bool,

    /// Output as human-readable table.
    #[arg(long, conflicts_with = "json")]
    table: bool,
}

/// Time range; out-of-range values are clamped.
#[derive(Args, Debug)]
struct RangeArgs {
    /// Start hour (0-23).
    #[arg(long, value_name = "H", default_value_t = 0, allow_negative_numbers = true)]
    start_hour: i64,

    /// Start minute (0-59).
    #[arg(long, value_name = "M", default_value_t = 0, allow_negative_numbers = true)]
    start_min: i64,

    /// End hour (0-23).
    #[arg(long, value_name = "H", default_value_t = 23, allow_negative_numbers = true)]
    end_hour: i64,

    /// End minute (0-59).
    #[arg(long, value_name = "M", default_value_t = 59, allow_negative_numbers = true)]
    end_min: i64,
}

impl RangeArgs {
    fn range(&self) -> TimeRange {
        TimeRange::clamped(self.start_hour, self.start_min, self.end_hour, self.end_min)
    }
}

#[derive(Args, Debug)]
struct SnapshotArgs {
    #[command(flatten)]
    range: RangeArgs,

    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct SweepArgs {
    /// Output JSON result.
    #[arg(long)]
    json: bool,
}

#[derive(clap::ValueEnum, Clone, Debug, PartialEq, Eq)]
enum LogFormat {
    /// Human-readable text format.
    Text,
    /// Machine-readable JSON format.
    Json,
}

/// - 1: Any failure other than the ones below
/// - 127: sys-snap, sar, or the sar logs could not be found
mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const NOT_FOUND: i32 = 127;
}

fn main() {
    let cli = Cli::parse();

    // Initialize the tracing subscriber
    let filter = EnvFilter::from_default_env().add_directive(cli.log_level.into());

    match cli.log_format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .with(filter)
                .init();
        }
    }

    info!("Initialization complete. Starting main logic.");
    let Some(command) = cli.command else {
        println!("Cache directory: {}", cli.cache_dir.display());
        info!("Main logic finished.");
        return;
    };

    let settings = Settings {
        cache_dir: cli.cache_dir,
        sys_snap: cli.sys_snap,
        sar: cli.sar,
    };
    match run_command(&settings, command) {
        Ok(exit_code) => {
            info!("Main logic finished.");
            std::process::exit(exit_code);
        }
        Err(err) => {
            eprintln!("Error: {err}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn exit_code_for(err: &SnapstatError) -> i32 {
    match err.kind() {
        ErrorKind::Configuration => exit_codes::NOT_FOUND,
        ErrorKind::Transient | ErrorKind::Internal => exit_codes::FAILURE,
    }
}

/// Global options shared by every command.
struct Settings {
    cache_dir: PathBuf,
    sys_snap: Option<PathBuf>,
    sar: String,
}

type Cache = KeyedCache<SystemRunner, SystemClock>;

impl Settings {
    fn open_cache(&self) -> Result<Cache, SnapstatError> {
        KeyedCache::new(
            CacheConfig::new(&self.cache_dir),
            SystemRunner::default(),
            SystemClock,
        )
    }

    fn sys_snap(&self) -> Result<SysSnap, SnapstatError> {
        SysSnap::locate(self.sys_snap.as_deref())
    }
}

fn run_command(settings: &Settings, command: Command) -> Result<i32, SnapstatError> {
    // The local offset is only readable while no reader threads exist.
    let now = local_now();
    let cache = settings.open_cache()?;

    if !matches!(command, Command::Sweep(_)) {
        if let Err(e) = cache.sweep_expired() {
            warn!(error = %e, "Cache sweep failed");
        }
    }

    match command {
        Command::Status(args) => run_status(settings, &cache, args),
        Command::Start => run_start(settings, &cache),
        Command::Snapshot(args) => run_snapshot(settings, &cache, args, now),
        Command::Activity(args) => run_activity(settings, &cache, args, now),
        Command::Interval => {
            println!("{}", probe_interval(&cache, &settings.sar));
            Ok(exit_codes::SUCCESS)
        }
        Command::Sweep(args) => run_sweep(&cache, args),
        Command::Panel(args) => run_panel(settings, &cache, args, now),
    }
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).expect("serialize json")
    );
}

// ============================================================================
// Status / start
// ============================================================================

#[derive(Serialize)]
struct StatusJson<'a> {
    schema_id: &'static str,
    sys_snap: String,
    #[serde(flatten)]
    status: &'a SnapStatus,
}

fn run_status(settings: &Settings, cache: &Cache, args: OutputArgs) -> Result<i32, SnapstatError> {
    let tool = settings.sys_snap()?;
    let status = tool.status(cache)?;

    if args.table {
        println!("{}", status_line(&status));
    } else {
        print_json(&StatusJson {
            schema_id: SNAP_STATUS_V1,
            sys_snap: tool.path().display().to_string(),
            status: &status,
        });
    }
    Ok(exit_codes::SUCCESS)
}

fn status_line(status: &SnapStatus) -> String {
    if !status.running {
        return "Not Running".to_string();
    }
    let mut line = "Running".to_string();
    if let Some(elapsed) = &status.elapsed {
        line.push_str(&format!(" for {elapsed}"));
    }
    if let Some(pid) = status.pid {
        line.push_str(&format!("  PID: {pid}"));
    }
    line
}

fn run_start(settings: &Settings, cache: &Cache) -> Result<i32, SnapstatError> {
    let tool = settings.sys_snap()?;
    let output = tool.start(cache)?;
    print!("{output}");
    Ok(exit_codes::SUCCESS)
}

// ============================================================================
// Snapshot
// ============================================================================

#[derive(Serialize)]
struct SnapshotJson<'a> {
    schema_id: &'static str,
    #[serde(flatten)]
    view: &'a SnapshotView,
}

fn run_snapshot(
    settings: &Settings,
    cache: &Cache,
    args: SnapshotArgs,
    now: OffsetDateTime,
) -> Result<i32, SnapstatError> {
    let tool = settings.sys_snap()?;
    let status = tool.status(cache).unwrap_or_else(|e| {
        warn!(error = %e, "Could not read sys-snap status");
        SnapStatus::not_running()
    });
    let view = snapshot_view(cache, &tool, &status, args.range.range(), now)?;

    if args.output.table {
        print_snapshot_table(&view);
    } else {
        print_json(&SnapshotJson {
            schema_id: SNAPSHOT_REPORT_V1,
            view: &view,
        });
    }
    Ok(exit_codes::SUCCESS)
}

fn print_snapshot_table(view: &SnapshotView) {
    println!("Scores from {} to {}", view.window.start, view.window.end);
    println!();
    println!("{:<16} {:>10} {:>10}", "USER", "CPU", "MEMORY");
    println!("{:-<38}", "");

    if view.report.is_empty() {
        println!("(no users in range)");
        return;
    }

    for user in view.report.users() {
        println!(
            "{:<16} {:>10} {:>10}",
            truncate(&user.user, 16),
            user.cpu_score.as_deref().unwrap_or("-"),
            user.memory_score.as_deref().unwrap_or("-")
        );
    }

    for user in view.report.users() {
        println!();
        println!("== {} ==", user.user);
        for (label, list) in [("CPU", &user.cpu_list), ("MEMORY", &user.memory_list)] {
            if list.is_empty() {
                continue;
            }
            println!("{:>10}  {label} PROCESS", "SCORE");
            for entry in list {
                println!(
                    "{:>10}  {}",
                    entry.score,
                    truncate(clean_process_name(&entry.process), 100)
                );
            }
        }
    }
}

// ============================================================================
// Activity
// ============================================================================

#[derive(Serialize)]
struct ActivityJson<'a> {
    schema_id: &'static str,
    #[serde(flatten)]
    report: &'a ActivityReport,
}

fn run_activity(
    settings: &Settings,
    cache: &Cache,
    args: OutputArgs,
    now: OffsetDateTime,
) -> Result<i32, SnapstatError> {
    let report = activity_report(cache, &settings.sar, now, |p| p.exists())?;

    if args.table {
        print_activity_table(&report);
    } else {
        print_json(&ActivityJson {
            schema_id: ACTIVITY_REPORT_V1,
            report: &report,
        });
    }
    Ok(exit_codes::SUCCESS)
}

fn print_activity_table(report: &ActivityReport) {
    let widths: Vec<usize> = report
        .columns
        .iter()
        .enumerate()
        .map(|(i, name)| {
            report
                .rows
                .iter()
                .filter_map(|r| r.values.get(i))
                .map(|v| v.chars().count())
                .chain(std::iter::once(name.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let header: Vec<String> = report
        .columns
        .iter()
        .zip(widths.iter().copied())
        .map(|(c, w)| format!("{c:>w$}"))
        .collect();
    println!("{}  {:<11}", header.join(" "), "RANGE");

    for row in &report.rows {
        let cells: Vec<String> = row
            .values
            .iter()
            .zip(widths.iter().copied())
            .map(|(v, w)| format!("{v:>w$}"))
            .collect();
        let range = &row.interval;
        println!("{}  {}-{}", cells.join(" "), range.start_arg(), range.end_arg());
    }
    println!();
    println!("Pass a RANGE to `snapstat snapshot` to see who was busy in that interval.");
}

// ============================================================================
// Sweep / panel
// ============================================================================

#[derive(Serialize)]
struct SweepJson {
    schema_id: &'static str,
    removed: usize,
}

fn run_sweep(cache: &Cache, args: SweepArgs) -> Result<i32, SnapstatError> {
    let removed = cache.sweep_expired()?;
    if args.json {
        print_json(&SweepJson {
            schema_id: SWEEP_RESULT_V1,
            removed,
        });
    } else {
        println!("{removed}");
    }
    Ok(exit_codes::SUCCESS)
}

#[derive(Serialize)]
struct PanelJson<'a> {
    schema_id: &'static str,
    #[serde(flatten)]
    panel: &'a PanelReport,
}

fn run_panel(
    settings: &Settings,
    cache: &Cache,
    args: RangeArgs,
    now: OffsetDateTime,
) -> Result<i32, SnapstatError> {
    let request = PanelRequest {
        sys_snap: settings.sys_snap.clone(),
        sar: settings.sar.clone(),
        range: args.range(),
        now,
    };
    let panel = build_panel(cache, &request);
    print_json(&PanelJson {
        schema_id: PANEL_REPORT_V1,
        panel: &panel,
    });
    Ok(exit_codes::SUCCESS)
}

/// Truncate string to max characters (not bytes).
fn truncate(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &s[..byte_idx],
        None => s,
    }
}
