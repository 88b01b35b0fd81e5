//! Parser for the snapshot tool's verbose per-user report.
//!
//! The report is a sequence of blocks:
//!
//! ```text
//! user: alice
//!     cpu-score: 12.50
//!         C: 8.00 proc: | \_ /usr/sbin/httpd -k start
//!         C: 4.50 proc: php-fpm: pool www
//!     memory-score: 3.10
//!         M: 3.10 proc: mysqld
//! ```
//!
//! Lines are classified by a small state machine. A `user:` marker starts (or
//! restarts) a user; a score marker selects the CPU or memory section; ranked
//! process lines are only accepted inside the matching section. Anything else
//! is ignored.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::Serialize;

static USER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^user:\s+(\S+)").expect("static pattern"));
static CPU_SCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"cpu-score:\s+([0-9.]+)").expect("static pattern"));
static MEMORY_SCORE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"memory-score:\s+([0-9.]+)").expect("static pattern"));
static CPU_PROCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"C:\s*([0-9.]+)\s*proc:\s*(.*)$").expect("static pattern"));
static MEMORY_PROCESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"M:\s*([0-9.]+)\s*proc:\s*(.*)$").expect("static pattern"));

/// One ranked process line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreEntry {
    /// Score exactly as printed (decimal text).
    pub score: String,
    /// Process description as printed, tree decoration included.
    pub process: String,
}

/// Everything the report says about one user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSnapshot {
    pub user: String,
    pub cpu_score: Option<String>,
    pub memory_score: Option<String>,
    /// CPU-ranked processes in source order.
    pub cpu_list: Vec<ScoreEntry>,
    /// Memory-ranked processes in source order.
    pub memory_list: Vec<ScoreEntry>,
}

impl UserSnapshot {
    fn new(user: String) -> Self {
        Self {
            user,
            cpu_score: None,
            memory_score: None,
            cpu_list: Vec::new(),
            memory_list: Vec::new(),
        }
    }

    /// CPU score as a number; missing or malformed counts as zero.
    pub fn cpu_value(&self) -> f64 {
        score_value(self.cpu_score.as_deref())
    }

    /// Memory score as a number; missing or malformed counts as zero.
    pub fn memory_value(&self) -> f64 {
        score_value(self.memory_score.as_deref())
    }
}

/// One slice of a per-user pie chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PieSlice {
    pub user: String,
    pub score: f64,
}

/// Parsed report: users in the order they first appear.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SnapshotReport {
    users: Vec<UserSnapshot>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl SnapshotReport {
    pub fn users(&self) -> &[UserSnapshot] {
        &self.users
    }

    pub fn get(&self, user: &str) -> Option<&UserSnapshot> {
        self.index.get(user).map(|&i| &self.users[i])
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// CPU pie series, in report order.
    pub fn cpu_series(&self) -> Vec<PieSlice> {
        self.users
            .iter()
            .map(|u| PieSlice {
                user: u.user.clone(),
                score: u.cpu_value(),
            })
            .collect()
    }

    /// Memory pie series, highest score first (ties keep report order).
    pub fn memory_series(&self) -> Vec<PieSlice> {
        let mut series: Vec<PieSlice> = self
            .users
            .iter()
            .map(|u| PieSlice {
                user: u.user.clone(),
                score: u.memory_value(),
            })
            .collect();
        series.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
        series
    }

    /// Start a fresh entry for `user`, replacing any earlier one in place.
    fn restart_user(&mut self, user: String) -> usize {
        if let Some(&i) = self.index.get(&user) {
            self.users[i] = UserSnapshot::new(user);
            return i;
        }
        let i = self.users.len();
        self.index.insert(user.clone(), i);
        self.users.push(UserSnapshot::new(user));
        i
    }
}

/// Parser position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    NoUser,
    AwaitingSection { user: usize },
    InCpuSection { user: usize },
    InMemorySection { user: usize },
}

impl ParseState {
    fn user(self) -> Option<usize> {
        match self {
            ParseState::NoUser => None,
            ParseState::AwaitingSection { user }
            | ParseState::InCpuSection { user }
            | ParseState::InMemorySection { user } => Some(user),
        }
    }
}

/// What a single line turned out to be.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LineMatch {
    User(String),
    CpuScore(String),
    MemoryScore(String),
    CpuProcess(ScoreEntry),
    MemoryProcess(ScoreEntry),
}

/// Classify `line` given the current state. Matchers are tried in priority
/// order; only the user marker is meaningful without a current user.
fn classify(state: ParseState, line: &str) -> Option<LineMatch> {
    if let Some(c) = USER_MARKER.captures(line) {
        return Some(LineMatch::User(c[1].to_string()));
    }
    state.user()?;

    if let Some(c) = CPU_SCORE.captures(line) {
        return Some(LineMatch::CpuScore(c[1].to_string()));
    }
    if let Some(c) = MEMORY_SCORE.captures(line) {
        return Some(LineMatch::MemoryScore(c[1].to_string()));
    }

    let trimmed = line.trim();
    match state {
        ParseState::InCpuSection { .. } => CPU_PROCESS
            .captures(trimmed)
            .map(|c| LineMatch::CpuProcess(entry(&c))),
        ParseState::InMemorySection { .. } => MEMORY_PROCESS
            .captures(trimmed)
            .map(|c| LineMatch::MemoryProcess(entry(&c))),
        _ => None,
    }
}

fn entry(c: &Captures<'_>) -> ScoreEntry {
    ScoreEntry {
        score: c[1].to_string(),
        process: c[2].to_string(),
    }
}

/// Apply a classified line and return the next state.
fn apply(report: &mut SnapshotReport, state: ParseState, line: LineMatch) -> ParseState {
    match (line, state.user()) {
        (LineMatch::User(name), _) => ParseState::AwaitingSection {
            user: report.restart_user(name),
        },
        (LineMatch::CpuScore(score), Some(user)) => {
            report.users[user].cpu_score = Some(score);
            ParseState::InCpuSection { user }
        }
        (LineMatch::MemoryScore(score), Some(user)) => {
            report.users[user].memory_score = Some(score);
            ParseState::InMemorySection { user }
        }
        (LineMatch::CpuProcess(entry), Some(user)) => {
            report.users[user].cpu_list.push(entry);
            state
        }
        (LineMatch::MemoryProcess(entry), Some(user)) => {
            report.users[user].memory_list.push(entry);
            state
        }
        (_, None) => state,
    }
}

/// Parse the snapshot tool's verbose report.
///
/// Never fails: unrecognized lines are skipped.
pub fn parse_snapshot(text: &str) -> SnapshotReport {
    let mut report = SnapshotReport::default();
    let mut state = ParseState::NoUser;
    for line in text.lines() {
        if let Some(matched) = classify(state, line) {
            state = apply(&mut report, state, matched);
        }
    }
    report
}

/// Strip leading tree decoration (`|`, `\`, `_`, whitespace, in any mix)
/// from a process description.
pub fn clean_process_name(process: &str) -> &str {
    process.trim_start_matches(|c: char| c == '|' || c == '\\' || c == '_' || c.is_whitespace())
}

fn score_value(score: Option<&str>) -> f64 {
    score.and_then(|s| s.parse().ok()).unwrap_or(0.0)
}
