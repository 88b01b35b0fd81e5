//! Parsing and merging of `sar` activity reports.
//!
//! Each category (queue/load average, paging) arrives as one or more text
//! blocks, one per log file read. Blocks are filtered into candidate lines,
//! a header is picked (or defaulted), rows are split against it, and the
//! paging table is finally joined onto the queue table by timestamp.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// Label of the first column of every table.
pub const TIME_COLUMN: &str = "Time";

/// Paging columns joined onto the queue table.
pub const MERGE_COLUMNS: [&str; 4] = ["pgpgin/s", "pgpgout/s", "fault/s", "majflt/s"];

const QUEUE_DEFAULT_HEADER: [&str; 7] = [
    TIME_COLUMN,
    "runq-sz",
    "plist-sz",
    "ldavg-1",
    "ldavg-5",
    "ldavg-15",
    "blocked",
];

const PAGING_DEFAULT_HEADER: [&str; 10] = [
    TIME_COLUMN,
    "pgpgin/s",
    "pgpgout/s",
    "fault/s",
    "majflt/s",
    "pgfree/s",
    "pgscank/s",
    "pgscand/s",
    "pgsteal/s",
    "%vmeff",
];

static QUEUE_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"runq-sz\s+plist-sz\s+ldavg-1\s+ldavg-5\s+ldavg-15\s+blocked")
        .expect("static pattern")
});
static PAGING_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"pgpgin/s\s+pgpgout/s\s+fault/s\s+majflt/s").expect("static pattern")
});

/// Report category, selected by a `sar` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    /// `sar -q`: run queue and load averages.
    Queue,
    /// `sar -B`: paging.
    Paging,
}

impl ActivityCategory {
    pub fn flag(self) -> &'static str {
        match self {
            ActivityCategory::Queue => "-q",
            ActivityCategory::Paging => "-B",
        }
    }

    /// Cache-tag stem: `sar` plus the flag's alphanumerics (`sarq`, `sarB`).
    pub fn tag_stem(self) -> String {
        let letters: String = self.flag().chars().filter(|c| c.is_ascii_alphanumeric()).collect();
        format!("sar{letters}")
    }

    fn header_pattern(self) -> &'static Regex {
        match self {
            ActivityCategory::Queue => &QUEUE_HEADER,
            ActivityCategory::Paging => &PAGING_HEADER,
        }
    }

    pub fn default_header(self) -> Vec<String> {
        let header: &[&str] = match self {
            ActivityCategory::Queue => &QUEUE_DEFAULT_HEADER,
            ActivityCategory::Paging => &PAGING_DEFAULT_HEADER,
        };
        header.iter().map(|c| c.to_string()).collect()
    }

    fn is_header(self, line: &str) -> bool {
        self.header_pattern().is_match(line)
    }
}

/// One sample: values aligned with the table's columns, time first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityRow {
    pub values: Vec<String>,
}

impl ActivityRow {
    pub fn time(&self) -> &str {
        self.values.first().map(String::as_str).unwrap_or("")
    }
}

/// Fixed-shape table: every row has exactly `columns.len()` values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActivityTable {
    pub columns: Vec<String>,
    pub rows: Vec<ActivityRow>,
    /// False when no header line was found and the default was used.
    #[serde(skip)]
    pub header_found: bool,
}

impl ActivityTable {
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Value of `column` in `row`.
    pub fn value(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row)?.values.get(col).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Drop blank lines, `Average:` summaries, kernel banners, and every header
/// line after the first one.
pub fn filter_lines<S: AsRef<str>>(blocks: &[S], category: ActivityCategory) -> Vec<String> {
    let mut kept = Vec::new();
    let mut header_seen = false;

    for block in blocks {
        for line in block.as_ref().lines() {
            let trimmed = line.trim();
            if trimmed.is_empty()
                || trimmed.starts_with("Average:")
                || trimmed.starts_with("Linux")
            {
                continue;
            }
            if category.is_header(trimmed) {
                if header_seen {
                    continue;
                }
                header_seen = true;
            }
            kept.push(trimmed.to_string());
        }
    }
    kept
}

fn is_meridiem(token: &str) -> bool {
    token.eq_ignore_ascii_case("AM") || token.eq_ignore_ascii_case("PM")
}

/// Split a line into its time key and the remaining fields. A 12-hour
/// `AM`/`PM` marker is folded into the time key.
fn split_fields(line: &str) -> Option<(String, Vec<&str>)> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    if tokens.is_empty() {
        return None;
    }
    let time = if tokens.len() > 1 && is_meridiem(tokens[1]) {
        let joined = format!("{} {}", tokens[0], tokens[1]);
        tokens.drain(..2);
        joined
    } else {
        tokens.remove(0).to_string()
    };
    Some((time, tokens))
}

/// Column list from the first header line, or the category default.
fn extract_header(lines: &[String], category: ActivityCategory) -> Option<Vec<String>> {
    let line = lines.iter().find(|l| category.is_header(l))?;
    let (_, rest) = split_fields(line)?;
    let mut columns = Vec::with_capacity(rest.len() + 1);
    columns.push(TIME_COLUMN.to_string());
    columns.extend(rest.into_iter().map(str::to_string));
    Some(columns)
}

/// Parse filtered lines of one category into a table.
///
/// Rows with fewer fields than the header are dropped; extra trailing fields
/// are ignored. Header lines are never rows.
pub fn parse_table(lines: &[String], category: ActivityCategory) -> ActivityTable {
    let (columns, header_found) = match extract_header(lines, category) {
        Some(columns) => (columns, true),
        None => (category.default_header(), false),
    };
    let width = columns.len();

    let rows = lines
        .iter()
        .filter(|l| !category.is_header(l))
        .filter_map(|l| split_fields(l))
        .filter(|(_, rest)| rest.len() + 1 >= width)
        .map(|(time, rest)| {
            let mut values = Vec::with_capacity(width);
            values.push(time);
            values.extend(rest.into_iter().take(width - 1).map(str::to_string));
            ActivityRow { values }
        })
        .collect();

    ActivityTable {
        columns,
        rows,
        header_found,
    }
}

/// Filter and parse the fetched blocks of one category.
pub fn parse_category<S: AsRef<str>>(blocks: &[S], category: ActivityCategory) -> ActivityTable {
    parse_table(&filter_lines(blocks, category), category)
}

/// Join [`MERGE_COLUMNS`] of `paging` onto `queue` by exact time string.
///
/// Queue row order is kept. Times with no paging sample, and merge columns
/// the paging table lacks, get empty strings. Merge columns already present
/// in the queue table are not duplicated.
pub fn merge_tables(queue: &ActivityTable, paging: &ActivityTable) -> ActivityTable {
    let extra: Vec<&str> = MERGE_COLUMNS
        .iter()
        .copied()
        .filter(|c| queue.column_index(c).is_none())
        .collect();
    let extra_index: Vec<Option<usize>> = extra.iter().map(|c| paging.column_index(c)).collect();

    let by_time: HashMap<&str, &ActivityRow> =
        paging.rows.iter().map(|r| (r.time(), r)).collect();

    let rows = queue
        .rows
        .iter()
        .map(|row| {
            let matched = by_time.get(row.time());
            let mut values = row.values.clone();
            values.extend(extra_index.iter().map(|idx| {
                matched
                    .zip(*idx)
                    .and_then(|(r, i)| r.values.get(i).cloned())
                    .unwrap_or_default()
            }));
            ActivityRow { values }
        })
        .collect();

    let mut columns = queue.columns.clone();
    columns.extend(extra.iter().map(|c| c.to_string()));

    ActivityTable {
        columns,
        rows,
        header_found: queue.header_found,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QUEUE_YESTERDAY: &str = "\
Linux 5.14.0-362.el9.x86_64 (web01) \t09/02/2025 \t_x86_64_\t(8 CPU)

14:30:01      runq-sz  plist-sz   ldavg-1   ldavg-5  ldavg-15   blocked
14:40:01            1       412      0.22      0.31      0.35         0
14:50:01            0       409      0.18      0.27      0.33         0
Average:            0       410      0.20      0.29      0.34         0
";

    const QUEUE_TODAY: &str = "\
Linux 5.14.0-362.el9.x86_64 (web01) \t09/03/2025 \t_x86_64_\t(8 CPU)

00:00:01      runq-sz  plist-sz   ldavg-1   ldavg-5  ldavg-15   blocked
00:10:01            2       415      0.40      0.35      0.30         1
";

    #[test]
    fn filter_keeps_only_first_header() {
        let lines = filter_lines(&[QUEUE_YESTERDAY, QUEUE_TODAY], ActivityCategory::Queue);
        let headers = lines.iter().filter(|l| l.contains("runq-sz")).count();
        assert_eq!(headers, 1);
        assert!(lines.iter().all(|l| !l.starts_with("Linux")));
        assert!(lines.iter().all(|l| !l.starts_with("Average:")));
        assert!(lines.iter().all(|l| !l.is_empty()));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn parse_category_spans_both_blocks() {
        let table = parse_category(&[QUEUE_YESTERDAY, QUEUE_TODAY], ActivityCategory::Queue);
        assert!(table.header_found);
        assert_eq!(table.columns, ActivityCategory::Queue.default_header());
        let times: Vec<&str> = table.rows.iter().map(|r| r.time()).collect();
        assert_eq!(times, ["14:40:01", "14:50:01", "00:10:01"]);
        assert_eq!(table.value(2, "blocked"), Some("1"));
        assert_eq!(table.value(0, "ldavg-5"), Some("0.31"));
    }

    #[test]
    fn header_from_second_block_when_first_is_empty() {
        let table = parse_category(&["", QUEUE_TODAY], ActivityCategory::Queue);
        assert!(table.header_found);
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn missing_header_falls_back_to_default() {
        let table = parse_category(
            &["10:00:01 1 200 0.10 0.20 0.30 0\n"],
            ActivityCategory::Queue,
        );
        assert!(!table.header_found);
        assert_eq!(table.columns.len(), 7);
        assert_eq!(table.columns[0], "Time");
        assert_eq!(table.rows.len(), 1);
    }

    #[test]
    fn short_rows_are_dropped_and_long_rows_truncated() {
        let text = "\
10:00:01 1 200 0.10
10:10:01 1 200 0.10 0.20 0.30 0 extra
10:20:01      LINUX RESTART      (8 CPU)
";
        let table = parse_category(&[text], ActivityCategory::Queue);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].values.len(), 7);
        assert_eq!(table.rows[0].time(), "10:10:01");
    }

    #[test]
    fn twelve_hour_times_join_meridiem() {
        let text = "\
02:30:01 PM   runq-sz  plist-sz   ldavg-1   ldavg-5  ldavg-15   blocked
02:40:01 PM         1       412      0.22      0.31      0.35         0
";
        let table = parse_category(&[text], ActivityCategory::Queue);
        assert_eq!(table.columns, ActivityCategory::Queue.default_header());
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0].time(), "02:40:01 PM");
        assert_eq!(table.value(0, "runq-sz"), Some("1"));
    }

    #[test]
    fn paging_header_is_detected() {
        let text = "\
14:30:01     pgpgin/s pgpgout/s   fault/s  majflt/s  pgfree/s pgscank/s pgscand/s pgsteal/s    %vmeff
14:40:01         0.52     41.07    812.33      0.01    395.20      0.00      0.00      0.00      0.00
";
        let table = parse_category(&[text], ActivityCategory::Paging);
        assert!(table.header_found);
        assert_eq!(table.columns.len(), 10);
        assert_eq!(table.value(0, "fault/s"), Some("812.33"));
    }

    #[test]
    fn merge_joins_paging_by_time() {
        let queue = parse_category(
            &["10:00:01 1 200 0.10 0.20 0.30 0\n10:00:02 2 201 0.11 0.21 0.31 0\n"],
            ActivityCategory::Queue,
        );
        let paging = parse_category(
            &["10:00:02 1.5 2.5 3.5 0.5 9.0 0.0 0.0 0.0 0.0\n"],
            ActivityCategory::Paging,
        );

        let merged = merge_tables(&queue, &paging);
        assert_eq!(merged.rows.len(), 2);
        assert_eq!(merged.columns.len(), 7 + MERGE_COLUMNS.len());
        assert_eq!(&merged.columns[7..], MERGE_COLUMNS);

        for column in MERGE_COLUMNS {
            assert_eq!(merged.value(0, column), Some(""));
        }
        assert_eq!(merged.value(1, "pgpgin/s"), Some("1.5"));
        assert_eq!(merged.value(1, "pgpgout/s"), Some("2.5"));
        assert_eq!(merged.value(1, "fault/s"), Some("3.5"));
        assert_eq!(merged.value(1, "majflt/s"), Some("0.5"));
    }

    #[test]
    fn merge_with_no_paging_rows_keeps_queue_rows() {
        let queue = parse_category(&["10:00:01 1 200 0.10 0.20 0.30 0\n"], ActivityCategory::Queue);
        let merged = merge_tables(&queue, &ActivityTable::default());
        assert_eq!(merged.rows.len(), 1);
        assert!(merged.rows[0].values.iter().skip(7).all(String::is_empty));
    }

    #[test]
    fn tag_stems() {
        assert_eq!(ActivityCategory::Queue.tag_stem(), "sarq");
        assert_eq!(ActivityCategory::Paging.tag_stem(), "sarB");
    }
}
