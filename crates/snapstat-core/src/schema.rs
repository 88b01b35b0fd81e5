//! Schema ID constants for JSON output contracts.
//!
//! Every snapstat JSON document includes a `schema_id` field so consumers
//! (the panel front end, scripts) can detect the shape they are reading.
//!
//! ## ID Structure
//!
//! ```text
//! snapstat/<topic>/<version>
//! ```
//!
//! Bump the version whenever a field is removed or changes meaning. Adding
//! optional fields does not require a bump.

/// Snapshot-tool status probe (`snapstat status`).
pub const SNAP_STATUS_V1: &str = "snapstat/snap-status/v1";

/// Parsed per-user snapshot report (`snapstat snapshot --json`).
pub const SNAPSHOT_REPORT_V1: &str = "snapstat/snapshot-report/v1";

/// Merged queue/paging activity report (`snapstat activity --json`).
pub const ACTIVITY_REPORT_V1: &str = "snapstat/activity-report/v1";

/// Combined panel document (`snapstat panel`).
pub const PANEL_REPORT_V1: &str = "snapstat/panel-report/v1";

/// Expiry sweep result (`snapstat sweep`).
pub const SWEEP_RESULT_V1: &str = "snapstat/sweep-result/v1";

/// Prefix shared by every schema id.
pub const SCHEMA_MODULE: &str = "snapstat";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_schema_ids_share_module_prefix() {
        for id in [
            SNAP_STATUS_V1,
            SNAPSHOT_REPORT_V1,
            ACTIVITY_REPORT_V1,
            PANEL_REPORT_V1,
            SWEEP_RESULT_V1,
        ] {
            assert!(id.starts_with(SCHEMA_MODULE), "bad prefix: {id}");
            assert!(id.ends_with("/v1"), "bad version: {id}");
        }
    }
}
