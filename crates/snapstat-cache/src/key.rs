//! Cache-key derivation.
//!
//! Tags are caller-chosen strings (`sys_snap_0_0_23_59`,
//! `sarq_today_20250903_h14_m40`). A key is the tag restricted to
//! `[A-Za-z0-9_-]`, truncated, and suffixed with a digest of the *original*
//! tag so two tags that sanitize or truncate to the same text still get
//! different files.

use sha2::{Digest, Sha256};

/// Longest sanitized tag kept in a key.
pub const MAX_TAG_LEN: usize = 55;

/// Hex digits of the tag digest appended to the key.
pub const DIGEST_HEX_LEN: usize = 16;

/// Prefix shared by every cache file.
pub const KEY_PREFIX: &str = "sar_";

/// Extension of cache payload files.
pub const CACHE_EXTENSION: &str = "cache";

/// Extension of per-key lock markers.
pub const LOCK_EXTENSION: &str = "lock";

/// Extension of payloads still being written.
pub const TEMP_EXTENSION: &str = "tmp";

/// Derive the filesystem-safe key for `tag`.
pub fn cache_key(tag: &str) -> String {
    let truncated: String = tag
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(MAX_TAG_LEN)
        .collect();

    let digest = Sha256::digest(tag.as_bytes());
    let suffix: String = digest
        .iter()
        .take(DIGEST_HEX_LEN / 2)
        .map(|b| format!("{b:02x}"))
        .collect();

    format!("{KEY_PREFIX}{truncated}_{suffix}")
}

/// File name of the payload for `tag`.
pub fn cache_file_name(tag: &str) -> String {
    format!("{}.{CACHE_EXTENSION}", cache_key(tag))
}

/// File name of the lock marker for `tag`.
pub fn lock_file_name(tag: &str) -> String {
    format!("{}.{LOCK_EXTENSION}", cache_file_name(tag))
}
