//! snapstat-core: Shared error taxonomy and output contracts
//!
//! Every snapstat crate reports failures as [`SnapstatError`]. Callers that
//! only need to decide between "try again" and "fix your setup" use
//! [`SnapstatError::kind`].
//!
//! - [`schema`] holds the `schema_id` strings stamped on JSON output
//! - [`signals`] is re-exported from rsfulmen for the runner's timeout
//!   escalation

use std::env::consts::OS;

pub mod error;
pub mod schema;

pub use error::{ErrorKind, SnapstatError, SnapstatResult};

pub use rsfulmen::foundry::signals;

/// Platform name used in `NotSupported` errors ("linux", "macos", ...).
#[inline]
pub fn get_platform() -> &'static str {
    OS
}
