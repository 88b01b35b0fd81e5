//! Error types for snapstat operations.
//!
//! This module defines the error taxonomy shared by every snapstat crate:
//! - [`SnapstatError`] - Canonical error type for all snapstat operations
//! - [`ErrorKind`] - Coarse classification used by the presentation layer
//!
//! ## Design Principles
//!
//! - **Structured**: Errors carry typed context (command, cache key) not just messages
//! - **Classifiable**: Every variant maps to transient, configuration, or internal
//! - **Contained**: Nothing here ever crosses into rendering as a panic; callers
//!   resolve errors into a success/failure section at the component boundary

use std::io;

use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Canonical Error Type
// ============================================================================

/// Canonical error type for all snapstat operations.
///
/// Every variant maps to one [`ErrorKind`]; see [`SnapstatError::kind`].
#[derive(Debug, Error)]
pub enum SnapstatError {
    /// Invalid argument provided.
    ///
    /// Returned when input validation fails (e.g., empty program name).
    #[error("Invalid argument: {message}")]
    InvalidArgument {
        /// Description of what was invalid.
        message: String,
    },

    /// Failed to spawn a child process.
    #[error("Failed to spawn process: {source}")]
    SpawnFailed {
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The command did not complete within its wall-clock budget.
    ///
    /// Any partial output has been discarded.
    #[error("Operation timed out")]
    Timeout,

    /// Command not found.
    #[error("Command '{command}' not found")]
    NotFoundCommand {
        /// The command that was not found.
        command: String,
    },

    /// Permission denied for command execution.
    #[error("Permission denied: cannot execute '{command}'")]
    PermissionDeniedCommand {
        /// The command that could not be executed.
        command: String,
    },

    /// Operation not supported on the current platform.
    #[error("Operation '{feature}' not supported on {platform}")]
    NotSupported {
        /// The feature that is not supported.
        feature: String,
        /// The platform where it's not supported.
        platform: String,
    },

    /// The per-key cache lock stayed busy through every retry.
    ///
    /// Another request is regenerating the same entry; try again later.
    #[error("Cache entry '{key}' is busy, try again later")]
    LockBusy {
        /// Derived cache key.
        key: String,
    },

    /// System-level error with errno context.
    #[error("System error: {message} (errno: {errno})")]
    System {
        /// Description of the error.
        message: String,
        /// The errno value.
        errno: i32,
    },

    /// The command produced no usable output.
    ///
    /// Never cached, so a transient empty read cannot poison later requests.
    #[error("No output from '{command}'")]
    EmptyOutput {
        /// The command that was run.
        command: String,
    },

    /// Data could not be assembled from the reports that were fetched.
    #[error("{message}")]
    Unavailable {
        /// User-facing description.
        message: String,
    },

    /// A required tool or log file is not installed where we looked.
    #[error("{name} could not be found: {hint}")]
    MissingDependency {
        /// The missing executable or file.
        name: String,
        /// Where we searched.
        hint: String,
    },

    /// Cache directory I/O failed.
    #[error("{context}: {source}")]
    Io {
        /// What we were doing.
        context: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Internal error (should not happen in normal operation).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Retrying later may succeed (lock contention, timeout, empty output).
    Transient,
    /// Something is not installed or not configured.
    Configuration,
    /// A bug or unexpected system state.
    Internal,
}

impl SnapstatError {
    /// Classify this error for display.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SnapstatError::Timeout
            | SnapstatError::LockBusy { .. }
            | SnapstatError::EmptyOutput { .. }
            | SnapstatError::Unavailable { .. } => ErrorKind::Transient,
            SnapstatError::NotFoundCommand { .. }
            | SnapstatError::PermissionDeniedCommand { .. }
            | SnapstatError::MissingDependency { .. }
            | SnapstatError::NotSupported { .. } => ErrorKind::Configuration,
            SnapstatError::InvalidArgument { .. }
            | SnapstatError::SpawnFailed { .. }
            | SnapstatError::System { .. }
            | SnapstatError::Io { .. }
            | SnapstatError::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// True when retrying later may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

// ============================================================================
// Convenience Constructors
// ============================================================================

impl SnapstatError {
    /// Create an `InvalidArgument` error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        SnapstatError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create a `SpawnFailed` error with a command and reason.
    pub fn spawn_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        let msg = format!("{}: {}", command.into(), reason.into());
        SnapstatError::SpawnFailed {
            source: io::Error::other(msg),
        }
    }

    /// Create a `NotFoundCommand` error.
    pub fn not_found_command(command: impl Into<String>) -> Self {
        SnapstatError::NotFoundCommand {
            command: command.into(),
        }
    }

    /// Create a `PermissionDeniedCommand` error.
    pub fn permission_denied_command(command: impl Into<String>) -> Self {
        SnapstatError::PermissionDeniedCommand {
            command: command.into(),
        }
    }

    /// Create a `NotSupported` error.
    pub fn not_supported(feature: impl Into<String>, platform: impl Into<String>) -> Self {
        SnapstatError::NotSupported {
            feature: feature.into(),
            platform: platform.into(),
        }
    }

    /// Create a `LockBusy` error.
    pub fn lock_busy(key: impl Into<String>) -> Self {
        SnapstatError::LockBusy { key: key.into() }
    }

    /// Create a `System` error.
    pub fn system(message: impl Into<String>, errno: i32) -> Self {
        SnapstatError::System {
            message: message.into(),
            errno,
        }
    }

    /// Create an `EmptyOutput` error.
    pub fn empty_output(command: impl Into<String>) -> Self {
        SnapstatError::EmptyOutput {
            command: command.into(),
        }
    }

    /// Create an `Unavailable` error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        SnapstatError::Unavailable {
            message: message.into(),
        }
    }

    /// Create a `MissingDependency` error.
    pub fn missing_dependency(name: impl Into<String>, hint: impl Into<String>) -> Self {
        SnapstatError::MissingDependency {
            name: name.into(),
            hint: hint.into(),
        }
    }

    /// Create an `Io` error with context.
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        SnapstatError::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an `Internal` error.
    pub fn internal(message: impl Into<String>) -> Self {
        SnapstatError::Internal {
            message: message.into(),
        }
    }
}

// ============================================================================
// Conversions
// ============================================================================

impl From<io::Error> for SnapstatError {
    fn from(source: io::Error) -> Self {
        SnapstatError::Io {
            context: "IO error".to_string(),
            source,
        }
    }
}

// ============================================================================
// Result Type Alias
// ============================================================================

/// Result type alias for snapstat operations.
pub type SnapstatResult<T> = Result<T, SnapstatError>;

// ============================================================================
// Tests
// ============================================================================
