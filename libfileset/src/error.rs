//! Volume error types.
//!
//! Every failure surfaced by the backend and controller is a [`VolumeError`].
//! The variants follow the four error families the plugin reports: invalid
//! options, unknown volumes (or drift between the store and the filesystem),
//! external command failures and mapping store failures.

use thiserror::Error;

use crate::executor::CommandError;

/// Unified error type for volume operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// The caller supplied malformed or conflicting options.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The volume has no mapping record.
    #[error("volume not found: {0}")]
    VolumeNotFound(String),

    /// A volume with this name exists with a different configuration.
    #[error("volume already exists: {0}")]
    VolumeAlreadyExists(String),

    /// Detach was requested for a volume without a mountpoint.
    #[error("volume not attached: {0}")]
    NotAttached(String),

    /// A record references an external object that is gone.
    #[error("{object} referenced by volume {volume} is missing")]
    ObjectMissing {
        /// Volume whose record references the object.
        volume: String,
        /// Human-readable description of the missing object.
        object: String,
    },

    /// The backing fileset is still referenced by other volumes.
    #[error("fileset {fileset} is in use by volumes: {users}")]
    InUse {
        /// Fileset being torn down.
        fileset: String,
        /// Comma separated names of the other volumes.
        users: String,
    },

    /// An external filesystem command failed.
    #[error("{op} {target}: {source}")]
    Command {
        /// Operation being performed, e.g. `"link fileset"`.
        op: &'static str,
        /// Object the operation targeted.
        target: String,
        /// Underlying command failure.
        #[source]
        source: CommandError,
    },

    /// The mapping store failed.
    #[error("mapping store {op} failed: {reason}")]
    Store {
        /// Store operation, e.g. `"insert"`.
        op: &'static str,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The advisory lock could not be taken or released.
    #[error("advisory lock error: {0}")]
    Lock(String),
}

impl VolumeError {
    /// Wrap a command failure with the operation and its target.
    pub fn command(op: &'static str, target: impl Into<String>, source: CommandError) -> Self {
        Self::Command {
            op,
            target: target.into(),
            source,
        }
    }

    /// Create a [`VolumeError::Store`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn store<E: std::fmt::Display>(op: &'static str, e: E) -> Self {
        Self::Store {
            op,
            reason: e.to_string(),
        }
    }

    /// Create a [`VolumeError::Lock`] from anything that implements
    /// [`std::fmt::Display`].
    pub fn lock<E: std::fmt::Display>(e: E) -> Self {
        Self::Lock(e.to_string())
    }

    /// Whether retrying the same request may succeed without any change.
    ///
    /// Only command timeouts qualify; every other error is definitive.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Command {
                source: CommandError::Timeout { .. },
                ..
            }
        )
    }
}
