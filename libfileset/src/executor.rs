//! Host command execution.
//!
//! [`Executor`] is the seam between the backend and the node it runs on: it
//! runs external filesystem management commands and performs the few direct
//! filesystem side effects (directories, ownership) the backend needs.
//! [`HostExecutor`] is the production implementation built on
//! `tokio::process` and `nix`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

/// Exit status the `mm*` commands use when the requested object does not exist.
pub const EXIT_NOT_FOUND: i32 = 2;

/// Failure of a single command or host operation.
#[derive(Debug, Error, Clone)]
pub enum CommandError {
    /// The command exited with status 2, conventionally "object not found".
    #[error("{program} reported not found: {stderr}")]
    NotFound {
        /// Program that was run.
        program: String,
        /// Captured standard error.
        stderr: String,
    },

    /// The command exited unsuccessfully for another reason.
    #[error("{program} failed with status {code:?}: {stderr}")]
    Failed {
        /// Program that was run.
        program: String,
        /// Exit code, `None` when killed by a signal.
        code: Option<i32>,
        /// Captured standard error.
        stderr: String,
    },

    /// The command did not finish in time and was killed.
    #[error("{program} timed out after {after:?}")]
    Timeout {
        /// Program that was run.
        program: String,
        /// Configured time limit.
        after: Duration,
    },

    /// The command could not be started.
    #[error("failed to spawn {program}: {reason}")]
    Spawn {
        /// Program that was run.
        program: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// The command succeeded but its output could not be understood.
    #[error("unexpected output from {program}: {reason}")]
    Parse {
        /// Program that was run.
        program: String,
        /// Human-readable failure reason.
        reason: String,
    },

    /// A direct host filesystem operation failed.
    #[error("{op} {path}: {reason}")]
    Io {
        /// Operation, e.g. `"mkdir"`.
        op: &'static str,
        /// Path the operation targeted.
        path: String,
        /// Human-readable failure reason.
        reason: String,
    },
}

impl CommandError {
    /// Whether this failure means the queried object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    fn io(op: &'static str, path: &Path, e: impl std::fmt::Display) -> Self {
        Self::Io {
            op,
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }
}

/// Runs external commands and host filesystem operations.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `program` with `args` to completion and return its standard output.
    async fn execute(&self, program: &str, args: &[String]) -> Result<Vec<u8>, CommandError>;

    /// Whether `path` exists.
    async fn exists(&self, path: &Path) -> bool;

    /// Create a single directory; the parent must exist and `path` must not.
    async fn create_dir(&self, path: &Path) -> Result<(), CommandError>;

    /// Recursively remove a directory tree.
    async fn remove_dir_all(&self, path: &Path) -> Result<(), CommandError>;

    /// Change ownership of `path`. `None` leaves that id unchanged.
    async fn chown(&self, path: &Path, uid: Option<u32>, gid: Option<u32>)
    -> Result<(), CommandError>;

    /// Name of the node this process runs on.
    async fn hostname(&self) -> Result<String, CommandError>;
}

/// [`Executor`] that runs commands on the local host.
#[derive(Debug, Clone)]
pub struct HostExecutor {
    timeout: Duration,
}

impl HostExecutor {
    /// Create an executor that kills commands running longer than `timeout`.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl Executor for HostExecutor {
    #[instrument(skip(self), level = "debug")]
    async fn execute(&self, program: &str, args: &[String]) -> Result<Vec<u8>, CommandError> {
        let child = tokio::process::Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(CommandError::Spawn {
                    program: program.to_owned(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(CommandError::Timeout {
                    program: program.to_owned(),
                    after: self.timeout,
                });
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
        match output.status.code() {
            Some(0) => {
                debug!(program, stdout_len = output.stdout.len(), "command succeeded");
                Ok(output.stdout)
            }
            Some(EXIT_NOT_FOUND) => Err(CommandError::NotFound {
                program: program.to_owned(),
                stderr,
            }),
            code => Err(CommandError::Failed {
                program: program.to_owned(),
                code,
                stderr,
            }),
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn create_dir(&self, path: &Path) -> Result<(), CommandError> {
        tokio::fs::create_dir(path)
            .await
            .map_err(|e| CommandError::io("mkdir", path, e))
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<(), CommandError> {
        tokio::fs::remove_dir_all(path)
            .await
            .map_err(|e| CommandError::io("remove", path, e))
    }

    async fn chown(
        &self,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), CommandError> {
        let owned = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            nix::unistd::chown(
                owned.as_path(),
                uid.map(nix::unistd::Uid::from_raw),
                gid.map(nix::unistd::Gid::from_raw),
            )
        })
        .await
        .map_err(|e| CommandError::io("chown", path, e))?
        .map_err(|e| CommandError::io("chown", path, e))
    }

    async fn hostname(&self) -> Result<String, CommandError> {
        let name = nix::unistd::gethostname().map_err(|e| CommandError::Spawn {
            program: "gethostname".to_owned(),
            reason: e.to_string(),
        })?;
        Ok(name.to_string_lossy().into_owned())
    }
}
