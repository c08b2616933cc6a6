//! # libfileset — fileset-backed volumes on Spectrum Scale
//!
//! `libfileset` manages the lifecycle of named container volumes on an IBM
//! Spectrum Scale (GPFS) filesystem.  A volume is backed either by its own
//! fileset or by a directory inside a parent fileset, and the mapping from
//! volume name to backing object is persisted on the shared filesystem so
//! every node sees the same volumes.  It follows the RK8s conventions
//! (Tokio async runtime, `tracing` for observability, `thiserror` for
//! structured errors).
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |---|---|
//! | [`types`] | Data model: `Volume`, `Backing`, kinds, activation state. |
//! | [`error`] | [`VolumeError`] enum covering all failure modes. |
//! | [`options`] | Parsing and validation of create options. |
//! | [`executor`] | [`Executor`] trait and the host implementation. |
//! | [`mmcli`] | Typed `mm*` command wrappers and output parsers. |
//! | [`store`] | [`MappingStore`] trait and the JSON file store. |
//! | [`lock`] | Cross-process advisory lock. |
//! | [`config`] | [`BackendConfig`]. |
//! | [`backend`] | [`VolumeBackend`] trait and the fileset backend. |
//! | [`controller`] | [`VolumeController`] — plugin requests to backend calls. |
//! | [`message`] | Volume plugin protocol requests and responses. |

pub mod backend;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod lock;
pub mod message;
pub mod mmcli;
pub mod options;
pub mod store;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use backend::VolumeBackend;
pub use backend::fileset::FilesetBackend;
pub use config::BackendConfig;
pub use controller::VolumeController;
pub use error::VolumeError;
pub use executor::{Executor, HostExecutor};
pub use store::{JsonFileStore, MappingStore};
pub use types::*;
