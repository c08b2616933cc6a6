//! Volume backends.
//!
//! A backend maps named volumes onto objects of the clustered filesystem and
//! keeps the mapping durable.  [`VolumeBackend`] is the seam the controller
//! talks to; [`fileset::FilesetBackend`] is the Spectrum Scale implementation.

pub mod fileset;

use async_trait::async_trait;

use crate::error::VolumeError;
use crate::options::CreateOptions;
use crate::types::{ActivationState, Volume};

/// Volume lifecycle operations.
///
/// Mutating operations are serialized by the implementation; `get` and
/// `list` are plain reads.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Prepare the node and the mapping store for service.
    async fn activate(&self) -> Result<ActivationState, VolumeError>;

    /// Provision `name` with its backing object.  Re-creating an existing
    /// volume with compatible options is a no-op.
    async fn create(&self, name: &str, options: CreateOptions) -> Result<(), VolumeError>;

    /// Destroy the volume and its backing object.
    async fn remove(&self, name: &str) -> Result<(), VolumeError>;

    /// Make the volume reachable and return its mountpoint.
    async fn attach(&self, name: &str) -> Result<String, VolumeError>;

    /// Release the mountpoint obtained by [`Self::attach`].
    async fn detach(&self, name: &str) -> Result<(), VolumeError>;

    async fn get(&self, name: &str) -> Result<Volume, VolumeError>;

    async fn list(&self) -> Result<Vec<Volume>, VolumeError>;
}
