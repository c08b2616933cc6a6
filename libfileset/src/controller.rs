//! Volume plugin controller.
//!
//! [`VolumeController`] is the request-facing half of the plugin: it turns
//! protocol requests into [`VolumeBackend`] calls and renders every outcome
//! into a protocol response.  Errors never escape as `Err`; they end up in
//! the response's `Err` field.
//!
//! Activation runs at most once successfully per controller.  Every request
//! other than `Plugin.Activate` triggers it on demand, so a plugin that was
//! never explicitly activated still prepares the node before serving.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, warn};

use crate::backend::VolumeBackend;
use crate::error::VolumeError;
use crate::message::*;
use crate::options::CreateOptions;
use crate::types::ActivationState;

/// Error text of `Path` for a volume without a mountpoint.
pub const NOT_MOUNTED: &str = "volume not mounted";

pub struct VolumeController {
    backend: Arc<dyn VolumeBackend>,
    activation: OnceCell<ActivationState>,
}

fn render(op: &'static str, err: VolumeError) -> String {
    warn!(op, error = %err, retryable = err.is_retryable(), "request failed");
    err.to_string()
}

impl VolumeController {
    pub fn new(backend: Arc<dyn VolumeBackend>) -> Self {
        Self {
            backend,
            activation: OnceCell::new(),
        }
    }

    /// State of the successful activation, if one happened.
    pub fn activation(&self) -> Option<&ActivationState> {
        self.activation.get()
    }

    /// Activate the backend unless that already succeeded.  Failures are not
    /// cached, so the next request tries again.
    async fn ensure_activated(&self) -> Result<&ActivationState, VolumeError> {
        self.activation
            .get_or_try_init(|| self.backend.activate())
            .await
    }

    pub async fn activate(&self) -> ActivateResponse {
        match self.ensure_activated().await {
            Ok(state) => {
                debug!(cluster_id = %state.cluster_id, "activation requested");
                ActivateResponse {
                    implements: vec![VOLUME_DRIVER.to_owned()],
                    err: String::new(),
                }
            }
            Err(e) => ActivateResponse {
                implements: Vec::new(),
                err: render("activate", e),
            },
        }
    }

    pub async fn create(&self, req: CreateRequest) -> GenericResponse {
        let result = async move {
            let options = CreateOptions::from_opts(&req.opts.unwrap_or_default())?;
            self.ensure_activated().await?;
            self.backend.create(&req.name, options).await
        }
        .await;
        GenericResponse {
            err: result.err().map(|e| render("create", e)).unwrap_or_default(),
        }
    }

    pub async fn remove(&self, req: NameRequest) -> GenericResponse {
        let result = async {
            self.ensure_activated().await?;
            self.backend.remove(&req.name).await
        }
        .await;
        GenericResponse {
            err: result.err().map(|e| render("remove", e)).unwrap_or_default(),
        }
    }

    pub async fn mount(&self, req: MountRequest) -> MountResponse {
        let result = async {
            self.ensure_activated().await?;
            self.backend.attach(&req.name).await
        }
        .await;
        match result {
            Ok(mountpoint) => MountResponse {
                mountpoint,
                err: String::new(),
            },
            Err(e) => MountResponse {
                mountpoint: String::new(),
                err: render("mount", e),
            },
        }
    }

    pub async fn unmount(&self, req: MountRequest) -> GenericResponse {
        let result = async {
            self.ensure_activated().await?;
            self.backend.detach(&req.name).await
        }
        .await;
        GenericResponse {
            err: result.err().map(|e| render("unmount", e)).unwrap_or_default(),
        }
    }

    pub async fn path(&self, req: NameRequest) -> MountResponse {
        let result = async {
            self.ensure_activated().await?;
            self.backend.get(&req.name).await
        }
        .await;
        match result {
            Ok(volume) if volume.is_attached() => MountResponse {
                mountpoint: volume.mountpoint,
                err: String::new(),
            },
            Ok(_) => MountResponse {
                mountpoint: String::new(),
                err: NOT_MOUNTED.to_owned(),
            },
            Err(e) => MountResponse {
                mountpoint: String::new(),
                err: render("path", e),
            },
        }
    }

    pub async fn get(&self, req: NameRequest) -> GetResponse {
        let result = async {
            self.ensure_activated().await?;
            self.backend.get(&req.name).await
        }
        .await;
        match result {
            Ok(volume) => GetResponse {
                volume: Some(VolumeInfo::from(&volume)),
                err: String::new(),
            },
            Err(e) => GetResponse {
                volume: None,
                err: render("get", e),
            },
        }
    }

    pub async fn list(&self) -> ListResponse {
        let result = async {
            self.ensure_activated().await?;
            self.backend.list().await
        }
        .await;
        match result {
            Ok(volumes) => ListResponse {
                volumes: volumes.iter().map(VolumeInfo::from).collect(),
                err: String::new(),
            },
            Err(e) => ListResponse {
                volumes: Vec::new(),
                err: render("list", e),
            },
        }
    }

    /// Volumes live on a clustered filesystem and are visible from every node.
    pub fn capabilities(&self) -> CapabilitiesResponse {
        CapabilitiesResponse {
            capabilities: Capability {
                scope: "global".to_owned(),
            },
        }
    }
}
