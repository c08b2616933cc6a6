//! Spectrum Scale fileset backend.
//!
//! [`FilesetBackend`] implements [`VolumeBackend`] on top of the `mm*`
//! commands.  A volume is backed either by a dedicated fileset or by a
//! directory inside a parent fileset (a lightweight volume).  Parents are
//! shared: by default every lightweight volume lives in the reserved
//! `LightweightVolumes` fileset, which is created and linked on first use.
//!
//! # Layout
//!
//! ```text
//! <mountpoint>/
//!   <fileset>/              # junction of a fileset-backed volume
//!   LightweightVolumes/     # shared parent fileset
//!     <directory>/          # lightweight volume
//! ```
//!
//! Every mutating operation runs under the [`AdvisoryLock`], so link state
//! checks and the link action that depends on them are never split across
//! two lock acquisitions.  `get` and `list` only read the mapping store.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::VolumeBackend;
use crate::config::BackendConfig;
use crate::error::VolumeError;
use crate::executor::{Executor, HostExecutor};
use crate::lock::AdvisoryLock;
use crate::mmcli::{FilesetSpec, MmCli, is_same_node};
use crate::options::{CreateOptions, validate_volume_name};
use crate::store::{JsonFileStore, MappingStore};
use crate::types::{ActivationState, Backing, Volume, VolumeKind};

/// Prefix of generated fileset and directory names.
const GENERATED_PREFIX: &str = "vol-";

fn generated_name() -> String {
    format!("{GENERATED_PREFIX}{}", Uuid::new_v4().simple())
}

/// Volume backend driving a Spectrum Scale filesystem.
pub struct FilesetBackend {
    config: BackendConfig,
    mmcli: MmCli,
    executor: Arc<dyn Executor>,
    store: Arc<dyn MappingStore>,
    lock: AdvisoryLock,
    /// Set once the shared lightweight fileset is known to exist and be
    /// linked.  Only ever flips from `false` to `true`.
    lightweight_ready: AtomicBool,
    /// Cluster identity recorded in new volumes, learned at activation.
    cluster_id: OnceLock<String>,
}

impl FilesetBackend {
    pub fn new(
        config: BackendConfig,
        executor: Arc<dyn Executor>,
        store: Arc<dyn MappingStore>,
    ) -> Self {
        let mmcli = MmCli::new(
            Arc::clone(&executor),
            config.mm_bin_dir.clone(),
            config.filesystem.clone(),
        );
        let lock = AdvisoryLock::new(config.lock_file.clone());
        Self {
            config,
            mmcli,
            executor,
            store,
            lock,
            lightweight_ready: AtomicBool::new(false),
            cluster_id: OnceLock::new(),
        }
    }

    /// Backend that runs commands on this host and keeps its mapping in a
    /// [`JsonFileStore`] under `config.store_dir`.
    pub fn from_config(config: BackendConfig) -> Self {
        let executor = Arc::new(HostExecutor::new(config.command_timeout));
        let store = Arc::new(JsonFileStore::new(config.store_dir.clone()));
        Self::new(config, executor, store)
    }

    fn missing(volume: &str, object: String) -> VolumeError {
        VolumeError::ObjectMissing {
            volume: volume.to_owned(),
            object,
        }
    }

    /// Names of the volumes other than `name` whose backing lives in `fileset`.
    async fn other_users(&self, name: &str, fileset: &str) -> Result<Vec<String>, VolumeError> {
        Ok(self
            .store
            .list()
            .await?
            .into_iter()
            .filter(|v| v.name != name && v.backing.fileset() == fileset)
            .map(|v| v.name)
            .collect())
    }

    /// Link `fileset` at its junction unless it already is.  The fileset
    /// must exist.
    async fn ensure_linked(&self, volume: &str, fileset: &str) -> Result<(), VolumeError> {
        let info = self
            .mmcli
            .fileset(fileset)
            .await?
            .ok_or_else(|| Self::missing(volume, format!("fileset {fileset}")))?;
        if info.is_linked() {
            let expected = self.config.fileset_path(fileset);
            match info.path.as_deref() {
                Some(junction) if Path::new(junction) != expected => {
                    warn!(
                        fileset,
                        junction,
                        expected = %expected.display(),
                        "fileset linked at an unexpected junction"
                    );
                }
                _ => debug!(fileset, "fileset already linked"),
            }
            return Ok(());
        }
        self.mmcli
            .link_fileset(fileset, &self.config.fileset_path(fileset))
            .await
    }

    /// Make sure the parent fileset of a lightweight volume is usable.
    async fn ensure_parent(&self, volume: &str, parent: &str) -> Result<(), VolumeError> {
        if parent != self.config.lightweight_fileset {
            return self.ensure_linked(volume, parent).await;
        }
        if self.lightweight_ready.load(Ordering::Acquire) {
            return Ok(());
        }

        match self.mmcli.fileset(parent).await? {
            None => {
                info!(fileset = parent, "initializing shared lightweight fileset");
                self.mmcli
                    .create_fileset(parent, FilesetSpec::default())
                    .await?;
                self.mmcli
                    .link_fileset(parent, &self.config.fileset_path(parent))
                    .await?;
            }
            Some(info) if !info.is_linked() => {
                self.mmcli
                    .link_fileset(parent, &self.config.fileset_path(parent))
                    .await?;
            }
            Some(_) => {}
        }
        self.lightweight_ready.store(true, Ordering::Release);
        Ok(())
    }

    async fn chown(
        &self,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), VolumeError> {
        if uid.is_none() && gid.is_none() {
            return Ok(());
        }
        self.executor
            .chown(path, uid, gid)
            .await
            .map_err(|e| VolumeError::command("chown", path.display().to_string(), e))
    }

    async fn create_fileset_backing(
        &self,
        name: &str,
        options: &CreateOptions,
    ) -> Result<Backing, VolumeError> {
        let fileset = match &options.fileset {
            Some(fileset) => {
                let users = self.other_users(name, fileset).await?;
                if !users.is_empty() {
                    return Err(VolumeError::InUse {
                        fileset: fileset.clone(),
                        users: users.join(", "),
                    });
                }
                fileset.clone()
            }
            None => generated_name(),
        };

        if self.mmcli.fileset(&fileset).await?.is_some() {
            if options.fileset_type.is_some() || options.inode_limit.is_some() {
                warn!(%fileset, "adopting existing fileset, ignoring fileset-type and inode-limit");
            } else {
                debug!(%fileset, "adopting existing fileset");
            }
        } else {
            let spec = FilesetSpec {
                fileset_type: options.fileset_type.unwrap_or_default(),
                inode_limit: options.inode_limit,
            };
            self.mmcli.create_fileset(&fileset, spec).await?;
        }

        if let Some(quota) = &options.quota {
            self.mmcli.set_quota(&fileset, quota).await?;
        }

        if options.uid.is_some() || options.gid.is_some() {
            self.ensure_linked(name, &fileset).await?;
            self.chown(&self.config.fileset_path(&fileset), options.uid, options.gid)
                .await?;
        }

        Ok(Backing::Fileset { fileset })
    }

    async fn create_lightweight_backing(
        &self,
        name: &str,
        options: &CreateOptions,
    ) -> Result<Backing, VolumeError> {
        let parent = options.fileset.clone().ok_or_else(|| {
            VolumeError::InvalidArgument(
                "lightweight volumes require the fileset option naming their parent fileset"
                    .to_owned(),
            )
        })?;
        let directory = options.directory.clone().unwrap_or_else(generated_name);

        self.ensure_parent(name, &parent).await?;

        let backing = Backing::Lightweight {
            fileset: parent,
            directory,
        };
        let path = backing.path_under(&self.config.mountpoint);
        if options.directory.is_some() && self.executor.exists(&path).await {
            let owner = self
                .store
                .list()
                .await?
                .into_iter()
                .find(|v| v.name != name && v.backing == backing);
            if let Some(owner) = owner {
                return Err(VolumeError::InvalidArgument(format!(
                    "directory {} already backs volume {}",
                    path.display(),
                    owner.name
                )));
            }
            info!(path = %path.display(), "adopting existing directory");
        } else {
            self.executor.create_dir(&path).await.map_err(|e| {
                VolumeError::command("create directory", path.display().to_string(), e)
            })?;
        }
        self.chown(&path, options.uid, options.gid).await?;

        Ok(backing)
    }

    /// Mount the filesystem on this node unless some node entry already
    /// refers to it.  Returns whether a mount was issued.
    async fn ensure_mounted(&self) -> Result<bool, VolumeError> {
        let hostname = self
            .executor
            .hostname()
            .await
            .map_err(|e| VolumeError::command("resolve hostname", "localhost", e))?;
        let nodes = self.mmcli.mounted_nodes().await?;
        if nodes.iter().any(|n| is_same_node(n, &hostname)) {
            debug!(%hostname, "filesystem already mounted on this node");
            return Ok(false);
        }
        self.mmcli.mount_filesystem(&self.config.mountpoint).await?;
        Ok(true)
    }
}

#[async_trait]
impl VolumeBackend for FilesetBackend {
    #[instrument(skip(self))]
    async fn activate(&self) -> Result<ActivationState, VolumeError> {
        let cluster_id = self.mmcli.cluster_id().await?;
        // The lock file and the store live on the filesystem, so it has to
        // be mounted before either can be touched.
        let mounted_by_activation = self.ensure_mounted().await?;

        let _guard = self.lock.acquire().await?;
        self.store.init().await?;

        let shared = &self.config.lightweight_fileset;
        if let Some(info) = self.mmcli.fileset(shared).await?
            && info.is_linked()
        {
            self.lightweight_ready.store(true, Ordering::Release);
        }

        if self.cluster_id.set(cluster_id.clone()).is_err() {
            debug!("cluster id already recorded");
        }

        info!(
            filesystem = %self.config.filesystem,
            %cluster_id,
            mounted_by_activation,
            "backend activated"
        );
        Ok(ActivationState {
            cluster_id,
            mounted_by_activation,
        })
    }

    #[instrument(skip(self, options), fields(kind = %options.kind()))]
    async fn create(&self, name: &str, options: CreateOptions) -> Result<(), VolumeError> {
        validate_volume_name(name)?;
        if let Some(filesystem) = &options.filesystem
            && *filesystem != self.config.filesystem
        {
            return Err(VolumeError::InvalidArgument(format!(
                "filesystem {filesystem} is not served by this plugin (expected {})",
                self.config.filesystem
            )));
        }
        if options.kind() == VolumeKind::Fileset
            && options.fileset.as_deref() == Some(self.config.lightweight_fileset.as_str())
        {
            return Err(VolumeError::InvalidArgument(format!(
                "fileset {} is reserved for lightweight volumes",
                self.config.lightweight_fileset
            )));
        }

        let _guard = self.lock.acquire().await?;

        if self.store.exists(name).await? {
            let existing = self.store.get(name).await?;
            if let Some(option) = options.conflict_with(&existing) {
                return Err(VolumeError::VolumeAlreadyExists(format!(
                    "{name} with a different {option}"
                )));
            }
            debug!("volume exists with compatible options, nothing to do");
            return Ok(());
        }

        let backing = match options.kind() {
            VolumeKind::Fileset => self.create_fileset_backing(name, &options).await?,
            VolumeKind::Lightweight => self.create_lightweight_backing(name, &options).await?,
        };

        let volume = Volume {
            name: name.to_owned(),
            backing,
            filesystem: self.config.filesystem.clone(),
            cluster_id: self.cluster_id.get().cloned().unwrap_or_default(),
            mountpoint: String::new(),
            quota: options.quota,
            fileset_type: options.fileset_type,
            inode_limit: options.inode_limit,
            uid: options.uid,
            gid: options.gid,
        };
        self.store.insert(&volume).await?;

        info!(
            fileset = volume.backing.fileset(),
            directory = volume.backing.directory(),
            "volume created"
        );
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove(&self, name: &str) -> Result<(), VolumeError> {
        let _guard = self.lock.acquire().await?;
        let volume = self.store.get(name).await?;

        match &volume.backing {
            Backing::Fileset { fileset } => {
                let users = self.other_users(name, fileset).await?;
                if !users.is_empty() {
                    return Err(VolumeError::InUse {
                        fileset: fileset.clone(),
                        users: users.join(", "),
                    });
                }
                let info = self
                    .mmcli
                    .fileset(fileset)
                    .await?
                    .ok_or_else(|| Self::missing(name, format!("fileset {fileset}")))?;
                if info.is_linked() {
                    self.mmcli.unlink_fileset(fileset).await?;
                }
                self.mmcli.delete_fileset(fileset).await?;
            }
            Backing::Lightweight { .. } => {
                let path = volume.backing.path_under(&self.config.mountpoint);
                if !self.executor.exists(&path).await {
                    return Err(Self::missing(name, format!("directory {}", path.display())));
                }
                self.executor.remove_dir_all(&path).await.map_err(|e| {
                    VolumeError::command("remove directory", path.display().to_string(), e)
                })?;
            }
        }

        self.store.delete(name).await?;
        info!(kind = %volume.kind(), "volume removed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn attach(&self, name: &str) -> Result<String, VolumeError> {
        let _guard = self.lock.acquire().await?;
        let volume = self.store.get(name).await?;
        if volume.is_attached() {
            debug!(mountpoint = %volume.mountpoint, "volume already attached");
            return Ok(volume.mountpoint);
        }

        let path = volume.backing.path_under(&self.config.mountpoint);
        match &volume.backing {
            Backing::Fileset { fileset } => self.ensure_linked(name, fileset).await?,
            Backing::Lightweight { .. } => {
                if !self.executor.exists(&path).await {
                    return Err(Self::missing(name, format!("directory {}", path.display())));
                }
            }
        }

        let mountpoint = path.to_string_lossy().into_owned();
        self.store.update_mountpoint(name, &mountpoint).await?;
        info!(%mountpoint, "volume attached");
        Ok(mountpoint)
    }

    #[instrument(skip(self))]
    async fn detach(&self, name: &str) -> Result<(), VolumeError> {
        let _guard = self.lock.acquire().await?;
        let volume = self.store.get(name).await?;
        if !volume.is_attached() {
            return Err(VolumeError::NotAttached(name.to_owned()));
        }

        if let Backing::Fileset { fileset } = &volume.backing {
            let users = self.other_users(name, fileset).await?;
            if users.is_empty() {
                match self.mmcli.fileset(fileset).await? {
                    Some(info) if info.is_linked() => self.mmcli.unlink_fileset(fileset).await?,
                    Some(_) => debug!(%fileset, "fileset already unlinked"),
                    None => return Err(Self::missing(name, format!("fileset {fileset}"))),
                }
            } else {
                debug!(%fileset, users = ?users, "fileset shared, leaving it linked");
            }
        }

        self.store.update_mountpoint(name, "").await?;
        info!("volume detached");
        Ok(())
    }

    async fn get(&self, name: &str) -> Result<Volume, VolumeError> {
        self.store.get(name).await
    }

    async fn list(&self) -> Result<Vec<Volume>, VolumeError> {
        self.store.list().await
    }
}
