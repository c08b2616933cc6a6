//! Persistent volume → backing-object mapping.
//!
//! [`MappingStore`] is the durable table of [`Volume`] records keyed by
//! volume name.  [`JsonFileStore`] keeps one JSON document per volume in a
//! directory on the shared filesystem, so every plugin instance of the
//! cluster sees the same table.
//!
//! # On-disk layout
//!
//! ```text
//! <store_dir>/
//!   <volume-name>.json        # one record per volume
//!   .<volume-name>.json.<id>  # transient, written then linked/renamed into place
//! ```
//!
//! New records are published with `link(2)`, which fails when the target
//! exists, so name uniqueness holds even without the advisory lock.
//! Updates replace the record with `rename(2)`; readers therefore always see
//! either the old or the new document, never a partial one.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::VolumeError;
use crate::options::validate_volume_name;
use crate::types::Volume;

const RECORD_EXT: &str = ".json";

/// Durable CRUD table of volume records.
#[async_trait]
pub trait MappingStore: Send + Sync {
    /// Make sure the backing schema exists.  Safe to call repeatedly.
    async fn init(&self) -> Result<(), VolumeError>;

    async fn exists(&self, name: &str) -> Result<bool, VolumeError>;

    /// Insert a new record; fails with [`VolumeError::VolumeAlreadyExists`]
    /// when the name is taken.
    async fn insert(&self, volume: &Volume) -> Result<(), VolumeError>;

    /// Fetch a record; fails with [`VolumeError::VolumeNotFound`] when absent.
    async fn get(&self, name: &str) -> Result<Volume, VolumeError>;

    async fn update_mountpoint(&self, name: &str, mountpoint: &str) -> Result<(), VolumeError>;

    /// Delete a record; fails with [`VolumeError::VolumeNotFound`] when absent.
    async fn delete(&self, name: &str) -> Result<(), VolumeError>;

    /// All records, ordered by name.
    async fn list(&self) -> Result<Vec<Volume>, VolumeError>;
}

/// [`MappingStore`] backed by one JSON file per volume.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, name: &str) -> Result<PathBuf, VolumeError> {
        validate_volume_name(name)?;
        Ok(self.dir.join(format!("{name}{RECORD_EXT}")))
    }

    fn temp_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!(
            ".{name}{RECORD_EXT}.{}",
            uuid::Uuid::new_v4().simple()
        ))
    }

    /// Write `volume` to a fresh temporary file and flush it to disk.
    async fn write_temp(&self, volume: &Volume, op: &'static str) -> Result<PathBuf, VolumeError> {
        let json = serde_json::to_vec_pretty(volume).map_err(|e| VolumeError::store(op, e))?;
        let tmp = self.temp_path(&volume.name);
        let file = tokio::fs::File::create(&tmp)
            .await
            .map_err(|e| VolumeError::store(op, format!("create {}: {e}", tmp.display())))?;

        let written = async move {
            use tokio::io::AsyncWriteExt;
            let mut file = file;
            file.write_all(&json).await?;
            file.sync_all().await
        }
        .await;

        if let Err(e) = written {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(VolumeError::store(op, format!("write {}: {e}", tmp.display())));
        }
        Ok(tmp)
    }

    async fn read_record(&self, path: &Path, name: &str) -> Result<Volume, VolumeError> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(VolumeError::VolumeNotFound(name.to_owned()));
            }
            Err(e) => {
                return Err(VolumeError::store("get", format!("read {}: {e}", path.display())));
            }
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| VolumeError::store("get", format!("parse {}: {e}", path.display())))
    }
}

#[async_trait]
impl MappingStore for JsonFileStore {
    async fn init(&self) -> Result<(), VolumeError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| VolumeError::store("init", format!("create {}: {e}", self.dir.display())))?;
        info!(dir = %self.dir.display(), "mapping store ready");
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool, VolumeError> {
        let path = self.record_path(name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| VolumeError::store("exists", format!("stat {}: {e}", path.display())))
    }

    async fn insert(&self, volume: &Volume) -> Result<(), VolumeError> {
        let path = self.record_path(&volume.name)?;
        let tmp = self.write_temp(volume, "insert").await?;

        let linked = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match linked {
            Ok(()) => {
                debug!(volume = %volume.name, "record inserted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(VolumeError::VolumeAlreadyExists(volume.name.clone()))
            }
            Err(e) => Err(VolumeError::store(
                "insert",
                format!("link {}: {e}", path.display()),
            )),
        }
    }

    async fn get(&self, name: &str) -> Result<Volume, VolumeError> {
        let path = self.record_path(name)?;
        self.read_record(&path, name).await
    }

    async fn update_mountpoint(&self, name: &str, mountpoint: &str) -> Result<(), VolumeError> {
        let path = self.record_path(name)?;
        let mut volume = self.read_record(&path, name).await?;
        volume.mountpoint = mountpoint.to_owned();

        let tmp = self.write_temp(&volume, "update").await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(VolumeError::store(
                "update",
                format!("rename {}: {e}", path.display()),
            ));
        }
        debug!(volume = name, mountpoint, "record mountpoint updated");
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), VolumeError> {
        let path = self.record_path(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(volume = name, "record deleted");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(VolumeError::VolumeNotFound(name.to_owned()))
            }
            Err(e) => Err(VolumeError::store(
                "delete",
                format!("remove {}: {e}", path.display()),
            )),
        }
    }

    async fn list(&self) -> Result<Vec<Volume>, VolumeError> {
        let mut dir = match tokio::fs::read_dir(&self.dir).await {
            Ok(d) => d,
            // An uninitialized store holds no volumes.
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(VolumeError::store(
                    "list",
                    format!("read_dir {}: {e}", self.dir.display()),
                ));
            }
        };

        let mut volumes = Vec::new();
        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| VolumeError::store("list", e))?
        {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            // Skip in-flight temporary files and anything that is not a record.
            let Some(name) = file_name.strip_suffix(RECORD_EXT) else {
                continue;
            };
            if file_name.starts_with('.') {
                continue;
            }
            match self.read_record(&path, name).await {
                Ok(v) => volumes.push(v),
                // Deleted between read_dir and read.
                Err(VolumeError::VolumeNotFound(_)) => continue,
                Err(e) => return Err(e),
            }
        }

        volumes.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(volumes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Backing;

    fn volume(name: &str) -> Volume {
        Volume {
            name: name.into(),
            backing: Backing::Fileset {
                fileset: format!("fs-{name}"),
            },
            filesystem: "gpfs1".into(),
            cluster_id: "42".into(),
            mountpoint: String::new(),
            quota: None,
            fileset_type: None,
            inode_limit: None,
            uid: None,
            gid: None,
        }
    }

    async fn store() -> (tempfile::TempDir, JsonFileStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path().join("volumes"));
        store.init().await.unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn insert_get_delete() {
        let (_tmp, store) = store().await;

        assert!(!store.exists("v1").await.unwrap());
        store.insert(&volume("v1")).await.unwrap();
        assert!(store.exists("v1").await.unwrap());
        assert_eq!(store.get("v1").await.unwrap(), volume("v1"));

        store.delete("v1").await.unwrap();
        assert!(!store.exists("v1").await.unwrap());
        assert!(matches!(
            store.get("v1").await,
            Err(VolumeError::VolumeNotFound(_))
        ));
        assert!(matches!(
            store.delete("v1").await,
            Err(VolumeError::VolumeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn names_are_unique() {
        let (_tmp, store) = store().await;
        store.insert(&volume("v1")).await.unwrap();
        let err = store.insert(&volume("v1")).await.unwrap_err();
        assert!(matches!(err, VolumeError::VolumeAlreadyExists(_)));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn update_mountpoint_persists() {
        let (_tmp, store) = store().await;
        store.insert(&volume("v1")).await.unwrap();

        store
            .update_mountpoint("v1", "/gpfs/fs1/fs-v1")
            .await
            .unwrap();
        assert_eq!(store.get("v1").await.unwrap().mountpoint, "/gpfs/fs1/fs-v1");

        store.update_mountpoint("v1", "").await.unwrap();
        assert!(!store.get("v1").await.unwrap().is_attached());

        assert!(matches!(
            store.update_mountpoint("missing", "/x").await,
            Err(VolumeError::VolumeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_is_sorted_and_ignores_temp_files() {
        let (_tmp, store) = store().await;
        assert!(store.list().await.unwrap().is_empty());

        store.insert(&volume("b")).await.unwrap();
        store.insert(&volume("a")).await.unwrap();
        tokio::fs::write(store.dir().join(".c.json.123"), b"{")
            .await
            .unwrap();
        tokio::fs::write(store.dir().join("notes.txt"), b"hi")
            .await
            .unwrap();

        let names: Vec<_> = store
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|v| v.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let (_tmp, store) = store().await;
        tokio::fs::write(store.dir().join("bad.json"), b"not json")
            .await
            .unwrap();
        assert!(matches!(store.get("bad").await, Err(VolumeError::Store { .. })));
        assert!(store.list().await.is_err());
    }

    #[tokio::test]
    async fn records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = JsonFileStore::new(tmp.path());
            store.init().await.unwrap();
            store.insert(&volume("persistent")).await.unwrap();
        }
        let reopened = JsonFileStore::new(tmp.path());
        assert!(reopened.exists("persistent").await.unwrap());
    }

    #[tokio::test]
    async fn uninitialized_store_lists_empty() {
        let tmp = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(tmp.path().join("missing"));
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_unsafe_names() {
        let (_tmp, store) = store().await;
        assert!(matches!(
            store.exists("../escape").await,
            Err(VolumeError::InvalidArgument(_))
        ));
    }
}
