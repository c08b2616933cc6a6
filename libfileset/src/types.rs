//! Core volume types: the persisted mapping record and its backing object.
//!
//! A [`Volume`] is what the mapping store persists (one record per volume
//! name) and what the backend hands back to the controller.  All types are
//! [`Serialize`]/[`Deserialize`] so the store can write them as JSON.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Volume kind & fileset type
// ---------------------------------------------------------------------------

/// What kind of backing object a volume gets.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VolumeKind {
    /// A dedicated fileset per volume.
    #[default]
    Fileset,
    /// A directory nested inside a (possibly shared) fileset.
    Lightweight,
}

impl fmt::Display for VolumeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fileset => f.write_str("fileset"),
            Self::Lightweight => f.write_str("lightweight"),
        }
    }
}

impl FromStr for VolumeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fileset" => Ok(Self::Fileset),
            "lightweight" => Ok(Self::Lightweight),
            other => Err(format!("unknown volume type {other:?}")),
        }
    }
}

/// Inode space of a fileset.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilesetType {
    /// Shares the root fileset's inode space.
    #[default]
    Dependent,
    /// Owns a new inode space with its own inode limit.
    Independent,
}

impl fmt::Display for FilesetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dependent => f.write_str("dependent"),
            Self::Independent => f.write_str("independent"),
        }
    }
}

impl FromStr for FilesetType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dependent" => Ok(Self::Dependent),
            "independent" => Ok(Self::Independent),
            other => Err(format!("unknown fileset type {other:?}")),
        }
    }
}

// ---------------------------------------------------------------------------
// Backing object
// ---------------------------------------------------------------------------

/// The external object a volume maps onto.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Backing {
    /// The volume owns the whole fileset.
    Fileset { fileset: String },
    /// The volume is `directory` inside the parent `fileset`.
    Lightweight { fileset: String, directory: String },
}

impl Backing {
    pub fn kind(&self) -> VolumeKind {
        match self {
            Self::Fileset { .. } => VolumeKind::Fileset,
            Self::Lightweight { .. } => VolumeKind::Lightweight,
        }
    }

    /// The fileset that hosts this backing object.
    pub fn fileset(&self) -> &str {
        match self {
            Self::Fileset { fileset } | Self::Lightweight { fileset, .. } => fileset,
        }
    }

    pub fn directory(&self) -> Option<&str> {
        match self {
            Self::Fileset { .. } => None,
            Self::Lightweight { directory, .. } => Some(directory),
        }
    }

    /// Path of the backing object below the filesystem mount root.
    pub fn path_under(&self, root: &Path) -> PathBuf {
        match self {
            Self::Fileset { fileset } => root.join(fileset),
            Self::Lightweight { fileset, directory } => root.join(fileset).join(directory),
        }
    }
}

// ---------------------------------------------------------------------------
// Volume record
// ---------------------------------------------------------------------------

/// A named volume and its mapping onto the clustered filesystem.
///
/// `mountpoint` is empty while the volume is detached and holds the absolute
/// path handed to the container runtime while attached.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Volume {
    pub name: String,
    pub backing: Backing,
    pub filesystem: String,
    /// Cluster the volume was created on.
    #[serde(default)]
    pub cluster_id: String,
    #[serde(default)]
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fileset_type: Option<FilesetType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

impl Volume {
    pub fn kind(&self) -> VolumeKind {
        self.backing.kind()
    }

    pub fn is_attached(&self) -> bool {
        !self.mountpoint.is_empty()
    }
}

/// Result of the one-time plugin activation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivationState {
    /// Identity of the cluster the plugin talks to.
    pub cluster_id: String,
    /// Whether the filesystem had to be mounted during activation.
    pub mounted_by_activation: bool,
}
