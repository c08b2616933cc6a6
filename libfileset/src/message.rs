//! Volume plugin protocol messages.
//!
//! Requests and responses of the Docker volume plugin API.  Field names are
//! PascalCase on the wire, and every response carries an `Err` string that
//! is empty on success.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::Volume;

/// The only plugin interface this driver implements.
pub const VOLUME_DRIVER: &str = "VolumeDriver";

// ----- Requests ------------------------------------------------------------

/// Body of `VolumeDriver.Create`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct CreateRequest {
    pub name: String,
    /// Driver options, `null` when the caller passed none.
    #[serde(default)]
    pub opts: Option<HashMap<String, Value>>,
}

/// Body of `Remove`, `Path` and `Get`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct NameRequest {
    pub name: String,
}

/// Body of `Mount` and `Unmount`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MountRequest {
    pub name: String,
    /// Caller identifier; mounts are not reference counted per caller.
    #[serde(rename = "ID", default)]
    pub id: String,
}

// ----- Responses -----------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ActivateResponse {
    pub implements: Vec<String>,
    pub err: String,
}

/// Response of calls that return nothing but an error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct GenericResponse {
    pub err: String,
}

/// Response of `Mount` and `Path`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct MountResponse {
    pub mountpoint: String,
    pub err: String,
}

/// Volume as reported by `Get` and `List`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct VolumeInfo {
    pub name: String,
    pub mountpoint: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub status: HashMap<String, String>,
}

impl From<&Volume> for VolumeInfo {
    fn from(v: &Volume) -> Self {
        let mut status = HashMap::from([
            ("type".to_owned(), v.kind().to_string()),
            ("filesystem".to_owned(), v.filesystem.clone()),
            ("fileset".to_owned(), v.backing.fileset().to_owned()),
        ]);
        if let Some(directory) = v.backing.directory() {
            status.insert("directory".to_owned(), directory.to_owned());
        }
        if !v.cluster_id.is_empty() {
            status.insert("clusterId".to_owned(), v.cluster_id.clone());
        }
        if let Some(quota) = &v.quota {
            status.insert("quota".to_owned(), quota.clone());
        }
        if let Some(fileset_type) = v.fileset_type {
            status.insert("filesetType".to_owned(), fileset_type.to_string());
        }
        if let Some(limit) = v.inode_limit {
            status.insert("inodeLimit".to_owned(), limit.to_string());
        }
        Self {
            name: v.name.clone(),
            mountpoint: v.mountpoint.clone(),
            status,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct GetResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeInfo>,
    pub err: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct ListResponse {
    pub volumes: Vec<VolumeInfo>,
    pub err: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Capability {
    /// `global` when volumes are visible from every node, `local` otherwise.
    pub scope: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct CapabilitiesResponse {
    pub capabilities: Capability,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::types::Backing;

    #[test]
    fn requests_use_pascal_case() {
        let req: CreateRequest =
            serde_json::from_value(json!({"Name": "v1", "Opts": {"type": "fileset"}})).unwrap();
        assert_eq!(req.name, "v1");
        assert_eq!(req.opts.unwrap()["type"], "fileset");

        let req: CreateRequest = serde_json::from_value(json!({"Name": "v1", "Opts": null})).unwrap();
        assert!(req.opts.is_none());

        let req: MountRequest =
            serde_json::from_value(json!({"Name": "v1", "ID": "abc"})).unwrap();
        assert_eq!(req.id, "abc");
    }

    #[test]
    fn responses_use_pascal_case() {
        let resp = MountResponse {
            mountpoint: "/gpfs/fs1/x".into(),
            err: String::new(),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"Mountpoint": "/gpfs/fs1/x", "Err": ""})
        );

        let resp = GetResponse {
            volume: None,
            err: "volume not found: v1".into(),
        };
        assert_eq!(
            serde_json::to_value(&resp).unwrap(),
            json!({"Err": "volume not found: v1"})
        );
    }

    #[test]
    fn volume_info_status() {
        let vol = Volume {
            name: "v1".into(),
            backing: Backing::Lightweight {
                fileset: "LightweightVolumes".into(),
                directory: "d1".into(),
            },
            filesystem: "gpfs1".into(),
            cluster_id: "42".into(),
            mountpoint: String::new(),
            quota: None,
            fileset_type: None,
            inode_limit: None,
            uid: None,
            gid: None,
        };
        let info = VolumeInfo::from(&vol);
        assert_eq!(info.status["type"], "lightweight");
        assert_eq!(info.status["directory"], "d1");
        assert_eq!(info.status["clusterId"], "42");
        assert!(!info.status.contains_key("quota"));
    }
}
