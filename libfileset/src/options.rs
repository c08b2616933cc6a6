//! Create-option parsing and validation.
//!
//! Plugin requests carry options as a loosely typed string → value map.
//! [`CreateOptions::from_opts`] turns that map into a typed value and rejects
//! malformed or conflicting combinations before any store or command access.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::VolumeError;
use crate::types::{FilesetType, Volume, VolumeKind};

pub const OPT_TYPE: &str = "type";
pub const OPT_FILESYSTEM: &str = "filesystem";
pub const OPT_FILESET: &str = "fileset";
pub const OPT_DIRECTORY: &str = "directory";
pub const OPT_QUOTA: &str = "quota";
pub const OPT_FILESET_TYPE: &str = "fileset-type";
pub const OPT_INODE_LIMIT: &str = "inode-limit";
pub const OPT_UID: &str = "uid";
pub const OPT_GID: &str = "gid";

const KNOWN_OPTIONS: &[&str] = &[
    OPT_TYPE,
    OPT_FILESYSTEM,
    OPT_FILESET,
    OPT_DIRECTORY,
    OPT_QUOTA,
    OPT_FILESET_TYPE,
    OPT_INODE_LIMIT,
    OPT_UID,
    OPT_GID,
];

/// Validated options of a create request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateOptions {
    /// `None` when the caller did not pass `type`.
    pub kind: Option<VolumeKind>,
    pub filesystem: Option<String>,
    pub fileset: Option<String>,
    pub directory: Option<String>,
    pub quota: Option<String>,
    pub fileset_type: Option<FilesetType>,
    pub inode_limit: Option<u64>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

fn invalid(msg: impl Into<String>) -> VolumeError {
    VolumeError::InvalidArgument(msg.into())
}

fn option_string(key: &str, value: &Value) -> Result<String, VolumeError> {
    let s = match value {
        Value::String(s) => s.trim().to_owned(),
        Value::Number(n) => n.to_string(),
        other => return Err(invalid(format!("option {key} must be a string, got {other}"))),
    };
    if s.is_empty() {
        return Err(invalid(format!("option {key} must not be empty")));
    }
    Ok(s)
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, VolumeError> {
    raw.parse()
        .map_err(|_| invalid(format!("option {key} must be a non-negative integer, got {raw:?}")))
}

/// Check that `value` can be used as a single path component.
pub fn validate_component(what: &str, value: &str) -> Result<(), VolumeError> {
    if value.is_empty()
        || value.starts_with('.')
        || value.contains('/')
        || value.contains('\0')
    {
        return Err(invalid(format!("invalid {what} {value:?}")));
    }
    Ok(())
}

/// Check a volume name.  Names double as store keys and path components.
pub fn validate_volume_name(name: &str) -> Result<(), VolumeError> {
    validate_component("volume name", name)
}

/// Quotas are block counts with an optional `K`, `M`, `G` or `T` suffix.
fn validate_quota(quota: &str) -> Result<(), VolumeError> {
    let digits = quota.trim_end_matches(['K', 'M', 'G', 'T', 'k', 'm', 'g', 't']);
    let suffix_len = quota.len() - digits.len();
    if digits.is_empty() || suffix_len > 1 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid(format!("invalid quota {quota:?}")));
    }
    Ok(())
}

impl CreateOptions {
    /// Parse and validate the raw option map of a create request.
    ///
    /// Keys are matched case-insensitively; unknown keys are rejected.
    pub fn from_opts(opts: &HashMap<String, Value>) -> Result<Self, VolumeError> {
        let mut parsed = Self::default();

        for (raw_key, value) in opts {
            let key = raw_key.to_ascii_lowercase();
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                return Err(invalid(format!("unknown option {raw_key:?}")));
            }
            let s = option_string(&key, value)?;
            match key.as_str() {
                OPT_TYPE => parsed.kind = Some(s.parse().map_err(invalid)?),
                OPT_FILESYSTEM => parsed.filesystem = Some(s),
                OPT_FILESET => {
                    validate_component("fileset", &s)?;
                    parsed.fileset = Some(s);
                }
                OPT_DIRECTORY => {
                    validate_component("directory", &s)?;
                    parsed.directory = Some(s);
                }
                OPT_QUOTA => {
                    validate_quota(&s)?;
                    parsed.quota = Some(s);
                }
                OPT_FILESET_TYPE => parsed.fileset_type = Some(s.parse().map_err(invalid)?),
                OPT_INODE_LIMIT => {
                    let limit: u64 = parse_number(&key, &s)?;
                    if limit == 0 {
                        return Err(invalid("option inode-limit must be positive"));
                    }
                    parsed.inode_limit = Some(limit);
                }
                OPT_UID => parsed.uid = Some(parse_number(&key, &s)?),
                OPT_GID => parsed.gid = Some(parse_number(&key, &s)?),
                _ => unreachable!("checked against KNOWN_OPTIONS"),
            }
        }

        parsed.validate()?;
        Ok(parsed)
    }

    /// The requested kind, defaulting to a dedicated fileset.
    pub fn kind(&self) -> VolumeKind {
        self.kind.unwrap_or_default()
    }

    fn validate(&self) -> Result<(), VolumeError> {
        match self.kind() {
            VolumeKind::Lightweight => {
                if self.fileset.is_none() {
                    return Err(invalid(
                        "lightweight volumes require the fileset option naming their parent fileset",
                    ));
                }
                if self.quota.is_some() {
                    return Err(invalid("quota is not supported for lightweight volumes"));
                }
                if self.fileset_type.is_some() || self.inode_limit.is_some() {
                    return Err(invalid(
                        "fileset-type and inode-limit are not supported for lightweight volumes",
                    ));
                }
            }
            VolumeKind::Fileset => {
                if self.directory.is_some() {
                    return Err(invalid("directory is only valid for lightweight volumes"));
                }
                match (self.fileset_type, self.inode_limit) {
                    (Some(FilesetType::Independent), None) => {
                        return Err(invalid("independent filesets require inode-limit"));
                    }
                    (Some(FilesetType::Dependent) | None, Some(_)) => {
                        return Err(invalid("inode-limit requires fileset-type independent"));
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Name the option that disagrees with an existing record, if any.
    ///
    /// Only options the caller actually passed are compared, so a bare
    /// re-create of an existing volume never conflicts.
    pub fn conflict_with(&self, existing: &Volume) -> Option<&'static str> {
        if self.kind.is_some_and(|k| k != existing.kind()) {
            return Some(OPT_TYPE);
        }
        if self
            .fileset
            .as_deref()
            .is_some_and(|f| f != existing.backing.fileset())
        {
            return Some(OPT_FILESET);
        }
        if self.quota.is_some() && self.quota != existing.quota {
            return Some(OPT_QUOTA);
        }
        None
    }
}
