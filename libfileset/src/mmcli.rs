//! Typed wrappers around the Spectrum Scale `mm*` management commands.
//!
//! Each wrapper builds the argument vector, runs it through an [`Executor`]
//! and turns the result into a parsed value.  Parsing of the colon-delimited
//! `-Y` output lives in free functions so it can be tested without a cluster.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::VolumeError;
use crate::executor::{CommandError, Executor};
use crate::types::FilesetType;

const MMLSFILESET: &str = "mmlsfileset";
const MMCRFILESET: &str = "mmcrfileset";
const MMLINKFILESET: &str = "mmlinkfileset";
const MMUNLINKFILESET: &str = "mmunlinkfileset";
const MMDELFILESET: &str = "mmdelfileset";
const MMSETQUOTA: &str = "mmsetquota";
const MMLSCLUSTER: &str = "mmlscluster";
const MMLSMOUNT: &str = "mmlsmount";
const MMMOUNT: &str = "mmmount";

/// Link state reported by `mmlsfileset`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilesetStatus {
    Linked,
    Unlinked,
    /// Any other state (e.g. `Deleted`), kept verbatim.
    Other(String),
}

impl From<&str> for FilesetStatus {
    fn from(s: &str) -> Self {
        match s {
            "Linked" => Self::Linked,
            "Unlinked" => Self::Unlinked,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// One row of `mmlsfileset <fs> <fileset> -Y`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilesetInfo {
    pub name: String,
    pub status: FilesetStatus,
    /// Junction path, only meaningful while linked.
    pub path: Option<String>,
}

impl FilesetInfo {
    pub fn is_linked(&self) -> bool {
        self.status == FilesetStatus::Linked
    }
}

/// Parameters for `mmcrfileset`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilesetSpec {
    pub fileset_type: FilesetType,
    /// Maximum inode count; only used for independent filesets.
    pub inode_limit: Option<u64>,
}

// ---------------------------------------------------------------------------
// Output parsing
// ---------------------------------------------------------------------------

/// Decode the `%xx` escapes `-Y` output uses for reserved characters.
fn decode_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let hex = |b: u8| (b as char).to_digit(16);
    while i < bytes.len() {
        if bytes[i] == b'%'
            && i + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex(bytes[i + 1]), hex(bytes[i + 2]))
        {
            out.push((hi * 16 + lo) as u8);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Split `-Y` output into its header columns and data rows.
fn split_machine_output(output: &str) -> Option<(Vec<&str>, Vec<Vec<&str>>)> {
    let mut header = None;
    let mut rows = Vec::new();
    for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let tokens: Vec<&str> = line.split(':').collect();
        if tokens.get(2) == Some(&"HEADER") {
            header = Some(tokens);
        } else {
            rows.push(tokens);
        }
    }
    header.map(|h| (h, rows))
}

fn column(header: &[&str], name: &str, fallback: usize) -> usize {
    header.iter().position(|c| *c == name).unwrap_or(fallback)
}

/// Parse `mmlsfileset <fs> <fileset> -Y` and return the row for `fileset`.
pub fn parse_fileset_listing(output: &str, fileset: &str) -> Result<FilesetInfo, String> {
    let (header, rows) =
        split_machine_output(output).ok_or_else(|| "missing HEADER line".to_owned())?;
    let name_col = column(&header, "filesetName", 7);
    let status_col = column(&header, "status", 10);
    let path_col = column(&header, "path", 11);

    let row = rows
        .iter()
        .find(|r| r.get(name_col).map(|n| decode_field(n)) == Some(fileset.to_owned()))
        .ok_or_else(|| format!("no row for fileset {fileset}"))?;

    let status = row
        .get(status_col)
        .ok_or_else(|| format!("row for {fileset} has no status column"))?;

    let path = row
        .get(path_col)
        .map(|p| decode_field(p))
        .filter(|p| !p.is_empty() && p != "--");

    Ok(FilesetInfo {
        name: fileset.to_owned(),
        status: FilesetStatus::from(*status),
        path,
    })
}

/// Extract the cluster id from `mmlscluster` output.
pub fn parse_cluster_id(output: &str) -> Option<String> {
    output.lines().find_map(|line| {
        let (key, value) = line.split_once(':')?;
        (key.trim() == "GPFS cluster id")
            .then(|| value.trim().to_owned())
            .filter(|v| !v.is_empty())
    })
}

/// Extract the names of the nodes that have the filesystem mounted from
/// `mmlsmount <fs> -L -Y` output.
pub fn parse_mounted_nodes(output: &str) -> Vec<String> {
    let Some((header, rows)) = split_machine_output(output) else {
        return Vec::new();
    };
    let node_col = column(&header, "nodeName", 11);
    rows.iter()
        .filter_map(|r| r.get(node_col))
        .map(|n| decode_field(n))
        .filter(|n| !n.is_empty())
        .collect()
}

/// Whether a cluster node name refers to the local host.  Node names may be
/// fully qualified while the host name is short, or the other way round.
pub fn is_same_node(node: &str, hostname: &str) -> bool {
    if node.eq_ignore_ascii_case(hostname) {
        return true;
    }
    let short = |n: &str| n.split('.').next().unwrap_or(n).to_ascii_lowercase();
    short(node) == short(hostname)
}

// ---------------------------------------------------------------------------
// Command wrappers
// ---------------------------------------------------------------------------

/// Issues `mm*` commands against a single filesystem.
#[derive(Clone)]
pub struct MmCli {
    executor: Arc<dyn Executor>,
    bin_dir: PathBuf,
    filesystem: String,
}

impl MmCli {
    pub fn new(executor: Arc<dyn Executor>, bin_dir: impl Into<PathBuf>, filesystem: String) -> Self {
        Self {
            executor,
            bin_dir: bin_dir.into(),
            filesystem,
        }
    }

    async fn run(&self, command: &str, args: Vec<String>) -> Result<Vec<u8>, CommandError> {
        let program = self.bin_dir.join(command);
        self.executor
            .execute(&program.to_string_lossy(), &args)
            .await
    }

    /// Look up a fileset.  Returns `None` when the fileset does not exist.
    pub async fn fileset(&self, name: &str) -> Result<Option<FilesetInfo>, VolumeError> {
        let args = vec![self.filesystem.clone(), name.to_owned(), "-Y".to_owned()];
        let output = match self.run(MMLSFILESET, args).await {
            Ok(out) => out,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(VolumeError::command("list fileset", name, e)),
        };

        let text = String::from_utf8_lossy(&output);
        parse_fileset_listing(&text, name).map(Some).map_err(|reason| {
            VolumeError::command(
                "list fileset",
                name,
                CommandError::Parse {
                    program: MMLSFILESET.to_owned(),
                    reason,
                },
            )
        })
    }

    pub async fn create_fileset(&self, name: &str, spec: FilesetSpec) -> Result<(), VolumeError> {
        let mut args = vec![self.filesystem.clone(), name.to_owned()];
        if spec.fileset_type == FilesetType::Independent {
            args.extend(["--inode-space".to_owned(), "new".to_owned()]);
            if let Some(limit) = spec.inode_limit {
                args.extend(["--inode-limit".to_owned(), limit.to_string()]);
            }
        }
        let output = self
            .run(MMCRFILESET, args)
            .await
            .map_err(|e| VolumeError::command("create fileset", name, e))?;
        info!(fileset = name, ?spec, "fileset created");
        debug!(output = %String::from_utf8_lossy(&output), "mmcrfileset output");
        Ok(())
    }

    pub async fn link_fileset(&self, name: &str, junction: &Path) -> Result<(), VolumeError> {
        let args = vec![
            self.filesystem.clone(),
            name.to_owned(),
            "-J".to_owned(),
            junction.to_string_lossy().into_owned(),
        ];
        self.run(MMLINKFILESET, args)
            .await
            .map_err(|e| VolumeError::command("link fileset", name, e))?;
        info!(fileset = name, junction = %junction.display(), "fileset linked");
        Ok(())
    }

    pub async fn unlink_fileset(&self, name: &str) -> Result<(), VolumeError> {
        let args = vec![self.filesystem.clone(), name.to_owned()];
        self.run(MMUNLINKFILESET, args)
            .await
            .map_err(|e| VolumeError::command("unlink fileset", name, e))?;
        info!(fileset = name, "fileset unlinked");
        Ok(())
    }

    pub async fn delete_fileset(&self, name: &str) -> Result<(), VolumeError> {
        let args = vec![self.filesystem.clone(), name.to_owned(), "-f".to_owned()];
        self.run(MMDELFILESET, args)
            .await
            .map_err(|e| VolumeError::command("delete fileset", name, e))?;
        info!(fileset = name, "fileset deleted");
        Ok(())
    }

    /// Set the block quota of a fileset; soft and hard limits are equal.
    pub async fn set_quota(&self, name: &str, quota: &str) -> Result<(), VolumeError> {
        let args = vec![
            format!("{}:{}", self.filesystem, name),
            "--block".to_owned(),
            format!("{quota}:{quota}"),
        ];
        self.run(MMSETQUOTA, args)
            .await
            .map_err(|e| VolumeError::command("set quota", name, e))?;
        info!(fileset = name, quota, "fileset quota set");
        Ok(())
    }

    pub async fn cluster_id(&self) -> Result<String, VolumeError> {
        let output = self
            .run(MMLSCLUSTER, Vec::new())
            .await
            .map_err(|e| VolumeError::command("list cluster", &self.filesystem, e))?;
        parse_cluster_id(&String::from_utf8_lossy(&output)).ok_or_else(|| {
            VolumeError::command(
                "list cluster",
                &self.filesystem,
                CommandError::Parse {
                    program: MMLSCLUSTER.to_owned(),
                    reason: "cluster id is empty".to_owned(),
                },
            )
        })
    }

    pub async fn mounted_nodes(&self) -> Result<Vec<String>, VolumeError> {
        let args = vec![self.filesystem.clone(), "-L".to_owned(), "-Y".to_owned()];
        let output = self
            .run(MMLSMOUNT, args)
            .await
            .map_err(|e| VolumeError::command("list mounts", &self.filesystem, e))?;
        Ok(parse_mounted_nodes(&String::from_utf8_lossy(&output)))
    }

    pub async fn mount_filesystem(&self, mountpoint: &Path) -> Result<(), VolumeError> {
        let args = vec![
            self.filesystem.clone(),
            mountpoint.to_string_lossy().into_owned(),
        ];
        self.run(MMMOUNT, args)
            .await
            .map_err(|e| VolumeError::command("mount filesystem", &self.filesystem, e))?;
        info!(filesystem = %self.filesystem, mountpoint = %mountpoint.display(), "filesystem mounted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINKED: &str = "\
mmlsfileset::HEADER:version:reserved:reserved:filesystemName:filesetName:id:rootInode:status:path:parentId:created:inodes:dataInKB:comment:filesetMode:afmTarget:
mmlsfileset::0:1:::gpfs1:vol-1:3:524291:Linked:%2Fgpfs%2Ffs1%2Fvol-1:0:Mon Jan  2 10%3A00%3A00 2017:0:0::off:-:
";

    const UNLINKED: &str = "\
mmlsfileset::HEADER:version:reserved:reserved:filesystemName:filesetName:id:rootInode:status:path:parentId:
mmlsfileset::0:1:::gpfs1:LightweightVolumes:4:--:Unlinked:--:0:
";

    #[test]
    fn parses_linked_fileset() {
        let info = parse_fileset_listing(LINKED, "vol-1").unwrap();
        assert!(info.is_linked());
        assert_eq!(info.path.as_deref(), Some("/gpfs/fs1/vol-1"));
    }

    #[test]
    fn parses_unlinked_fileset() {
        let info = parse_fileset_listing(UNLINKED, "LightweightVolumes").unwrap();
        assert_eq!(info.status, FilesetStatus::Unlinked);
        assert_eq!(info.path, None);
    }

    #[test]
    fn listing_without_header_is_an_error() {
        assert!(parse_fileset_listing("", "vol-1").is_err());
        assert!(parse_fileset_listing(LINKED, "other").is_err());
    }

    #[test]
    fn parses_cluster_id() {
        let out = "\n\
GPFS cluster information\n\
========================\n\
  GPFS cluster name:         cluster1.example.com\n\
  GPFS cluster id:           13882390374179224464\n\
  GPFS UID domain:           cluster1.example.com\n";
        assert_eq!(parse_cluster_id(out).as_deref(), Some("13882390374179224464"));
        assert_eq!(parse_cluster_id("GPFS cluster id:   \n"), None);
    }

    #[test]
    fn parses_mounted_nodes() {
        let out = "\
mmlsmount::HEADER:version:reserved:reserved:localDevName:realDevName:owningCluster:totalNodes:nodeIP:nodeName:clusterName:env:
mmlsmount::0:1:::gpfs1:gpfs1:cluster1:2:10.0.0.1:node1.example.com:cluster1:RW:
mmlsmount::0:1:::gpfs1:gpfs1:cluster1:2:10.0.0.2:node2:cluster1:RW:
";
        assert_eq!(parse_mounted_nodes(out), vec!["node1.example.com", "node2"]);
        assert!(parse_mounted_nodes("").is_empty());
    }

    #[test]
    fn node_name_matching() {
        assert!(is_same_node("node1.example.com", "node1"));
        assert!(is_same_node("NODE2", "node2"));
        assert!(!is_same_node("node10", "node1"));
    }
}
