//! Backend configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Name of the fileset shared by lightweight volumes unless configured otherwise.
pub const DEFAULT_LIGHTWEIGHT_FILESET: &str = "LightweightVolumes";
/// Where Spectrum Scale installs its management commands.
pub const DEFAULT_MM_BIN_DIR: &str = "/usr/lpp/mmfs/bin";
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

const STORE_DIR_NAME: &str = ".fileset-plugin";
const LOCK_FILE_NAME: &str = ".fileset-plugin.lock";

/// Settings the backend depends on but does not own.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Clustered filesystem this plugin instance serves.
    pub filesystem: String,
    /// Where the filesystem is mounted on this node.
    pub mountpoint: PathBuf,
    /// Reserved fileset hosting lightweight volumes.
    pub lightweight_fileset: String,
    /// Directory of the mapping store.
    pub store_dir: PathBuf,
    /// Lock file used to serialize mutating operations.
    pub lock_file: PathBuf,
    /// Directory containing the `mm*` commands.
    pub mm_bin_dir: PathBuf,
    pub command_timeout: Duration,
}

impl BackendConfig {
    /// Configuration with everything but the filesystem and its mountpoint
    /// defaulted.  The store and lock file live on the shared filesystem so
    /// that all nodes agree on them.
    pub fn new(filesystem: impl Into<String>, mountpoint: impl Into<PathBuf>) -> Self {
        let mountpoint = mountpoint.into();
        Self {
            filesystem: filesystem.into(),
            store_dir: mountpoint.join(STORE_DIR_NAME),
            lock_file: mountpoint.join(LOCK_FILE_NAME),
            mountpoint,
            lightweight_fileset: DEFAULT_LIGHTWEIGHT_FILESET.to_owned(),
            mm_bin_dir: PathBuf::from(DEFAULT_MM_BIN_DIR),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Junction path of a fileset when linked.
    pub fn fileset_path(&self, fileset: &str) -> PathBuf {
        self.mountpoint.join(fileset)
    }
}
