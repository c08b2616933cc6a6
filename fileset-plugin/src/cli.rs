use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use libfileset::BackendConfig;
use libfileset::config::{DEFAULT_LIGHTWEIGHT_FILESET, DEFAULT_MM_BIN_DIR};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub(crate) struct Args {
    /// Address the plugin listens on
    #[arg(long, env = "FILESET_PLUGIN_LISTEN_ADDR", default_value = "0.0.0.0")]
    pub(crate) listen_addr: String,

    /// Port the plugin listens on
    #[arg(long, env = "FILESET_PLUGIN_LISTEN_PORT", default_value_t = 9000)]
    pub(crate) listen_port: u16,

    /// Directory Docker discovers plugin spec files in
    #[arg(long, env = "FILESET_PLUGIN_PLUGINS_DIRECTORY", default_value = "/etc/docker/plugins")]
    pub(crate) plugins_directory: PathBuf,

    /// Driver name registered with Docker
    #[arg(long, env = "FILESET_PLUGIN_NAME", default_value = "spectrum-scale")]
    pub(crate) plugin_name: String,

    /// Spectrum Scale filesystem serving the volumes
    #[arg(long, env = "FILESET_PLUGIN_FILESYSTEM", default_value = "gpfs1")]
    pub(crate) filesystem: String,

    /// Mount point of the filesystem on this node
    #[arg(long, env = "FILESET_PLUGIN_MOUNTPATH", default_value = "/gpfs/fs1")]
    pub(crate) mountpath: PathBuf,

    /// Fileset shared by lightweight volumes
    #[arg(long, env = "FILESET_PLUGIN_LIGHTWEIGHT_FILESET", default_value = DEFAULT_LIGHTWEIGHT_FILESET)]
    pub(crate) lightweight_fileset: String,

    /// Directory of the volume mapping store [default: <mountpath>/.fileset-plugin]
    #[arg(long, env = "FILESET_PLUGIN_STORE_DIR")]
    pub(crate) store_dir: Option<PathBuf>,

    /// Lock file serializing volume operations [default: <mountpath>/.fileset-plugin.lock]
    #[arg(long, env = "FILESET_PLUGIN_LOCK_FILE")]
    pub(crate) lock_file: Option<PathBuf>,

    /// Directory containing the mm* management commands
    #[arg(long, env = "FILESET_PLUGIN_MM_BIN_DIR", default_value = DEFAULT_MM_BIN_DIR)]
    pub(crate) mm_bin_dir: PathBuf,

    /// Seconds after which a management command is killed
    #[arg(long, env = "FILESET_PLUGIN_COMMAND_TIMEOUT", default_value_t = 300)]
    pub(crate) command_timeout_secs: u64,

    /// Directory for fileset-plugin.log; stdout only when unset
    #[arg(long, env = "FILESET_PLUGIN_LOG_PATH")]
    pub(crate) log_path: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, env = "FILESET_PLUGIN_LOG_LEVEL", default_value = "info")]
    pub(crate) log_level: String,

    /// Emit logs as JSON
    #[arg(long, env = "FILESET_PLUGIN_LOG_JSON")]
    pub(crate) log_json: bool,
}

impl Args {
    pub(crate) fn backend_config(&self) -> BackendConfig {
        let mut config = BackendConfig::new(self.filesystem.clone(), self.mountpath.clone());
        config.lightweight_fileset = self.lightweight_fileset.clone();
        config.mm_bin_dir = self.mm_bin_dir.clone();
        config.command_timeout = Duration::from_secs(self.command_timeout_secs);
        if let Some(dir) = &self.store_dir {
            config.store_dir = dir.clone();
        }
        if let Some(file) = &self.lock_file {
            config.lock_file = file.clone();
        }
        config
    }

    /// URL Docker uses to reach the plugin.
    pub(crate) fn advertised_addr(&self) -> String {
        format!("http://{}:{}", self.listen_addr, self.listen_port)
    }
}
