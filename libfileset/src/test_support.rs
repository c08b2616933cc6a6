//! In-memory cluster used by unit tests.
//!
//! [`FakeCluster`] implements [`Executor`] by simulating the subset of `mm*`
//! command semantics the backend relies on, plus the host directory helpers.
//! Every command invocation is recorded so tests can assert on it.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::executor::{CommandError, EXIT_NOT_FOUND, Executor};

#[derive(Debug, Clone, Default)]
pub(crate) struct FakeFileset {
    pub linked: bool,
    pub quota: Option<String>,
    pub inode_limit: Option<u64>,
}

#[derive(Debug, Default)]
struct State {
    filesets: HashMap<String, FakeFileset>,
    dirs: HashSet<PathBuf>,
    owners: HashMap<PathBuf, (Option<u32>, Option<u32>)>,
    mounted_on: Vec<String>,
    calls: Vec<(String, Vec<String>)>,
    failures: HashMap<String, CommandError>,
}

/// Simulated Spectrum Scale cluster with one filesystem mounted at `root`.
#[derive(Debug, Clone)]
pub(crate) struct FakeCluster {
    root: PathBuf,
    filesystem: String,
    hostname: String,
    cluster_id: String,
    state: Arc<Mutex<State>>,
}

fn not_found(program: &str, what: &str) -> CommandError {
    CommandError::NotFound {
        program: program.to_owned(),
        stderr: format!("{what} not found (exit {EXIT_NOT_FOUND})"),
    }
}

fn failed(program: &str, stderr: impl Into<String>) -> CommandError {
    CommandError::Failed {
        program: program.to_owned(),
        code: Some(1),
        stderr: stderr.into(),
    }
}

fn arg(args: &[String], i: usize) -> &str {
    args.get(i).map(String::as_str).unwrap_or_default()
}

impl FakeCluster {
    /// A cluster whose filesystem is already mounted on this node.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let cluster = Self::unmounted(root);
        cluster.lock().mounted_on.push("node1.example.com".to_owned());
        cluster
    }

    /// A cluster whose filesystem is not mounted on this node yet.
    pub fn unmounted(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            filesystem: "gpfs1".to_owned(),
            hostname: "node1".to_owned(),
            cluster_id: "13882390374179224464".to_owned(),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Pre-create a fileset, optionally linked at `<root>/<name>`.
    pub fn add_fileset(&self, name: &str, linked: bool) {
        let mut state = self.lock();
        state.filesets.insert(
            name.to_owned(),
            FakeFileset {
                linked,
                ..Default::default()
            },
        );
        if linked {
            state.dirs.insert(self.root.join(name));
        }
    }

    /// Delete a fileset behind the backend's back.
    pub fn drop_fileset(&self, name: &str) {
        let mut state = self.lock();
        state.filesets.remove(name);
        let junction = self.root.join(name);
        state.dirs.retain(|d| !d.starts_with(&junction));
    }

    pub fn fileset(&self, name: &str) -> Option<FakeFileset> {
        self.lock().filesets.get(name).cloned()
    }

    pub fn owner(&self, path: &Path) -> Option<(Option<u32>, Option<u32>)> {
        self.lock().owners.get(path).copied()
    }

    /// Make every later invocation of `command` fail with `error`.
    pub fn fail_command(&self, command: &str, error: CommandError) {
        self.lock().failures.insert(command.to_owned(), error);
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    /// Number of recorded invocations of `command`.
    pub fn count(&self, command: &str) -> usize {
        self.lock().calls.iter().filter(|(c, _)| c == command).count()
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn is_mounted_here(&self) -> bool {
        self.lock().mounted_on.iter().any(|n| n.starts_with(&self.hostname))
    }

    /// A directory is visible only while its fileset is linked.
    fn visible(&self, state: &State, path: &Path) -> bool {
        if path == self.root {
            return true;
        }
        let Ok(rel) = path.strip_prefix(&self.root) else {
            return state.dirs.contains(path);
        };
        let top = rel
            .components()
            .next()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(fset) = state.filesets.get(&top)
            && !fset.linked
        {
            return false;
        }
        state.dirs.contains(path)
    }

    fn fileset_listing(&self, fset: &str, info: &FakeFileset) -> String {
        let (status, path) = if info.linked {
            ("Linked", self.root.join(fset).display().to_string().replace('/', "%2F"))
        } else {
            ("Unlinked", "--".to_owned())
        };
        format!(
            "mmlsfileset::HEADER:version:reserved:reserved:filesystemName:filesetName:id:rootInode:status:path:\n\
             mmlsfileset::0:1:::{}:{fset}:1:--:{status}:{path}:\n",
            self.filesystem
        )
    }

    fn run(&self, command: &str, args: &[String]) -> Result<String, CommandError> {
        let mut guard = self.lock();
        let state = &mut *guard;
        state.calls.push((command.to_owned(), args.to_vec()));
        if let Some(err) = state.failures.get(command) {
            return Err(err.clone());
        }

        match command {
            "mmlsfileset" => {
                let name = arg(args, 1);
                let info = state
                    .filesets
                    .get(name)
                    .ok_or_else(|| not_found(command, name))?;
                Ok(self.fileset_listing(name, info))
            }
            "mmcrfileset" => {
                let name = arg(args, 1);
                if state.filesets.contains_key(name) {
                    return Err(failed(command, format!("fileset {name} already exists")));
                }
                let inode_limit = args
                    .iter()
                    .position(|a| a == "--inode-limit")
                    .and_then(|i| args.get(i + 1))
                    .and_then(|v| v.parse().ok());
                state.filesets.insert(
                    name.to_owned(),
                    FakeFileset {
                        inode_limit,
                        ..Default::default()
                    },
                );
                Ok(format!("Fileset {name} created.\n"))
            }
            "mmlinkfileset" => {
                let name = arg(args, 1);
                let junction = PathBuf::from(arg(args, 3));
                let fset = state
                    .filesets
                    .get_mut(name)
                    .ok_or_else(|| not_found(command, name))?;
                if fset.linked {
                    return Err(failed(command, format!("fileset {name} is already linked")));
                }
                fset.linked = true;
                state.dirs.insert(junction);
                Ok(String::new())
            }
            "mmunlinkfileset" => {
                let name = arg(args, 1);
                let fset = state
                    .filesets
                    .get_mut(name)
                    .ok_or_else(|| not_found(command, name))?;
                if !fset.linked {
                    return Err(failed(command, format!("fileset {name} is not linked")));
                }
                fset.linked = false;
                Ok(String::new())
            }
            "mmdelfileset" => {
                let name = arg(args, 1);
                let fset = state
                    .filesets
                    .get(name)
                    .ok_or_else(|| not_found(command, name))?;
                if fset.linked {
                    return Err(failed(command, format!("fileset {name} is linked")));
                }
                state.filesets.remove(name);
                let junction = self.root.join(name);
                state.dirs.retain(|d| !d.starts_with(&junction));
                Ok(String::new())
            }
            "mmsetquota" => {
                let (_, name) = arg(args, 0).split_once(':').unwrap_or_default();
                let quota = arg(args, 2).split(':').next().unwrap_or_default().to_owned();
                let fset = state
                    .filesets
                    .get_mut(name)
                    .ok_or_else(|| not_found(command, name))?;
                fset.quota = Some(quota);
                Ok(String::new())
            }
            "mmlscluster" => Ok(format!(
                "\nGPFS cluster information\n========================\n  \
                 GPFS cluster name:         cluster1.example.com\n  \
                 GPFS cluster id:           {}\n",
                self.cluster_id
            )),
            "mmlsmount" => {
                let mut out = String::from(
                    "mmlsmount::HEADER:version:reserved:reserved:localDevName:realDevName:owningCluster:totalNodes:nodeIP:nodeName:clusterName:env:\n",
                );
                for node in &state.mounted_on {
                    out.push_str(&format!(
                        "mmlsmount::0:1:::{fs}:{fs}:cluster1:1:10.0.0.1:{node}:cluster1:RW:\n",
                        fs = self.filesystem
                    ));
                }
                Ok(out)
            }
            "mmmount" => {
                let host = self.hostname.clone();
                state.mounted_on.push(host);
                Ok(String::new())
            }
            other => Err(CommandError::Spawn {
                program: other.to_owned(),
                reason: "unknown command".to_owned(),
            }),
        }
    }
}

#[async_trait]
impl Executor for FakeCluster {
    async fn execute(&self, program: &str, args: &[String]) -> Result<Vec<u8>, CommandError> {
        let command = Path::new(program)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.run(&command, args).map(String::into_bytes)
    }

    async fn exists(&self, path: &Path) -> bool {
        let state = self.lock();
        self.visible(&state, path)
    }

    async fn create_dir(&self, path: &Path) -> Result<(), CommandError> {
        let mut state = self.lock();
        let io = |reason: &str| CommandError::Io {
            op: "mkdir",
            path: path.display().to_string(),
            reason: reason.to_owned(),
        };
        if self.visible(&state, path) {
            return Err(io("File exists"));
        }
        match path.parent() {
            Some(parent) if self.visible(&state, parent) => {}
            _ => return Err(io("No such file or directory")),
        }
        state.dirs.insert(path.to_path_buf());
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<(), CommandError> {
        let mut state = self.lock();
        if !self.visible(&state, path) {
            return Err(CommandError::Io {
                op: "remove",
                path: path.display().to_string(),
                reason: "No such file or directory".to_owned(),
            });
        }
        state.dirs.retain(|d| !d.starts_with(path));
        Ok(())
    }

    async fn chown(
        &self,
        path: &Path,
        uid: Option<u32>,
        gid: Option<u32>,
    ) -> Result<(), CommandError> {
        let mut state = self.lock();
        if !self.visible(&state, path) {
            return Err(CommandError::Io {
                op: "chown",
                path: path.display().to_string(),
                reason: "No such file or directory".to_owned(),
            });
        }
        state.owners.insert(path.to_path_buf(), (uid, gid));
        Ok(())
    }

    async fn hostname(&self) -> Result<String, CommandError> {
        Ok(self.hostname.clone())
    }
}
