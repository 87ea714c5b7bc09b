use super::InstallMode;
use crate::backend::{
    network::{CopyNetworkWriter, NetworkWriter},
    proxy::{ProxyWriter, SysconfigProxyWriter},
    storage::{StagingFile, StorageProbe},
    unmounter::{MountSource, ProcMounts},
};
use crate::cfg::FinisherConfig;
use crate::consts::{DEFAULT_PROC_DIR, STANDALONE_TARGET_ROOT};
use crate::prelude::*;
use crate::util::cmd::{CommandRunner, SystemRunner};

/// Everything a finish step gets to work with: where the target is, what
/// kind of installation is running, and the collaborators it may call.
pub struct Context {
    pub target_root: PathBuf,
    pub mode: InstallMode,
    /// The first stage, which runs from the installation medium.
    pub initial_stage: bool,
    pub second_stage_required: bool,
    /// Invoked by hand outside of an installation, see [`Context::standalone`].
    pub standalone: bool,
    /// Where the live system's procfs is mounted.
    pub proc_dir: PathBuf,
    pub config: FinisherConfig,
    pub runner: Box<dyn CommandRunner>,
    pub mounts: Box<dyn MountSource>,
    pub storage: Box<dyn StorageProbe>,
    pub proxy: Box<dyn ProxyWriter>,
    pub network: Box<dyn NetworkWriter>,
}

impl Context {
    /// Wire the production collaborators up according to `config`.
    pub fn new(config: FinisherConfig) -> Self {
        Self {
            target_root: config.install.target_root.clone(),
            mode: config.install.mode,
            initial_stage: config.install.initial_stage,
            second_stage_required: config.install.second_stage_required,
            standalone: false,
            proc_dir: DEFAULT_PROC_DIR.into(),
            runner: Box::new(SystemRunner),
            mounts: Box::new(ProcMounts::default()),
            storage: Box::new(StagingFile {
                path: config.storage.staging.clone(),
            }),
            proxy: Box::new(SysconfigProxyWriter),
            network: Box::new(CopyNetworkWriter::new(config.network.paths.clone())),
            config,
        }
    }

    /// A context for running a step by hand, i.e. to watch what umount
    /// would take down. A target root of `/` is moved to `/mnt` so the
    /// running system is left alone.
    pub fn standalone(config: FinisherConfig) -> Self {
        let mut context = Self::new(config);
        if context.target_root == Path::new("/") {
            context.target_root = STANDALONE_TARGET_ROOT.into();
        }
        context.standalone = true;
        context
    }

    /// `path` of the installed system, as reachable from here.
    pub fn target_path<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        crate::backend::target_path(&self.target_root, path)
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("target_root", &self.target_root)
            .field("mode", &self.mode)
            .field("initial_stage", &self.initial_stage)
            .field("second_stage_required", &self.second_stage_required)
            .field("standalone", &self.standalone)
            .finish_non_exhaustive()
    }
}
