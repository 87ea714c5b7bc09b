//! Fakes for the collaborators a finish step talks to.
use std::{collections::HashMap, sync::Arc};

use mount_table::{MountEntry, MountTable, MountTableError};
use parking_lot::Mutex;

use super::{
    finish::{Context, InstallMode},
    network::CopyNetworkWriter,
    proxy::SysconfigProxyWriter,
    storage::{StagedFilesystem, StorageProbe},
    unmounter::MountSource,
};
use crate::{
    cfg::FinisherConfig,
    prelude::*,
    util::cmd::{Cmd, CmdOutput, CommandRunner},
};

/// A pretend machine: a mount table that `umount` really shrinks, plus
/// canned answers for every other program.
#[derive(Default)]
pub struct FakeSystem {
    mounts: Mutex<Vec<MountEntry>>,
    failing: Mutex<HashMap<PathBuf, String>>,
    sticky: Mutex<Vec<PathBuf>>,
    /// Program name, an argument it must have, the answer.
    responses: Mutex<Vec<(String, Option<String>, CmdOutput)>>,
    calls: Mutex<Vec<Cmd>>,
}

pub fn entry(device: &str, mount_point: &str, fs_type: &str, options: &str) -> MountEntry {
    MountEntry {
        device: device.to_owned(),
        mount_point: mount_point.into(),
        fs_type: fs_type.to_owned(),
        options: options.split(',').map(ToOwned::to_owned).collect(),
    }
}

impl FakeSystem {
    pub fn with_mounts<S: AsRef<str>>(mount_points: &[S]) -> Arc<Self> {
        Self::with_entries(
            mount_points
                .iter()
                .map(|m| entry("/dev/fake", m.as_ref(), "ext4", "rw"))
                .collect(),
        )
    }

    pub fn with_entries(entries: Vec<MountEntry>) -> Arc<Self> {
        Arc::new(Self {
            mounts: Mutex::new(entries),
            ..Self::default()
        })
    }

    pub fn fail_umount<P: AsRef<Path>>(&self, path: P, stderr: &str) {
        self.failing
            .lock()
            .insert(path.as_ref().to_owned(), stderr.to_owned());
    }

    /// `umount` reports success for `path` but the mount stays.
    pub fn keep_mounted<P: AsRef<Path>>(&self, path: P) {
        self.sticky.lock().push(path.as_ref().to_owned());
    }

    pub fn respond(&self, program: &str, code: i32, stdout: &str, stderr: &str) {
        self.add_response(program, None, code, stdout, stderr);
    }

    /// Like [`FakeSystem::respond`], only for invocations passing `arg`.
    /// Takes precedence over the plain answer.
    pub fn respond_with_arg(&self, program: &str, arg: &str, code: i32, stdout: &str, stderr: &str) {
        self.add_response(program, Some(arg), code, stdout, stderr);
    }

    fn add_response(&self, program: &str, arg: Option<&str>, code: i32, stdout: &str, stderr: &str) {
        self.responses.lock().push((
            program.to_owned(),
            arg.map(ToOwned::to_owned),
            CmdOutput {
                code: Some(code),
                stdout: stdout.to_owned(),
                stderr: stderr.to_owned(),
            },
        ));
    }

    fn response(&self, cmd: &Cmd) -> Option<CmdOutput> {
        let responses = self.responses.lock();
        let mut candidates = responses.iter().rev().filter(|(p, _, _)| cmd.is(p));
        let with_arg = candidates
            .clone()
            .find(|(_, arg, _)| arg.as_ref().is_some_and(|a| cmd.args.iter().any(|x| x == a.as_str())));
        with_arg
            .or_else(|| candidates.find(|(_, arg, _)| arg.is_none()))
            .map(|(_, _, out)| out.clone())
    }

    pub fn calls(&self) -> Vec<Cmd> {
        self.calls.lock().clone()
    }

    pub fn calls_to(&self, program: &str) -> Vec<Cmd> {
        self.calls().into_iter().filter(|c| c.is(program)).collect()
    }

    pub fn umount_calls(&self) -> Vec<PathBuf> {
        self.calls_to("umount")
            .into_iter()
            .filter_map(|c| c.args.first().map(PathBuf::from))
            .collect()
    }

    pub fn mounted(&self) -> Vec<PathBuf> {
        self.mounts
            .lock()
            .iter()
            .map(|e| e.mount_point.clone())
            .collect()
    }

    fn umount(&self, cmd: &Cmd) -> CmdOutput {
        let Some(path) = cmd.args.first().map(PathBuf::from) else {
            return CmdOutput {
                code: Some(1),
                ..CmdOutput::default()
            };
        };
        if let Some(stderr) = self.failing.lock().get(&path) {
            return CmdOutput {
                code: Some(32),
                stderr: stderr.clone(),
                ..CmdOutput::default()
            };
        }
        if !self.sticky.lock().contains(&path) {
            let mut mounts = self.mounts.lock();
            if let Some(pos) = mounts.iter().rposition(|e| e.mount_point == path) {
                mounts.remove(pos);
            }
        }
        CmdOutput {
            code: Some(0),
            ..CmdOutput::default()
        }
    }
}

impl CommandRunner for FakeSystem {
    fn run(&self, cmd: &Cmd) -> std::io::Result<CmdOutput> {
        self.calls.lock().push(cmd.clone());
        if cmd.is("umount") {
            return Ok(self.umount(cmd));
        }
        Ok(self.response(cmd).unwrap_or(CmdOutput {
            code: Some(0),
            ..CmdOutput::default()
        }))
    }
}

impl MountSource for FakeSystem {
    fn read_mounts(&self) -> std::result::Result<MountTable, MountTableError> {
        Ok(MountTable {
            entries: self.mounts.lock().clone(),
        })
    }
}

impl StorageProbe for Vec<StagedFilesystem> {
    fn staged_filesystems(&self) -> Result<Vec<StagedFilesystem>> {
        Ok(self.clone())
    }
}

/// A context for an installation into `root`, every command going to `sys`.
pub fn context(root: &Path, sys: &Arc<FakeSystem>) -> Context {
    Context {
        target_root: root.to_owned(),
        mode: InstallMode::Install,
        initial_stage: true,
        second_stage_required: false,
        standalone: false,
        proc_dir: root.join("proc-not-there"),
        config: FinisherConfig::default(),
        runner: Box::new(Arc::clone(sys)),
        mounts: Box::new(Arc::clone(sys)),
        storage: Box::new(Vec::<StagedFilesystem>::new()),
        proxy: Box::new(SysconfigProxyWriter),
        network: Box::new(CopyNetworkWriter::new(vec![])),
    }
}
