//! Takes down every mount below the target root in one pass.
//!
//! The live mount table is the only source of truth here: snapper, package
//! scriptlets and friends mount things behind the installer's back, so the
//! planned storage layout cannot be trusted to know what is mounted.
use std::sync::Arc;

use mount_table::{MountTable, MountTableError, PROC_MOUNTS};

use super::error::FinishError;
use crate::prelude::*;
use crate::util::cmd::{Cmd, CommandRunner};

/// Somewhere to read the current mount table from.
pub trait MountSource {
    /// # Errors
    /// - the table cannot be read or parsed
    fn read_mounts(&self) -> std::result::Result<MountTable, MountTableError>;
}

impl<T: MountSource + ?Sized> MountSource for Arc<T> {
    fn read_mounts(&self) -> std::result::Result<MountTable, MountTableError> {
        (**self).read_mounts()
    }
}

/// The kernel's view, `/proc/mounts` unless pointed elsewhere.
#[derive(Debug, Clone)]
pub struct ProcMounts {
    path: PathBuf,
}

impl Default for ProcMounts {
    fn default() -> Self {
        Self {
            path: PathBuf::from(PROC_MOUNTS),
        }
    }
}

impl MountSource for ProcMounts {
    fn read_mounts(&self) -> std::result::Result<MountTable, MountTableError> {
        mount_table::read_mounts_file(&self.path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnmountResult {
    /// Every path an unmount was issued for, in order.
    pub attempted: Vec<PathBuf>,
    /// Paths still mounted after the pass.
    pub leftover: Vec<PathBuf>,
}

impl UnmountResult {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.leftover.is_empty()
    }
}

pub struct Unmounter<'a> {
    root: PathBuf,
    mounts: &'a dyn MountSource,
    runner: &'a dyn CommandRunner,
}

impl<'a> Unmounter<'a> {
    pub fn new(root: &Path, mounts: &'a dyn MountSource, runner: &'a dyn CommandRunner) -> Self {
        Self {
            root: root.to_owned(),
            mounts,
            runner,
        }
    }

    /// Mount points at or below the root, children before parents, read
    /// fresh from the mount source on every call.
    ///
    /// # Errors
    /// - the mount table cannot be read
    pub fn unmount_paths(&self) -> Result<Vec<PathBuf>> {
        let table = self
            .mounts
            .read_mounts()
            .wrap_err("cannot read the mount table")?;
        Ok(table.paths_under(&self.root))
    }

    /// Issue a single unmount.
    ///
    /// # Errors
    /// - [`FinishError::PermissionFailure`] when privileges are missing
    /// - [`FinishError::UnmountFailure`] for anything else
    pub fn unmount(&self, path: &Path) -> std::result::Result<(), FinishError> {
        tracing::debug!(?path, "Unmounting");
        match self.runner.run(&Cmd::new("umount").arg(path)) {
            Ok(out) if out.success() => Ok(()),
            Ok(out) => Err(FinishError::unmount(path.to_owned(), out.detail())),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(FinishError::PermissionFailure {
                    path: path.to_owned(),
                    detail: e.to_string(),
                })
            }
            Err(e) => Err(FinishError::unmount(path.to_owned(), e.to_string())),
        }
    }

    /// Collect, attempt every path once, then reconcile against a fresh
    /// read of the mount table.
    ///
    /// A failed unmount never stops the pass. Nothing is retried.
    ///
    /// # Errors
    /// - the mount table cannot be read before the pass
    #[tracing::instrument(skip(self), fields(root = ?self.root))]
    pub fn execute(&self) -> Result<UnmountResult> {
        let attempted = self.unmount_paths()?;
        tracing::info!(?attempted, "Paths to unmount");
        if attempted.is_empty() {
            return Ok(UnmountResult::default());
        }

        let mut failed = vec![];
        for path in &attempted {
            if let Err(e) = self.unmount(path) {
                match e {
                    FinishError::PermissionFailure { .. } => tracing::error!("{e}"),
                    _ => tracing::warn!("{e}"),
                }
                failed.push(path.clone());
            }
        }

        let leftover = self.unmount_paths().unwrap_or_else(|e| {
            tracing::warn!(?e, "Cannot re-read the mount table, reporting failed attempts");
            failed
        });

        Ok(UnmountResult {
            attempted,
            leftover,
        })
    }

    /// Ask `fuser` which processes keep `paths` busy.
    ///
    /// Never fails; a broken `fuser` is described in the returned text.
    pub fn holders(&self, paths: &[PathBuf]) -> String {
        // the details are printed on stderr
        let cmd = Cmd::new("fuser").args(["-v", "-m"]).args(paths).env("LC_ALL", "C");
        match self.runner.run(&cmd) {
            Ok(out) => format!("{}{}", out.stdout, out.stderr),
            Err(e) => format!("fuser failed: {e}"),
        }
    }
}
