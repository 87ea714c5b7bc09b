use serde::{Deserialize, Serialize};

use super::{Context, FinishStep, InstallMode, ParameterBag, StepInfo};
use crate::backend::{
    error::FinishError,
    storage::StagedFilesystem,
    unmounter::{UnmountResult, Unmounter},
};
use crate::consts::{MTAB, PROC_SELF_MOUNTS};
use crate::prelude::*;
use crate::stage;
use crate::util::{cmd::Cmd, fs::remove_if_exists};

/// Name btrfs tools give the top level tree.
const BTRFS_FS_TREE: &str = "(FS_TREE)";

/// Takes every mount of the target down. Has to be the last step touching
/// the target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Umount;

impl FinishStep for Umount {
    fn info(&self) -> StepInfo {
        StepInfo::new(
            1,
            Some("Unmounting all mounted devices..."),
            &[
                InstallMode::Install,
                InstallMode::LiveInstall,
                InstallMode::Update,
                InstallMode::Autoinst,
            ],
        )
    }

    #[tracing::instrument(skip_all, fields(root = ?context.target_root))]
    fn write(&self, context: &Context, _params: &ParameterBag) -> Result<bool> {
        tracing::info!("Starting umount finish");

        stage!(mtab "Replacing the target's /etc/mtab" {
            if let Err(e) = remove_target_etc_mtab(&context.target_path(MTAB)) {
                tracing::warn!("Cannot fix /etc/mtab on the target: {e:?}");
            }
        });

        // no write access to the target after this
        stage!(btrfs "Setting read-only btrfs defaults" {
            set_btrfs_defaults_as_ro(context);
        });

        stage!(umount "Unmounting the target" {
            umount_target_mounts(context);
        });

        tracing::info!("umount finish done");
        Ok(true)
    }
}

/// Replace the `/etc/mtab` faked for package scriptlets with the usual
/// symlink into procfs. A symlink that is already there is left alone.
///
/// Returns whether anything changed.
pub fn remove_target_etc_mtab(mtab: &Path) -> Result<bool> {
    match std::fs::symlink_metadata(mtab) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            tracing::debug!(?mtab, "Already a symlink, keeping it");
            return Ok(false);
        }
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
            return Err(e).wrap_err_with(|| format!("cannot stat {mtab:?}"));
        }
        _ => {}
    }

    remove_if_exists(mtab).wrap_err_with(|| format!("cannot remove {mtab:?}"))?;
    if let Some(parent) = mtab.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::os::unix::fs::symlink(PROC_SELF_MOUNTS, mtab)
        .wrap_err_with(|| format!("cannot link {mtab:?} to {PROC_SELF_MOUNTS}"))?;
    tracing::info!(?mtab, "Recreated as a symlink to {PROC_SELF_MOUNTS}");
    Ok(true)
}

/// Make the root subvolume of every new, read-only btrfs read-only for
/// real. Packages had to be installed into it first, so this can only
/// happen now, while it is still mounted.
///
/// Returns the subvolume paths the property was set on.
pub fn set_btrfs_defaults_as_ro(context: &Context) -> Vec<PathBuf> {
    // would make the subvolume of the system we run on read-only
    if context.standalone {
        tracing::debug!("Running standalone, leaving btrfs properties alone");
        return vec![];
    }

    let filesystems = match context.storage.staged_filesystems() {
        Ok(filesystems) => filesystems,
        Err(e) => {
            tracing::error!("Cannot get the staged filesystems: {e:?}");
            return vec![];
        }
    };

    filesystems
        .iter()
        .filter(|fs| fs.is_new() && fs.is_read_only_btrfs())
        .filter_map(|fs| match default_subvolume_as_ro(context, fs) {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::error!("{e}");
                None
            }
        })
        .collect()
}

fn default_subvolume_as_ro(
    context: &Context,
    fs: &StagedFilesystem,
) -> std::result::Result<PathBuf, FinishError> {
    let Some(mount_point) = &fs.mount_point else {
        return Err(FinishError::PropertySetFailure {
            path: PathBuf::from(&fs.device),
            detail: "not mounted".to_owned(),
        });
    };

    let run = |cmd: Cmd, path: &Path| match context.runner.run(&cmd.on_target(&context.target_root)) {
        Ok(out) if out.success() => Ok(out),
        Ok(out) => Err(FinishError::property_set(path.to_owned(), out.detail())),
        Err(e) => Err(FinishError::property_set(path.to_owned(), e.to_string())),
    };

    let out = run(
        Cmd::new("btrfs")
            .args(["subvolume", "get-default"])
            .arg(mount_point),
        mount_point,
    )?;
    let default_subvolume = match out.stdout.split_whitespace().last() {
        // no default subvolume and no snapshots
        Some(BTRFS_FS_TREE) | None => "",
        Some(subvolume) => subvolume,
    };
    let subvolume_path = fs
        .subvolume_mount_point(default_subvolume)
        .unwrap_or_else(|| mount_point.clone());

    tracing::info!("Setting root subvol read-only property on {subvolume_path:?}");
    run(
        Cmd::new("btrfs")
            .args(["property", "set"])
            .arg(&subvolume_path)
            .args(["ro", "true"]),
        &subvolume_path,
    )?;
    Ok(subvolume_path)
}

/// Unmount everything below the target root, then log what is left and
/// who is holding on to it.
pub fn umount_target_mounts(context: &Context) -> Option<UnmountResult> {
    dump_file(&context.proc_dir.join("partitions"));
    dump_file(&context.proc_dir.join("mounts"));

    let unmounter = Unmounter::new(
        &context.target_root,
        context.mounts.as_ref(),
        context.runner.as_ref(),
    );
    let result = match unmounter.execute() {
        Ok(result) => result,
        Err(e) => {
            tracing::error!("Cannot unmount the target: {e:?}");
            return None;
        }
    };

    if result.is_complete() {
        tracing::info!("All unmounts successful.");
    } else {
        tracing::warn!("{}", FinishError::PartialUnmount(result.leftover.clone()));
        let holders = unmounter.holders(&result.leftover);
        // one line, so the report stays attached to its span
        tracing::warn!(leftover = ?result.leftover, ?holders, "Running processes");
        dump_file(&context.proc_dir.join("mounts"));
    }
    Some(result)
}

/// Log a file as-is, so it can be copied out of the log in one piece.
fn dump_file(path: &Path) {
    match std::fs::read_to_string(path) {
        Ok(content) => tracing::info!("\n\n{}:\n\n{content}\n", path.display()),
        Err(e) => tracing::warn!(?path, "Cannot dump file: {e}"),
    }
}
