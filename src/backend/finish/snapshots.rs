use serde::{Deserialize, Serialize};

use super::{Context, FinishStep, InstallMode, ParameterBag, StepInfo};
use crate::consts::PRE_SNAPSHOT_FILE;
use crate::prelude::*;
use crate::util::{cmd::Cmd, fs::remove_if_exists};

/// Takes a snapper snapshot of the freshly installed or updated system.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshots;

impl FinishStep for Snapshots {
    fn info(&self) -> StepInfo {
        StepInfo::new(
            1,
            Some("Creating snapshot..."),
            &[InstallMode::Install, InstallMode::Update],
        )
    }

    #[tracing::instrument(skip_all, fields(mode = ?context.mode))]
    fn write(&self, context: &Context, _params: &ParameterBag) -> Result<bool> {
        if context.second_stage_required {
            tracing::info!("Second stage pending, the snapshot is taken after it");
            return Ok(false);
        }
        if !snapper_configured(context) {
            tracing::info!("Snapper is not configured on the target");
            return Ok(false);
        }

        let created = if context.mode == InstallMode::Update {
            create_post_update(context)
        } else {
            create(context, snapper(context).args([
                "create",
                "--type",
                "single",
                "--description",
                "after installation",
            ]))
        };
        match created {
            Ok(()) => Ok(true),
            Err(e) => {
                tracing::error!("Snapshot could not be created: {e:?}");
                Ok(false)
            }
        }
    }
}

fn snapper(context: &Context) -> Cmd {
    Cmd::new("snapper")
        .arg("--no-dbus")
        .arg("--root")
        .arg(&context.target_root)
}

fn snapper_configured(context: &Context) -> bool {
    let cmd = snapper(context).args(["--csvout", "list-configs", "--columns", "config"]);
    match context.runner.run(&cmd) {
        Ok(out) if out.success() => out.stdout.lines().any(|line| line.trim() == "root"),
        Ok(out) => {
            tracing::debug!("{cmd} failed with {}", out.detail());
            false
        }
        Err(e) => {
            tracing::debug!("cannot run {cmd}: {e}");
            false
        }
    }
}

/// Pair the new snapshot with the one taken before the update started.
fn create_post_update(context: &Context) -> Result<()> {
    let state = context
        .target_path(&context.config.snapshots.state_dir)
        .join(PRE_SNAPSHOT_FILE);
    let pre_number = std::fs::read_to_string(&state)
        .wrap_err_with(|| format!("cannot read the pre-update snapshot number from {state:?}"))?
        .trim()
        .parse::<u32>()
        .wrap_err("invalid pre-update snapshot number")?;

    create(
        context,
        snapper(context)
            .args(["create", "--type", "post", "--pre-number"])
            .arg(pre_number.to_string())
            .args(["--description", "after update"]),
    )?;
    remove_if_exists(&state)
}

fn create(context: &Context, cmd: Cmd) -> Result<()> {
    let cmd = cmd.args(["--cleanup-algorithm", "number", "--userdata", "important=yes"]);
    let out = context
        .runner
        .run(&cmd)
        .wrap_err_with(|| format!("cannot run {cmd}"))?;
    if !out.success() {
        bail!("{cmd} failed with {}", out.detail());
    }
    tracing::info!("Snapshot created: {}", out.stdout.trim());
    Ok(())
}
