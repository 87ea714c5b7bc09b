use serde::{Deserialize, Serialize};

use super::{Context, FinishStep, InstallMode, ParameterBag, StepInfo};
use crate::prelude::*;
use crate::util::{cmd::Cmd, fs::exist_then_read_dir};

/// Script a driver update may ship to patch the installed system.
const UPDATE_POST2: &str = "install/update.post2";

/// Lets driver updates loaded during installation finish their job on the
/// target, then gives the product a chance to do the same.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverUpdate;

impl FinishStep for DriverUpdate {
    fn info(&self) -> StepInfo {
        StepInfo::new(
            0,
            None,
            &[InstallMode::Install, InstallMode::Update, InstallMode::Autoinst],
        )
    }

    #[tracing::instrument(skip_all)]
    fn write(&self, context: &Context, _params: &ParameterBag) -> Result<bool> {
        let mut ok = true;
        for dir in update_dirs(&context.config.driver_update.dir)? {
            let script = dir.join(UPDATE_POST2);
            if !script.is_file() {
                continue;
            }
            tracing::info!(?script, "Running driver update script");
            ok &= run_script(context, Cmd::new(&script).arg(&context.target_root));
        }

        if let Some(hook) = &context.config.driver_update.product_hook {
            if hook.is_file() {
                let mut cmd = Cmd::new(hook);
                if context.mode == InstallMode::Update {
                    cmd = cmd.arg("--update");
                }
                ok &= run_script(context, cmd);
            } else {
                tracing::debug!(?hook, "No product hook");
            }
        }
        Ok(ok)
    }
}

/// Driver updates are unpacked into numbered directories, `000`, `001`...
fn update_dirs(dir: &Path) -> Result<Vec<PathBuf>> {
    Ok(exist_then_read_dir(dir)
        .wrap_err_with(|| format!("cannot list {dir:?}"))?
        .filter(|entry| {
            entry
                .file_name()
                .to_str()
                .is_some_and(|name| !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit()))
        })
        .map(|entry| entry.path())
        .sorted()
        .collect())
}

fn run_script(context: &Context, cmd: Cmd) -> bool {
    match context.runner.run(&cmd) {
        Ok(out) if out.success() => true,
        Ok(out) => {
            tracing::warn!("{cmd} failed with {}", out.detail());
            false
        }
        Err(e) => {
            tracing::warn!("cannot run {cmd}: {e}");
            false
        }
    }
}
