use serde::{Deserialize, Serialize};

use super::{Context, FinishStep, InstallMode, ParameterBag, StepInfo};
use crate::consts::{MODPROBE_CONF, MODULES_LOAD_CONF};
use crate::prelude::*;

/// Modules only SGI Altix machines need at boot.
const SGI_MODULES: [&str; 2] = ["fetchop", "mmtimer"];

/// Tells the installed system which kernel modules to load at boot and with
/// which options.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Kernel;

impl FinishStep for Kernel {
    fn info(&self) -> StepInfo {
        StepInfo::new(
            1,
            Some("Updating kernel module dependencies..."),
            &[InstallMode::Install, InstallMode::Update, InstallMode::Autoinst],
        )
    }

    #[tracing::instrument(skip_all)]
    fn write(&self, context: &Context, params: &ParameterBag) -> Result<bool> {
        let options = &context.config.kernel.module_options;
        if !options.is_empty() {
            let content = options
                .iter()
                .map(|(module, opts)| format!("options {module} {opts}\n"))
                .collect::<String>();
            write_conf(&context.target_path(MODPROBE_CONF), &content)?;
        }

        let modules = modules_to_load(context, params);
        if !modules.is_empty() {
            tracing::info!(?modules, "Loading kernel modules at boot");
            let content = std::iter::once("# Written by the installer\n".to_owned())
                .chain(modules.iter().map(|m| format!("{m}\n")))
                .collect::<String>();
            write_conf(&context.target_path(MODULES_LOAD_CONF), &content)?;
        }
        Ok(true)
    }
}

fn modules_to_load(context: &Context, params: &ParameterBag) -> Vec<String> {
    let sgi = is_sgi_altix(&context.proc_dir);
    if sgi {
        tracing::info!("found SGI Altix, adding fetchop and mmtimer");
    }
    context
        .config
        .kernel
        .modules_to_load
        .iter()
        .cloned()
        .chain(params.get_strings("modules_to_load"))
        .chain(
            SGI_MODULES
                .iter()
                .filter(|_| sgi)
                .map(|&m| m.to_owned()),
        )
        .unique()
        .collect()
}

/// `/proc/sgi_sn` only has content on SGI Altix hardware.
fn is_sgi_altix(proc_dir: &Path) -> bool {
    std::fs::metadata(proc_dir.join("sgi_sn")).is_ok_and(|m| m.len() > 0)
}

fn write_conf(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("cannot create {parent:?}"))?;
    }
    std::fs::write(path, content).wrap_err_with(|| format!("cannot write {path:?}"))
}
