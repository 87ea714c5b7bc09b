use serde::{Deserialize, Serialize};

use super::{Context, FinishStep, InstallMode, ParameterBag, StepInfo};
use crate::prelude::*;

/// Keeps the proxy used during installation on the installed system.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proxy;

impl FinishStep for Proxy {
    fn info(&self) -> StepInfo {
        StepInfo::new(
            1,
            Some("Saving proxy configuration..."),
            &[InstallMode::Install, InstallMode::Update, InstallMode::Autoinst],
        )
    }

    #[tracing::instrument(skip_all)]
    fn write(&self, context: &Context, _params: &ParameterBag) -> Result<bool> {
        let settings = &context.config.proxy;
        if !(context.initial_stage && settings.to_target) {
            tracing::debug!(
                initial_stage = context.initial_stage,
                to_target = settings.to_target,
                "Not writing proxy settings"
            );
            return Ok(true);
        }

        tracing::info!(?settings, "Writing proxy settings to the target system");
        context
            .proxy
            .write_sysconfig(&context.target_root, settings)
            .wrap_err("cannot write the proxy configuration")?;
        context
            .proxy
            .write_curlrc(&context.target_root, settings)
            .wrap_err("cannot write the curl configuration")?;
        Ok(true)
    }
}
