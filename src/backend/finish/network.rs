use serde::{Deserialize, Serialize};

use super::{Context, FinishStep, InstallMode, ParameterBag, StepInfo};
use crate::prelude::*;
use crate::util::cmd::Cmd;

/// Carries the network setup done in the installer over to the target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Network;

impl FinishStep for Network {
    fn info(&self) -> StepInfo {
        StepInfo::new(
            1,
            Some("Saving network configuration..."),
            &[InstallMode::Install, InstallMode::Autoinst],
        )
    }

    #[tracing::instrument(skip_all)]
    fn write(&self, context: &Context, params: &ParameterBag) -> Result<bool> {
        tracing::info!("Save network configuration");
        context
            .network
            .save(&context.target_root)
            .wrap_err("cannot save the network configuration")?;

        // drivers for the network cards may have come from a driver update
        let force = params.get_bool("force_depmod").unwrap_or_default();
        let depmod = Cmd::new("depmod")
            .arg(if force { "-a" } else { "-A" })
            .on_target(&context.target_root);
        match context.runner.run(&depmod) {
            Ok(out) if out.success() => Ok(true),
            Ok(out) => {
                tracing::warn!("{depmod} failed with {}", out.detail());
                Ok(false)
            }
            Err(e) => {
                tracing::warn!("cannot run {depmod}: {e}");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{network::CopyNetworkWriter, testing::{context, FakeSystem}};
    use serde_json::json;

    #[test]
    fn test_write_copies_and_runs_depmod() {
        let live = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let hostname = live.path().join("etc/hostname");
        std::fs::create_dir_all(hostname.parent().unwrap()).unwrap();
        std::fs::write(&hostname, "box\n").unwrap();

        let sys = FakeSystem::with_entries(vec![]);
        let mut ctx = context(root.path(), &sys);
        ctx.network = Box::new(CopyNetworkWriter::new(vec![hostname.clone()]));

        assert!(Network.write(&ctx, &ParameterBag::default()).unwrap());

        assert_eq!(
            std::fs::read_to_string(crate::backend::target_path(root.path(), &hostname)).unwrap(),
            "box\n"
        );
        let depmod = sys.calls_to("depmod");
        assert_eq!(depmod.len(), 1);
        assert_eq!(depmod[0].args, vec!["-A"]);
        assert_eq!(depmod[0].root.as_deref(), Some(root.path()));
    }

    #[test]
    fn test_write_forced_depmod() {
        let root = tempfile::tempdir().unwrap();
        let sys = FakeSystem::with_entries(vec![]);
        let ctx = context(root.path(), &sys);
        let params: ParameterBag = [("force_depmod", json!(true))].into_iter().collect();

        assert!(Network.write(&ctx, &params).unwrap());
        assert_eq!(sys.calls_to("depmod")[0].args, vec!["-a"]);
    }

    #[test]
    fn test_write_depmod_failure() {
        let root = tempfile::tempdir().unwrap();
        let sys = FakeSystem::with_entries(vec![]);
        sys.respond("depmod", 1, "", "depmod: FATAL: could not search modules");
        let ctx = context(root.path(), &sys);

        assert!(!Network.write(&ctx, &ParameterBag::default()).unwrap());
    }
}
