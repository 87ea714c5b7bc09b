#![allow(clippy::str_to_string)]
use std::collections::BTreeMap;
use std::path::PathBuf;

use color_eyre::eyre::WrapErr;
use color_eyre::{Result, Section};
use serde::{Deserialize, Serialize};
use serde_valid::toml::FromTomlStr;
use serde_valid::Validate;

use crate::backend::finish::{
    driver_update::DriverUpdate, kernel::Kernel, network::Network, proxy::Proxy,
    snapshots::Snapshots, umount::Umount, InstallMode, Step,
};
use crate::consts::DEFAULT_CFG_PATH;

#[derive(Deserialize, Serialize, Validate, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Install {
    pub mode: InstallMode,
    pub target_root: PathBuf,
    pub initial_stage: bool,
    pub second_stage_required: bool,
    /// Finish steps in the order they run.
    #[validate(min_items = 1)]
    pub steps: Vec<Step>,
}

impl Default for Install {
    fn default() -> Self {
        Self {
            mode: InstallMode::default(),
            target_root: "/".into(),
            initial_stage: true,
            second_stage_required: false,
            // umount has to stay last, nothing may touch the target after it
            steps: vec![
                DriverUpdate.into(),
                Kernel.into(),
                Network.into(),
                Proxy.into(),
                Snapshots.into(),
                Umount.into(),
            ],
        }
    }
}

#[derive(Deserialize, Serialize, Default, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ProxySettings {
    pub enabled: bool,
    pub http: Option<String>,
    pub https: Option<String>,
    pub ftp: Option<String>,
    pub no_proxy: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Carry the installer's proxy over to the installed system.
    pub to_target: bool,
}

impl std::fmt::Debug for ProxySettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxySettings")
            .field("enabled", &self.enabled)
            .field("http", &self.http)
            .field("https", &self.https)
            .field("ftp", &self.ftp)
            .field("no_proxy", &self.no_proxy)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("to_target", &self.to_target)
            .finish()
    }
}

#[derive(Deserialize, Serialize, Default, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct KernelModules {
    pub modules_to_load: Vec<String>,
    /// Module name to its option string, i.e. `snd_hda_intel = "power_save=1"`.
    pub module_options: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct NetworkFiles {
    pub paths: Vec<PathBuf>,
}

impl Default for NetworkFiles {
    fn default() -> Self {
        Self {
            paths: vec![
                "/etc/NetworkManager/system-connections".into(),
                "/etc/hostname".into(),
            ],
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Storage {
    pub staging: PathBuf,
}

impl Default for Storage {
    fn default() -> Self {
        Self {
            staging: crate::consts::staging_file(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DriverUpdates {
    pub dir: PathBuf,
    /// Run after the driver update scripts, if present.
    pub product_hook: Option<PathBuf>,
}

impl Default for DriverUpdates {
    fn default() -> Self {
        Self {
            dir: "/update".into(),
            product_hook: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SnapshotState {
    /// Directory on the target holding the number of the pre-update snapshot.
    pub state_dir: PathBuf,
}

impl Default for SnapshotState {
    fn default() -> Self {
        Self {
            state_dir: "/var/lib/finisher/snapshots".into(),
        }
    }
}

#[derive(Deserialize, Serialize, Validate, Default, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct FinisherConfig {
    #[validate]
    pub install: Install,
    pub proxy: ProxySettings,
    pub kernel: KernelModules,
    pub network: NetworkFiles,
    pub storage: Storage,
    pub driver_update: DriverUpdates,
    pub snapshots: SnapshotState,
}

/// # Errors
/// - cannot read config file
/// - the config file is invalid
#[allow(clippy::module_name_repetitions)]
#[tracing::instrument]
pub fn get_cfg() -> Result<FinisherConfig> {
    let path = std::env::var("FINISHER_CONFIG");
    match &path {
        Err(std::env::VarError::NotUnicode(s)) => {
            tracing::error!(?s, "Cannot parse FINISHER_CONFIG due to invalid unicode");
            tracing::debug!("Falling back to {DEFAULT_CFG_PATH}");
        }
        Ok(p) => tracing::debug!("Using FINISHER_CONFIG={p}"),
        Err(std::env::VarError::NotPresent) => tracing::trace!("Using {DEFAULT_CFG_PATH}"),
    }
    let explicit = path.is_ok();
    read_cfg(path.as_deref().unwrap_or(DEFAULT_CFG_PATH), explicit)
}

/// Load the config at `path`. Only an `explicit` path has to exist.
fn read_cfg(path: &str, explicit: bool) -> Result<FinisherConfig> {
    let toml = match std::fs::read_to_string(path) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && !explicit => {
            tracing::info!("No config file at {path:?}, using defaults");
            return Ok(FinisherConfig::default());
        }
        r => r
            .wrap_err_with(|| format!("Cannot read config file at {path:?}"))
            .note("the path comes from FINISHER_CONFIG")?,
    };
    FinisherConfig::from_toml_str(&toml)
        .wrap_err_with(|| format!("Invalid config file at {path:?}"))
        .suggestion("steps must name known finish steps, i.e. \"kernel\" or \"umount\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    #[test]
    fn test_cfg() {
        assert_eq!(
            FinisherConfig::from_toml_str(
                r#"
                [install]
                mode = "update"
                target_root = "/mnt"
                steps = ["kernel", "umount_finish"]

                [proxy]
                enabled = true
                http = "http://proxy:3128/"
                to_target = true

                [kernel]
                modules_to_load = ["dm_crypt"]
                "#
            )
            .unwrap(),
            FinisherConfig {
                install: Install {
                    mode: InstallMode::Update,
                    target_root: "/mnt".into(),
                    initial_stage: true,
                    second_stage_required: false,
                    steps: vec![Kernel.into(), Umount.into()],
                },
                proxy: ProxySettings {
                    enabled: true,
                    http: Some("http://proxy:3128/".into()),
                    to_target: true,
                    ..ProxySettings::default()
                },
                kernel: KernelModules {
                    modules_to_load: vec!["dm_crypt".into()],
                    module_options: BTreeMap::new(),
                },
                ..FinisherConfig::default()
            },
        );
    }

    #[test]
    fn test_cfg_rejects_empty_steps() {
        assert!(FinisherConfig::from_toml_str("[install]\nsteps = []\n").is_err());
    }

    #[test]
    fn test_cfg_rejects_unknown_step() {
        assert!(FinisherConfig::from_toml_str("[install]\nsteps = [\"welcome\"]\n").is_err());
    }

    #[test]
    fn test_read_cfg_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finisher.toml");
        let path = path.to_str().unwrap();

        assert_eq!(read_cfg(path, false).unwrap(), FinisherConfig::default());
        let e = read_cfg(path, true).unwrap_err();
        assert!(format!("{e:#}").contains("Cannot read config file"));
    }

    #[test]
    fn test_read_cfg_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("finisher.toml");
        std::fs::write(&path, "[install]\nsteps = [\"welcome\"]\n").unwrap();

        let e = read_cfg(path.to_str().unwrap(), false).unwrap_err();
        assert!(format!("{e:#}").contains("Invalid config file"));
    }

    #[test]
    fn test_password_is_redacted() {
        let settings = ProxySettings {
            password: Some("hunter2".into()),
            ..ProxySettings::default()
        };
        assert!(!format!("{settings:?}").contains("hunter2"));
    }
}
