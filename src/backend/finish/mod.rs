use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use color_eyre::Result;
use driver_update::DriverUpdate;
use enum_dispatch::enum_dispatch;
use kernel::Kernel;
use network::Network;
use proxy::Proxy;
use serde::{Deserialize, Serialize};
use snapshots::Snapshots;
use umount::Umount;

use super::error::FinishError;

mod context;
mod dispatch;
pub mod driver_update;
pub mod kernel;
pub mod network;
pub mod proxy;
pub mod snapshots;
pub mod umount;

pub use context::Context;
pub use dispatch::{call, run_steps};

#[derive(
    Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
#[serde(rename_all = "snake_case")]
pub enum InstallMode {
    #[default]
    Install,
    Update,
    Autoinst,
    LiveInstall,
}

/// What a step tells the dispatcher about itself before it runs.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct StepInfo {
    /// Progress units the step accounts for.
    pub steps: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<&'static str>,
    #[serde(rename = "when")]
    pub modes: BTreeSet<InstallMode>,
}

impl StepInfo {
    pub fn new(steps: u32, title: Option<&'static str>, modes: &[InstallMode]) -> Self {
        Self {
            steps,
            title,
            modes: modes.iter().copied().collect(),
        }
    }

    #[must_use]
    pub fn applies_to(&self, mode: InstallMode) -> bool {
        self.modes.contains(&mode)
    }
}

/// Free-form arguments of a `Write` call. Steps only look at the keys they
/// know about.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(transparent)]
pub struct ParameterBag(BTreeMap<String, serde_json::Value>);

impl ParameterBag {
    #[must_use]
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(serde_json::Value::as_bool)
    }

    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(serde_json::Value::as_str)
    }

    /// String elements of an array value; anything else yields nothing.
    #[must_use]
    pub fn get_strings(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(serde_json::Value::as_array)
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(ToOwned::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl<K: Into<String>> FromIterator<(K, serde_json::Value)> for ParameterBag {
    fn from_iter<T: IntoIterator<Item = (K, serde_json::Value)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// The two calls every finish step answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Info,
    Write,
}

impl FromStr for Function {
    type Err = FinishError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "Info" => Ok(Self::Info),
            "Write" => Ok(Self::Write),
            other => Err(FinishError::UnknownOperation(other.to_owned())),
        }
    }
}

#[enum_dispatch(Step)]
pub trait FinishStep {
    /// Constant metadata, no side effects.
    fn info(&self) -> StepInfo;

    /// Perform the step on the target system.
    ///
    /// Returns whether the step did its job. Unmet preconditions are not an
    /// error; the step decides locally what they mean.
    ///
    /// # Errors
    /// - anything that stopped the step half-way
    fn write(&self, context: &Context, params: &ParameterBag) -> Result<bool>;
}

#[enum_dispatch]
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub enum Step {
    DriverUpdate,
    Kernel,
    Network,
    Proxy,
    Snapshots,
    Umount,
}

impl Step {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::DriverUpdate(_) => "driver_update",
            Self::Kernel(_) => "kernel",
            Self::Network(_) => "network",
            Self::Proxy(_) => "proxy",
            Self::Snapshots(_) => "snapshots",
            Self::Umount(_) => "umount",
        }
    }
}

impl FromStr for Step {
    type Err = FinishError;

    /// Accepts the bare name (`umount`) as well as the client name
    /// (`umount_finish`).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.strip_suffix("_finish").unwrap_or(s) {
            "driver_update" | "driver_update2" => Ok(DriverUpdate.into()),
            "kernel" => Ok(Kernel.into()),
            "network" => Ok(Network.into()),
            "proxy" => Ok(Proxy.into()),
            "snapshots" => Ok(Snapshots.into()),
            "umount" => Ok(Umount.into()),
            _ => Err(FinishError::UnknownStep(s.to_owned())),
        }
    }
}

impl TryFrom<String> for Step {
    type Error = FinishError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Step> for String {
    fn from(step: Step) -> Self {
        step.name().to_owned()
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_names() {
        assert_eq!("umount_finish".parse::<Step>().unwrap(), Step::from(Umount));
        assert_eq!("driver_update2_finish".parse::<Step>().unwrap(), Step::from(DriverUpdate));
        assert_eq!(Step::from(Network).to_string(), "network");
        assert_eq!(
            "welcome".parse::<Step>(),
            Err(FinishError::UnknownStep("welcome".into()))
        );
    }

    #[test]
    fn test_function_parse() {
        assert_eq!("Info".parse::<Function>().unwrap(), Function::Info);
        assert_eq!("Write".parse::<Function>().unwrap(), Function::Write);
        assert_eq!(
            "write".parse::<Function>(),
            Err(FinishError::UnknownOperation("write".into()))
        );
    }

    #[test]
    fn test_info_serialization() {
        let info = StepInfo::new(
            1,
            Some("Saving proxy configuration..."),
            &[InstallMode::Update, InstallMode::Install],
        );
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({"steps": 1, "title": "Saving proxy configuration...", "when": ["install", "update"]})
        );

        let untitled = StepInfo::new(0, None, &[InstallMode::Autoinst]);
        assert_eq!(
            serde_json::to_value(&untitled).unwrap(),
            json!({"steps": 0, "when": ["autoinst"]})
        );
    }

    #[test]
    fn test_info_is_constant() {
        for step in crate::cfg::Install::default().steps {
            assert_eq!(step.info(), step.info());
        }
    }

    #[test]
    fn test_parameter_bag() {
        let params: ParameterBag = serde_json::from_value(json!({
            "force_depmod": true,
            "modules_to_load": ["a", 1, "b"],
            "unknown": {"nested": null},
        }))
        .unwrap();
        assert_eq!(params.get_bool("force_depmod"), Some(true));
        assert_eq!(params.get_bool("unknown"), None);
        assert_eq!(params.get_strings("modules_to_load"), vec!["a", "b"]);
        assert!(params.get_strings("missing").is_empty());
        assert_eq!(params.get_str("force_depmod"), None);
    }
}
