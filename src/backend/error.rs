use std::path::PathBuf;

use thiserror::Error;

/// Failures of a finish step that are reported and absorbed locally.
///
/// None of these abort an installation; a step turns them into log entries
/// and, at most, a `false` result.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FinishError {
    #[error("unknown function: {0}")]
    UnknownOperation(String),

    #[error("unknown finish step: {0}")]
    UnknownStep(String),

    #[error("insufficient privileges for {path:?}: {detail}")]
    PermissionFailure { path: PathBuf, detail: String },

    #[error("cannot unmount {path:?}: {detail}")]
    UnmountFailure { path: PathBuf, detail: String },

    #[error("cannot set read-only property on {path:?}: {detail}")]
    PropertySetFailure { path: PathBuf, detail: String },

    #[error("leftover paths that could not be unmounted: {0:?}")]
    PartialUnmount(Vec<PathBuf>),
}

/// Whether the output of a failed command points at missing privileges.
pub fn is_permission_problem(detail: &str) -> bool {
    let detail = detail.to_ascii_lowercase();
    ["must be superuser", "operation not permitted", "permission denied"]
        .iter()
        .any(|needle| detail.contains(needle))
}

impl FinishError {
    /// Classify a failed unmount of `path`.
    pub fn unmount(path: PathBuf, detail: String) -> Self {
        if is_permission_problem(&detail) {
            Self::PermissionFailure { path, detail }
        } else {
            Self::UnmountFailure { path, detail }
        }
    }

    /// Classify a failed `btrfs` invocation on `path`.
    pub fn property_set(path: PathBuf, detail: String) -> Self {
        if is_permission_problem(&detail) {
            Self::PermissionFailure { path, detail }
        } else {
            Self::PropertySetFailure { path, detail }
        }
    }
}
