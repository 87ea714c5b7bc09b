use serde::{Deserialize, Serialize};

use crate::prelude::*;

/// A filesystem as the storage subsystem plans to leave it on the target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagedFilesystem {
    pub device: String,
    pub fs_type: String,
    #[serde(default)]
    pub mount_point: Option<PathBuf>,
    #[serde(default)]
    pub mount_options: Vec<String>,
    /// Whether the filesystem was already there when the disks were probed.
    #[serde(default)]
    pub exists_in_probed: bool,
    /// Btrfs only: the subvolume all other subvolumes live under, i.e. `@`.
    #[serde(default)]
    pub subvolumes_prefix: String,
}

impl StagedFilesystem {
    /// Created by this installation.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        !self.exists_in_probed
    }

    #[must_use]
    pub fn is_read_only_btrfs(&self) -> bool {
        self.fs_type == "btrfs"
            && self.mount_point.is_some()
            && self.mount_options.iter().any(|o| o == "ro")
    }

    /// Where a btrfs subvolume of this filesystem shows up once mounted.
    ///
    /// An empty `subvolume` is the top level tree, which sits on the mount
    /// point itself.
    #[must_use]
    pub fn subvolume_mount_point(&self, subvolume: &str) -> Option<PathBuf> {
        let mount_point = self.mount_point.as_ref()?;
        let relative = subvolume
            .strip_prefix(self.subvolumes_prefix.as_str())
            .unwrap_or(subvolume)
            .trim_start_matches('/');
        Some(if relative.is_empty() {
            mount_point.clone()
        } else {
            mount_point.join(relative)
        })
    }
}

/// Access to the storage subsystem's staged device layout.
pub trait StorageProbe {
    /// # Errors
    /// - the layout cannot be read
    fn staged_filesystems(&self) -> Result<Vec<StagedFilesystem>>;
}

#[derive(Debug, Deserialize)]
struct Staging {
    #[serde(default)]
    filesystems: Vec<StagedFilesystem>,
}

/// Reads the layout from the JSON file the storage subsystem leaves behind.
#[derive(Debug, Clone)]
pub struct StagingFile {
    pub path: PathBuf,
}

impl StorageProbe for StagingFile {
    #[tracing::instrument]
    fn staged_filesystems(&self) -> Result<Vec<StagedFilesystem>> {
        let json = match std::fs::read_to_string(&self.path) {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("No staged storage layout, assuming no filesystems were created");
                return Ok(vec![]);
            }
            Err(e) => {
                let report =
                    color_eyre::Report::new(e).wrap_err(format!("cannot read {:?}", self.path));
                return Err(report.note("the layout is written by the storage subsystem"));
            }
        };
        let staging: Staging = serde_json::from_str(&json)
            .wrap_err_with(|| format!("cannot parse staged storage layout {:?}", self.path))
            .note("expected {\"filesystems\": [...]}")?;
        Ok(staging.filesystems)
    }
}
