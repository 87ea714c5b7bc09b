use crate::prelude::*;
use crate::util::fs::copy_path;

/// Carries the installer's network configuration over to the target.
pub trait NetworkWriter {
    /// # Errors
    /// - a configuration file cannot be copied
    fn save(&self, target_root: &Path) -> Result<()>;
}

/// Copies a fixed list of files and directories from the live system to
/// the same place on the target. Missing sources are skipped.
#[derive(Debug, Clone)]
pub struct CopyNetworkWriter {
    paths: Vec<PathBuf>,
}

impl CopyNetworkWriter {
    pub const fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }
}

impl NetworkWriter for CopyNetworkWriter {
    #[tracing::instrument(skip(self))]
    fn save(&self, target_root: &Path) -> Result<()> {
        for src in &self.paths {
            if src.symlink_metadata().is_err() {
                tracing::debug!(?src, "Not present on the live system, skipping");
                continue;
            }
            let dest = crate::backend::target_path(target_root, src);
            if dest == *src {
                tracing::debug!(?src, "Target is the live system, nothing to copy");
                continue;
            }
            tracing::info!(?src, ?dest, "Copying network configuration");
            copy_path(src, &dest).wrap_err_with(|| format!("cannot copy {src:?} to {dest:?}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copies_existing_paths_only() {
        let live = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let hostname = live.path().join("hostname");
        std::fs::write(&hostname, "installed\n").unwrap();

        let writer = CopyNetworkWriter::new(vec![hostname.clone(), live.path().join("missing")]);
        writer.save(target.path()).unwrap();

        let copied = crate::backend::target_path(target.path(), &hostname);
        assert_eq!(std::fs::read_to_string(copied).unwrap(), "installed\n");
    }
}
