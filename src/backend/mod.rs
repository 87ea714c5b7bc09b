pub mod error;
pub mod finish;
pub mod network;
pub mod proxy;
pub mod storage;
#[cfg(test)]
pub mod testing;
pub mod unmounter;

use std::path::{Path, PathBuf};

/// Where `path` of the installed system lives while it is mounted at `root`.
pub fn target_path<P: AsRef<Path>>(root: &Path, path: P) -> PathBuf {
    let path = path.as_ref();
    root.join(path.strip_prefix("/").unwrap_or(path))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_path() {
        assert_eq!(target_path(Path::new("/mnt"), "/etc/mtab"), Path::new("/mnt/etc/mtab"));
        assert_eq!(target_path(Path::new("/"), "/etc/mtab"), Path::new("/etc/mtab"));
        assert_eq!(target_path(Path::new("/mnt"), "etc/mtab"), Path::new("/mnt/etc/mtab"));
    }
}
