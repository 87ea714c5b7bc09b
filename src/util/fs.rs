use std::path::Path;

use color_eyre::eyre::{bail, eyre};

/// Ignore errors about nonexisting files.
pub fn exist_then_read_dir<A: AsRef<Path>>(
    p: A,
) -> std::io::Result<Box<dyn Iterator<Item = std::fs::DirEntry>>> {
    match std::fs::read_dir(p) {
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Box::new(std::iter::empty())),
        Err(e) => Err(e),
        Ok(x) => Ok(Box::new(x.flatten())),
    }
}

/// Attempt to remove a file, but ignore if the file didn't exist in the first place.
pub fn remove_if_exists(path: &Path) -> color_eyre::Result<()> {
    match std::fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => bail!(e),
        _ => Ok(()),
    }
}

/// Copy a file, symlink or directory tree from `from` to `to`, keeping
/// timestamps and extended attributes.
pub fn copy_path<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> color_eyre::Result<()> {
    let (from, to) = (from.as_ref(), to.as_ref());
    let metadata = from.symlink_metadata()?;
    if metadata.is_dir() {
        return copy_dir(from, to);
    }
    copy_entry(from, to, &metadata)
}

/// Recursively copy the tree at `from` into `to`, entries in parallel.
///
/// Existing files at the destination are replaced.
fn copy_dir<P: AsRef<Path>, Q: AsRef<Path>>(from: P, to: Q) -> color_eyre::Result<()> {
    use rayon::iter::{ParallelBridge, ParallelIterator};

    let to = to.as_ref();
    let from = from.as_ref();
    std::fs::create_dir_all(to)?;

    let walkdir = jwalk::WalkDir::new(from).sort(true).into_iter();

    (walkdir.par_bridge()).try_for_each(|entry| -> color_eyre::Result<()> {
        let src_path = entry?.path();
        let dest_path = to.join(src_path.strip_prefix(from)?);
        let metadata = src_path.symlink_metadata()?;
        copy_entry(&src_path, &dest_path, &metadata)
    })
}

fn copy_entry(
    src_path: &Path,
    dest_path: &Path,
    metadata: &std::fs::Metadata,
) -> color_eyre::Result<()> {
    if metadata.is_dir() {
        std::fs::create_dir_all(dest_path)?;
    } else {
        let parent = dest_path
            .parent()
            .ok_or_else(|| eyre!("{dest_path:?} has no parent"))?;
        std::fs::create_dir_all(parent)?;
        remove_if_exists(dest_path)?;
        if metadata.is_symlink() {
            let link = std::fs::read_link(src_path)?;
            std::os::unix::fs::symlink(&link, dest_path)?;
        } else {
            std::fs::copy(src_path, dest_path)?;
        }
    }

    // set attributes only for files and dirs, symlinks will fail with ENOENT
    if metadata.is_dir() || metadata.is_file() {
        set_attributes(src_path, dest_path, metadata)?;
    }
    Ok(())
}

fn to_timeval(time: std::time::SystemTime) -> color_eyre::Result<nix::sys::time::TimeVal> {
    let t = time.duration_since(std::time::UNIX_EPOCH)?;
    Ok(nix::sys::time::TimeVal::new(
        t.as_secs().try_into()?,
        (t.as_micros() % 1_000_000).try_into()?,
    ))
}

fn set_attributes(
    src_path: &Path,
    dest_path: &Path,
    metadata: &std::fs::Metadata,
) -> color_eyre::Result<()> {
    let atime = to_timeval(metadata.accessed()?)?;
    let mtime = to_timeval(metadata.modified()?)?;
    nix::sys::stat::utimes(dest_path, &atime, &mtime)?;
    let xattrs =
        xattr::list(src_path).inspect_err(|e| tracing::warn!("Failed to list xattrs: {e}"));
    (xattrs.into_iter().flat_map(IntoIterator::into_iter)).for_each(|xattr| {
        let val = xattr::get(src_path, &xattr)
            .inspect_err(|e| tracing::warn!("Failed to get xattr {xattr:?}: {e}"));
        if let Some(e) =
            (val.ok().flatten()).and_then(|val| xattr::set(dest_path, &xattr, &val).err())
        {
            tracing::warn!("Failed to set xattr {xattr:?}: {e}");
        }
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remove_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("mtab");
        remove_if_exists(&file).unwrap();

        std::fs::write(&file, "stale").unwrap();
        remove_if_exists(&file).unwrap();
        assert!(!file.exists());
    }

    #[test]
    fn test_copy_path_tree() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        let conns = src.path().join("system-connections");
        std::fs::create_dir_all(conns.join("nested")).unwrap();
        std::fs::write(conns.join("wired.nmconnection"), "[connection]\n").unwrap();
        std::fs::write(conns.join("nested/wifi.nmconnection"), "[wifi]\n").unwrap();
        std::os::unix::fs::symlink("wired.nmconnection", conns.join("link")).unwrap();

        let target = dst.path().join("etc/NetworkManager/system-connections");
        copy_path(&conns, &target).unwrap();

        assert_eq!(
            std::fs::read_to_string(target.join("nested/wifi.nmconnection")).unwrap(),
            "[wifi]\n"
        );
        assert_eq!(
            std::fs::read_link(target.join("link")).unwrap(),
            Path::new("wired.nmconnection")
        );
    }

    #[test]
    fn test_copy_path_single_file() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("hostname"), "box\n").unwrap();

        copy_path(src.path().join("hostname"), dst.path().join("etc/hostname")).unwrap();
        assert_eq!(
            std::fs::read_to_string(dst.path().join("etc/hostname")).unwrap(),
            "box\n"
        );
    }

    #[test]
    fn test_exist_then_read_dir_missing() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(exist_then_read_dir(dir.path().join("nope")).unwrap().count(), 0);
    }
}
