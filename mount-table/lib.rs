use std::{
    collections::BTreeSet,
    ffi::OsString,
    os::unix::ffi::OsStringExt,
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;

/// Where the kernel exposes the mount table of the calling process.
pub const PROC_MOUNTS: &str = "/proc/mounts";

#[derive(Error, Debug)]
pub enum MountTableError {
    #[error("Invalid mount table entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid escape sequence in field: {0}")]
    InvalidEscape(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, MountTableError>;

/// One line of `/proc/mounts`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    /// The mounted source, as the kernel reports it.
    ///
    /// Examples:
    ///
    /// - `/dev/sda1`
    /// - `proc`
    /// - `tmpfs`
    pub device: String,

    /// The path the filesystem is mounted on.
    ///
    /// Octal escapes (`\040` for a space etc.) are already decoded.
    pub mount_point: PathBuf,

    /// The filesystem type, i.e. `ext4`, `btrfs`, `vfat`.
    pub fs_type: String,

    /// Mount options, without duplicates.
    pub options: BTreeSet<String>,
}

/// Decode the octal escapes the kernel uses for whitespace and backslashes
/// in `/proc/mounts` fields (see `getmntent(3)`).
///
/// Anything else is passed through raw, so the result need not be UTF-8.
fn unescape(field: &[u8]) -> Result<Vec<u8>> {
    let invalid = || MountTableError::InvalidEscape(String::from_utf8_lossy(field).into_owned());
    let mut out = Vec::with_capacity(field.len());
    let mut bytes = field.iter().copied();
    while let Some(b) = bytes.next() {
        if b != b'\\' {
            out.push(b);
            continue;
        }
        let digits: Vec<u8> = bytes.by_ref().take(3).collect();
        if digits.len() != 3 || !digits.iter().all(|d| (b'0'..=b'7').contains(d)) {
            return Err(invalid());
        }
        let code = digits
            .iter()
            .fold(0u16, |acc, d| acc * 8 + u16::from(d - b'0'));
        out.push(u8::try_from(code).map_err(|_| invalid())?);
    }
    Ok(out)
}

impl MountEntry {
    /// Parse a `MountEntry` from a raw line of `/proc/mounts`.
    ///
    /// The mount point keeps its bytes as they are; device and filesystem
    /// type are decoded lossily. The trailing dump and pass columns are
    /// accepted but ignored.
    pub fn from_line_bytes(line: &[u8]) -> Result<Self> {
        let mut parts = line
            .split(u8::is_ascii_whitespace)
            .filter(|part| !part.is_empty());
        let (Some(device), Some(mount_point), Some(fs_type), Some(options)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(MountTableError::InvalidEntry(
                String::from_utf8_lossy(line).into_owned(),
            ));
        };

        Ok(Self {
            device: String::from_utf8_lossy(&unescape(device)?).into_owned(),
            mount_point: PathBuf::from(OsString::from_vec(unescape(mount_point)?)),
            fs_type: String::from_utf8_lossy(fs_type).into_owned(),
            options: String::from_utf8_lossy(options)
                .split(',')
                .map(ToOwned::to_owned)
                .collect(),
        })
    }

    /// Parse a `MountEntry` from a line of `/proc/mounts`.
    pub fn from_line_str(line: &str) -> Result<Self> {
        Self::from_line_bytes(line.as_bytes())
    }

    #[must_use]
    pub fn has_option(&self, option: &str) -> bool {
        self.options.contains(option)
    }

    /// Number of path components below `/`.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.mount_point.components().count()
    }

    /// Whether the mount point is `root` itself or lies beneath it.
    ///
    /// Comparison is by path components, so `/mnt2` is not under `/mnt`.
    #[must_use]
    pub fn is_under(&self, root: &Path) -> bool {
        self.mount_point.starts_with(root)
    }
}

impl TryFrom<&str> for MountEntry {
    type Error = MountTableError;

    fn try_from(value: &str) -> Result<Self> {
        Self::from_line_str(value)
    }
}

/// A snapshot of the mount table, in the order the kernel listed it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MountTable {
    pub entries: Vec<MountEntry>,
}

impl FromStr for MountTable {
    type Err = MountTableError;

    fn from_str(table: &str) -> Result<Self> {
        Ok(Self::from_bytes(table.as_bytes()))
    }
}

impl MountTable {
    /// Parse a whole table. Lines that cannot be parsed are logged and
    /// skipped, so one odd mount does not hide all the others.
    #[must_use]
    pub fn from_bytes(table: &[u8]) -> Self {
        let entries = table
            .split(|&b| b == b'\n')
            .filter(|line| !line.trim_ascii().is_empty())
            .filter_map(|line| {
                MountEntry::from_line_bytes(line)
                    .inspect_err(|e| tracing::warn!("Skipping mount table line: {e}"))
                    .ok()
            })
            .collect();
        Self { entries }
    }

    /// Entries at or under `root`, ordered so that children come before
    /// their parents.
    ///
    /// Deeper mount points go first. Among equally deep ones, the entry
    /// mounted last goes first, which keeps stacked mounts on the same path
    /// in the order they have to be taken down.
    #[must_use]
    pub fn under(&self, root: &Path) -> Vec<&MountEntry> {
        let mut entries = self
            .entries
            .iter()
            .rev()
            .filter(|entry| entry.is_under(root))
            .collect::<Vec<_>>();
        entries.sort_by_key(|entry| std::cmp::Reverse(entry.depth()));
        entries
    }

    /// Mount points at or under `root`, children first.
    #[must_use]
    pub fn paths_under(&self, root: &Path) -> Vec<PathBuf> {
        self.under(root)
            .into_iter()
            .map(|entry| entry.mount_point.clone())
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Read and parse a mount table in `/proc/mounts` format.
pub fn read_mounts_file(path: impl AsRef<Path>) -> Result<MountTable> {
    Ok(MountTable::from_bytes(&std::fs::read(path)?))
}

/// Read the live mount table of this process.
pub fn read_proc_mounts() -> Result<MountTable> {
    read_mounts_file(PROC_MOUNTS)
}
