use std::path::PathBuf;

pub const DEFAULT_CFG_PATH: &str = "/etc/finisher.toml";
pub const DEFAULT_PROC_DIR: &str = "/proc";
/// Target root used by standalone runs when the configured one is `/`.
pub const STANDALONE_TARGET_ROOT: &str = "/mnt";

pub const MTAB: &str = "/etc/mtab";
pub const PROC_SELF_MOUNTS: &str = "/proc/self/mounts";
pub const MODULES_LOAD_CONF: &str = "/etc/modules-load.d/finisher.conf";
pub const MODPROBE_CONF: &str = "/etc/modprobe.d/50-finisher.conf";
pub const SYSCONFIG_PROXY: &str = "/etc/sysconfig/proxy";
pub const CURLRC: &str = "/root/.curlrc";
pub const PRE_SNAPSHOT_FILE: &str = "pre_snapshot_update.id";

const STAGING_FILE: &str = "/run/finisher/staging.json";

/// Where the storage subsystem leaves its description of the staged filesystems.
pub fn staging_file() -> PathBuf {
    PathBuf::from(std::env::var("FINISHER_STAGING").unwrap_or_else(|_| STAGING_FILE.into()))
}
