use std::fmt::Write as _;

use crate::cfg::ProxySettings;
use crate::prelude::*;

/// Persists proxy settings into an installed system.
pub trait ProxyWriter {
    /// # Errors
    /// - the sysconfig file cannot be written
    fn write_sysconfig(&self, target_root: &Path, settings: &ProxySettings) -> Result<()>;

    /// # Errors
    /// - the curlrc cannot be read or written
    fn write_curlrc(&self, target_root: &Path, settings: &ProxySettings) -> Result<()>;
}

/// Writes `/etc/sysconfig/proxy` and root's `.curlrc` on the target.
#[derive(Debug, Clone, Copy, Default)]
pub struct SysconfigProxyWriter;

const CURL_PROXY_OPTIONS: [&str; 3] = ["--proxy ", "--noproxy ", "--proxy-user "];

fn quote(value: Option<&str>) -> String {
    format!("\"{}\"", value.unwrap_or_default().replace('"', "\\\""))
}

/// Render `/etc/sysconfig/proxy`.
pub fn sysconfig(settings: &ProxySettings) -> String {
    let mut out = String::new();
    // writeln! on a String cannot fail
    _ = writeln!(
        out,
        "PROXY_ENABLED=\"{}\"",
        if settings.enabled { "yes" } else { "no" }
    );
    _ = writeln!(out, "HTTP_PROXY={}", quote(settings.http.as_deref()));
    _ = writeln!(out, "HTTPS_PROXY={}", quote(settings.https.as_deref()));
    _ = writeln!(out, "FTP_PROXY={}", quote(settings.ftp.as_deref()));
    _ = writeln!(out, "NO_PROXY={}", quote(settings.no_proxy.as_deref()));
    out
}

/// Merge the proxy options into an existing `.curlrc`, dropping stale ones.
pub fn curlrc(existing: &str, settings: &ProxySettings) -> String {
    let mut out = existing
        .lines()
        .filter(|line| {
            !CURL_PROXY_OPTIONS
                .iter()
                .any(|opt| line.trim_start().starts_with(opt))
        })
        .map(|line| format!("{line}\n"))
        .collect::<String>();

    if !settings.enabled {
        return out;
    }
    if let Some(proxy) = settings.http.as_deref().or(settings.https.as_deref()) {
        _ = writeln!(out, "--proxy {}", quote(Some(proxy)));
    }
    if let Some(no_proxy) = &settings.no_proxy {
        _ = writeln!(out, "--noproxy {}", quote(Some(no_proxy.as_str())));
    }
    if let Some(user) = &settings.user {
        let credentials = settings
            .password
            .as_ref()
            .map_or_else(|| user.clone(), |password| format!("{user}:{password}"));
        _ = writeln!(out, "--proxy-user {}", quote(Some(credentials.as_str())));
    }
    out
}

fn write_target_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).wrap_err_with(|| format!("cannot create {parent:?}"))?;
    }
    std::fs::write(path, content).wrap_err_with(|| format!("cannot write to {path:?}"))
}

impl ProxyWriter for SysconfigProxyWriter {
    fn write_sysconfig(&self, target_root: &Path, settings: &ProxySettings) -> Result<()> {
        let path = crate::backend::target_path(target_root, crate::consts::SYSCONFIG_PROXY);
        tracing::debug!(?path, "Writing proxy sysconfig");
        write_target_file(&path, &sysconfig(settings))
    }

    fn write_curlrc(&self, target_root: &Path, settings: &ProxySettings) -> Result<()> {
        let path = crate::backend::target_path(target_root, crate::consts::CURLRC);
        let existing = match std::fs::read_to_string(&path) {
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            r => r.wrap_err_with(|| format!("cannot read {path:?}"))?,
        };
        tracing::debug!(?path, "Writing proxy options to curlrc");
        write_target_file(&path, &curlrc(&existing, settings))
    }
}
