use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::Command,
    sync::Arc,
};

/// An external command, described as data so it can be logged, recorded and
/// replayed before anything gets executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cmd {
    pub program: OsString,
    pub args: Vec<OsString>,
    /// Run inside `chroot` on this root instead of on the live system.
    pub root: Option<PathBuf>,
    pub env: Vec<(String, String)>,
}

impl Cmd {
    pub fn new<S: AsRef<OsStr>>(program: S) -> Self {
        Self {
            program: program.as_ref().to_owned(),
            args: vec![],
            root: None,
            env: vec![],
        }
    }

    #[must_use]
    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    #[must_use]
    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_owned(), value.to_owned()));
        self
    }

    /// Execute on the installed system. A target root of `/` is the live
    /// system itself, so no chroot is involved then.
    #[must_use]
    pub fn on_target(mut self, root: &Path) -> Self {
        self.root = (root != Path::new("/")).then(|| root.to_owned());
        self
    }

    /// Whether `program` (compared by file name) is what this runs.
    pub fn is(&self, program: &str) -> bool {
        Path::new(&self.program).file_name() == Some(OsStr::new(program))
    }
}

impl std::fmt::Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(root) = &self.root {
            write!(f, "chroot {} ", root.display())?;
        }
        write!(f, "{}", self.program.to_string_lossy())?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CmdOutput {
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.code, Some(0))
    }

    /// Stderr if there is any, stdout otherwise.
    #[must_use]
    pub fn detail(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("exit code {:?}: {}", self.code, self.stdout.trim())
        } else {
            format!("exit code {:?}: {stderr}", self.code)
        }
    }
}

/// Runs external commands. Blocks until the command exits; there is no
/// timeout.
pub trait CommandRunner {
    /// # Errors
    /// - the command cannot be spawned
    fn run(&self, cmd: &Cmd) -> std::io::Result<CmdOutput>;
}

impl<T: CommandRunner + ?Sized> CommandRunner for Arc<T> {
    fn run(&self, cmd: &Cmd) -> std::io::Result<CmdOutput> {
        (**self).run(cmd)
    }
}

/// Runs commands on this machine through [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    #[tracing::instrument(skip_all, fields(cmd = %cmd))]
    fn run(&self, cmd: &Cmd) -> std::io::Result<CmdOutput> {
        let mut command = if let Some(root) = &cmd.root {
            let mut c = Command::new("chroot");
            c.arg(root).arg(&cmd.program);
            c
        } else {
            Command::new(&cmd.program)
        };
        command
            .args(&cmd.args)
            .envs(cmd.env.iter().map(|(k, v)| (k, v)));

        tracing::debug!("Running command");
        let output = command.output()?;
        let output = CmdOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        tracing::trace!(?output, "Command finished");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_on_target_skips_live_root() {
        let cmd = Cmd::new("btrfs").on_target(Path::new("/"));
        assert_eq!(cmd.root, None);

        let cmd = Cmd::new("btrfs")
            .args(["property", "set"])
            .on_target(Path::new("/mnt"));
        assert_eq!(cmd.root, Some(PathBuf::from("/mnt")));
        assert_eq!(cmd.to_string(), "chroot /mnt btrfs property set");
    }

    #[test]
    fn test_is_matches_file_name() {
        let cmd = Cmd::new("/update/000/install/update.post2");
        assert!(cmd.is("update.post2"));
        assert!(!Cmd::new("umount").is("mount"));
    }

    #[test]
    fn test_system_runner_captures_output() {
        let out = SystemRunner
            .run(&Cmd::new("sh").args(["-c", "echo out; echo err >&2; exit 3"]))
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert!(!out.success());
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.detail(), "exit code Some(3): err");
    }
}
