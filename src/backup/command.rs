//! External process invocation.
//!
//! Every external call (pre/post tasks, mount, ping, the sync tool) goes
//! through [`CommandRunner`] and comes back as a [`ProcessOutput`] value, so
//! each call site decides how a non-zero exit is classified.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use std::fmt::{Display, Formatter};
use std::process::{Command, Stdio};

#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct CommandSpec {
    program: String,
    args: Vec<String>,
}

impl CommandSpec {
    pub fn new<S: Into<String>>(program: S) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// `sh -c <cmd>`
    pub fn shell<S: Into<String>>(cmd: S) -> Self {
        Self::new("sh").arg("-c").arg(cmd)
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program followed by its arguments.
    pub fn argv(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.program.as_str()).chain(self.args.iter().map(String::as_str))
    }

    pub fn contains_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }
}

impl Display for CommandSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let line = self
            .argv()
            .map(|a| {
                let plain = !a.is_empty()
                    && !a.contains(|c: char| c.is_whitespace() || c == '\'' || c == '"');
                if plain {
                    a.to_owned()
                } else {
                    format!("{a:?}")
                }
            })
            .join(" ");
        f.write_str(&line)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct ProcessOutput {
    /// `None` when the process was killed by a signal.
    exit_code: Option<i32>,
    stdout: String,
    stderr: String,
}

impl ProcessOutput {
    pub fn new<S1: Into<String>, S2: Into<String>>(
        exit_code: Option<i32>,
        stdout: S1,
        stderr: S2,
    ) -> Self {
        Self {
            exit_code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    pub fn exited(code: i32) -> Self {
        Self::new(Some(code), "", "")
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, as captured in a transfer log.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    pub fn exit_code_str(&self) -> String {
        self.exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_owned())
    }
}

/// Runs external commands to completion, blocking the caller.
pub trait CommandRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<ProcessOutput>;
}

/// Spawns real processes.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    #[named]
    fn run(&self, cmd: &CommandSpec) -> Result<ProcessOutput> {
        tracing::debug!("Running: {cmd}");
        let output = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .output()
            .map_err(Error::from)
            .add_msg(format!("Unable to start {:?}", cmd.program))
            .add_fn_name(function_path!())?;

        Ok(ProcessOutput::new(
            output.status.code(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
        ))
    }
}

/// Prints what would run and reports success without running anything.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunner;

impl CommandRunner for DryRunner {
    fn run(&self, cmd: &CommandSpec) -> Result<ProcessOutput> {
        tracing::info!("Would run: {cmd}");
        Ok(ProcessOutput::exited(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_when_needed() {
        let cmd = CommandSpec::new("rsync")
            .arg("-a")
            .arg("/home/my files")
            .arg("");
        assert_eq!(cmd.to_string(), r#"rsync -a "/home/my files" """#);
    }

    #[test]
    fn test_shell_wraps_command() {
        let cmd = CommandSpec::shell("echo hi");
        assert_eq!(cmd.program(), "sh");
        assert_eq!(cmd.args(), &vec!["-c".to_owned(), "echo hi".to_owned()]);
        assert!(cmd.contains_arg("echo hi"));
    }

    #[test]
    fn test_with_args_appends_after_arg() {
        let cmd = CommandSpec::new("ssh")
            .arg("-q")
            .with_args(["-o", "BatchMode=true"])
            .with_args(vec![String::from("host")]);
        assert_eq!(cmd.args().as_slice(), ["-q", "-o", "BatchMode=true", "host"]);
        assert_eq!(
            cmd.argv().collect::<Vec<_>>(),
            ["ssh", "-q", "-o", "BatchMode=true", "host"]
        );
    }

    #[test]
    fn test_system_runner_captures_output() {
        let out = SystemRunner
            .run(&CommandSpec::shell("echo out; echo err >&2; exit 3"))
            .unwrap();
        assert_eq!(out.exit_code(), &Some(3));
        assert_eq!(out.stdout(), "out\n");
        assert_eq!(out.stderr(), "err\n");
        assert!(!out.success());
        assert_eq!(out.combined(), "out\nerr\n");
    }

    #[test]
    fn test_system_runner_missing_binary_is_error() {
        let res = SystemRunner.run(&CommandSpec::new("/nonexistent/binary-for-test"));
        assert!(res.is_err());
    }

    #[test]
    fn test_dry_runner_never_runs() {
        let out = DryRunner.run(&CommandSpec::shell("exit 1")).unwrap();
        assert!(out.success());
        assert!(out.stdout().is_empty());
    }

    #[test]
    fn test_exit_code_str() {
        assert_eq!(ProcessOutput::exited(24).exit_code_str(), "24");
        assert_eq!(ProcessOutput::default().exit_code_str(), "signal");
    }
}
