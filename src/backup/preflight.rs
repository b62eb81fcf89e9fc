//! Checks and side steps around a pass: mount, unmount, ping and the
//! destination check.
//!
//! Each check returns `Err(outcome)` when the pass has to stop there.

use crate::backup::backup_set::{BackupSet, ProgramKind};
use crate::backup::command::{CommandRunner, CommandSpec};
use crate::backup::destination::{render, shell_quote, Location};
use crate::backup::hanoi::RotationSlot;
use crate::backup::outcome::{Outcome, SetRun, SoftError};
use itertools::Itertools;
use std::path::{Path, PathBuf};

static PROC_MOUNTS: &str = "/proc/mounts";

/// Mount points currently known to the kernel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MountTable {
    mount_points: Vec<PathBuf>,
}

impl MountTable {
    /// Reads `/proc/mounts`; an unreadable table counts as empty.
    pub fn read() -> Self {
        match std::fs::read_to_string(PROC_MOUNTS) {
            Ok(text) => Self::parse(&text),
            Err(e) => {
                tracing::warn!("Unable to read {PROC_MOUNTS}: {e}");
                Self::default()
            }
        }
    }

    pub fn parse(text: &str) -> Self {
        let mount_points = text
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(|field| PathBuf::from(unescape_octal(field)))
            .collect();
        Self { mount_points }
    }

    pub fn is_mounted<P: AsRef<Path>>(&self, path: P) -> bool {
        // Path equality ignores trailing separators
        self.mount_points.iter().any(|m| m.as_path() == path.as_ref())
    }
}

/// `/proc/mounts` escapes blanks and backslashes as `\ooo`.
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let escaped = bytes
                .get(i + 1..i + 4)
                .filter(|d| d.iter().all(|b| (b'0'..=b'7').contains(b)))
                .and_then(|d| std::str::from_utf8(d).ok())
                .and_then(|d| u8::from_str_radix(d, 8).ok());
            if let Some(value) = escaped {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mounts `mount` unless it is already mounted.
pub fn mount<R: CommandRunner + ?Sized>(
    runner: &R,
    set: &BackupSet,
    table: &MountTable,
    run: &mut SetRun,
) -> Result<(), Outcome> {
    let Some(path) = set.mount() else {
        return Ok(());
    };
    if table.is_mounted(path) {
        run.log.warn(format!(
            "Skipping mount of {} because it's already mounted",
            path.display()
        ));
        return Ok(());
    }

    run.log.info(format!("Mounting {}", path.display()));
    let cmd = CommandSpec::new("mount").arg(path.to_string_lossy());
    let exit_code = match runner.run(&cmd) {
        Ok(out) => *out.exit_code(),
        Err(e) => return Err(Outcome::HardError(format!("{cmd} could not start: {e}"))),
    };
    run.record_step(cmd.to_string(), exit_code);
    if exit_code == Some(0) {
        return Ok(());
    }

    let failure = SoftError::MountFailed {
        path: path.clone(),
        exit_code,
    };
    if *set.tolerate_mount_failure() {
        run.log.warn(failure.to_string());
        Err(Outcome::SoftError(failure))
    } else {
        run.log.error(failure.to_string());
        Err(Outcome::HardError(failure.to_string()))
    }
}

/// Unmounts `umount` when mounted. Failures only warn.
pub fn umount<R: CommandRunner + ?Sized>(
    runner: &R,
    set: &BackupSet,
    table: &MountTable,
    run: &mut SetRun,
) {
    let Some(path) = set.umount() else {
        return;
    };
    if !table.is_mounted(path) {
        run.log.warn(format!(
            "Skipping umount of {} because it's not mounted",
            path.display()
        ));
        return;
    }

    run.log.info(format!("Umounting {}", path.display()));
    let cmd = CommandSpec::new("umount").arg(path.to_string_lossy());
    match runner.run(&cmd) {
        Ok(out) => {
            run.record_step(cmd.to_string(), *out.exit_code());
            if !out.success() {
                run.log.warn(format!(
                    "Umount of {} failed with return code {}",
                    path.display(),
                    out.exit_code_str()
                ));
            }
        }
        Err(e) => run.log.warn(format!("{cmd} could not start: {e}")),
    }
}

/// Host an ssh transport of the sync tool would connect to.
fn remote_host(set: &BackupSet, template: &str) -> Option<String> {
    if *set.program() != ProgramKind::Rsync {
        return None;
    }
    let location = Location::parse(render(template, set.name(), ""));
    match &location {
        Location::Remote { remote, .. } => Some(location.ssh_host().unwrap_or(remote).to_owned()),
        Location::Local(_) => None,
    }
}

/// Host to ping: the remote side of `src`, else of `dst`.
pub fn ping_target(set: &BackupSet) -> Option<String> {
    remote_host(set, set.src()).or_else(|| remote_host(set, set.dst()))
}

pub fn ping<R: CommandRunner + ?Sized>(
    runner: &R,
    set: &BackupSet,
    run: &mut SetRun,
) -> Result<(), Outcome> {
    if !*set.ping() {
        return Ok(());
    }
    let Some(host) = ping_target(set) else {
        run.log.debug("No remote host to ping");
        return Ok(());
    };

    run.log.debug(format!("Pinging host {host}"));
    let cmd = CommandSpec::new("ping")
        .with_args(["-c", "3", "-n", "-w", "60"])
        .arg(host.as_str());
    let up = runner.run(&cmd).map(|out| out.success()).unwrap_or(false);
    if up {
        run.log.info(format!("{host} is UP."));
        Ok(())
    } else {
        let failure = SoftError::HostUnreachable { host };
        run.log.warn(format!("Skipping backup because {failure}"));
        Err(Outcome::SoftError(failure))
    }
}

/// Candidate paths proving the destination is there: the bare destination
/// and, with rotation, any slot directory.
fn destination_candidates(set: &BackupSet) -> Vec<Location> {
    let layout = set.layout();
    std::iter::once(layout.base())
        .chain(
            (0..*set.hanoi())
                .filter_map(|i| RotationSlot::new(i, *set.hanoi()))
                .map(|slot| layout.root(Some(slot))),
        )
        .collect()
}

pub fn check_destination<R: CommandRunner + ?Sized>(
    runner: &R,
    set: &BackupSet,
    run: &mut SetRun,
) -> Result<(), Outcome> {
    if !*set.check_dst() {
        return Ok(());
    }
    let candidates = destination_candidates(set);
    let base = set.layout().base();

    let found = match &base {
        Location::Local(_) => candidates
            .iter()
            .filter_map(Location::as_local)
            .any(|p| p.exists()),
        Location::Remote { remote, .. } => match set.program() {
            ProgramKind::Rsync => {
                let test = candidates
                    .iter()
                    .map(|c| format!("test -e {}", shell_quote(c.path_str())))
                    .join(" || ");
                let cmd = CommandSpec::new("ssh")
                    .with_args(["-o", "BatchMode=true"])
                    .arg(remote.as_str())
                    .arg(test);
                runner.run(&cmd).map(|out| out.success()).unwrap_or(false)
            }
            ProgramKind::Rclone => candidates.iter().any(|c| {
                let cmd = CommandSpec::new("rclone")
                    .with_args(["lsf", "--max-depth", "1"])
                    .arg(c.to_string());
                runner.run(&cmd).map(|out| out.success()).unwrap_or(false)
            }),
        },
    };

    if found {
        run.log.debug(format!("Destination {base} found"));
        Ok(())
    } else {
        let failure = SoftError::DestinationUnreachable {
            dst: base.to_string(),
        };
        run.log.warn(format!("Skipping set, {failure}"));
        Err(Outcome::SoftError(failure))
    }
}
