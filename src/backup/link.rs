//! Completion markers and incremental link base resolution.
//!
//! A finished pass leaves a marker file holding its completion time inside
//! the slot it wrote. The link resolver trusts these markers only: a slot
//! without one was never completed (or was interrupted) and cannot serve as
//! a hardlink base, whatever its index says.

use crate::backup::backup_set::{BackupSet, ProgramKind};
use crate::backup::command::{CommandRunner, CommandSpec};
use crate::backup::destination::{shell_quote, Location};
use crate::backup::function_path;
use crate::backup::hanoi::RotationSlot;
use crate::backup::outcome::SetLog;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use chrono::{DateTime, FixedOffset, SecondsFormat};
use function_name::named;
use getset::{CopyGetters, Getters};
use std::io::{ErrorKind, Write};

/// Newest completed backup of a set, used as `--link-dest`.
#[derive(Clone, Debug, PartialEq, Eq, Getters, CopyGetters)]
pub struct LinkBase {
    /// `None` for the fixed, unrotated destination.
    #[getset(get_copy = "pub")]
    slot: Option<RotationSlot>,
    #[getset(get = "pub")]
    root: Location,
    #[getset(get_copy = "pub")]
    completed_at: DateTime<FixedOffset>,
}

impl LinkBase {
    pub fn new(
        slot: Option<RotationSlot>,
        root: Location,
        completed_at: DateTime<FixedOffset>,
    ) -> Self {
        Self {
            slot,
            root,
            completed_at,
        }
    }
}

/// Location of the completion marker inside a slot root.
pub fn marker_location(set: &BackupSet, slot: Option<RotationSlot>) -> Location {
    set.layout().root(slot).join(set.datefile())
}

fn parse_marker(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim()).ok()
}

/// Completion time recorded in a slot, `None` when the slot is not complete.
pub fn read_marker<R: CommandRunner + ?Sized>(
    runner: &R,
    set: &BackupSet,
    marker: &Location,
    log: &mut SetLog,
) -> Option<DateTime<FixedOffset>> {
    let text = match marker {
        Location::Local(path) => match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                log.warn(format!("Unable to read completion marker {marker}: {e}"));
                return None;
            }
        },
        Location::Remote { remote, path } => {
            let cmd = match set.program() {
                ProgramKind::Rsync => CommandSpec::new("ssh")
                    .with_args(["-o", "BatchMode=true"])
                    .arg(remote.as_str())
                    .arg(format!("cat {}", shell_quote(path))),
                ProgramKind::Rclone => CommandSpec::new("rclone")
                    .arg("cat")
                    .arg(marker.to_string()),
            };
            log.debug(format!("Issuing remote command: {cmd}"));
            match runner.run(&cmd) {
                Ok(out) if out.success() => out.stdout().clone(),
                Ok(out) => {
                    log.debug(format!(
                        "No completion marker at {marker} (exit {})",
                        out.exit_code_str()
                    ));
                    return None;
                }
                Err(e) => {
                    log.warn(format!("Unable to query completion marker {marker}: {e}"));
                    return None;
                }
            }
        }
    };

    let completed_at = parse_marker(&text);
    if completed_at.is_none() && !text.trim().is_empty() {
        log.warn(format!("Ignoring unreadable completion marker {marker}"));
    }
    completed_at
}

/// Finds the newest completed backup other than today's target slot.
///
/// With rotation off the fixed destination itself is the only candidate.
pub fn resolve<R: CommandRunner + ?Sized>(
    runner: &R,
    set: &BackupSet,
    target: Option<RotationSlot>,
    log: &mut SetLog,
) -> Option<LinkBase> {
    let candidates: Vec<Option<RotationSlot>> = if *set.hanoi() == 0 {
        vec![None]
    } else {
        (0..*set.hanoi())
            .filter_map(|i| RotationSlot::new(i, *set.hanoi()))
            .filter(|slot| Some(*slot) != target)
            .map(Some)
            .collect()
    };

    let mut newest: Option<LinkBase> = None;
    for slot in candidates {
        let marker = marker_location(set, slot);
        let Some(completed_at) = read_marker(runner, set, &marker, log) else {
            continue;
        };
        log.debug(format!("Found previous backup {marker} ({completed_at})"));
        if newest
            .as_ref()
            .map_or(true, |best| completed_at > best.completed_at)
        {
            newest = Some(LinkBase::new(slot, set.layout().root(slot), completed_at));
        }
    }
    newest
}

/// Removes the marker of a slot about to be overwritten.
#[named]
pub fn clear_marker(marker: &Location) -> Result<bool> {
    let Some(path) = marker.as_local() else {
        return Ok(false);
    };
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(Error::from(e))
            .add_msg(format!("Removing stale completion marker {marker} failed"))
            .add_fn_name(function_path!()),
    }
}

/// Writes `completed_at` into the marker, pushing it with the sync tool for remote slots.
#[named]
pub fn write_marker<R: CommandRunner + ?Sized>(
    runner: &R,
    set: &BackupSet,
    marker: &Location,
    completed_at: DateTime<FixedOffset>,
) -> Result<()> {
    let content = format!(
        "{}\n",
        completed_at.to_rfc3339_opts(SecondsFormat::Secs, false)
    );

    let written: Result<()> = match marker {
        Location::Local(path) => (|| -> std::io::Result<()> {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, &content)
        })()
        .map_err(Error::from),
        Location::Remote { .. } => (|| -> Result<()> {
            let mut tmp = tempfile::NamedTempFile::new()?;
            tmp.write_all(content.as_bytes())?;
            tmp.flush()?;
            let tmp_path = tmp.path().to_string_lossy().into_owned();
            let cmd = match set.program() {
                ProgramKind::Rsync => CommandSpec::new("rsync")
                    .arg(tmp_path)
                    .arg(marker.to_string()),
                ProgramKind::Rclone => CommandSpec::new("rclone")
                    .arg("copyto")
                    .arg(tmp_path)
                    .arg(marker.to_string()),
            };
            let out = runner.run(&cmd)?;
            if out.success() {
                Ok(())
            } else {
                Err(Error::command_failed(cmd.to_string(), out.exit_code_str()))
            }
        })(),
    };

    written
        .add_msg(format!("Writing completion marker {marker} failed"))
        .add_fn_name(function_path!())
}
