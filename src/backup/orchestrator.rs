//! One invocation: lock, gate, then run every eligible set in priority order.

use crate::backup::backup_config::BackupConfig;
use crate::backup::backup_set::BackupSet;
use crate::backup::command::CommandRunner;
use crate::backup::compress::LogCompression;
use crate::backup::hanoi::RotationSlot;
use crate::backup::link::{self, LinkBase};
use crate::backup::lock::PidLock;
use crate::backup::notifications::{Notification, Report};
use crate::backup::outcome::{ExecutionResult, Outcome, SetRun, SkipReason, SoftError};
use crate::backup::preflight::{self, MountTable};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::run_state::RunStateStore;
use crate::backup::schedule;
use crate::backup::task::{self, TaskPhase};
use crate::backup::transfer;
use bon::Builder;
use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use getset::{CopyGetters, Getters};
use itertools::Itertools;
use std::path::Path;
use tracing::{error, info, warn};

/// Command line switches of one invocation.
#[derive(Clone, Debug, Default, Builder, Getters, CopyGetters)]
pub struct RunOptions {
    /// Ignore interval and runtime window.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    force: bool,
    /// Dry run: log what would happen, change nothing.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    safe: bool,
    /// Stay silent when another instance holds the lock.
    #[builder(default)]
    #[getset(get_copy = "pub")]
    batch: bool,
    /// Restrict the run to these sets, empty means all.
    #[builder(default, into)]
    #[getset(get = "pub")]
    only_sets: Vec<String>,
}

#[derive(Debug, Default, Getters, CopyGetters)]
pub struct InvocationReport {
    #[getset(get = "pub")]
    results: Vec<ExecutionResult>,
    /// Pid of the running instance that made this one back off.
    #[getset(get_copy = "pub")]
    lock_holder: Option<u32>,
}

impl InvocationReport {
    /// 1 when a set ended in a hard error, 0 otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.results.iter().any(|r| r.outcome().is_hard_error()) {
            1
        } else {
            0
        }
    }
}

#[derive(Builder)]
pub struct Orchestrator<'a> {
    config: &'a BackupConfig,
    runner: &'a dyn CommandRunner,
    notifier: &'a dyn Notification,
    store: &'a dyn RunStateStore,
    lock: PidLock,
    #[builder(default)]
    options: RunOptions,
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_owned())
}

impl Orchestrator<'_> {
    pub fn run(&self, now: DateTime<FixedOffset>) -> Result<InvocationReport> {
        let sets = self.config.select(self.options.only_sets().as_slice())?;

        let _guard = match self.lock.acquire() {
            Ok(guard) => guard,
            Err(e) => {
                if let Error::AlreadyRunning { pid } = e.root() {
                    if !self.options.batch() {
                        warn!("Script already running with pid {pid}");
                    }
                    let results = sets
                        .iter()
                        .map(|set| {
                            ExecutionResult::skipped(
                                set.name(),
                                SkipReason::AlreadyRunning { pid: *pid },
                            )
                        })
                        .collect();
                    return Ok(InvocationReport {
                        results,
                        lock_holder: Some(*pid),
                    });
                }
                return Err(e);
            }
        };

        let schedule = schedule::plan(sets, now, self.store, self.options.force());
        let mut results = Vec::new();
        for (set, reason) in schedule.skipped {
            info!("Skipping set {} because {reason}", set.name());
            results.push(ExecutionResult::skipped(set.name(), reason));
        }
        for (set, e) in schedule.failed {
            error!("Backup set {} failed: {e}", set.name());
            results.push(ExecutionResult::failed(set.name(), e.to_string()));
        }
        if schedule.runnable.is_empty() {
            info!("No backup set to run");
            return Ok(InvocationReport {
                results,
                lock_holder: None,
            });
        }

        info!(
            "Backup started on {} at {}, sets: {}",
            hostname(),
            now.format("%Y-%m-%d %H:%M:%S %:z"),
            schedule.runnable.iter().map(|s| s.name()).join(", ")
        );
        if self.options.safe() {
            info!("Running in safe mode, nothing will be changed");
        }

        for set in schedule.runnable {
            results.push(self.run_set(set, now));
        }
        Ok(InvocationReport {
            results,
            lock_holder: None,
        })
    }

    fn run_set(&self, set: &BackupSet, now: DateTime<FixedOffset>) -> ExecutionResult {
        let mut run = SetRun::start(set.name());
        run.log.note(format!(
            "Backup of set {} started on {} at {}",
            set.name(),
            hostname(),
            now.format("%Y-%m-%d %H:%M:%S")
        ));

        let (outcome, completed) = self.pass(set, now, &mut run);

        if set.umount().is_some() {
            preflight::umount(self.runner, set, &MountTable::read(), &mut run);
        }
        let mut result = run.conclude(outcome);

        if self.options.safe() {
            info!("Skipping write of run state for {}", set.name());
        } else if let Err(e) = self
            .store
            .record(set.name(), now.with_timezone(&Utc), completed)
        {
            result.escalate(format!("run state not saved: {e}"));
        }

        if result.outcome().is_reported(*set.mail_on_success()) && set.wants_mail() {
            if self.options.safe() {
                info!(
                    "Skipping sending detailed logs to {}",
                    set.mail_to().iter().join(", ")
                );
            } else if let Err(e) = self.notify(set, &result) {
                result.escalate(format!("report not sent: {e}"));
            }
        }

        match result.outcome() {
            Outcome::HardError(reason) => error!("Backup set {} failed: {reason}", set.name()),
            outcome => info!("Backup set {} {outcome}", set.name()),
        }
        result
    }

    fn notify(&self, set: &BackupSet, result: &ExecutionResult) -> Result<()> {
        let report = Report::compose(result, LogCompression::from_flag(*set.compress_logs()))?;
        self.notifier.send(set, &report)
    }

    /// Runs the set and tells whether the data was fully transferred.
    fn pass(
        &self,
        set: &BackupSet,
        now: DateTime<FixedOffset>,
        run: &mut SetRun,
    ) -> (Outcome, bool) {
        if let Err(outcome) = preflight::ping(self.runner, set, run) {
            return (outcome, false);
        }
        if set.mount().is_some() {
            if let Err(outcome) = preflight::mount(self.runner, set, &MountTable::read(), run) {
                return (outcome, false);
            }
        }
        if let Err(outcome) = preflight::check_destination(self.runner, set, run) {
            return (outcome, false);
        }

        let slot = set.rotation_slot(now.date_naive());
        if let Some(slot) = slot {
            run.log.debug(format!("First hanoi day: {}", set.hanoi_day()));
            run.log
                .info(format!("Hanoi slots in use: {}, writing slot {slot}", set.hanoi()));
        }
        let base = self.link_base(set, slot, run);

        let pre = task::run_tasks(
            self.runner,
            TaskPhase::Pre,
            &set.sorted_pre(),
            *set.skip_on_pre_error(),
            run,
        );
        if pre.aborted {
            let outcome = match pre.first_failure() {
                Some(failure) => {
                    run.log.warn("Skipping backup because a pre-backup task failed");
                    Outcome::SoftError(SoftError::PreTaskFailed {
                        cmd: failure.cmd().clone(),
                        exit_code: *failure.exit_code(),
                    })
                }
                None => Outcome::HardError("pre-backup tasks aborted".to_owned()),
            };
            return (outcome, false);
        }

        let marker = link::marker_location(set, slot);
        if self.options.safe() {
            run.log.info(format!("Would remove completion marker {marker}"));
        } else if let Err(e) = link::clear_marker(&marker) {
            run.log.error(e.to_string());
            return (Outcome::HardError(e.to_string()), false);
        }

        let failed = self.transfer_all(set, slot, base.as_ref(), run);
        self.apply_delete_list(set, slot, run);

        let post = task::run_tasks(self.runner, TaskPhase::Post, &set.sorted_post(), false, run);

        if !failed.is_empty() {
            return (
                Outcome::HardError(format!("transfer failed for {}", failed.join(", "))),
                false,
            );
        }

        let completed_at = now + TimeDelta::from_std(run.elapsed()).unwrap_or(TimeDelta::zero());
        if self.options.safe() {
            run.log.info("Skipping creation of completion marker");
        } else if let Err(e) = link::write_marker(self.runner, set, &marker, completed_at) {
            run.log.error(e.to_string());
            return (Outcome::HardError(e.to_string()), false);
        }
        self.link_latest(set, slot, run);

        let outcome = match post.first_failure() {
            Some(failure) => Outcome::SoftError(SoftError::PostTaskFailed {
                cmd: failure.cmd().clone(),
                exit_code: *failure.exit_code(),
            }),
            None => Outcome::Success,
        };
        (outcome, true)
    }

    fn link_base(
        &self,
        set: &BackupSet,
        slot: Option<RotationSlot>,
        run: &mut SetRun,
    ) -> Option<LinkBase> {
        if !*set.hardlink() {
            return None;
        }
        if !set.program().supports_link_dest() {
            run.log.warn(format!(
                "Hard linking is not supported by {}, ignoring it",
                set.program()
            ));
            return None;
        }
        let base = link::resolve(self.runner, set, slot, &mut run.log);
        match &base {
            Some(base) => run.log.info(format!(
                "Will hard link against {} ({})",
                base.root(),
                base.completed_at()
            )),
            None => run
                .log
                .info("Will NOT use hard linking (no suitable completed backup found)"),
        }
        base
    }

    /// Transfers every directory of `backup_list`, returning the ones that failed.
    fn transfer_all(
        &self,
        set: &BackupSet,
        slot: Option<RotationSlot>,
        base: Option<&LinkBase>,
        run: &mut SetRun,
    ) -> Vec<String> {
        let mut failed = Vec::new();
        for (i, dirname) in set.backup_list().iter().enumerate() {
            if i > 0 && !set.sleep().is_zero() {
                let pause = humantime::format_duration(*set.sleep());
                if self.options.safe() {
                    run.log.info(format!("Should sleep {pause} now, skipping"));
                } else {
                    run.log.info(format!("Sleeping {pause}"));
                    std::thread::sleep(*set.sleep());
                }
            }

            let cmd = transfer::build_command(set, slot, base, dirname);
            match transfer::execute(self.runner, set, &cmd, dirname, run) {
                Ok(status) if status.tolerated => {}
                Ok(_) => failed.push(dirname.clone()),
                Err(e) => {
                    run.log.error(format!("Unable to run {cmd}: {e}"));
                    failed.push(dirname.clone());
                }
            }
        }
        failed
    }

    fn apply_delete_list(&self, set: &BackupSet, slot: Option<RotationSlot>, run: &mut SetRun) {
        if set.delete_list().is_empty() {
            return;
        }
        let root = set.layout().root(slot);
        let Some(root_path) = root.as_local() else {
            run.log
                .warn(format!("Ignoring delete list, destination {root} is remote"));
            return;
        };

        for entry in set.delete_list() {
            let relative = Path::new(entry.trim_start_matches('/'));
            if relative
                .components()
                .any(|c| !matches!(c, std::path::Component::Normal(_)))
            {
                run.log
                    .warn(format!("Ignoring delete list entry {entry:?} outside the backup"));
                continue;
            }
            let target = root_path.join(relative);
            if !target.is_dir() {
                continue;
            }
            if self.options.safe() {
                run.log
                    .info(format!("Would delete folder in delete list {}", target.display()));
                continue;
            }
            run.log
                .info(format!("DELETING folder in delete list {}", target.display()));
            if let Err(e) = std::fs::remove_dir_all(&target) {
                run.log
                    .warn(format!("Deleting {} failed: {e}", target.display()));
            }
        }
    }

    /// Points the bare destination at the slot just written. Local rotation only.
    fn link_latest(&self, set: &BackupSet, slot: Option<RotationSlot>, run: &mut SetRun) {
        if !*set.link_last() || slot.is_none() {
            return;
        }
        let layout = set.layout();
        let (Some(link), Some(target)) = (
            layout.base().as_local().map(Path::to_path_buf),
            layout.root(slot).as_local().map(Path::to_path_buf),
        ) else {
            return;
        };

        if self.options.safe() {
            run.log.info(format!(
                "Skipping creation of symlink {} to {}",
                link.display(),
                target.display()
            ));
            return;
        }

        match std::fs::symlink_metadata(&link) {
            Ok(meta) if meta.file_type().is_symlink() => {
                run.log.debug(format!("Deleting old symlink {}", link.display()));
                if let Err(e) = std::fs::remove_file(&link) {
                    run.log
                        .warn(format!("Removing old symlink {} failed: {e}", link.display()));
                    return;
                }
            }
            Ok(_) => {
                run.log.warn(format!(
                    "Can't create symlink {}, a file with such name exists",
                    link.display()
                ));
                return;
            }
            Err(_) => {}
        }

        run.log.info(format!(
            "Creating symlink {} to {}",
            link.display(),
            target.display()
        ));
        if let Err(e) = symlink(&target, &link) {
            run.log
                .warn(format!("Creating symlink {} failed: {e}", link.display()));
        }
    }
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn symlink(_target: &Path, _link: &Path) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "symlinks are only created on unix",
    ))
}
