//! Pre and post task runner.

use crate::backup::backup_set::Task;
use crate::backup::command::{CommandRunner, CommandSpec};
use crate::backup::outcome::SetRun;
use getset::Getters;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskPhase {
    Pre,
    Post,
}

impl TaskPhase {
    fn label(&self) -> &'static str {
        match self {
            TaskPhase::Pre => "pre-backup",
            TaskPhase::Post => "post-backup",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct TaskFailure {
    cmd: String,
    /// `None` when the task was killed or could not be started.
    exit_code: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskReport {
    pub failures: Vec<TaskFailure>,
    /// Set when a failure stopped the remaining tasks.
    pub aborted: bool,
}

impl TaskReport {
    pub fn first_failure(&self) -> Option<&TaskFailure> {
        self.failures.first()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Runs `tasks` in the given order through `sh -c`.
///
/// With `stop_on_error` the first failure ends the run; otherwise failures
/// are logged and the remaining tasks still run.
pub fn run_tasks<R: CommandRunner + ?Sized>(
    runner: &R,
    phase: TaskPhase,
    tasks: &[&Task],
    stop_on_error: bool,
    run: &mut SetRun,
) -> TaskReport {
    let mut report = TaskReport::default();
    for task in tasks {
        run.log
            .info(format!("Running {} task: {}", phase.label(), task.cmd()));
        let exit_code = match runner.run(&CommandSpec::shell(task.cmd())) {
            Ok(output) => {
                if !output.stdout().is_empty() {
                    run.log.debug(output.stdout().trim_end());
                }
                *output.exit_code()
            }
            Err(e) => {
                run.log
                    .error(format!("{} task {:?} could not start: {e}", phase.label(), task.cmd()));
                None
            }
        };
        run.record_step(task.cmd().clone(), exit_code);

        if exit_code == Some(0) {
            continue;
        }
        run.log.error(format!(
            "{} failed with return code {}",
            task.cmd(),
            exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_owned())
        ));
        report.failures.push(TaskFailure {
            cmd: task.cmd().clone(),
            exit_code,
        });
        if stop_on_error {
            report.aborted = true;
            break;
        }
    }
    report
}
