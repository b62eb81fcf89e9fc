//! Outcome of one backup set within an invocation.
//!
//! A set is pending until the scheduling gate looks at it. It is then either
//! skipped, or started as a [`SetRun`] that concludes into exactly one
//! terminal outcome. Both paths end in an [`ExecutionResult`].

use chrono::TimeDelta;
use getset::Getters;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    IntervalNotElapsed { remaining: TimeDelta },
    OutsideRuntimeWindow,
    AlreadyRunning { pid: u32 },
}

impl Display for SkipReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Disabled => f.write_str("disabled"),
            SkipReason::IntervalNotElapsed { remaining } => {
                let remaining = remaining.to_std().unwrap_or_default();
                write!(
                    f,
                    "interval not reached ({} still remains)",
                    humantime::format_duration(Duration::from_secs(remaining.as_secs()))
                )
            }
            SkipReason::OutsideRuntimeWindow => f.write_str("out of runtime window"),
            SkipReason::AlreadyRunning { pid } => write!(f, "already running as pid {pid}"),
        }
    }
}

/// Expected operational faults, reported by email.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SoftError {
    PreTaskFailed { cmd: String, exit_code: Option<i32> },
    PostTaskFailed { cmd: String, exit_code: Option<i32> },
    DestinationUnreachable { dst: String },
    HostUnreachable { host: String },
    MountFailed { path: PathBuf, exit_code: Option<i32> },
}

fn code_str(exit_code: &Option<i32>) -> String {
    exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "signal".to_owned())
}

impl Display for SoftError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SoftError::PreTaskFailed { cmd, exit_code } => {
                write!(f, "pre task {cmd:?} failed with code {}", code_str(exit_code))
            }
            SoftError::PostTaskFailed { cmd, exit_code } => {
                write!(f, "post task {cmd:?} failed with code {}", code_str(exit_code))
            }
            SoftError::DestinationUnreachable { dst } => write!(f, "destination {dst} not found"),
            SoftError::HostUnreachable { host } => write!(f, "host {host} is down"),
            SoftError::MountFailed { path, exit_code } => {
                write!(f, "mount of {path:?} failed with code {}", code_str(exit_code))
            }
        }
    }
}

/// Terminal state of a set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    Skipped(SkipReason),
    Success,
    SoftError(SoftError),
    /// Left to the external scheduler: logged to stderr, never mailed.
    HardError(String),
}

impl Outcome {
    pub fn is_hard_error(&self) -> bool {
        matches!(self, Outcome::HardError(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success)
    }

    /// Whether the system itself sends a report for this outcome.
    pub fn is_reported(&self, mail_on_success: bool) -> bool {
        match self {
            Outcome::SoftError(_) => true,
            Outcome::Success => mail_on_success,
            Outcome::Skipped(_) | Outcome::HardError(_) => false,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Skipped(_) => "SKIPPED",
            Outcome::Success => "OK",
            Outcome::SoftError(_) | Outcome::HardError(_) => "FAILED",
        }
    }
}

impl Display for Outcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Outcome::Skipped(reason) => write!(f, "skipped: {reason}"),
            Outcome::Success => f.write_str("completed"),
            Outcome::SoftError(e) => write!(f, "soft error: {e}"),
            Outcome::HardError(e) => write!(f, "hard error: {e}"),
        }
    }
}

/// Exit status of one external step of a pass.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct StepExit {
    step: String,
    exit_code: Option<i32>,
}

/// Captured output of one sync tool run, attached to the report email.
#[derive(Clone, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct TransferLog {
    name: String,
    content: String,
}

impl TransferLog {
    /// Log named after the set and the directory it transferred.
    pub fn new(set_name: &str, dirname: &str, content: String) -> Self {
        let name = format!("{set_name}-{dirname}")
            .chars()
            .map(|c| if c == '/' || c == '.' { '_' } else { c })
            .collect::<String>();
        Self {
            name: format!("{name}.log"),
            content,
        }
    }
}

/// Human readable log of one set's pass, mirrored to tracing.
///
/// Debug lines go to tracing only; everything else also lands in the
/// report body.
#[derive(Clone, Debug, Default)]
pub struct SetLog {
    set_name: String,
    lines: Vec<String>,
}

impl SetLog {
    pub fn new<S: Into<String>>(set_name: S) -> Self {
        Self {
            set_name: set_name.into(),
            lines: Vec::new(),
        }
    }

    /// Adds text to the report without printing it.
    pub fn note<S: Into<String>>(&mut self, msg: S) {
        self.lines.push(msg.into());
    }

    pub fn debug<S: Into<String>>(&mut self, msg: S) {
        tracing::debug!(set = %self.set_name, "{}", msg.into());
    }

    pub fn info<S: Into<String>>(&mut self, msg: S) {
        let msg = msg.into();
        tracing::info!(set = %self.set_name, "{msg}");
        self.lines.push(msg);
    }

    pub fn warn<S: Into<String>>(&mut self, msg: S) {
        let msg = msg.into();
        tracing::warn!(set = %self.set_name, "{msg}");
        self.lines.push(format!("WARNING: {msg}"));
    }

    pub fn error<S: Into<String>>(&mut self, msg: S) {
        let msg = msg.into();
        tracing::error!(set = %self.set_name, "{msg}");
        self.lines.push(format!("ERROR: {msg}"));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn text(&self) -> String {
        self.lines.iter().map(|l| format!("{l}\n")).collect()
    }
}

/// A set that passed the gate and is running.
#[derive(Debug)]
pub struct SetRun {
    set_name: String,
    started: Instant,
    pub log: SetLog,
    steps: Vec<StepExit>,
    transfer_logs: Vec<TransferLog>,
}

impl SetRun {
    pub fn start<S: Into<String>>(set_name: S) -> Self {
        let set_name = set_name.into();
        Self {
            log: SetLog::new(set_name.clone()),
            set_name,
            started: Instant::now(),
            steps: Vec::new(),
            transfer_logs: Vec::new(),
        }
    }

    pub fn set_name(&self) -> &str {
        &self.set_name
    }

    pub fn record_step<S: Into<String>>(&mut self, step: S, exit_code: Option<i32>) {
        self.steps.push(StepExit {
            step: step.into(),
            exit_code,
        });
    }

    pub fn attach(&mut self, log: TransferLog) {
        self.transfer_logs.push(log);
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn conclude(self, outcome: Outcome) -> ExecutionResult {
        let elapsed = self.started.elapsed();
        ExecutionResult {
            set_name: self.set_name,
            outcome,
            log: self.log.text(),
            elapsed,
            steps: self.steps,
            transfer_logs: self.transfer_logs,
        }
    }
}

#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct ExecutionResult {
    set_name: String,
    outcome: Outcome,
    log: String,
    elapsed: Duration,
    steps: Vec<StepExit>,
    transfer_logs: Vec<TransferLog>,
}

impl ExecutionResult {
    pub fn skipped<S: Into<String>>(set_name: S, reason: SkipReason) -> Self {
        Self {
            set_name: set_name.into(),
            outcome: Outcome::Skipped(reason),
            log: String::new(),
            elapsed: Duration::ZERO,
            steps: Vec::new(),
            transfer_logs: Vec::new(),
        }
    }

    /// A set that failed before its pass could start.
    pub fn failed<S: Into<String>, R: Into<String>>(set_name: S, reason: R) -> Self {
        Self {
            set_name: set_name.into(),
            outcome: Outcome::HardError(reason.into()),
            log: String::new(),
            elapsed: Duration::ZERO,
            steps: Vec::new(),
            transfer_logs: Vec::new(),
        }
    }

    /// Turns the outcome into a hard error after the pass, e.g. when the report could not be sent.
    pub fn escalate<S: Into<String>>(&mut self, reason: S) {
        self.outcome = Outcome::HardError(reason.into());
    }
}
