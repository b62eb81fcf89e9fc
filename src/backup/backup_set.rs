use crate::backup::arcvec::ArcVec;
use crate::backup::destination::SlotLayout;
use crate::backup::hanoi::{self, RotationSlot};
use crate::backup::notifications::smtp::SmtpNotificationConfig;
use crate::backup::validate::{
    validate_marker_name, validate_separator, validate_set_name, validate_template,
};
use bon::Builder;
use chrono::{DateTime, NaiveDate, NaiveTime};
use getset::Getters;
use itertools::Itertools;
use lettre::message::Mailbox;
use serde::de::Visitor;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::skip_serializing_none;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::result;
use std::time::Duration;
use validator::Validate;

pub static DEFAULT_DATEFILE: &str = "backup-timestamp";
pub static DEFAULT_SEPARATOR: &str = ".";

/// One configured backup set, merged from the `Global` defaults and its own section.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Deserialize, Validate, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct BackupSet {
    #[validate(custom(function = validate_set_name))]
    #[builder(into)]
    name: String,
    #[serde(default)]
    #[builder(default)]
    disabled: bool,
    /// Directories handed one by one to the sync tool as `{dirname}`.
    #[validate(length(min = 1))]
    #[builder(into)]
    backup_list: Vec<String>,
    /// Sub-directories removed from the destination after the transfer.
    #[serde(default)]
    #[builder(default, into)]
    delete_list: Vec<String>,
    #[validate(custom(function = validate_template))]
    #[builder(into)]
    src: String,
    #[validate(custom(function = validate_template))]
    #[builder(into)]
    dst: String,
    #[serde(default, with = "humantime_serde")]
    interval: Option<Duration>,
    #[serde(default)]
    runtime: Option<RuntimeWindow>,
    /// Number of rotation slots, 0 disables rotation.
    #[serde(default)]
    #[validate(range(max = 26))]
    #[builder(default)]
    hanoi: u8,
    #[serde(default = "default_hanoi_day")]
    #[builder(default = default_hanoi_day())]
    hanoi_day: NaiveDate,
    #[serde(default = "default_separator")]
    #[validate(custom(function = validate_separator))]
    #[builder(default = default_separator(), into)]
    sep: String,
    #[serde(default)]
    #[builder(default)]
    hardlink: bool,
    #[serde(default)]
    #[builder(default)]
    check_dst: bool,
    /// Lower runs first.
    #[serde(default)]
    #[builder(default)]
    pri: i32,
    #[serde(default)]
    #[builder(default)]
    program: ProgramKind,
    #[serde(default)]
    #[builder(default, into)]
    program_opts: Vec<String>,
    #[serde(default = "default_tolerated_exit_codes")]
    #[validate(length(min = 1))]
    #[builder(default = default_tolerated_exit_codes(), into)]
    tolerated_exit_codes: Vec<i32>,
    #[serde(default)]
    #[builder(default, into)]
    pre: Vec<Task>,
    #[serde(default)]
    #[builder(default, into)]
    post: Vec<Task>,
    #[serde(default)]
    #[builder(default)]
    skip_on_pre_error: bool,
    /// Pause between two directories of `backup_list`.
    #[serde(default, with = "humantime_serde")]
    #[builder(default)]
    sleep: Duration,
    #[serde(default)]
    #[builder(default)]
    ping: bool,
    #[serde(default)]
    mount: Option<PathBuf>,
    #[serde(default)]
    umount: Option<PathBuf>,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    tolerate_mount_failure: bool,
    #[serde(default)]
    #[validate(range(min = -20, max = 19))]
    #[builder(default)]
    nice: i32,
    #[serde(default)]
    #[validate(range(max = 3))]
    #[builder(default)]
    ionice: u8,
    /// Completion marker written inside every finished backup.
    #[serde(default = "default_datefile")]
    #[validate(custom(function = validate_marker_name))]
    #[builder(default = default_datefile(), into)]
    datefile: String,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    link_last: bool,
    #[serde(default)]
    #[builder(default, into)]
    mail_to: ArcVec<Mailbox>,
    #[serde(default)]
    mail_from: Option<Mailbox>,
    #[serde(default = "default_true")]
    #[builder(default = true)]
    mail_on_success: bool,
    #[serde(default)]
    #[validate(nested)]
    #[builder(default)]
    smtp: SmtpNotificationConfig,
    #[serde(default)]
    #[builder(default)]
    compress_logs: bool,
}

fn default_hanoi_day() -> NaiveDate {
    DateTime::UNIX_EPOCH.date_naive()
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_owned()
}

fn default_datefile() -> String {
    DEFAULT_DATEFILE.to_owned()
}

fn default_tolerated_exit_codes() -> Vec<i32> {
    vec![0]
}

fn default_true() -> bool {
    true
}

impl BackupSet {
    pub fn rotation_slot(&self, today: NaiveDate) -> Option<RotationSlot> {
        hanoi::plan(today, self.hanoi_day, self.hanoi)
    }

    pub fn layout(&self) -> SlotLayout<'_> {
        SlotLayout::new(&self.name, &self.dst, &self.sep)
    }

    /// Pre tasks by ascending order, ties kept in declaration order.
    pub fn sorted_pre(&self) -> Vec<&Task> {
        sorted_tasks(&self.pre)
    }

    pub fn sorted_post(&self) -> Vec<&Task> {
        sorted_tasks(&self.post)
    }

    pub fn is_tolerated(&self, exit_code: Option<i32>) -> bool {
        exit_code.is_some_and(|code| self.tolerated_exit_codes.contains(&code))
    }

    pub fn wants_mail(&self) -> bool {
        !self.mail_to.is_empty()
    }
}

fn sorted_tasks(tasks: &[Task]) -> Vec<&Task> {
    // sorted_by_key is stable
    tasks.iter().sorted_by_key(|t| t.order).collect()
}

/// Shell command run before or after the transfer.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct Task {
    #[serde(default)]
    #[builder(default)]
    order: i32,
    #[builder(into)]
    cmd: String,
}

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgramKind {
    #[default]
    Rsync,
    Rclone,
}

impl ProgramKind {
    pub fn binary(&self) -> &'static str {
        match self {
            ProgramKind::Rsync => "rsync",
            ProgramKind::Rclone => "rclone",
        }
    }

    pub fn supports_link_dest(&self) -> bool {
        matches!(self, ProgramKind::Rsync)
    }
}

impl Display for ProgramKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.binary())
    }
}

/// Daily time range in which a set may start, written `HH:MM:SS-HH:MM:SS`.
///
/// Both ends are inclusive. An end earlier than the start wraps past midnight.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RuntimeWindow {
    start: NaiveTime,
    end: NaiveTime,
}

impl RuntimeWindow {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            self.start <= time && time <= self.end
        } else {
            time >= self.start || time <= self.end
        }
    }

    pub fn wraps_midnight(&self) -> bool {
        self.end < self.start
    }
}

impl Display for RuntimeWindow {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}-{}",
            self.start.format("%H:%M:%S"),
            self.end.format("%H:%M:%S")
        )
    }
}

fn parse_time_of_day(s: &str) -> Option<NaiveTime> {
    let parts: Vec<u32> = s
        .trim()
        .split(':')
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [h] => NaiveTime::from_hms_opt(*h, 0, 0),
        [h, m] => NaiveTime::from_hms_opt(*h, *m, 0),
        [h, m, s] => NaiveTime::from_hms_opt(*h, *m, *s),
        _ => None,
    }
}

impl std::str::FromStr for RuntimeWindow {
    type Err = String;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        let (start, end) = s
            .split_once('-')
            .ok_or_else(|| format!("Runtime window {s:?} must look like HH:MM:SS-HH:MM:SS"))?;
        let start = parse_time_of_day(start)
            .ok_or_else(|| format!("Invalid runtime window start {start:?}"))?;
        let end =
            parse_time_of_day(end).ok_or_else(|| format!("Invalid runtime window end {end:?}"))?;
        Ok(Self { start, end })
    }
}

impl Serialize for RuntimeWindow {
    fn serialize<S: Serializer>(&self, serializer: S) -> result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct RuntimeWindowVisitor;

impl Visitor<'_> for RuntimeWindowVisitor {
    type Value = RuntimeWindow;

    fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("a time range like 05:00:00-06:30:00")
    }

    fn visit_str<E>(self, v: &str) -> result::Result<Self::Value, E>
    where
        E: serde::de::Error,
    {
        v.parse().map_err(serde::de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for RuntimeWindow {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> result::Result<Self, D::Error> {
        deserializer.deserialize_str(RuntimeWindowVisitor)
    }
}
