//! Destination templates and locations.
//!
//! A destination template may contain `{setname}` and `{dirname}`. The slot
//! suffix of the Hanoi rotation is appended to the raw template before
//! substitution, so `{dirname}` keeps expanding inside rotated slots.

use crate::backup::hanoi::RotationSlot;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

pub static SETNAME_PLACEHOLDER: &str = "{setname}";
pub static DIRNAME_PLACEHOLDER: &str = "{dirname}";

/// Expands `{setname}` (lowercased) and `{dirname}` inside a template.
pub fn render<S: AsRef<str>>(template: S, set_name: &str, dirname: &str) -> String {
    template
        .as_ref()
        .replace(SETNAME_PLACEHOLDER, &set_name.to_lowercase())
        .replace(DIRNAME_PLACEHOLDER, dirname)
}

/// Where a rendered path lives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Location {
    Local(PathBuf),
    /// `user@host:path` reached through ssh, or an rclone `remote:path`.
    Remote { remote: String, path: String },
}

impl Location {
    pub fn parse<S: AsRef<str>>(spec: S) -> Self {
        let spec = spec.as_ref();
        match spec.split_once(':') {
            Some((head, tail)) if !head.is_empty() && !head.contains('/') => Location::Remote {
                remote: head.to_owned(),
                path: tail.trim_start_matches(':').to_owned(),
            },
            _ => Location::Local(PathBuf::from(spec)),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Location::Local(_))
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Location::Local(p) => Some(p),
            Location::Remote { .. } => None,
        }
    }

    /// The host part of an ssh style `user@host` remote.
    pub fn ssh_host(&self) -> Option<&str> {
        match self {
            Location::Remote { remote, .. } => remote.split_once('@').map(|(_, host)| host),
            Location::Local(_) => None,
        }
    }

    /// Path on the machine that holds the data, as the sync tool sees it there.
    pub fn path_str(&self) -> String {
        match self {
            Location::Local(p) => p.to_string_lossy().into_owned(),
            Location::Remote { path, .. } => path.clone(),
        }
    }

    pub fn join<S: AsRef<str>>(&self, name: S) -> Location {
        match self {
            Location::Local(p) => Location::Local(p.join(name.as_ref())),
            Location::Remote { remote, path } => Location::Remote {
                remote: remote.clone(),
                path: format!("{}/{}", path.trim_end_matches('/'), name.as_ref()),
            },
        }
    }
}

impl Display for Location {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Local(p) => write!(f, "{}", p.display()),
            Location::Remote { remote, path } => write!(f, "{remote}:{path}"),
        }
    }
}

/// Resolves slot directories of one backup set.
#[derive(Clone, Debug)]
pub struct SlotLayout<'a> {
    set_name: &'a str,
    template: &'a str,
    sep: &'a str,
}

impl<'a> SlotLayout<'a> {
    pub fn new(set_name: &'a str, template: &'a str, sep: &'a str) -> Self {
        Self {
            set_name,
            template,
            sep,
        }
    }

    fn slot_template(&self, slot: Option<RotationSlot>) -> String {
        match slot {
            Some(slot) => format!("{}{}{}", self.template, self.sep, slot.suffix()),
            None => self.template.to_owned(),
        }
    }

    /// Destination argument handed to the sync tool for one source directory.
    pub fn target(&self, slot: Option<RotationSlot>, dirname: &str) -> String {
        render(self.slot_template(slot), self.set_name, dirname)
    }

    /// Directory holding one whole backup instance; the completion marker lives here.
    pub fn root(&self, slot: Option<RotationSlot>) -> Location {
        Location::parse(self.target(slot, ""))
    }

    /// Bare, unsuffixed destination.
    pub fn base(&self) -> Location {
        self.root(None)
    }
}

/// Quotes a value for a POSIX shell running on a remote host.
pub fn shell_quote<S: AsRef<str>>(value: S) -> String {
    format!("'{}'", value.as_ref().replace('\'', r"'\''"))
}
