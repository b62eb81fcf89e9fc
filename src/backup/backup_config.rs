//! Configuration registry.
//!
//! The file is a YAML mapping of sections. `Global` holds the process wide
//! settings plus defaults inherited by every other section; every other
//! section is one backup set, kept in declaration order.

use crate::backup::backup_set::BackupSet;
use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::{convert_error_vec, Result};
use crate::backup::result_error::{AddFunctionName, AddMsg};
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_yml::{Mapping, Value};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use validator::Validate;

pub static GLOBAL_SECTION: &str = "Global";
pub static DEFAULT_CONFIG_PATH: &str = "/etc/hanoi-backup/hanoi-backup.yml";
pub static DEFAULT_PIDFILE: &str = "/var/run/hanoi-backup.pid";
pub static DEFAULT_CACHE_DIR: &str = "/var/cache/hanoi-backup";

/// Keys that only make sense once per process.
static GLOBAL_ONLY_KEYS: [&str; 2] = ["pidfile", "cache_dir"];
/// List keys where a set extends the Global list instead of replacing it.
static CONCATENATED_KEYS: [&str; 2] = ["pre", "post"];

#[derive(Clone, Debug, Serialize, Deserialize, Builder, Getters)]
#[serde(deny_unknown_fields)]
#[getset(get = "pub")]
pub struct GlobalConfig {
    #[serde(default = "default_pidfile")]
    #[builder(default = default_pidfile(), into)]
    pidfile: PathBuf,
    /// Run state directory.
    #[serde(default = "default_cache_dir")]
    #[builder(default = default_cache_dir(), into)]
    cache_dir: PathBuf,
}

fn default_pidfile() -> PathBuf {
    PathBuf::from(DEFAULT_PIDFILE)
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Every backup set of one configuration file, immutable once loaded.
#[derive(Clone, Debug, Getters)]
#[getset(get = "pub")]
pub struct BackupConfig {
    global: GlobalConfig,
    sets: Vec<BackupSet>,
}

impl BackupConfig {
    pub fn new(global: GlobalConfig, sets: Vec<BackupSet>) -> Self {
        Self { global, sets }
    }

    #[named]
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        File::open(path)
            .map_err(Error::from)
            .and_then(Self::from_reader)
            .add_msg(format!("Loading config {path:?} failed"))
            .add_fn_name(function_path!())
    }

    #[named]
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let root: Value = serde_yml::from_reader(reader)
            .map_err(Error::from)
            .add_msg("Parse YAML config failed")
            .add_fn_name(function_path!())?;
        Self::from_value(root)
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::from_reader(yaml.as_bytes())
    }

    #[named]
    fn from_value(root: Value) -> Result<Self> {
        let Value::Mapping(root) = root else {
            return Err(Error::config("top level must be a mapping of sections"));
        };
        let global_section = match root.get(GLOBAL_SECTION) {
            Some(Value::Mapping(m)) => m.clone(),
            Some(Value::Null) => Mapping::new(),
            Some(_) => return Err(Error::config(format!("{GLOBAL_SECTION} must be a mapping"))),
            None => {
                return Err(Error::config(format!(
                    "missing required {GLOBAL_SECTION} section"
                )))
            }
        };

        let (global, defaults) = split_global(global_section)
            .add_msg(format!("Invalid {GLOBAL_SECTION} section"))
            .add_fn_name(function_path!())?;

        let mut sets = Vec::new();
        let mut errors = Vec::new();
        let mut seen = HashSet::new();
        for (key, section) in root.iter() {
            let Some(name) = key.as_str() else {
                errors.push(Error::config(format!("section name {key:?} is not a string")));
                continue;
            };
            if name == GLOBAL_SECTION {
                continue;
            }
            if !seen.insert(name.to_lowercase()) {
                errors.push(Error::config(format!(
                    "duplicate backup set {name:?} (names are case-insensitive)"
                )));
                continue;
            }
            match build_set(name, &defaults, section) {
                Ok(set) => sets.push(set),
                Err(e) => errors.push(e.add_msg(format!("Invalid backup set {name:?}"))),
            }
        }
        convert_error_vec(errors).add_fn_name(function_path!())?;

        tracing::debug!(
            "Loaded {} backup sets: {}",
            sets.len(),
            sets.iter().map(|s| s.name()).join(", ")
        );
        Ok(Self { global, sets })
    }

    /// The named sets in declaration order; names match case-insensitively.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&BackupSet>> {
        if names.is_empty() {
            return Ok(self.sets.iter().collect());
        }
        let wanted: HashSet<String> = names.iter().map(|n| n.as_ref().to_lowercase()).collect();
        let unknown = wanted
            .iter()
            .filter(|w| !self.sets.iter().any(|s| s.name().to_lowercase() == **w))
            .sorted()
            .collect_vec();
        if !unknown.is_empty() {
            return Err(Error::config(format!(
                "unknown backup set(s): {}",
                unknown.iter().join(", ")
            )));
        }
        Ok(self
            .sets
            .iter()
            .filter(|s| wanted.contains(&s.name().to_lowercase()))
            .collect())
    }

    /// Applies command line overrides of the Global settings.
    pub fn with_overrides(mut self, pidfile: Option<PathBuf>, cache_dir: Option<PathBuf>) -> Self {
        if let Some(pidfile) = pidfile {
            self.global.pidfile = pidfile;
        }
        if let Some(cache_dir) = cache_dir {
            self.global.cache_dir = cache_dir;
        }
        self
    }
}

/// Splits Global into process settings and inherited set defaults.
fn split_global(mut section: Mapping) -> Result<(GlobalConfig, Mapping)> {
    let mut global_only = Mapping::new();
    for key in GLOBAL_ONLY_KEYS {
        if let Some(value) = section.remove(key) {
            global_only.insert(Value::String(key.to_owned()), value);
        }
    }
    let global: GlobalConfig = serde_yml::from_value(Value::Mapping(global_only))?;
    Ok((global, section))
}

fn build_set(name: &str, defaults: &Mapping, section: &Value) -> Result<BackupSet> {
    let empty = Mapping::new();
    let overrides = match section {
        Value::Mapping(m) => m,
        Value::Null => &empty,
        _ => return Err(Error::config("section must be a mapping")),
    };

    let mut merged = defaults.clone();
    for (key, value) in overrides.iter() {
        let key_str = key.as_str().unwrap_or_default();
        if GLOBAL_ONLY_KEYS.contains(&key_str) {
            return Err(Error::config(format!(
                "{key_str:?} is only allowed in the {GLOBAL_SECTION} section"
            )));
        }
        if key_str == "name" {
            return Err(Error::config("\"name\" is taken from the section name"));
        }
        let value = match (CONCATENATED_KEYS.contains(&key_str), merged.get(key), value) {
            (true, Some(Value::Sequence(inherited)), Value::Sequence(own)) => {
                Value::Sequence(inherited.iter().chain(own.iter()).cloned().collect())
            }
            _ => value.clone(),
        };
        merged.insert(key.clone(), value);
    }
    merged.insert(
        Value::String("name".to_owned()),
        Value::String(name.to_owned()),
    );

    let set: BackupSet = serde_yml::from_value(Value::Mapping(merged))?;
    set.validate()?;
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::backup_set::ProgramKind;
    use std::time::Duration;
    use tempfile::TempDir;

    static CONFIG: &str = r#"
Global:
  pidfile: /tmp/hanoi.pid
  backup_list: [/etc]
  src: "{dirname}"
  dst: /backup/{setname}
  interval: 1d
  hanoi: 4
  pri: 10
  pre:
    - order: 10
      cmd: sync
  mail_to: [ops@example.com]

Home:
  backup_list: [/home, /root]
  hanoi: 11
  hardlink: true
  pre:
    - order: 5
      cmd: "echo home"

Db:
  pri: -1
  runtime: "01:00:00-05:00:00"
  program: rclone
  program_opts: [sync]
  smtp:
    host: mail.example.com
    port: 2525
"#;

    #[test]
    fn test_global_defaults_and_overrides() {
        let config = BackupConfig::from_yaml_str(CONFIG).unwrap();
        assert_eq!(config.global().pidfile(), Path::new("/tmp/hanoi.pid"));
        assert_eq!(config.global().cache_dir(), Path::new(DEFAULT_CACHE_DIR));

        let names = config.sets().iter().map(|s| s.name().as_str()).collect_vec();
        assert_eq!(names, vec!["Home", "Db"]);

        let home = &config.sets()[0];
        assert_eq!(home.backup_list(), &vec!["/home".to_owned(), "/root".to_owned()]);
        assert_eq!(*home.hanoi(), 11);
        assert_eq!(*home.pri(), 10);
        assert_eq!(home.interval(), &Some(Duration::from_secs(86400)));
        assert!(*home.hardlink());
        assert!(home.wants_mail());

        let db = &config.sets()[1];
        assert_eq!(db.backup_list(), &vec!["/etc".to_owned()]);
        assert_eq!(*db.hanoi(), 4);
        assert_eq!(*db.pri(), -1);
        assert_eq!(*db.program(), ProgramKind::Rclone);
        assert_eq!(db.smtp().port(), &Some(2525));
        assert_eq!(db.runtime().as_ref().unwrap().to_string(), "01:00:00-05:00:00");
    }

    #[test]
    fn test_pre_tasks_are_concatenated_then_sorted() {
        let config = BackupConfig::from_yaml_str(CONFIG).unwrap();
        let home = &config.sets()[0];
        let cmds = home.sorted_pre().iter().map(|t| t.cmd().as_str()).collect_vec();
        assert_eq!(cmds, vec!["echo home", "sync"]);

        let db = &config.sets()[1];
        assert_eq!(db.pre().len(), 1);
    }

    #[test]
    fn test_missing_global_is_rejected() {
        let err = BackupConfig::from_yaml_str("Home:\n  backup_list: [/home]\n").unwrap_err();
        assert!(err.to_string().contains("missing required Global section"));
    }

    #[test]
    fn test_global_only_keys_rejected_in_sets() {
        let yaml = "Global:\n  src: x\n  dst: y\n  backup_list: [/a]\nHome:\n  pidfile: /x\n";
        let err = BackupConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("only allowed in the Global section"));
    }

    #[test]
    fn test_unknown_keys_and_bad_values_fail_fast() {
        let yaml = "Global:\n  src: x\n  dst: y\n  backup_list: [/a]\nHome:\n  hanio: 3\nDb:\n  hanoi: 40\n";
        let err = BackupConfig::from_yaml_str(yaml).unwrap_err();
        match err.root() {
            Error::LotsOfError(errors) => assert_eq!(errors.len(), 2),
            other => panic!("Expected one error per set, got {other:?}"),
        }
    }

    #[test]
    fn test_case_insensitive_duplicates_rejected() {
        let yaml = "Global:\n  src: x\n  dst: y\n  backup_list: [/a]\nHome: {}\nhome: {}\n";
        assert!(BackupConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_select() {
        let config = BackupConfig::from_yaml_str(CONFIG).unwrap();
        let picked = config.select(&["db"]).unwrap();
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].name(), "Db");
        assert_eq!(config.select::<&str>(&[]).unwrap().len(), 2);
        assert!(config.select(&["nope"]).is_err());
    }

    #[test]
    fn test_load_from_file_and_overrides() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hanoi-backup.yml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = BackupConfig::load(&path)
            .unwrap()
            .with_overrides(None, Some(dir.path().join("cache")));
        assert_eq!(config.global().pidfile(), Path::new("/tmp/hanoi.pid"));
        assert_eq!(config.global().cache_dir(), &dir.path().join("cache"));

        assert!(BackupConfig::load(dir.path().join("missing.yml")).is_err());
    }
}
