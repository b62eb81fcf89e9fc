//! Last-run bookkeeping per backup set, kept between invocations.

use crate::backup::function_path;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use chrono::{DateTime, Utc};
use function_name::named;
use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

#[skip_serializing_none]
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Getters)]
#[getset(get = "pub")]
pub struct RunState {
    /// Start of the last pass that ended in success; drives the interval gate.
    last_success: Option<DateTime<Utc>>,
    last_attempt: Option<DateTime<Utc>>,
}

impl RunState {
    /// State after a successful pass that started at `at`.
    pub fn succeeded(at: DateTime<Utc>) -> Self {
        Self {
            last_success: Some(at),
            last_attempt: Some(at),
        }
    }

    pub fn attempted(&self, at: DateTime<Utc>) -> Self {
        Self {
            last_success: self.last_success,
            last_attempt: Some(at),
        }
    }
}

/// Storage of [`RunState`] values, one per set name.
pub trait RunStateStore {
    fn load(&self, set_name: &str) -> Result<Option<RunState>>;

    fn save(&self, set_name: &str, state: &RunState) -> Result<()>;

    /// Records a concluded pass. Failed passes only touch sets that already have state.
    fn record(&self, set_name: &str, at: DateTime<Utc>, succeeded: bool) -> Result<()> {
        if succeeded {
            return self.save(set_name, &RunState::succeeded(at));
        }
        match self.load(set_name)? {
            Some(state) => self.save(set_name, &state.attempted(at)),
            None => Ok(()),
        }
    }
}

/// One JSON file per set inside the cache directory.
#[derive(Clone, Debug)]
pub struct FileRunStateStore {
    dir: PathBuf,
}

impl FileRunStateStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, set_name: &str) -> PathBuf {
        self.dir.join(format!("{set_name}.json"))
    }

    fn create_dir(&self) -> Result<()> {
        if self.dir.is_dir() {
            return Ok(());
        }
        tracing::warn!("Cache directory {:?} missing, creating it", self.dir);
        create_private_dir(&self.dir)?;
        Ok(())
    }
}

#[cfg(unix)]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
}

#[cfg(not(unix))]
fn create_private_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)
}

impl RunStateStore for FileRunStateStore {
    #[named]
    fn load(&self, set_name: &str) -> Result<Option<RunState>> {
        let path = self.path_for(set_name);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("No run state for {set_name} at {path:?}");
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::from(e))
                    .add_msg(format!("Reading run state {path:?} failed"))
                    .add_fn_name(function_path!())
            }
        };

        match serde_json::from_str(&content) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                tracing::warn!("Run state {path:?} is corrupted ({e}), treating {set_name} as never run");
                Ok(None)
            }
        }
    }

    #[named]
    fn save(&self, set_name: &str, state: &RunState) -> Result<()> {
        self.create_dir().add_fn_name(function_path!())?;
        let path = self.path_for(set_name);
        let tmp_path = path.with_extension("json.tmp");
        tracing::debug!("Writing run state of {set_name} to {path:?}");

        (|| -> Result<()> {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            serde_json::to_writer_pretty(&mut writer, state)?;
            writer.write_all(b"\n")?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            std::fs::rename(&tmp_path, &path)?;
            Ok(())
        })()
        .map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            e
        })
        .add_msg(format!("Writing run state {path:?} failed"))
        .add_fn_name(function_path!())
    }
}

/// Keeps state in memory only, for dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryRunStateStore {
    states: RefCell<HashMap<String, RunState>>,
}

impl MemoryRunStateStore {
    pub fn with_states<I: IntoIterator<Item = (String, RunState)>>(states: I) -> Self {
        Self {
            states: RefCell::new(states.into_iter().collect()),
        }
    }

    pub fn get(&self, set_name: &str) -> Option<RunState> {
        self.states.borrow().get(set_name).cloned()
    }
}

impl RunStateStore for MemoryRunStateStore {
    fn load(&self, set_name: &str) -> Result<Option<RunState>> {
        Ok(self.get(set_name))
    }

    fn save(&self, set_name: &str, state: &RunState) -> Result<()> {
        self.states
            .borrow_mut()
            .insert(set_name.to_owned(), state.clone());
        Ok(())
    }
}
