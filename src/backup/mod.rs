pub mod arcvec;
pub mod backup_config;
pub mod backup_set;
pub mod command;
pub mod compress;
pub mod destination;
pub mod hanoi;
pub mod link;
pub mod lock;
pub mod notifications;
pub mod orchestrator;
pub mod outcome;
pub mod preflight;
pub mod redacted;
pub mod result_error;
pub mod run_state;
pub mod schedule;
pub mod task;
pub mod transfer;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
