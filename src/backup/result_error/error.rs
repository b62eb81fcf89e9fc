use crate::backup::result_error::{AddFunctionName, AddMsg};
use itertools::Itertools;
use thiserror::Error;

#[derive(Error, Debug, thiserror_ext::Construct)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    LettreEmail(#[from] lettre::error::Error),
    #[error(transparent)]
    LettreSmtp(#[from] lettre::transport::smtp::Error),
    #[error(transparent)]
    LettreAddress(#[from] lettre::address::AddressError),
    #[error(transparent)]
    Lzma(#[from] liblzma::stream::Error),
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error("Another instance is already running with pid {pid}")]
    AlreadyRunning { pid: u32 },
    #[error("Pid file {path:?} holds no pid and is too recent to be stale")]
    LockUnreadable { path: std::path::PathBuf },
    #[error("Smtp server rejected message: {0}")]
    SmtpSendError(String),
    #[error("Invalid content type: {0}")]
    ContentType(String),
    #[error("Command `{cmd}` exited with {exit_code}")]
    CommandFailed { cmd: String, exit_code: String },
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{} failed:\n{}", fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithFnName { fn_name: String, error: Box<Error> },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>> AddMsg<S> for Error {
    fn add_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl<S: Into<String>> AddFunctionName<S> for Error {
    fn add_fn_name(self, fn_name: S) -> Self {
        Self::WithFnName {
            fn_name: fn_name.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    /// Unwraps message and function-name context down to the error that was raised.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithFnName { error, .. } => error.root(),
            e => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_io_error() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error);

        match error {
            Error::Io(_) => (),
            _ => panic!("Expected Io error"),
        }
    }

    #[test]
    fn test_error_add_msg() {
        let error = Error::config("missing dst");
        let error_with_msg = error.add_msg("Custom message");

        match error_with_msg {
            Error::WithMsg { msg, .. } => assert_eq!(msg, "Custom message"),
            _ => panic!("Expected WithMsg error"),
        }
    }

    #[test]
    fn test_error_add_fn_name_display() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error = Error::from(io_error).add_fn_name("hanoi_backup::lock::acquire");
        let error_str = error.to_string();

        assert!(error_str.contains("hanoi_backup::lock::acquire failed"));
        assert!(error_str.contains("  file not found"));
    }

    #[test]
    fn test_root_skips_context() {
        let error = Error::already_running(42u32)
            .add_msg("Locking")
            .add_fn_name("run");
        assert!(matches!(error.root(), Error::AlreadyRunning { pid: 42 }));
    }

    #[test]
    fn test_error_from_vec_flattens_nested() {
        let nested = Error::from(vec![Error::config("a"), Error::config("b")]);
        let combined = Error::from(vec![nested, Error::config("c")]);
        match combined {
            Error::LotsOfError(error_vec) => assert_eq!(error_vec.len(), 3),
            _ => panic!("Expected LotsOfError"),
        }
    }

    #[test]
    #[should_panic(expected = "Should not create lots of errors when error is empty")]
    fn test_error_from_empty_vec_panics() {
        let errors: Vec<Error> = vec![];
        let _error = Error::from(errors);
    }

    #[test]
    fn test_lots_of_error_display_separates_entries() {
        let error = Error::from(vec![Error::config("first"), Error::config("second")]);
        assert_eq!(
            error.to_string(),
            "Invalid configuration: first\n\nInvalid configuration: second"
        );
    }
}
