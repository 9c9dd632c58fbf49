use crate::session::context::{GroupId, ThreadId};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    // --------------------------------- protocol errors -------------------------------------------
    #[error("backend command `{command}` failed: {message}")]
    Backend { command: String, message: String },
    #[error("unexpected backend output for `{0}`")]
    UnexpectedOutput(String),

    // --------------------------------- invalid context errors ------------------------------------
    #[error("invalid context: {0}")]
    InvalidContext(String),
    #[error("thread {0} is not tracked")]
    UnknownThread(ThreadId),
    #[error("thread group {0} not found")]
    UnknownGroup(GroupId),

    // --------------------------------- state inconsistency errors --------------------------------
    #[error("context {0} is already running")]
    AlreadyRunning(String),
    #[error("context {0} is already suspended")]
    AlreadySuspended(String),
    #[error("debug session terminated")]
    Terminated,
    #[error("thread group {0} exited")]
    ProcessExited(GroupId),
    #[error("operation abandoned: {0}")]
    Abandoned(String),
}

/// Error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A submitted command failed or returned unexpected data.
    Protocol,
    /// Operation invoked with a context of the wrong kind or an unknown one.
    InvalidContext,
    /// Operation contradicts tracked state.
    InvalidState,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Backend { .. } => ErrorKind::Protocol,
            Error::UnexpectedOutput(_) => ErrorKind::Protocol,

            Error::InvalidContext(_) => ErrorKind::InvalidContext,
            Error::UnknownThread(_) => ErrorKind::InvalidContext,
            Error::UnknownGroup(_) => ErrorKind::InvalidContext,

            Error::AlreadyRunning(_) => ErrorKind::InvalidState,
            Error::AlreadySuspended(_) => ErrorKind::InvalidState,
            Error::Terminated => ErrorKind::InvalidState,
            Error::ProcessExited(_) => ErrorKind::InvalidState,
            Error::Abandoned(_) => ErrorKind::InvalidState,
        }
    }
}

#[macro_export]
macro_rules! _error {
    ($log_fn: path, $res: expr) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "session", "{:#}", e);
                None
            }
        }
    };
    ($log_fn: path, $res: expr, $msg: tt) => {
        match $res {
            Ok(value) => Some(value),
            Err(e) => {
                $log_fn!(target: "session", concat!($msg, " {:#}"), e);
                None
            }
        }
    };
}

/// Transforms `Result` into `Option` and logs an error if it occurs.
#[macro_export]
macro_rules! weak_error {
    ($res: expr) => {
        $crate::_error!(log::warn, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::warn, $res, $msg)
    };
}

/// Transforms `Result` into `Option` and put error into debug logs if it occurs.
#[macro_export]
macro_rules! muted_error {
    ($res: expr) => {
        $crate::_error!(log::debug, $res)
    };
    ($res: expr, $msg: tt) => {
        $crate::_error!(log::debug, $res, $msg)
    };
}
