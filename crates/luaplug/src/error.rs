//! Error types for luaplug

use crate::events::EventKind;
use crate::plugin::LifecycleState;
use crate::status::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for luaplug
#[derive(Clone, Error, Debug)]
pub enum Error {
    /// The Lua runtime could not allocate a context
    #[error("failed to create lua state: {0}")]
    InterpreterCreate(String),

    /// Reading or parsing the script failed
    #[error("failed to load plugin file {}: {message}", path.display())]
    ScriptLoad { path: PathBuf, message: String },

    /// A script raised an error while running
    #[error("script error: {message}")]
    ScriptRuntime { message: String },

    /// A value handed to `register` (or an entry point) is not a function
    #[error("{what} is not callable (got {type_name})")]
    NotCallable {
        what: String,
        type_name: &'static str,
    },

    /// The event kind exists but has no end-to-end dispatcher
    #[error("event kind {0} is not supported by this bridge")]
    UnsupportedEventKind(EventKind),

    /// Raw event number outside the known catalog
    #[error("unknown event kind {0}")]
    UnknownEventKind(i64),

    /// A client handle did not resolve, or outlived its dispatch
    #[error("invalid client reference: {0}")]
    InvalidClientRef(String),

    /// The host refused a publish
    #[error("publish to {topic} rejected: {status}")]
    Publish { topic: String, status: StatusCode },

    /// The host refused to (un)subscribe an event kind
    #[error("host declined {action} for {kind}: {status}")]
    HostDeclined {
        action: &'static str,
        kind: EventKind,
        status: StatusCode,
    },

    /// A boolean-or-code callback returned something unusable
    #[error("malformed return from {kind} callback: {reason}")]
    MalformedCallbackReturn { kind: EventKind, reason: String },

    /// Bad plugin option or argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Dispatch or registration attempted outside the running state
    #[error("plugin is not running (state: {0})")]
    NotRunning(LifecycleState),

    /// The dispatch gate was poisoned by a panicking holder
    #[error("plugin gate lock poisoned")]
    LockPoisoned,

    /// Unclassified Lua error
    #[error("lua error: {0}")]
    Lua(#[from] mlua::Error),
}

impl Error {
    /// Status code reported to the host for this failure.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidArgument(_) | Self::NotCallable { .. } => StatusCode::INVALID_ARGUMENT,
            Self::UnsupportedEventKind(_) | Self::UnknownEventKind(_) => {
                StatusCode::NOT_SUPPORTED
            }
            Self::Publish { status, .. } | Self::HostDeclined { status, .. } => *status,
            Self::InterpreterCreate(_)
            | Self::ScriptLoad { .. }
            | Self::ScriptRuntime { .. }
            | Self::InvalidClientRef(_)
            | Self::MalformedCallbackReturn { .. }
            | Self::NotRunning(_)
            | Self::LockPoisoned
            | Self::Lua(_) => StatusCode::GENERIC_FAILURE,
        }
    }

    /// Classify an error raised while running script code.
    ///
    /// Errors the bridge itself raised into Lua (for example from a host
    /// primitive) come back wrapped in callback errors; those are unwrapped
    /// so their classification survives the round trip.
    pub(crate) fn from_script(err: mlua::Error) -> Self {
        if let Some(inner) = bridge_error(&err) {
            return inner;
        }
        Self::ScriptRuntime {
            message: err.to_string(),
        }
    }
}

fn bridge_error(err: &mlua::Error) -> Option<Error> {
    match err {
        mlua::Error::CallbackError { cause, .. } => bridge_error(cause),
        mlua::Error::ExternalError(inner) => inner.downcast_ref::<Error>().cloned(),
        _ => None,
    }
}

impl From<Error> for mlua::Error {
    fn from(err: Error) -> Self {
        Self::external(err)
    }
}
