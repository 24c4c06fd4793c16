use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

use crate::value::LuaType;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub type Result<T, E = Error> = core::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    /// The front end did not exit before its deadline. The call produced no
    /// result and the child process was killed.
    #[error("remote call timed out after {}ms", .timeout.as_millis())]
    ChannelTimeout { timeout: Duration },

    /// The front end exited unsuccessfully.
    #[error("front end failed ({status}): {diagnostics}")]
    ChannelProcessFailure {
        status: ExitStatus,
        diagnostics: String,
    },

    /// The front end exited successfully but its output contains `error:`.
    ///
    /// This is a substring heuristic. A value whose text legitimately contains
    /// `error:` (for example the string `"error: nothing happened"`) is reported
    /// the same way.
    #[error("remote error: {output}")]
    RemoteSyntaxError { output: String },

    /// The front end could not be started at all.
    #[error("failed to spawn front end `{}`", .program.display())]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The value has no Lua literal representation.
    #[error("unsupported value type: {type_name}")]
    UnsupportedValueType { type_name: String },

    /// Table text that is not brace-delimited or has unbalanced braces.
    #[error("malformed table text: {text}")]
    MalformedTableText { text: String },

    /// Scalar text that does not parse as the expected type.
    #[error("malformed {kind} literal: {text}")]
    MalformedLiteral { kind: LuaType, text: String },

    /// A dispatch referenced an id with no registered callable.
    #[error("no callback registered with id {id}")]
    UnregisteredCallback { id: u64 },

    /// Index assignment with a key that is not a number, string or boolean.
    #[error("invalid key type: {type_name}, must be a number, string or boolean")]
    InvalidKeyType { type_name: &'static str },

    /// The receiver sentinel was passed to a proxy that has no parent.
    #[error("object {handle} has no receiver to substitute")]
    MissingReceiver { handle: u64 },

    /// A registered host callable returned an error.
    #[error("callback {id} failed: {source}")]
    Callback {
        id: u64,
        #[source]
        source: BoxError,
    },

    #[error("invalid configuration for {key}: {message}")]
    Config { key: &'static str, message: String },

    /// The bridge was closed.
    #[error("bridge is closed")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether the error came from the transport rather than from marshaling or
    /// the callback layer.
    #[must_use]
    pub const fn is_channel(&self) -> bool {
        matches!(
            self,
            Self::ChannelTimeout { .. }
                | Self::ChannelProcessFailure { .. }
                | Self::RemoteSyntaxError { .. }
                | Self::Spawn { .. }
        )
    }
}
