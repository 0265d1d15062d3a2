//! Unified error type for ffpreview.
//!
//! Every bind, start, copy, exit, decode and compile failure funnels into
//! [`Error`]. Process failures observed at wait time are usually wrapped in
//! [`Error::WithStderr`] so the captured diagnostic tail travels with them.

use std::process::ExitStatus;

/// Unified error type covering all failure modes in ffpreview.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Creating an OS pipe for a stream attachment failed.
    #[error("Bind error: failed to create pipe: {source}")]
    Bind {
        /// The underlying OS error.
        source: std::io::Error,
    },

    /// The process could not be launched.
    #[error("Start error [{program}]: {source}")]
    Start {
        /// Program that failed to launch.
        program: String,
        /// The underlying spawn error.
        source: std::io::Error,
    },

    /// A background copy task failed mid-transfer.
    #[error("Copy error [{stream}]: {source}")]
    Copy {
        /// Which stream the task was copying (e.g. "fd 4", "stderr").
        stream: String,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The process terminated abnormally.
    #[error("{program} {status}")]
    Exit {
        /// Program that exited.
        program: String,
        /// Its exit status.
        status: ExitStatus,
    },

    /// Output of a probing command could not be decoded.
    #[error("Decode error [{tool}]: {message}")]
    Decode {
        /// Tool whose output was malformed.
        tool: String,
        /// Human-readable error description.
        message: String,
    },

    /// A map references an input that is not part of the command.
    #[error("Resolution error: map references input #{input} which was not added to this command")]
    Resolution {
        /// Identity of the missing input.
        input: u64,
    },

    /// Another error together with the captured stderr tail.
    #[error("{source}: {stderr}")]
    WithStderr {
        /// The wrapped error.
        source: Box<Error>,
        /// Last lines written to stderr by the process.
        stderr: String,
    },

    /// The cancellation scope was triggered.
    #[error("Cancelled")]
    Cancelled,

    /// A required external tool was not found.
    #[error("Tool not found: {tool}")]
    ToolNotFound {
        /// Name of the missing tool.
        tool: String,
    },

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(String),

    /// An operation was called in the wrong lifecycle state.
    #[error("Invalid state: {0}")]
    State(String),

    /// An I/O operation failed.
    #[error("IO error: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Convenience constructor for [`Error::Start`].
    pub fn start(program: impl Into<String>, source: std::io::Error) -> Self {
        Error::Start {
            program: program.into(),
            source,
        }
    }

    /// Convenience constructor for [`Error::Copy`].
    pub fn copy(stream: impl Into<String>, source: std::io::Error) -> Self {
        Error::Copy {
            stream: stream.into(),
            source,
        }
    }

    /// Convenience constructor for [`Error::Exit`].
    pub fn exit(program: impl Into<String>, status: ExitStatus) -> Self {
        Error::Exit {
            program: program.into(),
            status,
        }
    }

    /// Convenience constructor for [`Error::Decode`].
    pub fn decode(tool: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Decode {
            tool: tool.into(),
            message: message.into(),
        }
    }

    /// Convenience constructor for [`Error::ToolNotFound`].
    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        Error::ToolNotFound { tool: tool.into() }
    }

    /// Wrap `self` together with a stderr tail.
    pub fn with_stderr(self, stderr: impl Into<String>) -> Self {
        Error::WithStderr {
            source: Box::new(self),
            stderr: stderr.into(),
        }
    }

    /// The innermost error, looking through [`Error::WithStderr`].
    pub fn root(&self) -> &Error {
        match self {
            Error::WithStderr { source, .. } => source.root(),
            other => other,
        }
    }

    /// The captured stderr tail, if this error carries one.
    pub fn stderr_tail(&self) -> Option<&str> {
        match self {
            Error::WithStderr { stderr, .. } => Some(stderr),
            _ => None,
        }
    }

    /// Whether the failure was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Error::Cancelled)
    }
}

/// Result alias using the crate-level [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
