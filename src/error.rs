//! Error types you might see while provisioning, launching or supervising a match.
//!
//! Crashes and realtime timeouts are *not* errors: they are terminal states of an otherwise
//! successful match, see [`TerminalState`](crate::monitor::TerminalState).

use std::path::PathBuf;

use thiserror::Error;

/// A single call to the container runtime failed.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// the runtime command line could not be spawned at all
    #[error("could not run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// the runtime answered with a non-zero exit status
    #[error("'{command}' failed with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },

    /// the runtime answered something we do not understand
    #[error("unexpected output from '{command}': {output:?}")]
    UnexpectedOutput { command: String, output: String },
}

/// Errors that abort a match (or the installation) before a result can be produced.
#[derive(Error, Debug)]
pub enum ArenaError {
    /// runtime unreachable, network or image setup failed; nothing has been launched
    #[error("provisioning failed: {message}")]
    Provisioning {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// invalid match description (empty player list, malformed port mapping, ...)
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// an instance could not be started; earlier instances of the same match may be running
    #[error("could not launch instance #{index} '{name}': {source}")]
    Launch {
        index: usize,
        name: String,
        #[source]
        source: RuntimeError,
    },

    /// launched instances never became visible as running
    #[error("no instance of match '{0}' is running after launch")]
    NothingRunning(String),

    /// the runtime could not be queried while the match was running
    #[error("could not query match instances: {0}")]
    ContainerQuery(#[source] RuntimeError),

    /// a directory or file of the match could not be created or written
    #[error("filesystem error on {path:?}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// the match was cancelled from outside; instances have been torn down
    #[error("match cancelled")]
    Cancelled,
}

impl ArenaError {
    pub(crate) fn provisioning_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        ArenaError::Provisioning {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ArenaError::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// True for the launch family of errors, after which partial launches may exist.
    pub fn is_launch_error(&self) -> bool {
        matches!(self, ArenaError::Launch { .. } | ArenaError::NothingRunning(_))
    }
}
