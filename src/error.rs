//! Error types for reconciliation passes, handlers and registry construction.
//!
//! A pass only ever surfaces three kinds of failure to its caller:
//! [`TxError::ReadFailed`], [`TxError::WriteFailed`] and
//! [`TxError::DeleteFailed`]. Everything raised below the engine
//! (session I/O, extraction, template parsing, handler preconditions)
//! travels as the [`Cause`] of one of those.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::path::NodePath;
use crate::snapshot::ConfigNode;

/// Errors raised by a [`Session`](crate::session::Session) implementation.
///
/// The engine treats all of them as opaque I/O failures.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", content = "detail", rename_all = "snake_case")]
pub enum SessionError {
    /// The channel to the device went away.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// The device did not answer in time. Carries partial output, if any.
    #[error("command timeout: {0}")]
    Timeout(String),

    /// The response could not be interpreted as command output.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// A replayed session was asked for a command other than the recorded one.
    #[error("replay mismatch: {0}")]
    ReplayMismatch(String),
}

/// Structural failures while scanning device output.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtractError {
    /// A fenced block delimiter never appeared in the output.
    #[error("block delimiter not found: {0}")]
    MissingBlock(String),

    /// A capture the caller declared mandatory was absent.
    #[error("required field '{0}' not found")]
    MissingField(String),

    /// A capture was present but did not parse into the requested type.
    #[error("field '{field}' has invalid value '{value}'")]
    InvalidField { field: String, value: String },
}

/// Malformed command template source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown template tag '{{% {0} %}}'")]
    UnknownTag(String),

    #[error("unexpected '{{% {0} %}}' without matching opener")]
    Unbalanced(String),

    #[error("unclosed '{{% {0} %}}' block")]
    Unclosed(String),
}

/// Errors a reader or writer may raise while interpreting or producing text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A handler-level precondition did not hold, e.g. a referenced VRF is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),
}

/// Root cause attached to a failed read, write or delete.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Cause {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// The device answered a command batch with an error line.
    #[error("device rejected command: {0}")]
    DeviceRejected(String),

    /// No binding in the registry applies to the path.
    #[error("no handler registered")]
    NoHandler,
}

/// The only errors a reconciliation pass reports to its caller.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TxError {
    #[error("read failed at {path}: {cause}")]
    ReadFailed {
        path: NodePath,
        #[source]
        cause: Cause,
    },

    /// Covers both create and update.
    #[error("write failed at {path}: {cause}")]
    WriteFailed {
        path: NodePath,
        value: Option<ConfigNode>,
        #[source]
        cause: Cause,
    },

    #[error("delete failed at {path}: {cause}")]
    DeleteFailed {
        path: NodePath,
        value: Option<ConfigNode>,
        #[source]
        cause: Cause,
    },
}

impl TxError {
    /// Path of the operation that failed.
    pub fn path(&self) -> &NodePath {
        match self {
            TxError::ReadFailed { path, .. }
            | TxError::WriteFailed { path, .. }
            | TxError::DeleteFailed { path, .. } => path,
        }
    }

    pub fn cause(&self) -> &Cause {
        match self {
            TxError::ReadFailed { cause, .. }
            | TxError::WriteFailed { cause, .. }
            | TxError::DeleteFailed { cause, .. } => cause,
        }
    }
}

/// Handler catalog problems detected while building a [`Registry`](crate::registry::Registry).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("registration '{0}' declared more than once")]
    DuplicateId(String),

    #[error("registration '{from}' orders against unknown registration '{to}'")]
    UnknownRegistration { from: String, to: String },

    #[error("registration '{id}' has an invalid pattern: {reason}")]
    InvalidPattern { id: String, reason: String },

    /// Ordering edges form a cycle through the listed registrations.
    #[error("ordering cycle between registrations: {}", .0.join(" -> "))]
    OrderingCycle(Vec<String>),
}

/// Configuration and path parsing errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device profile '{0}' not found")]
    ProfileNotFound(String),

    #[error("invalid response pattern: {0}")]
    InvalidPattern(String),

    #[error("invalid node path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("invalid document: {0}")]
    InvalidDocument(String),
}
