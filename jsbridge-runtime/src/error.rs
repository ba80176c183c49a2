//! Runtime error types
//!
//! `JsError` is what guest-facing code returns and what the guest observes as
//! a thrown error; `HostError` is what host implementations return.

use thiserror::Error;

use crate::guest::{JsEnv, JsValue};

/// Error raised by a host member implementation or by a host-side view of
/// guest data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HostError {
    /// A host exception with its type name and message.
    #[error("{type_name}: {message}")]
    Exception { type_name: String, message: String },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("collection is read-only")]
    ReadOnly,

    #[error("index {index} out of range for length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    /// The guest raised an error while the host was calling into it.
    #[error("guest error: {0}")]
    Guest(String),

    #[error("object has been disposed")]
    Disposed,
}

impl HostError {
    /// Convenience constructor for host exceptions.
    pub fn exception(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Exception {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

/// Error delivered to the guest.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JsError {
    #[error("TypeError: {0}")]
    Type(String),

    #[error("RangeError: {0}")]
    Range(String),

    /// A host exception surfaced to the guest.
    #[error("Error: {0}")]
    Host(String),

    /// A value thrown by guest code.
    #[error("Uncaught {message}")]
    Thrown { value: JsValue, message: String },

    #[error("invalid or released value handle")]
    InvalidHandle,

    #[error("TypeError: object has been disposed")]
    Disposed,
}

impl JsError {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Materialize the error as a guest value, for rejecting promises or
    /// passing to guest callbacks.
    pub fn to_guest(&self, env: &dyn JsEnv) -> JsValue {
        match self {
            Self::Thrown { value, .. } => *value,
            Self::Type(message) => env.create_error("TypeError", message),
            Self::Range(message) => env.create_error("RangeError", message),
            Self::Host(message) => env.create_error("Error", message),
            Self::InvalidHandle => env.create_error("Error", &self.to_string()),
            Self::Disposed => env.create_error("TypeError", "object has been disposed"),
        }
    }
}

impl From<HostError> for JsError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::Disposed => Self::Disposed,
            HostError::TypeMismatch { .. } | HostError::Argument(_) | HostError::ReadOnly => {
                Self::Type(err.to_string())
            }
            HostError::IndexOutOfRange { .. } => Self::Range(err.to_string()),
            other => Self::Host(other.to_string()),
        }
    }
}

impl From<JsError> for HostError {
    fn from(err: JsError) -> Self {
        match err {
            JsError::Disposed => Self::Disposed,
            other => Self::Guest(other.to_string()),
        }
    }
}

/// Overload resolution failures. Both surface as guest type errors naming
/// the member.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OverloadError {
    #[error("no overload of '{member}' matches the {arg_count} supplied argument(s)")]
    NoMatch { member: String, arg_count: usize },

    #[error("call to '{member}' is ambiguous between {candidates} overloads")]
    Ambiguous { member: String, candidates: usize },
}

impl From<OverloadError> for JsError {
    fn from(err: OverloadError) -> Self {
        Self::Type(err.to_string())
    }
}

/// Failures of the guest context hand-off.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("guest context has shut down")]
    Closed,

    #[error("no guest environment is installed on this thread")]
    NoEnvironment,
}

impl From<ContextError> for HostError {
    fn from(err: ContextError) -> Self {
        Self::Guest(err.to_string())
    }
}

impl From<ContextError> for JsError {
    fn from(err: ContextError) -> Self {
        Self::Host(err.to_string())
    }
}

pub type HostResult<T> = Result<T, HostError>;
pub type JsResult<T> = Result<T, JsError>;
