//! Crate and protocol level errors.
//!
//! The crate uses a two-layer error hierarchy:
//!
//! ## Client Layer ([`Error`])
//!
//! The typed error surfaced by gateway operations. Futures complete with a
//! value of this type rather than raising asynchronously.
//!
//! ## Wire Layer ([`ErrorCode`])
//!
//! Stable numeric codes carried inside responses so replicas and clients
//! agree on failure kinds without shipping strings. `ErrorCode` converts to
//! [`Error`] via `From`, and [`Error::code`] maps the other way for types
//! that have a wire representation.

use std::{io, result};

use bytes::Bytes;
use num_derive::FromPrimitive;
use thiserror::Error as ThisError;

use crate::types::{ResourceId, TypeId};

pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced to users of the client gateway.
///
/// Configuration and routing errors (`NoSuchResource`, `UnknownType`,
/// `TypeMismatch`, `CodecConflict`) are not retried. `Timeout` and
/// `Unavailable` are transient and retried by the submission layer up to
/// its policy before being surfaced.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// The envelope referenced a resource id with no live state machine.
    #[error("no such resource: {0}")]
    NoSuchResource(ResourceId),

    /// The requested resource type is not registered.
    #[error("unknown resource type: {0}")]
    UnknownType(TypeId),

    /// The key exists under a different resource type.
    #[error("key {key:?} already bound to type {existing}")]
    TypeMismatch { key: String, existing: TypeId },

    /// A serializer id was registered with a conflicting class.
    #[error("codec conflict for serializer id {0}")]
    CodecConflict(i16),

    /// The operation did not complete within the configured wait.
    ///
    /// The operation may still be applied later; duplicate filtering in the
    /// session layer keeps application at-most-once.
    #[error("operation timed out")]
    Timeout,

    /// The cluster could not be reached or has no leader.
    #[error("cluster unavailable")]
    Unavailable,

    /// The underlying session expired; the gateway is closed and pending
    /// operations fail with this kind.
    #[error("session expired")]
    SessionExpired,

    /// A synchronously detected bad argument (null key, zero type id).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The gateway was used after close.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// An error in the network.
    #[error("IO error: {0:?}")]
    Io(io::ErrorKind),

    /// Could not parse wire data.
    #[error("parsing error: invalid data ({} bytes)", .0.len())]
    Parse(Bytes),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invariant violation inside a state machine.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether the submission layer may retry the operation.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Error::Timeout | Error::Unavailable)
    }

    /// The wire code for this error, if it has one.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::NoSuchResource(_) => ErrorCode::NoSuchResource,
            Error::UnknownType(_) => ErrorCode::UnknownType,
            Error::TypeMismatch { .. } => ErrorCode::TypeMismatch,
            Error::CodecConflict(_) => ErrorCode::CodecConflict,
            Error::Timeout => ErrorCode::Timeout,
            Error::Unavailable => ErrorCode::Unavailable,
            Error::SessionExpired => ErrorCode::SessionExpired,
            Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Error::IllegalState(_) => ErrorCode::IllegalState,
            _ => ErrorCode::Internal,
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::NoSuchResource(a), Error::NoSuchResource(b)) => a == b,
            (Error::UnknownType(a), Error::UnknownType(b)) => a == b,
            (
                Error::TypeMismatch { key: k1, existing: t1 },
                Error::TypeMismatch { key: k2, existing: t2 },
            ) => k1 == k2 && t1 == t2,
            (Error::CodecConflict(a), Error::CodecConflict(b)) => a == b,
            (Error::Timeout, Error::Timeout) => true,
            (Error::Unavailable, Error::Unavailable) => true,
            (Error::SessionExpired, Error::SessionExpired) => true,
            (Error::InvalidArgument(a), Error::InvalidArgument(b)) => a == b,
            (Error::IllegalState(a), Error::IllegalState(b)) => a == b,
            (Error::Io(a), Error::Io(b)) => a == b,
            (Error::Parse(a), Error::Parse(b)) => a == b,
            (Error::Config(a), Error::Config(b)) => a == b,
            (Error::Internal(a), Error::Internal(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

/// Stable failure codes carried in wire responses.
///
/// Values are part of the protocol and must not be renumbered.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    FromPrimitive,
    Default,
    serde::Serialize,
    serde::Deserialize,
)]
pub enum ErrorCode {
    /// No error.
    #[default]
    None = 0,
    /// The envelope referenced an unknown resource id.
    NoSuchResource = 1,
    /// The requested type id is not in the registry.
    UnknownType = 2,
    /// The key exists under a different type.
    TypeMismatch = 3,
    /// Conflicting serializer registration.
    CodecConflict = 4,
    /// The operation timed out; it may still be applied.
    Timeout = 5,
    /// No leader, or the cluster could not be reached.
    Unavailable = 6,
    /// The session expired.
    SessionExpired = 7,
    /// A bad argument was detected before submission.
    InvalidArgument = 8,
    /// The gateway was used after close.
    IllegalState = 9,
    /// Invariant violation inside a state machine.
    Internal = 10,
}

impl ErrorCode {
    /// Convert the code back into a client error.
    ///
    /// Codes that carry context on the wire (resource id, key) lose it in
    /// this direction; callers that have the context attach it themselves.
    pub fn into_error(self) -> Error {
        match self {
            ErrorCode::None => Error::Internal("error code None is not an error".to_string()),
            ErrorCode::NoSuchResource => Error::NoSuchResource(ResourceId::default()),
            ErrorCode::UnknownType => Error::UnknownType(TypeId::default()),
            ErrorCode::TypeMismatch => Error::TypeMismatch {
                key: String::new(),
                existing: TypeId::default(),
            },
            ErrorCode::CodecConflict => Error::CodecConflict(0),
            ErrorCode::Timeout => Error::Timeout,
            ErrorCode::Unavailable => Error::Unavailable,
            ErrorCode::SessionExpired => Error::SessionExpired,
            ErrorCode::InvalidArgument => Error::InvalidArgument(String::new()),
            ErrorCode::IllegalState => Error::IllegalState(String::new()),
            ErrorCode::Internal => Error::Internal(String::new()),
        }
    }
}

impl From<ErrorCode> for Error {
    fn from(code: ErrorCode) -> Self {
        code.into_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_error_equality() {
        assert_eq!(Error::Timeout, Error::Timeout);
        assert_eq!(
            Error::NoSuchResource(ResourceId::new(3)),
            Error::NoSuchResource(ResourceId::new(3))
        );
        assert_ne!(
            Error::NoSuchResource(ResourceId::new(3)),
            Error::NoSuchResource(ResourceId::new(4))
        );
        assert_ne!(Error::Timeout, Error::Unavailable);
    }

    #[test]
    fn test_error_display() {
        let err = Error::TypeMismatch {
            key: "lock".to_string(),
            existing: TypeId::new(2),
        };
        let display = format!("{}", err);
        assert!(display.contains("lock"));
        assert!(display.contains('2'));
    }

    #[test]
    fn test_error_is_retriable() {
        assert!(Error::Timeout.is_retriable());
        assert!(Error::Unavailable.is_retriable());
        assert!(!Error::SessionExpired.is_retriable());
        assert!(!Error::UnknownType(TypeId::new(9)).is_retriable());
    }

    #[test]
    fn test_error_from_io() {
        let err: Error = io::Error::new(io::ErrorKind::ConnectionRefused, "refused").into();
        assert_eq!(err, Error::Io(io::ErrorKind::ConnectionRefused));
    }

    #[test]
    fn test_error_code_values() {
        assert_eq!(ErrorCode::None as i16, 0);
        assert_eq!(ErrorCode::NoSuchResource as i16, 1);
        assert_eq!(ErrorCode::UnknownType as i16, 2);
        assert_eq!(ErrorCode::TypeMismatch as i16, 3);
        assert_eq!(ErrorCode::CodecConflict as i16, 4);
        assert_eq!(ErrorCode::Timeout as i16, 5);
        assert_eq!(ErrorCode::Unavailable as i16, 6);
        assert_eq!(ErrorCode::SessionExpired as i16, 7);
        assert_eq!(ErrorCode::InvalidArgument as i16, 8);
        assert_eq!(ErrorCode::IllegalState as i16, 9);
        assert_eq!(ErrorCode::Internal as i16, 10);
    }

    #[test]
    fn test_error_code_from_primitive() {
        assert_eq!(ErrorCode::from_i16(0), Some(ErrorCode::None));
        assert_eq!(ErrorCode::from_i16(7), Some(ErrorCode::SessionExpired));
        assert_eq!(ErrorCode::from_i16(10), Some(ErrorCode::Internal));
        assert_eq!(ErrorCode::from_i16(99), None);
    }

    #[test]
    fn test_error_code_round_trip() {
        assert_eq!(Error::Timeout.code(), ErrorCode::Timeout);
        assert_eq!(Error::from(ErrorCode::Timeout), Error::Timeout);
        assert_eq!(Error::SessionExpired.code(), ErrorCode::SessionExpired);
    }

    #[test]
    fn test_error_code_serde_round_trip() {
        let code = ErrorCode::TypeMismatch;
        let encoded = serde_json::to_string(&code).unwrap();
        let decoded: ErrorCode = serde_json::from_str(&encoded).unwrap();
        assert_eq!(code, decoded);
    }
}
