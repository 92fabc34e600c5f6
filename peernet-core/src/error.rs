//! Error taxonomy for session operations.

use std::fmt;

use crate::record::RecordError;

/// Classification of a failure. Codes 1..=10 are stable and match the native binding's numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidConnection,
    InvalidSocket,
    ConnectionFailed,
    NotConnected,
    InvalidIdentity,
    AuthFailed,
    SendFailed,
    ReceiveFailed,
    InvalidPollGroup,
    InvalidMessage,
    NotInitialized,
    /// Any other failure reported by the native layer.
    Native,
}

impl ErrorKind {
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidConnection => 1,
            ErrorKind::InvalidSocket => 2,
            ErrorKind::ConnectionFailed => 3,
            ErrorKind::NotConnected => 4,
            ErrorKind::InvalidIdentity => 5,
            ErrorKind::AuthFailed => 6,
            ErrorKind::SendFailed => 7,
            ErrorKind::ReceiveFailed => 8,
            ErrorKind::InvalidPollGroup => 9,
            ErrorKind::InvalidMessage => 10,
            ErrorKind::NotInitialized => 11,
            ErrorKind::Native => 12,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::InvalidConnection => "invalid connection",
            ErrorKind::InvalidSocket => "invalid listen socket",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::InvalidIdentity => "invalid identity",
            ErrorKind::AuthFailed => "authentication failed",
            ErrorKind::SendFailed => "send failed",
            ErrorKind::ReceiveFailed => "receive failed",
            ErrorKind::InvalidPollGroup => "invalid poll group",
            ErrorKind::InvalidMessage => "invalid message",
            ErrorKind::NotInitialized => "session not initialized",
            ErrorKind::Native => "native call failed",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("session not initialized")]
    NotInitialized,
    #[error("native {capability} interface unavailable")]
    Unavailable { capability: &'static str },
    #[error("native initialization failed: {message} (code: {code})")]
    Init { code: i32, message: String },
    /// Argument rejected locally; nothing was sent to the native layer.
    #[error("{kind}: {reason}")]
    Rejected { kind: ErrorKind, reason: &'static str },
    /// The native layer reported failure for `op`.
    #[error("{op}: {kind} (native code: {code})")]
    Native {
        op: &'static str,
        kind: ErrorKind,
        code: i32,
    },
    #[error("invalid message: {0}")]
    Record(#[from] RecordError),
}

impl Error {
    pub(crate) fn rejected(kind: ErrorKind, reason: &'static str) -> Self {
        Error::Rejected { kind, reason }
    }

    pub(crate) fn native(op: &'static str, kind: ErrorKind, code: i32) -> Self {
        Error::Native { op, kind, code }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotInitialized | Error::Unavailable { .. } => ErrorKind::NotInitialized,
            Error::Init { .. } => ErrorKind::Native,
            Error::Rejected { kind, .. } | Error::Native { kind, .. } => *kind,
            Error::Record(_) => ErrorKind::InvalidMessage,
        }
    }

    /// Native result code, when the failure came from the native layer.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            Error::Native { code, .. } | Error::Init { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_invalid_connection(&self) -> bool {
        self.kind() == ErrorKind::InvalidConnection
    }

    pub fn is_invalid_socket(&self) -> bool {
        self.kind() == ErrorKind::InvalidSocket
    }

    pub fn is_connection_failed(&self) -> bool {
        self.kind() == ErrorKind::ConnectionFailed
    }

    pub fn is_not_connected(&self) -> bool {
        self.kind() == ErrorKind::NotConnected
    }

    pub fn is_invalid_identity(&self) -> bool {
        self.kind() == ErrorKind::InvalidIdentity
    }

    pub fn is_auth_failed(&self) -> bool {
        self.kind() == ErrorKind::AuthFailed
    }

    pub fn is_send_failed(&self) -> bool {
        self.kind() == ErrorKind::SendFailed
    }

    pub fn is_receive_failed(&self) -> bool {
        self.kind() == ErrorKind::ReceiveFailed
    }

    pub fn is_invalid_poll_group(&self) -> bool {
        self.kind() == ErrorKind::InvalidPollGroup
    }

    pub fn is_invalid_message(&self) -> bool {
        self.kind() == ErrorKind::InvalidMessage
    }

    pub fn is_not_initialized(&self) -> bool {
        self.kind() == ErrorKind::NotInitialized
    }
}
