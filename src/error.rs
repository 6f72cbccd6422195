//! Error types for the AMI client

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AmiResult<T> = Result<T, AmiError>;

/// Reason the client stopped functioning.
///
/// Recorded once on the terminal transition and fanned out to every pending
/// request and every subscriber. `io::Error` is not `Clone`, so I/O causes
/// store the message.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Clean EOF on an empty parse buffer
    ConnectionClosed,
    /// EOF arrived mid-frame
    UnexpectedEof,
    /// Inbound bytes failed to decode
    Malformed(String),
    /// TCP I/O error on read or write
    IoError(String),
    /// Client called disconnect()
    ClientRequested,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::UnexpectedEof => write!(f, "connection closed mid-frame"),
            DisconnectReason::Malformed(msg) => write!(f, "malformed message: {}", msg),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ClientRequested => write!(f, "client requested disconnect"),
        }
    }
}

/// Errors surfaced by the AMI client.
///
/// `MalformedMessage`, `UnexpectedEof`, and `Io` are terminal: the client
/// transitions once, fails every pending request, and completes every
/// subscriber with the same cause. The remaining variants are local to one
/// call or one subscriber.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// A frame or header line failed to decode
    #[error("malformed message: {reason}")]
    MalformedMessage { reason: String },

    /// The stream ended in the middle of a frame
    #[error("connection closed mid-frame")]
    UnexpectedEof,

    /// Read or write on the stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An action with this ActionID is already outstanding
    #[error("action with ActionID '{action_id}' already outstanding")]
    DuplicateActionId { action_id: String },

    /// A required field was missing at send time
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The caller cancelled the wait for a reply
    #[error("request cancelled")]
    Cancelled,

    /// The client already reached its terminal state
    #[error("client closed: {0}")]
    ClientClosed(DisconnectReason),

    /// A slow subscriber's queue overflowed and events were skipped
    #[error("{count} event(s) dropped for a slow subscriber")]
    EventsDropped { count: u64 },

    /// The connect helper timed out
    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl AmiError {
    /// Shorthand for a `MalformedMessage` with a formatted reason.
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        AmiError::MalformedMessage {
            reason: reason.into(),
        }
    }

    /// Shorthand for an `InvalidArgument` with a formatted message.
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        AmiError::InvalidArgument {
            message: message.into(),
        }
    }

    /// The terminal cause this error maps to, if it is terminal.
    pub(crate) fn disconnect_reason(&self) -> Option<DisconnectReason> {
        match self {
            AmiError::MalformedMessage { reason } => {
                Some(DisconnectReason::Malformed(reason.clone()))
            }
            AmiError::UnexpectedEof => Some(DisconnectReason::UnexpectedEof),
            AmiError::Io(e) => Some(DisconnectReason::IoError(e.to_string())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnect_reason_display() {
        assert_eq!(
            DisconnectReason::ConnectionClosed.to_string(),
            "connection closed"
        );
        assert_eq!(
            DisconnectReason::IoError("broken pipe".into()).to_string(),
            "I/O error: broken pipe"
        );
    }

    #[test]
    fn terminal_errors_map_to_reasons() {
        assert_eq!(
            AmiError::UnexpectedEof.disconnect_reason(),
            Some(DisconnectReason::UnexpectedEof)
        );
        assert_eq!(
            AmiError::malformed("no colon").disconnect_reason(),
            Some(DisconnectReason::Malformed("no colon".into()))
        );
        assert!(AmiError::Cancelled.disconnect_reason().is_none());
        assert!(AmiError::DuplicateActionId {
            action_id: "x".into()
        }
        .disconnect_reason()
        .is_none());
    }
}
