//! Error types for the protocol layer.
//!
//! Two enums, split by how the broker reacts to them: a
//! [`TransportError`] means the session with the chat service is gone and
//! the supervisor must reconnect; a [`ProtocolError`] means the service
//! refused one operation and only the affected room is given up.

use crate::RoomJid;

/// Errors raised by the connection to the chat service.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed by the peer or dropped by the network.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Opening the connection failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// An operation was attempted before `connect` succeeded.
    #[error("not connected")]
    NotConnected,

    /// Low-level socket failure.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised when the chat service rejects an operation.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The connection failed underneath the operation.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The service refused the operation (capacity exceeded, wrong
    /// password, forbidden, ...).
    #[error("room {room} rejected operation: {reason}")]
    Rejected { room: RoomJid, reason: String },

    /// The broker is not present in the room it tried to act on.
    #[error("not joined to room {0}")]
    NotJoined(RoomJid),

    /// A room address could not be parsed.
    #[error("invalid room address: {0}")]
    InvalidJid(String),
}

impl ProtocolError {
    /// Returns `true` if the error is really a lost connection.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_error_converts_into_protocol_error() {
        let err: ProtocolError = TransportError::NotConnected.into();
        assert!(err.is_transport());
        assert_eq!(err.to_string(), "not connected");
    }

    #[test]
    fn test_rejected_display_names_room() {
        let err = ProtocolError::Rejected {
            room: RoomJid::new("lobby", "muc.example.org"),
            reason: "capacity".into(),
        };
        assert!(!err.is_transport());
        assert_eq!(
            err.to_string(),
            "room lobby@muc.example.org rejected operation: capacity"
        );
    }
}
