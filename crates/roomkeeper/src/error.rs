//! Unified error type for the roomkeeper broker.

use roomkeeper_protocol::{ProtocolError, TransportError};
use roomkeeper_room::RoomError;
use roomkeeper_store::StoreError;

/// Errors in the broker configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// One `[[site]]` entry is unusable. Only that site is skipped.
    #[error("site '{site}': {reason}")]
    Site { site: String, reason: String },

    #[error("site '{site}': invalid pool size {size}")]
    InvalidPoolSize { site: String, size: i64 },

    #[error("unknown site '{0}'")]
    UnknownSite(String),

    #[error("logging: {0}")]
    Logging(String),
}

/// Top-level error that wraps all crate-specific errors.
///
/// The `#[from]` attribute on each variant lets `?` convert sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// The connection to the chat service is gone.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The chat service refused an operation.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A broker needs at least one site.
    #[error("no usable site configured")]
    NoSites,

    /// The broker behind a handle has stopped.
    #[error("broker stopped")]
    Stopped,
}

impl BrokerError {
    /// Returns `true` if the error means the session with the chat service
    /// was lost and the supervisor has to reconnect.
    pub fn is_connection_lost(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Protocol(e) => e.is_transport(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomkeeper_protocol::RoomJid;

    #[test]
    fn test_from_transport_error_is_connection_loss() {
        let err: BrokerError = TransportError::ConnectionClosed("gone".into()).into();
        assert!(err.is_connection_lost());
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_protocol_error_wrapping_transport_is_connection_loss() {
        let err: BrokerError = ProtocolError::Transport(TransportError::NotConnected).into();
        assert!(err.is_connection_lost());

        let err: BrokerError = ProtocolError::NotJoined(RoomJid::new("r", "muc")).into();
        assert!(!err.is_connection_lost());
    }

    #[test]
    fn test_from_store_and_room_errors() {
        let err: BrokerError = StoreError::Unavailable("down".into()).into();
        assert!(matches!(err, BrokerError::Store(_)));
        assert!(!err.is_connection_lost());

        let err: BrokerError = RoomError::NoHandler(RoomJid::new("r", "muc")).into();
        assert!(matches!(err, BrokerError::Room(_)));
    }

    #[test]
    fn test_config_error_names_site() {
        let err: BrokerError = ConfigError::InvalidPoolSize { site: "helpdesk".into(), size: -1 }.into();
        assert_eq!(err.to_string(), "site 'helpdesk': invalid pool size -1");
    }
}
