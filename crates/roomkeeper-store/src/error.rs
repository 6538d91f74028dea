//! Error types for the persistence layer.

use roomkeeper_protocol::RoomJid;

/// Errors returned by repositories and the conversation collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store can't be reached right now. Callers log this and
    /// carry on; the next event or sweep tries again.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// No record exists for the room.
    #[error("no record for room {0}")]
    NotFound(RoomJid),

    /// A record for the room already exists. Room addresses are never
    /// reused.
    #[error("room {0} already recorded")]
    Duplicate(RoomJid),

    /// A persisted status string no enum variant matches.
    #[error("invalid room status {0:?}")]
    InvalidStatus(String),
}
