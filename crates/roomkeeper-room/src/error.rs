//! Error types for the room layer.

use roomkeeper_protocol::RoomJid;

/// Errors raised while driving a room.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// An event arrived for a room the broker has no handler for.
    #[error("no handler for room {0}")]
    NoHandler(RoomJid),

    /// A handler exists but the store has no record of the room.
    #[error("room {0} has no record")]
    Unrecorded(RoomJid),

    /// The service refused to create or configure the room.
    #[error("creating room {room} failed: {reason}")]
    CreationFailed { room: RoomJid, reason: String },
}
