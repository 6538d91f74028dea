//! Room lifecycle statuses.
//!
//! Each room kind has its own closed set of statuses. They are persisted
//! as the camel-case strings the web front end also reads
//! (`"staffWaiting"`, `"toDestroy"`, ...), so the `Display`, `FromStr` and
//! serde representations all agree.

use std::fmt;
use std::hash::Hash;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::StoreError;

/// The two kinds of room the broker manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// One staff member and one client.
    Paired,
    /// A group meeting of several participants.
    Group,
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paired => write!(f, "paired"),
            Self::Group => write!(f, "group"),
        }
    }
}

/// Behaviour shared by both status enums, so repositories can be written
/// once for either kind.
pub trait Lifecycle:
    Copy + Eq + Hash + fmt::Debug + fmt::Display + FromStr<Err = StoreError> + Send + Sync + 'static
{
    /// Freshly configured and waiting in the pool.
    const AVAILABLE: Self;
    /// Marked for closing by the next cleanup sweep.
    const TO_DESTROY: Self;
    /// The broker has left; the record only waits to be purged.
    const DESTROYED: Self;

    fn kind() -> RoomKind;

    /// Statuses after which a participant may still come back, and which
    /// the cleanup sweep closes once they have lasted too long.
    fn is_lingering(self) -> bool;
}

// ---------------------------------------------------------------------------
// Paired rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PairedStatus {
    Available,
    AvailableForInvitation,
    StaffWaiting,
    StaffWaitingForInvitee,
    Chatting,
    /// One party left cleanly, the other is still inside.
    ClosingChat,
    /// One party disappeared without a clean exit, the other is inside.
    Lost,
    /// Nobody is left, and nobody left cleanly.
    Abandoned,
    ToDestroy,
    Destroyed,
}

impl PairedStatus {
    pub const ALL: [PairedStatus; 10] = [
        Self::Available,
        Self::AvailableForInvitation,
        Self::StaffWaiting,
        Self::StaffWaitingForInvitee,
        Self::Chatting,
        Self::ClosingChat,
        Self::Lost,
        Self::Abandoned,
        Self::ToDestroy,
        Self::Destroyed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::AvailableForInvitation => "availableForInvitation",
            Self::StaffWaiting => "staffWaiting",
            Self::StaffWaitingForInvitee => "staffWaitingForInvitee",
            Self::Chatting => "chatting",
            Self::ClosingChat => "closingChat",
            Self::Lost => "lost",
            Self::Abandoned => "abandoned",
            Self::ToDestroy => "toDestroy",
            Self::Destroyed => "destroyed",
        }
    }

    /// A staff member is inside, waiting for the client.
    pub fn is_staff_waiting(self) -> bool {
        matches!(self, Self::StaffWaiting | Self::StaffWaitingForInvitee)
    }
}

impl fmt::Display for PairedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PairedStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::InvalidStatus(s.to_string()))
    }
}

impl Lifecycle for PairedStatus {
    const AVAILABLE: Self = Self::Available;
    const TO_DESTROY: Self = Self::ToDestroy;
    const DESTROYED: Self = Self::Destroyed;

    fn kind() -> RoomKind {
        RoomKind::Paired
    }

    fn is_lingering(self) -> bool {
        matches!(self, Self::Lost | Self::ClosingChat | Self::Abandoned)
    }
}

// ---------------------------------------------------------------------------
// Group rooms
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GroupStatus {
    Available,
    Chatting,
    Abandoned,
    ToDestroy,
    Destroyed,
}

impl GroupStatus {
    pub const ALL: [GroupStatus; 5] = [
        Self::Available,
        Self::Chatting,
        Self::Abandoned,
        Self::ToDestroy,
        Self::Destroyed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Chatting => "chatting",
            Self::Abandoned => "abandoned",
            Self::ToDestroy => "toDestroy",
            Self::Destroyed => "destroyed",
        }
    }
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| StoreError::InvalidStatus(s.to_string()))
    }
}

impl Lifecycle for GroupStatus {
    const AVAILABLE: Self = Self::Available;
    const TO_DESTROY: Self = Self::ToDestroy;
    const DESTROYED: Self = Self::Destroyed;

    fn kind() -> RoomKind {
        RoomKind::Group
    }

    fn is_lingering(self) -> bool {
        matches!(self, Self::Abandoned)
    }
}

/// A status of either kind, for commands that address rooms of one kind
/// by status (bulk close).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomStatus {
    Paired(PairedStatus),
    Group(GroupStatus),
}

impl RoomStatus {
    pub fn kind(self) -> RoomKind {
        match self {
            Self::Paired(_) => RoomKind::Paired,
            Self::Group(_) => RoomKind::Group,
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Paired(s) => write!(f, "paired/{s}"),
            Self::Group(s) => write!(f, "group/{s}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paired_status_string_roundtrip_covers_every_variant() {
        for status in PairedStatus::ALL {
            assert_eq!(status.to_string().parse::<PairedStatus>().unwrap(), status);
        }
        assert_eq!(PairedStatus::StaffWaitingForInvitee.as_str(), "staffWaitingForInvitee");
    }

    #[test]
    fn test_unknown_status_is_rejected() {
        let err = "sleeping".parse::<GroupStatus>().unwrap_err();
        assert!(matches!(err, StoreError::InvalidStatus(s) if s == "sleeping"));
    }

    #[test]
    fn test_serde_uses_persisted_names() {
        #[derive(Serialize, Deserialize)]
        struct Row {
            status: PairedStatus,
        }
        let text = toml::to_string(&Row { status: PairedStatus::ClosingChat }).unwrap();
        assert_eq!(text.trim(), r#"status = "closingChat""#);
        let row: Row = toml::from_str(r#"status = "toDestroy""#).unwrap();
        assert_eq!(row.status, PairedStatus::ToDestroy);
    }

    #[test]
    fn test_lingering_statuses() {
        assert!(PairedStatus::Lost.is_lingering());
        assert!(PairedStatus::ClosingChat.is_lingering());
        assert!(PairedStatus::Abandoned.is_lingering());
        assert!(!PairedStatus::Chatting.is_lingering());
        assert!(GroupStatus::Abandoned.is_lingering());
        assert!(!GroupStatus::Chatting.is_lingering());
    }
}
