//! Core protocol types shared by every roomkeeper crate.
//!
//! These are the nouns of the chat service as the broker sees them: room
//! addresses, nicknames, the presence and configuration events the
//! service delivers, and the parameters of a join.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ConfigForm, ProtocolError};

/// Presence status text a participant's client sends when it leaves on
/// purpose. Any other (or missing) status means the participant simply
/// disappeared.
pub const CLEAN_EXIT: &str = "Clean Exit";

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Bare address of a chat room: `node@domain`.
///
/// Newtype over `String` so a room address can't be passed where a
/// nickname is expected. `#[serde(transparent)]` keeps it a plain string
/// in persisted records.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomJid(String);

impl RoomJid {
    /// Builds a room address from its node and domain parts.
    pub fn new(node: &str, domain: &str) -> Self {
        Self(format!("{}@{}", node.trim(), domain.trim()))
    }

    /// Parses `node@domain[/resource]`, dropping any resource part.
    pub fn parse(s: &str) -> Result<Self, ProtocolError> {
        let (node, rest) = s
            .split_once('@')
            .ok_or_else(|| ProtocolError::InvalidJid(s.to_string()))?;
        let domain = rest.split('/').next().unwrap_or_default();
        if node.is_empty() || domain.is_empty() {
            return Err(ProtocolError::InvalidJid(s.to_string()));
        }
        Ok(Self::new(node, domain))
    }

    /// The part before `@`.
    pub fn node(&self) -> &str {
        self.0.split('@').next().unwrap_or_default()
    }

    /// The part after `@`.
    pub fn domain(&self) -> &str {
        self.0.split_once('@').map(|(_, d)| d).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomJid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A participant's nickname inside one room.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nick(String);

impl Nick {
    pub fn new(nick: impl Into<String>) -> Self {
        Self(nick.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Nick {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Name of a site: one tenant with its own pools and its own database.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteName(String);

impl SiteName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SiteName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteName {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

// ---------------------------------------------------------------------------
// Occupants
// ---------------------------------------------------------------------------

/// Long-lived privilege of an occupant in a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Affiliation {
    Owner,
    Admin,
    Member,
    #[default]
    None,
}

impl Affiliation {
    /// Owners and admins may change other occupants' roles.
    pub fn can_grant_roles(self) -> bool {
        matches!(self, Self::Owner | Self::Admin)
    }
}

impl fmt::Display for Affiliation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Owner => write!(f, "owner"),
            Self::Admin => write!(f, "admin"),
            Self::Member => write!(f, "member"),
            Self::None => write!(f, "none"),
        }
    }
}

/// Someone present in a room, as announced by a join presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occupant {
    pub nick: Nick,
    pub affiliation: Affiliation,
}

/// A departure from a room, as announced by a leave presence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub nick: Nick,
    /// Free-form presence status text sent with the leave.
    pub status: Option<String>,
    /// The service removed the occupant (kick / membership removal)
    /// rather than the occupant leaving voluntarily.
    pub removed: bool,
}

impl Departure {
    /// A voluntary leave without status text.
    pub fn silent(nick: Nick) -> Self {
        Self { nick, status: None, removed: false }
    }

    /// A voluntary leave carrying the [`CLEAN_EXIT`] marker.
    pub fn clean(nick: Nick) -> Self {
        Self { nick, status: Some(CLEAN_EXIT.to_string()), removed: false }
    }

    /// Returns `true` if the participant announced a graceful departure.
    pub fn is_clean_exit(&self) -> bool {
        self.status.as_deref().map(str::trim) == Some(CLEAN_EXIT)
    }
}

// ---------------------------------------------------------------------------
// Errors reported by the service
// ---------------------------------------------------------------------------

/// Error class attached to a rejected stanza.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Do not retry (e.g. the service limits the number of rooms).
    Cancel,
    /// Retry after changing the request.
    Modify,
    /// Credentials were refused.
    Auth,
    /// Temporary condition.
    Wait,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancel => write!(f, "cancel"),
            Self::Modify => write!(f, "modify"),
            Self::Auth => write!(f, "auth"),
            Self::Wait => write!(f, "wait"),
        }
    }
}

/// Error condition delivered asynchronously for a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCondition {
    pub kind: ErrorKind,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Joining
// ---------------------------------------------------------------------------

/// How much room history the service should replay to the broker on join.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryOptions {
    pub max_chars: u32,
    pub max_stanzas: u32,
    pub seconds: u32,
}

impl Default for HistoryOptions {
    fn default() -> Self {
        Self { max_chars: 2000, max_stanzas: 10, seconds: 120 }
    }
}

/// Everything needed to enter (or create) a room.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub room: RoomJid,
    pub nick: Nick,
    pub password: String,
    pub history: HistoryOptions,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something the chat service tells the broker about one room.
///
/// Every event names its room so the supervisor can route it to the
/// right handler; events for one room arrive in the order the service
/// produced them.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// Someone (possibly the broker itself) is present in the room.
    Joined { room: RoomJid, occupant: Occupant },
    /// Someone left or was removed.
    Left { room: RoomJid, departure: Departure },
    /// A groupchat message.
    Message { room: RoomJid, nick: Nick, body: String },
    /// The broker's join created the room: it did not exist before and is
    /// locked until configured.
    Created { room: RoomJid },
    /// The configuration form requested after creating the room.
    ConfigurationForm { room: RoomJid, form: ConfigForm },
    /// The submitted configuration was accepted; the room is usable.
    Configured { room: RoomJid },
    /// The service rejected a presence or configuration for the room.
    Rejected { room: RoomJid, error: ErrorCondition },
}

impl ProtocolEvent {
    /// The room this event concerns.
    pub fn room(&self) -> &RoomJid {
        match self {
            Self::Joined { room, .. }
            | Self::Left { room, .. }
            | Self::Message { room, .. }
            | Self::ConfigurationForm { room, .. }
            | Self::Created { room }
            | Self::Configured { room }
            | Self::Rejected { room, .. } => room,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_jid_parse_drops_resource() {
        let jid = RoomJid::parse("site_abc.0@muc.example.org/broker").unwrap();
        assert_eq!(jid.as_str(), "site_abc.0@muc.example.org");
        assert_eq!(jid.node(), "site_abc.0");
        assert_eq!(jid.domain(), "muc.example.org");
    }

    #[test]
    fn test_room_jid_parse_rejects_missing_parts() {
        assert!(RoomJid::parse("no-at-sign").is_err());
        assert!(RoomJid::parse("@muc.example.org").is_err());
        assert!(RoomJid::parse("node@").is_err());
    }

    #[test]
    fn test_nick_is_trimmed() {
        assert_eq!(Nick::new("  alice ").as_str(), "alice");
    }

    #[test]
    fn test_departure_clean_exit_detection() {
        assert!(Departure::clean(Nick::from("a")).is_clean_exit());
        assert!(!Departure::silent(Nick::from("a")).is_clean_exit());

        let padded = Departure {
            nick: Nick::from("a"),
            status: Some("  Clean Exit \n".into()),
            removed: false,
        };
        assert!(padded.is_clean_exit());

        let other = Departure {
            nick: Nick::from("a"),
            status: Some("gone fishing".into()),
            removed: false,
        };
        assert!(!other.is_clean_exit());
    }

    #[test]
    fn test_affiliation_privileges() {
        assert!(Affiliation::Owner.can_grant_roles());
        assert!(Affiliation::Admin.can_grant_roles());
        assert!(!Affiliation::Member.can_grant_roles());
        assert!(!Affiliation::None.can_grant_roles());
    }

    #[test]
    fn test_event_room_accessor() {
        let room = RoomJid::new("r", "muc.local");
        let ev = ProtocolEvent::Configured { room: room.clone() };
        assert_eq!(ev.room(), &room);
    }
}
