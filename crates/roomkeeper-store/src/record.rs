//! Persisted room records.

use std::fmt;

use chrono::{DateTime, Utc};
use roomkeeper_protocol::{Nick, RoomJid};
use serde::{Deserialize, Serialize};

use crate::{GroupStatus, Lifecycle, PairedStatus};

/// Identifier of the conversation (chat) the web front end attached to a
/// room. Message and event logging is keyed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub u64);

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fields every room record has, regardless of kind.
pub trait RoomRecord: Clone + fmt::Debug + Send + Sync + 'static {
    type Status: Lifecycle;

    /// A fresh record in the `available` status.
    fn create(id: u64, jid: RoomJid, password: String, now: DateTime<Utc>) -> Self;

    fn id(&self) -> u64;
    fn jid(&self) -> &RoomJid;
    fn password(&self) -> &str;
    fn status(&self) -> Self::Status;
    fn status_changed_at(&self) -> DateTime<Utc>;
    fn conversation(&self) -> Option<ConversationId>;

    fn set_status(&mut self, status: Self::Status, now: DateTime<Utc>);
    fn set_conversation(&mut self, conversation: ConversationId);

    /// Moves the status timestamp back, as if the status had been entered
    /// earlier.
    fn backdate(&mut self, by: chrono::Duration);
}

/// A room for one staff member and one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairedRoom {
    pub id: u64,
    pub jid: RoomJid,
    pub password: String,
    pub status: PairedStatus,
    pub staff_nick: Option<Nick>,
    pub client_nick: Option<Nick>,
    pub conversation: Option<ConversationId>,
    /// Set once either party has left with a clean exit.
    pub clean_exit: bool,
    /// Departures without a clean exit.
    pub dirty_exits: u32,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

impl RoomRecord for PairedRoom {
    type Status = PairedStatus;

    fn create(id: u64, jid: RoomJid, password: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            jid,
            password,
            status: PairedStatus::Available,
            staff_nick: None,
            client_nick: None,
            conversation: None,
            clean_exit: false,
            dirty_exits: 0,
            created_at: now,
            status_changed_at: now,
        }
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn jid(&self) -> &RoomJid {
        &self.jid
    }

    fn password(&self) -> &str {
        &self.password
    }

    fn status(&self) -> PairedStatus {
        self.status
    }

    fn status_changed_at(&self) -> DateTime<Utc> {
        self.status_changed_at
    }

    fn conversation(&self) -> Option<ConversationId> {
        self.conversation
    }

    fn set_status(&mut self, status: PairedStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.status_changed_at = now;
        }
    }

    fn set_conversation(&mut self, conversation: ConversationId) {
        self.conversation = Some(conversation);
    }

    fn backdate(&mut self, by: chrono::Duration) {
        self.status_changed_at -= by;
    }
}

/// A room for a group meeting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRoom {
    pub id: u64,
    pub jid: RoomJid,
    pub password: String,
    pub status: GroupStatus,
    pub conversation: Option<ConversationId>,
    pub clean_exit: bool,
    pub created_at: DateTime<Utc>,
    pub status_changed_at: DateTime<Utc>,
}

impl RoomRecord for GroupRoom {
    type Status = GroupStatus;

    fn create(id: u64, jid: RoomJid, password: String, now: DateTime<Utc>) -> Self {
        Self {
            id,
            jid,
            password,
            status: GroupStatus::Available,
            conversation: None,
            clean_exit: false,
            created_at: now,
            status_changed_at: now,
        }
    }

    fn id(&self) -> u64 {
        self.id
    }

    fn jid(&self) -> &RoomJid {
        &self.jid
    }

    fn password(&self) -> &str {
        &self.password
    }

    fn status(&self) -> GroupStatus {
        self.status
    }

    fn status_changed_at(&self) -> DateTime<Utc> {
        self.status_changed_at
    }

    fn conversation(&self) -> Option<ConversationId> {
        self.conversation
    }

    fn set_status(&mut self, status: GroupStatus, now: DateTime<Utc>) {
        if self.status != status {
            self.status = status;
            self.status_changed_at = now;
        }
    }

    fn set_conversation(&mut self, conversation: ConversationId) {
        self.conversation = Some(conversation);
    }

    fn backdate(&mut self, by: chrono::Duration) {
        self.status_changed_at -= by;
    }
}
