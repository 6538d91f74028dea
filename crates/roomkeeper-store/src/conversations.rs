//! The conversation audit trail kept by the web front end.

use std::fmt;

use roomkeeper_protocol::Nick;

use crate::{ConversationId, StoreError};

/// Who sent a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Staff,
    Client,
    /// A group participant.
    Participant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staff => write!(f, "staff"),
            Self::Client => write!(f, "client"),
            Self::Participant => write!(f, "participant"),
        }
    }
}

/// Lifecycle events written to a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatEvent {
    /// Someone came back into a chat in progress.
    Rejoin,
    /// A participant ended the chat with a clean exit.
    Ended,
    /// A participant disappeared from the chat.
    Left,
}

impl ChatEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Rejoin => "rejoin",
            Self::Ended => "ended",
            Self::Left => "left",
        }
    }
}

impl fmt::Display for ChatEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Writes to the conversation records the front end owns.
///
/// Every method may fail with [`StoreError::Unavailable`]; the broker logs
/// such failures and continues.
pub trait Conversations {
    async fn log_message(
        &self,
        conversation: ConversationId,
        sender: &Nick,
        role: Role,
        body: &str,
    ) -> Result<(), StoreError>;

    async fn log_event(
        &self,
        conversation: ConversationId,
        event: ChatEvent,
        detail: &str,
    ) -> Result<(), StoreError>;

    /// Whether `nick` administers the group meeting.
    async fn is_group_admin(
        &self,
        conversation: ConversationId,
        nick: &Nick,
    ) -> Result<bool, StoreError>;

    /// Records that a meeting participant left.
    async fn group_member_left(
        &self,
        conversation: ConversationId,
        nick: &Nick,
    ) -> Result<(), StoreError>;

    /// Revokes the access credential of a participant who was removed from
    /// the meeting.
    async fn invalidate_group_member(
        &self,
        conversation: ConversationId,
        nick: &Nick,
    ) -> Result<(), StoreError>;
}
