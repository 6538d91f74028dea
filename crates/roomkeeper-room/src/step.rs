//! The result of feeding one presence into a room state machine.

use roomkeeper_protocol::Nick;
use roomkeeper_store::ChatEvent;

/// Log level of a transition's note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Debug,
    Info,
    Warn,
}

/// Human-readable account of what a transition did, for the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Note {
    pub level: Level,
    pub message: String,
}

/// Something to persist on the room record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fact {
    StaffJoined(Nick),
    ClientJoined(Nick),
    LeftClean,
    LeftDirty,
}

/// Something the broker must do beyond persisting facts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// A pooled room was taken; top the pool up again.
    RefillPool,
    /// Remove an occupant who shouldn't be in the room.
    Kick(Nick),
    /// The expected rejoin presence arrived.
    ClearGuard,
    /// Append an event to the room's conversation.
    LogEvent { event: ChatEvent, detail: String },
    /// Grant moderator if the conversation names this occupant as group
    /// administrator.
    GrantModeratorIfAdmin(Nick),
    /// Record a group participant's departure.
    MemberLeft(Nick),
    /// Revoke a removed group participant's access credential.
    InvalidateMember(Nick),
}

/// Outcome of one transition: an optional new status, facts to persist,
/// effects to apply and a note to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step<S> {
    pub status: Option<S>,
    pub facts: Vec<Fact>,
    pub effects: Vec<Effect>,
    pub note: Note,
}

impl<S> Step<S> {
    fn noted(level: Level, message: impl Into<String>) -> Self {
        Self {
            status: None,
            facts: Vec::new(),
            effects: Vec::new(),
            note: Note { level, message: message.into() },
        }
    }

    pub fn debug(message: impl Into<String>) -> Self {
        Self::noted(Level::Debug, message)
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::noted(Level::Info, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::noted(Level::Warn, message)
    }

    pub fn to(mut self, status: S) -> Self {
        self.status = Some(status);
        self
    }

    pub fn fact(mut self, fact: Fact) -> Self {
        self.facts.push(fact);
        self
    }

    pub fn effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn has_effect(&self, effect: &Effect) -> bool {
        self.effects.contains(effect)
    }
}
