//! In-memory implementations of the repositories and the conversation
//! collaborator.
//!
//! Each handle wraps its table in an `Arc<tokio::sync::Mutex<_>>`, so
//! clones share state: a test (or a front end running in another task)
//! can keep a clone and observe or mutate what the broker persisted.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use roomkeeper_protocol::{Nick, RoomJid};
use tokio::sync::Mutex;

use crate::{
    ChatEvent, ConversationId, Conversations, GroupRepository, GroupRoom, Lifecycle,
    PairedRepository, PairedRoom, PairedStatus, Role, RoomRecord, RoomRepository, SiteStore,
    StoreError,
};

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

struct Table<R> {
    rows: BTreeMap<RoomJid, R>,
    next_id: u64,
}

/// Room records of one kind, held in memory.
pub struct MemoryRooms<R> {
    table: Arc<Mutex<Table<R>>>,
}

pub type MemoryPairedRooms = MemoryRooms<PairedRoom>;
pub type MemoryGroupRooms = MemoryRooms<GroupRoom>;

impl<R> Clone for MemoryRooms<R> {
    fn clone(&self) -> Self {
        Self { table: Arc::clone(&self.table) }
    }
}

impl<R> Default for MemoryRooms<R> {
    fn default() -> Self {
        Self {
            table: Arc::new(Mutex::new(Table { rows: BTreeMap::new(), next_id: 1 })),
        }
    }
}

impl<R: RoomRecord> MemoryRooms<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, destroyed ones included.
    pub async fn len(&self) -> usize {
        self.table.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Pretends the room entered its current status `by` earlier.
    pub async fn backdate(&self, jid: &RoomJid, by: Duration) -> Result<(), StoreError> {
        let by = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        self.update(jid, |room| room.backdate(by)).await
    }

    async fn select(&self, keep: impl Fn(&R) -> bool) -> Vec<R> {
        let table = self.table.lock().await;
        let mut rooms: Vec<R> = table.rows.values().filter(|&r| keep(r)).cloned().collect();
        rooms.sort_by_key(|r| r.id());
        rooms
    }

    async fn update(&self, jid: &RoomJid, change: impl FnOnce(&mut R)) -> Result<(), StoreError> {
        let mut table = self.table.lock().await;
        let room = table
            .rows
            .get_mut(jid)
            .ok_or_else(|| StoreError::NotFound(jid.clone()))?;
        change(room);
        Ok(())
    }
}

impl<R: RoomRecord> RoomRepository for MemoryRooms<R> {
    type Status = R::Status;
    type Room = R;

    async fn get_available(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.select(|r| r.status() == <R::Status as Lifecycle>::AVAILABLE).await)
    }

    async fn get_not_destroyed(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.select(|r| r.status() != <R::Status as Lifecycle>::DESTROYED).await)
    }

    async fn get_by_status(&self, status: R::Status) -> Result<Vec<R>, StoreError> {
        Ok(self.select(|r| r.status() == status).await)
    }

    async fn get_by_jid(&self, jid: &RoomJid) -> Result<Option<R>, StoreError> {
        Ok(self.table.lock().await.rows.get(jid).cloned())
    }

    async fn get_timed_out(&self, status: R::Status, timeout: Duration) -> Result<Vec<R>, StoreError> {
        let limit = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
        let now = Utc::now();
        Ok(self
            .select(|r| r.status() == status && now - r.status_changed_at() > limit)
            .await)
    }

    async fn get_to_destroy(&self) -> Result<Vec<R>, StoreError> {
        Ok(self.select(|r| r.status() == <R::Status as Lifecycle>::TO_DESTROY).await)
    }

    async fn delete_closed(&self) -> Result<usize, StoreError> {
        let mut table = self.table.lock().await;
        let before = table.rows.len();
        table.rows.retain(|_, r| r.status() != <R::Status as Lifecycle>::DESTROYED);
        let purged = before - table.rows.len();
        if purged > 0 {
            tracing::debug!(kind = %<R::Status as Lifecycle>::kind(), purged, "deleted closed rooms");
        }
        Ok(purged)
    }

    async fn new_room(&self, jid: &RoomJid, password: &str) -> Result<R, StoreError> {
        let mut table = self.table.lock().await;
        if table.rows.contains_key(jid) {
            return Err(StoreError::Duplicate(jid.clone()));
        }
        let id = table.next_id;
        table.next_id += 1;
        let room = R::create(id, jid.clone(), password.to_string(), Utc::now());
        table.rows.insert(jid.clone(), room.clone());
        Ok(room)
    }

    async fn set_status(&self, jid: &RoomJid, status: R::Status) -> Result<(), StoreError> {
        self.update(jid, |r| r.set_status(status, Utc::now())).await
    }

    async fn assign_conversation(
        &self,
        jid: &RoomJid,
        conversation: ConversationId,
    ) -> Result<(), StoreError> {
        self.update(jid, |r| r.set_conversation(conversation)).await
    }

    async fn destroyed(&self, jid: &RoomJid) -> Result<(), StoreError> {
        self.update(jid, |r| r.set_status(<R::Status as Lifecycle>::DESTROYED, Utc::now())).await
    }
}

impl PairedRepository for MemoryRooms<PairedRoom> {
    async fn staff_joined(&self, jid: &RoomJid, nick: &Nick) -> Result<(), StoreError> {
        self.update(jid, |r| r.staff_nick = Some(nick.clone())).await
    }

    async fn client_joined(&self, jid: &RoomJid, nick: &Nick) -> Result<(), StoreError> {
        self.update(jid, |r| r.client_nick = Some(nick.clone())).await
    }

    async fn user_left_clean(&self, jid: &RoomJid) -> Result<(), StoreError> {
        self.update(jid, |r| r.clean_exit = true).await
    }

    async fn user_left_dirty(&self, jid: &RoomJid) -> Result<(), StoreError> {
        self.update(jid, |r| r.dirty_exits += 1).await
    }

    async fn get_hanging_staff_start(&self, timeout: Duration) -> Result<Vec<PairedRoom>, StoreError> {
        let mut rooms = self.get_timed_out(PairedStatus::StaffWaiting, timeout).await?;
        rooms.extend(
            self.get_timed_out(PairedStatus::StaffWaitingForInvitee, timeout)
                .await?,
        );
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }
}

impl GroupRepository for MemoryRooms<GroupRoom> {}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    pub conversation: ConversationId,
    pub sender: Nick,
    pub role: Role,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedEvent {
    pub conversation: ConversationId,
    pub event: ChatEvent,
    pub detail: String,
}

#[derive(Default)]
struct Journal {
    messages: Vec<LoggedMessage>,
    events: Vec<LoggedEvent>,
    admins: HashSet<(ConversationId, Nick)>,
    departed: Vec<(ConversationId, Nick)>,
    invalidated: Vec<(ConversationId, Nick)>,
    unavailable: bool,
}

impl Journal {
    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("conversation store offline".into()));
        }
        Ok(())
    }
}

/// Conversation collaborator that records everything it is told.
#[derive(Clone, Default)]
pub struct MemoryConversations {
    journal: Arc<Mutex<Journal>>,
}

impl MemoryConversations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call fail with [`StoreError::Unavailable`] until reset.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.journal.lock().await.unavailable = unavailable;
    }

    pub async fn add_group_admin(&self, conversation: ConversationId, nick: impl Into<Nick>) {
        self.journal.lock().await.admins.insert((conversation, nick.into()));
    }

    pub async fn messages(&self) -> Vec<LoggedMessage> {
        self.journal.lock().await.messages.clone()
    }

    pub async fn events(&self) -> Vec<LoggedEvent> {
        self.journal.lock().await.events.clone()
    }

    pub async fn departed(&self) -> Vec<(ConversationId, Nick)> {
        self.journal.lock().await.departed.clone()
    }

    pub async fn invalidated(&self) -> Vec<(ConversationId, Nick)> {
        self.journal.lock().await.invalidated.clone()
    }
}

impl Conversations for MemoryConversations {
    async fn log_message(
        &self,
        conversation: ConversationId,
        sender: &Nick,
        role: Role,
        body: &str,
    ) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        journal.check()?;
        journal.messages.push(LoggedMessage {
            conversation,
            sender: sender.clone(),
            role,
            body: body.to_string(),
        });
        Ok(())
    }

    async fn log_event(
        &self,
        conversation: ConversationId,
        event: ChatEvent,
        detail: &str,
    ) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        journal.check()?;
        journal.events.push(LoggedEvent { conversation, event, detail: detail.to_string() });
        Ok(())
    }

    async fn is_group_admin(&self, conversation: ConversationId, nick: &Nick) -> Result<bool, StoreError> {
        let journal = self.journal.lock().await;
        journal.check()?;
        Ok(journal.admins.contains(&(conversation, nick.clone())))
    }

    async fn group_member_left(&self, conversation: ConversationId, nick: &Nick) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        journal.check()?;
        journal.departed.push((conversation, nick.clone()));
        Ok(())
    }

    async fn invalidate_group_member(
        &self,
        conversation: ConversationId,
        nick: &Nick,
    ) -> Result<(), StoreError> {
        let mut journal = self.journal.lock().await;
        journal.check()?;
        journal.invalidated.push((conversation, nick.clone()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Site store
// ---------------------------------------------------------------------------

/// A complete in-memory site store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub paired: MemoryPairedRooms,
    pub group: MemoryGroupRooms,
    pub conversations: MemoryConversations,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SiteStore for MemoryStore {
    type Paired = MemoryPairedRooms;
    type Group = MemoryGroupRooms;
    type Conversations = MemoryConversations;

    fn paired(&self) -> &MemoryPairedRooms {
        &self.paired
    }

    fn group(&self) -> &MemoryGroupRooms {
        &self.group
    }

    fn conversations(&self) -> &MemoryConversations {
        &self.conversations
    }
}
