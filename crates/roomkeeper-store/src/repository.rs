//! Repository contracts the broker persists room state through.
//!
//! The broker never talks to a database directly. Each site hands it a
//! [`SiteStore`], which gives access to one repository per room kind plus
//! the [`Conversations`] collaborator. Implementations are responsible for
//! their own atomicity; every method is a single logical operation.

use std::time::Duration;

use roomkeeper_protocol::{Nick, RoomJid};

use crate::{
    Conversations, ConversationId, GroupRoom, GroupStatus, Lifecycle, PairedRoom,
    PairedStatus, RoomRecord, StoreError,
};

/// Operations shared by both room kinds.
pub trait RoomRepository {
    type Status: Lifecycle;
    type Room: RoomRecord<Status = Self::Status>;

    /// Rooms in the pool, ready to be handed out.
    async fn get_available(&self) -> Result<Vec<Self::Room>, StoreError>;

    /// Every room the broker should be present in.
    async fn get_not_destroyed(&self) -> Result<Vec<Self::Room>, StoreError>;

    async fn get_by_status(&self, status: Self::Status) -> Result<Vec<Self::Room>, StoreError>;

    async fn get_by_jid(&self, jid: &RoomJid) -> Result<Option<Self::Room>, StoreError>;

    /// Rooms that have been in `status` for longer than `timeout`.
    async fn get_timed_out(
        &self,
        status: Self::Status,
        timeout: Duration,
    ) -> Result<Vec<Self::Room>, StoreError>;

    async fn get_to_destroy(&self) -> Result<Vec<Self::Room>, StoreError>;

    /// Purges destroyed records. Returns how many were removed.
    async fn delete_closed(&self) -> Result<usize, StoreError>;

    /// Records a freshly configured room as available.
    async fn new_room(&self, jid: &RoomJid, password: &str) -> Result<Self::Room, StoreError>;

    async fn set_status(&self, jid: &RoomJid, status: Self::Status) -> Result<(), StoreError>;

    async fn assign_conversation(
        &self,
        jid: &RoomJid,
        conversation: ConversationId,
    ) -> Result<(), StoreError>;

    /// Records that the broker has left the room for good.
    async fn destroyed(&self, jid: &RoomJid) -> Result<(), StoreError>;
}

/// Persisted facts specific to staff/client rooms.
pub trait PairedRepository: RoomRepository<Status = PairedStatus, Room = PairedRoom> {
    async fn staff_joined(&self, jid: &RoomJid, nick: &Nick) -> Result<(), StoreError>;

    async fn client_joined(&self, jid: &RoomJid, nick: &Nick) -> Result<(), StoreError>;

    async fn user_left_clean(&self, jid: &RoomJid) -> Result<(), StoreError>;

    async fn user_left_dirty(&self, jid: &RoomJid) -> Result<(), StoreError>;

    /// Rooms where a staff member has been waiting for a client longer
    /// than `timeout`.
    async fn get_hanging_staff_start(&self, timeout: Duration)
    -> Result<Vec<PairedRoom>, StoreError>;
}

pub trait GroupRepository: RoomRepository<Status = GroupStatus, Room = GroupRoom> {}

/// Everything one site persists.
pub trait SiteStore {
    type Paired: PairedRepository;
    type Group: GroupRepository;
    type Conversations: Conversations;

    fn paired(&self) -> &Self::Paired;
    fn group(&self) -> &Self::Group;
    fn conversations(&self) -> &Self::Conversations;
}
