//! Persistence layer for roomkeeper.
//!
//! The broker keeps as little state in memory as it can. Everything that
//! must survive a lost connection lives behind the traits in this crate:
//!
//! 1. **Room records**: [`PairedRoom`] and [`GroupRoom`], each with a
//!    closed status enum ([`PairedStatus`], [`GroupStatus`])
//! 2. **Repositories**: [`RoomRepository`] and its per-kind extensions,
//!    grouped per site by [`SiteStore`]
//! 3. **Conversation audit trail**: the [`Conversations`] collaborator the
//!    web front end reads
//!
//! # How it fits in the stack
//!
//! ```text
//! Broker (above)       ← reconciles live occupancy against these records
//!     ↕
//! Store (this crate)   ← room records, statuses, audit trail
//!     ↕
//! Protocol (below)     ← RoomJid, Nick
//! ```
//!
//! [`MemoryStore`] implements everything in memory and backs the tests
//! and the demo.

#![allow(async_fn_in_trait)]

mod conversations;
mod error;
mod memory;
mod record;
mod repository;
mod status;

pub use conversations::{ChatEvent, Conversations, Role};
pub use error::StoreError;
pub use memory::{
    LoggedEvent, LoggedMessage, MemoryConversations, MemoryGroupRooms, MemoryPairedRooms,
    MemoryRooms, MemoryStore,
};
pub use record::{ConversationId, GroupRoom, PairedRoom, RoomRecord};
pub use repository::{GroupRepository, PairedRepository, RoomRepository, SiteStore};
pub use status::{GroupStatus, Lifecycle, PairedStatus, RoomKind, RoomStatus};
