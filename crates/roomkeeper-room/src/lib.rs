//! Room lifecycle for roomkeeper.
//!
//! Everything here is synchronous and side-effect free apart from
//! logging; the broker applies what these types decide.
//!
//! # Key types
//!
//! - [`paired`] / [`group`]: the transition functions, returning a [`Step`]
//! - [`reconcile_paired`] / [`reconcile_group`]: status repair after a
//!   reconnect, returning a [`Verdict`]
//! - [`RoomHandler`]: live occupancy of one room
//! - [`PoolManager`]: room naming and in-flight accounting
//! - [`TaskQueue`]: deferred [`Command`]s
//! - [`fill_form`]: the configuration form policy

mod configure;
mod error;
pub mod group;
mod handler;
mod manager;
pub mod paired;
mod queue;
mod reconcile;
mod step;

pub use configure::{RoomPolicy, fill_form, select_capacity};
pub use error::RoomError;
pub use handler::{Arrival, Exit, GROUP_CAPACITY, PAIRED_CAPACITY, Phase, RoomHandler};
pub use manager::PoolManager;
pub use paired::PairedFacts;
pub use queue::{Command, TaskQueue};
pub use reconcile::{Finding, Verdict, reconcile_group, reconcile_paired};
pub use step::{Effect, Fact, Level, Note, Step};
