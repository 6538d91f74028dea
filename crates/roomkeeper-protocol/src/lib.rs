//! Chat-protocol contract for roomkeeper.
//!
//! The broker never speaks a wire format itself. It drives a
//! [`ChatProtocol`] implementation (an XMPP MUC client in production) and
//! consumes the [`ProtocolEvent`]s it delivers:
//!
//! - **Types** ([`RoomJid`], [`Nick`], [`SiteName`], [`ProtocolEvent`], ...):
//!   the vocabulary shared by every other crate.
//! - **Forms** ([`ConfigForm`]): the room-configuration form the service
//!   offers after a room is created.
//! - **Client** ([`ChatProtocol`]): the operations the broker issues.
//! - **Errors** ([`ProtocolError`], [`TransportError`]).
//!
//! With the `loopback` feature the crate also ships [`loopback`], an
//! in-process chat service used by the integration tests and the demo.
//!
//! ```text
//! Broker (events in, commands out) ⇄ ChatProtocol ⇄ chat service
//! ```

#![allow(async_fn_in_trait)]

mod client;
mod error;
mod form;
mod types;

#[cfg(feature = "loopback")]
pub mod loopback;

pub use client::ChatProtocol;
pub use error::{ProtocolError, TransportError};
pub use form::{ConfigForm, FieldValue, FormField, fields};
pub use types::{
    Affiliation, CLEAN_EXIT, Departure, ErrorCondition, ErrorKind,
    HistoryOptions, JoinRequest, Nick, Occupant, ProtocolEvent, RoomJid,
    SiteName,
};
