//! The operations the broker issues against the chat service.

use std::time::Duration;

use crate::{
    ConfigForm, JoinRequest, Nick, ProtocolError, ProtocolEvent, RoomJid,
    TransportError,
};

/// A client session with the chat service, driven by the broker.
///
/// The broker owns exactly one implementation and calls it from a single
/// task, so methods take `&mut self` and nothing here needs to be `Sync`.
/// Outbound operations are fire-and-forget from the service's point of
/// view: their outcome (room configured, occupant removed, ...) arrives
/// later as a [`ProtocolEvent`].
pub trait ChatProtocol {
    /// Opens the session, or re-opens it after the transport was lost.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Enters a room, creating it if it doesn't exist. The broker becomes
    /// owner of a room it creates. Presences of the current occupants,
    /// then the broker's own presence, are delivered as events.
    async fn join_room(&mut self, request: JoinRequest) -> Result<(), ProtocolError>;

    /// Asks for the configuration form of a room the broker owns. The form
    /// arrives as [`ProtocolEvent::ConfigurationForm`].
    async fn request_configuration(&mut self, room: &RoomJid) -> Result<(), ProtocolError>;

    /// Submits a filled-in configuration form.
    async fn submit_configuration(
        &mut self,
        room: &RoomJid,
        form: ConfigForm,
    ) -> Result<(), ProtocolError>;

    /// Removes an occupant from a room.
    async fn kick(&mut self, room: &RoomJid, nick: &Nick) -> Result<(), ProtocolError>;

    /// Gives an occupant the moderator role.
    async fn grant_moderator(&mut self, room: &RoomJid, nick: &Nick) -> Result<(), ProtocolError>;

    /// Leaves a room. A non-persistent room disappears once empty.
    async fn leave(&mut self, room: &RoomJid) -> Result<(), ProtocolError>;

    /// Waits up to `timeout` for the next event. `Ok(None)` means nothing
    /// arrived in time; an error means the transport is gone.
    async fn next_event(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ProtocolEvent>, TransportError>;

    /// Removes and returns every buffered event for `room`, waiting in
    /// slices of `timeout` until a slice passes with nothing new for it.
    /// Events for other rooms stay queued in their original order.
    async fn flush_room(
        &mut self,
        room: &RoomJid,
        timeout: Duration,
    ) -> Result<Vec<ProtocolEvent>, TransportError>;

    /// Closes the session.
    async fn disconnect(&mut self);
}
