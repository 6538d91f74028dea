//! In-process chat service.
//!
//! [`LoopbackService`] simulates a multi-user-chat service well enough to
//! exercise the broker end to end: password-protected non-persistent
//! rooms, configuration forms, kicks, moderator grants, a room limit and
//! a droppable broker connection. Participants are driven directly
//! through the service handle; the broker talks to it through
//! [`LoopbackProtocol`], its [`ChatProtocol`] implementation.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::sync::mpsc::error::TryRecvError;

use crate::{
    Affiliation, ChatProtocol, ConfigForm, Departure, ErrorCondition,
    ErrorKind, FormField, JoinRequest, Nick, Occupant, ProtocolError,
    ProtocolEvent, RoomJid, TransportError, fields,
};

/// Largest room size the service offers in its configuration form.
const MAX_USERS_OPTIONS: &[&str] = &["5", "10", "20", "30", "50", "100", "200"];

struct LoopRoom {
    password: String,
    /// Participants, in arrival order. Never contains the broker.
    occupants: Vec<Occupant>,
    /// The broker's nick while it is present.
    broker_nick: Option<Nick>,
    configured: bool,
    max_users: Option<usize>,
    moderators: HashSet<Nick>,
}

impl LoopRoom {
    fn position(&self, nick: &Nick) -> Option<usize> {
        self.occupants.iter().position(|o| &o.nick == nick)
    }
}

struct ServiceState {
    rooms: HashMap<RoomJid, LoopRoom>,
    /// Event channel of the connected broker session.
    broker: Option<mpsc::UnboundedSender<ProtocolEvent>>,
    room_limit: Option<usize>,
    refuse_connects: u32,
    broker_affiliation: Affiliation,
    connects: u32,
}

impl ServiceState {
    /// Delivers an event to the broker if it is connected and present in
    /// the event's room.
    fn emit(&self, event: ProtocolEvent) {
        let present = self
            .rooms
            .get(event.room())
            .is_some_and(|r| r.broker_nick.is_some());
        if let (true, Some(tx)) = (present, &self.broker) {
            let _ = tx.send(event);
        }
    }

    fn broker_tx(&self) -> Result<mpsc::UnboundedSender<ProtocolEvent>, TransportError> {
        self.broker
            .clone()
            .ok_or_else(|| TransportError::ConnectionClosed("no broker session".into()))
    }

    fn broker_room(&mut self, room: &RoomJid) -> Result<&mut LoopRoom, ProtocolError> {
        self.rooms
            .get_mut(room)
            .filter(|r| r.broker_nick.is_some())
            .ok_or_else(|| ProtocolError::NotJoined(room.clone()))
    }
}

/// Handle to the simulated service. Cheap to clone; all clones share the
/// same rooms.
#[derive(Clone)]
pub struct LoopbackService {
    state: Arc<Mutex<ServiceState>>,
}

impl Default for LoopbackService {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackService {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ServiceState {
                rooms: HashMap::new(),
                broker: None,
                room_limit: None,
                refuse_connects: 0,
                broker_affiliation: Affiliation::Owner,
                connects: 0,
            })),
        }
    }

    /// A fresh, unconnected broker session against this service.
    pub fn protocol(&self) -> LoopbackProtocol {
        LoopbackProtocol {
            service: self.clone(),
            events: None,
            pending: VecDeque::new(),
        }
    }

    // -- Fault injection ---------------------------------------------------

    /// Drops the broker's session. The broker leaves every room; rooms
    /// left empty vanish, rooms with participants stay.
    pub async fn drop_connection(&self) {
        let mut st = self.state.lock().await;
        st.broker = None;
        for room in st.rooms.values_mut() {
            room.broker_nick = None;
        }
        st.rooms.retain(|_, r| !r.occupants.is_empty());
        tracing::debug!("loopback: broker connection dropped");
    }

    /// Makes the next `n` connection attempts fail.
    pub async fn refuse_connects(&self, n: u32) {
        self.state.lock().await.refuse_connects = n;
    }

    /// Limits how many rooms may exist; creating more is rejected with a
    /// `cancel` error, like a service limiting presences.
    pub async fn set_room_limit(&self, limit: Option<usize>) {
        self.state.lock().await.room_limit = limit;
    }

    /// Affiliation the broker gets in rooms it joins from now on.
    pub async fn set_broker_affiliation(&self, affiliation: Affiliation) {
        self.state.lock().await.broker_affiliation = affiliation;
    }

    // -- Participants ------------------------------------------------------

    /// A participant enters a configured room.
    pub async fn join(
        &self,
        room: &RoomJid,
        nick: impl Into<Nick>,
        password: &str,
    ) -> Result<(), ProtocolError> {
        let nick = nick.into();
        let mut st = self.state.lock().await;
        let rejected = |reason: &str| ProtocolError::Rejected {
            room: room.clone(),
            reason: reason.to_string(),
        };
        let r = st.rooms.get_mut(room).ok_or_else(|| rejected("item-not-found"))?;
        if !r.configured {
            return Err(rejected("room is locked"));
        }
        if r.password != password {
            return Err(rejected("not-authorized"));
        }
        if r.position(&nick).is_some() || r.broker_nick.as_ref() == Some(&nick) {
            return Err(rejected("conflict"));
        }
        let present = r.occupants.len() + usize::from(r.broker_nick.is_some());
        if r.max_users.is_some_and(|max| present >= max) {
            return Err(rejected("service-unavailable: room is full"));
        }
        let occupant = Occupant { nick, affiliation: Affiliation::None };
        r.occupants.push(occupant.clone());
        st.emit(ProtocolEvent::Joined { room: room.clone(), occupant });
        Ok(())
    }

    /// A participant leaves with the given presence status. Returns
    /// `false` if the nick wasn't in the room.
    pub async fn leave(&self, room: &RoomJid, nick: impl Into<Nick>, status: Option<&str>) -> bool {
        let nick = nick.into();
        let mut st = self.state.lock().await;
        let Some(r) = st.rooms.get_mut(room) else {
            return false;
        };
        let Some(idx) = r.position(&nick) else {
            return false;
        };
        r.occupants.remove(idx);
        r.moderators.remove(&nick);
        st.emit(ProtocolEvent::Left {
            room: room.clone(),
            departure: Departure { nick, status: status.map(str::to_string), removed: false },
        });
        true
    }

    /// A participant leaves announcing a clean exit.
    pub async fn leave_clean(&self, room: &RoomJid, nick: impl Into<Nick>) -> bool {
        self.leave(room, nick, Some(crate::CLEAN_EXIT)).await
    }

    /// A participant sends a groupchat message.
    pub async fn say(&self, room: &RoomJid, nick: impl Into<Nick>, body: &str) -> bool {
        let nick = nick.into();
        let st = self.state.lock().await;
        let present = st.rooms.get(room).is_some_and(|r| r.position(&nick).is_some());
        if present {
            st.emit(ProtocolEvent::Message {
                room: room.clone(),
                nick,
                body: body.to_string(),
            });
        }
        present
    }

    // -- Inspection --------------------------------------------------------

    pub async fn room_exists(&self, room: &RoomJid) -> bool {
        self.state.lock().await.rooms.contains_key(room)
    }

    pub async fn room_count(&self) -> usize {
        self.state.lock().await.rooms.len()
    }

    /// Participants present in a room (the broker excluded).
    pub async fn occupants(&self, room: &RoomJid) -> Vec<Nick> {
        self.state
            .lock()
            .await
            .rooms
            .get(room)
            .map(|r| r.occupants.iter().map(|o| o.nick.clone()).collect())
            .unwrap_or_default()
    }

    pub async fn broker_present(&self, room: &RoomJid) -> bool {
        self.state
            .lock()
            .await
            .rooms
            .get(room)
            .is_some_and(|r| r.broker_nick.is_some())
    }

    pub async fn is_configured(&self, room: &RoomJid) -> bool {
        self.state.lock().await.rooms.get(room).is_some_and(|r| r.configured)
    }

    pub async fn max_users(&self, room: &RoomJid) -> Option<usize> {
        self.state.lock().await.rooms.get(room).and_then(|r| r.max_users)
    }

    pub async fn is_moderator(&self, room: &RoomJid, nick: impl Into<Nick>) -> bool {
        let nick = nick.into();
        self.state
            .lock()
            .await
            .rooms
            .get(room)
            .is_some_and(|r| r.moderators.contains(&nick))
    }

    /// Number of successful broker connects so far.
    pub async fn connect_count(&self) -> u32 {
        self.state.lock().await.connects
    }
}

fn offered_form() -> ConfigForm {
    ConfigForm::new(vec![
        FormField::text(fields::ROOM_NAME, ""),
        FormField::boolean(fields::PERSISTENT, true),
        FormField::boolean(fields::PUBLIC, true),
        FormField::boolean(fields::PUBLIC_LIST, true),
        FormField::boolean(fields::PASSWORD_PROTECTED, false),
        FormField::text(fields::ROOM_SECRET, ""),
        FormField::list(fields::MAX_USERS, "200", MAX_USERS_OPTIONS),
        FormField::list(fields::WHOIS, "moderators", &["moderators", "anyone"]),
        FormField::boolean(fields::MEMBERS_ONLY, true),
        FormField::boolean(fields::MODERATED, true),
        FormField::boolean(fields::MEMBERS_BY_DEFAULT, false),
        FormField::boolean(fields::CHANGE_SUBJECT, false),
        FormField::boolean(fields::ALLOW_INVITES, true),
        FormField::boolean(fields::ALLOW_PRIVATE_MESSAGES, true),
        FormField::boolean(fields::ALLOW_QUERY_USERS, true),
    ])
}

/// The broker's session with a [`LoopbackService`].
pub struct LoopbackProtocol {
    service: LoopbackService,
    events: Option<mpsc::UnboundedReceiver<ProtocolEvent>>,
    /// Events pulled off the channel but not yet handed out (kept by
    /// `flush_room` for other rooms).
    pending: VecDeque<ProtocolEvent>,
}

impl LoopbackProtocol {
    pub fn service(&self) -> &LoopbackService {
        &self.service
    }

    /// Moves everything already sent into `pending`.
    fn absorb(&mut self) -> Result<(), TransportError> {
        let Some(rx) = self.events.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        loop {
            match rx.try_recv() {
                Ok(event) => self.pending.push_back(event),
                // A closed channel is reported by the next blocking receive,
                // once the buffered events are handed out.
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return Ok(()),
            }
        }
    }

    fn closed(&mut self) -> TransportError {
        self.events = None;
        TransportError::ConnectionClosed("service dropped the session".into())
    }
}

impl ChatProtocol for LoopbackProtocol {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut st = self.service.state.lock().await;
        if st.refuse_connects > 0 {
            st.refuse_connects -= 1;
            return Err(TransportError::ConnectFailed("connection refused".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        st.broker = Some(tx);
        st.connects += 1;
        self.events = Some(rx);
        self.pending.clear();
        Ok(())
    }

    async fn join_room(&mut self, request: JoinRequest) -> Result<(), ProtocolError> {
        let mut st = self.service.state.lock().await;
        let tx = st.broker_tx()?;
        let affiliation = st.broker_affiliation;
        let at_limit = st.room_limit.is_some_and(|limit| st.rooms.len() >= limit);

        match st.rooms.get_mut(&request.room) {
            Some(room) => {
                if room.password != request.password {
                    return Err(ProtocolError::Rejected {
                        room: request.room,
                        reason: "not-authorized".into(),
                    });
                }
                room.broker_nick = Some(request.nick.clone());
                for occupant in &room.occupants {
                    let _ = tx.send(ProtocolEvent::Joined {
                        room: request.room.clone(),
                        occupant: occupant.clone(),
                    });
                }
            }
            None if at_limit => {
                let _ = tx.send(ProtocolEvent::Rejected {
                    room: request.room,
                    error: ErrorCondition {
                        kind: ErrorKind::Cancel,
                        message: "not-allowed: room limit reached".into(),
                    },
                });
                return Ok(());
            }
            None => {
                st.rooms.insert(
                    request.room.clone(),
                    LoopRoom {
                        password: request.password.clone(),
                        occupants: Vec::new(),
                        broker_nick: Some(request.nick.clone()),
                        configured: false,
                        max_users: None,
                        moderators: HashSet::new(),
                    },
                );
                let _ = tx.send(ProtocolEvent::Created { room: request.room.clone() });
            }
        }

        let _ = tx.send(ProtocolEvent::Joined {
            room: request.room,
            occupant: Occupant { nick: request.nick, affiliation },
        });
        Ok(())
    }

    async fn request_configuration(&mut self, room: &RoomJid) -> Result<(), ProtocolError> {
        let mut st = self.service.state.lock().await;
        st.broker_tx()?;
        st.broker_room(room)?;
        st.emit(ProtocolEvent::ConfigurationForm { room: room.clone(), form: offered_form() });
        Ok(())
    }

    async fn submit_configuration(
        &mut self,
        room: &RoomJid,
        form: ConfigForm,
    ) -> Result<(), ProtocolError> {
        let mut st = self.service.state.lock().await;
        st.broker_tx()?;
        let r = st.broker_room(room)?;
        if form.bool_value(fields::PASSWORD_PROTECTED) == Some(true) {
            if let Some(secret) = form.text_value(fields::ROOM_SECRET) {
                r.password = secret.to_string();
            }
        }
        r.max_users = form
            .text_value(fields::MAX_USERS)
            .and_then(|v| v.parse().ok());
        r.configured = true;
        st.emit(ProtocolEvent::Configured { room: room.clone() });
        Ok(())
    }

    async fn kick(&mut self, room: &RoomJid, nick: &Nick) -> Result<(), ProtocolError> {
        let mut st = self.service.state.lock().await;
        st.broker_tx()?;
        let r = st.broker_room(room)?;
        let Some(idx) = r.position(nick) else {
            return Err(ProtocolError::Rejected {
                room: room.clone(),
                reason: format!("no occupant {nick}"),
            });
        };
        r.occupants.remove(idx);
        r.moderators.remove(nick);
        st.emit(ProtocolEvent::Left {
            room: room.clone(),
            departure: Departure { nick: nick.clone(), status: None, removed: true },
        });
        Ok(())
    }

    async fn grant_moderator(&mut self, room: &RoomJid, nick: &Nick) -> Result<(), ProtocolError> {
        let mut st = self.service.state.lock().await;
        st.broker_tx()?;
        let r = st.broker_room(room)?;
        if r.position(nick).is_none() {
            return Err(ProtocolError::Rejected {
                room: room.clone(),
                reason: format!("no occupant {nick}"),
            });
        }
        r.moderators.insert(nick.clone());
        Ok(())
    }

    async fn leave(&mut self, room: &RoomJid) -> Result<(), ProtocolError> {
        let mut st = self.service.state.lock().await;
        st.broker_tx()?;
        let r = st.broker_room(room)?;
        r.broker_nick = None;
        if r.occupants.is_empty() {
            st.rooms.remove(room);
        }
        Ok(())
    }

    async fn next_event(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<ProtocolEvent>, TransportError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        let Some(rx) = self.events.as_mut() else {
            return Err(TransportError::NotConnected);
        };
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(event)) => Ok(Some(event)),
            Ok(None) => Err(self.closed()),
            Err(_) => Ok(None),
        }
    }

    async fn flush_room(
        &mut self,
        room: &RoomJid,
        timeout: Duration,
    ) -> Result<Vec<ProtocolEvent>, TransportError> {
        let mut flushed = Vec::new();
        loop {
            self.absorb()?;
            let (mine, others): (VecDeque<_>, VecDeque<_>) =
                self.pending.drain(..).partition(|e| e.room() == room);
            self.pending = others;
            if !mine.is_empty() {
                flushed.extend(mine);
                continue;
            }
            let Some(rx) = self.events.as_mut() else {
                return Err(TransportError::NotConnected);
            };
            match tokio::time::timeout(timeout, rx.recv()).await {
                Ok(Some(event)) => self.pending.push_back(event),
                Ok(None) => return Err(self.closed()),
                Err(_) => return Ok(flushed),
            }
        }
    }

    async fn disconnect(&mut self) {
        let mut st = self.service.state.lock().await;
        st.broker = None;
        for room in st.rooms.values_mut() {
            room.broker_nick = None;
        }
        st.rooms.retain(|_, r| !r.occupants.is_empty());
        self.events = None;
        self.pending.clear();
    }
}
