//! Routing protocol events to room handlers and applying what the room
//! state machines decide.

use roomkeeper_protocol::{
    ChatProtocol, ConfigForm, Departure, ErrorCondition, ErrorKind, Nick, Occupant,
    ProtocolEvent, RoomJid, SiteName,
};
use roomkeeper_room::{
    Arrival, Command, Effect, Exit, Fact, Level, Note, PairedFacts, Phase, RoomError, RoomPolicy,
    Step, fill_form, group, paired,
};
use roomkeeper_store::{
    ConversationId, Conversations, GroupRoom, GroupStatus, PairedRepository, PairedRoom,
    PairedStatus, RoomKind, RoomRepository, Role, SiteStore, StoreError,
};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::site::lookup;
use crate::BrokerError;

/// Messages starting with this marker are the chat client's own
/// bookkeeping and never logged.
pub(crate) const STARTUP_LINES: &str = "[#startuplines#]";

impl<P: ChatProtocol, S: SiteStore> Broker<P, S> {
    /// Hands one event to the handler of its room.
    ///
    /// Only a lost connection is returned; anything else that goes wrong
    /// is logged and the loop carries on with the next event.
    pub(crate) async fn dispatch(&mut self, event: ProtocolEvent) -> Result<(), BrokerError> {
        let jid = event.room().clone();
        if !self.handlers.contains_key(&jid) {
            debug!(room = %jid, ?event, "event for a room without handler");
            return Ok(());
        }

        let result = match event {
            ProtocolEvent::Joined { occupant, .. } => self.on_joined(&jid, occupant).await,
            ProtocolEvent::Left { departure, .. } => self.on_left(&jid, departure).await,
            ProtocolEvent::Message { nick, body, .. } => self.on_message(&jid, &nick, &body).await,
            ProtocolEvent::Created { .. } => self.on_created(&jid).await,
            ProtocolEvent::ConfigurationForm { form, .. } => self.on_configuration_form(&jid, &form).await,
            ProtocolEvent::Configured { .. } => self.on_configured(&jid).await,
            ProtocolEvent::Rejected { error, .. } => self.on_rejected(&jid, &error).await,
        };
        match result {
            Err(e) if !e.is_connection_lost() => {
                error!(room = %jid, error = %e, "handling event failed");
                Ok(())
            }
            other => other,
        }
    }

    // -- Presence ----------------------------------------------------------

    async fn on_joined(&mut self, jid: &RoomJid, occupant: Occupant) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get_mut(jid) else {
            return Ok(());
        };
        let nick = occupant.nick.clone();
        match handler.observe_join(&occupant) {
            Arrival::Own => {
                debug!(room = %jid, affiliation = %occupant.affiliation, "broker present");
                return Ok(());
            }
            Arrival::Repeat => {
                debug!(room = %jid, nick = %nick, "presence update");
                return Ok(());
            }
            Arrival::New => {}
        }

        if handler.phase() == Phase::Creating {
            warn!(room = %jid, nick = %nick, "occupant entered a room still being configured");
            return Ok(());
        }
        if handler.is_closing() {
            info!(room = %jid, nick = %nick, "occupant entered a closing room; kicking");
            handler.mark_kicked(&nick);
            return self.kick(jid, &nick).await;
        }

        let site = handler.site.clone();
        match handler.kind {
            RoomKind::Paired => {
                let occupants = handler.occupants().clone();
                let rejoin_expected = handler.rejoin_expected();
                let room = self.paired_record(&site, jid).await?;
                let step = paired::on_join(&PairedFacts::of(&room), &nick, &occupants, rejoin_expected);
                self.apply_paired(&site, jid, &room, step).await
            }
            RoomKind::Group => {
                let room = self.group_record(&site, jid).await?;
                let step = group::on_join(room.status, &nick);
                self.apply_group(&site, jid, &room, step).await
            }
        }
    }

    async fn on_left(&mut self, jid: &RoomJid, departure: Departure) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get_mut(jid) else {
            return Ok(());
        };
        let exit = handler.observe_leave(&departure);
        let (site, kind, phase) = (handler.site.clone(), handler.kind, handler.phase());
        let occupants = handler.occupants().clone();

        match exit {
            Exit::Own if departure.removed => {
                warn!(room = %jid, "the broker was removed from the room");
                self.handlers.remove(jid);
                self.pool.finish(jid);
                return Ok(());
            }
            Exit::Own => {
                debug!(room = %jid, "broker left");
                return Ok(());
            }
            Exit::Unknown => {
                debug!(room = %jid, nick = %departure.nick, "departure of an occupant not present");
                return Ok(());
            }
            _ if phase == Phase::Creating => return Ok(()),
            Exit::Expected { remaining } => {
                debug!(room = %jid, nick = %departure.nick, remaining, "expected departure");
                if kind == RoomKind::Group {
                    self.group_left(&site, jid, &departure, remaining).await?;
                }
            }
            Exit::Departed { remaining } => match kind {
                RoomKind::Paired => {
                    let room = self.paired_record(&site, jid).await?;
                    let step = paired::on_leave(
                        &PairedFacts::of(&room),
                        &departure.nick,
                        departure.is_clean_exit(),
                        &occupants,
                    );
                    self.apply_paired(&site, jid, &room, step).await?;
                }
                RoomKind::Group => self.group_left(&site, jid, &departure, remaining).await?,
            },
        }

        let emptied = self
            .handlers
            .get(jid)
            .is_some_and(|h| h.is_closing() && h.live() == 0);
        if emptied {
            self.finish_closing(jid).await?;
        }
        Ok(())
    }

    async fn group_left(
        &mut self,
        site: &SiteName,
        jid: &RoomJid,
        departure: &Departure,
        remaining: usize,
    ) -> Result<(), BrokerError> {
        let room = self.group_record(site, jid).await?;
        let step = group::on_leave(room.status, departure, remaining);
        self.apply_group(site, jid, &room, step).await
    }

    // -- Messages ----------------------------------------------------------

    async fn on_message(&mut self, jid: &RoomJid, nick: &Nick, body: &str) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get(jid) else {
            return Ok(());
        };
        if *nick == handler.nick {
            return Ok(());
        }
        if body.starts_with(STARTUP_LINES) {
            debug!(room = %jid, nick = %nick, "ignoring startup lines");
            return Ok(());
        }

        let store = &lookup(&self.sites, &handler.site)?.store;
        let (conversation, role) = match handler.kind {
            RoomKind::Paired => {
                let room = store
                    .paired()
                    .get_by_jid(jid)
                    .await?
                    .ok_or_else(|| RoomError::Unrecorded(jid.clone()))?;
                if room.status != PairedStatus::Chatting {
                    debug!(room = %jid, status = %room.status, "message outside a chat; not logged");
                    return Ok(());
                }
                let role = if room.staff_nick.as_ref() == Some(nick) {
                    Role::Staff
                } else if room.client_nick.as_ref() == Some(nick) {
                    Role::Client
                } else {
                    debug!(room = %jid, nick = %nick, "message from a non-participant; not logged");
                    return Ok(());
                };
                (room.conversation, role)
            }
            RoomKind::Group => {
                let room = store
                    .group()
                    .get_by_jid(jid)
                    .await?
                    .ok_or_else(|| RoomError::Unrecorded(jid.clone()))?;
                if room.status != GroupStatus::Chatting {
                    debug!(room = %jid, status = %room.status, "message outside a meeting; not logged");
                    return Ok(());
                }
                (room.conversation, Role::Participant)
            }
        };

        let Some(conversation) = conversation else {
            debug!(room = %jid, "no conversation assigned; message not logged");
            return Ok(());
        };
        swallow(
            store.conversations().log_message(conversation, nick, role, body).await,
            jid,
            "logging message",
        );
        Ok(())
    }

    // -- Room setup --------------------------------------------------------

    /// The broker's join created the room. Either a room the pool asked
    /// for, or a recorded room that vanished while the broker was away and
    /// now needs configuring again.
    async fn on_created(&mut self, jid: &RoomJid) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get_mut(jid) else {
            return Ok(());
        };
        match handler.phase() {
            Phase::Creating => debug!(room = %jid, "room created; requesting configuration"),
            Phase::Active => {
                warn!(room = %jid, "room vanished while the broker was away; configuring it again");
                handler.mark_locked();
            }
        }
        if let Err(e) = self.protocol.request_configuration(jid).await {
            if e.is_transport() {
                return Err(e.into());
            }
            error!(room = %jid, error = %e, "requesting room configuration failed");
            return self.give_up(jid).await;
        }
        Ok(())
    }

    async fn on_configuration_form(&mut self, jid: &RoomJid, offered: &ConfigForm) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get(jid) else {
            return Ok(());
        };
        let settings = &lookup(&self.sites, &handler.site)?.settings;
        let policy = RoomPolicy {
            min_capacity: handler.max_occupants,
            ..settings.policy(handler.kind, &handler.password)
        };
        let form = fill_form(offered, &policy);

        debug!(room = %jid, "submitting room configuration");
        if let Err(e) = self.protocol.submit_configuration(jid, form).await {
            if e.is_transport() {
                return Err(e.into());
            }
            error!(room = %jid, error = %e, "submitting room configuration failed");
            return self.give_up(jid).await;
        }
        Ok(())
    }

    async fn on_configured(&mut self, jid: &RoomJid) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get_mut(jid) else {
            return Ok(());
        };
        let phase = handler.phase();
        handler.mark_configured();
        if phase == Phase::Active {
            info!(room = %jid, "room configured again");
            return Ok(());
        }

        let (site, kind, password) = (handler.site.clone(), handler.kind, handler.password.clone());
        self.pool.finish(jid);
        let store = &lookup(&self.sites, &site)?.store;
        let recorded = match kind {
            RoomKind::Paired => store.paired().new_room(jid, &password).await.map(drop),
            RoomKind::Group => store.group().new_room(jid, &password).await.map(drop),
        };
        match recorded {
            Ok(()) => {
                info!(site = %site, room = %jid, %kind, "room added to the pool");
                Ok(())
            }
            Err(e) => {
                error!(site = %site, room = %jid, error = %e, "recording new room failed; leaving it");
                self.give_up(jid).await
            }
        }
    }

    async fn on_rejected(&mut self, jid: &RoomJid, condition: &ErrorCondition) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get(jid) else {
            return Ok(());
        };
        if handler.phase() == Phase::Creating && condition.kind == ErrorKind::Cancel {
            error!(
                room = %jid,
                error = %condition.message,
                "room creation refused; probably server limited number of presences"
            );
        } else {
            error!(room = %jid, kind = %condition.kind, error = %condition.message, "room rejected");
        }
        self.give_up(jid).await
    }

    // -- Applying steps ----------------------------------------------------

    pub(crate) async fn paired_record(&self, site: &SiteName, jid: &RoomJid) -> Result<PairedRoom, BrokerError> {
        let repo = lookup(&self.sites, site)?.store.paired();
        Ok(repo
            .get_by_jid(jid)
            .await?
            .ok_or_else(|| RoomError::Unrecorded(jid.clone()))?)
    }

    pub(crate) async fn group_record(&self, site: &SiteName, jid: &RoomJid) -> Result<GroupRoom, BrokerError> {
        let repo = lookup(&self.sites, site)?.store.group();
        Ok(repo
            .get_by_jid(jid)
            .await?
            .ok_or_else(|| RoomError::Unrecorded(jid.clone()))?)
    }

    async fn apply_paired(
        &mut self,
        site: &SiteName,
        jid: &RoomJid,
        room: &PairedRoom,
        step: Step<PairedStatus>,
    ) -> Result<(), BrokerError> {
        log_note(&step.note, site, jid);
        let repo = lookup(&self.sites, site)?.store.paired();
        for fact in &step.facts {
            match fact {
                Fact::StaffJoined(nick) => repo.staff_joined(jid, nick).await?,
                Fact::ClientJoined(nick) => repo.client_joined(jid, nick).await?,
                Fact::LeftClean => repo.user_left_clean(jid).await?,
                Fact::LeftDirty => repo.user_left_dirty(jid).await?,
            }
        }
        if let Some(status) = step.status.filter(|s| *s != room.status) {
            repo.set_status(jid, status).await?;
            info!(site = %site, room = %jid, from = %room.status, to = %status, "status changed");
        }
        self.apply_effects(site, jid, room.conversation, step.effects).await
    }

    async fn apply_group(
        &mut self,
        site: &SiteName,
        jid: &RoomJid,
        room: &GroupRoom,
        step: Step<GroupStatus>,
    ) -> Result<(), BrokerError> {
        log_note(&step.note, site, jid);
        if let Some(status) = step.status.filter(|s| *s != room.status) {
            lookup(&self.sites, site)?.store.group().set_status(jid, status).await?;
            info!(site = %site, room = %jid, from = %room.status, to = %status, "status changed");
        }
        self.apply_effects(site, jid, room.conversation, step.effects).await
    }

    /// Conversation-log failures never stop the room: they are logged and
    /// the next effect runs.
    pub(crate) async fn apply_effects(
        &mut self,
        site: &SiteName,
        jid: &RoomJid,
        conversation: Option<ConversationId>,
        effects: Vec<Effect>,
    ) -> Result<(), BrokerError> {
        let conversations = lookup(&self.sites, site)?.store.conversations();
        for effect in effects {
            match effect {
                Effect::RefillPool => self.queue.push(Command::FillPool(Some(site.clone()))),
                Effect::Kick(nick) => {
                    if let Some(handler) = self.handlers.get_mut(jid) {
                        handler.mark_kicked(&nick);
                    }
                    if let Err(e) = self.protocol.kick(jid, &nick).await {
                        if e.is_transport() {
                            return Err(e.into());
                        }
                        warn!(room = %jid, nick = %nick, error = %e, "kick failed");
                    }
                }
                Effect::ClearGuard => {
                    if let Some(handler) = self.handlers.get_mut(jid) {
                        handler.clear_rejoin_guard();
                    }
                }
                Effect::LogEvent { event, detail } => {
                    if let Some(conversation) = conversation {
                        swallow(
                            conversations.log_event(conversation, event, &detail).await,
                            jid,
                            "logging conversation event",
                        );
                    }
                }
                Effect::GrantModeratorIfAdmin(nick) => {
                    let Some(conversation) = conversation else {
                        continue;
                    };
                    match conversations.is_group_admin(conversation, &nick).await {
                        Ok(true) => {}
                        Ok(false) => continue,
                        Err(e) => {
                            warn!(room = %jid, nick = %nick, error = %e, "cannot check group administrator");
                            continue;
                        }
                    }
                    let Some(handler) = self.handlers.get(jid) else {
                        continue;
                    };
                    if !handler.may_grant_roles() {
                        warn!(
                            room = %jid,
                            nick = %nick,
                            affiliation = %handler.affiliation(),
                            configured = handler.is_configured(),
                            "cannot make group administrator moderator"
                        );
                        continue;
                    }
                    info!(room = %jid, nick = %nick, "granting moderator to group administrator");
                    if let Err(e) = self.protocol.grant_moderator(jid, &nick).await {
                        if e.is_transport() {
                            return Err(e.into());
                        }
                        warn!(room = %jid, nick = %nick, error = %e, "granting moderator failed");
                    }
                }
                Effect::MemberLeft(nick) => {
                    if let Some(conversation) = conversation {
                        swallow(
                            conversations.group_member_left(conversation, &nick).await,
                            jid,
                            "recording departure",
                        );
                    }
                }
                Effect::InvalidateMember(nick) => {
                    if let Some(conversation) = conversation {
                        swallow(
                            conversations.invalidate_group_member(conversation, &nick).await,
                            jid,
                            "revoking credential",
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Kicks one occupant. A refused kick is only logged.
    pub(crate) async fn kick(&mut self, jid: &RoomJid, nick: &Nick) -> Result<(), BrokerError> {
        if let Err(e) = self.protocol.kick(jid, nick).await {
            if e.is_transport() {
                return Err(e.into());
            }
            warn!(room = %jid, nick = %nick, error = %e, "kick failed");
        }
        Ok(())
    }
}

pub(crate) fn log_note(note: &Note, site: &SiteName, jid: &RoomJid) {
    let message = note.message.as_str();
    match note.level {
        Level::Debug => debug!(site = %site, room = %jid, "{message}"),
        Level::Info => info!(site = %site, room = %jid, "{message}"),
        Level::Warn => warn!(site = %site, room = %jid, "{message}"),
    }
}

fn swallow(result: Result<(), StoreError>, jid: &RoomJid, action: &str) {
    if let Err(e) = result {
        warn!(room = %jid, error = %e, "{action} failed");
    }
}
