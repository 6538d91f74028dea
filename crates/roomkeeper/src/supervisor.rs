//! Connection supervision: connecting, reconnecting after a lost session,
//! and re-joining every recorded room.
//!
//! After each (re)connection every room that isn't destroyed is joined
//! again. Presences the service replays for a room are drained right away
//! and only counted; the room's stored status is then reconciled against
//! who is actually there.

use std::fmt;

use roomkeeper_protocol::{ChatProtocol, JoinRequest, Nick, ProtocolEvent, RoomJid, SiteName};
use roomkeeper_room::{
    Arrival, Command, Effect, Finding, PairedFacts, RoomError, RoomHandler, Verdict, group,
    paired, reconcile_group, reconcile_paired,
};
use roomkeeper_store::{RoomKind, RoomRepository, SiteStore};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::events::log_note;
use crate::site::lookup;
use crate::BrokerError;

impl<P: ChatProtocol, S: SiteStore> Broker<P, S> {
    /// Connects, retrying every `reconnect_delay` until it works. When
    /// `reconnecting`, the first attempt waits too.
    ///
    /// Returns `false` if a shutdown was requested while waiting.
    pub(crate) async fn establish(&mut self, reconnecting: bool) -> bool {
        let mut attempts: u32 = 0;
        loop {
            if reconnecting || attempts > 0 {
                tokio::time::sleep(self.mainloop.reconnect_delay()).await;
            }
            if !self.take_control() {
                return false;
            }
            attempts += 1;
            match self.protocol.connect().await {
                Ok(()) => {
                    info!(attempts, "connected to chat service");
                    self.queue.push_front(Command::RejoinRooms);
                    self.queue.push(Command::FillPool(None));
                    return true;
                }
                Err(e) => {
                    self.connect_failures += 1;
                    warn!(
                        error = %e,
                        attempts,
                        retry_in_secs = self.mainloop.reconnect_delay().as_secs(),
                        "connecting to chat service failed"
                    );
                }
            }
        }
    }

    /// Forgets everything tied to the lost session. Records are kept; the
    /// re-join after reconnecting rebuilds the handlers.
    pub(crate) fn connection_lost(&mut self, error: &BrokerError) {
        error!(error = %error, rooms = self.handlers.len(), "connection to chat service lost");
        self.handlers.clear();
        self.pool.clear();
    }

    /// Re-joins and reconciles every room of every site that isn't
    /// destroyed.
    pub(crate) async fn rejoin_rooms(&mut self) -> Result<(), BrokerError> {
        let names: Vec<SiteName> = self.sites.keys().cloned().collect();
        for site in names {
            let store = &lookup(&self.sites, &site)?.store;
            let rooms = match store.paired().get_not_destroyed().await {
                Ok(paired) => store.group().get_not_destroyed().await.map(|group| (paired, group)),
                Err(e) => Err(e),
            };
            let (paired, group) = match rooms {
                Ok(rooms) => rooms,
                Err(e) => {
                    error!(site = %site, error = %e, "cannot list rooms to re-join");
                    continue;
                }
            };
            info!(site = %site, paired = paired.len(), group = group.len(), "re-joining rooms");

            for room in paired {
                self.rejoin_room(&site, RoomKind::Paired, room.jid, room.password).await?;
            }
            for room in group {
                self.rejoin_room(&site, RoomKind::Group, room.jid, room.password).await?;
            }
        }
        Ok(())
    }

    async fn rejoin_room(
        &mut self,
        site: &SiteName,
        kind: RoomKind,
        jid: RoomJid,
        password: String,
    ) -> Result<(), BrokerError> {
        let settings = &lookup(&self.sites, site)?.settings;
        let handler = RoomHandler::rejoining(
            site.clone(),
            jid.clone(),
            kind,
            settings.nick.clone(),
            password.clone(),
        )
        .with_capacity(settings.min_capacity(kind));
        let request = JoinRequest {
            room: jid.clone(),
            nick: settings.nick.clone(),
            password,
            history: settings.history,
        };
        self.handlers.insert(jid.clone(), handler);

        debug!(site = %site, room = %jid, %kind, "re-joining room");
        if let Err(e) = self.protocol.join_room(request).await {
            if e.is_transport() {
                return Err(e.into());
            }
            error!(site = %site, room = %jid, error = %e, "re-joining room failed; dropping it");
            return self.give_up(&jid).await;
        }

        let replayed = self.protocol.flush_room(&jid, self.mainloop.flush_timeout()).await?;
        debug!(room = %jid, events = replayed.len(), "drained replayed events");
        let mut arrivals = Vec::new();
        for event in replayed {
            if let Some(nick) = self.absorb(event).await? {
                arrivals.push(nick);
            }
        }

        let greeted = self.greet_returning(site, &jid, kind, &arrivals).await;
        let reconciled = match kind {
            RoomKind::Paired => self.reconcile_paired_room(site, &jid).await,
            RoomKind::Group => self.reconcile_group_room(site, &jid).await,
        };
        if let Some(handler) = self.handlers.get_mut(&jid) {
            debug!(room = %jid, presences = ?handler.rejoin_presences(), "rejoin complete");
            handler.clear_rejoin_guard();
        }
        for (outcome, action) in [(greeted, "replaying presences"), (reconciled, "reconciling room")] {
            match outcome {
                Err(e) if e.is_connection_lost() => return Err(e),
                Err(e) => warn!(site = %site, room = %jid, error = %e, "{action} failed"),
                Ok(()) => {}
            }
        }
        Ok(())
    }

    /// Applies an event drained while re-joining. Presences only update
    /// occupancy here; a new occupant's nick is returned so its join can
    /// be replayed once the broker's own presence is known. Replayed
    /// history is not logged a second time.
    async fn absorb(&mut self, event: ProtocolEvent) -> Result<Option<Nick>, BrokerError> {
        match event {
            ProtocolEvent::Joined { room, occupant } => {
                let arrival = self.handlers.get_mut(&room).map(|h| h.observe_join(&occupant));
                Ok((arrival == Some(Arrival::New)).then_some(occupant.nick))
            }
            ProtocolEvent::Left { room, departure } => {
                if let Some(handler) = self.handlers.get_mut(&room) {
                    handler.observe_leave(&departure);
                }
                Ok(None)
            }
            ProtocolEvent::Message { room, .. } => {
                debug!(room = %room, "skipping replayed message");
                Ok(None)
            }
            other => self.dispatch(other).await.map(|()| None),
        }
    }

    /// Runs the joins of occupants found while re-joining through the
    /// state machine with the rejoin guard set. Their status changes and
    /// facts are left to reconciliation; the rest (rejoin events,
    /// moderator grants) applies now.
    async fn greet_returning(
        &mut self,
        site: &SiteName,
        jid: &RoomJid,
        kind: RoomKind,
        arrivals: &[Nick],
    ) -> Result<(), BrokerError> {
        for nick in arrivals {
            let Some(handler) = self.handlers.get(jid) else {
                return Ok(());
            };
            if !handler.occupants().contains(nick) {
                continue;
            }
            let (note, conversation, effects) = match kind {
                RoomKind::Paired => {
                    let occupants = handler.occupants().clone();
                    let room = self.paired_record(site, jid).await?;
                    let step = paired::on_join(&PairedFacts::of(&room), nick, &occupants, true);
                    (step.note, room.conversation, step.effects)
                }
                RoomKind::Group => {
                    let room = self.group_record(site, jid).await?;
                    let step = group::on_join(room.status, nick);
                    (step.note, room.conversation, step.effects)
                }
            };
            log_note(&note, site, jid);
            let effects = effects
                .into_iter()
                .filter(|e| !matches!(e, Effect::RefillPool | Effect::ClearGuard))
                .collect();
            self.apply_effects(site, jid, conversation, effects).await?;
        }
        Ok(())
    }

    async fn reconcile_paired_room(&mut self, site: &SiteName, jid: &RoomJid) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get(jid) else {
            return Ok(());
        };
        let live = handler.live();
        let repo = lookup(&self.sites, site)?.store.paired();
        let room = repo
            .get_by_jid(jid)
            .await?
            .ok_or_else(|| RoomError::Unrecorded(jid.clone()))?;

        let verdict = reconcile_paired(&PairedFacts::of(&room), live);
        report(site, jid, room.status, &verdict, live);
        if verdict.status != room.status {
            repo.set_status(jid, verdict.status).await?;
        }
        Ok(())
    }

    async fn reconcile_group_room(&mut self, site: &SiteName, jid: &RoomJid) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get(jid) else {
            return Ok(());
        };
        let live = handler.live();
        let repo = lookup(&self.sites, site)?.store.group();
        let room = repo
            .get_by_jid(jid)
            .await?
            .ok_or_else(|| RoomError::Unrecorded(jid.clone()))?;

        let verdict = reconcile_group(room.status, room.conversation.is_some(), live);
        report(site, jid, room.status, &verdict, live);
        if verdict.status != room.status {
            repo.set_status(jid, verdict.status).await?;
        }
        Ok(())
    }
}

/// Logs a reconciliation verdict at the level its finding calls for.
fn report<St>(site: &SiteName, jid: &RoomJid, stored: St, verdict: &Verdict<St>, live: usize)
where
    St: fmt::Display + PartialEq + Copy,
{
    let reason = verdict.reason;
    let (from, to) = (stored, verdict.status);
    match verdict.finding {
        Finding::Correct => {
            debug!(site = %site, room = %jid, status = %from, live, "{reason}");
        }
        Finding::Repaired => {
            info!(site = %site, room = %jid, %from, %to, live, "{reason}");
        }
        Finding::Anomaly => {
            error!(site = %site, room = %jid, %from, %to, live, "{reason}");
        }
        Finding::Contradiction => {
            error!(severity = "critical", site = %site, room = %jid, %from, %to, live, "{reason}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomkeeper_store::{GroupStatus, PairedStatus};

    #[test]
    fn test_report_accepts_both_status_kinds() {
        let site = SiteName::from("helpdesk");
        let jid = RoomJid::new("helpdesk_x.0", "muc.local");
        let paired = reconcile_paired(
            &PairedFacts {
                status: PairedStatus::Chatting,
                staff_nick: None,
                client_nick: None,
                clean_exit: false,
            },
            0,
        );
        report(&site, &jid, PairedStatus::Chatting, &paired, 0);

        let group = reconcile_group(GroupStatus::Abandoned, true, 2);
        assert_eq!(group.status, GroupStatus::Chatting);
        report(&site, &jid, GroupStatus::Abandoned, &group, 2);
    }
}
