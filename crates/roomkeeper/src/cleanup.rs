//! The periodic cleanup sweep and room closing.
//!
//! Closing is two-phase: the room is marked `toDestroy` and every
//! occupant kicked; once the last one is gone the broker leaves and the
//! record is marked destroyed. Destroyed records are purged by a later
//! sweep.

use roomkeeper_protocol::{ChatProtocol, RoomJid, SiteName};
use roomkeeper_room::{Command, Phase};
use roomkeeper_store::{
    GroupStatus, Lifecycle, PairedRepository, PairedStatus, RoomKind, RoomRepository, RoomStatus,
    SiteStore,
};
use tracing::{debug, info, warn};

use crate::broker::Broker;
use crate::site::lookup;
use crate::BrokerError;

impl<P: ChatProtocol, S: SiteStore> Broker<P, S> {
    /// Looks for rooms to close in every site and queues them. The main
    /// loop runs this whenever the cleanup alarm goes off.
    ///
    /// Returns whether anything was found, so the alarm can come back
    /// sooner. Only a lost connection is returned as an error.
    pub async fn sweep(&mut self) -> Result<bool, BrokerError> {
        let names: Vec<SiteName> = self.sites.keys().cloned().collect();
        let mut found = false;
        for site in names {
            match self.sweep_site(&site).await {
                Ok(rooms) => found |= rooms > 0,
                Err(e) if e.is_connection_lost() => return Err(e),
                Err(e) => warn!(site = %site, error = %e, "cleanup sweep failed"),
            }
        }
        Ok(found)
    }

    async fn sweep_site(&mut self, site: &SiteName) -> Result<usize, BrokerError> {
        let cleanup = self.mainloop.cleanup();
        let hanging_staff = self.mainloop.hanging_staff();
        let store = &lookup(&self.sites, site)?.store;
        let (paired, group) = (store.paired(), store.group());
        let mut doomed: Vec<RoomJid> = Vec::new();

        for room in paired.get_to_destroy().await? {
            debug!(site = %site, room = %room.jid, "room marked for closing");
            doomed.push(room.jid);
        }
        for status in PairedStatus::ALL.into_iter().filter(|s| s.is_lingering()) {
            for room in paired.get_timed_out(status, cleanup).await? {
                info!(site = %site, room = %room.jid, %status, "room lingered too long");
                doomed.push(room.jid);
            }
        }
        for room in paired.get_hanging_staff_start(hanging_staff).await? {
            info!(
                site = %site,
                room = %room.jid,
                staff = ?room.staff_nick,
                "staff waited too long for a client"
            );
            doomed.push(room.jid);
        }

        for room in group.get_to_destroy().await? {
            debug!(site = %site, room = %room.jid, "room marked for closing");
            doomed.push(room.jid);
        }
        for status in GroupStatus::ALL.into_iter().filter(|s| s.is_lingering()) {
            for room in group.get_timed_out(status, cleanup).await? {
                info!(site = %site, room = %room.jid, %status, "room lingered too long");
                doomed.push(room.jid);
            }
        }

        let purged = paired.delete_closed().await? + group.delete_closed().await?;
        if purged > 0 {
            debug!(site = %site, purged, "purged destroyed rooms");
        }

        let found = doomed.len();
        for jid in doomed {
            self.queue.push(Command::CloseRoom { site: site.clone(), jid });
        }
        Ok(found)
    }

    /// Starts closing one room: marks it `toDestroy` and kicks everyone.
    /// A room the broker isn't in is retired right away.
    pub(crate) async fn close_room(&mut self, site: &SiteName, jid: &RoomJid) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get_mut(jid) else {
            debug!(site = %site, room = %jid, "closing room the broker isn't in");
            return self.retire_unattended(site, jid).await;
        };
        if handler.phase() == Phase::Creating {
            debug!(room = %jid, "not closing a room still being created");
            return Ok(());
        }
        let kind = handler.kind;
        let occupants = handler.begin_closing();
        info!(site = %site, room = %jid, occupants = occupants.len(), "closing room");

        self.set_to_destroy(site, kind, jid).await?;
        if occupants.is_empty() {
            return self.finish_closing(jid).await;
        }
        for nick in occupants {
            self.kick(jid, &nick).await?;
        }
        Ok(())
    }

    /// Closes every room of `site` whose record is in `status`.
    pub(crate) async fn close_rooms(&mut self, site: &SiteName, status: RoomStatus) -> Result<(), BrokerError> {
        let store = &lookup(&self.sites, site)?.store;
        let jids: Vec<RoomJid> = match status {
            RoomStatus::Paired(s) => store.paired().get_by_status(s).await?.into_iter().map(|r| r.jid).collect(),
            RoomStatus::Group(s) => store.group().get_by_status(s).await?.into_iter().map(|r| r.jid).collect(),
        };
        info!(site = %site, %status, rooms = jids.len(), "closing rooms by status");
        for jid in jids {
            self.close_room(site, &jid).await?;
        }
        Ok(())
    }

    /// Starts closing every configured room of `site` the broker is in.
    pub(crate) async fn close_all(&mut self, site: &SiteName) -> Result<(), BrokerError> {
        let jids: Vec<RoomJid> = self
            .handlers
            .values()
            .filter(|h| h.site == *site && h.phase() == Phase::Active)
            .map(|h| h.jid.clone())
            .collect();
        for jid in jids {
            self.close_room(site, &jid).await?;
        }
        Ok(())
    }

    /// Second phase of closing: the room is empty, so the broker leaves
    /// and the record is marked destroyed.
    pub(crate) async fn finish_closing(&mut self, jid: &RoomJid) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.get(jid) else {
            return Ok(());
        };
        let (site, kind) = (handler.site.clone(), handler.kind);
        let store = &lookup(&self.sites, &site)?.store;
        match kind {
            RoomKind::Paired => store.paired().destroyed(jid).await?,
            RoomKind::Group => store.group().destroyed(jid).await?,
        }
        self.handlers.remove(jid);

        if let Err(e) = self.protocol.leave(jid).await {
            if e.is_transport() {
                return Err(e.into());
            }
            debug!(room = %jid, error = %e, "leaving room failed");
        }
        info!(site = %site, room = %jid, %kind, "room closed");
        Ok(())
    }

    pub(crate) async fn set_to_destroy(&self, site: &SiteName, kind: RoomKind, jid: &RoomJid) -> Result<(), BrokerError> {
        let store = &lookup(&self.sites, site)?.store;
        match kind {
            RoomKind::Paired => store.paired().set_status(jid, PairedStatus::TO_DESTROY).await?,
            RoomKind::Group => store.group().set_status(jid, GroupStatus::TO_DESTROY).await?,
        }
        Ok(())
    }

    /// Marks a room destroyed without leaving it: the broker holds no
    /// handler, so it isn't present.
    async fn retire_unattended(&self, site: &SiteName, jid: &RoomJid) -> Result<(), BrokerError> {
        let store = &lookup(&self.sites, site)?.store;
        if store.paired().get_by_jid(jid).await?.is_some() {
            store.paired().destroyed(jid).await?;
        } else if store.group().get_by_jid(jid).await?.is_some() {
            store.group().destroyed(jid).await?;
        } else {
            debug!(site = %site, room = %jid, "no record to retire");
            return Ok(());
        }
        info!(site = %site, room = %jid, "room retired");
        Ok(())
    }
}
