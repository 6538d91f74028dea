//! Keeping every site's room pools topped up.

use roomkeeper_protocol::{ChatProtocol, JoinRequest, RoomJid, SiteName};
use roomkeeper_room::{Phase, PoolManager, RoomHandler};
use roomkeeper_store::{RoomKind, RoomRepository, SiteStore};
use tracing::{debug, error, info, warn};

use crate::broker::Broker;
use crate::site::lookup;
use crate::{BrokerError, SiteSettings};

impl<P: ChatProtocol, S: SiteStore> Broker<P, S> {
    pub(crate) async fn fill_all(&mut self) -> Result<(), BrokerError> {
        let names: Vec<SiteName> = self.sites.keys().cloned().collect();
        for site in names {
            if let Err(e) = self.fill_pool(&site).await {
                if e.is_connection_lost() {
                    return Err(e);
                }
                warn!(site = %site, error = %e, "filling pool failed");
            }
        }
        Ok(())
    }

    /// Starts creating as many rooms of each kind as the site's pool lacks,
    /// counting rooms already being created.
    pub(crate) async fn fill_pool(&mut self, site: &SiteName) -> Result<(), BrokerError> {
        let entry = lookup(&self.sites, site)?;
        let settings = entry.settings.clone();
        let available = [
            (RoomKind::Paired, entry.store.paired().get_available().await?.len()),
            (RoomKind::Group, entry.store.group().get_available().await?.len()),
        ];

        for (kind, available) in available {
            let deficit = self.pool.deficit(site, kind, settings.pool_size, available);
            if deficit == 0 {
                debug!(site = %site, %kind, available, "pool full");
                continue;
            }
            info!(
                site = %site,
                %kind,
                pool_size = settings.pool_size,
                available,
                in_flight = self.pool.in_flight(site, kind),
                creating = deficit,
                "filling pool"
            );
            for _ in 0..deficit {
                self.create_room(&settings, kind).await?;
            }
        }
        Ok(())
    }

    /// Joins a fresh room, which creates it. Configuration follows once
    /// the service reports the room created.
    async fn create_room(&mut self, settings: &SiteSettings, kind: RoomKind) -> Result<(), BrokerError> {
        let node = self.pool.new_room_name(&settings.name);
        let jid = RoomJid::new(&node, &settings.domain);
        let password = PoolManager::new_password();

        let handler = RoomHandler::creating(
            settings.name.clone(),
            jid.clone(),
            kind,
            settings.nick.clone(),
            password.clone(),
        )
        .with_capacity(settings.min_capacity(kind));
        self.handlers.insert(jid.clone(), handler);
        self.pool.begin(&settings.name, kind, jid.clone());

        debug!(site = %settings.name, room = %jid, %kind, "creating room");
        let request = JoinRequest {
            room: jid.clone(),
            nick: settings.nick.clone(),
            password,
            history: settings.history,
        };
        if let Err(e) = self.protocol.join_room(request).await {
            if e.is_transport() {
                return Err(e.into());
            }
            error!(site = %settings.name, room = %jid, error = %e, "creating room failed");
            self.give_up(&jid).await?;
        }
        Ok(())
    }

    /// Stops tracking a room and leaves it.
    ///
    /// A room being created just releases its pool slot. A recorded room
    /// is marked `toDestroy` so the next sweep retires the record.
    pub(crate) async fn give_up(&mut self, jid: &RoomJid) -> Result<(), BrokerError> {
        let Some(handler) = self.handlers.remove(jid) else {
            return Ok(());
        };
        let was_creating = self.pool.finish(jid);
        if handler.phase() == Phase::Active && !was_creating {
            if let Err(e) = self.set_to_destroy(&handler.site, handler.kind, jid).await {
                warn!(room = %jid, error = %e, "cannot mark abandoned room for closing");
            }
        }
        if let Err(e) = self.protocol.leave(jid).await {
            if e.is_transport() {
                return Err(e.into());
            }
            debug!(room = %jid, error = %e, "leaving room failed");
        }
        Ok(())
    }

    /// Gives up every room still being created. Used on shutdown.
    pub(crate) async fn abandon_all_creations(&mut self) {
        let creating: Vec<RoomJid> = self
            .handlers
            .values()
            .filter(|h| h.phase() == Phase::Creating)
            .map(|h| h.jid.clone())
            .collect();
        for jid in creating {
            debug!(room = %jid, "abandoning room creation");
            if let Err(e) = self.give_up(&jid).await {
                warn!(room = %jid, error = %e, "abandoning room creation failed");
            }
        }
    }
}
