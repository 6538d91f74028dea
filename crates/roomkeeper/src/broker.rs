//! The broker context object and its main loop.
//!
//! One [`Broker`] owns the protocol session, every site's store, the live
//! room handlers, the pool manager, the task queue and the cleanup alarm.
//! It runs on a single task and takes `&mut self` everywhere, so nothing in
//! here needs a lock. Other tasks talk to it through a [`BrokerHandle`].
//!
//! Each turn of the loop:
//!   1. Apply control messages (pool resize, shutdown)
//!   2. Drain the task queue
//!   3. Wait up to `timeout` for one protocol event and dispatch it
//!   4. Sweep if the cleanup alarm went off
//!
//! A lost connection at any step sends the loop into the reconnect cycle
//! (see `supervisor.rs`).

use std::collections::{BTreeMap, HashMap};

use roomkeeper_protocol::{ChatProtocol, RoomJid, SiteName};
use roomkeeper_room::{Command, PoolManager, RoomHandler, TaskQueue};
use roomkeeper_store::{RoomStatus, SiteStore};
use roomkeeper_tick::{AlarmConfig, CleanupAlarm};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::config::checked_pool_size;
use crate::site::Site;
use crate::{BrokerConfig, BrokerError, ConfigError, MainloopConfig, SiteSettings};

// ---------------------------------------------------------------------------
// Control channel
// ---------------------------------------------------------------------------

/// Requests other tasks can send to a running broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Control {
    /// Change a site's pool size. Applied on the next fill pass.
    Resize { site: SiteName, size: i64 },
    /// Close every room of a site currently in `status`.
    CloseRooms { site: SiteName, status: RoomStatus },
    /// Close every room, disconnect and return from [`Broker::run`].
    Shutdown,
}

/// Cloneable handle to a broker running on another task.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::UnboundedSender<Control>,
}

impl BrokerHandle {
    pub fn resize_pool(&self, site: &SiteName, size: i64) -> Result<(), BrokerError> {
        self.send(Control::Resize { site: site.clone(), size })
    }

    pub fn close_rooms(&self, site: &SiteName, status: RoomStatus) -> Result<(), BrokerError> {
        self.send(Control::CloseRooms { site: site.clone(), status })
    }

    pub fn shutdown(&self) -> Result<(), BrokerError> {
        self.send(Control::Shutdown)
    }

    fn send(&self, control: Control) -> Result<(), BrokerError> {
        self.tx.send(control).map_err(|_| BrokerError::Stopped)
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Collects the loop settings and the sites of a [`Broker`].
pub struct BrokerBuilder<S> {
    mainloop: MainloopConfig,
    sites: Vec<(SiteSettings, S)>,
}

impl<S: SiteStore> BrokerBuilder<S> {
    pub fn new() -> Self {
        Self { mainloop: MainloopConfig::default(), sites: Vec::new() }
    }

    /// Takes the loop settings and every usable site from `config`;
    /// `store_for` opens each site's store.
    pub fn from_config(config: &BrokerConfig, mut store_for: impl FnMut(&SiteSettings) -> S) -> Self {
        let mut builder = Self::new().mainloop(config.mainloop.clone());
        for settings in config.sites() {
            let store = store_for(&settings);
            builder = builder.site(settings, store);
        }
        builder
    }

    pub fn mainloop(mut self, mainloop: MainloopConfig) -> Self {
        self.mainloop = mainloop;
        self
    }

    pub fn site(mut self, settings: SiteSettings, store: S) -> Self {
        self.sites.push((settings, store));
        self
    }

    pub fn build<P: ChatProtocol>(self, protocol: P) -> Result<Broker<P, S>, BrokerError> {
        let mut sites = BTreeMap::new();
        for (settings, store) in self.sites {
            let name = settings.name.clone();
            if sites.insert(name.clone(), Site { settings, store }).is_some() {
                warn!(site = %name, "site registered twice; keeping the last");
            }
        }
        if sites.is_empty() {
            return Err(BrokerError::NoSites);
        }

        let (control_tx, control) = mpsc::unbounded_channel();
        let alarm = CleanupAlarm::new(AlarmConfig::with_interval(self.mainloop.cleanup()));
        Ok(Broker {
            protocol,
            sites,
            handlers: HashMap::new(),
            pool: PoolManager::new(),
            queue: TaskQueue::new(),
            alarm,
            mainloop: self.mainloop,
            control,
            control_tx,
            connect_failures: 0,
        })
    }
}

impl<S: SiteStore> Default for BrokerBuilder<S> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Broker
// ---------------------------------------------------------------------------

/// Outcome of one turn of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Turn {
    /// Something was processed.
    Busy,
    /// The wait for an event timed out with nothing queued.
    Idle,
    /// A shutdown was requested.
    Stopped,
}

pub struct Broker<P: ChatProtocol, S: SiteStore> {
    pub(crate) protocol: P,
    pub(crate) sites: BTreeMap<SiteName, Site<S>>,
    /// One handler per room the broker is present in (or joining).
    pub(crate) handlers: HashMap<RoomJid, RoomHandler>,
    pub(crate) pool: PoolManager,
    pub(crate) queue: TaskQueue,
    pub(crate) alarm: CleanupAlarm,
    pub(crate) mainloop: MainloopConfig,
    control: mpsc::UnboundedReceiver<Control>,
    control_tx: mpsc::UnboundedSender<Control>,
    /// Failed connection attempts since the process started.
    pub(crate) connect_failures: u32,
}

impl<P: ChatProtocol, S: SiteStore> Broker<P, S> {
    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle { tx: self.control_tx.clone() }
    }

    /// Connects, then runs until a shutdown is requested. Returns once all
    /// rooms are closed and the session is disconnected.
    pub async fn run(&mut self) -> Result<(), BrokerError> {
        info!(sites = self.sites.len(), "roomkeeper broker starting");
        if !self.start().await {
            info!("shutdown requested before the broker connected");
            return Ok(());
        }
        loop {
            if self.turn().await? == Turn::Stopped {
                break;
            }
        }
        self.shutdown().await
    }

    /// Connects (retrying until it succeeds) and queues the initial re-join
    /// and pool fill. Returns `false` if a shutdown was requested first.
    pub async fn start(&mut self) -> bool {
        self.establish(false).await
    }

    /// Runs turns until the queue is empty and one wait for an event timed
    /// out. Also returns when a shutdown is requested.
    pub async fn settle(&mut self) -> Result<(), BrokerError> {
        loop {
            match self.turn().await? {
                Turn::Busy => {}
                Turn::Idle if self.queue.is_empty() => return Ok(()),
                Turn::Idle => {}
                Turn::Stopped => return Ok(()),
            }
        }
    }

    pub(crate) async fn turn(&mut self) -> Result<Turn, BrokerError> {
        if !self.take_control() {
            return Ok(Turn::Stopped);
        }
        match self.pump().await {
            Ok(busy) => Ok(if busy { Turn::Busy } else { Turn::Idle }),
            Err(e) if e.is_connection_lost() => {
                self.connection_lost(&e);
                if self.establish(true).await {
                    Ok(Turn::Busy)
                } else {
                    Ok(Turn::Stopped)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Steps 2-4 of a turn. Only a lost connection is returned as an error;
    /// everything else is logged where it happens.
    async fn pump(&mut self) -> Result<bool, BrokerError> {
        let mut busy = self.drain_queue().await?;

        if let Some(event) = self.protocol.next_event(self.mainloop.timeout()).await? {
            self.dispatch(event).await?;
            busy = true;
        }

        if self.alarm.is_due() {
            let swept = self.sweep().await;
            self.alarm.rearm(matches!(swept, Ok(true)));
            busy |= swept?;
        }
        Ok(busy)
    }

    /// Runs queued commands, including those queued while draining.
    async fn drain_queue(&mut self) -> Result<bool, BrokerError> {
        let mut ran = false;
        while let Some(command) = self.queue.pop() {
            ran = true;
            if let Err(e) = self.execute(command.clone()).await {
                if e.is_connection_lost() {
                    // A fresh re-join is queued on reconnect.
                    if command != Command::RejoinRooms {
                        self.queue.push_front(command);
                    }
                    return Err(e);
                }
                warn!(?command, error = %e, "command failed");
            }
        }
        Ok(ran)
    }

    async fn execute(&mut self, command: Command) -> Result<(), BrokerError> {
        debug!(?command, "running command");
        match command {
            Command::FillPool(Some(site)) => self.fill_pool(&site).await,
            Command::FillPool(None) => self.fill_all().await,
            Command::RejoinRooms => self.rejoin_rooms().await,
            Command::CloseRoom { site, jid } => self.close_room(&site, &jid).await,
            Command::CloseRooms { site, status } => self.close_rooms(&site, status).await,
        }
    }

    /// Applies pending control messages. Returns `false` on shutdown.
    pub(crate) fn take_control(&mut self) -> bool {
        while let Ok(control) = self.control.try_recv() {
            match control {
                Control::Resize { site, size } => {
                    if let Err(e) = self.resize_pool(&site, size) {
                        warn!(site = %site, error = %e, "pool resize refused");
                    }
                }
                Control::CloseRooms { site, status } => {
                    self.queue.push(Command::CloseRooms { site, status });
                }
                Control::Shutdown => return false,
            }
        }
        true
    }

    /// Changes a site's pool size and schedules a fill pass. Shrinking
    /// never closes pooled rooms; the pool drains as rooms are taken.
    pub fn resize_pool(&mut self, site: &SiteName, size: i64) -> Result<(), ConfigError> {
        let entry = self
            .sites
            .get_mut(site)
            .ok_or_else(|| ConfigError::UnknownSite(site.to_string()))?;
        let size = checked_pool_size(site.as_str(), size)?;
        info!(site = %site, from = entry.settings.pool_size, to = size, "pool resized");
        entry.settings.pool_size = size;
        self.queue.push(Command::FillPool(Some(site.clone())));
        Ok(())
    }

    /// Closes every room, then disconnects.
    ///
    /// Occupants are kicked and their departures awaited for a while; a
    /// room still occupied after that stays `toDestroy` and is closed
    /// after the next start.
    pub async fn shutdown(&mut self) -> Result<(), BrokerError> {
        info!("shutting down, closing all rooms");
        let names: Vec<SiteName> = self.sites.keys().cloned().collect();
        for site in &names {
            if let Err(e) = self.close_all(site).await {
                if e.is_connection_lost() {
                    warn!(error = %e, "connection lost during shutdown");
                    self.protocol.disconnect().await;
                    return Ok(());
                }
                warn!(site = %site, error = %e, "closing rooms failed");
            }
        }
        self.abandon_all_creations().await;

        if let Err(e) = self.await_closing().await {
            warn!(error = %e, "connection lost while closing rooms");
        }
        let stuck = self.handlers.values().filter(|h| h.is_closing()).count();
        if stuck > 0 {
            warn!(rooms = stuck, "leaving occupied rooms behind; they will be closed after restart");
        }
        self.protocol.disconnect().await;
        self.handlers.clear();
        info!("roomkeeper broker stopped");
        Ok(())
    }

    /// Processes events until no room is closing or the service goes quiet.
    async fn await_closing(&mut self) -> Result<(), BrokerError> {
        while self.handlers.values().any(|h| h.is_closing()) {
            match self.protocol.next_event(self.mainloop.flush_timeout()).await? {
                Some(event) => self.dispatch(event).await?,
                None => break,
            }
        }
        Ok(())
    }

    // -- Accessors ---------------------------------------------------------

    pub fn site_settings(&self, site: &SiteName) -> Option<&SiteSettings> {
        self.sites.get(site).map(|s| &s.settings)
    }

    pub fn site_names(&self) -> impl Iterator<Item = &SiteName> {
        self.sites.keys()
    }

    /// Rooms the broker currently holds a handler for.
    pub fn live_rooms(&self) -> usize {
        self.handlers.len()
    }

    pub fn handler(&self, jid: &RoomJid) -> Option<&RoomHandler> {
        self.handlers.get(jid)
    }

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    pub fn connect_failures(&self) -> u32 {
        self.connect_failures
    }

    pub fn protocol(&self) -> &P {
        &self.protocol
    }
}
