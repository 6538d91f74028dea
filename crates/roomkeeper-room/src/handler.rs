//! In-memory view of one room the broker is present in.
//!
//! A handler exists from the moment the broker asks to join (or create) a
//! room until it leaves. It owns nothing persistent: statuses and facts
//! live in the store, the handler only tracks what the broker sees live.

use std::collections::{BTreeSet, HashSet};

use roomkeeper_protocol::{Affiliation, Departure, Nick, Occupant, RoomJid, SiteName};
use roomkeeper_store::RoomKind;

/// Occupant limit used for paired rooms (staff, client, broker).
pub const PAIRED_CAPACITY: usize = 3;
/// Occupant limit used for group rooms.
pub const GROUP_CAPACITY: usize = 30;

/// Where the handler is in the room's life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// The broker created the room and is configuring it.
    Creating,
    /// The room is configured and recorded.
    Active,
}

/// What a join presence meant for the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arrival {
    /// The broker's own presence.
    Own,
    /// A nick that was already present (presence update).
    Repeat,
    /// A new occupant.
    New,
}

/// What a leave presence meant for the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// The broker's own presence.
    Own,
    /// A nick that wasn't present (duplicate leave).
    Unknown,
    /// An occupant the broker kicked, or anyone while closing down.
    Expected { remaining: usize },
    /// A regular departure.
    Departed { remaining: usize },
}

#[derive(Debug, Clone)]
pub struct RoomHandler {
    pub site: SiteName,
    pub jid: RoomJid,
    pub kind: RoomKind,
    /// The broker's nick in this room.
    pub nick: Nick,
    pub password: String,
    pub max_occupants: usize,
    phase: Phase,
    occupants: BTreeSet<Nick>,
    kicked: HashSet<Nick>,
    closing_down: bool,
    /// Presences still expected after re-joining; `None` when not
    /// re-joining.
    rejoin_guard: Option<u32>,
    affiliation: Affiliation,
    configured: bool,
}

impl RoomHandler {
    fn new(site: SiteName, jid: RoomJid, kind: RoomKind, nick: Nick, password: String) -> Self {
        let max_occupants = match kind {
            RoomKind::Paired => PAIRED_CAPACITY,
            RoomKind::Group => GROUP_CAPACITY,
        };
        Self {
            site,
            jid,
            kind,
            nick,
            password,
            max_occupants,
            phase: Phase::Creating,
            occupants: BTreeSet::new(),
            kicked: HashSet::new(),
            closing_down: false,
            rejoin_guard: None,
            affiliation: Affiliation::None,
            configured: false,
        }
    }

    /// Handler for a room the broker is about to create.
    pub fn creating(site: SiteName, jid: RoomJid, kind: RoomKind, nick: Nick, password: String) -> Self {
        Self::new(site, jid, kind, nick, password)
    }

    /// Handler for a recorded room the broker is re-joining. The room was
    /// configured when it was created; the rejoin guard is set.
    pub fn rejoining(site: SiteName, jid: RoomJid, kind: RoomKind, nick: Nick, password: String) -> Self {
        let mut handler = Self::new(site, jid, kind, nick, password);
        handler.phase = Phase::Active;
        handler.configured = true;
        handler.rejoin_guard = Some(0);
        handler
    }

    pub fn with_capacity(mut self, max_occupants: usize) -> Self {
        self.max_occupants = max_occupants;
        self
    }

    // -- Presence ----------------------------------------------------------

    pub fn observe_join(&mut self, occupant: &Occupant) -> Arrival {
        if occupant.nick == self.nick {
            self.affiliation = occupant.affiliation;
            return Arrival::Own;
        }
        if let Some(seen) = self.rejoin_guard.as_mut() {
            *seen += 1;
        }
        if self.occupants.insert(occupant.nick.clone()) {
            Arrival::New
        } else {
            Arrival::Repeat
        }
    }

    pub fn observe_leave(&mut self, departure: &Departure) -> Exit {
        if departure.nick == self.nick {
            return Exit::Own;
        }
        if !self.occupants.remove(&departure.nick) {
            return Exit::Unknown;
        }
        let remaining = self.occupants.len();
        if self.kicked.remove(&departure.nick) || self.closing_down {
            Exit::Expected { remaining }
        } else {
            Exit::Departed { remaining }
        }
    }

    /// Live occupants, the broker excluded.
    pub fn occupants(&self) -> &BTreeSet<Nick> {
        &self.occupants
    }

    pub fn live(&self) -> usize {
        self.occupants.len()
    }

    pub fn mark_kicked(&mut self, nick: &Nick) {
        self.kicked.insert(nick.clone());
    }

    // -- Lifecycle ---------------------------------------------------------

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn mark_configured(&mut self) {
        self.configured = true;
        self.phase = Phase::Active;
    }

    /// The service recreated the room empty and locked; it has to be
    /// configured again before anyone can enter.
    pub fn mark_locked(&mut self) {
        self.configured = false;
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    pub fn affiliation(&self) -> Affiliation {
        self.affiliation
    }

    /// The broker may change occupants' roles here.
    pub fn may_grant_roles(&self) -> bool {
        self.configured && self.affiliation.can_grant_roles()
    }

    /// Starts closing: every later leave is expected. Returns the nicks to
    /// kick.
    pub fn begin_closing(&mut self) -> Vec<Nick> {
        self.closing_down = true;
        self.occupants.iter().cloned().collect()
    }

    pub fn is_closing(&self) -> bool {
        self.closing_down
    }

    // -- Rejoin guard ------------------------------------------------------

    pub fn rejoin_expected(&self) -> bool {
        self.rejoin_guard.is_some()
    }

    /// Presences seen since the guard was set.
    pub fn rejoin_presences(&self) -> Option<u32> {
        self.rejoin_guard
    }

    pub fn clear_rejoin_guard(&mut self) {
        self.rejoin_guard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler() -> RoomHandler {
        RoomHandler::creating(
            SiteName::from("site"),
            RoomJid::new("site_x.0", "muc.local"),
            RoomKind::Paired,
            Nick::from("keeper"),
            "pw".into(),
        )
    }

    fn occupant(nick: &str, affiliation: Affiliation) -> Occupant {
        Occupant { nick: Nick::from(nick), affiliation }
    }

    #[test]
    fn test_own_presence_sets_affiliation_and_is_not_counted() {
        let mut h = handler();
        assert_eq!(h.observe_join(&occupant("keeper", Affiliation::Owner)), Arrival::Own);
        assert_eq!(h.live(), 0);
        assert_eq!(h.affiliation(), Affiliation::Owner);
        assert!(!h.may_grant_roles(), "not configured yet");
        h.mark_configured();
        assert!(h.may_grant_roles());
        assert_eq!(h.observe_leave(&Departure::silent(Nick::from("keeper"))), Exit::Own);
    }

    #[test]
    fn test_join_and_leave_track_occupancy() {
        let mut h = handler();
        assert_eq!(h.observe_join(&occupant("a", Affiliation::None)), Arrival::New);
        assert_eq!(h.observe_join(&occupant("a", Affiliation::None)), Arrival::Repeat);
        assert_eq!(h.observe_join(&occupant("b", Affiliation::None)), Arrival::New);
        assert_eq!(h.live(), 2);

        assert_eq!(
            h.observe_leave(&Departure::silent(Nick::from("a"))),
            Exit::Departed { remaining: 1 }
        );
        assert_eq!(h.observe_leave(&Departure::silent(Nick::from("a"))), Exit::Unknown);
    }

    #[test]
    fn test_kicked_and_closing_leaves_are_expected() {
        let mut h = handler();
        h.observe_join(&occupant("a", Affiliation::None));
        h.observe_join(&occupant("b", Affiliation::None));
        h.mark_kicked(&Nick::from("a"));
        assert_eq!(
            h.observe_leave(&Departure::silent(Nick::from("a"))),
            Exit::Expected { remaining: 1 }
        );

        let to_kick = h.begin_closing();
        assert_eq!(to_kick, vec![Nick::from("b")]);
        assert_eq!(
            h.observe_leave(&Departure::silent(Nick::from("b"))),
            Exit::Expected { remaining: 0 }
        );
    }

    #[test]
    fn test_rejoining_handler_counts_presences_until_cleared() {
        let mut h = RoomHandler::rejoining(
            SiteName::from("site"),
            RoomJid::new("site_x.0", "muc.local"),
            RoomKind::Group,
            Nick::from("keeper"),
            "pw".into(),
        );
        assert!(h.is_configured());
        assert_eq!(h.max_occupants, GROUP_CAPACITY);
        assert!(h.rejoin_expected());
        h.observe_join(&occupant("a", Affiliation::None));
        h.observe_join(&occupant("keeper", Affiliation::Admin));
        assert_eq!(h.rejoin_presences(), Some(1));
        h.clear_rejoin_guard();
        assert!(!h.rejoin_expected());

        h.mark_locked();
        assert!(!h.may_grant_roles());
        assert_eq!(h.phase(), Phase::Active);
    }
}
