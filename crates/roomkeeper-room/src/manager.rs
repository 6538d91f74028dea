//! Room pool manager: names new rooms and keeps track of rooms being
//! created, so a refill never asks for more rooms than the pool lacks.

use std::collections::HashMap;

use rand::Rng;
use roomkeeper_protocol::{RoomJid, SiteName};
use roomkeeper_store::RoomKind;

/// Rooms of one site and kind whose creation is under way.
type Slot = (SiteName, RoomKind);

#[derive(Debug, Default)]
pub struct PoolManager {
    last_base: Option<String>,
    uniquifier: u32,
    in_flight: HashMap<RoomJid, Slot>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh, unguessable room node name: `{site}_{token}.{n}`.
    pub fn new_room_name(&mut self, site: &SiteName) -> String {
        self.name_with_token(site, &random_hex())
    }

    fn name_with_token(&mut self, site: &SiteName, token: &str) -> String {
        let base = format!("{}_{}", site.as_str().trim(), token);
        if self.last_base.as_deref() == Some(base.as_str()) {
            self.uniquifier += 1;
        } else {
            self.uniquifier = 0;
        }
        let name = format!("{base}.{}", self.uniquifier);
        self.last_base = Some(base);
        name
    }

    /// A fresh room password.
    pub fn new_password() -> String {
        random_hex()
    }

    /// How many rooms to create so that `available` plus the rooms being
    /// created reaches `pool_size`.
    pub fn deficit(&self, site: &SiteName, kind: RoomKind, pool_size: usize, available: usize) -> usize {
        pool_size.saturating_sub(available + self.in_flight(site, kind))
    }

    pub fn begin(&mut self, site: &SiteName, kind: RoomKind, jid: RoomJid) {
        self.in_flight.insert(jid, (site.clone(), kind));
    }

    /// Releases the slot of a room whose creation finished or failed.
    /// Returns `false` if the room wasn't being created.
    pub fn finish(&mut self, jid: &RoomJid) -> bool {
        self.in_flight.remove(jid).is_some()
    }

    pub fn in_flight(&self, site: &SiteName, kind: RoomKind) -> usize {
        self.in_flight
            .values()
            .filter(|(s, k)| s == site && *k == kind)
            .count()
    }

    /// Forgets every creation under way. Used when the connection drops.
    pub fn clear(&mut self) {
        self.in_flight.clear();
    }
}

/// 32 random lowercase hex characters.
fn random_hex() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
