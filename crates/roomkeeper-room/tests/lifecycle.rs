//! Lifecycle tests driving the state machines through a room handler the
//! way the broker does, without a protocol or a store.

use roomkeeper_protocol::{Affiliation, Departure, Nick, Occupant, RoomJid, SiteName};
use roomkeeper_room::{
    Arrival, Effect, Exit, Fact, Finding, PairedFacts, PoolManager, RoomHandler, group, paired,
    reconcile_group, reconcile_paired,
};
use roomkeeper_store::{GroupStatus, PairedStatus, RoomKind};

// =========================================================================
// A minimal paired-room driver: applies steps to in-memory facts.
// =========================================================================

struct PairedRoomSim {
    facts: PairedFacts,
    handler: RoomHandler,
    kicks: Vec<Nick>,
}

impl PairedRoomSim {
    fn new() -> Self {
        Self {
            facts: PairedFacts {
                status: PairedStatus::Available,
                staff_nick: None,
                client_nick: None,
                clean_exit: false,
            },
            handler: RoomHandler::creating(
                SiteName::from("site"),
                RoomJid::new("site_t.0", "muc.local"),
                RoomKind::Paired,
                Nick::from("keeper"),
                "pw".into(),
            ),
            kicks: Vec::new(),
        }
    }

    fn join(&mut self, nick: &str) {
        let occupant = Occupant { nick: Nick::from(nick), affiliation: Affiliation::None };
        if self.handler.observe_join(&occupant) != Arrival::New {
            return;
        }
        let step = paired::on_join(
            &self.facts,
            &occupant.nick,
            self.handler.occupants(),
            self.handler.rejoin_expected(),
        );
        self.apply(step);
    }

    fn leave(&mut self, nick: &str, clean: bool) -> Exit {
        let departure = if clean {
            Departure::clean(Nick::from(nick))
        } else {
            Departure::silent(Nick::from(nick))
        };
        let exit = self.handler.observe_leave(&departure);
        if let Exit::Departed { .. } = exit {
            let step = paired::on_leave(&self.facts, &departure.nick, clean, self.handler.occupants());
            self.apply(step);
        }
        exit
    }

    fn apply(&mut self, step: roomkeeper_room::Step<PairedStatus>) {
        if let Some(status) = step.status {
            self.facts.status = status;
        }
        for fact in step.facts {
            match fact {
                Fact::StaffJoined(n) => self.facts.staff_nick = Some(n),
                Fact::ClientJoined(n) => self.facts.client_nick = Some(n),
                Fact::LeftClean => self.facts.clean_exit = true,
                Fact::LeftDirty => {}
            }
        }
        for effect in step.effects {
            match effect {
                Effect::Kick(n) => {
                    self.handler.mark_kicked(&n);
                    self.kicks.push(n.clone());
                    // The service confirms the kick with a removal.
                    let removal = Departure { nick: n, status: None, removed: true };
                    assert!(matches!(self.handler.observe_leave(&removal), Exit::Expected { .. }));
                }
                Effect::ClearGuard => self.handler.clear_rejoin_guard(),
                _ => {}
            }
        }
    }
}

// =========================================================================
// Properties
// =========================================================================

#[derive(Clone, Copy, Debug)]
enum Ev {
    Join(&'static str),
    Leave(&'static str, bool),
}

const ALPHABET: [Ev; 6] = [
    Ev::Join("a"),
    Ev::Join("b"),
    Ev::Leave("a", true),
    Ev::Leave("a", false),
    Ev::Leave("b", true),
    Ev::Leave("b", false),
];

/// Every sequence of up to `max_len` events.
fn sequences(max_len: usize) -> Vec<Vec<Ev>> {
    let mut all = vec![Vec::new()];
    let mut frontier: Vec<Vec<Ev>> = vec![Vec::new()];
    for _ in 0..max_len {
        frontier = frontier
            .iter()
            .flat_map(|seq| {
                ALPHABET.iter().map(move |ev| {
                    let mut s = seq.clone();
                    s.push(*ev);
                    s
                })
            })
            .collect();
        all.extend(frontier.iter().cloned());
    }
    all
}

#[test]
fn test_fresh_room_chats_iff_two_distinct_participants_joined_and_stayed() {
    for seq in sequences(4) {
        let joins = |n: &str| seq.iter().filter(|e| matches!(e, Ev::Join(x) if *x == n)).count();
        if joins("a") > 1 || joins("b") > 1 {
            continue;
        }

        let mut sim = PairedRoomSim::new();
        let mut joined = std::collections::HashSet::new();
        let mut left = std::collections::HashSet::new();
        for ev in &seq {
            match *ev {
                Ev::Join(n) => {
                    joined.insert(n);
                    sim.join(n);
                }
                Ev::Leave(n, clean) => {
                    if !matches!(sim.leave(n, clean), Exit::Unknown) {
                        left.insert(n);
                    }
                }
            }
        }

        let expect_chatting = joined.len() == 2 && left.is_empty() && sim.kicks.is_empty();
        assert_eq!(
            sim.facts.status == PairedStatus::Chatting,
            expect_chatting,
            "sequence {seq:?} ended in {}",
            sim.facts.status
        );
    }
}

#[test]
fn test_duplicate_leave_of_kicked_occupant_is_noop() {
    let mut sim = PairedRoomSim::new();
    sim.join("staff");
    sim.join("client");
    sim.leave("client", true);
    assert_eq!(sim.facts.status, PairedStatus::ClosingChat);

    // Someone new barges into a closing chat and is kicked.
    sim.join("intruder");
    assert_eq!(sim.kicks, vec![Nick::from("intruder")]);
    let before = sim.facts.clone();

    assert_eq!(sim.leave("intruder", false), Exit::Unknown);
    assert_eq!(sim.leave("intruder", false), Exit::Unknown);
    assert_eq!(sim.facts, before);
}

#[test]
fn test_full_paired_conversation() {
    let mut sim = PairedRoomSim::new();
    sim.join("staff");
    assert_eq!(sim.facts.status, PairedStatus::StaffWaiting);
    sim.join("client");
    assert_eq!(sim.facts.status, PairedStatus::Chatting);
    sim.leave("client", false);
    assert_eq!(sim.facts.status, PairedStatus::Lost);
    sim.join("client");
    assert_eq!(sim.facts.status, PairedStatus::Chatting);
    sim.leave("staff", true);
    assert_eq!(sim.facts.status, PairedStatus::ClosingChat);
    sim.leave("client", true);
    assert_eq!(sim.facts.status, PairedStatus::ToDestroy);
    assert!(sim.facts.clean_exit);
}

// =========================================================================
// Reconnect scenarios
// =========================================================================

fn paired_facts(status: PairedStatus, staff: bool, client: bool, clean: bool) -> PairedFacts {
    PairedFacts {
        status,
        staff_nick: staff.then(|| Nick::from("staff")),
        client_nick: client.then(|| Nick::from("client")),
        clean_exit: clean,
    }
}

#[test]
fn test_scenario_a_waiting_staff_is_left_alone() {
    let v = reconcile_paired(&paired_facts(PairedStatus::StaffWaiting, true, false, false), 1);
    assert_eq!(v.status, PairedStatus::StaffWaiting);
    assert_eq!(v.finding, Finding::Correct);
}

#[test]
fn test_scenario_b_chat_with_one_participant_is_lost() {
    let v = reconcile_paired(&paired_facts(PairedStatus::Chatting, true, true, false), 1);
    assert_eq!(v.status, PairedStatus::Lost);
}

#[test]
fn test_scenario_c_client_without_staff_is_destroyed() {
    for live in 0..3 {
        let v = reconcile_paired(&paired_facts(PairedStatus::Available, false, true, false), live);
        assert_eq!(v.status, PairedStatus::ToDestroy);
        assert_eq!(v.finding, Finding::Contradiction);
    }
}

#[test]
fn test_scenario_d_pool_of_three_with_one_available_needs_two() {
    let pool = PoolManager::new();
    assert_eq!(pool.deficit(&SiteName::from("site"), RoomKind::Paired, 3, 1), 2);
}

#[test]
fn test_scenario_e_abandoned_group_with_participants_is_chatting() {
    let v = reconcile_group(GroupStatus::Abandoned, true, 2);
    assert_eq!(v.status, GroupStatus::Chatting);
}

#[test]
fn test_reconciliation_is_deterministic() {
    for status in PairedStatus::ALL {
        for live in 0..3 {
            let f = paired_facts(status, true, true, false);
            assert_eq!(reconcile_paired(&f, live), reconcile_paired(&f, live));
        }
    }
}

#[test]
fn test_group_meeting_lifecycle() {
    let mut status = GroupStatus::Available;
    let mut remaining = 0;
    for nick in ["a", "b"] {
        remaining += 1;
        if let Some(s) = group::on_join(status, &Nick::from(nick)).status {
            status = s;
        }
    }
    assert_eq!(status, GroupStatus::Chatting);
    for nick in ["a", "b"] {
        remaining -= 1;
        let step = group::on_leave(status, &Departure::silent(Nick::from(nick)), remaining);
        if let Some(s) = step.status {
            status = s;
        }
    }
    assert_eq!(status, GroupStatus::Abandoned);
}
