//! Reconciliation after a lost connection.
//!
//! While the broker was offline, participants kept entering and leaving
//! rooms without the broker seeing it. After re-joining a room, the
//! persisted facts are compared with the number of occupants actually
//! present and a status is chosen that fits both.
//!
//! `live` always excludes the broker itself.

use roomkeeper_store::{GroupStatus, PairedStatus};

use crate::PairedFacts;

/// How a reconciled status relates to the persisted one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Finding {
    /// The persisted status matches what is live.
    Correct,
    /// Participants moved while the broker was away; the status follows.
    Repaired,
    /// Live occupancy contradicts the status in a way no legitimate
    /// sequence of presences explains. The room is closed.
    Anomaly,
    /// The persisted facts contradict each other. The room is closed.
    Contradiction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict<S> {
    pub status: S,
    pub finding: Finding,
    pub reason: &'static str,
}

impl<S> Verdict<S> {
    fn new(status: S, finding: Finding, reason: &'static str) -> Self {
        Self { status, finding, reason }
    }
}

/// Decides the status of a paired room from its persisted facts and its
/// live occupant count.
pub fn reconcile_paired(facts: &PairedFacts, live: usize) -> Verdict<PairedStatus> {
    use Finding::*;
    use PairedStatus::*;

    let keep = |reason| Verdict::new(facts.status, Correct, reason);
    let staff = facts.staff_assigned();
    let client = facts.client_assigned();

    match facts.status {
        Available | AvailableForInvitation => match (staff, client) {
            (_, true) => Verdict::new(ToDestroy, Contradiction, "client recorded in a room never handed out"),
            (true, false) => match live {
                0 => Verdict::new(ToDestroy, Repaired, "staff member gone before the broker returned"),
                1 if facts.status == Available => {
                    Verdict::new(StaffWaiting, Repaired, "staff member took the room while the broker was away")
                }
                1 => Verdict::new(
                    StaffWaitingForInvitee,
                    Repaired,
                    "staff member took the room while the broker was away",
                ),
                _ => Verdict::new(ToDestroy, Anomaly, "two occupants where only staff was expected"),
            },
            (false, false) => keep("room still pooled"),
        },

        StaffWaiting | StaffWaitingForInvitee => match (staff, client) {
            (false, _) => Verdict::new(ToDestroy, Contradiction, "staff waiting but no staff member recorded"),
            (true, true) => after_chat_started(facts.clean_exit, live, facts.status),
            (true, false) => match live {
                0 => Verdict::new(ToDestroy, Repaired, "waiting staff member gone"),
                1 => keep("staff member still waiting"),
                _ => Verdict::new(ToDestroy, Anomaly, "two occupants where only staff was expected"),
            },
        },

        Chatting => match (staff, client) {
            (true, true) => after_chat_started(facts.clean_exit, live, facts.status),
            (false, _) => Verdict::new(ToDestroy, Anomaly, "chatting without a staff member recorded"),
            (true, false) => Verdict::new(ToDestroy, Anomaly, "chatting without a client recorded"),
        },

        ClosingChat => match live {
            0 => Verdict::new(Abandoned, Repaired, "nobody left after the chat was closing"),
            1 => keep("one participant still closing the chat"),
            _ => Verdict::new(ToDestroy, Anomaly, "two occupants while the chat was closing"),
        },

        Lost => after_chat_started(facts.clean_exit, live, facts.status),

        Abandoned => match (staff, client) {
            (true, false) => match live {
                0 => keep("staff member still missing before any client"),
                1 => Verdict::new(StaffWaiting, Repaired, "staff member came back before any client"),
                _ => Verdict::new(ToDestroy, Anomaly, "two occupants where only staff was expected"),
            },
            _ => after_chat_started(facts.clean_exit, live, facts.status),
        },

        ToDestroy if live > 0 => Verdict::new(ToDestroy, Anomaly, "occupants in a room marked for closing"),
        ToDestroy => keep("room marked for closing"),

        Destroyed => keep("room already destroyed"),
    }
}

/// Rows shared by every status in which both participants have been
/// recorded. `current` is reported as correct when it is what the
/// occupancy implies.
fn after_chat_started(clean_exit: bool, live: usize, current: PairedStatus) -> Verdict<PairedStatus> {
    use Finding::*;
    use PairedStatus::*;

    let target = match (clean_exit, live) {
        (true, 0) => (ToDestroy, "both participants gone, at least one left cleanly"),
        (true, 1) => (ClosingChat, "one participant left cleanly"),
        (true, _) => {
            return Verdict::new(ToDestroy, Anomaly, "two occupants after a clean exit");
        }
        (false, 0) => (Abandoned, "both participants missing"),
        (false, 1) => (Lost, "one participant missing"),
        (false, _) => (Chatting, "both participants present"),
    };
    let finding = if target.0 == current { Correct } else { Repaired };
    Verdict::new(target.0, finding, target.1)
}

/// Decides the status of a group room from its persisted facts and its
/// live occupant count.
pub fn reconcile_group(status: GroupStatus, conversation_assigned: bool, live: usize) -> Verdict<GroupStatus> {
    use Finding::*;
    use GroupStatus::*;

    match status {
        Available if conversation_assigned && live > 0 => {
            Verdict::new(Chatting, Repaired, "meeting started while the broker was away")
        }
        Available if conversation_assigned => {
            Verdict::new(Abandoned, Repaired, "meeting assigned but nobody present")
        }
        Available => Verdict::new(Available, Correct, "room still pooled"),

        Chatting if !conversation_assigned => {
            Verdict::new(ToDestroy, Anomaly, "chatting without an assigned meeting")
        }
        Chatting if live > 0 => Verdict::new(Chatting, Correct, "meeting in progress"),
        Chatting => Verdict::new(Abandoned, Repaired, "all participants missing"),

        Abandoned if live > 0 => Verdict::new(Chatting, Repaired, "participants returned"),
        Abandoned => Verdict::new(Abandoned, Correct, "meeting still abandoned"),

        ToDestroy | Destroyed => Verdict::new(status, Correct, "room closing"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomkeeper_protocol::Nick;
    use Finding::*;
    use PairedStatus::*;

    fn facts(status: PairedStatus, staff: bool, client: bool, clean_exit: bool) -> PairedFacts {
        PairedFacts {
            status,
            staff_nick: staff.then(|| Nick::from("staff")),
            client_nick: client.then(|| Nick::from("client")),
            clean_exit,
        }
    }

    fn check(f: PairedFacts, live: usize, status: PairedStatus, finding: Finding) {
        let v = reconcile_paired(&f, live);
        assert_eq!(
            (v.status, v.finding),
            (status, finding),
            "from {} staff={} client={} clean={} live={live}",
            f.status,
            f.staff_assigned(),
            f.client_assigned(),
            f.clean_exit,
        );
    }

    #[test]
    fn test_reconcile_available_rows() {
        check(facts(Available, true, true, false), 1, ToDestroy, Contradiction);
        check(facts(Available, false, true, false), 0, ToDestroy, Contradiction);
        check(facts(Available, true, false, false), 2, ToDestroy, Anomaly);
        check(facts(Available, true, false, false), 1, StaffWaiting, Repaired);
        check(facts(Available, true, false, false), 0, ToDestroy, Repaired);
        check(facts(Available, false, false, false), 0, Available, Correct);
        check(facts(AvailableForInvitation, true, false, false), 1, StaffWaitingForInvitee, Repaired);
        check(facts(AvailableForInvitation, false, false, false), 1, AvailableForInvitation, Correct);
    }

    #[test]
    fn test_reconcile_staff_waiting_rows() {
        for status in [StaffWaiting, StaffWaitingForInvitee] {
            check(facts(status, true, true, true), 2, ToDestroy, Anomaly);
            check(facts(status, true, true, true), 1, ClosingChat, Repaired);
            check(facts(status, true, true, true), 0, ToDestroy, Repaired);
            check(facts(status, true, true, false), 2, Chatting, Repaired);
            check(facts(status, true, true, false), 1, Lost, Repaired);
            check(facts(status, true, true, false), 0, Abandoned, Repaired);
            check(facts(status, true, false, false), 2, ToDestroy, Anomaly);
            check(facts(status, true, false, false), 1, status, Correct);
            check(facts(status, true, false, false), 0, ToDestroy, Repaired);
            check(facts(status, false, false, false), 1, ToDestroy, Contradiction);
        }
    }

    #[test]
    fn test_reconcile_chatting_rows() {
        check(facts(Chatting, true, true, true), 2, ToDestroy, Anomaly);
        check(facts(Chatting, true, true, true), 1, ClosingChat, Repaired);
        check(facts(Chatting, true, true, true), 0, ToDestroy, Repaired);
        check(facts(Chatting, true, true, false), 2, Chatting, Correct);
        check(facts(Chatting, true, true, false), 1, Lost, Repaired);
        check(facts(Chatting, true, true, false), 0, Abandoned, Repaired);
        check(facts(Chatting, true, false, false), 2, ToDestroy, Anomaly);
        check(facts(Chatting, false, true, false), 2, ToDestroy, Anomaly);
    }

    #[test]
    fn test_reconcile_closing_and_destroy_rows() {
        check(facts(ClosingChat, true, true, true), 2, ToDestroy, Anomaly);
        check(facts(ClosingChat, true, true, true), 1, ClosingChat, Correct);
        check(facts(ClosingChat, true, true, true), 0, Abandoned, Repaired);
        check(facts(ToDestroy, true, true, false), 1, ToDestroy, Anomaly);
        check(facts(ToDestroy, true, true, false), 0, ToDestroy, Correct);
    }

    #[test]
    fn test_reconcile_lost_and_abandoned_rows() {
        check(facts(Lost, true, true, true), 2, ToDestroy, Anomaly);
        check(facts(Lost, true, true, true), 1, ClosingChat, Repaired);
        check(facts(Lost, true, true, true), 0, ToDestroy, Repaired);
        check(facts(Lost, true, true, false), 2, Chatting, Repaired);
        check(facts(Lost, true, true, false), 1, Lost, Correct);
        check(facts(Lost, true, true, false), 0, Abandoned, Repaired);

        check(facts(Abandoned, true, true, true), 2, ToDestroy, Anomaly);
        check(facts(Abandoned, true, true, true), 1, ClosingChat, Repaired);
        check(facts(Abandoned, true, true, true), 0, ToDestroy, Repaired);
        check(facts(Abandoned, true, true, false), 2, Chatting, Repaired);
        check(facts(Abandoned, true, true, false), 1, Lost, Repaired);
        check(facts(Abandoned, true, true, false), 0, Abandoned, Correct);

        // Abandoned before a client ever came: the staff member's return
        // resumes waiting, as a live join would.
        check(facts(Abandoned, true, false, false), 1, StaffWaiting, Repaired);
        check(facts(Abandoned, true, false, false), 0, Abandoned, Correct);
        check(facts(Abandoned, true, false, false), 2, ToDestroy, Anomaly);
    }

    #[test]
    fn test_reconcile_contradictions_always_destroy() {
        for status in PairedStatus::ALL {
            for staff in [false, true] {
                for client in [false, true] {
                    for clean in [false, true] {
                        for live in 0..3 {
                            let v = reconcile_paired(&facts(status, staff, client, clean), live);
                            if v.finding == Contradiction || v.finding == Anomaly {
                                assert_eq!(v.status, ToDestroy);
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_reconcile_group_rows() {
        use GroupStatus as G;
        let cases = [
            (G::Available, true, 1, G::Chatting, Repaired),
            (G::Available, true, 0, G::Abandoned, Repaired),
            (G::Available, false, 3, G::Available, Correct),
            (G::Chatting, true, 1, G::Chatting, Correct),
            (G::Chatting, true, 0, G::Abandoned, Repaired),
            (G::Chatting, false, 2, G::ToDestroy, Anomaly),
            (G::Abandoned, true, 2, G::Chatting, Repaired),
            (G::Abandoned, true, 0, G::Abandoned, Correct),
            (G::ToDestroy, true, 2, G::ToDestroy, Correct),
        ];
        for (status, assigned, live, expected, finding) in cases {
            let v = reconcile_group(status, assigned, live);
            assert_eq!((v.status, v.finding), (expected, finding), "{status} assigned={assigned} live={live}");
        }
    }
}
