//! State machine for staff/client rooms.
//!
//! ```text
//!  available ──staff──→ staffWaiting ──client──→ chatting
//!                            │                     │  │
//!                      clean │ unclean       clean │  │ unclean
//!                            ▼    ▼                ▼  ▼
//!                     toDestroy  abandoned   closingChat  lost / abandoned
//!                                    │                        │
//!                                    └──── participant back ──┘──→ chatting / lost
//! ```
//!
//! Both functions are pure and total: every status has an answer for every
//! presence, and the caller applies the returned [`Step`]. The broker's own
//! presence, duplicate leaves and leaves of occupants it kicked are filtered
//! out before these are called.

use std::collections::BTreeSet;

use roomkeeper_protocol::Nick;
use roomkeeper_store::{ChatEvent, PairedRoom, PairedStatus};

use crate::step::{Effect, Fact, Step};

/// What the state machine needs to know about a persisted room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairedFacts {
    pub status: PairedStatus,
    pub staff_nick: Option<Nick>,
    pub client_nick: Option<Nick>,
    pub clean_exit: bool,
}

impl PairedFacts {
    pub fn of(room: &PairedRoom) -> Self {
        Self {
            status: room.status,
            staff_nick: room.staff_nick.clone(),
            client_nick: room.client_nick.clone(),
            clean_exit: room.clean_exit,
        }
    }

    pub fn staff_assigned(&self) -> bool {
        self.staff_nick.is_some()
    }

    pub fn client_assigned(&self) -> bool {
        self.client_nick.is_some()
    }

    fn is_participant(&self, nick: &Nick) -> bool {
        self.staff_nick.as_ref() == Some(nick) || self.client_nick.as_ref() == Some(nick)
    }

    /// Recorded staff and client currently in `occupants`.
    fn parties_present(&self, occupants: &BTreeSet<Nick>) -> usize {
        [&self.staff_nick, &self.client_nick]
            .into_iter()
            .flatten()
            .filter(|n| occupants.contains(*n))
            .count()
    }
}

/// Someone other than the broker entered the room.
///
/// `occupants` is the live occupant set after the join (broker excluded);
/// `rejoin_expected` is whether the room's rejoin guard is set.
pub fn on_join(
    facts: &PairedFacts,
    nick: &Nick,
    occupants: &BTreeSet<Nick>,
    rejoin_expected: bool,
) -> Step<PairedStatus> {
    use PairedStatus::*;

    match facts.status {
        Available => Step::info(format!("staff member {nick} entered the room"))
            .to(StaffWaiting)
            .fact(Fact::StaffJoined(nick.clone()))
            .effect(Effect::RefillPool),

        AvailableForInvitation => {
            Step::info(format!("staff member {nick} entered the room for an invitation"))
                .to(StaffWaitingForInvitee)
                .fact(Fact::StaffJoined(nick.clone()))
                .effect(Effect::RefillPool)
        }

        StaffWaiting | StaffWaitingForInvitee if rejoin_expected => {
            Step::info(format!("{nick} rejoined the room")).effect(Effect::ClearGuard)
        }

        StaffWaiting | StaffWaitingForInvitee => {
            Step::info(format!("client {nick} entered the room"))
                .to(Chatting)
                .fact(Fact::ClientJoined(nick.clone()))
        }

        Chatting => {
            let rejoin = Effect::LogEvent {
                event: ChatEvent::Rejoin,
                detail: format!("{nick} rejoined the chat"),
            };
            if rejoin_expected {
                Step::info(format!("{nick} rejoined the chat"))
                    .effect(rejoin)
                    .effect(Effect::ClearGuard)
            } else {
                Step::info(format!("{nick} entered a room that is already chatting"))
                    .effect(rejoin)
            }
        }

        ClosingChat | Lost | Abandoned if facts.is_participant(nick) => {
            let step = match &facts.client_nick {
                Some(client) => {
                    let both = facts
                        .staff_nick
                        .as_ref()
                        .is_some_and(|staff| occupants.contains(staff))
                        && occupants.contains(client);
                    let step = Step::info(format!("participant {nick} came back"));
                    let step = match (both, facts.status) {
                        (true, _) => step.to(Chatting),
                        (false, ClosingChat) => step,
                        (false, _) => step.to(Lost),
                    };
                    step.effect(Effect::LogEvent {
                        event: ChatEvent::Rejoin,
                        detail: format!("{nick} rejoined the chat"),
                    })
                }
                None => Step::info(format!("staff member {nick} came back before any client"))
                    .to(StaffWaiting),
            };
            if rejoin_expected { step.effect(Effect::ClearGuard) } else { step }
        }

        status if rejoin_expected => {
            Step::info(format!("{nick} present in {status} room during rejoin; left to reconciliation"))
                .effect(Effect::ClearGuard)
        }

        status => Step::warn(format!("{nick} entered a room in status {status}; kicking"))
            .effect(Effect::Kick(nick.clone())),
    }
}

/// Someone other than the broker left the room voluntarily.
///
/// `occupants` is the live occupant set after the departure (broker
/// excluded). Only the recorded staff and client count as parties still
/// inside; anyone else tolerated in the room doesn't keep a chat alive.
pub fn on_leave(
    facts: &PairedFacts,
    nick: &Nick,
    clean: bool,
    occupants: &BTreeSet<Nick>,
) -> Step<PairedStatus> {
    use PairedStatus::*;

    let how = if clean { "clean exit" } else { "un-clean exit" };
    let parties = facts.parties_present(occupants);
    let step = match facts.status {
        StaffWaiting | StaffWaitingForInvitee => {
            if clean {
                Step::info(format!("staff member {nick} stopped waiting ({how})")).to(ToDestroy)
            } else {
                Step::info(format!("staff member {nick} disappeared while waiting ({how})"))
                    .to(Abandoned)
            }
        }

        Chatting if !facts.is_participant(nick) => {
            return with_clean_fact(
                Step::info(format!("{nick} left the chat room without being part of the chat")),
                clean,
            );
        }

        Chatting => {
            let (event, verb) = if clean {
                (ChatEvent::Ended, "ended")
            } else {
                (ChatEvent::Left, "left")
            };
            let next = match (clean, parties > 0) {
                (true, true) => ClosingChat,
                (true, false) => ToDestroy,
                (false, true) => Lost,
                (false, false) => Abandoned,
            };
            Step::info(format!("{nick} left the chat ({how})"))
                .to(next)
                .effect(Effect::LogEvent { event, detail: format!("{nick} {verb} the chat") })
        }

        ClosingChat | Lost | Abandoned if parties == 0 => {
            Step::info(format!("last participant {nick} left ({how})")).to(ToDestroy)
        }

        ClosingChat | Lost | Abandoned => {
            Step::info(format!("{nick} left, {parties} participant(s) still inside ({how})"))
        }

        status => {
            return with_clean_fact(
                Step::warn(format!("{nick} left a room expected to be empty (status {status})")),
                clean,
            );
        }
    };

    let dirty = if clean { step } else { step.fact(Fact::LeftDirty) };
    with_clean_fact(dirty, clean)
}

fn with_clean_fact(step: Step<PairedStatus>, clean: bool) -> Step<PairedStatus> {
    if clean { step.fact(Fact::LeftClean) } else { step }
}
