//! State machine for group meeting rooms.
//!
//! Much looser than the paired machine: participants come and go while
//! the meeting lasts, and the broker never kicks anyone on its own.

use roomkeeper_protocol::{Departure, Nick};
use roomkeeper_store::GroupStatus;

use crate::step::{Effect, Step};

/// Someone other than the broker entered the room.
pub fn on_join(status: GroupStatus, nick: &Nick) -> Step<GroupStatus> {
    let admin_check = Effect::GrantModeratorIfAdmin(nick.clone());
    match status {
        GroupStatus::Available | GroupStatus::Abandoned => {
            Step::info(format!("{nick} started the meeting"))
                .to(GroupStatus::Chatting)
                .effect(admin_check)
        }
        GroupStatus::Chatting => {
            Step::info(format!("{nick} joined the meeting")).effect(admin_check)
        }
        status => Step::warn(format!("{nick} entered a group room in status {status}"))
            .effect(admin_check),
    }
}

/// Someone other than the broker left, voluntarily or removed.
///
/// Also called for occupants the broker kicked and during closing: the
/// departure is recorded and a removal revokes the credential no matter
/// why the occupant went.
pub fn on_leave(status: GroupStatus, departure: &Departure, remaining: usize) -> Step<GroupStatus> {
    let nick = &departure.nick;
    let mut step = match status {
        GroupStatus::Chatting if remaining == 0 => {
            Step::info(format!("last participant {nick} left the meeting")).to(GroupStatus::Abandoned)
        }
        _ => Step::debug(format!("{nick} left the meeting, {remaining} still inside")),
    };
    step = step.effect(Effect::MemberLeft(nick.clone()));
    if departure.removed {
        step = step.effect(Effect::InvalidateMember(nick.clone()));
    }
    step
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nick(s: &str) -> Nick {
        Nick::from(s)
    }

    #[test]
    fn test_on_join_starts_meeting_from_available_or_abandoned() {
        for status in [GroupStatus::Available, GroupStatus::Abandoned] {
            let step = on_join(status, &nick("p"));
            assert_eq!(step.status, Some(GroupStatus::Chatting));
            assert!(step.has_effect(&Effect::GrantModeratorIfAdmin(nick("p"))));
        }
    }

    #[test]
    fn test_on_join_chatting_and_closing_statuses_keep_status() {
        for status in [GroupStatus::Chatting, GroupStatus::ToDestroy, GroupStatus::Destroyed] {
            let step = on_join(status, &nick("p"));
            assert_eq!(step.status, None);
            assert!(!step.effects.iter().any(|e| matches!(e, Effect::Kick(_))));
        }
    }

    #[test]
    fn test_on_leave_last_participant_abandons_meeting() {
        let step = on_leave(GroupStatus::Chatting, &Departure::silent(nick("p")), 0);
        assert_eq!(step.status, Some(GroupStatus::Abandoned));
        assert_eq!(step.effects, vec![Effect::MemberLeft(nick("p"))]);

        let step = on_leave(GroupStatus::Chatting, &Departure::silent(nick("p")), 2);
        assert_eq!(step.status, None);
    }

    #[test]
    fn test_on_leave_removal_invalidates_credential_in_any_status() {
        let removed = Departure { nick: nick("p"), status: None, removed: true };
        for status in GroupStatus::ALL {
            let step = on_leave(status, &removed, 1);
            assert!(step.has_effect(&Effect::MemberLeft(nick("p"))), "{status}");
            assert!(step.has_effect(&Effect::InvalidateMember(nick("p"))), "{status}");
        }
    }
}
