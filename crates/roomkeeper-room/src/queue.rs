//! Deferred work.
//!
//! Some reactions to an event would re-enter event delivery if run on the
//! spot (creating rooms, re-joining, closing). They are queued as
//! [`Command`]s instead and run by the supervisor before it waits for the
//! next event.

use std::collections::VecDeque;

use roomkeeper_protocol::{RoomJid, SiteName};
use roomkeeper_store::RoomStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Top up the pools of one site, or of every site.
    FillPool(Option<SiteName>),
    /// Re-join every recorded room after (re)connecting.
    RejoinRooms,
    CloseRoom { site: SiteName, jid: RoomJid },
    /// Close every room of a site in the given status.
    CloseRooms { site: SiteName, status: RoomStatus },
}

/// FIFO of pending commands.
#[derive(Debug, Default)]
pub struct TaskQueue {
    commands: VecDeque<Command>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, command: Command) {
        tracing::trace!(?command, "queued");
        self.commands.push_back(command);
    }

    /// Queues a command ahead of everything already waiting.
    pub fn push_front(&mut self, command: Command) {
        tracing::trace!(?command, "queued first");
        self.commands.push_front(command);
    }

    pub fn pop(&mut self) -> Option<Command> {
        self.commands.pop_front()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_come_out_in_order() {
        let mut q = TaskQueue::new();
        q.push(Command::RejoinRooms);
        q.push(Command::FillPool(None));
        q.push(Command::FillPool(Some(SiteName::from("a"))));

        assert_eq!(q.len(), 3);
        assert_eq!(q.pop(), Some(Command::RejoinRooms));
        assert_eq!(q.pop(), Some(Command::FillPool(None)));

        // Pushed while draining: still served by the same drain.
        q.push(Command::RejoinRooms);
        assert_eq!(q.pop(), Some(Command::FillPool(Some(SiteName::from("a")))));
        assert_eq!(q.pop(), Some(Command::RejoinRooms));
        assert!(q.pop().is_none());
        assert!(q.is_empty());
    }

    #[test]
    fn test_push_front_jumps_the_queue() {
        let mut q = TaskQueue::new();
        q.push(Command::FillPool(None));
        q.push_front(Command::RejoinRooms);
        assert_eq!(q.pop(), Some(Command::RejoinRooms));
        assert_eq!(q.pop(), Some(Command::FillPool(None)));
    }
}
