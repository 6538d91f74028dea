//! Sites: the tenants the broker keeps room pools for.

use std::collections::BTreeMap;

use roomkeeper_protocol::{HistoryOptions, Nick, SiteName};
use roomkeeper_room::{GROUP_CAPACITY, PAIRED_CAPACITY, RoomPolicy};
use roomkeeper_store::RoomKind;

use crate::{BrokerError, ConfigError};

/// Effective settings of one site: its `[[site]]` entry merged over the
/// global `[rooms]` defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSettings {
    pub name: SiteName,
    /// Rooms of each kind kept available.
    pub pool_size: usize,
    /// Domain of the multi-user-chat service rooms are created on.
    pub domain: String,
    /// The broker's nick in this site's rooms.
    pub nick: Nick,
    pub history: HistoryOptions,
    /// Smallest acceptable occupant limit for paired rooms.
    pub paired_capacity: usize,
    /// Smallest acceptable occupant limit for group rooms.
    pub group_capacity: usize,
    pub whois: String,
    pub allow_change_subject: bool,
}

impl SiteSettings {
    /// Settings for `name` with every default applied.
    pub fn new(name: &str) -> Self {
        Self {
            name: SiteName::from(name),
            pool_size: 1,
            domain: "muc.localhost".into(),
            nick: Nick::from("roomkeeper"),
            history: HistoryOptions::default(),
            paired_capacity: PAIRED_CAPACITY,
            group_capacity: GROUP_CAPACITY,
            whois: "moderators".into(),
            allow_change_subject: true,
        }
    }

    pub fn min_capacity(&self, kind: RoomKind) -> usize {
        match kind {
            RoomKind::Paired => self.paired_capacity,
            RoomKind::Group => self.group_capacity,
        }
    }

    /// How this site's rooms of `kind` are configured.
    pub fn policy(&self, kind: RoomKind, password: &str) -> RoomPolicy {
        RoomPolicy {
            room_name: self.name.to_string(),
            password: password.to_string(),
            min_capacity: self.min_capacity(kind),
            whois: self.whois.clone(),
            allow_change_subject: self.allow_change_subject,
        }
    }
}

/// A registered site and its persistence.
pub(crate) struct Site<S> {
    pub(crate) settings: SiteSettings,
    pub(crate) store: S,
}

pub(crate) fn lookup<'a, S>(
    sites: &'a BTreeMap<SiteName, Site<S>>,
    name: &SiteName,
) -> Result<&'a Site<S>, BrokerError> {
    sites
        .get(name)
        .ok_or_else(|| ConfigError::UnknownSite(name.to_string()).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_follows_kind() {
        let mut settings = SiteSettings::new("helpdesk");
        settings.group_capacity = 12;
        settings.whois = "anyone".into();

        let paired = settings.policy(RoomKind::Paired, "pw");
        assert_eq!(paired.room_name, "helpdesk");
        assert_eq!(paired.password, "pw");
        assert_eq!(paired.min_capacity, PAIRED_CAPACITY);
        assert_eq!(paired.whois, "anyone");

        assert_eq!(settings.policy(RoomKind::Group, "pw").min_capacity, 12);
    }
}
