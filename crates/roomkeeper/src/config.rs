//! Broker configuration, loaded from TOML.
//!
//! ```toml
//! [mainloop]
//! timeout_ms = 1000
//! reconnect_delay_secs = 5
//! cleanup_secs = 600
//!
//! [connection]
//! username = "roomkeeper"
//! domain = "chat.example.org"
//! password = "secret"
//!
//! [rooms]
//! domain = "muc.chat.example.org"
//! pool_size = 2
//!
//! [[site]]
//! name = "helpdesk"
//! pool_size = 5
//!
//! [logging]
//! level = "info"
//! destination = "file:/var/log/roomkeeper.log"
//! ```
//!
//! Every section is optional. A `[[site]]` entry overrides the `[rooms]`
//! defaults field by field; blank strings count as unset.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use roomkeeper_protocol::{HistoryOptions, Nick, SiteName};
use roomkeeper_room::{GROUP_CAPACITY, PAIRED_CAPACITY};
use serde::Deserialize;

use crate::{ConfigError, SiteSettings};

/// Occupant limits below this leave no room for two participants and the
/// broker.
const MIN_CAPACITY: usize = 3;

const WHOIS_OPTIONS: [&str; 2] = ["moderators", "anyone"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    pub mainloop: MainloopConfig,
    pub connection: ConnectionConfig,
    pub rooms: RoomDefaults,
    #[serde(rename = "site")]
    pub sites: Vec<SiteConfig>,
    pub logging: LoggingConfig,
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Timing of the supervisor loop.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct MainloopConfig {
    /// Longest wait for a protocol event before the loop checks its queue
    /// and the cleanup alarm.
    pub timeout_ms: u64,
    pub reconnect_delay_secs: u64,
    /// Cleanup interval, and how long a room may linger in `lost`,
    /// `closingChat` or `abandoned`.
    pub cleanup_secs: u64,
    /// How long a staff member may wait for a client. Defaults to
    /// `cleanup_secs`.
    pub hanging_staff_secs: Option<u64>,
    /// Quiet period that ends the event drain after re-joining a room.
    pub flush_timeout_ms: u64,
}

impl Default for MainloopConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 1000,
            reconnect_delay_secs: 5,
            cleanup_secs: 600,
            hanging_staff_secs: None,
            flush_timeout_ms: 1000,
        }
    }
}

impl MainloopConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn cleanup(&self) -> Duration {
        Duration::from_secs(self.cleanup_secs)
    }

    pub fn hanging_staff(&self) -> Duration {
        Duration::from_secs(self.hanging_staff_secs.unwrap_or(self.cleanup_secs))
    }

    pub fn flush_timeout(&self) -> Duration {
        Duration::from_millis(self.flush_timeout_ms)
    }
}

/// The broker's own account on the chat service.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub username: String,
    pub domain: String,
    pub resource: String,
    pub password: String,
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            username: "roomkeeper".into(),
            domain: "localhost".into(),
            resource: "broker".into(),
            password: String::new(),
            port: 5222,
        }
    }
}

impl ConnectionConfig {
    /// The full address the broker logs in as.
    pub fn address(&self) -> String {
        format!("{}@{}/{}", self.username, self.domain, self.resource)
    }
}

/// Global room defaults every site starts from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RoomDefaults {
    pub domain: String,
    pub pool_size: i64,
    pub nick: String,
    pub whois: String,
    pub allow_change_subject: bool,
    pub history: HistoryOptions,
    pub paired_capacity: usize,
    pub group_capacity: usize,
}

impl Default for RoomDefaults {
    fn default() -> Self {
        Self {
            domain: "muc.localhost".into(),
            pool_size: 1,
            nick: "roomkeeper".into(),
            whois: "moderators".into(),
            allow_change_subject: true,
            history: HistoryOptions::default(),
            paired_capacity: PAIRED_CAPACITY,
            group_capacity: GROUP_CAPACITY,
        }
    }
}

/// One `[[site]]` entry. Unset fields fall back to [`RoomDefaults`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub name: String,
    pub pool_size: Option<i64>,
    pub domain: Option<String>,
    pub nick: Option<String>,
    pub whois: Option<String>,
    pub allow_change_subject: Option<bool>,
    pub history: Option<HistoryOptions>,
    pub paired_capacity: Option<usize>,
    pub group_capacity: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is unset.
    pub level: String,
    pub destination: LogDestination,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), destination: LogDestination::Stderr }
    }
}

/// Where log lines go: `stderr`, `stdout` or `file:<path>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum LogDestination {
    #[default]
    Stderr,
    Stdout,
    File(PathBuf),
}

impl FromStr for LogDestination {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "stderr" => Ok(Self::Stderr),
            "stdout" => Ok(Self::Stdout),
            other => match other.strip_prefix("file:") {
                Some(path) if !path.trim().is_empty() => Ok(Self::File(PathBuf::from(path.trim()))),
                _ => Err(ConfigError::Logging(format!("unknown log destination '{other}'"))),
            },
        }
    }
}

impl TryFrom<String> for LogDestination {
    type Error = ConfigError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

// ---------------------------------------------------------------------------
// Loading and site resolution
// ---------------------------------------------------------------------------

impl BrokerConfig {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Effective settings of the named site.
    pub fn site_settings(&self, name: &str) -> Result<SiteSettings, ConfigError> {
        let site = self
            .sites
            .iter()
            .find(|s| s.name.trim() == name)
            .ok_or_else(|| ConfigError::UnknownSite(name.to_string()))?;
        self.merge(site)
    }

    /// Effective settings of every usable site. Entries that fail
    /// validation are logged and skipped.
    pub fn sites(&self) -> Vec<SiteSettings> {
        let mut seen = HashSet::new();
        let mut sites = Vec::new();
        for entry in &self.sites {
            let resolved = self.merge(entry).and_then(|settings| {
                if seen.insert(settings.name.clone()) {
                    Ok(settings)
                } else {
                    Err(site_error(entry.name.trim(), "defined more than once"))
                }
            });
            match resolved {
                Ok(settings) => sites.push(settings),
                Err(e) => tracing::error!(error = %e, "skipping site"),
            }
        }
        sites
    }

    fn merge(&self, site: &SiteConfig) -> Result<SiteSettings, ConfigError> {
        let defaults = &self.rooms;
        let name = site.name.trim();
        if name.is_empty() {
            return Err(site_error("", "missing name"));
        }

        let domain = non_blank(&site.domain).unwrap_or(&defaults.domain).trim();
        if domain.is_empty() {
            return Err(site_error(name, "no room domain"));
        }
        let nick = non_blank(&site.nick).unwrap_or(&defaults.nick).trim();
        if nick.is_empty() {
            return Err(site_error(name, "no broker nick"));
        }
        let whois = non_blank(&site.whois).unwrap_or(&defaults.whois).trim();
        if !WHOIS_OPTIONS.contains(&whois) {
            return Err(site_error(name, &format!("whois must be one of {WHOIS_OPTIONS:?}")));
        }

        let paired_capacity = site.paired_capacity.unwrap_or(defaults.paired_capacity);
        let group_capacity = site.group_capacity.unwrap_or(defaults.group_capacity);
        if paired_capacity < MIN_CAPACITY || group_capacity < MIN_CAPACITY {
            return Err(site_error(name, &format!("room capacity must be at least {MIN_CAPACITY}")));
        }

        Ok(SiteSettings {
            name: SiteName::from(name),
            pool_size: checked_pool_size(name, site.pool_size.unwrap_or(defaults.pool_size))?,
            domain: domain.to_string(),
            nick: Nick::from(nick),
            history: site.history.unwrap_or(defaults.history),
            paired_capacity,
            group_capacity,
            whois: whois.to_string(),
            allow_change_subject: site.allow_change_subject.unwrap_or(defaults.allow_change_subject),
        })
    }
}

/// A pool size as configured or requested by an operator.
pub(crate) fn checked_pool_size(site: &str, size: i64) -> Result<usize, ConfigError> {
    usize::try_from(size).map_err(|_| ConfigError::InvalidPoolSize { site: site.to_string(), size })
}

fn non_blank(value: &Option<String>) -> Option<&String> {
    value.as_ref().filter(|v| !v.trim().is_empty())
}

fn site_error(site: &str, reason: &str) -> ConfigError {
    ConfigError::Site { site: site.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = BrokerConfig::from_toml("").unwrap();
        assert_eq!(cfg.mainloop, MainloopConfig::default());
        assert_eq!(cfg.mainloop.hanging_staff(), Duration::from_secs(600));
        assert_eq!(cfg.connection.port, 5222);
        assert_eq!(cfg.logging.destination, LogDestination::Stderr);
        assert!(cfg.sites().is_empty());
    }

    #[test]
    fn test_site_overrides_defaults_field_by_field() {
        let cfg = BrokerConfig::from_toml(
            r#"
            [rooms]
            domain = "muc.example.org"
            pool_size = 2
            nick = "keeper"

            [[site]]
            name = "helpdesk"
            pool_size = 5
            nick = "  "
            whois = "anyone"
            history = { max_chars = 100, max_stanzas = 1, seconds = 30 }
            "#,
        )
        .unwrap();

        let site = cfg.site_settings("helpdesk").unwrap();
        assert_eq!(site.name, SiteName::from("helpdesk"));
        assert_eq!(site.pool_size, 5);
        assert_eq!(site.domain, "muc.example.org");
        assert_eq!(site.nick, Nick::from("keeper"), "blank override falls back");
        assert_eq!(site.whois, "anyone");
        assert_eq!(site.history.max_chars, 100);
        assert_eq!(site.paired_capacity, PAIRED_CAPACITY);
        assert!(site.allow_change_subject);
    }

    #[test]
    fn test_invalid_site_is_skipped_others_kept() {
        let cfg = BrokerConfig::from_toml(
            r#"
            [[site]]
            name = "good"

            [[site]]
            name = "negative"
            pool_size = -3

            [[site]]
            name = "tiny"
            paired_capacity = 2

            [[site]]
            name = "good"
            "#,
        )
        .unwrap();

        let names: Vec<String> = cfg.sites().iter().map(|s| s.name.to_string()).collect();
        assert_eq!(names, vec!["good"]);
        assert!(matches!(
            cfg.site_settings("negative"),
            Err(ConfigError::InvalidPoolSize { size: -3, .. })
        ));
        assert!(matches!(cfg.site_settings("tiny"), Err(ConfigError::Site { .. })));
        assert!(matches!(cfg.site_settings("nope"), Err(ConfigError::UnknownSite(_))));
    }

    #[test]
    fn test_log_destinations() {
        assert_eq!("stdout".parse::<LogDestination>().unwrap(), LogDestination::Stdout);
        assert_eq!(
            "file:/tmp/rk.log".parse::<LogDestination>().unwrap(),
            LogDestination::File(PathBuf::from("/tmp/rk.log"))
        );
        assert!("file:".parse::<LogDestination>().is_err());
        assert!("syslog".parse::<LogDestination>().is_err());

        let err = BrokerConfig::from_toml("[logging]\ndestination = \"syslog\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_connection_address() {
        let cfg = BrokerConfig::from_toml("[connection]\nusername = \"bot\"\ndomain = \"example.org\"").unwrap();
        assert_eq!(cfg.connection.address(), "bot@example.org/broker");
    }
}
