//! # Roomkeeper
//!
//! A chat-room broker that keeps pools of pre-configured rooms ready on a
//! multi-user-chat service, follows who enters and leaves them, and
//! retires them when a conversation is over.
//!
//! The broker is a single [`Broker`] value driven from one task. It owns a
//! [`ChatProtocol`](roomkeeper_protocol::ChatProtocol) session and one
//! [`SiteStore`](roomkeeper_store::SiteStore) per site, and survives a lost
//! connection by reconnecting, re-joining every recorded room and
//! repairing room statuses from the occupants it finds.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use roomkeeper::{BrokerBuilder, BrokerConfig};
//!
//! // let config = BrokerConfig::load("roomkeeper.toml")?;
//! // roomkeeper::logging::init(&config.logging)?;
//! // let mut broker = BrokerBuilder::from_config(&config, |_| open_store())
//! //     .build(connect_client(&config.connection))?;
//! // let handle = broker.handle();
//! // broker.run().await
//! ```

#![allow(async_fn_in_trait)]

mod broker;
mod cleanup;
mod config;
mod error;
mod events;
pub mod logging;
mod pool;
mod site;
mod supervisor;

pub use broker::{Broker, BrokerBuilder, BrokerHandle, Control};
pub use config::{
    BrokerConfig, ConnectionConfig, LogDestination, LoggingConfig, MainloopConfig, RoomDefaults,
    SiteConfig,
};
pub use error::{BrokerError, ConfigError};
pub use site::SiteSettings;

pub mod prelude {
    pub use crate::{Broker, BrokerBuilder, BrokerConfig, BrokerError, BrokerHandle, SiteSettings};
    pub use roomkeeper_protocol::{ChatProtocol, RoomJid, SiteName};
    pub use roomkeeper_store::{GroupStatus, PairedStatus, RoomStatus, SiteStore};
}
