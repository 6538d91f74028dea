//! Tracing initialisation.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use crate::{ConfigError, LogDestination, LoggingConfig};

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` wins over the configured level. Fails if the level is not a
/// valid filter, the log file can't be opened, or a subscriber is already
/// installed.
pub fn init(config: &LoggingConfig) -> Result<(), ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| ConfigError::Logging(format!("invalid level '{}': {e}", config.level)))?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(true);

    let installed = match &config.destination {
        LogDestination::Stderr => builder.with_writer(std::io::stderr).try_init(),
        LogDestination::Stdout => builder.with_writer(std::io::stdout).try_init(),
        LogDestination::File(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            builder.with_ansi(false).with_writer(Mutex::new(file)).try_init()
        }
    };
    installed.map_err(|e| ConfigError::Logging(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_to_file_creates_it_and_refuses_second_subscriber() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roomkeeper.log");
        let config = LoggingConfig {
            level: "debug".into(),
            destination: LogDestination::File(path.clone()),
        };

        init(&config).unwrap();
        tracing::info!("logging to file");
        assert!(path.exists());

        let again = init(&LoggingConfig::default());
        assert!(matches!(again, Err(ConfigError::Logging(_))));
    }

    #[test]
    fn test_unwritable_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoggingConfig {
            level: "info".into(),
            destination: LogDestination::File(dir.path().join("missing").join("x.log")),
        };
        assert!(matches!(init(&config), Err(ConfigError::Io(_))));
    }
}
