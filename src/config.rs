//!
//! Settings loaded from an optional config file and `AMQP_PIPELINE__*` environment variables.
//!
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ClientError;
use crate::format::OutputFormat;
use crate::message::Destination;

/// Top-level settings. Every section falls back to its defaults when missing.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub broker: BrokerSettings,
    pub publish: PublishSettings,
    pub consume: ConsumeSettings,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BrokerSettings {
    /// How long to wait for a publisher confirmation. `0` waits forever.
    pub confirm_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct PublishSettings {
    /// Empty for the default exchange.
    pub exchange: String,
    pub routing_key: String,
    pub burst: usize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ConsumeSettings {
    pub queue: String,
    pub format: OutputFormat,

    /// Output file. Console output when unset.
    pub output: Option<PathBuf>,

    pub messages_per_file: usize,

    /// Number of messages to consume, when known.
    pub count: Option<usize>,

    /// Written between plain text messages.
    pub delimiter: String,

    /// Capacity of the inbound and acknowledgment hand-off queues.
    pub queue_capacity: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            broker: BrokerSettings::default(),
            publish: PublishSettings::default(),
            consume: ConsumeSettings::default(),
        }
    }
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            confirm_timeout_ms: 30_000,
        }
    }
}

impl Default for PublishSettings {
    fn default() -> Self {
        Self {
            exchange: String::new(),
            routing_key: String::new(),
            burst: 1,
        }
    }
}

impl Default for ConsumeSettings {
    fn default() -> Self {
        Self {
            queue: String::new(),
            format: OutputFormat::Plain,
            output: None,
            messages_per_file: 1000,
            count: None,
            delimiter: "\n".to_string(),
            queue_capacity: 64,
        }
    }
}

impl BrokerSettings {
    /// Limit for [`Publisher::with_confirm_timeout`](crate::publisher::Publisher::with_confirm_timeout).
    pub fn confirm_timeout(&self) -> Option<Duration> {
        match self.confirm_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }
}

impl PublishSettings {
    pub fn destination(&self) -> Destination {
        Destination::exchange(&self.exchange, &self.routing_key)
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.publish.burst == 0 {
            return Err(ClientError::Config("publish.burst must be at least 1".to_owned()));
        }
        if self.consume.messages_per_file == 0 {
            return Err(ClientError::Config(
                "consume.messages_per_file must be at least 1".to_owned(),
            ));
        }
        if self.consume.queue_capacity == 0 {
            return Err(ClientError::Config(
                "consume.queue_capacity must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Loads settings from `path` (if it exists) and the environment, over the defaults.
pub fn load_settings(path: Option<&str>) -> Result<Settings, ClientError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::with_name(path).required(false));
    }
    let config = builder
        .add_source(
            Environment::with_prefix("AMQP_PIPELINE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .map_err(|e| ClientError::Config(e.to_string()))?;

    let settings: Settings = config
        .try_deserialize()
        .map_err(|e| ClientError::Config(e.to_string()))?;
    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(
            settings.broker.confirm_timeout(),
            Some(Duration::from_millis(30_000))
        );
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.publish.burst, 1);
        assert_eq!(settings.consume.format, OutputFormat::Plain);
        assert_eq!(settings.consume.messages_per_file, 1000);
        assert_eq!(settings.consume.delimiter, "\n");
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("pipeline.toml");
        let mut file = std::fs::File::create(&path)?;
        writeln!(
            file,
            "[broker]\nconfirm_timeout_ms = 0\n\n[publish]\nexchange = \"events\"\nrouting_key = \"order.created\"\nburst = 3\n\n[consume]\nformat = \"json\"\nmessages_per_file = 50"
        )?;

        let settings = load_settings(path.to_str())?;
        assert_eq!(settings.publish.burst, 3);
        assert_eq!(settings.broker.confirm_timeout(), None);
        assert_eq!(
            settings.publish.destination(),
            Destination::exchange("events", "order.created")
        );
        assert_eq!(settings.consume.format, OutputFormat::Json);
        assert_eq!(settings.consume.messages_per_file, 50);
        assert_eq!(settings.consume.queue_capacity, 64);
        Ok(())
    }

    #[test]
    fn test_missing_file_uses_defaults() -> Result<(), Box<dyn std::error::Error>> {
        let settings = load_settings(Some("/nonexistent/amqp-pipeline"))?;
        assert_eq!(settings.broker, BrokerSettings::default());
        Ok(())
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut settings = Settings::default();
        settings.publish.burst = 0;
        assert!(matches!(settings.validate(), Err(ClientError::Config(_))));

        let mut settings = Settings::default();
        settings.consume.queue_capacity = 0;
        assert!(settings.validate().is_err());
    }
}
