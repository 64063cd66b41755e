//! Configuration for the relay daemon
//!
//! Loaded from YAML with `${VAR}` / `${VAR:-default}` environment
//! expansion, so secrets like the bot token stay out of the file:
//!
//! ```yaml
//! broker:
//!   brokers: ["kafka:9092"]
//!   consumer_group: promorelay
//!   start_offset: earliest
//! topics:
//!   wal_listener.promo_categories: promo_category
//!   wal_listener.promo_offers: promo_offer
//!   wal_listener.cities: promo_city
//!   wal_listener.partners: promo_partner
//! telegram:
//!   token: ${TELEGRAM_BOT_TOKEN}
//! registry:
//!   path: subscribers.txt
//! ```

use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

/// Pre-compiled regex for environment variable expansion
/// Pattern: ${VAR} or ${VAR:-default}
static ENV_VAR_REGEX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelayConfig {
    /// Broker connection configuration
    pub broker: BrokerConfig,

    /// Topic name → wire table name carried on that topic
    #[serde(default = "default_topics")]
    pub topics: BTreeMap<String, String>,

    /// Chat delivery configuration
    pub telegram: TelegramConfig,

    /// Subscriber registry configuration
    #[serde(default)]
    pub registry: RegistryConfig,

    /// Fan-out loop tuning
    #[serde(default)]
    pub relay: RelaySettings,
}

/// Broker connection configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    /// Bootstrap servers (host:port)
    pub brokers: Vec<String>,

    /// Consumer group id, shared across relay instances
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,

    /// Where a fresh process starts reading each topic
    #[serde(default)]
    pub start_offset: StartOffset,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Bounded connect retry count; exhausting it is a fatal startup error
    #[serde(default = "default_connect_max_retries")]
    pub connect_max_retries: u32,

    /// Fixed delay between connect attempts in milliseconds
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
}

/// Starting offset for a fresh consumer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StartOffset {
    /// Start from the earliest available record
    #[default]
    Earliest,
    /// Start from the latest record
    Latest,
}

/// Chat delivery configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelegramConfig {
    /// Bot API token (use `${TELEGRAM_BOT_TOKEN}` in the file)
    pub token: String,

    /// Bot API base URL
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Per-message send timeout in milliseconds
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,

    /// getUpdates long-poll timeout in seconds
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u64,
}

/// Subscriber registry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegistryConfig {
    /// Path of the line-oriented subscriber file
    #[serde(default = "default_registry_path")]
    pub path: PathBuf,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

/// Fan-out loop tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RelaySettings {
    /// Broker poll timeout in milliseconds (bounds shutdown latency)
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Cooperative sleep between iterations in milliseconds
    #[serde(default = "default_idle_sleep_ms")]
    pub idle_sleep_ms: u64,

    /// Backoff after a failed reconnect in milliseconds
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_timeout_ms: default_poll_timeout_ms(),
            idle_sleep_ms: default_idle_sleep_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
        }
    }
}

fn default_topics() -> BTreeMap<String, String> {
    [
        ("wal_listener.promo_categories", "promo_category"),
        ("wal_listener.promo_offers", "promo_offer"),
        ("wal_listener.cities", "promo_city"),
        ("wal_listener.partners", "promo_partner"),
    ]
    .into_iter()
    .map(|(topic, table)| (topic.to_string(), table.to_string()))
    .collect()
}

fn default_consumer_group() -> String {
    "promorelay".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_connect_max_retries() -> u32 {
    30
}

fn default_connect_retry_delay_ms() -> u64 {
    1_000
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

fn default_send_timeout_ms() -> u64 {
    10_000
}

fn default_poll_timeout_secs() -> u64 {
    30
}

fn default_registry_path() -> PathBuf {
    PathBuf::from("subscribers.txt")
}

fn default_poll_timeout_ms() -> u64 {
    1_000
}

fn default_idle_sleep_ms() -> u64 {
    100
}

fn default_reconnect_backoff_ms() -> u64 {
    5_000
}

impl RelayConfig {
    /// Load configuration from a YAML file, expanding environment variables.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&raw)
    }

    /// Parse configuration from a YAML string, expanding environment variables.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let expanded = expand_env_vars(raw);
        let config: Self = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.broker.brokers.is_empty() {
            return Err(RelayError::config("broker.brokers must not be empty"));
        }
        if self.topics.is_empty() {
            return Err(RelayError::config("topics must not be empty"));
        }
        if self.telegram.token.is_empty() {
            return Err(RelayError::config(
                "telegram.token must be set (e.g. ${TELEGRAM_BOT_TOKEN})",
            ));
        }
        Ok(())
    }
}

impl BrokerConfig {
    /// Connection timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Delay between connect attempts as a [`Duration`].
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }
}

impl TelegramConfig {
    /// Per-message send timeout as a [`Duration`].
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// getUpdates long-poll timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs(self.poll_timeout_secs)
    }
}

impl RelaySettings {
    /// Broker poll timeout as a [`Duration`].
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Inter-iteration sleep as a [`Duration`].
    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    /// Post-reconnect-failure backoff as a [`Duration`].
    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }
}

/// Expand `${VAR}` and `${VAR:-default}` references against the process
/// environment. Unset variables without a default expand to empty.
fn expand_env_vars(raw: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(raw, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            match std::env::var(name) {
                Ok(value) => value,
                Err(_) => caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default(),
            }
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
broker:
  brokers: ["kafka:9092"]
telegram:
  token: "test-token"
"#;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = RelayConfig::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.broker.consumer_group, "promorelay");
        assert_eq!(config.broker.start_offset, StartOffset::Earliest);
        assert_eq!(config.broker.connect_max_retries, 30);
        assert_eq!(config.topics.len(), 4);
        assert_eq!(
            config.topics["wal_listener.promo_categories"],
            "promo_category"
        );
        assert_eq!(config.registry.path, PathBuf::from("subscribers.txt"));
        assert_eq!(config.relay.poll_timeout(), Duration::from_millis(1000));
        assert_eq!(config.relay.idle_sleep(), Duration::from_millis(100));
        assert_eq!(config.relay.reconnect_backoff(), Duration::from_secs(5));
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("PROMORELAY_TEST_TOKEN", "secret-from-env");
        let yaml = r#"
broker:
  brokers: ["${PROMORELAY_TEST_BROKER:-kafka:9092}"]
telegram:
  token: ${PROMORELAY_TEST_TOKEN}
"#;
        let config = RelayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.telegram.token, "secret-from-env");
        assert_eq!(config.broker.brokers, vec!["kafka:9092".to_string()]);
    }

    #[test]
    fn test_missing_token_rejected() {
        let yaml = r#"
broker:
  brokers: ["kafka:9092"]
telegram:
  token: "${PROMORELAY_TEST_UNSET_VAR}"
"#;
        let err = RelayConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn test_empty_brokers_rejected() {
        let yaml = r#"
broker:
  brokers: []
telegram:
  token: "t"
"#;
        assert!(RelayConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_custom_topic_mapping() {
        let yaml = r#"
broker:
  brokers: ["kafka:9092"]
topics:
  cdc.public.promo_offers: promo_offer
telegram:
  token: "t"
"#;
        let config = RelayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.topics.len(), 1);
        assert_eq!(config.topics["cdc.public.promo_offers"], "promo_offer");
    }
}
