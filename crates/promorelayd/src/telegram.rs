//! Telegram Bot API client
//!
//! Thin client over the Bot API: `sendMessage` for outbound delivery
//! and `getUpdates` long-polling for the inbound command surface. A
//! send may fail transiently (network, 5xx) or permanently (recipient
//! blocked the bot); both are reported as a non-fatal
//! [`RelayError::Delivery`] for that pairing.

use crate::config::TelegramConfig;
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Extra slack on top of the long-poll timeout before the HTTP request
/// itself is abandoned.
const LONG_POLL_GRACE: Duration = Duration::from_secs(5);

/// Outbound delivery capability: send text to a recipient id, may fail.
#[async_trait]
pub trait ChatSender: Send + Sync {
    /// Send `text` to `chat_id`. Failures are scoped to this pairing.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// One inbound update from the Bot API.
#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    /// Monotonic update identifier, used as the next poll offset
    pub update_id: i64,
    /// Inbound message, if this update carries one
    #[serde(default)]
    pub message: Option<Message>,
}

/// Inbound chat message.
#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    /// Originating chat
    pub chat: Chat,
    /// Message text, if any
    #[serde(default)]
    pub text: Option<String>,
}

/// Chat a message arrived from.
#[derive(Debug, Clone, Deserialize)]
pub struct Chat {
    /// Chat identifier (the subscriber id)
    pub id: i64,
}

/// Bot API response envelope.
#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<T>,
}

#[derive(Debug, Serialize)]
struct SendMessageParams<'a> {
    chat_id: i64,
    text: &'a str,
}

#[derive(Debug, Serialize)]
struct GetUpdatesParams {
    timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    offset: Option<i64>,
}

/// reqwest-backed Bot API client.
pub struct TelegramClient {
    http: reqwest::Client,
    base: String,
    send_timeout: Duration,
}

impl TelegramClient {
    /// Build a client from configuration.
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(4)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            base: format!("{}/bot{}", config.api_url.trim_end_matches('/'), config.token),
            send_timeout: config.send_timeout(),
        })
    }

    /// Long-poll for inbound updates.
    ///
    /// `offset` acknowledges all updates below it; `timeout` is the
    /// server-side long-poll duration.
    pub async fn get_updates(&self, offset: Option<i64>, timeout: Duration) -> Result<Vec<Update>> {
        let params = GetUpdatesParams {
            timeout: timeout.as_secs(),
            offset,
        };
        let response = self
            .http
            .post(format!("{}/getUpdates", self.base))
            .timeout(timeout + LONG_POLL_GRACE)
            .json(&params)
            .send()
            .await?;

        let status = response.status();
        let body: ApiResponse<Vec<Update>> = response
            .json()
            .await
            .map_err(|e| RelayError::telegram(format!("invalid getUpdates response ({status}): {e}")))?;

        if !body.ok {
            return Err(RelayError::telegram(
                body.description
                    .unwrap_or_else(|| format!("getUpdates failed with HTTP {status}")),
            ));
        }

        let updates = body.result.unwrap_or_default();
        if !updates.is_empty() {
            debug!(count = updates.len(), "Received updates");
        }
        Ok(updates)
    }
}

#[async_trait]
impl ChatSender for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        let response = self
            .http
            .post(format!("{}/sendMessage", self.base))
            .timeout(self.send_timeout)
            .json(&SendMessageParams { chat_id, text })
            .send()
            .await
            .map_err(|e| RelayError::delivery(chat_id, e.to_string()))?;

        let status = response.status();
        let body: ApiResponse<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| RelayError::delivery(chat_id, format!("invalid response ({status}): {e}")))?;

        if !body.ok {
            return Err(RelayError::delivery(
                chat_id,
                body.description
                    .unwrap_or_else(|| format!("sendMessage failed with HTTP {status}")),
            ));
        }

        debug!(chat_id, "Message sent");
        Ok(())
    }
}
