//! Inbound command surface
//!
//! Long-polls the Bot API for `/start`, `/help`, `/subscribe` and
//! `/unsubscribe` and applies subscription changes through the
//! registry. Runs as its own cooperative task next to the fan-out
//! loop; its failures are retried with a short backoff and never
//! affect delivery.

use crate::error::Result;
use crate::registry::SubscriberRegistry;
use crate::shutdown::ShutdownSignal;
use crate::telegram::{ChatSender, TelegramClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Backoff after a failed getUpdates call.
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

const WELCOME_TEXT: &str = "Hi! I relay promo directory changes: new categories, offers, \
cities and partners.\nUse /subscribe to receive notifications.";

const HELP_TEXT: &str = "Available commands:\n\
/subscribe - receive change notifications\n\
/unsubscribe - stop receiving notifications\n\
/help - show this message";

const ERROR_TEXT: &str = "Something went wrong, please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Help,
    Subscribe,
    Unsubscribe,
}

impl Command {
    /// Parse a message text, tolerating a `@botname` suffix and
    /// trailing arguments.
    fn parse(text: &str) -> Option<Self> {
        let first = text.trim().split_whitespace().next()?;
        let name = first.split('@').next().unwrap_or(first);
        match name {
            "/start" => Some(Self::Start),
            "/help" => Some(Self::Help),
            "/subscribe" => Some(Self::Subscribe),
            "/unsubscribe" => Some(Self::Unsubscribe),
            _ => None,
        }
    }
}

/// Subscribe/unsubscribe listener over Bot API long-polling.
pub struct CommandListener {
    client: Arc<TelegramClient>,
    registry: Arc<dyn SubscriberRegistry>,
    poll_timeout: Duration,
}

impl CommandListener {
    /// Create a listener over injected collaborators.
    pub fn new(
        client: Arc<TelegramClient>,
        registry: Arc<dyn SubscriberRegistry>,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            poll_timeout,
        }
    }

    /// Run until the shutdown signal fires.
    pub async fn run(self, mut shutdown: ShutdownSignal) -> Result<()> {
        info!("Command listener starting");
        let mut offset: Option<i64> = None;

        while !shutdown.is_signalled() {
            // Cancelling the long-poll on shutdown is safe: unacknowledged
            // updates are re-delivered on the next getUpdates call.
            let updates = tokio::select! {
                _ = shutdown.recv() => break,
                polled = self.client.get_updates(offset, self.poll_timeout) => polled,
            };

            match updates {
                Ok(updates) => {
                    for update in updates {
                        let next = update.update_id + 1;
                        offset = Some(offset.map_or(next, |o| o.max(next)));
                        self.handle_update(update).await;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "getUpdates failed, backing off");
                    if shutdown.sleep_unless_signalled(POLL_RETRY_DELAY).await {
                        break;
                    }
                }
            }
        }

        info!("Command listener stopped");
        Ok(())
    }

    async fn handle_update(&self, update: crate::telegram::Update) {
        let Some(message) = update.message else {
            return;
        };
        let Some(text) = message.text.as_deref() else {
            return;
        };
        let Some(command) = Command::parse(text) else {
            return;
        };

        let chat_id = message.chat.id;
        let reply = self.execute(command, chat_id).await;
        if let Err(e) = self.client.send_text(chat_id, &reply).await {
            warn!(chat_id, error = %e, "Failed to answer command");
        }
    }

    async fn execute(&self, command: Command, chat_id: i64) -> String {
        match command {
            Command::Start => WELCOME_TEXT.to_string(),
            Command::Help => HELP_TEXT.to_string(),
            Command::Subscribe => match self.registry.add(chat_id).await {
                Ok(true) => "You are subscribed to promo notifications.".to_string(),
                Ok(false) => "You are already subscribed.".to_string(),
                Err(e) => {
                    error!(chat_id, error = %e, "Failed to add subscriber");
                    ERROR_TEXT.to_string()
                }
            },
            Command::Unsubscribe => match self.registry.remove(chat_id).await {
                Ok(true) => "You are unsubscribed from promo notifications.".to_string(),
                Ok(false) => "You were not subscribed.".to_string(),
                Err(e) => {
                    error!(chat_id, error = %e, "Failed to remove subscriber");
                    ERROR_TEXT.to_string()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;
    use crate::error::Result;
    use async_trait::async_trait;
    use std::collections::BTreeSet;
    use tokio::sync::Mutex;

    struct MemoryRegistry {
        subscribers: Mutex<BTreeSet<i64>>,
    }

    impl MemoryRegistry {
        fn new() -> Self {
            Self {
                subscribers: Mutex::new(BTreeSet::new()),
            }
        }
    }

    #[async_trait]
    impl SubscriberRegistry for MemoryRegistry {
        async fn list(&self) -> Result<BTreeSet<i64>> {
            Ok(self.subscribers.lock().await.clone())
        }

        async fn add(&self, id: i64) -> Result<bool> {
            Ok(self.subscribers.lock().await.insert(id))
        }

        async fn remove(&self, id: i64) -> Result<bool> {
            Ok(self.subscribers.lock().await.remove(&id))
        }
    }

    fn listener(registry: Arc<MemoryRegistry>) -> CommandListener {
        let config = TelegramConfig {
            token: "123:test".to_string(),
            api_url: "https://api.telegram.org".to_string(),
            send_timeout_ms: 1_000,
            poll_timeout_secs: 1,
        };
        CommandListener::new(
            Arc::new(TelegramClient::new(&config).unwrap()),
            registry,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_command_parse() {
        assert_eq!(Command::parse("/subscribe"), Some(Command::Subscribe));
        assert_eq!(Command::parse("  /unsubscribe  "), Some(Command::Unsubscribe));
        assert_eq!(Command::parse("/start@promo_bot"), Some(Command::Start));
        assert_eq!(Command::parse("/help extra words"), Some(Command::Help));
        assert_eq!(Command::parse("hello there"), None);
        assert_eq!(Command::parse(""), None);
    }

    #[tokio::test]
    async fn test_subscribe_then_duplicate() {
        let registry = Arc::new(MemoryRegistry::new());
        let listener = listener(registry.clone());

        let first = listener.execute(Command::Subscribe, 42).await;
        assert_eq!(first, "You are subscribed to promo notifications.");
        assert!(registry.list().await.unwrap().contains(&42));

        let second = listener.execute(Command::Subscribe, 42).await;
        assert_eq!(second, "You are already subscribed.");
    }

    #[tokio::test]
    async fn test_unsubscribe_paths() {
        let registry = Arc::new(MemoryRegistry::new());
        let listener = listener(registry.clone());

        let absent = listener.execute(Command::Unsubscribe, 7).await;
        assert_eq!(absent, "You were not subscribed.");

        registry.add(7).await.unwrap();
        let removed = listener.execute(Command::Unsubscribe, 7).await;
        assert_eq!(removed, "You are unsubscribed from promo notifications.");
        assert!(registry.list().await.unwrap().is_empty());
    }
}
