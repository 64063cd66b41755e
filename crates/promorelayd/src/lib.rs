//! promorelayd - change-notification relay daemon
//!
//! Consumes row-change events for the promo directory from Kafka topics
//! and fans human-readable notifications out to Telegram subscribers.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌────────────────────┐     ┌──────────────────┐
//! │ Kafka topics │────▶│  FanoutRunner      │────▶│ Telegram         │
//! │ (wal tailer) │poll │  format + deliver  │send │ subscribers      │
//! └──────────────┘     └─────────┬──────────┘     └──────────────────┘
//!                                │ list() each iteration
//!                      ┌─────────▼──────────┐
//!                      │ SubscriberRegistry │◀──── CommandListener
//!                      │ (subscribers.txt)  │ add/  (/subscribe,
//!                      └────────────────────┘ remove /unsubscribe)
//! ```
//!
//! The fan-out loop and the command listener run as two cooperative
//! tasks; the subscriber registry is the only shared mutable state and
//! is reached through its trait's atomic read/replace discipline.
//!
//! # Usage
//!
//! ```bash
//! # Run the relay
//! promorelayd -c relay.yaml
//!
//! # Validate configuration
//! promorelayd -c relay.yaml validate
//! ```

pub mod commands;
pub mod config;
pub mod error;
pub mod fanout;
pub mod registry;
pub mod shutdown;
pub mod source;
pub mod telegram;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use fanout::{FanoutRunner, FanoutStats, RunnerStatus};
pub use registry::{FileRegistry, SubscriberRegistry};
pub use shutdown::{ShutdownController, ShutdownSignal};
pub use source::{ChangeSource, KafkaChangeSource};
pub use telegram::{ChatSender, TelegramClient};
