//! # promorelay-core - Change events and notification text
//!
//! Data model and formatting for the promo-directory change relay.
//! This crate is pure: no I/O, no async, no transport concerns.
//!
//! ```text
//! ┌───────────────┐    ┌──────────────────────┐    ┌──────────────────┐
//! │ JSON record   │───▶│  ChangeEvent         │───▶│ notification     │
//! │ (wal tailer)  │    │  { table, action,    │    │ text             │
//! │               │    │    data, dataOld }   │    │ "🆕 New city: …" │
//! └───────────────┘    └──────────────────────┘    └──────────────────┘
//! ```
//!
//! [`ChangeEvent`] mirrors the wire shape emitted by the replication-log
//! tailer; [`format_notification`] turns one event into the text that is
//! fanned out to subscribers. Formatting is total: unknown tables and
//! malformed payloads degrade to a generic fallback instead of failing.

mod event;
mod format;

pub use event::{ChangeAction, ChangeEvent, Row, SourceTable};
pub use format::format_notification;
