//! Subscriber registry
//!
//! Durable set of chat recipient ids. The file layout is line-oriented,
//! one decimal id per line, rewritten atomically (write to a temp file,
//! then rename) so a concurrent reader sees either the pre-write or the
//! post-write set, never a torn file.

use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tokio::fs;
use tracing::{debug, info, warn};

/// Durable set of subscriber ids.
///
/// The fan-out loop reads a fresh snapshot every iteration; the command
/// listener adds and removes entries. Implementations must keep writes
/// atomic with respect to concurrent `list` calls.
#[async_trait]
pub trait SubscriberRegistry: Send + Sync {
    /// Current subscriber set.
    async fn list(&self) -> Result<BTreeSet<i64>>;

    /// Add a subscriber. Returns `false` (leaving storage untouched)
    /// when the id is already present.
    async fn add(&self, id: i64) -> Result<bool>;

    /// Remove a subscriber. Returns `false` when the id was absent.
    async fn remove(&self, id: i64) -> Result<bool>;
}

/// File-backed registry, one subscriber id per line.
pub struct FileRegistry {
    path: PathBuf,
}

impl FileRegistry {
    /// Create a registry over the given file path. The file is created
    /// on first write; a missing file reads as the empty set.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The backing file path.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn load(&self) -> Result<BTreeSet<i64>> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(content
                .lines()
                .filter_map(|line| {
                    let line = line.trim();
                    if line.is_empty() {
                        return None;
                    }
                    match line.parse::<i64>() {
                        Ok(id) => Some(id),
                        Err(_) => {
                            warn!(?line, "Skipping malformed registry line");
                            None
                        }
                    }
                })
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, subscribers: &BTreeSet<i64>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut content = String::new();
        for id in subscribers {
            content.push_str(&id.to_string());
            content.push('\n');
        }

        // Write to temp file first, then rename (atomic on most filesystems)
        let temp_path = self.path.with_extension("txt.tmp");
        fs::write(&temp_path, content).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!(subscribers = subscribers.len(), path = %self.path.display(), "Registry written");
        Ok(())
    }
}

#[async_trait]
impl SubscriberRegistry for FileRegistry {
    async fn list(&self) -> Result<BTreeSet<i64>> {
        self.load().await
    }

    async fn add(&self, id: i64) -> Result<bool> {
        let mut subscribers = self.load().await?;
        if !subscribers.insert(id) {
            debug!(chat_id = id, "Subscriber already registered");
            return Ok(false);
        }
        self.store(&subscribers).await?;
        info!(chat_id = id, "Subscriber added");
        Ok(true)
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        let mut subscribers = self.load().await?;
        if !subscribers.remove(&id) {
            debug!(chat_id = id, "Subscriber was not registered");
            return Ok(false);
        }
        self.store(&subscribers).await?;
        info!(chat_id = id, "Subscriber removed");
        Ok(true)
    }
}
