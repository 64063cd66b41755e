//! End-to-end pipeline scenarios over the trait seams: scripted change
//! source, in-memory registry, recording chat sender.

use async_trait::async_trait;
use promorelay_core::{ChangeAction, ChangeEvent, Row};
use promorelayd::config::RelaySettings;
use promorelayd::error::{RelayError, Result};
use promorelayd::fanout::FanoutRunner;
use promorelayd::registry::SubscriberRegistry;
use promorelayd::shutdown::ShutdownController;
use promorelayd::source::ChangeSource;
use promorelayd::telegram::ChatSender;
use serde_json::json;
use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn row(value: serde_json::Value) -> Row {
    value.as_object().cloned().expect("object literal")
}

/// Change source driven by a script the test can extend while running.
#[derive(Clone, Default)]
struct Script {
    polls: Arc<Mutex<VecDeque<Result<Vec<ChangeEvent>>>>>,
    reconnect_failures: Arc<Mutex<VecDeque<RelayError>>>,
    reconnects: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl Script {
    fn push_poll(&self, outcome: Result<Vec<ChangeEvent>>) {
        self.polls.lock().unwrap().push_back(outcome);
    }

    fn push_reconnect_failure(&self, error: RelayError) {
        self.reconnect_failures.lock().unwrap().push_back(error);
    }

    fn source(&self) -> Box<dyn ChangeSource> {
        Box::new(ScriptedSource {
            script: self.clone(),
        })
    }
}

struct ScriptedSource {
    script: Script,
}

#[async_trait]
impl ChangeSource for ScriptedSource {
    async fn poll(&mut self) -> Result<Vec<ChangeEvent>> {
        match self.script.polls.lock().unwrap().pop_front() {
            Some(outcome) => outcome,
            None => Ok(Vec::new()),
        }
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.script.reconnects.fetch_add(1, Ordering::SeqCst);
        match self.script.reconnect_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn close(self: Box<Self>) {
        self.script.closed.store(true, Ordering::SeqCst);
    }
}

struct MemoryRegistry {
    subscribers: Mutex<BTreeSet<i64>>,
}

impl MemoryRegistry {
    fn with(ids: impl IntoIterator<Item = i64>) -> Arc<Self> {
        Arc::new(Self {
            subscribers: Mutex::new(ids.into_iter().collect()),
        })
    }
}

#[async_trait]
impl SubscriberRegistry for MemoryRegistry {
    async fn list(&self) -> Result<BTreeSet<i64>> {
        Ok(self.subscribers.lock().unwrap().clone())
    }

    async fn add(&self, id: i64) -> Result<bool> {
        Ok(self.subscribers.lock().unwrap().insert(id))
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        Ok(self.subscribers.lock().unwrap().remove(&id))
    }
}

struct RecordingSender {
    sent: Mutex<Vec<(i64, String)>>,
    failing: BTreeSet<i64>,
}

impl RecordingSender {
    fn new() -> Arc<Self> {
        Self::failing_for([])
    }

    fn failing_for(ids: impl IntoIterator<Item = i64>) -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            failing: ids.into_iter().collect(),
        })
    }

    fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatSender for RecordingSender {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<()> {
        if self.failing.contains(&chat_id) {
            return Err(RelayError::delivery(chat_id, "bot was blocked by the user"));
        }
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(())
    }
}

fn test_settings() -> RelaySettings {
    RelaySettings {
        poll_timeout_ms: 50,
        idle_sleep_ms: 2,
        reconnect_backoff_ms: 2,
    }
}

async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within deadline");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn category_insert_reaches_every_subscriber() {
    let script = Script::default();
    script.push_poll(Ok(vec![ChangeEvent::insert(
        "promo_category",
        row(json!({"name": "Food"})),
    )]));

    let registry = MemoryRegistry::with([111, 222]);
    let sender = RecordingSender::new();
    let runner = FanoutRunner::new(
        script.source(),
        registry,
        sender.clone(),
        test_settings(),
    );
    let stats = runner.stats();

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));

    wait_until(|| sender.sent().len() == 2).await;
    shutdown.signal();
    task.await.unwrap().unwrap();

    let sent = sender.sent();
    let recipients: BTreeSet<i64> = sent.iter().map(|(id, _)| *id).collect();
    assert_eq!(recipients, BTreeSet::from([111, 222]));
    for (_, text) in &sent {
        assert!(text.contains("New category"), "got: {text}");
        assert!(text.contains("Food"), "got: {text}");
    }

    let snapshot = stats.snapshot();
    assert_eq!(snapshot.events_received, 1);
    assert_eq!(snapshot.notifications_sent, 2);
    assert_eq!(snapshot.delivery_failures, 0);
    assert!(script.closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn offer_update_renders_transition() {
    let script = Script::default();
    script.push_poll(Ok(vec![ChangeEvent::update(
        "promo_offer",
        Some(row(json!({"title": "Old"}))),
        row(json!({"title": "New"})),
    )]));

    let sender = RecordingSender::new();
    let runner = FanoutRunner::new(
        script.source(),
        MemoryRegistry::with([1]),
        sender.clone(),
        test_settings(),
    );

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));
    wait_until(|| !sender.sent().is_empty()).await;
    shutdown.signal();
    task.await.unwrap().unwrap();

    let (_, text) = &sender.sent()[0];
    assert!(text.contains("Old"), "got: {text}");
    assert!(text.contains('→'), "got: {text}");
    assert!(text.contains("New"), "got: {text}");
}

#[tokio::test]
async fn city_delete_without_data_still_delivers() {
    let script = Script::default();
    script.push_poll(Ok(vec![ChangeEvent {
        table: "promo_city".to_string(),
        action: ChangeAction::Delete,
        data: None,
        data_old: Some(row(json!({"name": "Ufa"}))),
    }]));

    let sender = RecordingSender::new();
    let runner = FanoutRunner::new(
        script.source(),
        MemoryRegistry::with([1]),
        sender.clone(),
        test_settings(),
    );

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));
    wait_until(|| !sender.sent().is_empty()).await;
    shutdown.signal();
    task.await.unwrap().unwrap();

    let (_, text) = &sender.sent()[0];
    assert!(text.contains("Deleted city"), "got: {text}");
    assert!(text.contains("Ufa"), "got: {text}");
}

#[tokio::test]
async fn failing_recipient_does_not_block_the_rest() {
    let script = Script::default();
    script.push_poll(Ok(vec![ChangeEvent::insert(
        "promo_partner",
        row(json!({"name": "Acme"})),
    )]));

    let registry = MemoryRegistry::with([111, 222]);
    let sender = RecordingSender::failing_for([111]);
    let runner = FanoutRunner::new(
        script.source(),
        registry,
        sender.clone(),
        test_settings(),
    );
    let stats = runner.stats();

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));
    wait_until(|| !sender.sent().is_empty()).await;

    // The loop keeps running: a later event is still delivered.
    script.push_poll(Ok(vec![ChangeEvent::insert(
        "promo_city",
        row(json!({"name": "Kazan"})),
    )]));
    wait_until(|| sender.sent().len() == 2).await;

    shutdown.signal();
    task.await.unwrap().unwrap();

    let sent = sender.sent();
    assert!(sent.iter().all(|(id, _)| *id == 222));
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.notifications_sent, 2);
    assert_eq!(snapshot.delivery_failures, 2);
}

#[tokio::test]
async fn poll_failure_triggers_single_reconnect_then_resumes() {
    let script = Script::default();
    script.push_poll(Err(RelayError::broker("fetch timed out")));
    script.push_poll(Ok(vec![ChangeEvent::insert(
        "promo_category",
        row(json!({"name": "Travel"})),
    )]));

    let sender = RecordingSender::new();
    let runner = FanoutRunner::new(
        script.source(),
        MemoryRegistry::with([9]),
        sender.clone(),
        test_settings(),
    );
    let stats = runner.stats();

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));
    wait_until(|| !sender.sent().is_empty()).await;
    shutdown.signal();
    task.await.unwrap().unwrap();

    assert_eq!(script.reconnects.load(Ordering::SeqCst), 1);
    assert!(sender.sent()[0].1.contains("Travel"));
    assert_eq!(stats.snapshot().reconnects, 1);
}

#[tokio::test]
async fn failed_reconnect_backs_off_and_retries() {
    let script = Script::default();
    script.push_poll(Err(RelayError::broker("connection reset")));
    script.push_reconnect_failure(RelayError::broker("still unreachable"));
    script.push_poll(Ok(vec![ChangeEvent::insert(
        "promo_offer",
        row(json!({"title": "Deal"})),
    )]));

    let sender = RecordingSender::new();
    let runner = FanoutRunner::new(
        script.source(),
        MemoryRegistry::with([3]),
        sender.clone(),
        test_settings(),
    );

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));
    wait_until(|| !sender.sent().is_empty()).await;
    shutdown.signal();
    task.await.unwrap().unwrap();

    // First reconnect failed, the cycle retried and the event arrived.
    assert_eq!(script.reconnects.load(Ordering::SeqCst), 1);
    assert!(sender.sent()[0].1.contains("Deal"));
}

#[tokio::test]
async fn registry_changes_apply_without_restart() {
    let script = Script::default();
    script.push_poll(Ok(vec![ChangeEvent::insert(
        "promo_city",
        row(json!({"name": "Perm"})),
    )]));

    let registry = MemoryRegistry::with([1]);
    let sender = RecordingSender::new();
    let runner = FanoutRunner::new(
        script.source(),
        registry.clone(),
        sender.clone(),
        test_settings(),
    );

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));
    wait_until(|| sender.sent().len() == 1).await;

    // Subscribe a second recipient mid-run; the next batch reaches both.
    registry.add(2).await.unwrap();
    script.push_poll(Ok(vec![ChangeEvent::insert(
        "promo_city",
        row(json!({"name": "Sochi"})),
    )]));
    wait_until(|| sender.sent().len() == 3).await;

    shutdown.signal();
    task.await.unwrap().unwrap();

    let second_batch: BTreeSet<i64> = sender
        .sent()
        .iter()
        .filter(|(_, text)| text.contains("Sochi"))
        .map(|(id, _)| *id)
        .collect();
    assert_eq!(second_batch, BTreeSet::from([1, 2]));
}

#[tokio::test]
async fn unknown_table_falls_back_to_generic_text() {
    let script = Script::default();
    script.push_poll(Ok(vec![ChangeEvent::insert(
        "promo_banner",
        row(json!({"name": "x"})),
    )]));

    let sender = RecordingSender::new();
    let runner = FanoutRunner::new(
        script.source(),
        MemoryRegistry::with([4]),
        sender.clone(),
        test_settings(),
    );

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));
    wait_until(|| !sender.sent().is_empty()).await;
    shutdown.signal();
    task.await.unwrap().unwrap();

    assert_eq!(sender.sent()[0].1, "Change in promo_banner: INSERT");
}

#[tokio::test]
async fn shutdown_stops_an_idle_loop() {
    let script = Script::default();
    let sender = RecordingSender::new();
    let runner = FanoutRunner::new(
        script.source(),
        MemoryRegistry::with([]),
        sender.clone(),
        test_settings(),
    );

    let shutdown = ShutdownController::new();
    let task = tokio::spawn(runner.run(shutdown.subscribe()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    shutdown.signal();

    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("loop did not stop after shutdown")
        .unwrap()
        .unwrap();
    assert!(script.closed.load(Ordering::SeqCst));
}
