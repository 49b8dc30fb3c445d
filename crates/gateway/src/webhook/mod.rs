//! Webhook intake and processing.
//!
//! [`WebhookProcessor::on_webhook`] only enqueues. A single consumer loop
//! ([`WebhookProcessor::run`]) takes events in arrival order, one per cadence
//! tick. Data-changing events never touch consolidated state directly: they
//! schedule a delayed resync through the sync orchestrator, the only writer of
//! that state. Failed events go back to the end of the queue until their
//! attempts run out, then land in the dead-letter list.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, error, info, warn};
use serde_json::Value;
use tokio::sync::{mpsc, watch};

use crate::clock::Clock;
use crate::errors::{GatewayError, Result};
use crate::health::HealthTracker;
use crate::models::{DeadLetter, HealthStatus, WebhookEvent, WebhookEventType};
use crate::registry::ProviderRegistry;
use crate::sync::SyncOrchestrator;

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Pause between two processed events.
    pub cadence: Duration,
    /// Delay before a triggered resync runs.
    pub resync_delay: Duration,
    /// Processing attempts before an event is dead-lettered.
    pub max_attempts: u32,
    /// Attempts for a resync refused with `SyncInProgress`.
    pub max_resync_attempts: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            cadence: Duration::from_secs(1),
            resync_delay: Duration::from_secs(5),
            max_attempts: 5,
            max_resync_attempts: 5,
        }
    }
}

/// Runs the resync a data-changing event calls for.
#[async_trait]
pub trait Resync: Send + Sync {
    /// Resync one provider for one subject. `Ok(false)` means the sync ran
    /// but the provider failed.
    async fn resync(&self, subject_id: &str, provider_id: &str) -> Result<bool>;
}

#[async_trait]
impl Resync for SyncOrchestrator {
    async fn resync(&self, subject_id: &str, provider_id: &str) -> Result<bool> {
        let selection = [provider_id.to_string()];
        let result = self.sync_all(subject_id, Some(&selection), false).await?;
        Ok(result.success)
    }
}

#[derive(Debug, Clone)]
struct QueuedEvent {
    event: WebhookEvent,
    attempts: u32,
}

/// The pending events and the dead-letter list. Scheduled resyncs hold a
/// handle so they can put their event back.
struct EventQueue {
    sender: mpsc::UnboundedSender<QueuedEvent>,
    queued: AtomicUsize,
    dead_letters: Mutex<Vec<DeadLetter>>,
    max_attempts: u32,
    clock: Arc<dyn Clock>,
}

impl EventQueue {
    fn push(&self, queued: QueuedEvent) -> Result<()> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        self.sender.send(queued).map_err(|_| {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            GatewayError::Config("webhook queue is closed".to_string())
        })
    }

    /// Requeue a failed event at the back, or dead-letter it once its
    /// attempts are spent.
    fn fail(&self, queued: QueuedEvent, err: &GatewayError) {
        if queued.attempts >= self.max_attempts {
            error!(
                "[Webhook] Dead-lettering {:?} from '{}' after {} attempts: {}",
                queued.event.event_type, queued.event.provider, queued.attempts, err
            );
            lock(&self.dead_letters).push(DeadLetter {
                event: queued.event,
                attempts: queued.attempts,
                last_error: err.to_string(),
                failed_at: self.clock.now(),
            });
            return;
        }

        warn!(
            "[Webhook] Requeueing {:?} from '{}' (attempt {}): {}",
            queued.event.event_type, queued.event.provider, queued.attempts, err
        );
        if let Err(e) = self.push(queued) {
            error!("[Webhook] Failed to requeue event: {}", e);
        }
    }
}

pub struct WebhookProcessor {
    queue: Arc<EventQueue>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<QueuedEvent>>>,
    registry: Arc<ProviderRegistry>,
    resync: Arc<dyn Resync>,
    health: Arc<HealthTracker>,
    config: WebhookConfig,
    pending_resyncs: Arc<Mutex<HashSet<(String, String)>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| {
        warn!("Webhook processor lock was poisoned, recovering");
        poisoned.into_inner()
    })
}

impl WebhookProcessor {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        resync: Arc<dyn Resync>,
        health: Arc<HealthTracker>,
        clock: Arc<dyn Clock>,
        config: WebhookConfig,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            queue: Arc::new(EventQueue {
                sender,
                queued: AtomicUsize::new(0),
                dead_letters: Mutex::new(Vec::new()),
                max_attempts: config.max_attempts.max(1),
                clock,
            }),
            receiver: Mutex::new(Some(receiver)),
            registry,
            resync,
            health,
            config,
            pending_resyncs: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Enqueue an event and return immediately.
    pub fn on_webhook(&self, event: WebhookEvent) -> Result<()> {
        debug!(
            "[Webhook] Received {:?} from '{}'",
            event.event_type, event.provider
        );
        self.queue.push(QueuedEvent { event, attempts: 0 })
    }

    /// Events waiting to be processed.
    pub fn queue_len(&self) -> usize {
        self.queue.queued.load(Ordering::SeqCst)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock(&self.queue.dead_letters).clone()
    }

    pub fn pending_resyncs(&self) -> usize {
        lock(&self.pending_resyncs).len()
    }

    /// Consume the queue until `shutdown` flips to true.
    ///
    /// Only one consumer may run per processor; a second call returns at once.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let Some(mut receiver) = lock(&self.receiver).take() else {
            warn!("[Webhook] Consumer already running");
            return;
        };
        info!("[Webhook] Consumer started ({:?} cadence)", self.config.cadence);

        loop {
            tokio::select! {
                next = receiver.recv() => {
                    let Some(queued) = next else { break };
                    self.queue.queued.fetch_sub(1, Ordering::SeqCst);
                    self.process(queued, &shutdown);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.cadence) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Unprocessed events stay queued for a later consumer
        *lock(&self.receiver) = Some(receiver);
        info!("[Webhook] Consumer stopped");
    }

    fn process(&self, mut queued: QueuedEvent, shutdown: &watch::Receiver<bool>) {
        queued.attempts += 1;
        match self.handle(&queued, shutdown) {
            Ok(()) => debug!(
                "[Webhook] Processed {:?} from '{}'",
                queued.event.event_type, queued.event.provider
            ),
            Err(err) => self.queue.fail(queued, &err),
        }
    }

    fn handle(&self, queued: &QueuedEvent, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let event = &queued.event;
        if !self.registry.contains(&event.provider) {
            return Err(GatewayError::UnknownProvider(event.provider.clone()));
        }

        if event.event_type.triggers_resync() {
            let subject_id = event.subject_id.clone().ok_or_else(|| {
                GatewayError::Config(format!(
                    "{:?} event from {} has no subjectId",
                    event.event_type, event.provider
                ))
            })?;
            self.schedule_resync(subject_id, queued.clone(), shutdown.clone());
            return Ok(());
        }

        match event.event_type {
            WebhookEventType::ConnectionError => self.health.set(
                &event.provider,
                HealthStatus::Error,
                Some(payload_message(&event.payload, "connection error reported by provider")),
            ),
            WebhookEventType::Maintenance => self.health.set(
                &event.provider,
                HealthStatus::Warning,
                Some(payload_message(&event.payload, "provider under maintenance")),
            ),
            WebhookEventType::NewTransaction | WebhookEventType::BalanceChange => {}
        }
        Ok(())
    }

    /// Schedule a delayed resync of the event's provider for `subject_id`.
    ///
    /// A resync already pending for the same pair absorbs the event. Once
    /// scheduled, the resync owns the event: if it cannot run, the event goes
    /// back to the queue or to the dead-letter list.
    fn schedule_resync(
        &self,
        subject_id: String,
        queued: QueuedEvent,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let provider_id = queued.event.provider.clone();
        let key = (subject_id.clone(), provider_id.clone());
        if !lock(&self.pending_resyncs).insert(key.clone()) {
            debug!(
                "[Webhook] Resync of '{}' for '{}' already pending",
                provider_id, subject_id
            );
            return;
        }

        let resync = Arc::clone(&self.resync);
        let queue = Arc::clone(&self.queue);
        let pending = Arc::clone(&self.pending_resyncs);
        let delay = self.config.resync_delay;
        let max_attempts = self.config.max_resync_attempts.max(1);

        tokio::spawn(async move {
            for attempt in 1..=max_attempts {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        lock(&pending).remove(&key);
                        debug!(
                            "[Webhook] Shutdown before resync of '{}' for '{}', event requeued",
                            provider_id, subject_id
                        );
                        // The attempt never ran
                        let queued = QueuedEvent {
                            attempts: queued.attempts.saturating_sub(1),
                            ..queued
                        };
                        if let Err(e) = queue.push(queued) {
                            error!("[Webhook] Failed to requeue event: {}", e);
                        }
                        return;
                    }
                }
                if attempt == 1 {
                    // Events arriving from here on schedule a fresh resync
                    lock(&pending).remove(&key);
                }

                match resync.resync(&subject_id, &provider_id).await {
                    Ok(success) => {
                        info!(
                            "[Webhook] Resync of '{}' for '{}' done (success: {})",
                            provider_id, subject_id, success
                        );
                        return;
                    }
                    Err(GatewayError::SyncInProgress(_)) if attempt < max_attempts => {
                        debug!(
                            "[Webhook] Subject '{}' busy, retrying resync ({}/{})",
                            subject_id, attempt, max_attempts
                        );
                    }
                    Err(e) => {
                        queue.fail(queued, &e);
                        return;
                    }
                }
            }
        });
    }
}

fn payload_message(payload: &Value, fallback: &str) -> String {
    payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
        .to_string()
}
