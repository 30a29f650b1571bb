use std::collections::VecDeque;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard, Weak};

use futures::future::join_all;
use futures::FutureExt;

use crate::config::QUEUE_STORAGE_KEY;
use crate::logger::Logger;
use crate::platform::runtime;
use crate::platform::StorageHandle;
use crate::queue::types::{
    FlushOutcome, ListenerId, QueueDeliveryListener, QueueSettings, QueuedEvent, TrackingPayload,
};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@unified-tracking/queue"));

/// Durable FIFO of pending deliveries with batching, retry at the head, and a soft
/// backpressure flush.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone)]
pub struct EventQueue {
    inner: Arc<Inner>,
}

struct Inner {
    storage: StorageHandle,
    settings: Mutex<QueueSettings>,
    events: Mutex<VecDeque<QueuedEvent>>,
    listeners: Mutex<Vec<(ListenerId, Arc<dyn QueueDeliveryListener>)>>,
    next_listener_id: AtomicU64,
    flushing: AtomicBool,
    running: AtomicBool,
    timer_generation: AtomicU64,
    /// Bumped by `clear`; a batch drained before the bump is not put back.
    clear_epoch: AtomicU64,
}

impl fmt::Debug for EventQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventQueue")
            .field("size", &self.queue_size())
            .field("settings", &self.settings())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Clears the in-progress flag when the flush that set it finishes, however it finishes.
struct FlushGuard<'a>(&'a AtomicBool);

impl Drop for FlushGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl EventQueue {
    /// Creates the queue and restores whatever a previous run persisted.
    ///
    /// Missing or unreadable data yields an empty queue.
    pub fn new(storage: StorageHandle, settings: QueueSettings) -> Self {
        let events = load_persisted(&storage, settings.max_retries);
        if !events.is_empty() {
            LOGGER.debug(format!("restored {} queued event(s)", events.len()));
        }
        Self {
            inner: Arc::new(Inner {
                storage,
                settings: Mutex::new(settings),
                events: Mutex::new(events),
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                flushing: AtomicBool::new(false),
                running: AtomicBool::new(false),
                timer_generation: AtomicU64::new(0),
                clear_epoch: AtomicU64::new(0),
            }),
        }
    }

    /// Appends `payload` at the tail and returns the id of the new entry.
    ///
    /// Once the queue holds twice the batch size an out-of-band flush is scheduled; the call
    /// itself never waits for delivery.
    pub fn add(&self, payload: TrackingPayload) -> String {
        let event = QueuedEvent::new(payload);
        let id = event.id.clone();
        let len = {
            let mut events = self.inner.lock_events();
            events.push_back(event);
            self.inner.persist(&events);
            events.len()
        };
        if len >= self.settings().batch_size.saturating_mul(2) {
            LOGGER.debug(format!("queue reached {len} event(s); flushing early"));
            self.trigger_flush();
        }
        id
    }

    /// Starts the periodic flush timer and runs one flush right away.
    pub async fn start(&self) -> FlushOutcome {
        if !self.inner.running.swap(true, Ordering::SeqCst) {
            let generation = self.inner.timer_generation.fetch_add(1, Ordering::SeqCst) + 1;
            self.spawn_timer(generation);
        }
        self.flush().await
    }

    /// Cancels the periodic timer; its next tick does nothing.
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            self.inner.timer_generation.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Delivers up to one batch from the head of the queue to every listener.
    ///
    /// At most one flush runs at a time; an overlapping call returns
    /// [`FlushOutcome::InProgress`] without touching the queue. When any listener rejects the
    /// batch, the whole batch goes back to the head with `retry_count + 1`, and events that
    /// already reached the retry limit are dropped.
    pub async fn flush(&self) -> FlushOutcome {
        if self
            .inner
            .flushing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return FlushOutcome::InProgress;
        }
        let _guard = FlushGuard(&self.inner.flushing);

        let listeners: Vec<Arc<dyn QueueDeliveryListener>> = self
            .inner
            .lock_listeners()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        if listeners.is_empty() {
            return FlushOutcome::Idle;
        }

        let settings = self.settings();
        let (batch, epoch) = {
            let mut events = self.inner.lock_events();
            let take = settings.batch_size.min(events.len());
            let batch: Vec<QueuedEvent> = events.drain(..take).collect();
            if !batch.is_empty() {
                self.inner.persist(&events);
            }
            (batch, self.inner.clear_epoch.load(Ordering::SeqCst))
        };
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        let outcomes = join_all(listeners.iter().map(|listener| {
            AssertUnwindSafe(listener.deliver(&batch)).catch_unwind()
        }))
        .await;

        let mut rejections = 0usize;
        for outcome in outcomes {
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    rejections += 1;
                    log::debug!("queue listener rejected batch: {err}");
                }
                Err(_) => {
                    rejections += 1;
                    log::warn!("queue listener panicked while delivering a batch");
                }
            }
        }

        if rejections == 0 {
            return FlushOutcome::Delivered {
                events: batch.len(),
            };
        }

        let (requeued, dropped) = self.requeue(batch, epoch);
        if dropped > 0 {
            LOGGER.warn(format!(
                "dropped {dropped} event(s) after {} failed deliveries",
                settings.max_retries + 1
            ));
        }
        FlushOutcome::Failed { requeued, dropped }
    }

    /// Puts `batch` back at the head in its original order, unless the queue was cleared
    /// after the batch was drained from it.
    fn requeue(&self, batch: Vec<QueuedEvent>, epoch: u64) -> (usize, usize) {
        let mut requeued = 0;
        let mut dropped = 0;
        let mut events = self.inner.lock_events();
        if self.inner.clear_epoch.load(Ordering::SeqCst) != epoch {
            LOGGER.debug(format!(
                "queue cleared during delivery; discarding {} failed event(s)",
                batch.len()
            ));
            return (0, 0);
        }
        let max_retries = self.settings().max_retries;
        for mut event in batch.into_iter().rev() {
            if event.retry_count < max_retries {
                event.retry_count += 1;
                events.push_front(event);
                requeued += 1;
            } else {
                dropped += 1;
            }
        }
        self.inner.persist(&events);
        (requeued, dropped)
    }

    /// Empties the queue and deletes the persisted copy.
    pub fn clear(&self) {
        let mut events = self.inner.lock_events();
        events.clear();
        self.inner.clear_epoch.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.inner.storage.remove(QUEUE_STORAGE_KEY) {
            log::warn!("failed to remove persisted queue: {err}");
        }
    }

    pub fn queue_size(&self) -> usize {
        self.inner.lock_events().len()
    }

    /// Copy of the pending events, head first.
    pub fn snapshot(&self) -> Vec<QueuedEvent> {
        self.inner.lock_events().iter().cloned().collect()
    }

    pub fn add_listener(&self, listener: Arc<dyn QueueDeliveryListener>) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.inner.lock_listeners().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.lock_listeners();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn settings(&self) -> QueueSettings {
        self.inner.settings()
    }

    /// Replaces batch size, interval, and retry limit. A running timer picks up the new
    /// interval on its next tick.
    ///
    /// Pending events that already exceed a lowered retry limit are discarded.
    pub fn update_settings(&self, settings: QueueSettings) {
        let mut events = self.inner.lock_events();
        *self
            .inner
            .settings
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = settings;
        let before = events.len();
        events.retain(|event| event.retry_count <= settings.max_retries);
        let pruned = before - events.len();
        if pruned > 0 {
            LOGGER.debug(format!(
                "discarded {pruned} event(s) over the new retry limit of {}",
                settings.max_retries
            ));
            self.inner.persist(&events);
        }
    }

    fn trigger_flush(&self) {
        let queue = self.clone();
        runtime::spawn_detached(async move {
            if let FlushOutcome::Failed { requeued, dropped } = queue.flush().await {
                log::debug!("out-of-band flush failed: {requeued} requeued, {dropped} dropped");
            }
        });
    }

    fn spawn_timer(&self, generation: u64) {
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        runtime::spawn_detached(async move {
            loop {
                let interval = match weak.upgrade() {
                    Some(inner) => inner.settings().flush_interval,
                    None => return,
                };
                runtime::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if !inner.running.load(Ordering::SeqCst)
                    || inner.timer_generation.load(Ordering::SeqCst) != generation
                {
                    return;
                }
                let queue = EventQueue { inner };
                if let FlushOutcome::Failed { requeued, dropped } = queue.flush().await {
                    log::debug!("periodic flush failed: {requeued} requeued, {dropped} dropped");
                }
            }
        });
    }
}

impl Inner {
    fn settings(&self) -> QueueSettings {
        let settings = *self
            .settings
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        settings
    }

    fn lock_events(&self) -> MutexGuard<'_, VecDeque<QueuedEvent>> {
        self.events.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    fn lock_listeners(
        &self,
    ) -> MutexGuard<'_, Vec<(ListenerId, Arc<dyn QueueDeliveryListener>)>> {
        self.listeners
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn persist(&self, events: &VecDeque<QueuedEvent>) {
        let result = match serde_json::to_string(events) {
            Ok(raw) => self.storage.set(QUEUE_STORAGE_KEY, &raw),
            Err(err) => {
                log::warn!("failed to serialize event queue: {err}");
                return;
            }
        };
        if let Err(err) = result {
            log::warn!("failed to persist event queue: {err}");
        }
    }
}

fn load_persisted(storage: &StorageHandle, max_retries: u32) -> VecDeque<QueuedEvent> {
    let raw = match storage.get(QUEUE_STORAGE_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return VecDeque::new(),
        Err(err) => {
            log::warn!("failed to read persisted queue: {err}");
            return VecDeque::new();
        }
    };
    match serde_json::from_str::<Vec<QueuedEvent>>(&raw) {
        Ok(events) => events
            .into_iter()
            .filter(|event| event.retry_count <= max_retries)
            .collect(),
        Err(err) => {
            LOGGER.warn(format!("discarding corrupt persisted queue: {err}"));
            VecDeque::new()
        }
    }
}
