//! Notifications published to host code: accepted tracking calls, isolated provider errors,
//! and provider lifecycle changes.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::error::TrackingError;
use crate::provider::{ProviderCategory, ProviderState};
use crate::queue::TrackingPayload;

/// What happened to one facade call.
#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryOutcome {
    /// At least one provider accepted the call.
    Delivered { providers: Vec<String> },
    /// Buffered in the event queue under `id`.
    Queued { id: String },
    /// No provider was eligible (consent denied, none ready), so nothing was sent or kept.
    Dropped,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TrackingEvent {
    pub payload: TrackingPayload,
    pub outcome: DeliveryOutcome,
    pub timestamp_ms: i64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProviderStatusChange {
    pub provider: String,
    pub category: ProviderCategory,
    pub previous: ProviderState,
    pub current: ProviderState,
    pub error: Option<TrackingError>,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

#[derive(Clone, Copy)]
enum Channel {
    Tracking,
    Error,
    Status,
}

/// Keeps a notification callback registered until dropped or unsubscribed.
#[must_use = "dropping the handle unsubscribes the listener"]
pub struct ListenerHandle {
    id: u64,
    remover: Arc<dyn Fn(u64) + Send + Sync + 'static>,
    unsubscribed: Arc<AtomicBool>,
}

impl ListenerHandle {
    pub fn unsubscribe(&self) {
        if self
            .unsubscribed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            (self.remover)(self.id);
        }
    }

    /// Drops the handle but leaves the listener registered for the lifetime of the bus.
    pub fn detach(self) {
        self.unsubscribed.store(true, Ordering::SeqCst);
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    tracking: Mutex<Vec<(u64, Callback<TrackingEvent>)>>,
    errors: Mutex<Vec<(u64, Callback<TrackingError>)>>,
    status: Mutex<Vec<(u64, Callback<ProviderStatusChange>)>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_tracking_event<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&TrackingEvent) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.inner.tracking).push((id, Arc::new(callback)));
        self.handle(id, Channel::Tracking)
    }

    pub fn on_error<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&TrackingError) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.inner.errors).push((id, Arc::new(callback)));
        self.handle(id, Channel::Error)
    }

    pub fn on_provider_status_change<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ProviderStatusChange) + Send + Sync + 'static,
    {
        let id = self.next_id();
        lock(&self.inner.status).push((id, Arc::new(callback)));
        self.handle(id, Channel::Status)
    }

    pub(crate) fn emit_tracking(&self, event: &TrackingEvent) {
        notify(&self.inner.tracking, event);
    }

    pub(crate) fn emit_error(&self, error: &TrackingError) {
        notify(&self.inner.errors, error);
    }

    pub(crate) fn emit_status(&self, change: &ProviderStatusChange) {
        notify(&self.inner.status, change);
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.inner.tracking).len() + lock(&self.inner.errors).len() + lock(&self.inner.status).len()
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn handle(&self, id: u64, channel: Channel) -> ListenerHandle {
        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        ListenerHandle {
            id,
            remover: Arc::new(move |id| {
                if let Some(inner) = weak.upgrade() {
                    match channel {
                        Channel::Tracking => lock(&inner.tracking).retain(|(i, _)| *i != id),
                        Channel::Error => lock(&inner.errors).retain(|(i, _)| *i != id),
                        Channel::Status => lock(&inner.status).retain(|(i, _)| *i != id),
                    }
                }
            }),
            unsubscribed: Arc::new(AtomicBool::new(false)),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

/// Calls every callback outside the lock; a panicking callback does not stop the others.
fn notify<T>(listeners: &Mutex<Vec<(u64, Callback<T>)>>, value: &T) {
    let callbacks: Vec<Callback<T>> = lock(listeners)
        .iter()
        .map(|(_, callback)| Arc::clone(callback))
        .collect();
    for callback in callbacks {
        if catch_unwind(AssertUnwindSafe(|| callback(value))).is_err() {
            log::warn!("notification listener panicked");
        }
    }
}
