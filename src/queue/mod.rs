//! Durable event queue.
//!
//! Events wait here when they are batched or when every eligible provider failed to take
//! them. The queue is persisted as one JSON array under
//! [`QUEUE_STORAGE_KEY`](crate::config::QUEUE_STORAGE_KEY) after every mutation and restored
//! on construction.

mod event_queue;
pub mod types;

pub use event_queue::EventQueue;
pub use types::{
    EventKind, FlushOutcome, ListenerId, QueueDeliveryListener, QueueSettings, QueuedEvent,
    TrackingPayload,
};
