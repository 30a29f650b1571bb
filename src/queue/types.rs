use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::config::constants::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_RETRIES};
use crate::config::BatchingConfig;
use crate::error::TrackingResult;
use crate::provider::{ErrorContext, ErrorReport, Properties, RevenueData};

/// A facade call captured for later delivery.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum TrackingPayload {
    Track {
        event: String,
        properties: Properties,
    },
    Identify {
        user_id: String,
        traits: Properties,
    },
    Error {
        error: ErrorReport,
        context: ErrorContext,
    },
    Revenue(RevenueData),
    ScreenView {
        screen_name: String,
        properties: Properties,
    },
    UserProperties {
        properties: Properties,
    },
}

impl TrackingPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            TrackingPayload::Track { .. } => EventKind::Track,
            TrackingPayload::Identify { .. } => EventKind::Identify,
            TrackingPayload::Error { .. } => EventKind::Error,
            TrackingPayload::Revenue(_) => EventKind::Revenue,
            TrackingPayload::ScreenView { .. } => EventKind::ScreenView,
            TrackingPayload::UserProperties { .. } => EventKind::UserProperties,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Track,
    Identify,
    Error,
    Revenue,
    ScreenView,
    UserProperties,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Track => "track",
            EventKind::Identify => "identify",
            EventKind::Error => "error",
            EventKind::Revenue => "revenue",
            EventKind::ScreenView => "screenView",
            EventKind::UserProperties => "userProperties",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pending delivery as held in memory and persisted to storage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedEvent {
    pub id: String,
    /// Milliseconds since the Unix epoch.
    pub enqueued_at: i64,
    pub payload: TrackingPayload,
    #[serde(default)]
    pub retry_count: u32,
}

impl QueuedEvent {
    pub(crate) fn new(payload: TrackingPayload) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: generate_event_id(now),
            enqueued_at: now,
            payload,
            retry_count: 0,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

fn generate_event_id(now: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{now}-{suffix}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_retries: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl From<&BatchingConfig> for QueueSettings {
    fn from(batching: &BatchingConfig) -> Self {
        Self {
            batch_size: batching.max_size.max(1),
            flush_interval: batching.flush_interval(),
            max_retries: batching.max_retries,
        }
    }
}

/// Receives batches taken from the head of the queue. Returning `Err` puts the batch back.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait QueueDeliveryListener: Send + Sync {
    async fn deliver(&self, batch: &[QueuedEvent]) -> TrackingResult<()>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Another flush was running; this call did nothing.
    InProgress,
    /// Nothing to deliver, or nobody to deliver to.
    Idle,
    Delivered { events: usize },
    Failed { requeued: usize, dropped: usize },
}
