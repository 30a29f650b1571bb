#![cfg(not(target_arch = "wasm32"))]

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::MockProvider;
use futures::future::join;
use unified_tracking::config::{BatchingOptions, QUEUE_STORAGE_KEY};
use unified_tracking::platform::{InMemoryStorage, Platform};
use unified_tracking::provider::{ErrorContext, ErrorReport};
use unified_tracking::queue::{
    EventQueue, FlushOutcome, QueueDeliveryListener, QueueSettings, QueuedEvent, TrackingPayload,
};
use unified_tracking::{
    ConsentSettings, ConsentUpdate, DeliveryOutcome, Properties, ProviderConfig,
    ProviderRegistry, TrackingConfig, TrackingError, TrackingResult, UnifiedTracking,
};

fn tracking(registry: ProviderRegistry, storage: Arc<InMemoryStorage>) -> UnifiedTracking {
    UnifiedTracking::builder()
        .registry(registry)
        .storage(storage)
        .platform(Platform::Desktop)
        .build()
}

fn granted() -> ConsentUpdate {
    ConsentSettings::granted().into()
}

fn track(event: &str) -> TrackingPayload {
    TrackingPayload::Track {
        event: event.to_string(),
        properties: Properties::new(),
    }
}

fn queue_with(batch_size: usize) -> EventQueue {
    EventQueue::new(
        Arc::new(InMemoryStorage::new()),
        QueueSettings {
            batch_size,
            flush_interval: Duration::from_secs(60),
            max_retries: 3,
        },
    )
}

struct Accepting;

#[async_trait]
impl QueueDeliveryListener for Accepting {
    async fn deliver(&self, _batch: &[QueuedEvent]) -> TrackingResult<()> {
        Ok(())
    }
}

struct Rejecting;

#[async_trait]
impl QueueDeliveryListener for Rejecting {
    async fn deliver(&self, _batch: &[QueuedEvent]) -> TrackingResult<()> {
        Err(TrackingError::ProviderOperation {
            provider: "backend".into(),
            operation: "deliver",
            message: "offline".into(),
        })
    }
}

/// Suspends once so a second flush can start while the batch is in flight.
struct Slow;

#[async_trait]
impl QueueDeliveryListener for Slow {
    async fn deliver(&self, _batch: &[QueuedEvent]) -> TrackingResult<()> {
        tokio::task::yield_now().await;
        Ok(())
    }
}

#[tokio::test(flavor = "current_thread")]
async fn one_invalid_provider_does_not_fail_initialize() {
    let mixpanel = MockProvider::new("mixpanel");
    let segment = MockProvider::new("segment");
    let sentry = MockProvider::new("sentry");
    let registry = ProviderRegistry::new()
        .with(mixpanel.analytics())
        .unwrap()
        .with(segment.analytics().with_required_config(["writeKey"]))
        .unwrap()
        .with(sentry.error_tracking())
        .unwrap();
    let tracking = tracking(registry, Arc::new(InMemoryStorage::new()));

    let result = tracking
        .initialize(
            TrackingConfig::new()
                .with_analytics("mixpanel", ProviderConfig::new())
                .with_analytics("segment", ProviderConfig::new())
                .with_error_tracking("sentry", ProviderConfig::new())
                .with_consent(granted()),
        )
        .await
        .unwrap();

    assert!(result.success);
    let segment_status = result.status("segment").unwrap();
    assert!(!segment_status.initialized);
    assert!(matches!(
        segment_status.error,
        Some(TrackingError::Configuration { .. })
    ));
    assert!(result.status("mixpanel").unwrap().initialized);
    assert!(result.status("sentry").unwrap().initialized);
}

#[tokio::test(flavor = "current_thread")]
async fn rejecting_provider_does_not_block_its_siblings() {
    let flaky = MockProvider::rejecting("flaky");
    let steady = MockProvider::new("steady");
    let registry = ProviderRegistry::new()
        .with(flaky.analytics())
        .unwrap()
        .with(steady.analytics())
        .unwrap();
    let tracking = tracking(registry, Arc::new(InMemoryStorage::new()));
    let errors: Arc<Mutex<Vec<TrackingError>>> = Arc::default();
    let sink = Arc::clone(&errors);
    let _errors = tracking.on_error(move |err| sink.lock().unwrap().push(err.clone()));

    tracking
        .initialize(
            TrackingConfig::new()
                .with_analytics("flaky", ProviderConfig::new())
                .with_analytics("steady", ProviderConfig::new())
                .with_consent(granted()),
        )
        .await
        .unwrap();

    let outcome = tracking.track("checkout", Properties::new()).await.unwrap();
    assert_eq!(
        outcome,
        DeliveryOutcome::Delivered {
            providers: vec!["steady".into()]
        }
    );
    assert_eq!(steady.count("track"), 1);
    assert_eq!(flaky.count("track"), 1);

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].provider(), Some("flaky"));
}

#[tokio::test(flavor = "current_thread")]
async fn denied_analytics_consent_only_silences_analytics() {
    let mixpanel = MockProvider::new("mixpanel");
    let sentry = MockProvider::new("sentry");
    let registry = ProviderRegistry::new()
        .with(mixpanel.analytics())
        .unwrap()
        .with(sentry.error_tracking())
        .unwrap();
    let tracking = tracking(registry, Arc::new(InMemoryStorage::new()));
    tracking
        .initialize(
            TrackingConfig::new()
                .with_analytics("mixpanel", ProviderConfig::new())
                .with_error_tracking("sentry", ProviderConfig::new())
                .with_consent(granted()),
        )
        .await
        .unwrap();

    tracking
        .set_consent(ConsentUpdate::new().analytics(false).error_tracking(true))
        .await;
    tracking.track("hidden", Properties::new()).await.unwrap();
    tracking
        .log_error(ErrorReport::new("Error", "still reported"), ErrorContext::default())
        .await
        .unwrap();

    assert_eq!(mixpanel.count("track"), 0);
    assert_eq!(sentry.calls(), ["log_error:still reported"]);
}

#[tokio::test(flavor = "current_thread")]
async fn flush_takes_one_batch() {
    let queue = queue_with(10);
    let _listener = queue.add_listener(Arc::new(Accepting));
    for i in 0..11 {
        queue.add(track(&format!("event-{i}")));
    }

    assert_eq!(queue.flush().await, FlushOutcome::Delivered { events: 10 });
    assert_eq!(queue.queue_size(), 1);
    assert!(matches!(
        &queue.snapshot()[0].payload,
        TrackingPayload::Track { event, .. } if event == "event-10"
    ));
}

#[tokio::test(flavor = "current_thread")]
async fn failed_batch_returns_to_the_head_in_order() {
    let queue = queue_with(10);
    let _listener = queue.add_listener(Arc::new(Rejecting));
    let ids: Vec<String> = ["a", "b", "c"].iter().map(|name| queue.add(track(name))).collect();

    assert_eq!(
        queue.flush().await,
        FlushOutcome::Failed {
            requeued: 3,
            dropped: 0
        }
    );
    let snapshot = queue.snapshot();
    let requeued: Vec<&str> = snapshot.iter().map(|event| event.id.as_str()).collect();
    assert_eq!(requeued, ids);
    assert!(snapshot.iter().all(|event| event.retry_count == 1));
}

#[tokio::test(flavor = "current_thread")]
async fn event_is_dropped_after_the_last_retry() {
    let queue = queue_with(10);
    let _listener = queue.add_listener(Arc::new(Rejecting));
    queue.add(track("doomed"));

    for _ in 0..3 {
        queue.flush().await;
    }
    assert_eq!(queue.snapshot()[0].retry_count, 3);

    assert_eq!(
        queue.flush().await,
        FlushOutcome::Failed {
            requeued: 0,
            dropped: 1
        }
    );
    assert_eq!(queue.queue_size(), 0);
}

#[tokio::test(flavor = "current_thread")]
async fn concurrent_flushes_remove_one_batch() {
    let queue = queue_with(10);
    let _listener = queue.add_listener(Arc::new(Slow));
    for i in 0..15 {
        queue.add(track(&format!("event-{i}")));
    }

    let (first, second) = join(queue.flush(), queue.flush()).await;
    assert_eq!(first, FlushOutcome::Delivered { events: 10 });
    assert_eq!(second, FlushOutcome::InProgress);
    assert_eq!(queue.queue_size(), 5);
}

#[tokio::test(flavor = "current_thread")]
async fn reset_empties_queue_and_storage() {
    let mixpanel = MockProvider::new("mixpanel");
    let registry = ProviderRegistry::new().with(mixpanel.analytics()).unwrap();
    let storage = Arc::new(InMemoryStorage::new());
    let tracking = tracking(registry, Arc::clone(&storage));
    tracking
        .initialize(
            TrackingConfig::new()
                .with_analytics("mixpanel", ProviderConfig::new())
                .with_batching(BatchingOptions::enabled(10, 60_000))
                .with_consent(granted()),
        )
        .await
        .unwrap();

    tracking.track("pending", Properties::new()).await.unwrap();
    tracking.track("pending", Properties::new()).await.unwrap();
    assert_eq!(tracking.queue_size(), 2);
    assert!(storage.contains_key(QUEUE_STORAGE_KEY));

    tracking.reset().await.unwrap();
    assert_eq!(tracking.queue_size(), 0);
    assert!(!storage.contains_key(QUEUE_STORAGE_KEY));
    assert_eq!(mixpanel.count("reset"), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn queued_events_survive_a_restart() {
    let storage = Arc::new(InMemoryStorage::new());
    let options = TrackingConfig::new()
        .with_analytics("mixpanel", ProviderConfig::new())
        .with_batching(BatchingOptions::enabled(10, 60_000))
        .with_consent(granted());

    let before = MockProvider::new("mixpanel");
    let first = tracking(
        ProviderRegistry::new().with(before.analytics()).unwrap(),
        Arc::clone(&storage),
    );
    first.initialize(options.clone()).await.unwrap();
    first.track("first", Properties::new()).await.unwrap();
    first.track("second", Properties::new()).await.unwrap();
    first.shutdown().await;
    drop(first);
    assert_eq!(before.count("track"), 0);

    let after = MockProvider::new("mixpanel");
    let second = tracking(
        ProviderRegistry::new().with(after.analytics()).unwrap(),
        Arc::clone(&storage),
    );
    assert_eq!(second.queue_size(), 2);
    second
        .initialize(TrackingConfig::new().with_analytics("mixpanel", ProviderConfig::new()))
        .await
        .unwrap();

    assert_eq!(after.calls(), ["track:first", "track:second"]);
    assert_eq!(second.queue_size(), 0);
    assert!(second.consent().analytics);
}
