use std::collections::HashSet;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, Mutex, RwLock, Weak};

use async_trait::async_trait;
use futures::future::{join, join_all};
use futures::FutureExt;

use crate::config::{ConfigManager, ConsentSettings, UnifiedConfig};
use crate::error::{
    configuration_error, provider_load_error, provider_operation_error, TrackingError,
    TrackingResult,
};
use crate::events::{DeliveryOutcome, EventBus};
use crate::logger::Logger;
use crate::manager::instance::ProviderInstance;
use crate::manager::types::{FanOutReport, InitializeResult, ProviderStatus};
use crate::platform::Platform;
use crate::provider::{
    AnalyticsProvider, Breadcrumb, ErrorTrackingProvider, ProviderCategory, ProviderContext,
    ProviderEntry, ProviderMetadata, ProviderRegistry, ProviderState, UserContext,
};
use crate::queue::{
    EventQueue, ListenerId, QueueDeliveryListener, QueueSettings, QueuedEvent, TrackingPayload,
};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@unified-tracking/manager"));

/// Owns the configured provider instances and fans every call out to them.
///
/// A failure in one provider never blocks or fails its siblings: initialize failures become
/// per-provider statuses, capability failures are logged and published as `error`
/// notifications, and panics are caught the same way.
pub struct ProviderManager {
    registry: Arc<ProviderRegistry>,
    config: Arc<ConfigManager>,
    queue: EventQueue,
    context: ProviderContext,
    events: EventBus,
    instances: RwLock<Vec<Arc<ProviderInstance>>>,
    batching: AtomicBool,
    replay_listener: Mutex<Option<ListenerId>>,
}

impl ProviderManager {
    /// Creates the manager and registers it as the queue's delivery listener.
    pub fn new(
        registry: Arc<ProviderRegistry>,
        config: Arc<ConfigManager>,
        queue: EventQueue,
        context: ProviderContext,
        events: EventBus,
    ) -> Arc<Self> {
        let manager = Arc::new(Self {
            registry,
            config,
            queue,
            context,
            events,
            instances: RwLock::new(Vec::new()),
            batching: AtomicBool::new(false),
            replay_listener: Mutex::new(None),
        });
        let listener = manager.queue.add_listener(Arc::new(QueueReplay {
            manager: Arc::downgrade(&manager),
        }));
        *manager
            .replay_listener
            .lock()
            .unwrap_or_else(|poison| poison.into_inner()) = Some(listener);
        manager
    }

    /// Replaces the provider set with the one described by `config`.
    ///
    /// Every entry is resolved and validated first; the surviving ones are initialised
    /// concurrently. The returned statuses follow the configuration order, analytics entries
    /// first.
    pub async fn initialize(&self, config: &UnifiedConfig) -> InitializeResult {
        self.shutdown_providers().await;
        self.apply_settings(config);

        let platform = self.context.platform();
        let entries = config
            .analytics_providers
            .iter()
            .map(|entry| (entry, ProviderCategory::Analytics))
            .chain(
                config
                    .error_providers
                    .iter()
                    .map(|entry| (entry, ProviderCategory::ErrorTracking)),
            );

        let mut statuses: Vec<Option<ProviderStatus>> = Vec::new();
        let mut candidates: Vec<(usize, Arc<ProviderInstance>)> = Vec::new();
        let mut seen: HashSet<(ProviderCategory, &str)> = HashSet::new();
        for (index, (entry, category)) in entries.enumerate() {
            let status = if !seen.insert((category, entry.id.as_str())) {
                let err = configuration_error(
                    Some(&entry.id),
                    format!("provider is listed more than once among {category} providers"),
                );
                Some(self.rejected(entry, category, err))
            } else if !entry.config.enabled {
                LOGGER.debug(format!("provider '{}' is disabled by configuration", entry.id));
                Some(ProviderStatus::skipped(&entry.id, category))
            } else {
                match self.prepare(entry, category, platform) {
                    Ok(instance) => {
                        candidates.push((index, Arc::new(instance)));
                        None
                    }
                    Err(err) => Some(self.rejected(entry, category, err)),
                }
            };
            statuses.push(status);
        }

        let consent = self.config.consent();
        let outcomes = join_all(
            candidates
                .iter()
                .map(|(_, instance)| self.start_provider(instance, consent, config.debug)),
        )
        .await;

        let mut instances = Vec::with_capacity(candidates.len());
        for ((index, instance), outcome) in candidates.into_iter().zip(outcomes) {
            statuses[index] = Some(match outcome {
                Ok(()) => ProviderStatus::ready(instance.id(), instance.category()),
                Err(err) => ProviderStatus::failed(instance.id(), instance.category(), err),
            });
            instances.push(instance);
        }
        *self
            .instances
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = instances;
        self.reconcile_consent(consent).await;

        let providers: Vec<ProviderStatus> = statuses.into_iter().flatten().collect();
        LOGGER.info(format!(
            "initialized {} of {} provider(s)",
            providers.iter().filter(|status| status.initialized).count(),
            providers.len()
        ));

        self.queue.start().await;
        InitializeResult {
            success: true,
            providers,
        }
    }

    /// Applies the batching mode and queue settings of `config` without touching providers.
    pub fn apply_settings(&self, config: &UnifiedConfig) {
        self.batching.store(config.batching.enabled, Ordering::SeqCst);
        self.queue.update_settings(QueueSettings::from(&config.batching));
    }

    fn prepare(
        &self,
        entry: &ProviderEntry,
        category: ProviderCategory,
        platform: Platform,
    ) -> TrackingResult<ProviderInstance> {
        let registration = self.registry.resolve(&entry.id)?;
        let metadata = registration.metadata();
        if metadata.category != category {
            return Err(configuration_error(
                Some(&entry.id),
                format!(
                    "registered as a {} provider but configured among {category} providers",
                    metadata.category
                ),
            ));
        }
        registration.validate(&entry.config, platform)?;
        let handle = catch_unwind(AssertUnwindSafe(|| registration.instantiate(&self.context)))
            .unwrap_or_else(|_| Err(provider_load_error(&entry.id, "provider factory panicked")))?;
        Ok(ProviderInstance::new(
            metadata.clone(),
            entry.config.clone(),
            handle,
        ))
    }

    fn rejected(
        &self,
        entry: &ProviderEntry,
        category: ProviderCategory,
        err: TrackingError,
    ) -> ProviderStatus {
        LOGGER.warn(format!("provider '{}' rejected: {err}", entry.id));
        self.events.emit_error(&err);
        ProviderStatus::failed(&entry.id, category, err)
    }

    async fn start_provider(
        &self,
        instance: &ProviderInstance,
        consent: ConsentSettings,
        debug: bool,
    ) -> TrackingResult<()> {
        instance.transition(ProviderState::Initializing, None, &self.events);
        let result = isolate(
            instance.id(),
            "initialize",
            instance.handle().initialize(instance.config()),
        )
        .await
        .map_err(|err| match err {
            TrackingError::Configuration { .. } | TrackingError::ProviderLoad { .. } => err,
            other => provider_load_error(instance.id(), other.to_string()),
        });

        if let Err(err) = result {
            LOGGER.warn(format!("provider '{}' failed to initialize: {err}", instance.id()));
            instance.transition(ProviderState::Failed, Some(err.clone()), &self.events);
            self.events.emit_error(&err);
            return Err(err);
        }

        instance.transition(ProviderState::Ready, None, &self.events);
        if debug || instance.config().debug {
            self.set_provider_debug(instance, true);
        }
        if let Err(err) = isolate(
            instance.id(),
            "update_consent",
            instance.handle().update_consent(&consent),
        )
        .await
        {
            self.report_failure(instance.id(), "update_consent", err);
        }
        if !consent.allows(instance.category()) {
            instance.transition(ProviderState::Disabled, None, &self.events);
        }
        Ok(())
    }

    /// Sends `payload` to every eligible provider, or buffers it.
    ///
    /// With batching on, the payload is queued whenever an eligible provider exists. Without
    /// batching, it is delivered immediately and queued only when every eligible provider
    /// failed to take it. Payloads nobody is eligible for are dropped.
    pub async fn deliver(&self, payload: &TrackingPayload) -> DeliveryOutcome {
        if !self.has_eligible(payload) {
            LOGGER.debug(format!("no eligible provider for {}; dropped", payload.kind()));
            return DeliveryOutcome::Dropped;
        }
        if self.batching.load(Ordering::SeqCst) {
            let id = self.queue.add(payload.clone());
            return DeliveryOutcome::Queued { id };
        }

        let report = self.dispatch(payload).await;
        if report.is_delivered() {
            DeliveryOutcome::Delivered {
                providers: report.delivered,
            }
        } else if report.attempted > 0 {
            let id = self.queue.add(payload.clone());
            LOGGER.debug(format!(
                "all {} provider(s) failed {}; queued as {id}",
                report.attempted,
                payload.kind()
            ));
            DeliveryOutcome::Queued { id }
        } else {
            DeliveryOutcome::Dropped
        }
    }

    /// Fans `payload` out to the eligible providers of its capability and waits for all of
    /// them to settle.
    pub async fn dispatch(&self, payload: &TrackingPayload) -> FanOutReport {
        match payload {
            TrackingPayload::Track { event, properties } => {
                self.analytics_fan_out("track", move |provider| async move {
                    provider.track(event, properties).await
                })
                .await
            }
            TrackingPayload::Identify { user_id, traits } => {
                let user = UserContext::with_id(user_id.clone());
                let user = &user;
                let (mut report, context) = join(
                    self.analytics_fan_out("identify", move |provider| async move {
                        provider.identify(user_id, traits).await
                    }),
                    self.error_fan_out("set_user_context", move |provider| async move {
                        provider.set_user_context(user).await
                    }),
                )
                .await;
                report.absorb(context);
                report
            }
            TrackingPayload::Error { error, context } => {
                self.error_fan_out("log_error", move |provider| async move {
                    provider.log_error(error, context).await
                })
                .await
            }
            TrackingPayload::Revenue(revenue) => {
                self.analytics_fan_out("log_revenue", move |provider| async move {
                    provider.log_revenue(revenue).await
                })
                .await
            }
            TrackingPayload::ScreenView {
                screen_name,
                properties,
            } => {
                self.analytics_fan_out("log_screen_view", move |provider| async move {
                    provider.log_screen_view(screen_name, properties).await
                })
                .await
            }
            TrackingPayload::UserProperties { properties } => {
                self.analytics_fan_out("set_user_properties", move |provider| async move {
                    provider.set_user_properties(properties).await
                })
                .await
            }
        }
    }

    pub async fn add_breadcrumb(&self, breadcrumb: &Breadcrumb) -> FanOutReport {
        self.error_fan_out("add_breadcrumb", move |provider| async move {
            provider.add_breadcrumb(breadcrumb).await
        })
        .await
    }

    pub async fn set_user_context(&self, user: &UserContext) -> FanOutReport {
        self.error_fan_out("set_user_context", move |provider| async move {
            provider.set_user_context(user).await
        })
        .await
    }

    pub async fn clear_user_context(&self) -> FanOutReport {
        self.error_fan_out("clear_user_context", |provider| async move {
            provider.clear_user_context().await
        })
        .await
    }

    /// Pushes `consent` to every live provider and toggles Ready/Disabled to match it.
    pub async fn handle_consent_change(&self, consent: &ConsentSettings) {
        let live: Vec<Arc<ProviderInstance>> = self
            .instances()
            .into_iter()
            .filter(|instance| {
                matches!(
                    instance.state(),
                    ProviderState::Ready | ProviderState::Disabled
                )
            })
            .collect();
        let outcomes = join_all(live.iter().map(|instance| {
            isolate(
                instance.id(),
                "update_consent",
                instance.handle().update_consent(consent),
            )
        }))
        .await;

        for (instance, outcome) in live.iter().zip(outcomes) {
            if let Err(err) = outcome {
                self.report_failure(instance.id(), "update_consent", err);
            }
            match (instance.state(), consent.allows(instance.category())) {
                (ProviderState::Ready, false) => {
                    LOGGER.debug(format!("provider '{}' disabled by consent", instance.id()));
                    instance.transition(ProviderState::Disabled, None, &self.events);
                }
                (ProviderState::Disabled, true) => {
                    LOGGER.debug(format!("provider '{}' re-enabled by consent", instance.id()));
                    instance.transition(ProviderState::Ready, None, &self.events);
                }
                _ => {}
            }
        }
    }

    /// Applies consent that changed while providers were starting. Those changes found no
    /// live instance to update, so the new set started from `applied`.
    async fn reconcile_consent(&self, mut applied: ConsentSettings) {
        loop {
            let latest = self.config.consent();
            if latest == applied {
                return;
            }
            LOGGER.debug("consent changed during initialization; reapplying");
            self.handle_consent_change(&latest).await;
            applied = latest;
        }
    }

    /// Best-effort broadcast; failures are only logged.
    pub fn set_debug_mode(&self, enabled: bool) {
        for instance in self.instances() {
            if matches!(
                instance.state(),
                ProviderState::Ready | ProviderState::Disabled
            ) {
                self.set_provider_debug(&instance, enabled);
            }
        }
    }

    fn set_provider_debug(&self, instance: &ProviderInstance, enabled: bool) {
        match catch_unwind(AssertUnwindSafe(|| instance.handle().set_debug_mode(enabled))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => LOGGER.warn(format!(
                "provider '{}' ignored debug mode change: {err}",
                instance.id()
            )),
            Err(_) => LOGGER.warn(format!(
                "provider '{}' panicked while changing debug mode",
                instance.id()
            )),
        }
    }

    /// Resets analytics identity, clears error-tracking user context, and empties the queue.
    pub async fn reset(&self) -> FanOutReport {
        let (mut report, cleared) = join(
            self.analytics_fan_out("reset", |provider| async move { provider.reset().await }),
            self.error_fan_out("clear_user_context", |provider| async move {
                provider.clear_user_context().await
            }),
        )
        .await;
        report.absorb(cleared);
        self.queue.clear();
        report
    }

    /// Stops the queue timer and shuts every provider down.
    pub async fn shutdown(&self) {
        self.queue.stop();
        self.shutdown_providers().await;
    }

    async fn shutdown_providers(&self) {
        let instances = std::mem::take(
            &mut *self
                .instances
                .write()
                .unwrap_or_else(|poison| poison.into_inner()),
        );
        if instances.is_empty() {
            return;
        }
        let outcomes = join_all(
            instances
                .iter()
                .map(|instance| isolate(instance.id(), "shutdown", instance.handle().shutdown())),
        )
        .await;
        for (instance, outcome) in instances.iter().zip(outcomes) {
            if let Err(err) = outcome {
                LOGGER.warn(format!("provider '{}' failed to shut down: {err}", instance.id()));
            }
            instance.transition(ProviderState::ShutDown, None, &self.events);
        }
    }

    /// Metadata of providers currently taking calls.
    pub fn active_providers(&self) -> Vec<ProviderMetadata> {
        self.instances()
            .iter()
            .filter(|instance| instance.is_available())
            .map(|instance| instance.metadata().clone())
            .collect()
    }

    pub fn provider_states(&self) -> Vec<(String, ProviderState)> {
        self.instances()
            .iter()
            .map(|instance| (instance.id().to_string(), instance.state()))
            .collect()
    }

    pub fn is_batching(&self) -> bool {
        self.batching.load(Ordering::SeqCst)
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    fn instances(&self) -> Vec<Arc<ProviderInstance>> {
        self.instances
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .clone()
    }

    fn has_eligible(&self, payload: &TrackingPayload) -> bool {
        payload_categories(payload)
            .iter()
            .any(|category| !self.available(*category).is_empty())
    }

    /// Instances of `category` that are ready and whose consent flag is granted.
    fn available(&self, category: ProviderCategory) -> Vec<Arc<ProviderInstance>> {
        if !self.config.is_permitted(category) {
            return Vec::new();
        }
        self.instances()
            .into_iter()
            .filter(|instance| instance.category() == category && instance.is_available())
            .collect()
    }

    async fn analytics_fan_out<F, Fut>(&self, operation: &'static str, call: F) -> FanOutReport
    where
        F: Fn(Arc<dyn AnalyticsProvider>) -> Fut,
        Fut: Future<Output = TrackingResult<()>>,
    {
        let targets: Vec<(String, Fut)> = self
            .available(ProviderCategory::Analytics)
            .iter()
            .filter_map(|instance| {
                instance
                    .handle()
                    .as_analytics()
                    .map(|provider| (instance.id().to_string(), call(Arc::clone(provider))))
            })
            .collect();
        self.settle(operation, targets).await
    }

    async fn error_fan_out<F, Fut>(&self, operation: &'static str, call: F) -> FanOutReport
    where
        F: Fn(Arc<dyn ErrorTrackingProvider>) -> Fut,
        Fut: Future<Output = TrackingResult<()>>,
    {
        let targets: Vec<(String, Fut)> = self
            .available(ProviderCategory::ErrorTracking)
            .iter()
            .filter_map(|instance| {
                instance
                    .handle()
                    .as_error_tracking()
                    .map(|provider| (instance.id().to_string(), call(Arc::clone(provider))))
            })
            .collect();
        self.settle(operation, targets).await
    }

    async fn settle<Fut>(&self, operation: &'static str, targets: Vec<(String, Fut)>) -> FanOutReport
    where
        Fut: Future<Output = TrackingResult<()>>,
    {
        let attempted = targets.len();
        let (ids, calls): (Vec<String>, Vec<Fut>) = targets.into_iter().unzip();
        let outcomes = join_all(
            calls
                .into_iter()
                .zip(ids.iter())
                .map(|(call, id)| isolate(id, operation, call)),
        )
        .await;

        let mut report = FanOutReport {
            attempted,
            ..Default::default()
        };
        for (id, outcome) in ids.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => report.delivered.push(id),
                Err(err) => report.failures.push(self.report_failure(&id, operation, err)),
            }
        }
        report
    }

    fn report_failure(&self, provider: &str, operation: &'static str, err: TrackingError) -> TrackingError {
        let err = match err {
            TrackingError::ProviderOperation { .. } => err,
            other => provider_operation_error(provider, operation, other.to_string()),
        };
        LOGGER.warn(err.to_string());
        self.events.emit_error(&err);
        err
    }
}

impl Drop for ProviderManager {
    fn drop(&mut self) {
        let listener = self
            .replay_listener
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .take();
        if let Some(id) = listener {
            self.queue.remove_listener(id);
        }
    }
}

/// Capabilities a payload fans out to. `Identify` reaches both: analytics identify and the
/// error-tracking user context.
fn payload_categories(payload: &TrackingPayload) -> &'static [ProviderCategory] {
    match payload {
        TrackingPayload::Error { .. } => &[ProviderCategory::ErrorTracking],
        TrackingPayload::Identify { .. } => {
            &[ProviderCategory::Analytics, ProviderCategory::ErrorTracking]
        }
        _ => &[ProviderCategory::Analytics],
    }
}

/// Awaits one provider call, turning a panic into an operation error.
async fn isolate<F>(provider: &str, operation: &'static str, call: F) -> TrackingResult<()>
where
    F: Future<Output = TrackingResult<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(_) => Err(provider_operation_error(provider, operation, "provider panicked")),
    }
}

/// Replays queued events through the manager's fan-out.
struct QueueReplay {
    manager: Weak<ProviderManager>,
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl QueueDeliveryListener for QueueReplay {
    async fn deliver(&self, batch: &[QueuedEvent]) -> TrackingResult<()> {
        let Some(manager) = self.manager.upgrade() else {
            return Err(TrackingError::NotInitialized);
        };
        let mut undelivered = 0usize;
        for event in batch {
            if !manager.dispatch(&event.payload).await.is_delivered() {
                undelivered += 1;
            }
        }
        if undelivered > 0 {
            return Err(provider_operation_error(
                "event-queue",
                "replay",
                format!("{undelivered} of {} event(s) reached no provider", batch.len()),
            ));
        }
        Ok(())
    }
}
