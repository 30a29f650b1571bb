use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, RwLock};

use crate::config::{
    ConfigManager, ConsentSettings, ConsentUpdate, PrivacyConfig, TrackingConfig, UnifiedConfig,
};
use crate::error::{invalid_argument, TrackingError, TrackingResult};
use crate::events::{
    DeliveryOutcome, EventBus, ListenerHandle, ProviderStatusChange, TrackingEvent,
};
use crate::logger::{self, LogLevel, Logger};
use crate::manager::{FanOutReport, InitializeResult, ProviderManager};
use crate::platform::{ExternalModuleLoader, InMemoryStorage, Platform, StorageHandle};
use crate::provider::{
    Breadcrumb, ErrorContext, ErrorReport, Properties, ProviderContext, ProviderMetadata,
    ProviderRegistry, RevenueData, UserContext,
};
use crate::queue::{EventQueue, FlushOutcome, QueueSettings, TrackingPayload};

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@unified-tracking/core"));

/// Entry point for application code and platform bindings.
///
/// Every tracking call fails with [`TrackingError::NotInitialized`] until
/// [`initialize`](Self::initialize) has completed, and with
/// [`TrackingError::InvalidArgument`] when its arguments can never be valid. Nothing else
/// surfaces as an error: misbehaving providers are isolated and reported through
/// [`on_error`](Self::on_error).
#[derive(Clone)]
pub struct UnifiedTracking {
    inner: Arc<TrackingInner>,
}

struct TrackingInner {
    registry: Arc<ProviderRegistry>,
    config: Arc<ConfigManager>,
    queue: EventQueue,
    manager: Arc<ProviderManager>,
    events: EventBus,
    privacy: RwLock<PrivacyConfig>,
    initialized: AtomicBool,
    lifecycle: async_lock::Mutex<()>,
}

impl fmt::Debug for UnifiedTracking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnifiedTracking")
            .field("providers", &self.inner.registry.ids())
            .field("initialized", &self.is_initialized())
            .field("queue_size", &self.queue_size())
            .finish()
    }
}

/// Collects the injected capabilities before building a [`UnifiedTracking`].
pub struct UnifiedTrackingBuilder {
    registry: Arc<ProviderRegistry>,
    storage: Option<StorageHandle>,
    loader: Option<Arc<dyn ExternalModuleLoader>>,
    platform: Platform,
}

impl Default for UnifiedTrackingBuilder {
    fn default() -> Self {
        Self {
            registry: Arc::new(ProviderRegistry::new()),
            storage: None,
            loader: None,
            platform: Platform::current(),
        }
    }
}

impl UnifiedTrackingBuilder {
    pub fn registry(mut self, registry: impl Into<Arc<ProviderRegistry>>) -> Self {
        self.registry = registry.into();
        self
    }

    /// Durable storage for consent, settings, and the event queue. Defaults to memory only.
    pub fn storage(mut self, storage: StorageHandle) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn loader(mut self, loader: Arc<dyn ExternalModuleLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn build(self) -> UnifiedTracking {
        let storage: StorageHandle = match self.storage {
            Some(storage) => storage,
            None => Arc::new(InMemoryStorage::new()),
        };
        let config = Arc::new(ConfigManager::new(Arc::clone(&storage)));
        let queue = EventQueue::new(Arc::clone(&storage), QueueSettings::default());
        let mut context = ProviderContext::new(self.platform, storage);
        if let Some(loader) = self.loader {
            context = context.with_loader(loader);
        }
        let events = EventBus::new();
        let manager = ProviderManager::new(
            Arc::clone(&self.registry),
            Arc::clone(&config),
            queue.clone(),
            context,
            events.clone(),
        );
        UnifiedTracking {
            inner: Arc::new(TrackingInner {
                registry: self.registry,
                config,
                queue,
                manager,
                events,
                privacy: RwLock::new(PrivacyConfig::default()),
                initialized: AtomicBool::new(false),
                lifecycle: async_lock::Mutex::new(()),
            }),
        }
    }
}

impl UnifiedTracking {
    pub fn builder() -> UnifiedTrackingBuilder {
        UnifiedTrackingBuilder::default()
    }

    /// Resolves the configuration and (re)initialises every configured provider.
    ///
    /// Per-provider failures are reported in the returned [`InitializeResult`]; only a
    /// configuration document that cannot be resolved at all is an `Err`.
    pub async fn initialize(&self, options: TrackingConfig) -> TrackingResult<InitializeResult> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let config = self.inner.config.load_config(&options)?;
        if config.debug {
            apply_log_level(true);
        }
        self.set_privacy(&config);
        let result = self.inner.manager.initialize(&config).await;
        self.inner.initialized.store(true, Ordering::SeqCst);
        Ok(result)
    }

    /// Applies `options` on top of the current configuration.
    ///
    /// Supplying either provider list replaces the provider set and returns the new
    /// [`InitializeResult`]; otherwise consent, debug, batching, and privacy changes are applied
    /// to the running providers and `None` is returned.
    pub async fn update_config(
        &self,
        options: TrackingConfig,
    ) -> TrackingResult<Option<InitializeResult>> {
        self.ensure_initialized()?;
        let _lifecycle = self.inner.lifecycle.lock().await;
        let config = self.inner.config.update_config(&options)?;
        self.set_privacy(&config);
        if options.analytics_providers.is_some() || options.error_providers.is_some() {
            return Ok(Some(self.inner.manager.initialize(&config).await));
        }
        self.inner.manager.apply_settings(&config);
        if options.consent.is_some() {
            self.inner.manager.handle_consent_change(&config.consent).await;
        }
        if let Some(debug) = options.debug {
            apply_log_level(debug);
            self.inner.manager.set_debug_mode(debug);
        }
        Ok(None)
    }

    pub async fn track(&self, event: &str, properties: Properties) -> TrackingResult<DeliveryOutcome> {
        self.ensure_initialized()?;
        require_text(event, "event name")?;
        let payload = TrackingPayload::Track {
            event: event.to_string(),
            properties: self.redacted(properties),
        };
        Ok(self.deliver(payload).await)
    }

    /// Identifies the current user to analytics providers and sets the user context of
    /// error-tracking providers.
    pub async fn identify(&self, user_id: &str, traits: Properties) -> TrackingResult<DeliveryOutcome> {
        self.ensure_initialized()?;
        require_text(user_id, "user id")?;
        let payload = TrackingPayload::Identify {
            user_id: user_id.to_string(),
            traits: self.redacted(traits),
        };
        Ok(self.deliver(payload).await)
    }

    pub async fn set_user_properties(&self, properties: Properties) -> TrackingResult<DeliveryOutcome> {
        self.ensure_initialized()?;
        let payload = TrackingPayload::UserProperties {
            properties: self.redacted(properties),
        };
        Ok(self.deliver(payload).await)
    }

    pub async fn log_error(
        &self,
        error: ErrorReport,
        mut context: ErrorContext,
    ) -> TrackingResult<DeliveryOutcome> {
        self.ensure_initialized()?;
        require_text(&error.message, "error message")?;
        context.extra = self.redacted(context.extra);
        Ok(self.deliver(TrackingPayload::Error { error, context }).await)
    }

    pub async fn log_revenue(&self, mut revenue: RevenueData) -> TrackingResult<DeliveryOutcome> {
        self.ensure_initialized()?;
        if !revenue.amount.is_finite() || revenue.amount < 0.0 {
            return Err(invalid_argument(format!(
                "revenue amount must be a finite, non-negative number (got {})",
                revenue.amount
            )));
        }
        require_text(&revenue.currency, "currency")?;
        revenue.properties = self.redacted(revenue.properties);
        Ok(self.deliver(TrackingPayload::Revenue(revenue)).await)
    }

    pub async fn log_screen_view(
        &self,
        screen_name: &str,
        properties: Properties,
    ) -> TrackingResult<DeliveryOutcome> {
        self.ensure_initialized()?;
        require_text(screen_name, "screen name")?;
        let payload = TrackingPayload::ScreenView {
            screen_name: screen_name.to_string(),
            properties: self.redacted(properties),
        };
        Ok(self.deliver(payload).await)
    }

    pub async fn add_breadcrumb(&self, mut breadcrumb: Breadcrumb) -> TrackingResult<FanOutReport> {
        self.ensure_initialized()?;
        require_text(&breadcrumb.message, "breadcrumb message")?;
        breadcrumb.data = self.redacted(breadcrumb.data);
        Ok(self.inner.manager.add_breadcrumb(&breadcrumb).await)
    }

    pub async fn set_user_context(&self, mut user: UserContext) -> TrackingResult<FanOutReport> {
        self.ensure_initialized()?;
        user.extra = self.redacted(user.extra);
        Ok(self.inner.manager.set_user_context(&user).await)
    }

    pub async fn clear_user_context(&self) -> TrackingResult<FanOutReport> {
        self.ensure_initialized()?;
        Ok(self.inner.manager.clear_user_context().await)
    }

    /// Merges `update` into the stored consent and pushes it to every live provider.
    ///
    /// Allowed before `initialize`. A change made while providers are still starting is
    /// applied to them once they are up.
    pub async fn set_consent(&self, update: ConsentUpdate) -> ConsentSettings {
        let consent = self.inner.config.set_consent(&update);
        self.inner.manager.handle_consent_change(&consent).await;
        consent
    }

    pub fn consent(&self) -> ConsentSettings {
        self.inner.config.consent()
    }

    /// Forgets the current user on every provider and drops all pending events.
    pub async fn reset(&self) -> TrackingResult<()> {
        self.ensure_initialized()?;
        self.inner.manager.reset().await;
        LOGGER.debug("tracking state reset");
        Ok(())
    }

    pub fn get_active_providers(&self) -> Vec<ProviderMetadata> {
        self.inner.manager.active_providers()
    }

    /// Switches verbose logging for the crate and every provider.
    pub fn enable_debug_mode(&self, enabled: bool) {
        apply_log_level(enabled);
        self.inner.config.set_debug(enabled);
        self.inner.manager.set_debug_mode(enabled);
    }

    /// Stops the queue timer and shuts every provider down. `initialize` may be called again
    /// afterwards.
    pub async fn shutdown(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;
        self.inner.initialized.store(false, Ordering::SeqCst);
        self.inner.manager.shutdown().await;
    }

    /// Delivers one batch from the event queue now instead of waiting for the timer.
    pub async fn flush(&self) -> TrackingResult<FlushOutcome> {
        self.ensure_initialized()?;
        Ok(self.inner.queue.flush().await)
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized.load(Ordering::SeqCst)
    }

    pub fn queue_size(&self) -> usize {
        self.inner.queue.queue_size()
    }

    pub fn config(&self) -> Option<UnifiedConfig> {
        self.inner.config.current()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.inner.registry
    }

    pub fn on_tracking_event<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&TrackingEvent) + Send + Sync + 'static,
    {
        self.inner.events.on_tracking_event(callback)
    }

    pub fn on_error<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&TrackingError) + Send + Sync + 'static,
    {
        self.inner.events.on_error(callback)
    }

    pub fn on_provider_status_change<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ProviderStatusChange) + Send + Sync + 'static,
    {
        self.inner.events.on_provider_status_change(callback)
    }

    fn ensure_initialized(&self) -> TrackingResult<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(TrackingError::NotInitialized)
        }
    }

    async fn deliver(&self, payload: TrackingPayload) -> DeliveryOutcome {
        let outcome = self.inner.manager.deliver(&payload).await;
        self.inner.events.emit_tracking(&TrackingEvent {
            payload,
            outcome: outcome.clone(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        });
        outcome
    }

    fn redacted(&self, mut properties: Properties) -> Properties {
        self.inner
            .privacy
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
            .redact(&mut properties);
        properties
    }

    fn set_privacy(&self, config: &UnifiedConfig) {
        *self
            .inner
            .privacy
            .write()
            .unwrap_or_else(|poison| poison.into_inner()) = config.privacy.clone();
    }
}

fn apply_log_level(debug: bool) {
    let level = if debug { LogLevel::Debug } else { LogLevel::Info };
    if let Err(err) = logger::set_log_level(level) {
        LOGGER.warn(format!("failed to change log level: {err}"));
    }
}

fn require_text(value: &str, what: &str) -> TrackingResult<()> {
    if value.trim().is_empty() {
        return Err(invalid_argument(format!("{what} must not be empty")));
    }
    Ok(())
}
