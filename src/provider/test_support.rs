use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConsentSettings;
use crate::error::{provider_load_error, provider_operation_error, TrackingResult};
use crate::platform::runtime;
use crate::provider::contract::{AnalyticsProvider, ErrorTrackingProvider, TrackingProvider};
use crate::provider::registry::ProviderRegistration;
use crate::provider::types::{
    Breadcrumb, ErrorContext, ErrorReport, Properties, ProviderCategory, ProviderConfig,
    ProviderMetadata, RevenueData, UserContext,
};
use crate::provider::ProviderHandle;

/// Analytics provider that accepts everything and records nothing.
pub struct NoopAnalytics;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl TrackingProvider for NoopAnalytics {
    async fn initialize(&self, _config: &ProviderConfig) -> TrackingResult<()> {
        Ok(())
    }
    async fn shutdown(&self) -> TrackingResult<()> {
        Ok(())
    }
    async fn update_consent(&self, _consent: &ConsentSettings) -> TrackingResult<()> {
        Ok(())
    }
    fn is_ready(&self) -> bool {
        true
    }
    fn set_debug_mode(&self, _enabled: bool) -> TrackingResult<()> {
        Ok(())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl AnalyticsProvider for NoopAnalytics {
    async fn track(&self, _event: &str, _properties: &Properties) -> TrackingResult<()> {
        Ok(())
    }
    async fn identify(&self, _user_id: &str, _traits: &Properties) -> TrackingResult<()> {
        Ok(())
    }
    async fn set_user_properties(&self, _properties: &Properties) -> TrackingResult<()> {
        Ok(())
    }
    async fn log_revenue(&self, _revenue: &RevenueData) -> TrackingResult<()> {
        Ok(())
    }
    async fn log_screen_view(
        &self,
        _screen_name: &str,
        _properties: &Properties,
    ) -> TrackingResult<()> {
        Ok(())
    }
}

/// Provider that records every call as `"<operation>:<detail>"` and can be told to fail.
pub struct RecordingProvider {
    id: String,
    calls: Mutex<Vec<String>>,
    ready: AtomicBool,
    fail_init: AtomicBool,
    fail_ops: AtomicBool,
    panic_ops: AtomicBool,
    debug: AtomicBool,
    shutdowns: AtomicUsize,
    consent: Mutex<Option<ConsentSettings>>,
    init_delay: Mutex<Option<Duration>>,
}

impl RecordingProvider {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            calls: Mutex::new(Vec::new()),
            ready: AtomicBool::new(false),
            fail_init: AtomicBool::new(false),
            fail_ops: AtomicBool::new(false),
            panic_ops: AtomicBool::new(false),
            debug: AtomicBool::new(false),
            shutdowns: AtomicUsize::new(0),
            consent: Mutex::new(None),
            init_delay: Mutex::new(None),
        })
    }

    pub fn failing_init(id: &str) -> Arc<Self> {
        let provider = Self::new(id);
        provider.fail_init.store(true, Ordering::SeqCst);
        provider
    }

    /// Provider whose `initialize` takes `delay` to complete.
    pub fn slow_init(id: &str, delay: Duration) -> Arc<Self> {
        let provider = Self::new(id);
        *provider.init_delay.lock().unwrap() = Some(delay);
        provider
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_ops.store(failing, Ordering::SeqCst);
    }

    pub fn set_panicking(&self, panicking: bool) {
        self.panic_ops.store(panicking, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug.load(Ordering::SeqCst)
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn last_consent(&self) -> Option<ConsentSettings> {
        *self.consent.lock().unwrap()
    }

    fn record(&self, operation: &'static str, detail: &str) -> TrackingResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{operation}:{detail}"));
        if self.panic_ops.load(Ordering::SeqCst) {
            panic!("{} exploded during {operation}", self.id);
        }
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(provider_operation_error(&self.id, operation, "mock failure"));
        }
        Ok(())
    }

    pub fn analytics_registration(self: &Arc<Self>) -> ProviderRegistration {
        let provider = Arc::clone(self);
        ProviderRegistration::new(
            ProviderMetadata::new(&self.id, &self.id, ProviderCategory::Analytics),
            move |_| Ok(ProviderHandle::Analytics(provider.clone())),
        )
    }

    pub fn error_registration(self: &Arc<Self>) -> ProviderRegistration {
        let provider = Arc::clone(self);
        ProviderRegistration::new(
            ProviderMetadata::new(&self.id, &self.id, ProviderCategory::ErrorTracking),
            move |_| Ok(ProviderHandle::ErrorTracking(provider.clone())),
        )
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl TrackingProvider for RecordingProvider {
    async fn initialize(&self, _config: &ProviderConfig) -> TrackingResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push("initialize:".to_string());
        let delay = *self.init_delay.lock().unwrap();
        if let Some(delay) = delay {
            runtime::sleep(delay).await;
        }
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(provider_load_error(&self.id, "sdk unavailable"));
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> TrackingResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn update_consent(&self, consent: &ConsentSettings) -> TrackingResult<()> {
        *self.consent.lock().unwrap() = Some(*consent);
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn set_debug_mode(&self, enabled: bool) -> TrackingResult<()> {
        self.debug.store(enabled, Ordering::SeqCst);
        if self.fail_ops.load(Ordering::SeqCst) {
            return Err(provider_operation_error(&self.id, "set_debug_mode", "mock failure"));
        }
        Ok(())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl AnalyticsProvider for RecordingProvider {
    async fn track(&self, event: &str, _properties: &Properties) -> TrackingResult<()> {
        self.record("track", event)
    }

    async fn identify(&self, user_id: &str, _traits: &Properties) -> TrackingResult<()> {
        self.record("identify", user_id)
    }

    async fn set_user_properties(&self, properties: &Properties) -> TrackingResult<()> {
        let keys: Vec<&str> = properties.keys().map(String::as_str).collect();
        self.record("user_properties", &keys.join(","))
    }

    async fn log_revenue(&self, revenue: &RevenueData) -> TrackingResult<()> {
        self.record("revenue", &format!("{}{}", revenue.amount, revenue.currency))
    }

    async fn log_screen_view(
        &self,
        screen_name: &str,
        _properties: &Properties,
    ) -> TrackingResult<()> {
        self.record("screen", screen_name)
    }

    async fn reset(&self) -> TrackingResult<()> {
        self.record("reset", "")
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ErrorTrackingProvider for RecordingProvider {
    async fn log_error(&self, error: &ErrorReport, _context: &ErrorContext) -> TrackingResult<()> {
        self.record("log_error", &error.message)
    }

    async fn set_user_context(&self, user: &UserContext) -> TrackingResult<()> {
        self.record("user_context", user.id.as_deref().unwrap_or(""))
    }

    async fn clear_user_context(&self) -> TrackingResult<()> {
        self.record("clear_user_context", "")
    }

    async fn add_breadcrumb(&self, breadcrumb: &Breadcrumb) -> TrackingResult<()> {
        self.record("breadcrumb", &breadcrumb.message)
    }
}
