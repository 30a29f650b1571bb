#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use unified_tracking::provider::{
    AnalyticsProvider, Breadcrumb, ErrorContext, ErrorReport, ErrorTrackingProvider,
    ProviderCategory, ProviderConfig, ProviderHandle, ProviderMetadata, ProviderRegistration,
    RevenueData, TrackingProvider, UserContext,
};
use unified_tracking::{ConsentSettings, Properties, TrackingError, TrackingResult};

/// Provider double that logs every capability call and rejects them on demand.
pub struct MockProvider {
    id: String,
    calls: Mutex<Vec<String>>,
    ready: AtomicBool,
    rejecting: AtomicBool,
}

impl MockProvider {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            calls: Mutex::new(Vec::new()),
            ready: AtomicBool::new(false),
            rejecting: AtomicBool::new(false),
        })
    }

    pub fn rejecting(id: &str) -> Arc<Self> {
        let provider = Self::new(id);
        provider.set_rejecting(true);
        provider
    }

    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, operation: &str) -> usize {
        let prefix = format!("{operation}:");
        self.calls()
            .iter()
            .filter(|call| call.starts_with(&prefix))
            .count()
    }

    pub fn analytics(self: &Arc<Self>) -> ProviderRegistration {
        let provider = Arc::clone(self);
        ProviderRegistration::new(
            ProviderMetadata::new(&self.id, &self.id, ProviderCategory::Analytics),
            move |_| Ok(ProviderHandle::Analytics(provider.clone())),
        )
    }

    pub fn error_tracking(self: &Arc<Self>) -> ProviderRegistration {
        let provider = Arc::clone(self);
        ProviderRegistration::new(
            ProviderMetadata::new(&self.id, &self.id, ProviderCategory::ErrorTracking),
            move |_| Ok(ProviderHandle::ErrorTracking(provider.clone())),
        )
    }

    fn record(&self, operation: &str, detail: &str) -> TrackingResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("{operation}:{detail}"));
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(TrackingError::ProviderOperation {
                provider: self.id.clone(),
                operation: "mock",
                message: format!("{operation} rejected"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl TrackingProvider for MockProvider {
    async fn initialize(&self, _config: &ProviderConfig) -> TrackingResult<()> {
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> TrackingResult<()> {
        self.ready.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn update_consent(&self, _consent: &ConsentSettings) -> TrackingResult<()> {
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn set_debug_mode(&self, _enabled: bool) -> TrackingResult<()> {
        Ok(())
    }
}

#[async_trait]
impl AnalyticsProvider for MockProvider {
    async fn track(&self, event: &str, _properties: &Properties) -> TrackingResult<()> {
        self.record("track", event)
    }

    async fn identify(&self, user_id: &str, _traits: &Properties) -> TrackingResult<()> {
        self.record("identify", user_id)
    }

    async fn set_user_properties(&self, _properties: &Properties) -> TrackingResult<()> {
        self.record("user_properties", "")
    }

    async fn log_revenue(&self, revenue: &RevenueData) -> TrackingResult<()> {
        self.record("revenue", &revenue.currency)
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

#[async_trait]
impl ErrorTrackingProvider for MockProvider {
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
