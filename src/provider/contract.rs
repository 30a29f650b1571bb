use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ConsentSettings;
use crate::error::TrackingResult;
use crate::platform::{
    load_with_timeout, ExternalModuleLoader, ModuleHandle, Platform, StorageHandle,
    UnavailableLoader,
};
use crate::provider::types::{
    Breadcrumb, ErrorContext, ErrorReport, Properties, ProviderCategory, ProviderConfig,
    RevenueData, UserContext,
};

/// Lifecycle every provider adapter implements.
///
/// `initialize` is called at most once per instance by the manager; adapters do not need to
/// guard against a second call.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait TrackingProvider: Send + Sync {
    async fn initialize(&self, config: &ProviderConfig) -> TrackingResult<()>;

    async fn shutdown(&self) -> TrackingResult<()>;

    async fn update_consent(&self, consent: &ConsentSettings) -> TrackingResult<()>;

    fn is_ready(&self) -> bool;

    fn set_debug_mode(&self, enabled: bool) -> TrackingResult<()>;
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait AnalyticsProvider: TrackingProvider {
    async fn track(&self, event: &str, properties: &Properties) -> TrackingResult<()>;

    async fn identify(&self, user_id: &str, traits: &Properties) -> TrackingResult<()>;

    async fn set_user_properties(&self, properties: &Properties) -> TrackingResult<()>;

    async fn log_revenue(&self, revenue: &RevenueData) -> TrackingResult<()>;

    async fn log_screen_view(&self, screen_name: &str, properties: &Properties)
        -> TrackingResult<()>;

    /// Forgets the current user. Adapters without the concept keep the default.
    async fn reset(&self) -> TrackingResult<()> {
        Ok(())
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ErrorTrackingProvider: TrackingProvider {
    async fn log_error(&self, error: &ErrorReport, context: &ErrorContext) -> TrackingResult<()>;

    async fn set_user_context(&self, user: &UserContext) -> TrackingResult<()>;

    async fn clear_user_context(&self) -> TrackingResult<()>;

    async fn add_breadcrumb(&self, breadcrumb: &Breadcrumb) -> TrackingResult<()>;
}

/// A constructed provider, tagged with the capability it offers.
#[derive(Clone)]
pub enum ProviderHandle {
    Analytics(Arc<dyn AnalyticsProvider>),
    ErrorTracking(Arc<dyn ErrorTrackingProvider>),
}

impl ProviderHandle {
    pub fn analytics<P>(provider: P) -> Self
    where
        P: AnalyticsProvider + 'static,
    {
        ProviderHandle::Analytics(Arc::new(provider))
    }

    pub fn error_tracking<P>(provider: P) -> Self
    where
        P: ErrorTrackingProvider + 'static,
    {
        ProviderHandle::ErrorTracking(Arc::new(provider))
    }

    pub fn category(&self) -> ProviderCategory {
        match self {
            ProviderHandle::Analytics(_) => ProviderCategory::Analytics,
            ProviderHandle::ErrorTracking(_) => ProviderCategory::ErrorTracking,
        }
    }

    pub fn as_analytics(&self) -> Option<&Arc<dyn AnalyticsProvider>> {
        match self {
            ProviderHandle::Analytics(provider) => Some(provider),
            ProviderHandle::ErrorTracking(_) => None,
        }
    }

    pub fn as_error_tracking(&self) -> Option<&Arc<dyn ErrorTrackingProvider>> {
        match self {
            ProviderHandle::ErrorTracking(provider) => Some(provider),
            ProviderHandle::Analytics(_) => None,
        }
    }

    pub async fn initialize(&self, config: &ProviderConfig) -> TrackingResult<()> {
        match self {
            ProviderHandle::Analytics(provider) => provider.initialize(config).await,
            ProviderHandle::ErrorTracking(provider) => provider.initialize(config).await,
        }
    }

    pub async fn shutdown(&self) -> TrackingResult<()> {
        match self {
            ProviderHandle::Analytics(provider) => provider.shutdown().await,
            ProviderHandle::ErrorTracking(provider) => provider.shutdown().await,
        }
    }

    pub async fn update_consent(&self, consent: &ConsentSettings) -> TrackingResult<()> {
        match self {
            ProviderHandle::Analytics(provider) => provider.update_consent(consent).await,
            ProviderHandle::ErrorTracking(provider) => provider.update_consent(consent).await,
        }
    }

    pub fn is_ready(&self) -> bool {
        match self {
            ProviderHandle::Analytics(provider) => provider.is_ready(),
            ProviderHandle::ErrorTracking(provider) => provider.is_ready(),
        }
    }

    pub fn set_debug_mode(&self, enabled: bool) -> TrackingResult<()> {
        match self {
            ProviderHandle::Analytics(provider) => provider.set_debug_mode(enabled),
            ProviderHandle::ErrorTracking(provider) => provider.set_debug_mode(enabled),
        }
    }
}

/// Host capabilities handed to provider factories.
#[derive(Clone)]
pub struct ProviderContext {
    platform: Platform,
    storage: StorageHandle,
    loader: Arc<dyn ExternalModuleLoader>,
}

impl ProviderContext {
    pub fn new(platform: Platform, storage: StorageHandle) -> Self {
        Self {
            platform,
            storage,
            loader: Arc::new(UnavailableLoader),
        }
    }

    pub fn with_loader(mut self, loader: Arc<dyn ExternalModuleLoader>) -> Self {
        self.loader = loader;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    pub fn storage(&self) -> &StorageHandle {
        &self.storage
    }

    pub fn loader(&self) -> &Arc<dyn ExternalModuleLoader> {
        &self.loader
    }

    /// Loads an external SDK for `provider`, failing with a provider-load error after `timeout`.
    pub async fn load_module(
        &self,
        provider: &str,
        url: &str,
        timeout: Duration,
    ) -> TrackingResult<ModuleHandle> {
        load_with_timeout(self.loader.as_ref(), provider, url, timeout).await
    }
}
