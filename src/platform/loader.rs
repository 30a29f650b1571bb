use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{provider_load_error, TrackingResult};
use crate::platform::runtime::with_timeout;

/// Opaque handle to whatever a loader produced (a script namespace, a native SDK object...).
/// Adapters downcast it to the concrete type they expect.
pub type ModuleHandle = Arc<dyn Any + Send + Sync>;

pub const DEFAULT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Loads external SDK code on behalf of provider adapters.
///
/// Supplied by the platform binding (script injection on the web, a bridge lookup on
/// mobile). The core treats every load as an opaque asynchronous operation that either yields
/// a handle or fails.
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait ExternalModuleLoader: Send + Sync {
    async fn load(&self, url: &str) -> TrackingResult<ModuleHandle>;
}

/// Loads `url` for `provider`, failing with a provider-load error when `timeout` elapses first.
pub async fn load_with_timeout(
    loader: &dyn ExternalModuleLoader,
    provider: &str,
    url: &str,
    timeout: Duration,
) -> TrackingResult<ModuleHandle> {
    match with_timeout(loader.load(url), timeout).await {
        Ok(result) => result,
        Err(elapsed) => Err(provider_load_error(
            provider,
            format!("loading {url} failed: {elapsed}"),
        )),
    }
}

/// Loader that always fails; used when the host did not supply one.
#[derive(Clone, Copy, Debug, Default)]
pub struct UnavailableLoader;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl ExternalModuleLoader for UnavailableLoader {
    async fn load(&self, url: &str) -> TrackingResult<ModuleHandle> {
        Err(provider_load_error(
            "loader",
            format!("no module loader configured; cannot load {url}"),
        ))
    }
}
