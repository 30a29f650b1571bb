use std::sync::{Mutex, MutexGuard};

use crate::error::TrackingError;
use crate::events::{EventBus, ProviderStatusChange};
use crate::provider::{ProviderCategory, ProviderConfig, ProviderHandle, ProviderMetadata, ProviderState};

/// A live provider owned by the manager.
pub struct ProviderInstance {
    metadata: ProviderMetadata,
    config: ProviderConfig,
    handle: ProviderHandle,
    state: Mutex<ProviderState>,
}

impl ProviderInstance {
    pub(crate) fn new(metadata: ProviderMetadata, config: ProviderConfig, handle: ProviderHandle) -> Self {
        Self {
            metadata,
            config,
            handle,
            state: Mutex::new(ProviderState::Registered),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn category(&self) -> ProviderCategory {
        self.metadata.category
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn handle(&self) -> &ProviderHandle {
        &self.handle
    }

    pub fn state(&self) -> ProviderState {
        *self.lock()
    }

    /// Ready, reporting ready, and not disabled by consent.
    pub fn is_available(&self) -> bool {
        self.state() == ProviderState::Ready && self.handle.is_ready()
    }

    /// Moves to `next` when the lifecycle allows it and publishes the change.
    pub(crate) fn transition(
        &self,
        next: ProviderState,
        error: Option<TrackingError>,
        events: &EventBus,
    ) -> bool {
        let previous = {
            let mut state = self.lock();
            if !state.can_transition_to(next) {
                return false;
            }
            let previous = *state;
            *state = next;
            previous
        };
        events.emit_status(&ProviderStatusChange {
            provider: self.metadata.id.clone(),
            category: self.metadata.category,
            previous,
            current: next,
            error,
        });
        true
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}
