use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{configuration_error, provider_not_found, TrackingResult};
use crate::platform::Platform;
use crate::provider::contract::{ProviderContext, ProviderHandle};
use crate::provider::types::{ProviderCategory, ProviderConfig, ProviderMetadata};

pub type ProviderFactory =
    Arc<dyn Fn(&ProviderContext) -> TrackingResult<ProviderHandle> + Send + Sync>;

/// One row of the registry: metadata, the config keys the provider cannot start without, and
/// the factory that builds a fresh instance.
#[derive(Clone)]
pub struct ProviderRegistration {
    metadata: ProviderMetadata,
    required_config: Vec<String>,
    factory: ProviderFactory,
}

impl ProviderRegistration {
    pub fn new<F>(metadata: ProviderMetadata, factory: F) -> Self
    where
        F: Fn(&ProviderContext) -> TrackingResult<ProviderHandle> + Send + Sync + 'static,
    {
        Self {
            metadata,
            required_config: Vec::new(),
            factory: Arc::new(factory),
        }
    }

    pub fn with_required_config<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.required_config = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn metadata(&self) -> &ProviderMetadata {
        &self.metadata
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn required_config(&self) -> &[String] {
        &self.required_config
    }

    /// Checks that `config` can be handed to this provider on `platform`.
    pub fn validate(&self, config: &ProviderConfig, platform: Platform) -> TrackingResult<()> {
        if !self.metadata.supports(platform) {
            return Err(configuration_error(
                Some(self.id()),
                format!("platform '{platform}' is not supported"),
            ));
        }
        let missing: Vec<&str> = self
            .required_config
            .iter()
            .filter(|key| !config.has_option(key))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(configuration_error(
                Some(self.id()),
                format!("missing required field(s): {}", missing.join(", ")),
            ));
        }
        Ok(())
    }

    /// Runs the factory and checks the produced capability against the registered category.
    pub fn instantiate(&self, context: &ProviderContext) -> TrackingResult<ProviderHandle> {
        let handle = (self.factory)(context)?;
        if handle.category() != self.metadata.category {
            return Err(configuration_error(
                Some(self.id()),
                format!(
                    "factory produced a {} provider but the registration declares {}",
                    handle.category(),
                    self.metadata.category
                ),
            ));
        }
        Ok(handle)
    }
}

impl fmt::Debug for ProviderRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistration")
            .field("metadata", &self.metadata)
            .field("required_config", &self.required_config)
            .finish_non_exhaustive()
    }
}

/// Explicit table of every provider the host knows how to build.
///
/// Populated once at startup and then shared read-only behind an `Arc`.
#[derive(Clone, Debug, Default)]
pub struct ProviderRegistry {
    entries: BTreeMap<String, ProviderRegistration>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: ProviderRegistration) -> TrackingResult<()> {
        let id = registration.id().to_string();
        if id.trim().is_empty() {
            return Err(configuration_error(None, "provider id must not be empty"));
        }
        if self.entries.contains_key(&id) {
            return Err(configuration_error(
                Some(&id),
                "a provider with this id is already registered",
            ));
        }
        self.entries.insert(id, registration);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, registration: ProviderRegistration) -> TrackingResult<Self> {
        self.register(registration)?;
        Ok(self)
    }

    pub fn resolve(&self, id: &str) -> TrackingResult<&ProviderRegistration> {
        self.entries.get(id).ok_or_else(|| provider_not_found(id))
    }

    pub fn metadata(&self, id: &str) -> Option<&ProviderMetadata> {
        self.entries.get(id).map(ProviderRegistration::metadata)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn by_category(&self, category: ProviderCategory) -> Vec<&ProviderMetadata> {
        self.entries
            .values()
            .map(ProviderRegistration::metadata)
            .filter(|metadata| metadata.category == category)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
