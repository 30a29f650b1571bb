use std::fmt;
use std::sync::{LazyLock, Mutex, MutexGuard};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::constants::{CONSENT_STORAGE_KEY, SETTINGS_STORAGE_KEY};
use crate::config::types::{
    ConsentSettings, ConsentUpdate, PersistedSettings, TrackingConfig, UnifiedConfig,
};
use crate::error::{invalid_argument, TrackingResult};
use crate::logger::Logger;
use crate::platform::StorageHandle;
use crate::provider::ProviderCategory;
use crate::util::merge_layers;

static LOGGER: LazyLock<Logger> = LazyLock::new(|| Logger::new("@unified-tracking/config"));

/// Single authority for the resolved configuration and the current consent state.
///
/// Consent and non-provider settings are written through to storage on every change; a
/// storage that cannot be read or written degrades to in-memory behaviour.
pub struct ConfigManager {
    storage: StorageHandle,
    state: Mutex<ConfigState>,
}

struct ConfigState {
    consent: ConsentSettings,
    settings: Option<PersistedSettings>,
    current: Option<UnifiedConfig>,
}

impl fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ConfigManager")
            .field("consent", &state.consent)
            .field("current", &state.current)
            .finish_non_exhaustive()
    }
}

impl ConfigManager {
    /// Creates the manager and reloads whatever consent and settings were persisted earlier.
    pub fn new(storage: StorageHandle) -> Self {
        let consent = read_json::<ConsentSettings>(&storage, CONSENT_STORAGE_KEY).unwrap_or_default();
        let settings = read_json::<PersistedSettings>(&storage, SETTINGS_STORAGE_KEY);
        Self {
            storage,
            state: Mutex::new(ConfigState {
                consent,
                settings,
                current: None,
            }),
        }
    }

    /// Resolves `options` on top of the persisted state and the defaults.
    ///
    /// Provider lists come only from `options`; they are never persisted, so a call without
    /// them yields an empty provider set.
    pub fn load_config(&self, options: &TrackingConfig) -> TrackingResult<UnifiedConfig> {
        let (consent, settings) = {
            let state = self.lock();
            (state.consent, state.settings.clone().unwrap_or_default())
        };
        let defaults = to_layer(&UnifiedConfig::default())?;
        let persisted = json!({
            "consent": to_layer(&consent)?,
            "debug": settings.debug,
            "batching": to_layer(&settings.batching)?,
            "privacy": to_layer(&settings.privacy)?,
        });
        let overrides = to_layer(options)?;
        let config = resolve(&[defaults, persisted, overrides])?;
        self.commit(config.clone());
        Ok(config)
    }

    /// Applies `options` on top of the current configuration. Provider lists are replaced only
    /// when supplied.
    pub fn update_config(&self, options: &TrackingConfig) -> TrackingResult<UnifiedConfig> {
        let current = self.lock().current.clone();
        let Some(base) = current else {
            return self.load_config(options);
        };
        let config = resolve(&[to_layer(&base)?, to_layer(options)?])?;
        self.commit(config.clone());
        Ok(config)
    }

    /// Merges `update` into the current consent and persists the result.
    pub fn set_consent(&self, update: &ConsentUpdate) -> ConsentSettings {
        let consent = {
            let mut state = self.lock();
            state.consent.apply(update);
            let consent = state.consent;
            if let Some(current) = state.current.as_mut() {
                current.consent = consent;
            }
            consent
        };
        LOGGER.debug(format!("consent updated: {consent:?}"));
        self.persist(CONSENT_STORAGE_KEY, &consent);
        consent
    }

    pub fn consent(&self) -> ConsentSettings {
        self.lock().consent
    }

    pub fn is_permitted(&self, category: ProviderCategory) -> bool {
        self.lock().consent.allows(category)
    }

    pub fn current(&self) -> Option<UnifiedConfig> {
        self.lock().current.clone()
    }

    pub fn set_debug(&self, enabled: bool) {
        let settings = {
            let mut state = self.lock();
            let mut settings = state.settings.clone().unwrap_or_default();
            settings.debug = enabled;
            if let Some(current) = state.current.as_mut() {
                current.debug = enabled;
            }
            state.settings = Some(settings.clone());
            settings
        };
        self.persist(SETTINGS_STORAGE_KEY, &settings);
    }

    fn commit(&self, config: UnifiedConfig) {
        let settings = PersistedSettings::from(&config);
        let consent = config.consent;
        {
            let mut state = self.lock();
            state.consent = consent;
            state.settings = Some(settings.clone());
            state.current = Some(config);
        }
        self.persist(CONSENT_STORAGE_KEY, &consent);
        self.persist(SETTINGS_STORAGE_KEY, &settings);
    }

    fn persist<T: Serialize>(&self, key: &str, value: &T) {
        let result = serde_json::to_string(value)
            .map_err(|err| invalid_argument(format!("cannot serialize {key}: {err}")))
            .and_then(|raw| self.storage.set(key, &raw));
        if let Err(err) = result {
            LOGGER.warn(format!("failed to persist {key}: {err}"));
        }
    }

    fn lock(&self) -> MutexGuard<'_, ConfigState> {
        self.state.lock().unwrap_or_else(|poison| poison.into_inner())
    }
}

fn read_json<T: DeserializeOwned>(storage: &StorageHandle, key: &str) -> Option<T> {
    match storage.get(key) {
        Ok(Some(raw)) => match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                LOGGER.warn(format!("ignoring corrupt {key}: {err}"));
                None
            }
        },
        Ok(None) => None,
        Err(err) => {
            LOGGER.warn(format!("failed to read {key}: {err}"));
            None
        }
    }
}

fn to_layer<T: Serialize + ?Sized>(value: &T) -> TrackingResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| invalid_argument(format!("invalid configuration: {err}")))
}

fn resolve(layers: &[Value]) -> TrackingResult<UnifiedConfig> {
    let merged = merge_layers(layers);
    let config: UnifiedConfig = serde_json::from_value(merged)
        .map_err(|err| invalid_argument(format!("invalid configuration: {err}")))?;
    config.batching.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::types::{BatchingOptions, PrivacyConfig};
    use crate::platform::storage::test_support::FlakyStorage;
    use crate::platform::{InMemoryStorage, Storage};
    use crate::provider::ProviderConfig;
    use std::sync::Arc;

    fn manager() -> (ConfigManager, InMemoryStorage) {
        let storage = InMemoryStorage::new();
        (ConfigManager::new(Arc::new(storage.clone())), storage)
    }

    #[test]
    fn defaults_deny_everything() {
        let (manager, _) = manager();
        let config = manager.load_config(&TrackingConfig::new()).unwrap();
        assert_eq!(config.consent, ConsentSettings::default());
        assert!(!config.batching.enabled);
        assert_eq!(config.batching.max_size, 10);
        assert_eq!(config.batching.max_retries, 3);
        assert!(config.analytics_providers.is_empty());
    }

    #[test]
    fn persisted_consent_survives_restart() {
        let (manager, storage) = manager();
        manager.set_consent(&ConsentUpdate::new().analytics(true));

        let restarted = ConfigManager::new(Arc::new(storage));
        assert!(restarted.is_permitted(ProviderCategory::Analytics));
        assert!(!restarted.is_permitted(ProviderCategory::ErrorTracking));
        let config = restarted.load_config(&TrackingConfig::new()).unwrap();
        assert!(config.consent.analytics);
    }

    #[test]
    fn options_override_persisted_values() {
        let (manager, _) = manager();
        manager.set_consent(&ConsentUpdate::new().analytics(true).marketing(true));
        let config = manager
            .load_config(&TrackingConfig::new().with_consent(ConsentUpdate::new().analytics(false)))
            .unwrap();
        assert!(!config.consent.analytics);
        assert!(config.consent.marketing);
        assert!(!manager.consent().analytics);
    }

    #[test]
    fn provider_lists_are_replaced_per_call() {
        let (manager, _) = manager();
        manager
            .load_config(
                &TrackingConfig::new()
                    .with_analytics("mixpanel", ProviderConfig::new())
                    .with_analytics("amplitude", ProviderConfig::new()),
            )
            .unwrap();
        let config = manager
            .load_config(&TrackingConfig::new().with_analytics("segment", ProviderConfig::new()))
            .unwrap();
        let ids: Vec<&str> = config.analytics_providers.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["segment"]);
    }

    #[test]
    fn update_config_keeps_unsupplied_fields() {
        let (manager, _) = manager();
        manager
            .load_config(
                &TrackingConfig::new()
                    .with_analytics("mixpanel", ProviderConfig::new())
                    .with_batching(BatchingOptions::enabled(25, 1_000)),
            )
            .unwrap();
        let config = manager
            .update_config(&TrackingConfig::new().with_debug(true))
            .unwrap();
        assert!(config.debug);
        assert_eq!(config.batching.max_size, 25);
        assert_eq!(config.analytics_providers.len(), 1);
    }

    #[test]
    fn batching_and_privacy_are_persisted() {
        let (manager, storage) = manager();
        manager
            .load_config(
                &TrackingConfig::new()
                    .with_batching(BatchingOptions::enabled(5, 2_000))
                    .with_redacted_properties(["email"]),
            )
            .unwrap();
        let restarted = ConfigManager::new(Arc::new(storage));
        let config = restarted.load_config(&TrackingConfig::new()).unwrap();
        assert!(config.batching.enabled);
        assert_eq!(config.batching.max_size, 5);
        assert_eq!(
            config.privacy,
            PrivacyConfig {
                redact_properties: vec!["email".into()]
            }
        );
    }

    #[test]
    fn corrupt_consent_is_treated_as_defaults() {
        let storage = InMemoryStorage::new();
        storage.set(CONSENT_STORAGE_KEY, "{not json").unwrap();
        let manager = ConfigManager::new(Arc::new(storage));
        assert_eq!(manager.consent(), ConsentSettings::default());
    }

    #[test]
    fn storage_failures_are_swallowed() {
        let manager = ConfigManager::new(Arc::new(FlakyStorage::failing()));
        let consent = manager.set_consent(&ConsentUpdate::new().error_tracking(true));
        assert!(consent.error_tracking);
        assert!(manager.is_permitted(ProviderCategory::ErrorTracking));
        assert!(manager.load_config(&TrackingConfig::new()).is_ok());
    }

    #[test]
    fn invalid_batching_is_rejected() {
        let (manager, _) = manager();
        let err = manager
            .load_config(&TrackingConfig::new().with_batching(BatchingOptions {
                max_size: Some(0),
                ..Default::default()
            }))
            .unwrap_err();
        assert_eq!(err.code_str(), "tracking/invalid-argument");
        assert!(manager.current().is_none());
    }

    #[test]
    fn set_debug_updates_current_config() {
        let (manager, _) = manager();
        manager.load_config(&TrackingConfig::new()).unwrap();
        manager.set_debug(true);
        assert!(manager.current().unwrap().debug);
    }
}
