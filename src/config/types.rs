use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::constants::{DEFAULT_BATCH_SIZE, DEFAULT_FLUSH_INTERVAL, DEFAULT_MAX_RETRIES};
use crate::error::{invalid_argument, TrackingResult};
use crate::provider::{Properties, ProviderCategory, ProviderConfig, ProviderEntry};

/// Privacy consent per category. Every flag is always defined; anything not granted is denied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsentSettings {
    pub analytics: bool,
    pub error_tracking: bool,
    pub marketing: bool,
    pub personalization: bool,
}

impl ConsentSettings {
    pub fn granted() -> Self {
        Self {
            analytics: true,
            error_tracking: true,
            marketing: true,
            personalization: true,
        }
    }

    /// Consent flag gating providers of `category`.
    pub fn allows(&self, category: ProviderCategory) -> bool {
        match category {
            ProviderCategory::Analytics => self.analytics,
            ProviderCategory::ErrorTracking => self.error_tracking,
        }
    }

    pub fn apply(&mut self, update: &ConsentUpdate) {
        if let Some(value) = update.analytics {
            self.analytics = value;
        }
        if let Some(value) = update.error_tracking {
            self.error_tracking = value;
        }
        if let Some(value) = update.marketing {
            self.marketing = value;
        }
        if let Some(value) = update.personalization {
            self.personalization = value;
        }
    }
}

/// Partial consent change; `None` leaves the current flag alone.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_tracking: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketing: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personalization: Option<bool>,
}

impl ConsentUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn analytics(mut self, granted: bool) -> Self {
        self.analytics = Some(granted);
        self
    }

    pub fn error_tracking(mut self, granted: bool) -> Self {
        self.error_tracking = Some(granted);
        self
    }

    pub fn marketing(mut self, granted: bool) -> Self {
        self.marketing = Some(granted);
        self
    }

    pub fn personalization(mut self, granted: bool) -> Self {
        self.personalization = Some(granted);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.analytics.is_none()
            && self.error_tracking.is_none()
            && self.marketing.is_none()
            && self.personalization.is_none()
    }
}

impl From<ConsentSettings> for ConsentUpdate {
    fn from(settings: ConsentSettings) -> Self {
        Self {
            analytics: Some(settings.analytics),
            error_tracking: Some(settings.error_tracking),
            marketing: Some(settings.marketing),
            personalization: Some(settings.personalization),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BatchingConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub timeout_ms: u64,
    pub max_retries: u32,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_size: DEFAULT_BATCH_SIZE,
            timeout_ms: DEFAULT_FLUSH_INTERVAL.as_millis() as u64,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl BatchingConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub(crate) fn validate(&self) -> TrackingResult<()> {
        if self.max_size == 0 {
            return Err(invalid_argument("batching.maxSize must be greater than zero"));
        }
        if self.timeout_ms == 0 {
            return Err(invalid_argument("batching.timeoutMs must be greater than zero"));
        }
        Ok(())
    }
}

/// Partial batching options supplied by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchingOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl BatchingOptions {
    pub fn enabled(max_size: usize, timeout_ms: u64) -> Self {
        Self {
            enabled: Some(true),
            max_size: Some(max_size),
            timeout_ms: Some(timeout_ms),
            max_retries: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrivacyConfig {
    /// Property keys removed from every payload before it reaches a provider or the queue.
    pub redact_properties: Vec<String>,
}

impl PrivacyConfig {
    pub fn redact(&self, properties: &mut Properties) {
        for key in &self.redact_properties {
            properties.remove(key);
        }
    }
}

/// Fully resolved configuration produced by the config manager.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UnifiedConfig {
    pub analytics_providers: Vec<ProviderEntry>,
    pub error_providers: Vec<ProviderEntry>,
    pub consent: ConsentSettings,
    pub debug: bool,
    pub batching: BatchingConfig,
    pub privacy: PrivacyConfig,
}

/// Options passed to `initialize` / `update_config`. Unset fields fall back to the persisted
/// settings and then to the defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_providers: Option<Vec<ProviderEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_providers: Option<Vec<ProviderEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consent: Option<ConsentUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batching: Option<BatchingOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub privacy: Option<PrivacyConfig>,
}

impl TrackingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_analytics(mut self, id: impl Into<String>, config: ProviderConfig) -> Self {
        self.analytics_providers
            .get_or_insert_with(Vec::new)
            .push(ProviderEntry::new(id, config));
        self
    }

    pub fn with_error_tracking(mut self, id: impl Into<String>, config: ProviderConfig) -> Self {
        self.error_providers
            .get_or_insert_with(Vec::new)
            .push(ProviderEntry::new(id, config));
        self
    }

    pub fn with_consent(mut self, consent: ConsentUpdate) -> Self {
        self.consent = Some(consent);
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = Some(debug);
        self
    }

    pub fn with_batching(mut self, batching: BatchingOptions) -> Self {
        self.batching = Some(batching);
        self
    }

    pub fn with_redacted_properties<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.privacy = Some(PrivacyConfig {
            redact_properties: keys.into_iter().map(Into::into).collect(),
        });
        self
    }
}

/// Non-provider settings persisted next to consent so a restart keeps them.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct PersistedSettings {
    pub debug: bool,
    pub batching: BatchingConfig,
    pub privacy: PrivacyConfig,
}

impl From<&UnifiedConfig> for PersistedSettings {
    fn from(config: &UnifiedConfig) -> Self {
        Self {
            debug: config.debug,
            batching: config.batching.clone(),
            privacy: config.privacy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn consent_document_with_missing_flags_defaults_to_denied() {
        let consent: ConsentSettings = serde_json::from_value(json!({"analytics": true})).unwrap();
        assert!(consent.analytics);
        assert!(!consent.error_tracking);
        assert!(!consent.marketing);
        assert!(!consent.personalization);
    }

    #[test]
    fn update_only_touches_supplied_flags() {
        let mut consent = ConsentSettings::granted();
        consent.apply(&ConsentUpdate::new().analytics(false));
        assert!(!consent.allows(ProviderCategory::Analytics));
        assert!(consent.allows(ProviderCategory::ErrorTracking));
        assert!(consent.marketing);
    }

    #[test]
    fn tracking_config_accepts_camel_case_document() {
        let config: TrackingConfig = serde_json::from_value(json!({
            "analyticsProviders": [{"id": "mixpanel", "config": {"token": "t"}}],
            "errorProviders": [{"id": "sentry", "config": {"dsn": "d", "enabled": false}}],
            "consent": {"errorTracking": true},
            "batching": {"enabled": true, "maxSize": 20, "timeoutMs": 1000}
        }))
        .unwrap();
        let analytics = config.analytics_providers.unwrap();
        assert_eq!(analytics[0].config.option_str("token"), Some("t"));
        assert!(!config.error_providers.unwrap()[0].config.enabled);
        assert_eq!(config.consent.unwrap().error_tracking, Some(true));
        assert_eq!(config.batching.unwrap().max_size, Some(20));
        assert_eq!(config.debug, None);
    }

    #[test]
    fn unset_options_are_not_serialized() {
        let value = serde_json::to_value(TrackingConfig::new().with_debug(true)).unwrap();
        assert_eq!(value, json!({"debug": true}));
    }

    #[test]
    fn zero_batch_size_is_invalid() {
        let batching = BatchingConfig {
            max_size: 0,
            ..Default::default()
        };
        assert_eq!(batching.validate().unwrap_err().code_str(), "tracking/invalid-argument");
        assert!(BatchingConfig::default().validate().is_ok());
    }

    #[test]
    fn redaction_strips_listed_keys() {
        let privacy = PrivacyConfig {
            redact_properties: vec!["email".into()],
        };
        let mut properties = Properties::new();
        properties.insert("email".into(), json!("a@b.c"));
        properties.insert("plan".into(), json!("pro"));
        privacy.redact(&mut properties);
        assert_eq!(properties.len(), 1);
        assert!(properties.contains_key("plan"));
    }
}
