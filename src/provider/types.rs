use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::platform::Platform;

/// Free-form event, trait, or user property bag.
pub type Properties = BTreeMap<String, Value>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderCategory {
    Analytics,
    ErrorTracking,
}

impl ProviderCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderCategory::Analytics => "analytics",
            ProviderCategory::ErrorTracking => "error-tracking",
        }
    }
}

impl fmt::Display for ProviderCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of a provider, fixed at registration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMetadata {
    pub id: String,
    pub display_name: String,
    pub category: ProviderCategory,
    pub version: String,
    pub supported_platforms: Vec<Platform>,
}

impl ProviderMetadata {
    /// Metadata for a provider that runs everywhere, at version `0.0.0`.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        category: ProviderCategory,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            category,
            version: "0.0.0".to_string(),
            supported_platforms: vec![
                Platform::Web,
                Platform::Ios,
                Platform::Android,
                Platform::Desktop,
            ],
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_platforms<I>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = Platform>,
    {
        self.supported_platforms = platforms.into_iter().collect();
        self
    }

    pub fn supports(&self, platform: Platform) -> bool {
        self.supported_platforms.contains(&platform)
    }
}

/// Lifecycle of a provider instance owned by the manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderState {
    Registered,
    Initializing,
    Ready,
    Failed,
    Disabled,
    ShutDown,
}

impl ProviderState {
    pub fn can_transition_to(self, next: ProviderState) -> bool {
        use ProviderState::*;
        match (self, next) {
            (ShutDown, _) => false,
            (_, ShutDown) => true,
            (Registered, Initializing) => true,
            (Initializing, Ready) | (Initializing, Failed) => true,
            (Ready, Disabled) | (Disabled, Ready) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderState::Registered => "registered",
            ProviderState::Initializing => "initializing",
            ProviderState::Ready => "ready",
            ProviderState::Failed => "failed",
            ProviderState::Disabled => "disabled",
            ProviderState::ShutDown => "shut-down",
        }
    }
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_enabled() -> bool {
    true
}

/// Per-provider configuration: the common `enabled`/`debug` switches plus the opaque options
/// the adapter understands (`apiKey`, `dsn`, ...).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub debug: bool,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            debug: false,
            options: Map::new(),
        }
    }
}

impl ProviderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_option(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.options.insert(key.into(), value.into());
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// A required field counts as present when it is neither null nor an empty string.
    pub fn has_option(&self, key: &str) -> bool {
        match self.options.get(key) {
            None | Some(Value::Null) => false,
            Some(Value::String(text)) => !text.trim().is_empty(),
            Some(_) => true,
        }
    }
}

/// One configured provider: registry id plus its configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub id: String,
    #[serde(default)]
    pub config: ProviderConfig,
}

impl ProviderEntry {
    pub fn new(id: impl Into<String>, config: ProviderConfig) -> Self {
        Self {
            id: id.into(),
            config,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Fatal,
    #[default]
    Error,
    Warning,
    Info,
    Debug,
}

/// Error passed to error-tracking providers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub name: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack: Option<String>,
}

impl ErrorReport {
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            stack: None,
        }
    }

    /// Captures `err` and its `source()` chain; the chain is recorded as the stack.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(format!("caused by: {cause}"));
            source = cause.source();
        }
        Self {
            name: "Error".to_string(),
            message: err.to_string(),
            stack: (!chain.is_empty()).then(|| chain.join("\n")),
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ErrorContext {
    pub severity: Severity,
    pub tags: BTreeMap<String, String>,
    pub extra: Properties,
}

impl ErrorContext {
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breadcrumb {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub level: Severity,
    #[serde(default)]
    pub data: Properties,
    pub timestamp_ms: i64,
}

impl Breadcrumb {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            category: None,
            level: Severity::Info,
            data: Properties::new(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    pub extra: Properties,
}

impl UserContext {
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Default::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueData {
    pub amount: f64,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default)]
    pub properties: Properties,
}

impl RevenueData {
    pub fn new(amount: f64, currency: impl Into<String>) -> Self {
        Self {
            amount,
            currency: currency.into(),
            product_id: None,
            quantity: None,
            properties: Properties::new(),
        }
    }

    pub fn with_product(mut self, product_id: impl Into<String>, quantity: u32) -> Self {
        self.product_id = Some(product_id.into());
        self.quantity = Some(quantity);
        self
    }
}
