use std::fmt;

/// Error taxonomy shared by every layer of the tracking core.
///
/// Only [`TrackingError::NotInitialized`] and [`TrackingError::InvalidArgument`] ever reach a
/// facade caller as an `Err`. The remaining variants are captured per provider (initialize),
/// logged and published as notifications (fan-out), or swallowed (persistence).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackingError {
    /// A provider entry is structurally wrong: missing required field, wrong category,
    /// duplicate id, or a platform the provider does not support.
    Configuration {
        provider: Option<String>,
        message: String,
    },
    /// The external SDK behind a provider failed to load or initialize.
    ProviderLoad { provider: String, message: String },
    /// No registration exists for the requested provider id.
    ProviderNotFound { provider: String },
    /// A facade call was made before a successful `initialize`.
    NotInitialized,
    /// A provider capability call failed during fan-out.
    ProviderOperation {
        provider: String,
        operation: &'static str,
        message: String,
    },
    /// Durable storage could not be read or written.
    QueuePersistence { message: String },
    /// A facade call received arguments that can never be valid.
    InvalidArgument { message: String },
}

impl TrackingError {
    pub fn code_str(&self) -> &'static str {
        match self {
            TrackingError::Configuration { .. } => "tracking/configuration",
            TrackingError::ProviderLoad { .. } => "tracking/provider-load",
            TrackingError::ProviderNotFound { .. } => "tracking/provider-not-found",
            TrackingError::NotInitialized => "tracking/not-initialized",
            TrackingError::ProviderOperation { .. } => "tracking/provider-operation",
            TrackingError::QueuePersistence { .. } => "tracking/queue-persistence",
            TrackingError::InvalidArgument { .. } => "tracking/invalid-argument",
        }
    }

    /// Provider id the error is attributed to, when there is one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            TrackingError::Configuration { provider, .. } => provider.as_deref(),
            TrackingError::ProviderLoad { provider, .. }
            | TrackingError::ProviderNotFound { provider }
            | TrackingError::ProviderOperation { provider, .. } => Some(provider),
            _ => None,
        }
    }
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackingError::Configuration {
                provider: Some(provider),
                message,
            } => write!(
                f,
                "Invalid configuration for provider '{provider}': {message} ({})",
                self.code_str()
            ),
            TrackingError::Configuration {
                provider: None,
                message,
            } => write!(f, "Invalid configuration: {message} ({})", self.code_str()),
            TrackingError::ProviderLoad { provider, message } => write!(
                f,
                "Provider '{provider}' failed to load: {message} ({})",
                self.code_str()
            ),
            TrackingError::ProviderNotFound { provider } => write!(
                f,
                "No provider registered under id '{provider}' ({})",
                self.code_str()
            ),
            TrackingError::NotInitialized => write!(
                f,
                "Tracking used before initialize() completed ({})",
                self.code_str()
            ),
            TrackingError::ProviderOperation {
                provider,
                operation,
                message,
            } => write!(
                f,
                "Provider '{provider}' failed during {operation}: {message} ({})",
                self.code_str()
            ),
            TrackingError::QueuePersistence { message } => {
                write!(f, "Storage unavailable: {message} ({})", self.code_str())
            }
            TrackingError::InvalidArgument { message } => {
                write!(f, "{message} ({})", self.code_str())
            }
        }
    }
}

impl std::error::Error for TrackingError {}

pub type TrackingResult<T> = Result<T, TrackingError>;

pub fn configuration_error(provider: Option<&str>, message: impl Into<String>) -> TrackingError {
    TrackingError::Configuration {
        provider: provider.map(str::to_string),
        message: message.into(),
    }
}

pub fn provider_load_error(provider: impl Into<String>, message: impl Into<String>) -> TrackingError {
    TrackingError::ProviderLoad {
        provider: provider.into(),
        message: message.into(),
    }
}

pub fn provider_not_found(provider: impl Into<String>) -> TrackingError {
    TrackingError::ProviderNotFound {
        provider: provider.into(),
    }
}

pub fn provider_operation_error(
    provider: impl Into<String>,
    operation: &'static str,
    message: impl Into<String>,
) -> TrackingError {
    TrackingError::ProviderOperation {
        provider: provider.into(),
        operation,
        message: message.into(),
    }
}

pub fn persistence_error(message: impl Into<String>) -> TrackingError {
    TrackingError::QueuePersistence {
        message: message.into(),
    }
}

pub fn invalid_argument(message: impl Into<String>) -> TrackingError {
    TrackingError::InvalidArgument {
        message: message.into(),
    }
}
