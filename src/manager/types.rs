use crate::error::TrackingError;
use crate::provider::ProviderCategory;

/// Outcome of one configured provider entry during `initialize`.
#[derive(Clone, Debug, PartialEq)]
pub struct ProviderStatus {
    pub id: String,
    pub category: ProviderCategory,
    pub initialized: bool,
    pub error: Option<TrackingError>,
}

impl ProviderStatus {
    pub(crate) fn ready(id: &str, category: ProviderCategory) -> Self {
        Self {
            id: id.to_string(),
            category,
            initialized: true,
            error: None,
        }
    }

    pub(crate) fn failed(id: &str, category: ProviderCategory, error: TrackingError) -> Self {
        Self {
            id: id.to_string(),
            category,
            initialized: false,
            error: Some(error),
        }
    }

    pub(crate) fn skipped(id: &str, category: ProviderCategory) -> Self {
        Self {
            id: id.to_string(),
            category,
            initialized: false,
            error: None,
        }
    }
}

/// Snapshot returned by `initialize`. `success` means the call ran to completion; individual
/// provider failures only show up in `providers`.
#[derive(Clone, Debug, PartialEq)]
pub struct InitializeResult {
    pub success: bool,
    pub providers: Vec<ProviderStatus>,
}

impl InitializeResult {
    pub fn status(&self, id: &str) -> Option<&ProviderStatus> {
        self.providers.iter().find(|status| status.id == id)
    }

    pub fn initialized(&self) -> impl Iterator<Item = &str> {
        self.providers
            .iter()
            .filter(|status| status.initialized)
            .map(|status| status.id.as_str())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ProviderStatus> {
        self.providers.iter().filter(|status| status.error.is_some())
    }
}

/// Per-call result of a fan-out across eligible providers.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FanOutReport {
    /// Providers the call was issued to.
    pub attempted: usize,
    /// Ids of providers that accepted the call.
    pub delivered: Vec<String>,
    pub failures: Vec<TrackingError>,
}

impl FanOutReport {
    pub fn is_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }

    pub(crate) fn absorb(&mut self, other: FanOutReport) {
        self.attempted += other.attempted;
        self.delivered.extend(other.delivered);
        self.failures.extend(other.failures);
    }
}
