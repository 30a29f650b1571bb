//! Configuration layering and privacy consent.
//!
//! [`ConfigManager::load_config`] resolves the effective [`UnifiedConfig`] from three layers,
//! lowest precedence first: built-in defaults, the consent and settings persisted by an
//! earlier run, and the [`TrackingConfig`] passed to this call. Objects merge key by key while
//! arrays (the provider lists, redaction keys) are replaced wholesale.

pub mod constants;
mod manager;
pub mod types;

pub use constants::{CONSENT_STORAGE_KEY, QUEUE_STORAGE_KEY, SETTINGS_STORAGE_KEY};
pub use manager::ConfigManager;
pub use types::{
    BatchingConfig, BatchingOptions, ConsentSettings, ConsentUpdate, PrivacyConfig,
    TrackingConfig, UnifiedConfig,
};
