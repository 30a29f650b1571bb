//! Provider orchestration: lifecycle, consent-gated fan-out, and queue replay.

mod instance;
mod provider_manager;
pub mod types;

pub use instance::ProviderInstance;
pub use provider_manager::ProviderManager;
pub use types::{FanOutReport, InitializeResult, ProviderStatus};
