#![doc = include_str!("RUSTDOC.md")]

pub mod config;
pub mod error;
pub mod events;
pub mod facade;
pub mod logger;
pub mod manager;
pub mod platform;
pub mod provider;
pub mod queue;
pub mod util;

pub use config::{ConsentSettings, ConsentUpdate, TrackingConfig, UnifiedConfig};
pub use error::{TrackingError, TrackingResult};
pub use events::{DeliveryOutcome, ListenerHandle, ProviderStatusChange, TrackingEvent};
pub use facade::{UnifiedTracking, UnifiedTrackingBuilder};
pub use manager::InitializeResult;
pub use provider::{
    AnalyticsProvider, ErrorTrackingProvider, Properties, ProviderCategory, ProviderConfig,
    ProviderMetadata, ProviderRegistration, ProviderRegistry, TrackingProvider,
};
