//! Provider contract, data model, and the explicit registration table.
//!
//! Concrete vendor adapters live outside this crate. They implement [`TrackingProvider`] plus
//! one capability trait ([`AnalyticsProvider`] or [`ErrorTrackingProvider`]) and are made
//! known to the core through a [`ProviderRegistration`].
//!
//! ```
//! use unified_tracking::provider::{
//!     ProviderCategory, ProviderMetadata, ProviderRegistration, ProviderRegistry,
//! };
//! # use unified_tracking::provider::ProviderHandle;
//! # fn build(_: &unified_tracking::provider::ProviderContext)
//! #     -> unified_tracking::TrackingResult<ProviderHandle> { unimplemented!() }
//!
//! let mut registry = ProviderRegistry::new();
//! registry
//!     .register(
//!         ProviderRegistration::new(
//!             ProviderMetadata::new("segment", "Segment", ProviderCategory::Analytics)
//!                 .with_version("4.1.0"),
//!             build,
//!         )
//!         .with_required_config(["writeKey"]),
//!     )
//!     .unwrap();
//! assert!(registry.contains("segment"));
//! ```

pub mod contract;
pub mod registry;
pub mod types;

#[cfg(test)]
pub(crate) mod test_support;

pub use contract::{
    AnalyticsProvider, ErrorTrackingProvider, ProviderContext, ProviderHandle, TrackingProvider,
};
pub use registry::{ProviderFactory, ProviderRegistration, ProviderRegistry};
pub use types::{
    Breadcrumb, ErrorContext, ErrorReport, Properties, ProviderCategory, ProviderConfig,
    ProviderEntry, ProviderMetadata, ProviderState, RevenueData, Severity, UserContext,
};
