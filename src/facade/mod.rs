//! The public entry point: [`UnifiedTracking`] validates each call, applies privacy rules,
//! and hands it to the provider manager.

mod api;

pub use api::{UnifiedTracking, UnifiedTrackingBuilder};
