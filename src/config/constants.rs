use std::time::Duration;

pub const CONSENT_STORAGE_KEY: &str = "unified_tracking_consent";
pub const SETTINGS_STORAGE_KEY: &str = "unified_tracking_settings";
pub const QUEUE_STORAGE_KEY: &str = "unified_tracking_event_queue";

pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
