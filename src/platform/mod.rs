//! Capabilities the host platform injects into the core: async runtime helpers, durable
//! storage, external module loading, and host platform detection.

pub mod environment;
pub mod loader;
pub mod runtime;
pub mod storage;

pub use environment::Platform;
pub use loader::{load_with_timeout, ExternalModuleLoader, ModuleHandle, UnavailableLoader};
pub use storage::{InMemoryStorage, Storage, StorageHandle};

#[cfg(not(target_arch = "wasm32"))]
pub use storage::FileStorage;

#[cfg(all(target_arch = "wasm32", feature = "wasm-web"))]
pub use storage::WebStorage;
