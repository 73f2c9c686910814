pub mod channel;
pub mod config;
pub mod credentials;
pub mod directory;
pub mod error;
pub mod models;
pub mod sync;

// Re-export the main types for convenience
pub use config::{ClientConfig, SyncMode};
pub use sync::{SessionState, SyncController, SyncUpdate};
