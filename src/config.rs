// Client configuration. Feature variance between the minimal and
// full-featured renditions of the app is a mode flag here, not a fork.

use std::time::Duration;

/// Which feature set the sync controller runs with.
///
/// `Minimal` is rooms and messages only. `Full` adds the friend/invite
/// directory and the session-scoped background notification channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Minimal,
    Full,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST directory, e.g. `http://localhost:8000`.
    pub api_url: String,
    /// Base URL of the live-channel endpoint, e.g. `ws://localhost:8000/ws`.
    pub ws_url: String,
    /// Messages fetched per history page on room entry.
    pub history_page_size: usize,
    /// How long a typing indicator survives without a refresh.
    pub typing_ttl: Duration,
    pub mode: SyncMode,
}

impl ClientConfig {
    pub fn new(api_url: impl Into<String>, ws_url: impl Into<String>, mode: SyncMode) -> Self {
        ClientConfig {
            api_url: api_url.into(),
            ws_url: ws_url.into(),
            history_page_size: 100,
            typing_ttl: Duration::from_secs(10),
            mode,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig::new("http://localhost:8000", "ws://localhost:8000/ws", SyncMode::Full)
    }
}
