// Error taxonomy for the directory and live-channel boundaries.
// REST failures are handled at the call site; nothing is retried here.

use thiserror::Error;

/// Failures surfaced by the directory service.
///
/// `SessionExpired` is special: the sync controller treats it as a forced
/// logout no matter which call produced it.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Bad credentials on the token exchange. Surfaced inline to the user.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Duplicate identity, room, request, or invite.
    #[error("{0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// 401 on any authenticated call. Forces a transition to logged-out.
    #[error("session expired")]
    SessionExpired,

    /// Network-level failure. Logged and swallowed at refresh call sites,
    /// leaving the previously cached state in place.
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected status {status}: {detail}")]
    Unexpected { status: u16, detail: String },
}

pub type DirectoryResult<T> = Result<T, DirectoryError>;

/// Failures on the live channel. These never surface to the user beyond
/// logging; there is no automatic reconnect.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    #[error("websocket connect failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),
}
