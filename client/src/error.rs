use thiserror::Error;

/// Error type for overlay operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("reqwest error: {0}")]
    Reqwest(#[from] reqwest::Error),
    #[error("tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("request failed: {0}")]
    Failed(reqwest::StatusCode),
    #[error("invalid URL scheme: {0} (expected ws, wss, http or https)")]
    InvalidScheme(String),
    #[error("channel: {0}")]
    Channel(#[from] ChannelError),
    #[error("connection closed")]
    ConnectionClosed,
    #[error("gave up reconnecting after {0} attempts")]
    ReconnectExhausted(u32),
}

/// Why a channel binding could not be resolved.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("no channel in query, token or server config")]
    Unresolved,
    #[error("invalid identity token: {0}")]
    InvalidToken(String),
    #[error("channel name {0:?} is empty after normalization")]
    Empty(String),
}

/// Asset load failures. Cloneable so a shared pending load can hand the same
/// failure to every waiter.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AssetError {
    #[error("fetch {url} failed: {reason}")]
    Fetch { url: String, reason: String },
    #[error("fetch {url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("decode {url} failed: {reason}")]
    Decode { url: String, reason: String },
}

/// Result type for overlay operations.
pub type Result<T> = std::result::Result<T, Error>;
