use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Connection to {url} failed: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("Connection to {url} timed out after {timeout_ms}ms")]
    ConnectTimeout { url: String, timeout_ms: u128 },
    #[error("Transport error: {source}")]
    Transport {
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },
    #[error("Histogram error: {message}")]
    Histogram { message: String },
}
