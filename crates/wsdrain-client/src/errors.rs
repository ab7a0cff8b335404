use std::time::Duration;

use wsdrain_core::SettingsError;

/// Errors constructing or running a client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid client settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("connect to {url} timed out after {after:?}")]
    ConnectTimeout { url: String, after: Duration },
}

pub type Result<T> = std::result::Result<T, ClientError>;
