//! Settings error types.

use thiserror::Error;

/// Errors raised while resolving or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A settings value was invalid (e.g., out of range).
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
    /// The client target is not a WebSocket URL.
    #[error("invalid server url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_value_display() {
        let err = SettingsError::InvalidValue("mailbox capacity must be positive".to_string());
        assert_eq!(
            err.to_string(),
            "invalid settings value: mailbox capacity must be positive"
        );
    }

    #[test]
    fn invalid_url_display() {
        let err = SettingsError::InvalidUrl {
            url: "http://x".into(),
            reason: "scheme must be ws or wss".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("http://x"));
        assert!(msg.contains("scheme must be ws or wss"));
    }
}
