/// Result alias that carries the custom [`PianofallError`] type.
pub type Result<T> = std::result::Result<T, PianofallError>;

/// Common error type for the core crate.
///
/// Only boundary operations fail: reading configuration, importing songs and
/// file IO. Commands sent to the engine in the wrong state are no-ops instead.
#[derive(Debug, thiserror::Error)]
pub enum PianofallError {
    /// Free-form message for failures that do not fit a dedicated variant.
    #[error("{0}")]
    Message(String),
    /// A configuration value is outside its permitted range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Song data was rejected at the import boundary.
    #[error("invalid song: {0}")]
    InvalidSong(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON decoding errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
}

impl PianofallError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for PianofallError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PianofallError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_boundary_errors() {
        let err = PianofallError::InvalidSong("no playable notes".to_string());
        assert_eq!(err.to_string(), "invalid song: no playable notes");

        let err: PianofallError = "plain".into();
        assert_eq!(err.to_string(), "plain");
    }

    #[test]
    fn wraps_json_errors() {
        let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = PianofallError::from(parse);
        assert!(matches!(err, PianofallError::Json(_)));
    }
}
