/// Core error types for Prism.
use std::path::PathBuf;

/// A specialized Result type for Prism core operations.
pub type PrismResult<T> = Result<T, PrismError>;

/// Errors raised by the frame, format and configuration layers.
#[derive(Debug, thiserror::Error)]
pub enum PrismError {
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("unsupported conversion: {0}")]
    UnsupportedConversion(String),

    #[error("config error: {message} ({path:?})")]
    Config { message: String, path: PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl PrismError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        PrismError::Config {
            message: message.into(),
            path: path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = PrismError::config("unknown backend", "/etc/prism.toml");
        assert!(err.to_string().contains("unknown backend"));
        assert!(err.to_string().contains("prism.toml"));
    }

    #[test]
    fn test_invalid_frame_display() {
        let err = PrismError::InvalidFrame("linesize smaller than width".into());
        assert_eq!(err.to_string(), "invalid frame: linesize smaller than width");
    }
}
