use thiserror::Error;

#[derive(Debug, Error)]
pub enum GleanerError {
    #[error("Configuration error: {0}")]
    Config(String),
}

impl GleanerError {
    /// Short, stable error code for log lines and CLI exit messages.
    pub fn code(&self) -> &'static str {
        match self {
            GleanerError::Config(_) => "CONFIG_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, GleanerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_carries_code_and_message() {
        let err = GleanerError::Config("port must be a number".into());
        assert_eq!(err.code(), "CONFIG_ERROR");
        assert_eq!(err.to_string(), "Configuration error: port must be a number");
    }
}
