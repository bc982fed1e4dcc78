use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Upstream status code {code}: {message}")]
    Application { code: i64, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl LedgerError {
    /// Returns `true` for failures worth another attempt against the upstream
    /// service. Persistence, configuration and input errors never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Application { .. } | Self::ParseError(_)
        )
    }
}

impl From<std::io::Error> for LedgerError {
    fn from(err: std::io::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for LedgerError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError(err.to_string())
    }
}

impl From<reqwest::Error> for LedgerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transport(format!("request timed out: {}", err))
        } else {
            Self::Transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_taxonomy() {
        assert!(LedgerError::Transport("refused".into()).is_retryable());
        assert!(
            LedgerError::Application {
                code: 7,
                message: "busy".into()
            }
            .is_retryable()
        );
        assert!(LedgerError::ParseError("bad json".into()).is_retryable());
        assert!(!LedgerError::Persistence("disk full".into()).is_retryable());
        assert!(!LedgerError::Config("no endpoint".into()).is_retryable());
        assert!(!LedgerError::InvalidInput("blank id".into()).is_retryable());
    }

    #[test]
    fn test_application_error_message() {
        let err = LedgerError::Application {
            code: -3,
            message: "user not found".into(),
        };
        assert_eq!(err.to_string(), "Upstream status code -3: user not found");
    }
}
