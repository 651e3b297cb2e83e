use thiserror::Error;

/// Failure of a single upstream call. Never escapes a `ResilientProvider`.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Upstream error: {message}")]
    Upstream { message: String, is_retryable: bool },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider task failed: {0}")]
    TaskFailed(String),
}

impl ProviderError {
    /// Transient failures are worth another attempt; everything else goes
    /// straight to the fallback.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_) | ProviderError::Timeout(_) => true,
            ProviderError::Upstream { is_retryable, .. } => *is_retryable,
            ProviderError::MalformedResponse(_) | ProviderError::TaskFailed(_) => false,
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ProviderError::Network(format!("timed out: {e}"));
        }
        match e.status() {
            Some(status) => ProviderError::Upstream {
                message: format!("HTTP {status}"),
                is_retryable: status.is_server_error(),
            },
            None => ProviderError::Network(e.to_string()),
        }
    }
}

impl From<quick_xml::Error> for ProviderError {
    fn from(e: quick_xml::Error) -> Self {
        ProviderError::MalformedResponse(e.to_string())
    }
}

impl From<tokio::task::JoinError> for ProviderError {
    fn from(e: tokio::task::JoinError) -> Self {
        ProviderError::TaskFailed(e.to_string())
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache backend error: {0}")]
    Backend(String),

    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Infrastructure failure inside the aggregation core. An empty result is
/// never reported through this type.
#[derive(Error, Debug)]
pub enum AggregatorError {
    #[error("Cache unavailable: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Error, Debug, PartialEq)]
pub enum QueryError {
    #[error("Missing required field: {0}")]
    MissingRequiredField(&'static str),

    #[error("Departure date {0} is not in the future")]
    DateNotInFuture(chrono::NaiveDate),
}

#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Audit sink error: {0}")]
    Sink(String),

    #[error("Audit serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration error: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(ProviderError::Timeout(10_000).is_retryable());
        assert!(ProviderError::Upstream {
            message: "503".into(),
            is_retryable: true
        }
        .is_retryable());
        assert!(!ProviderError::Upstream {
            message: "no availability".into(),
            is_retryable: false
        }
        .is_retryable());
        assert!(!ProviderError::MalformedResponse("bad xml".into()).is_retryable());
    }
}
