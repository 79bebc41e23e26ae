//! B2 API Error Types
//!
//! Typed failures for listing calls, classified for the retry loop.

/// B2 API error types
#[derive(Debug, thiserror::Error)]
pub enum B2Error {
    #[error("Authentication expired, token needs refresh")]
    AuthExpired,

    #[error("Rate limited, try again after backoff")]
    RateLimited,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error ({0}): {1}")]
    Server(u16, String),

    #[error("Request timeout")]
    Timeout,

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Request error: {0}")]
    Request(String),
}

impl B2Error {
    /// Whether this error is worth retrying
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            B2Error::RateLimited
                | B2Error::Timeout
                | B2Error::Network(_)
                | B2Error::Server(_, _)
                | B2Error::AuthExpired
        )
    }

    /// Classify an HTTP status code and response body
    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => B2Error::AuthExpired,
            403 => B2Error::Forbidden(body.to_string()),
            404 => B2Error::NotFound(body.to_string()),
            408 => B2Error::Timeout,
            429 => B2Error::RateLimited,
            500..=599 => B2Error::Server(status, body.to_string()),
            _ => B2Error::Request(format!("HTTP {}: {}", status, body)),
        }
    }
}

impl From<reqwest::Error> for B2Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            B2Error::Timeout
        } else if e.is_connect() {
            B2Error::Network(e.to_string())
        } else if e.is_decode() {
            B2Error::Decode(e.to_string())
        } else {
            B2Error::Request(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status() {
        assert!(matches!(B2Error::from_status(401, ""), B2Error::AuthExpired));
        assert!(matches!(B2Error::from_status(404, "gone"), B2Error::NotFound(body) if body == "gone"));
        assert!(matches!(B2Error::from_status(429, ""), B2Error::RateLimited));
        assert!(matches!(B2Error::from_status(503, "busy"), B2Error::Server(503, _)));
        assert!(matches!(B2Error::from_status(400, "bad"), B2Error::Request(_)));
    }

    #[test]
    fn test_retry_classification() {
        assert!(B2Error::RateLimited.is_retryable());
        assert!(B2Error::Server(500, String::new()).is_retryable());
        assert!(!B2Error::NotFound(String::new()).is_retryable());
        assert!(!B2Error::Forbidden(String::new()).is_retryable());
        assert!(!B2Error::Decode(String::new()).is_retryable());
    }
}
