//! Payment Error Types

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, PaymentError>;

/// Payment-related errors
#[derive(Error, Debug)]
pub enum PaymentError {
    /// Missing or malformed request fields
    #[error("Validation error: {0}")]
    Validation(String),

    /// Webhook signature missing or wrong
    #[error("Webhook signature invalid: {0}")]
    Auth(String),

    /// No matching payment at the gateway
    #[error("Not found: {0}")]
    NotFound(String),

    /// Gateway transport or provider failure
    #[error("Gateway error: {message}")]
    Upstream {
        /// HTTP status returned by the provider, if any
        status: Option<u16>,
        message: String,
    },

    /// Order store failure
    #[error("Storage error: {0}")]
    Store(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PaymentError {
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            status: None,
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Upstream { .. } | Self::Store(_))
    }

    /// HTTP status code the error surfaces as
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Json(_) => 400,
            Self::Auth(_) => 401,
            Self::NotFound(_) => 404,
            Self::Config(_) => 503,
            Self::Upstream { .. } | Self::Store(_) => 500,
        }
    }

    /// Stable short identifier for the JSON `error` field
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) | Self::Json(_) => "invalid request",
            Self::Auth(_) => "invalid signature",
            Self::NotFound(_) => "payment not found",
            Self::Upstream { .. } => "payment gateway error",
            Self::Store(_) => "order store error",
            Self::Config(_) => "payments not configured",
        }
    }

    /// Detail safe to hand back to the client
    pub fn details(&self) -> Option<String> {
        match self {
            Self::Validation(msg) | Self::Auth(msg) | Self::NotFound(msg) => Some(msg.clone()),
            Self::Json(e) => Some(e.to_string()),
            Self::Upstream { message, .. } => Some(message.clone()),
            Self::Store(_) | Self::Config(_) => None,
        }
    }
}

impl From<reqwest::Error> for PaymentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Upstream {
            status: err.status().map(|s| s.as_u16()),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(PaymentError::Validation("x".into()).status_code(), 400);
        assert_eq!(PaymentError::Auth("x".into()).status_code(), 401);
        assert_eq!(PaymentError::NotFound("x".into()).status_code(), 404);
        assert_eq!(PaymentError::upstream("x").status_code(), 500);
        assert_eq!(PaymentError::Config("x".into()).status_code(), 503);
    }

    #[test]
    fn test_store_details_hidden() {
        let err = PaymentError::Store("connection refused to 10.0.0.3".into());
        assert!(err.details().is_none());
        assert!(err.is_retryable());
    }
}
