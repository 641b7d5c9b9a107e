//! # Function Errors

use serde_json::{json, Value};
use thiserror::Error;

use crate::auth::AuthError;

/// Result type for assistant operations
pub type AssistantResult<T> = Result<T, AssistantError>;

/// Result type for payment webhook operations
pub type PaymentResult<T> = Result<T, PaymentError>;

/// AI-assistant errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AssistantError {
    #[error("Unauthorized: {0}")]
    Unauthorized(#[from] AuthError),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Too many requests, retry in {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Daily message limit reached ({daily_count}/{daily_limit})")]
    DailyLimitExceeded {
        daily_count: u32,
        daily_limit: u32,
        is_premium: bool,
    },

    #[error("Model request failed: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AssistantError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            AssistantError::Unauthorized(_) => 401,
            AssistantError::InvalidRequest(_) => 400,
            AssistantError::ConversationNotFound(_) => 404,
            AssistantError::RateLimited { .. } => 429,
            AssistantError::DailyLimitExceeded { .. } => 429,
            AssistantError::Upstream(_) => 502,
            AssistantError::Internal(_) => 500,
        }
    }

    /// Response body sent to the client
    pub fn body(&self) -> Value {
        match self {
            AssistantError::RateLimited { retry_after_secs } => json!({
                "error": self.to_string(),
                "retryAfter": retry_after_secs,
                "type": "rate_limit_exceeded",
            }),
            AssistantError::DailyLimitExceeded {
                daily_count,
                daily_limit,
                is_premium,
            } => json!({
                "error": self.to_string(),
                "dailyCount": daily_count,
                "dailyLimit": daily_limit,
                "isPremium": is_premium,
                "type": "daily_limit_exceeded",
            }),
            // Upstream details stay in the logs
            AssistantError::Upstream(_) => json!({ "error": "AI service unavailable" }),
            _ => json!({ "error": self.to_string() }),
        }
    }
}

/// Payment webhook errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("Unsupported gateway: {0}")]
    UnsupportedGateway(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Get HTTP status code
    ///
    /// Gateways retry on any non-2xx, so every failure is reported the same way.
    pub fn status_code(&self) -> u16 {
        500
    }

    pub fn body(&self) -> Value {
        json!({ "error": self.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AssistantError::InvalidRequest("x".into()).status_code(), 400);
        assert_eq!(AssistantError::from(AuthError::MissingToken).status_code(), 401);
        assert_eq!(AssistantError::Upstream("x".into()).status_code(), 502);
        assert_eq!(PaymentError::UnsupportedGateway("paypal".into()).status_code(), 500);
        assert_eq!(PaymentError::InvalidSignature("stale".into()).status_code(), 500);
    }

    #[test]
    fn test_daily_limit_body() {
        let err = AssistantError::DailyLimitExceeded {
            daily_count: 20,
            daily_limit: 20,
            is_premium: false,
        };
        let body = err.body();
        assert_eq!(body["type"], "daily_limit_exceeded");
        assert_eq!(body["dailyCount"], 20);
        assert_eq!(body["isPremium"], false);
    }

    #[test]
    fn test_upstream_body_hides_details() {
        let body = AssistantError::Upstream("sk-leaked".into()).body();
        assert!(!body.to_string().contains("sk-leaked"));
    }
}
