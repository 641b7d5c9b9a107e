//! # Auth Errors
//!
//! Error types for the authentication module.

use thiserror::Error;

/// Result type for auth operations
pub type AuthResult<T> = Result<T, AuthError>;

/// Authentication errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    // ==================
    // Request Errors
    // ==================

    /// No Authorization header, or not a bearer credential
    #[error("Missing bearer token")]
    MissingToken,

    // ==================
    // JWT Errors
    // ==================

    /// JWT token is malformed
    #[error("Malformed token")]
    MalformedToken,

    /// JWT token has expired
    #[error("Token expired")]
    TokenExpired,

    /// JWT signature is invalid
    #[error("Invalid token signature")]
    InvalidSignature,

    /// Token subject is not a user id
    #[error("Invalid token subject: {0}")]
    InvalidSubject(String),

    // ==================
    // Internal Errors
    // ==================

    /// Token generation failed
    #[error("Internal error: token generation failed")]
    TokenGenerationFailed,

    /// Signing secret missing or unusable
    #[error("Auth configuration error: {0}")]
    ConfigError(String),
}

impl AuthError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            // 401 Unauthorized
            AuthError::MissingToken => 401,
            AuthError::MalformedToken => 401,
            AuthError::TokenExpired => 401,
            AuthError::InvalidSignature => 401,
            AuthError::InvalidSubject(_) => 401,

            // 500 Internal Server Error
            AuthError::TokenGenerationFailed => 500,
            AuthError::ConfigError(_) => 500,
        }
    }

    /// Returns whether this error was caused by the caller
    pub fn is_client_error(&self) -> bool {
        self.status_code() < 500
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(AuthError::MissingToken.status_code(), 401);
        assert_eq!(AuthError::TokenExpired.status_code(), 401);
        assert_eq!(AuthError::TokenGenerationFailed.status_code(), 500);
        assert!(AuthError::InvalidSignature.is_client_error());
    }

    #[test]
    fn test_error_messages_do_not_leak_secrets() {
        let err = AuthError::InvalidSignature;
        assert!(!err.to_string().contains("secret"));
    }
}
