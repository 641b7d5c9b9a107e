//! # Auth Module
//!
//! Bearer-token authentication for the function endpoints and the
//! shared-secret helpers used by webhook signature checks.

pub mod crypto;
pub mod errors;
pub mod jwt;

pub use errors::{AuthError, AuthResult};
pub use jwt::{extract_bearer, AuthenticatedUser, JwtClaims, JwtConfig, JwtManager};
