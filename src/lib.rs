//! coachlink - realtime subscriptions and edge functions for a fitness
//! coaching app
//!
//! - `realtime`: change-feed subscription manager (debounce, circuit breaker)
//! - `functions`: AI assistant and payment webhook handlers
//! - `http_server`: axum server hosting the functions
//! - `auth`: bearer-token verification
//! - `observability`: structured logs and counters

pub mod auth;
pub mod cli;
pub mod functions;
pub mod http_server;
pub mod observability;
pub mod realtime;
