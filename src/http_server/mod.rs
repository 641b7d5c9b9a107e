//! # HTTP Server Module
//!
//! Axum server hosting the edge functions.
//!
//! # Endpoints
//!
//! - `/health` - Health check
//! - `/observability/metrics` - Counters as JSON
//! - `/functions/v1/ai-assistant` - Coaching assistant
//! - `/functions/v1/payment-webhook/{gateway}` - Payment notifications

pub mod assistant_routes;
pub mod config;
pub mod observability_routes;
pub mod server;
pub mod webhook_routes;

pub use config::HttpServerConfig;
pub use server::{HttpServer, ServerContext};
